//! # Domain Records
//!
//! The two record kinds the engine persists, plus the checkpoint
//! extension types. These structs mirror the storage columns one-to-one;
//! field semantics beyond round-tripping (how a checksum is computed, what
//! a proof-of-work field means) belong to the consensus layer, not here.

pub mod block;
pub mod transaction;

pub use block::{Block, BlockSignature, SuperBlockSegment};
pub use transaction::Transaction;
