// Copyright (c) 2026 Helix Contributors. MIT License.
// See LICENSE for details.

//! # Helix Storage
//!
//! The persistence engine of a Helix node: every block and transaction
//! the node has ever accepted lives here, in plain SQLite files you can
//! open with any off-the-shelf tool when things go sideways at 3 AM.
//!
//! ## Why sharded SQLite
//!
//! One database file per thousand blocks instead of one giant file.
//! Shards make pruning a file deletion, keep working-set files small
//! enough to rsync, and mean a corrupted file costs you a slice of
//! history instead of all of it. A separate non-sharded file indexes the
//! checkpoint ("superblock") chain, which is what a syncing node reads
//! first.
//!
//! ## Module map
//!
//! - **config**: tunables plus the on-disk naming contract.
//! - **types**: the block and transaction records as stored.
//! - **codec**: pure encoders/decoders for the column formats.
//! - **verify**: the consensus hook consulted before block writes.
//! - **storage**: pooling, routing, schema, and the record stores.
//! - **error**: the two error channels (hard writes, soft reads).
//!
//! ## Ground rules
//!
//! 1. Reads degrade, writes fail loudly. A broken row is logged and
//!    skipped; a broken write propagates.
//! 2. The on-disk format is append-only law. Schema grows, never shrinks.
//! 3. Two locks, never nested. Shard state and checkpoint state are
//!    disjoint domains.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use helix_storage::{AcceptAllFreezes, Storage, StorageConfig};
//!
//! # fn main() -> Result<(), helix_storage::StorageError> {
//! let config = StorageConfig::new("/var/lib/helix/blocks");
//! let storage = Storage::open(config, Arc::new(AcceptAllFreezes))?;
//! println!("chain tip on disk: {}", storage.highest_block_in_storage());
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod storage;
pub mod types;
pub mod verify;

pub use config::StorageConfig;
pub use error::{CodecError, StorageError, StorageResult};
pub use storage::Storage;
pub use types::{Block, BlockSignature, SuperBlockSegment, Transaction};
pub use verify::{AcceptAllFreezes, SignatureFreezeVerifier};
