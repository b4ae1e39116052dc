//! # Block Record
//!
//! A block as the storage engine sees it: a height-keyed row of opaque
//! checksums, an ordered transaction-id list, a signature set, and an
//! optional superblock (checkpoint) extension.
//!
//! ## Superblocks
//!
//! A superblock is an ordinary block that additionally checkpoints a set
//! of prior blocks. It names them in `superblock_segments` (block number
//! to checksum) and links to the *previous* superblock via
//! `last_superblock_checksum` / `last_superblock_num`. The link only ever
//! points backward; "what comes after SB?" is answered by searching for
//! the row that points back at SB (see
//! [`Storage::get_next_superblock`](crate::storage::Storage::get_next_superblock)).
//!
//! ## Signature freeze
//!
//! While a block is in flight its signature set grows and shrinks. Once
//! consensus freezes it, the final set lands in `frozen_signatures` and
//! supersedes the mutable one: persistence always prefers the frozen set,
//! so finality monotonically replaces tentative data on disk.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// BlockSignature
// ---------------------------------------------------------------------------

/// One entry of a block's signature set.
///
/// `signer` is an optional reference to the signing identity (an address
/// or a compacted index, depending on block version); `None` is stored as
/// the sentinel `"0"` in the delimited column form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSignature {
    /// Opaque signer reference; absent for compacted entries.
    pub signer: Option<Vec<u8>>,
    /// Opaque signature bytes.
    pub signature: Vec<u8>,
}

impl BlockSignature {
    /// Signature with a signer reference attached.
    pub fn new(signer: impl Into<Vec<u8>>, signature: impl Into<Vec<u8>>) -> Self {
        Self {
            signer: Some(signer.into()),
            signature: signature.into(),
        }
    }

    /// Signature without a signer reference.
    pub fn anonymous(signature: impl Into<Vec<u8>>) -> Self {
        Self {
            signer: None,
            signature: signature.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// SuperBlockSegment
// ---------------------------------------------------------------------------

/// One checkpointed block inside a superblock: its number and checksum.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperBlockSegment {
    /// Number of the checkpointed block.
    pub block_num: u64,
    /// Checksum of the checkpointed block at freeze time.
    pub checksum: Vec<u8>,
}

impl SuperBlockSegment {
    pub fn new(block_num: u64, checksum: impl Into<Vec<u8>>) -> Self {
        Self {
            block_num,
            checksum: checksum.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A block row. Keyed by `block_num`, which is unique and assigned
/// monotonically upstream.
///
/// Invariant: if `last_superblock_checksum` is `Some`, the block is a
/// superblock and `superblock_segments` must be non-empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block height. 0 is the genesis block.
    pub block_num: u64,
    /// Checksum of this block.
    pub checksum: Vec<u8>,
    /// Checksum of the previous block.
    pub last_block_checksum: Vec<u8>,
    /// Checksum of the wallet state after applying this block.
    pub wallet_state_checksum: Vec<u8>,
    /// Checksum covering the frozen signature set.
    pub sig_freeze_checksum: Vec<u8>,
    /// Mining difficulty at this height.
    pub difficulty: u64,
    /// Proof-of-work solution field; absent until solved.
    pub pow_field: Option<Vec<u8>>,
    /// Ordered ids of the transactions applied by this block.
    pub transactions: Vec<String>,
    /// In-flight signature set; mutable until freeze.
    pub signatures: Vec<BlockSignature>,
    /// Post-freeze signature set. Takes precedence over `signatures`
    /// when persisting.
    pub frozen_signatures: Option<Vec<BlockSignature>>,
    /// Unix timestamp of block production.
    pub timestamp: i64,
    /// Block schema version.
    pub version: i32,
    /// Checksum of the previous superblock; `Some` marks this block as a
    /// superblock.
    pub last_superblock_checksum: Option<Vec<u8>>,
    /// Number of the previous superblock; 0 when not a superblock or when
    /// this is the first checkpoint.
    pub last_superblock_num: u64,
    /// Blocks checkpointed by this superblock, keyed by block number.
    pub superblock_segments: BTreeMap<u64, SuperBlockSegment>,
    /// Whether the stored signature set is the compacted form.
    pub compacted_sigs: bool,
}

impl Block {
    /// True when this block carries the superblock extension.
    pub fn is_superblock(&self) -> bool {
        self.last_superblock_checksum.is_some()
    }

    /// The signature set that persistence must store: the frozen set when
    /// finality has replaced the in-flight one, otherwise the mutable set.
    pub fn stored_signatures(&self) -> &[BlockSignature] {
        match &self.frozen_signatures {
            Some(frozen) => frozen,
            None => &self.signatures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frozen_signatures_take_precedence() {
        let mut block = Block {
            signatures: vec![BlockSignature::new(b"live".to_vec(), b"s1".to_vec())],
            ..Block::default()
        };
        assert_eq!(block.stored_signatures().len(), 1);
        assert_eq!(block.stored_signatures()[0].signer.as_deref(), Some(&b"live"[..]));

        block.frozen_signatures = Some(vec![
            BlockSignature::anonymous(b"f1".to_vec()),
            BlockSignature::anonymous(b"f2".to_vec()),
        ]);
        assert_eq!(block.stored_signatures().len(), 2);
        assert!(block.stored_signatures()[0].signer.is_none());
    }

    #[test]
    fn superblock_detection_follows_checksum_presence() {
        let mut block = Block::default();
        assert!(!block.is_superblock());
        block.last_superblock_checksum = Some(vec![0xAA; 32]);
        assert!(block.is_superblock());
    }
}
