//! # Superblock Index
//!
//! Lookups against the non-sharded checkpoint partition. Rows land here
//! as a side effect of [`Storage::put_block`] on superblocks; this module
//! only reads.
//!
//! The chain is linked *backward*: each superblock stores the number and
//! checksum of its predecessor. "What follows SB?" therefore cannot be
//! read off the row itself; it is answered by finding the row whose back
//! pointer names SB. Both directions are indexed by the same two columns.

use tracing::{debug, warn};

use rusqlite::params;

use crate::storage::blocks::{query_block, BLOCK_COLUMNS};
use crate::storage::engine::{Storage, SuperblockDomain};
use crate::error::StorageResult;
use crate::types::Block;

impl Storage {
    /// Superblock at exactly `block_num`.
    pub fn get_superblock(&self, block_num: u64) -> Option<Block> {
        self.superblock_query("superblock by number", |domain| {
            query_block(
                domain.conn()?,
                &format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE blockNum = ?1"),
                params![block_num],
            )
        })
    }

    /// Superblock with the given checksum.
    pub fn get_superblock_by_hash(&self, checksum: &[u8]) -> Option<Block> {
        debug!(checksum = %hex::encode(checksum), "superblock lookup by hash");
        self.superblock_query("superblock by hash", |domain| {
            query_block(
                domain.conn()?,
                &format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE blockChecksum = ?1"),
                params![checksum],
            )
        })
    }

    /// The superblock that checkpoints *after* the one at `block_num`:
    /// the row whose back pointer names that height.
    pub fn get_next_superblock(&self, block_num: u64) -> Option<Block> {
        self.superblock_query("next superblock by number", |domain| {
            query_block(
                domain.conn()?,
                &format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE lastSuperBlockNum = ?1"),
                params![block_num],
            )
        })
    }

    /// The superblock whose back pointer carries the given checksum.
    pub fn get_next_superblock_by_hash(&self, checksum: &[u8]) -> Option<Block> {
        self.superblock_query("next superblock by hash", |domain| {
            query_block(
                domain.conn()?,
                &format!(
                    "SELECT {BLOCK_COLUMNS} FROM blocks WHERE lastSuperBlockChecksum = ?1"
                ),
                params![checksum],
            )
        })
    }

    /// Alias used by sync: the block (in the checkpoint partition) whose
    /// predecessor checkpoint has the given checksum.
    pub fn get_block_by_last_superblock_hash(&self, checksum: &[u8]) -> Option<Block> {
        self.get_next_superblock_by_hash(checksum)
    }

    /// Locks the superblock domain, runs one query, soft-fails.
    fn superblock_query<F>(&self, what: &'static str, query: F) -> Option<Block>
    where
        F: FnOnce(&mut SuperblockDomain) -> StorageResult<Option<Block>>,
    {
        let mut superblocks = self.superblocks.lock();
        match query(&mut superblocks) {
            Ok(found) => found,
            Err(err) => {
                warn!(query = what, error = %err, "superblock lookup failed");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
