//! # Block Store
//!
//! Block persistence against the sharded partition, plus the write half
//! of the superblock index (superblocks are ordinary blocks written to
//! both partitions). Row shape is identical in both, so the upsert and
//! the row decoder here are shared with the superblock lookups.
//!
//! A block row is keyed by height and upserted: re-broadcasts and reorg
//! re-applies overwrite every mutable column in place, never duplicate.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::codec;
use crate::error::{StorageError, StorageResult};
use crate::storage::engine::{ShardDomain, Storage};
use crate::types::Block;

/// Column list shared by every block SELECT; order matches the
/// positional reads in `read_block_row`.
pub(crate) const BLOCK_COLUMNS: &str = "blockNum, blockChecksum, lastBlockChecksum, \
     walletStateChecksum, sigFreezeChecksum, difficulty, powField, transactions, \
     signatures, timestamp, version, lastSuperBlockChecksum, lastSuperBlockNum, \
     superBlockSegments, compactedSigs";

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

impl Storage {
    /// Persists a block, creating or overwriting its row.
    ///
    /// The signature-freeze verifier is consulted first; a rejected
    /// freeze aborts with [`StorageError::ValidationFailed`] and no
    /// mutation. Superblocks are additionally written to the checkpoint
    /// partition before the shard write. Returns whether a row changed.
    pub fn put_block(&self, block: &Block) -> StorageResult<bool> {
        if !self.verifier.verify_signature_freeze(block) {
            return Err(StorageError::ValidationFailed(block.block_num));
        }

        let encoded = EncodedBlock::from_block(block);

        if block.is_superblock() {
            let mut superblocks = self.superblocks.lock();
            let conn = superblocks.conn()?;
            upsert_block(conn, block, &encoded)?;
        }

        let mut shards = self.shards.lock();
        let conn = shards.router.seek(block.block_num, true)?;
        let affected = upsert_block(conn, block, &encoded)?;
        if affected > 0 {
            if let Some(highest) = shards.highest_block {
                if block.block_num > highest {
                    shards.highest_block = Some(block.block_num);
                }
            }
        }
        Ok(affected > 0)
    }

    /// Block at `block_num`, from its owning shard.
    pub fn get_block(&self, block_num: u64) -> Option<Block> {
        let mut shards = self.shards.lock();
        match self.get_block_locked(&mut shards, block_num, true) {
            Ok(found) => found,
            Err(err) => {
                warn!(block_num, error = %err, "block lookup failed");
                None
            }
        }
    }

    pub(crate) fn get_block_locked(
        &self,
        shards: &mut ShardDomain,
        block_num: u64,
        cacheable: bool,
    ) -> StorageResult<Option<Block>> {
        let conn = shards.router.seek(block_num, cacheable)?;
        query_block(
            conn,
            &format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE blockNum = ?1"),
            params![block_num],
        )
    }

    /// Block with the given checksum.
    ///
    /// Tries the currently bound shard first (hash lookups almost always
    /// target recent blocks), then walks shard origins downward from the
    /// newest. A failing shard is logged and skipped; the scan goes on.
    pub fn get_block_by_hash(&self, checksum: &[u8]) -> Option<Block> {
        let mut shards = self.shards.lock();

        if let Some(origin) = shards.router.current_origin() {
            match self.block_by_hash_in_shard(&mut shards, origin, checksum, true) {
                Ok(Some(block)) => return Some(block),
                Ok(None) => {}
                Err(err) => warn!(origin, error = %err, "hash probe of active shard failed"),
            }
        }

        let highest = match shards.highest_block {
            Some(h) => Some(h),
            None => match self.compute_highest_locked(&mut shards) {
                Ok(h) => {
                    shards.highest_block = h;
                    h
                }
                Err(err) => {
                    warn!(error = %err, "cannot establish scan bound for hash lookup");
                    None
                }
            },
        };
        let highest = highest?;

        let step = self.config.blocks_per_shard;
        let mut origin = shards.router.shard_origin(highest);
        loop {
            match self.block_by_hash_in_shard(&mut shards, origin, checksum, false) {
                Ok(Some(block)) => return Some(block),
                Ok(None) => {}
                Err(err) => warn!(origin, error = %err, "shard failed during hash scan"),
            }
            if origin == 0 {
                debug!(checksum = %hex::encode(checksum), "block hash not found in any shard");
                return None;
            }
            origin -= step;
        }
    }

    fn block_by_hash_in_shard(
        &self,
        shards: &mut ShardDomain,
        origin: u64,
        checksum: &[u8],
        cacheable: bool,
    ) -> StorageResult<Option<Block>> {
        let conn = shards.router.seek(origin, cacheable)?;
        query_block(
            conn,
            &format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE blockChecksum = ?1"),
            params![checksum],
        )
    }

    /// Removes a block row, optionally cascading to the transactions it
    /// applied.
    ///
    /// A full-history node refuses outright (`Ok(false)`). An absent
    /// block counts as success. If any referenced transaction fails to
    /// delete, the block row is left untouched so the pass can be
    /// retried without losing the transaction list.
    pub fn remove_block(
        &self,
        block_num: u64,
        remove_transactions: bool,
    ) -> StorageResult<bool> {
        if self.config.keep_full_history {
            return Ok(false);
        }

        let mut shards = self.shards.lock();
        let Some(block) = self.get_block_locked(&mut shards, block_num, true)? else {
            return Ok(true);
        };

        if remove_transactions {
            for id in &block.transactions {
                if !self.remove_transaction_locked(&mut shards, id)? {
                    warn!(
                        block_num,
                        tx_id = %id,
                        "transaction removal failed, keeping block row"
                    );
                    return Ok(false);
                }
            }
        }

        let conn = shards.router.seek(block_num, true)?;
        let affected = conn.execute("DELETE FROM blocks WHERE blockNum = ?1", params![block_num])?;
        if affected > 0 && shards.highest_block == Some(block_num) {
            // The new top is unknown until someone asks.
            shards.highest_block = None;
        }
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Row encoding
// ---------------------------------------------------------------------------

/// Column form of the variable-length block fields, computed once per
/// put and reused for both partitions.
struct EncodedBlock {
    transactions: String,
    signatures: String,
    segments: Vec<u8>,
}

impl EncodedBlock {
    fn from_block(block: &Block) -> Self {
        Self {
            transactions: codec::encode_tx_ids(&block.transactions),
            signatures: codec::encode_signatures(block.stored_signatures()),
            segments: codec::encode_superblock_segments(&block.superblock_segments),
        }
    }
}

/// Insert-or-update keyed by height. Returns the affected row count.
fn upsert_block(conn: &Connection, block: &Block, encoded: &EncodedBlock) -> StorageResult<usize> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM blocks WHERE blockNum = ?1",
            params![block.block_num],
            |row| row.get(0),
        )
        .optional()?;

    // Difficulty is an unsigned 64-bit field; stored bit-cast since
    // SQLite integers are signed.
    let difficulty = block.difficulty as i64;
    let affected = if exists.is_some() {
        conn.execute(
            "UPDATE blocks SET blockChecksum = ?2, lastBlockChecksum = ?3, \
             walletStateChecksum = ?4, sigFreezeChecksum = ?5, difficulty = ?6, \
             powField = ?7, transactions = ?8, signatures = ?9, timestamp = ?10, \
             version = ?11, lastSuperBlockChecksum = ?12, lastSuperBlockNum = ?13, \
             superBlockSegments = ?14, compactedSigs = ?15 WHERE blockNum = ?1",
            params![
                block.block_num,
                block.checksum,
                block.last_block_checksum,
                block.wallet_state_checksum,
                block.sig_freeze_checksum,
                difficulty,
                block.pow_field,
                encoded.transactions,
                encoded.signatures,
                block.timestamp,
                block.version,
                block.last_superblock_checksum,
                block.last_superblock_num,
                encoded.segments,
                block.compacted_sigs,
            ],
        )?
    } else {
        conn.execute(
            "INSERT INTO blocks (blockNum, blockChecksum, lastBlockChecksum, \
             walletStateChecksum, sigFreezeChecksum, difficulty, powField, transactions, \
             signatures, timestamp, version, lastSuperBlockChecksum, lastSuperBlockNum, \
             superBlockSegments, compactedSigs) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                block.block_num,
                block.checksum,
                block.last_block_checksum,
                block.wallet_state_checksum,
                block.sig_freeze_checksum,
                difficulty,
                block.pow_field,
                encoded.transactions,
                encoded.signatures,
                block.timestamp,
                block.version,
                block.last_superblock_checksum,
                block.last_superblock_num,
                encoded.segments,
                block.compacted_sigs,
            ],
        )?
    };
    Ok(affected)
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

/// Plain column values of one block row, read positionally in
/// [`BLOCK_COLUMNS`] order before any codec work happens.
struct RawBlockRow {
    block_num: u64,
    checksum: Option<Vec<u8>>,
    last_block_checksum: Option<Vec<u8>>,
    wallet_state_checksum: Option<Vec<u8>>,
    sig_freeze_checksum: Option<Vec<u8>>,
    difficulty: i64,
    pow_field: Option<Vec<u8>>,
    transactions: Option<String>,
    signatures: Option<String>,
    timestamp: i64,
    version: i32,
    last_superblock_checksum: Option<Vec<u8>>,
    last_superblock_num: Option<u64>,
    segments: Option<Vec<u8>>,
    compacted_sigs: Option<bool>,
}

fn read_block_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawBlockRow> {
    Ok(RawBlockRow {
        block_num: row.get(0)?,
        checksum: row.get(1)?,
        last_block_checksum: row.get(2)?,
        wallet_state_checksum: row.get(3)?,
        sig_freeze_checksum: row.get(4)?,
        difficulty: row.get(5)?,
        pow_field: row.get(6)?,
        transactions: row.get(7)?,
        signatures: row.get(8)?,
        timestamp: row.get(9)?,
        version: row.get(10)?,
        last_superblock_checksum: row.get(11)?,
        last_superblock_num: row.get(12)?,
        segments: row.get(13)?,
        compacted_sigs: row.get(14)?,
    })
}

/// Runs a single-row block query and decodes the hit, if any.
///
/// Shared with the superblock lookups; both partitions use the same row
/// shape.
pub(crate) fn query_block<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> StorageResult<Option<Block>> {
    let raw = conn.query_row(sql, params, read_block_row).optional()?;
    raw.map(decode_block_row).transpose()
}

fn decode_block_row(raw: RawBlockRow) -> StorageResult<Block> {
    let key = format!("block #{}", raw.block_num);
    let signatures = codec::decode_signatures(raw.signatures.as_deref().unwrap_or(""))
        .map_err(|e| StorageError::encoding(&key, e))?;
    let superblock_segments = match raw.segments.as_deref() {
        Some(bytes) if !bytes.is_empty() => codec::decode_superblock_segments(bytes)
            .map_err(|e| StorageError::encoding(&key, e))?,
        _ => BTreeMap::new(),
    };
    Ok(Block {
        block_num: raw.block_num,
        checksum: raw.checksum.unwrap_or_default(),
        last_block_checksum: raw.last_block_checksum.unwrap_or_default(),
        wallet_state_checksum: raw.wallet_state_checksum.unwrap_or_default(),
        sig_freeze_checksum: raw.sig_freeze_checksum.unwrap_or_default(),
        difficulty: raw.difficulty as u64,
        pow_field: raw.pow_field,
        transactions: codec::decode_tx_ids(raw.transactions.as_deref().unwrap_or("")),
        // Loaded rows carry the persisted set in the mutable slot; the
        // frozen slot only exists in flight.
        signatures,
        frozen_signatures: None,
        timestamp: raw.timestamp,
        version: raw.version,
        last_superblock_checksum: raw.last_superblock_checksum,
        last_superblock_num: raw.last_superblock_num.unwrap_or(0),
        superblock_segments,
        compacted_sigs: raw.compacted_sigs.unwrap_or(false),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
