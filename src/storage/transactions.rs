//! # Transaction Store
//!
//! Transactions live in the shard of the block that applied them, so the
//! `applied` height is both a column and a routing key. A caller who
//! knows it gets a direct lookup with a terminal miss; a caller who does
//! not (height 0) pays for a descending scan across shards.
//!
//! ## Legacy single-sender rows
//!
//! Files written before multi-sender support carry a `from` column (raw
//! sender address bytes) and no `fromList`. Such rows are reconstructed
//! on decode: the whole spend (`amount + fee`) is attributed to the
//! sentinel single-zero-byte address, and a missing public key falls
//! back to the `from` bytes as stored. This shim is decode-only; nothing
//! ever writes the legacy shape again.

use std::collections::BTreeMap;

use rusqlite::types::FromSql;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::warn;

use crate::codec;
use crate::error::{CodecError, StorageError, StorageResult};
use crate::storage::engine::{ShardDomain, Storage};
use crate::types::Transaction;

impl Storage {
    /// Persists a transaction into the shard owning its `applied`
    /// height, creating or overwriting the row. The caller guarantees
    /// `applied` is final. Returns whether a row changed.
    pub fn put_transaction(&self, tx: &Transaction) -> StorageResult<bool> {
        let to_list = codec::encode_address_amounts(&tx.to_list);
        let from_list = codec::encode_address_amounts(&tx.from_list);
        let data = codec::shuffle_payload(&tx.data);
        let amount = tx.amount.to_string();
        let fee = tx.fee.to_string();

        let mut shards = self.shards.lock();
        let conn = shards.router.seek(tx.applied, true)?;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM transactions WHERE id = ?1",
                params![tx.id],
                |row| row.get(0),
            )
            .optional()?;

        let affected = if exists.is_some() {
            conn.execute(
                "UPDATE transactions SET type = ?2, amount = ?3, fee = ?4, toList = ?5, \
                 fromList = ?6, dataChecksum = ?7, data = ?8, blockHeight = ?9, nonce = ?10, \
                 timestamp = ?11, checksum = ?12, signature = ?13, pubKey = ?14, \
                 applied = ?15, version = ?16 WHERE id = ?1",
                params![
                    tx.id,
                    tx.tx_type,
                    amount,
                    fee,
                    to_list,
                    from_list,
                    tx.data_checksum,
                    data,
                    tx.block_height,
                    tx.nonce,
                    tx.timestamp,
                    tx.checksum,
                    tx.signature,
                    tx.pub_key,
                    tx.applied,
                    tx.version,
                ],
            )?
        } else {
            conn.execute(
                "INSERT INTO transactions (id, type, amount, fee, toList, fromList, \
                 dataChecksum, data, blockHeight, nonce, timestamp, checksum, signature, \
                 pubKey, applied, version) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    tx.id,
                    tx.tx_type,
                    amount,
                    fee,
                    to_list,
                    from_list,
                    tx.data_checksum,
                    data,
                    tx.block_height,
                    tx.nonce,
                    tx.timestamp,
                    tx.checksum,
                    tx.signature,
                    tx.pub_key,
                    tx.applied,
                    tx.version,
                ],
            )?
        };
        Ok(affected > 0)
    }

    /// Transaction by id.
    ///
    /// With a non-zero `applied` hint the lookup goes straight to the
    /// owning shard and a miss there is final. With 0 the currently
    /// bound shard is probed first, then every shard from the newest
    /// down; failing shards are logged and skipped.
    pub fn get_transaction(&self, id: &str, applied: u64) -> Option<Transaction> {
        let mut shards = self.shards.lock();

        if applied > 0 {
            return match self.tx_in_shard(&mut shards, applied, id, true) {
                Ok(found) => found,
                Err(err) => {
                    warn!(tx_id = %id, applied, error = %err, "transaction lookup failed");
                    None
                }
            };
        }

        if let Some(origin) = shards.router.current_origin() {
            match self.tx_in_shard(&mut shards, origin, id, true) {
                Ok(Some(tx)) => return Some(tx),
                Ok(None) => {}
                Err(err) => warn!(tx_id = %id, origin, error = %err, "active shard probe failed"),
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
                    warn!(error = %err, "cannot establish scan bound for transaction lookup");
                    None
                }
            },
        };
        let highest = highest?;

        let step = self.config.blocks_per_shard;
        let mut origin = shards.router.shard_origin(highest);
        loop {
            match self.tx_in_shard(&mut shards, origin, id, false) {
                Ok(Some(tx)) => return Some(tx),
                Ok(None) => {}
                Err(err) => warn!(tx_id = %id, origin, error = %err, "shard failed during scan"),
            }
            if origin == 0 {
                return None;
            }
            origin -= step;
        }
    }

    fn tx_in_shard(
        &self,
        shards: &mut ShardDomain,
        seek_height: u64,
        id: &str,
        cacheable: bool,
    ) -> StorageResult<Option<Transaction>> {
        let conn = shards.router.seek(seek_height, cacheable)?;
        query_transaction(conn, id)
    }

    /// Deletes a transaction row from the currently bound shard.
    ///
    /// Routing is the caller's job: this is the cascade primitive of
    /// [`Storage::remove_block`], which has already sought the shard.
    /// Returns whether a row was deleted.
    pub fn remove_transaction(&self, id: &str) -> StorageResult<bool> {
        let mut shards = self.shards.lock();
        self.remove_transaction_locked(&mut shards, id)
    }

    pub(crate) fn remove_transaction_locked(
        &self,
        shards: &mut ShardDomain,
        id: &str,
    ) -> StorageResult<bool> {
        let Some(origin) = shards.router.current_origin() else {
            return Ok(false);
        };
        let conn = shards.router.seek(origin, true)?;
        let affected = conn.execute("DELETE FROM transactions WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

/// Plain column values of one transaction row. Read by name because the
/// column set varies across file generations; `SELECT *` plus tolerant
/// access is what lets one decoder serve every generation.
struct RawTxRow {
    id: String,
    tx_type: i32,
    amount: Option<String>,
    fee: Option<String>,
    to_list: Option<String>,
    from_list: Option<String>,
    legacy_from: Option<Vec<u8>>,
    data_checksum: Option<Vec<u8>>,
    data: Option<Vec<u8>>,
    block_height: Option<u64>,
    nonce: Option<i32>,
    timestamp: Option<i64>,
    checksum: Option<Vec<u8>>,
    signature: Option<Vec<u8>>,
    pub_key: Option<Vec<u8>>,
    applied: Option<u64>,
    version: Option<i32>,
}

fn read_tx_row(row: &Row<'_>) -> rusqlite::Result<RawTxRow> {
    Ok(RawTxRow {
        id: row.get("id")?,
        tx_type: row.get("type")?,
        amount: row.get("amount")?,
        fee: row.get("fee")?,
        to_list: row.get("toList")?,
        from_list: optional_column(row, "fromList")?,
        legacy_from: optional_column(row, "from")?,
        data_checksum: optional_column(row, "dataChecksum")?,
        data: row.get("data")?,
        block_height: row.get("blockHeight")?,
        nonce: row.get("nonce")?,
        timestamp: row.get("timestamp")?,
        checksum: row.get("checksum")?,
        signature: row.get("signature")?,
        pub_key: row.get("pubKey")?,
        applied: row.get("applied")?,
        version: row.get("version")?,
    })
}

/// Reads a column that may not exist in older file generations.
fn optional_column<T: FromSql>(row: &Row<'_>, name: &str) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<T>>(name) {
        Ok(value) => Ok(value),
        Err(rusqlite::Error::InvalidColumnName(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

fn query_transaction(conn: &Connection, id: &str) -> StorageResult<Option<Transaction>> {
    let raw = conn
        .query_row("SELECT * FROM transactions WHERE id = ?1", params![id], read_tx_row)
        .optional()?;
    raw.map(decode_tx_row).transpose()
}

fn decode_tx_row(raw: RawTxRow) -> StorageResult<Transaction> {
    let key = raw.id.clone();
    let wrap = |e: CodecError| StorageError::encoding(&key, e);

    let amount = parse_amount(raw.amount.as_deref()).map_err(wrap)?;
    let fee = parse_amount(raw.fee.as_deref()).map_err(wrap)?;
    let to_list =
        codec::decode_address_amounts(raw.to_list.as_deref().unwrap_or("")).map_err(wrap)?;
    let mut pub_key = raw.pub_key.filter(|p| !p.is_empty());

    // A populated legacy sender takes precedence over the fromList
    // column, mirroring how the rows were written back then.
    let from_list = match raw.legacy_from.filter(|f| !f.is_empty()) {
        Some(from) => {
            if pub_key.is_none() {
                pub_key = Some(from);
            }
            let mut synthesized = BTreeMap::new();
            synthesized.insert(
                Transaction::LEGACY_SENDER.to_vec(),
                amount.saturating_add(fee),
            );
            synthesized
        }
        None => {
            codec::decode_address_amounts(raw.from_list.as_deref().unwrap_or("")).map_err(wrap)?
        }
    };

    Ok(Transaction {
        id: raw.id,
        tx_type: raw.tx_type,
        amount,
        fee,
        to_list,
        from_list,
        data: codec::unshuffle_payload(raw.data.as_deref().unwrap_or(&[])),
        data_checksum: raw.data_checksum,
        block_height: raw.block_height.unwrap_or(0),
        nonce: raw.nonce.unwrap_or(0),
        timestamp: raw.timestamp.unwrap_or(0),
        checksum: raw.checksum,
        signature: raw.signature,
        pub_key,
        applied: raw.applied.unwrap_or(0),
        version: raw.version.unwrap_or(0),
    })
}

fn parse_amount(column: Option<&str>) -> Result<primitive_types::U256, CodecError> {
    match column {
        None | Some("") => Ok(primitive_types::U256::zero()),
        Some(text) => {
            primitive_types::U256::from_dec_str(text).map_err(|_| CodecError::Decimal {
                entry: text.to_string(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::verify::AcceptAllFreezes;
    use primitive_types::U256;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Storage {
        let mut config = StorageConfig::new(dir.path());
        config.blocks_per_shard = 10;
        Storage::open(config, Arc::new(AcceptAllFreezes)).unwrap()
    }

    fn sample_tx(id: &str, applied: u64) -> Transaction {
        let mut to_list = BTreeMap::new();
        to_list.insert(vec![1, 2, 3, 4], U256::from(500u64));
        let mut from_list = BTreeMap::new();
        from_list.insert(vec![9, 8, 7], U256::from(510u64));
        Transaction {
            id: id.to_string(),
            tx_type: 0,
            amount: U256::from(500u64),
            fee: U256::from(10u64),
            to_list,
            from_list,
            data: b"payload bytes".to_vec(),
            data_checksum: Some(vec![0xAB; 16]),
            block_height: applied,
            nonce: 1,
            timestamp: 1_700_000_000,
            checksum: Some(vec![0xCD; 32]),
            signature: Some(vec![0xEF; 64]),
            pub_key: Some(vec![0x11; 33]),
            applied,
            version: 6,
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        let tx = sample_tx("tx-direct", 15);
        assert!(storage.put_transaction(&tx).unwrap());
        let loaded = storage.get_transaction("tx-direct", 15).unwrap();
        assert_eq!(loaded, tx);
    }

    #[test]
    fn payload_is_stored_reversed() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        let tx = sample_tx("tx-shuffled", 3);
        storage.put_transaction(&tx).unwrap();

        // Inspect the raw column through an independent handle.
        let shard = dir.path().join("shards").join("0.dat");
        let conn = Connection::open(shard).unwrap();
        let stored: Vec<u8> = conn
            .query_row(
                "SELECT data FROM transactions WHERE id = 'tx-shuffled'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        let mut reversed = tx.data.clone();
        reversed.reverse();
        assert_eq!(stored, reversed);
        // And comes back in original order.
        assert_eq!(storage.get_transaction("tx-shuffled", 3).unwrap().data, tx.data);
    }

    #[test]
    fn known_height_miss_is_terminal() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        storage.put_transaction(&sample_tx("tx-a", 15)).unwrap();
        // Wrong shard with a non-zero hint: no fallback scan.
        assert!(storage.get_transaction("tx-a", 25).is_none());
        assert!(storage.get_transaction("tx-a", 15).is_some());
    }

    #[test]
    fn unknown_height_scans_older_shards() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        storage.put_transaction(&sample_tx("tx-old", 5)).unwrap();
        storage.put_transaction(&sample_tx("tx-new", 15)).unwrap();
        // Make the scan bound discoverable.
        let block = crate::types::Block {
            block_num: 15,
            checksum: vec![15; 32],
            ..Default::default()
        };
        storage.put_block(&block).unwrap();

        let found = storage.get_transaction("tx-old", 0).unwrap();
        assert_eq!(found.applied, 5);
        assert!(storage.get_transaction("tx-missing", 0).is_none());
    }

    #[test]
    fn upsert_overwrites_in_place() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        let mut tx = sample_tx("tx-up", 7);
        storage.put_transaction(&tx).unwrap();
        tx.nonce = 2;
        tx.data = b"second payload".to_vec();
        assert!(storage.put_transaction(&tx).unwrap());
        let loaded = storage.get_transaction("tx-up", 7).unwrap();
        assert_eq!(loaded.nonce, 2);
        assert_eq!(loaded.data, b"second payload".to_vec());
    }

    #[test]
    fn remove_deletes_from_the_bound_shard() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        storage.put_transaction(&sample_tx("tx-gone", 12)).unwrap();
        assert!(storage.remove_transaction("tx-gone").unwrap());
        assert!(storage.get_transaction("tx-gone", 12).is_none());
        assert!(!storage.remove_transaction("tx-gone").unwrap());
    }

    #[test]
    fn legacy_single_sender_rows_decode_through_the_shim() {
        let dir = TempDir::new().unwrap();
        let shard_dir = dir.path().join("shards");
        std::fs::create_dir_all(&shard_dir).unwrap();

        // Hand-build a pre-sharding file generation: the `from` column
        // holds the raw sender address bytes, and there is no fromList.
        let sender = vec![5u8, 6, 7, 8];
        {
            let conn = Connection::open(shard_dir.join("0.dat")).unwrap();
            conn.execute_batch(
                "CREATE TABLE blocks (blockNum INTEGER PRIMARY KEY, blockChecksum BLOB,
                    lastBlockChecksum BLOB, walletStateChecksum BLOB, sigFreezeChecksum BLOB,
                    difficulty INTEGER, powField BLOB, transactions TEXT, signatures TEXT,
                    timestamp INTEGER, version INTEGER);
                CREATE TABLE transactions (id TEXT PRIMARY KEY, type INTEGER, amount TEXT,
                    fee TEXT, toList TEXT, `from` BLOB, data BLOB, blockHeight INTEGER,
                    nonce INTEGER, timestamp INTEGER, checksum BLOB, signature BLOB,
                    pubKey BLOB, applied INTEGER, version INTEGER);",
            )
            .unwrap();
            conn.execute(
                "INSERT INTO transactions (id, type, amount, fee, toList, `from`, data,
                    blockHeight, nonce, timestamp, applied, version)
                 VALUES ('tx-legacy', 0, '100', '5', '', ?1, NULL, 4, 0, 0, 4, 1)",
                params![sender],
            )
            .unwrap();
        }

        let storage = open(&dir);
        let tx = storage.get_transaction("tx-legacy", 4).unwrap();

        // Whole spend attributed to the sentinel sender address.
        assert_eq!(tx.from_list.len(), 1);
        assert_eq!(
            tx.from_list.get(&Transaction::LEGACY_SENDER.to_vec()),
            Some(&U256::from(105u64))
        );
        // Public key falls back to the stored sender bytes, verbatim.
        assert_eq!(tx.pub_key, Some(sender));
        assert_eq!(tx.amount, U256::from(100u64));
    }

    #[test]
    fn legacy_sender_yields_to_a_stored_public_key() {
        let dir = TempDir::new().unwrap();
        let shard_dir = dir.path().join("shards");
        std::fs::create_dir_all(&shard_dir).unwrap();
        {
            let conn = Connection::open(shard_dir.join("0.dat")).unwrap();
            conn.execute_batch(
                "CREATE TABLE blocks (blockNum INTEGER PRIMARY KEY, blockChecksum BLOB,
                    lastBlockChecksum BLOB, walletStateChecksum BLOB, sigFreezeChecksum BLOB,
                    difficulty INTEGER, powField BLOB, transactions TEXT, signatures TEXT,
                    timestamp INTEGER, version INTEGER);
                CREATE TABLE transactions (id TEXT PRIMARY KEY, type INTEGER, amount TEXT,
                    fee TEXT, toList TEXT, `from` BLOB, data BLOB, blockHeight INTEGER,
                    nonce INTEGER, timestamp INTEGER, checksum BLOB, signature BLOB,
                    pubKey BLOB, applied INTEGER, version INTEGER);",
            )
            .unwrap();
            conn.execute(
                "INSERT INTO transactions (id, type, amount, fee, toList, `from`, pubKey,
                    blockHeight, nonce, timestamp, applied, version)
                 VALUES ('tx-keyed', 0, '7', '1', '', ?1, ?2, 2, 0, 0, 2, 1)",
                params![vec![9u8, 9], vec![0x42u8; 33]],
            )
            .unwrap();
        }

        let storage = open(&dir);
        let tx = storage.get_transaction("tx-keyed", 2).unwrap();
        assert_eq!(tx.pub_key, Some(vec![0x42u8; 33]));
        assert_eq!(
            tx.from_list.get(&Transaction::LEGACY_SENDER.to_vec()),
            Some(&U256::from(8u64))
        );
    }
}
