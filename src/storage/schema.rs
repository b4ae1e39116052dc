//! # Schema Manager
//!
//! Brings a freshly opened storage file up to the current schema. Runs on
//! every connection open, so it must be cheap on the common path (two
//! `pragma_table_info` probes) and strictly additive: columns and indices
//! are only ever added, never dropped or rewritten. Files written by any
//! older engine version therefore stay readable, and files written by
//! this version stay readable by it forever.
//!
//! Bootstrap (first open of a new file) is distinguished from migration
//! (open of a pre-existing file) because the failure handling differs:
//! a failed bootstrap leaves a half-created file that the pool must
//! delete, while a failed migration must leave the existing file alone.
//!
//! Column names keep their historical spelling. The on-disk format is
//! shared with deployed nodes and is not ours to rename.

use rusqlite::{Connection, OptionalExtension};

// ---------------------------------------------------------------------------
// Bootstrap DDL
// ---------------------------------------------------------------------------

/// Full current schema, created atomically for new files.
const BOOTSTRAP_SQL: &str = "
BEGIN;
CREATE TABLE blocks (
    blockNum INTEGER PRIMARY KEY,
    blockChecksum BLOB,
    lastBlockChecksum BLOB,
    walletStateChecksum BLOB,
    sigFreezeChecksum BLOB,
    difficulty INTEGER,
    powField BLOB,
    transactions TEXT,
    signatures TEXT,
    timestamp INTEGER,
    version INTEGER,
    lastSuperBlockChecksum BLOB,
    lastSuperBlockNum INTEGER,
    superBlockSegments BLOB,
    compactedSigs INTEGER
);
CREATE TABLE transactions (
    id TEXT PRIMARY KEY,
    type INTEGER,
    amount TEXT,
    fee TEXT,
    toList TEXT,
    fromList TEXT,
    dataChecksum BLOB,
    data BLOB,
    blockHeight INTEGER,
    nonce INTEGER,
    timestamp INTEGER,
    checksum BLOB,
    signature BLOB,
    pubKey BLOB,
    applied INTEGER,
    version INTEGER
);
CREATE INDEX idx_tx_type ON transactions (type);
CREATE INDEX idx_tx_to_list ON transactions (toList);
CREATE INDEX idx_tx_from_list ON transactions (fromList);
CREATE INDEX idx_tx_applied ON transactions (applied);
COMMIT;
";

// ---------------------------------------------------------------------------
// SchemaError
// ---------------------------------------------------------------------------

/// Schema failure, split by phase so the pool knows whether the file it
/// just opened is disposable.
#[derive(Debug, thiserror::Error)]
pub(crate) enum SchemaError {
    /// First-time creation failed. The file holds a partial schema and
    /// must be deleted by the caller.
    #[error("schema bootstrap failed: {0}")]
    Bootstrap(#[source] rusqlite::Error),

    /// Upgrading a pre-existing file failed. The file must be left in
    /// place; its data predates this engine version.
    #[error("schema migration failed: {0}")]
    Migrate(#[source] rusqlite::Error),
}

// ---------------------------------------------------------------------------
// ensure_schema
// ---------------------------------------------------------------------------

/// Creates or upgrades the schema behind `conn`.
///
/// Each migration step checks for its own column, so the steps are
/// individually idempotent and a file stuck halfway through an upgrade
/// (crash between steps) heals on the next open.
pub(crate) fn ensure_schema(conn: &Connection) -> Result<(), SchemaError> {
    if !table_exists(conn, "transactions").map_err(SchemaError::Bootstrap)? {
        conn.execute_batch(BOOTSTRAP_SQL)
            .map_err(SchemaError::Bootstrap)?;
        return Ok(());
    }

    let tx_columns = table_columns(conn, "transactions").map_err(SchemaError::Migrate)?;
    if !tx_columns.iter().any(|c| c == "fromList") {
        conn.execute_batch(
            "ALTER TABLE transactions ADD COLUMN fromList TEXT;
             CREATE INDEX IF NOT EXISTS idx_tx_from_list ON transactions (fromList);",
        )
        .map_err(SchemaError::Migrate)?;
    }
    if !tx_columns.iter().any(|c| c == "dataChecksum") {
        conn.execute_batch("ALTER TABLE transactions ADD COLUMN dataChecksum BLOB;")
            .map_err(SchemaError::Migrate)?;
    }

    let block_columns = table_columns(conn, "blocks").map_err(SchemaError::Migrate)?;
    let missing_block_columns = [
        ("lastSuperBlockChecksum", "BLOB"),
        ("lastSuperBlockNum", "INTEGER"),
        ("superBlockSegments", "BLOB"),
        ("compactedSigs", "INTEGER"),
    ];
    for (name, sql_type) in missing_block_columns {
        if !block_columns.iter().any(|c| c == name) {
            conn.execute_batch(&format!("ALTER TABLE blocks ADD COLUMN {name} {sql_type};"))
                .map_err(SchemaError::Migrate)?;
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Column names of `table`, via explicit introspection.
fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let rows = stmt.query_map([table], |row| row.get::<_, String>(0))?;
    rows.collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn bootstrap_creates_full_schema() {
        let conn = fresh_conn();
        ensure_schema(&conn).unwrap();
        assert!(table_exists(&conn, "blocks").unwrap());
        assert!(table_exists(&conn, "transactions").unwrap());
        let cols = table_columns(&conn, "blocks").unwrap();
        assert!(cols.iter().any(|c| c == "superBlockSegments"));
        assert!(cols.iter().any(|c| c == "compactedSigs"));
    }

    #[test]
    fn ensure_schema_is_idempotent() {
        let conn = fresh_conn();
        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO blocks (blockNum, blockChecksum) VALUES (1, x'aa')",
            [],
        )
        .unwrap();
        ensure_schema(&conn).unwrap();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM blocks", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn migrates_pre_sharding_layout() {
        let conn = fresh_conn();
        // Oldest layout still found in the wild: single-sender column,
        // no fromList / dataChecksum, no superblock columns.
        conn.execute_batch(
            "CREATE TABLE blocks (
                blockNum INTEGER PRIMARY KEY, blockChecksum BLOB,
                lastBlockChecksum BLOB, walletStateChecksum BLOB,
                sigFreezeChecksum BLOB, difficulty INTEGER, powField BLOB,
                transactions TEXT, signatures TEXT, timestamp INTEGER,
                version INTEGER
            );
            CREATE TABLE transactions (
                id TEXT PRIMARY KEY, type INTEGER, amount TEXT, fee TEXT,
                toList TEXT, `from` BLOB, data BLOB, blockHeight INTEGER,
                nonce INTEGER, timestamp INTEGER, checksum BLOB,
                signature BLOB, pubKey BLOB, applied INTEGER, version INTEGER
            );",
        )
        .unwrap();

        ensure_schema(&conn).unwrap();

        let tx_cols = table_columns(&conn, "transactions").unwrap();
        assert!(tx_cols.iter().any(|c| c == "fromList"));
        assert!(tx_cols.iter().any(|c| c == "dataChecksum"));
        // Legacy column survives untouched.
        assert!(tx_cols.iter().any(|c| c == "from"));

        let block_cols = table_columns(&conn, "blocks").unwrap();
        assert!(block_cols.iter().any(|c| c == "lastSuperBlockChecksum"));
        assert!(block_cols.iter().any(|c| c == "lastSuperBlockNum"));
        assert!(block_cols.iter().any(|c| c == "superBlockSegments"));
        assert!(block_cols.iter().any(|c| c == "compactedSigs"));
    }

    #[test]
    fn migration_survives_partial_upgrade() {
        let conn = fresh_conn();
        conn.execute_batch(
            "CREATE TABLE blocks (blockNum INTEGER PRIMARY KEY, blockChecksum BLOB,
                lastBlockChecksum BLOB, walletStateChecksum BLOB, sigFreezeChecksum BLOB,
                difficulty INTEGER, powField BLOB, transactions TEXT, signatures TEXT,
                timestamp INTEGER, version INTEGER, lastSuperBlockChecksum BLOB);
            CREATE TABLE transactions (id TEXT PRIMARY KEY, type INTEGER, amount TEXT,
                fee TEXT, toList TEXT, fromList TEXT, data BLOB, blockHeight INTEGER,
                nonce INTEGER, timestamp INTEGER, checksum BLOB, signature BLOB,
                pubKey BLOB, applied INTEGER, version INTEGER);",
        )
        .unwrap();

        ensure_schema(&conn).unwrap();

        let block_cols = table_columns(&conn, "blocks").unwrap();
        assert!(block_cols.iter().any(|c| c == "lastSuperBlockNum"));
        assert!(block_cols.iter().any(|c| c == "compactedSigs"));
    }
}
