//! # Connection Pool
//!
//! Keeps one live SQLite connection per storage file, keyed by path.
//! Shard access is strongly bursty (consensus hammers the newest shard,
//! sync walks a handful of older ones), so a tiny idle-TTL cache captures
//! nearly all reopen cost without holding hundreds of file handles on a
//! mature chain.
//!
//! Eviction is opportunistic: there is no background timer. Every
//! cacheable open sweeps entries that sat idle past the TTL, plus entries
//! marked transient at insertion. The sweep never touches the path being
//! opened, so the active connection cannot be evicted out from under the
//! router.
//!
//! The pool has no locking of its own. It lives inside the shard domain
//! and is only ever reached with that domain's mutex held.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::error::{is_busy_error, StorageError, StorageResult};
use crate::storage::schema::{self, SchemaError};

struct PoolEntry {
    conn: Connection,
    last_used: Instant,
    /// Entries opened with `cacheable = false` are inserted transient:
    /// they serve the current call and fall to the next sweep.
    cached: bool,
}

pub(crate) struct ConnectionPool {
    entries: HashMap<PathBuf, PoolEntry>,
    ttl: Duration,
}

impl ConnectionPool {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Returns a live connection for `path`, opening (and bootstrapping
    /// or migrating) the file if needed.
    ///
    /// A cacheable open refreshes the entry's idle clock and sweeps the
    /// rest of the pool first. A non-cacheable open leaves existing
    /// entries untouched and inserts its own entry transient.
    pub(crate) fn open(&mut self, path: &Path, cacheable: bool) -> StorageResult<&Connection> {
        if cacheable {
            self.sweep_except(path);
        }
        match self.entries.entry(path.to_path_buf()) {
            Entry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                entry.last_used = Instant::now();
                entry.cached |= cacheable;
                Ok(&entry.conn)
            }
            Entry::Vacant(vacant) => {
                let conn = open_storage_file(path)?;
                let entry = vacant.insert(PoolEntry {
                    conn,
                    last_used: Instant::now(),
                    cached: cacheable,
                });
                Ok(&entry.conn)
            }
        }
    }

    /// Closes every entry idle past the TTL, plus transient entries.
    /// `active` survives regardless of age.
    fn sweep_except(&mut self, active: &Path) {
        let now = Instant::now();
        let stale: Vec<PathBuf> = self
            .entries
            .iter()
            .filter(|(path, entry)| {
                path.as_path() != active
                    && (!entry.cached || now.duration_since(entry.last_used) >= self.ttl)
            })
            .map(|(path, _)| path.clone())
            .collect();
        for path in stale {
            if let Some(entry) = self.entries.remove(&path) {
                debug!(path = %path.display(), "evicting idle storage connection");
                close_connection(&path, entry.conn);
            }
        }
    }

    /// Closes and forgets every entry. Used before wholesale file
    /// deletion; the files cannot be unlinked while handles are open on
    /// some platforms.
    pub(crate) fn close_all(&mut self) {
        for (path, entry) in self.entries.drain() {
            close_connection(&path, entry.conn);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }
}

// ---------------------------------------------------------------------------
// File-level open/close
// ---------------------------------------------------------------------------

/// Opens `path`, switches it to WAL journaling, and runs the schema
/// manager. A failed bootstrap deletes the half-created file before the
/// error propagates, so a retry starts from nothing.
///
/// Also used directly (outside the pool) for the superblock partition,
/// which keeps a single long-lived connection.
pub(crate) fn open_storage_file(path: &Path) -> StorageResult<Connection> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    // journal_mode is the one pragma that answers with a row.
    conn.query_row("PRAGMA journal_mode=WAL", [], |row| {
        row.get::<_, String>(0)
    })?;
    match schema::ensure_schema(&conn) {
        Ok(()) => Ok(conn),
        Err(SchemaError::Bootstrap(source)) => {
            drop(conn);
            if let Err(io) = fs::remove_file(path) {
                warn!(
                    path = %path.display(),
                    error = %io,
                    "failed to remove partially created storage file"
                );
            }
            Err(StorageError::SchemaCorruption {
                path: path.to_path_buf(),
                source,
            })
        }
        Err(SchemaError::Migrate(source)) => Err(StorageError::Database(source)),
    }
}

/// Closes a pooled connection, retrying once on lock contention. A still
/// stuck handle is dropped; SQLite finishes the close on drop.
pub(crate) fn close_connection(path: &Path, conn: Connection) {
    if let Err((conn, err)) = conn.close() {
        if is_busy_error(&err) {
            debug!(path = %path.display(), "storage file busy on close, retrying");
            if let Err((_, err)) = conn.close() {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "pooled connection would not close cleanly"
                );
            }
        } else {
            warn!(
                path = %path.display(),
                error = %err,
                "error closing pooled connection"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
