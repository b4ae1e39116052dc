//! # Shard Router
//!
//! Maps block heights to shard files and keeps the process-local notion
//! of the *active* shard: the one the most recent seek bound. Shard `k`
//! owns the half-open height range `[k*S, (k+1)*S)` where `S` is
//! `blocks_per_shard`; the file is named after the range's origin.
//!
//! Seeking to a height already covered by the active shard is a no-op
//! touch. Seeking elsewhere rebinds the active shard, creating the file
//! lazily on first contact. Discovery of the newest shard after a restart
//! probes origins upward from zero and stops at the first *missing* file:
//! a gap means everything above it was pruned or never synced, and
//! trusting a stray higher-numbered file would resurrect a hole in the
//! chain.

use std::path::PathBuf;

use rusqlite::Connection;
use tracing::debug;

use crate::config::StorageConfig;
use crate::error::StorageResult;
use crate::storage::pool::ConnectionPool;

pub(crate) struct ShardRouter {
    config: StorageConfig,
    pool: ConnectionPool,
    current_origin: Option<u64>,
}

impl ShardRouter {
    pub(crate) fn new(config: StorageConfig) -> Self {
        let pool = ConnectionPool::new(config.connection_ttl());
        Self {
            config,
            pool,
            current_origin: None,
        }
    }

    /// Origin of the shard owning `block_num`.
    pub(crate) fn shard_origin(&self, block_num: u64) -> u64 {
        (block_num / self.config.blocks_per_shard) * self.config.blocks_per_shard
    }

    /// Origin of the currently bound shard, if any seek has happened.
    pub(crate) fn current_origin(&self) -> Option<u64> {
        self.current_origin
    }

    /// Binds the shard owning `block_num` and returns its connection.
    ///
    /// `cacheable = false` marks the pooled connection transient; scans
    /// that touch many shards use it so they do not flood the pool.
    pub(crate) fn seek(&mut self, block_num: u64, cacheable: bool) -> StorageResult<&Connection> {
        let origin = self.shard_origin(block_num);
        self.current_origin = Some(origin);
        let path = self.config.shard_path(origin);
        self.pool.open(&path, cacheable)
    }

    /// Finds the newest shard on disk and binds it.
    ///
    /// Probes origins `0, S, 2S, ...` for file existence and returns the
    /// last origin before the first gap, or `None` when even the origin-0
    /// file is absent. Files beyond a gap are deliberately ignored.
    pub(crate) fn seek_latest(&mut self) -> StorageResult<Option<u64>> {
        let step = self.config.blocks_per_shard;
        let mut latest = None;
        let mut origin = 0u64;
        while self.config.shard_path(origin).exists() {
            latest = Some(origin);
            origin += step;
        }
        if let Some(origin) = latest {
            debug!(origin, "latest shard discovered");
            self.seek(origin, true)?;
        }
        Ok(latest)
    }

    /// Path of the shard file owning `origin`.
    pub(crate) fn shard_file(&self, origin: u64) -> PathBuf {
        self.config.shard_path(origin)
    }

    /// Drops the active binding and closes every pooled connection.
    pub(crate) fn close_all(&mut self) {
        self.current_origin = None;
        self.pool.close_all();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn router(dir: &TempDir, blocks_per_shard: u64) -> ShardRouter {
        let mut config = StorageConfig::new(dir.path());
        config.blocks_per_shard = blocks_per_shard;
        fs::create_dir_all(config.shard_dir()).unwrap();
        ShardRouter::new(config)
    }

    #[test]
    fn origin_math() {
        let dir = TempDir::new().unwrap();
        let r = router(&dir, 10);
        assert_eq!(r.shard_origin(0), 0);
        assert_eq!(r.shard_origin(9), 0);
        assert_eq!(r.shard_origin(10), 10);
        assert_eq!(r.shard_origin(25), 20);
    }

    #[test]
    fn seek_creates_the_shard_file_lazily() {
        let dir = TempDir::new().unwrap();
        let mut r = router(&dir, 10);
        let path = r.shard_file(20);
        assert!(!path.exists());
        r.seek(25, true).unwrap();
        assert!(path.exists());
        assert_eq!(r.current_origin(), Some(20));
    }

    #[test]
    fn reseek_within_the_same_shard_keeps_the_binding() {
        let dir = TempDir::new().unwrap();
        let mut r = router(&dir, 10);
        r.seek(12, true).unwrap();
        r.seek(19, true).unwrap();
        assert_eq!(r.current_origin(), Some(10));
    }

    #[test]
    fn seek_latest_on_empty_dir_is_none() {
        let dir = TempDir::new().unwrap();
        let mut r = router(&dir, 10);
        assert_eq!(r.seek_latest().unwrap(), None);
        assert_eq!(r.current_origin(), None);
    }

    #[test]
    fn seek_latest_stops_at_the_first_gap() {
        let dir = TempDir::new().unwrap();
        let mut r = router(&dir, 10);
        for origin in [0u64, 10, 20] {
            fs::File::create(r.shard_file(origin)).unwrap();
        }
        // A stray file beyond the gap must not win.
        fs::File::create(r.shard_file(40)).unwrap();
        assert_eq!(r.seek_latest().unwrap(), Some(20));
        assert_eq!(r.current_origin(), Some(20));
    }
}
