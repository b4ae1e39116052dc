//! # Storage Configuration
//!
//! Every tunable of the engine lives here. The node deserializes
//! [`StorageConfig`] from its config file and hands it to
//! [`Storage::open`](crate::storage::Storage::open); the constants below
//! are the parts of the on-disk contract that are *not* negotiable once a
//! data directory exists (file naming, extension, idle TTL).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

// ---------------------------------------------------------------------------
// On-disk layout constants
// ---------------------------------------------------------------------------

/// Subdirectory of the data root that holds one file per shard.
pub const SHARD_DIR: &str = "shards";

/// Extension shared by every storage file. Sidecar files append `-wal`
/// and `-shm` to this.
pub const STORAGE_EXTENSION: &str = "dat";

/// The single, non-sharded checkpoint partition.
pub const SUPERBLOCK_FILE: &str = "superblocks.dat";

/// Default number of blocks per shard file.
///
/// 1000 blocks keeps individual files small enough that a fallback scan
/// over a few shards is tolerable while avoiding a directory with tens of
/// thousands of entries on a mature chain.
pub const DEFAULT_BLOCKS_PER_SHARD: u64 = 1_000;

/// How long an unused pooled connection survives before the next cache
/// touch closes it.
pub const DEFAULT_CONNECTION_TTL_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// StorageConfig
// ---------------------------------------------------------------------------

/// Runtime configuration for one storage engine instance.
///
/// A single process must own `data_dir` exclusively; two engines (or two
/// processes) pointed at the same directory are undefined behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root of the node's block storage. Created on open if absent.
    pub data_dir: PathBuf,

    /// Shard size `S`: shard `k` owns block numbers `[k*S, (k+1)*S)`.
    /// Must be at least 1; [`Storage::open`](crate::storage::Storage::open)
    /// rejects 0. Changing this on an existing data directory scrambles
    /// the mapping from block number to file, so treat it as write-once
    /// per deploy.
    #[serde(default = "default_blocks_per_shard")]
    pub blocks_per_shard: u64,

    /// When true the node retains full history and `remove_block`
    /// refuses to run. Pruning nodes set this to false.
    #[serde(default = "default_keep_full_history")]
    pub keep_full_history: bool,

    /// Idle TTL for pooled shard connections, in seconds.
    #[serde(default = "default_connection_ttl_secs")]
    pub connection_ttl_secs: u64,
}

fn default_blocks_per_shard() -> u64 {
    DEFAULT_BLOCKS_PER_SHARD
}

fn default_keep_full_history() -> bool {
    true
}

fn default_connection_ttl_secs() -> u64 {
    DEFAULT_CONNECTION_TTL_SECS
}

impl StorageConfig {
    /// Configuration with defaults for everything except the data root.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            blocks_per_shard: DEFAULT_BLOCKS_PER_SHARD,
            keep_full_history: true,
            connection_ttl_secs: DEFAULT_CONNECTION_TTL_SECS,
        }
    }

    /// Directory holding the per-shard files.
    pub fn shard_dir(&self) -> PathBuf {
        self.data_dir.join(SHARD_DIR)
    }

    /// Path of the shard file owning `origin` (a multiple of
    /// `blocks_per_shard`).
    pub fn shard_path(&self, origin: u64) -> PathBuf {
        self.shard_dir()
            .join(format!("{origin}.{STORAGE_EXTENSION}"))
    }

    /// Path of the superblock partition.
    pub fn superblock_path(&self) -> PathBuf {
        self.data_dir.join(SUPERBLOCK_FILE)
    }

    /// Idle TTL as a [`Duration`].
    pub fn connection_ttl(&self) -> Duration {
        Duration::from_secs(self.connection_ttl_secs)
    }
}

/// True when `path` looks like a WAL sidecar (`*-wal` / `*-shm`) rather
/// than a storage file proper.
pub(crate) fn is_wal_sidecar(path: &Path) -> bool {
    path.to_str()
        .map(|p| p.ends_with("-wal") || p.ends_with("-shm"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_paths_use_origin_and_extension() {
        let cfg = StorageConfig::new("/tmp/helix");
        assert_eq!(
            cfg.shard_path(5000),
            PathBuf::from("/tmp/helix/shards/5000.dat")
        );
        assert_eq!(
            cfg.superblock_path(),
            PathBuf::from("/tmp/helix/superblocks.dat")
        );
    }

    #[test]
    fn defaults_retain_history() {
        let cfg = StorageConfig::new("/tmp/helix");
        assert!(cfg.keep_full_history);
        assert_eq!(cfg.blocks_per_shard, DEFAULT_BLOCKS_PER_SHARD);
        assert_eq!(cfg.connection_ttl(), Duration::from_secs(60));
    }

    #[test]
    fn deserializes_with_partial_fields() {
        let cfg: StorageConfig =
            serde_json::from_str(r#"{"data_dir": "/data/blocks", "keep_full_history": false}"#)
                .unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/data/blocks"));
        assert!(!cfg.keep_full_history);
        assert_eq!(cfg.blocks_per_shard, DEFAULT_BLOCKS_PER_SHARD);
    }

    #[test]
    fn sidecar_detection() {
        assert!(is_wal_sidecar(Path::new("/x/0.dat-wal")));
        assert!(is_wal_sidecar(Path::new("/x/0.dat-shm")));
        assert!(!is_wal_sidecar(Path::new("/x/0.dat")));
    }
}
