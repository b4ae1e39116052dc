//! # Engine Facade
//!
//! [`Storage`] is the single handle the rest of the node holds. It owns
//! two independently locked domains:
//!
//! - the **shard domain**: the router, its connection pool, and the
//!   cached highest block height;
//! - the **superblock domain**: the one long-lived connection to the
//!   non-sharded checkpoint partition.
//!
//! The two domains never nest. A public method locks its domain exactly
//! once and hands the guard to internal helpers, so no call path can
//! re-acquire a lock it already holds. `put_block` for a superblock takes
//! the superblock lock first, releases it, then takes the shard lock.
//!
//! Read methods are soft: any underlying failure is logged with the row
//! key and surfaces as `None`. Write methods are hard and return
//! [`StorageResult`].

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::config::{is_wal_sidecar, StorageConfig};
use crate::error::{StorageError, StorageResult};
use crate::storage::pool;
use crate::storage::router::ShardRouter;
use crate::types::{Block, Transaction};
use crate::verify::SignatureFreezeVerifier;

// ---------------------------------------------------------------------------
// Domains
// ---------------------------------------------------------------------------

/// Everything serialized by the shard lock.
pub(crate) struct ShardDomain {
    pub(crate) router: ShardRouter,
    /// Highest block height known to be on disk. `None` means the cache
    /// is cold and must be recomputed from the newest shard.
    pub(crate) highest_block: Option<u64>,
}

/// Everything serialized by the superblock lock.
pub(crate) struct SuperblockDomain {
    path: PathBuf,
    conn: Option<Connection>,
}

impl SuperblockDomain {
    /// The partition connection, reopened if it was dropped by
    /// [`Storage::delete_all_data`].
    pub(crate) fn conn(&mut self) -> StorageResult<&Connection> {
        if self.conn.is_none() {
            self.conn = Some(pool::open_storage_file(&self.path)?);
        }
        match &self.conn {
            Some(conn) => Ok(conn),
            None => unreachable!("connection populated above"),
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// The node's persistent block and transaction store.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct Storage {
    pub(crate) config: StorageConfig,
    pub(crate) verifier: Arc<dyn SignatureFreezeVerifier>,
    pub(crate) shards: Mutex<ShardDomain>,
    pub(crate) superblocks: Mutex<SuperblockDomain>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Storage {
    /// Opens (or creates) the storage rooted at `config.data_dir`.
    ///
    /// Startup hygiene: stale WAL sidecars left by an unclean shutdown
    /// are purged before any connection opens, the superblock partition
    /// is opened eagerly, and the highest stored block is discovered and
    /// logged.
    pub fn open(
        config: StorageConfig,
        verifier: Arc<dyn SignatureFreezeVerifier>,
    ) -> StorageResult<Self> {
        if config.blocks_per_shard == 0 {
            return Err(StorageError::InvalidConfig(
                "blocks_per_shard must be at least 1",
            ));
        }
        fs::create_dir_all(config.shard_dir())?;
        purge_stale_sidecars(&config)?;

        let superblock_path = config.superblock_path();
        let superblock_conn = pool::open_storage_file(&superblock_path)?;

        let storage = Self {
            shards: Mutex::new(ShardDomain {
                router: ShardRouter::new(config.clone()),
                highest_block: None,
            }),
            superblocks: Mutex::new(SuperblockDomain {
                path: superblock_path,
                conn: Some(superblock_conn),
            }),
            config,
            verifier,
        };

        {
            let mut shards = storage.shards.lock();
            let highest = storage.compute_highest_locked(&mut shards)?;
            shards.highest_block = highest;
            match highest {
                Some(h) => info!(highest_block = h, "storage opened"),
                None => info!("storage opened, no blocks on disk"),
            }
        }

        Ok(storage)
    }

    /// Highest block height on disk, or 0 when storage is empty.
    ///
    /// Served from cache once warm; a cold cache triggers shard
    /// discovery. Failures are logged and reported as 0.
    pub fn highest_block_in_storage(&self) -> u64 {
        let mut shards = self.shards.lock();
        if let Some(h) = shards.highest_block {
            return h;
        }
        match self.compute_highest_locked(&mut shards) {
            Ok(highest) => {
                shards.highest_block = highest;
                highest.unwrap_or(0)
            }
            Err(err) => {
                warn!(error = %err, "failed to determine highest stored block");
                0
            }
        }
    }

    /// Seeks to the newest shard and reads its top row.
    pub(crate) fn compute_highest_locked(
        &self,
        shards: &mut ShardDomain,
    ) -> StorageResult<Option<u64>> {
        use rusqlite::OptionalExtension;
        let Some(origin) = shards.router.seek_latest()? else {
            return Ok(None);
        };
        let conn = shards.router.seek(origin, true)?;
        let highest: Option<u64> = conn
            .query_row(
                "SELECT blockNum FROM blocks ORDER BY blockNum DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        // A shard file can hold transactions before its first block row
        // lands. The shard origin still bounds the chain, and losing it
        // would blind every descending fallback scan.
        Ok(Some(highest.unwrap_or(origin)))
    }

    /// Removes every storage file: all shards, the superblock partition,
    /// and their WAL sidecars. The engine stays usable afterwards and
    /// will recreate files on the next write.
    pub fn delete_all_data(&self) -> StorageResult<()> {
        let mut shards = self.shards.lock();
        let mut superblocks = self.superblocks.lock();

        shards.router.close_all();
        shards.highest_block = None;
        if let Some(conn) = superblocks.conn.take() {
            pool::close_connection(&superblocks.path, conn);
        }

        for entry in fs::read_dir(self.config.shard_dir())? {
            let path = entry?.path();
            if path.is_file() {
                fs::remove_file(&path)?;
            }
        }
        remove_with_sidecars(&superblocks.path)?;

        info!(data_dir = %self.config.data_dir.display(), "all storage data deleted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Range queries (declared, deferred)
// ---------------------------------------------------------------------------

/// Contract for the range endpoints below: results are ordered ascending
/// by primary key (height for blocks, id for transactions) and shard
/// boundaries are invisible to the caller. None are implemented yet; the
/// node's explorer API is the only consumer and it is not built.
impl Storage {
    /// Blocks with heights in `[from, to]`.
    pub fn blocks_by_range(&self, _from: u64, _to: u64) -> StorageResult<Vec<Block>> {
        Err(StorageError::Unimplemented("blocks_by_range"))
    }

    /// Transactions applied by the block at `block_num`.
    pub fn transactions_in_block(&self, _block_num: u64) -> StorageResult<Vec<Transaction>> {
        Err(StorageError::Unimplemented("transactions_in_block"))
    }

    /// Transactions with the given type tag, bounded by applied height.
    pub fn transactions_by_type(
        &self,
        _tx_type: i32,
        _from: u64,
        _to: u64,
    ) -> StorageResult<Vec<Transaction>> {
        Err(StorageError::Unimplemented("transactions_by_type"))
    }

    /// Transactions spending from `address`, bounded by applied height.
    pub fn transactions_from(
        &self,
        _address: &[u8],
        _from: u64,
        _to: u64,
    ) -> StorageResult<Vec<Transaction>> {
        Err(StorageError::Unimplemented("transactions_from"))
    }

    /// Transactions paying to `address`, bounded by applied height.
    pub fn transactions_to(
        &self,
        _address: &[u8],
        _from: u64,
        _to: u64,
    ) -> StorageResult<Vec<Transaction>> {
        Err(StorageError::Unimplemented("transactions_to"))
    }

    /// Transactions with timestamps in `[from_ts, to_ts]`.
    pub fn transactions_by_time(
        &self,
        _from_ts: i64,
        _to_ts: i64,
    ) -> StorageResult<Vec<Transaction>> {
        Err(StorageError::Unimplemented("transactions_by_time"))
    }

    /// Transactions applied at heights in `[from, to]`.
    pub fn transactions_by_applied(&self, _from: u64, _to: u64) -> StorageResult<Vec<Transaction>> {
        Err(StorageError::Unimplemented("transactions_by_applied"))
    }

    /// Lowest block height still on disk. Pruning bookkeeping, deferred
    /// with the range endpoints.
    pub fn lowest_block_in_storage(&self) -> StorageResult<u64> {
        Err(StorageError::Unimplemented("lowest_block_in_storage"))
    }
}

// ---------------------------------------------------------------------------
// Startup hygiene
// ---------------------------------------------------------------------------

/// Deletes `*-wal` / `*-shm` files in the shard directory. Run before
/// any connection opens, so every sidecar found is an orphan from an
/// unclean shutdown; SQLite rebuilds what it needs.
fn purge_stale_sidecars(config: &StorageConfig) -> StorageResult<()> {
    for entry in fs::read_dir(config.shard_dir())? {
        let path = entry?.path();
        if path.is_file() && is_wal_sidecar(&path) {
            warn!(path = %path.display(), "purging stale WAL sidecar");
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Removes a storage file together with its WAL sidecars, ignoring
/// whichever of the three does not exist.
fn remove_with_sidecars(path: &std::path::Path) -> StorageResult<()> {
    for candidate in [
        path.to_path_buf(),
        sidecar(path, "-wal"),
        sidecar(path, "-shm"),
    ] {
        match fs::remove_file(&candidate) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn sidecar(path: &std::path::Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::AcceptAllFreezes;
    use tempfile::TempDir;

    fn open_storage(dir: &TempDir) -> Storage {
        let config = StorageConfig::new(dir.path());
        Storage::open(config, Arc::new(AcceptAllFreezes)).unwrap()
    }

    #[test]
    fn open_creates_layout_and_superblock_partition() {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(&dir);
        assert!(dir.path().join("shards").is_dir());
        assert!(dir.path().join("superblocks.dat").is_file());
        assert_eq!(storage.highest_block_in_storage(), 0);
    }

    #[test]
    fn open_purges_stale_sidecars() {
        let dir = TempDir::new().unwrap();
        let shard_dir = dir.path().join("shards");
        fs::create_dir_all(&shard_dir).unwrap();
        let stale = shard_dir.join("0.dat-wal");
        fs::File::create(&stale).unwrap();
        open_storage(&dir);
        assert!(!stale.exists());
    }

    #[test]
    fn delete_all_data_leaves_a_reusable_engine() {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(&dir);
        storage.delete_all_data().unwrap();
        assert!(!dir.path().join("superblocks.dat").exists());
        assert_eq!(storage.highest_block_in_storage(), 0);
    }

    #[test]
    fn range_endpoints_are_declared_but_deferred() {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(&dir);
        assert!(matches!(
            storage.blocks_by_range(0, 10),
            Err(StorageError::Unimplemented(_))
        ));
        assert!(matches!(
            storage.transactions_in_block(5),
            Err(StorageError::Unimplemented(_))
        ));
        assert!(matches!(
            storage.transactions_by_applied(0, 10),
            Err(StorageError::Unimplemented(_))
        ));
        assert!(matches!(
            storage.lowest_block_in_storage(),
            Err(StorageError::Unimplemented(_))
        ));
    }

    #[test]
    fn zero_blocks_per_shard_is_rejected_at_open() {
        let dir = TempDir::new().unwrap();
        let mut config = StorageConfig::new(dir.path());
        config.blocks_per_shard = 0;
        let err = Storage::open(config, Arc::new(AcceptAllFreezes)).unwrap_err();
        assert!(matches!(err, StorageError::InvalidConfig(_)));
        // Nothing was created for the bad config.
        assert!(!dir.path().join("shards").exists());
    }

    #[test]
    fn blockless_newest_shard_still_bounds_discovery() {
        use crate::types::{Block, Transaction};

        let dir = TempDir::new().unwrap();
        let mut config = StorageConfig::new(dir.path());
        config.blocks_per_shard = 10;
        let wanted;
        {
            let storage =
                Storage::open(config.clone(), Arc::new(AcceptAllFreezes)).unwrap();
            for n in 0..5u64 {
                let block = Block {
                    block_num: n,
                    checksum: vec![n as u8; 32],
                    ..Block::default()
                };
                storage.put_block(&block).unwrap();
            }
            wanted = vec![2u8; 32];
            // A transaction lands in shard 10 before any block does.
            let tx = Transaction {
                id: "tx-early".to_string(),
                applied: 15,
                ..Transaction::default()
            };
            storage.put_transaction(&tx).unwrap();
        }

        let storage = Storage::open(config, Arc::new(AcceptAllFreezes)).unwrap();
        // The newest shard's origin bounds the chain even without rows.
        assert_eq!(storage.highest_block_in_storage(), 10);
        // And the descending fallback scans still reach the real data.
        assert_eq!(storage.get_block_by_hash(&wanted).unwrap().block_num, 2);
        assert_eq!(storage.get_transaction("tx-early", 0).unwrap().applied, 15);
    }
}
