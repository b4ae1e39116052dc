//! # Error Taxonomy
//!
//! Two distinct error channels run through this crate and are never
//! unified:
//!
//! - **Soft read path.** Lookups (`get_block`, `get_transaction`, ...)
//!   return `Option<T>`. Underlying SQL failures are logged with the
//!   offending row key and downgraded to `None` so that a storage hiccup
//!   degrades to "missing data" instead of crashing consensus.
//! - **Hard write path.** Mutations return `Result<T, StorageError>`.
//!   Schema-bootstrap failures are fatal: the half-created shard file is
//!   deleted before the error propagates, so a retry starts from a clean
//!   slate.
//!
//! [`CodecError`] covers the pure encoding layer and carries enough
//! context to identify the malformed stored value; the storage layer
//! wraps it with the row key via [`StorageError::Encoding`].

use std::path::PathBuf;

// ---------------------------------------------------------------------------
// CodecError
// ---------------------------------------------------------------------------

/// Failure while decoding a stored column value.
///
/// Decode functions are total: malformed input produces one of these
/// variants, never a panic. The `entry` fields quote the offending
/// segment so the storage layer can log it next to the row key.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A delimited list entry was missing its `:` separator.
    #[error("malformed list entry `{entry}`: missing `:` separator")]
    MalformedEntry {
        /// The offending segment, verbatim.
        entry: String,
    },

    /// A segment that should be base64 was not.
    #[error("invalid base64 in `{entry}`: {source}")]
    Base64 {
        /// The offending segment, verbatim.
        entry: String,
        /// The underlying decode failure.
        source: base64::DecodeError,
    },

    /// An address segment that should be base58 was not.
    #[error("invalid base58 address in `{entry}`")]
    Base58 {
        /// The offending segment, verbatim.
        entry: String,
    },

    /// An encoded amount was wider than 256 bits.
    #[error("amount of {len} bytes exceeds 256 bits")]
    AmountOverflow {
        /// Byte length of the rejected amount.
        len: usize,
    },

    /// An amount column that should hold a decimal string did not parse.
    #[error("invalid decimal amount `{entry}`")]
    Decimal {
        /// The offending column value, verbatim.
        entry: String,
    },

    /// A superblock segment blob ended mid-record. Truncation here means
    /// the stored row is corrupt; there is no partial recovery.
    #[error("truncated superblock segment blob: need {needed} bytes at offset {offset}, have {len}")]
    TruncatedSegments {
        /// Offset of the record that could not be read.
        offset: usize,
        /// Bytes required to finish the record.
        needed: usize,
        /// Total length of the blob.
        len: usize,
    },
}

// ---------------------------------------------------------------------------
// StorageError
// ---------------------------------------------------------------------------

/// Errors surfaced by the storage engine's write paths.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The consensus collaborator rejected the block's signature freeze.
    /// Nothing was written.
    #[error("signature freeze validation failed for block #{0}")]
    ValidationFailed(u64),

    /// First-time schema creation failed. The partially-created file has
    /// been deleted; the caller must retry with a clean slate.
    #[error("schema bootstrap failed for `{path}`: {source}")]
    SchemaCorruption {
        /// The shard or superblock file that was being created.
        path: PathBuf,
        /// The underlying SQLite failure.
        source: rusqlite::Error,
    },

    /// A stored row decoded to garbage. The process keeps running; the
    /// key identifies the row for the operator.
    #[error("malformed stored data for `{key}`: {source}")]
    Encoding {
        /// Row key (block number or transaction id) of the bad row.
        key: String,
        /// The codec failure.
        source: CodecError,
    },

    /// The underlying file is locked by another handle. The pool retries
    /// eviction once after dropping dangling handles; if it still fails,
    /// this propagates.
    #[error("storage file busy: {0}")]
    Busy(rusqlite::Error),

    /// Any other SQLite failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Filesystem-level failure (shard deletion, sidecar purge, ...).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration value that would corrupt the shard layout was
    /// rejected before any file was touched.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// A declared-but-deferred endpoint was called.
    #[error("`{0}` is not implemented")]
    Unimplemented(&'static str),
}

/// Convenience alias used across the crate.
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Wraps a codec failure with the row key it was found under.
    pub(crate) fn encoding(key: impl Into<String>, source: CodecError) -> Self {
        Self::Encoding {
            key: key.into(),
            source,
        }
    }

    /// True when the underlying SQLite error is lock contention.
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Busy(_) => true,
            Self::Database(e) => is_busy_error(e),
            _ => false,
        }
    }
}

/// Classifies an SQLite error as busy/locked contention.
pub(crate) fn is_busy_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}
