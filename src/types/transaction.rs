//! # Transaction Record
//!
//! A transaction as the storage engine sees it. Amounts are [`U256`]
//! values: in column form `amount` and `fee` are decimal strings, while
//! the per-address amounts inside `to_list` / `from_list` travel as
//! base64-wrapped minimal little-endian bytes (see [`crate::codec`]).
//!
//! `applied` is the block height at which the transaction took effect; it
//! determines the owning shard and, once set, only changes when a chain
//! reorganization legitimately re-applies the transaction. `block_height`
//! is the height at which the transaction was *created* and is carried
//! for expiry accounting.

use std::collections::BTreeMap;

use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// A transaction row. Keyed by the opaque string `id`, which is unique
/// network-wide.
///
/// Invariant: `to_list` and `from_list` are non-empty for any applied
/// transaction. A legacy on-disk single-sender form exists (see
/// [`crate::storage::Storage::get_transaction`]); it is synthesized into
/// `from_list` on decode and never written back out.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Opaque unique transaction id.
    pub id: String,
    /// Type tag (transfer, PoW solution, staking, ...). Opaque here.
    pub tx_type: i32,
    /// Total amount moved.
    pub amount: U256,
    /// Fee paid to the network.
    pub fee: U256,
    /// Ordered destination address to amount mapping.
    pub to_list: BTreeMap<Vec<u8>, U256>,
    /// Ordered source address to amount mapping.
    pub from_list: BTreeMap<Vec<u8>, U256>,
    /// Raw payload bytes (in memory always in original order; the
    /// storage-order transform applies only at the column boundary).
    pub data: Vec<u8>,
    /// Checksum of the original, untransformed payload.
    pub data_checksum: Option<Vec<u8>>,
    /// Block height at which the transaction was created.
    pub block_height: u64,
    /// Sender nonce.
    pub nonce: i32,
    /// Unix timestamp of creation.
    pub timestamp: i64,
    /// Checksum over the whole transaction.
    pub checksum: Option<Vec<u8>>,
    /// Signature bytes.
    pub signature: Option<Vec<u8>>,
    /// Signer public key.
    pub pub_key: Option<Vec<u8>>,
    /// Block height at which the transaction was applied. Identifies the
    /// owning shard; 0 means "not yet applied / unknown".
    pub applied: u64,
    /// Transaction schema version.
    pub version: i32,
}

impl Transaction {
    /// The sentinel source address used when decoding the legacy
    /// single-sender representation: a single zero byte.
    pub const LEGACY_SENDER: [u8; 1] = [0];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_unapplied() {
        let tx = Transaction::default();
        assert_eq!(tx.applied, 0);
        assert!(tx.to_list.is_empty());
        assert_eq!(tx.amount, U256::zero());
    }
}
