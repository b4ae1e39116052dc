//! # Write Admission
//!
//! The engine refuses to persist a block whose frozen signature set fails
//! verification, but it does not know how to verify one. The node wires a
//! [`SignatureFreezeVerifier`] in at construction; tests and tools that
//! replay already-validated data use [`AcceptAllFreezes`].

use crate::types::Block;

/// Admission check run before a block is written.
///
/// Called for every [`Storage::put_block`](crate::storage::Storage::put_block);
/// returning `false` rejects the write with
/// [`StorageError::ValidationFailed`](crate::error::StorageError::ValidationFailed).
/// Implementations must be cheap enough to sit on the write path and must
/// not call back into storage.
pub trait SignatureFreezeVerifier: Send + Sync {
    /// Returns whether the block's stored signature set is acceptable.
    fn verify_signature_freeze(&self, block: &Block) -> bool;
}

/// Verifier that admits every block. For replay tools and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAllFreezes;

impl SignatureFreezeVerifier for AcceptAllFreezes {
    fn verify_signature_freeze(&self, _block: &Block) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_all_admits_default_block() {
        assert!(AcceptAllFreezes.verify_signature_freeze(&Block::default()));
    }
}
