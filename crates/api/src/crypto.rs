// Path: crates/api/src/crypto.rs

//! The crypto port. Stateless; `hash` is deterministic.

use hyperraft_types::error::CryptoError;
use hyperraft_types::{AccountId, Digest};

/// Cryptographic operations consumed by the core.
///
/// Signature and key formats are opaque at this boundary. Implementations
/// must be cheap to share across tasks.
pub trait CryptoProvider: Send + Sync {
    /// The identity this provider signs as.
    fn local_id(&self) -> AccountId;

    /// Signs `msg` under the local identity.
    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Verifies `sig` over `msg` under `id`. Fails with
    /// [`CryptoError::InvalidSignature`] on mismatch.
    fn verify(&self, id: &AccountId, msg: &[u8], sig: &[u8]) -> Result<(), CryptoError>;

    /// Deterministic 32-byte digest of `bytes`.
    fn hash(&self, bytes: &[u8]) -> Digest;

    /// Verifies one signature per id over a shared message. Fails if the
    /// lists differ in length or any constituent signature is invalid.
    fn aggregate_verify(
        &self,
        ids: &[AccountId],
        msg: &[u8],
        sigs: &[Vec<u8>],
    ) -> Result<(), CryptoError>;
}
