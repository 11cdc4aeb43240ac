// Path: crates/crypto/src/hash.rs

//! SHA-256 digest helpers.

use hyperraft_types::Digest;
use sha2::{Digest as _, Sha256};

/// Computes the SHA-256 digest of `bytes`.
pub fn sha256(bytes: &[u8]) -> Digest {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(bytes));
    out
}
