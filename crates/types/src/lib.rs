// Path: crates/types/src/lib.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing
    )
)]
//! Core data structures and error types for the HyperRAFT++ node.

/// Bridge transfer records and oracle verification state.
pub mod bridge;
/// Canonical, deterministic binary codec for consensus-critical state.
pub mod codec;
/// Node configuration structures.
pub mod config;
/// Core error types with stable, machine-readable codes.
pub mod error;
/// Block, log entry and vote records.
pub mod ledger;
/// Transaction, batch and receipt records.
pub mod tx;
/// Validator records and the versioned cluster configuration.
pub mod validator;

/// A 32-byte digest. All hashes in the system are this width.
pub type Digest = [u8; 32];

/// The all-zero digest, used as `prev_hash` of the block at height 1.
pub const ZERO_DIGEST: Digest = [0u8; 32];

use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// The stable, unique identifier of an account or validator.
///
/// Derived from key material by the crypto provider; opaque to the core.
#[derive(
    Encode, Decode, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct AccountId(pub [u8; 32]);

impl AccountId {
    /// Renders the first four bytes as hex for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl AsRef<[u8]> for AccountId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}
