// Path: crates/crypto/src/lib.rs
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
//! Ed25519 signing suite for the crypto port.
//!
//! An identity handle is the validator's raw 32-byte Ed25519 verifying key,
//! so verification needs no key directory. Hashing is SHA-256.

/// SHA-256 digest helpers.
pub mod hash;
/// The Ed25519 [`hyperraft_api::CryptoProvider`] implementation.
pub mod sign;

pub use sign::Ed25519Provider;
