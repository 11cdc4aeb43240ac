// Path: crates/api/src/lib.rs
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
//! Port traits for the HyperRAFT++ core.
//!
//! The core consumes cryptography, durable log storage and peer transport
//! exclusively through the traits defined here; concrete adapters live in
//! sibling crates and external deployments. The state-machine and
//! cluster-config ports break the consensus ↔ state-machine reference cycle:
//! consensus pushes committed blocks through [`machine::StateMachine`], the
//! machine publishes membership through [`machine::ClusterConfigView`], and
//! the top-level node supervisor owns both.

/// The crypto port: sign, verify, hash, aggregate-verify.
pub mod crypto;
/// The append-only log store port.
pub mod log;
/// The state machine apply port and cluster-config view.
pub mod machine;
/// The peer transport port.
pub mod transport;

pub use crypto::CryptoProvider;
pub use log::LogStore;
pub use machine::{ApplyOutcome, ClusterConfigView, StateMachine};
pub use transport::{Envelope, PeerStream, Topic, Transport};
