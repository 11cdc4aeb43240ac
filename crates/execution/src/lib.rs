// Path: crates/execution/src/lib.rs
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
//! Deterministic execution of committed entries.
//!
//! The machine applies blocks in strict committed-height order, producing
//! one receipt per transaction and chaining the state hash as
//! `hash(prev ‖ hash_each(receipts))`. Membership changes and slashing are
//! committed entries applied here; the resulting configuration is exposed
//! back to consensus through the [`hyperraft_api::ClusterConfigView`] port.

/// The ledger state machine.
pub mod machine;

pub use machine::LedgerStateMachine;
