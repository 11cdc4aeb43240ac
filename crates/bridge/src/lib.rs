// Path: crates/bridge/src/lib.rs
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
//! The cross-chain bridge coordinator.
//!
//! Each transfer is a small state machine: `PENDING -> VERIFIED -> EXECUTED`
//! on oracle quorum, or `PENDING -> TIMED_OUT -> REFUNDED` when the deadline
//! passes (or rejections reach threshold) first. A transfer is never both
//! executed and refunded. Writes are serialized per transfer through a
//! sharded store; reads are snapshot-consistent clones.

/// The coordinator and its background sweep.
pub mod coordinator;

pub use coordinator::{
    BatchInitiateOutcome, BatchInitiateResponse, BridgeCoordinator, BridgeEvent,
    NopRefundExecutor, RefundExecutor, MAX_BATCH_INITIATE,
};
