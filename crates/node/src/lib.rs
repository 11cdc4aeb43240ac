// Path: crates/node/src/lib.rs
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
//! The node supervisor.
//!
//! Owns every subsystem (consensus loop, state machine, mempool,
//! streaming pipeline, bridge coordinator, telemetry) and exposes the
//! adapter ports: transaction submission with receipt streams, the
//! pipeline stream entry points, the bridge operations, and `health()`.
//! Port bindings are fixed at startup and immutable thereafter.

/// The node itself.
pub mod node;
/// Pipeline stream endpoints.
pub mod streams;

pub use node::{Node, NodeParams};
pub use streams::PriorityResult;
