// Path: crates/telemetry/src/lib.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! # HyperRAFT++ Telemetry
//!
//! Observability infrastructure for the node: structured logging
//! initialization, a Prometheus metrics endpoint, health reporting, and
//! abstract sinks decoupling metric instrumentation from the backend. The
//! sink registry is the process's only global mutable state.

/// Health report types and aggregation.
pub mod health;
/// A lightweight HTTP server exposing `/metrics`, `/healthz` and `/readyz`.
pub mod http;
/// The initialization routine for global structured logging.
pub mod init;
/// The concrete implementation of metrics sinks using the `prometheus` crate.
pub mod prometheus;
/// Abstract traits (`*MetricsSink`) that define the contract for metrics reporting.
pub mod sinks;
/// A simple RAII timer for measuring the duration of a scope.
pub mod time;

pub use sinks::{
    bridge_metrics, consensus_metrics, error_metrics, mempool_metrics, pipeline_metrics,
};
