// Path: crates/pipeline/src/lib.rs
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
//! The streaming execution pipeline.
//!
//! Transactions enter through bidirectional multiplexed streams, are sized
//! into adaptive batches, scheduled by strict priority with an
//! anti-starvation yield, optionally fanned out across shards, and
//! reassembled from chunked large transfers. Every downstream dependency is
//! wrapped in a circuit breaker; while a breaker is open, calls fail fast
//! with `Unavailable` and writes are never silently dropped.

/// Adaptive batch sizing from queue depth and smoothed latency.
pub mod batcher;
/// Circuit breakers for downstream dependencies.
pub mod breaker;
/// Large-transfer chunk reassembly.
pub mod chunks;
/// Multiplexed bidirectional batch streams.
pub mod multiplex;
/// Priority queues with per-class SLAs.
pub mod priority;
/// Shard fan-out aggregation.
pub mod shards;

pub use batcher::AdaptiveBatcher;
pub use breaker::{BreakerState, CircuitBreaker};
pub use chunks::{Chunk, ChunkReassembler, LargeTransferResponse};
pub use multiplex::{run_multiplex, BatchExecutor, MultiplexedBatch, MultiplexedResult};
pub use priority::{PriorityScheduler, SlaTracker};
pub use shards::{run_shard_aggregation, AggregatedShardResult, ShardExecutor};
