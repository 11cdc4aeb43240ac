// Path: crates/telemetry/src/sinks.rs
//! Defines abstract traits for metrics reporting, decoupling core logic from the backend.

use once_cell::sync::OnceCell;

// --- Static Sink Access ---

/// A no-op sink for use in tests or when telemetry is disabled.
#[derive(Debug, Clone, Copy)]
pub struct NopSink;

/// A lazily-initialized static reference to the global `MetricsSink` implementation.
pub static SINK: OnceCell<&'static dyn MetricsSink> = OnceCell::new();
static NOP_SINK: NopSink = NopSink;

/// Returns a static reference to the configured consensus metrics sink.
/// If no sink has been initialized, it returns a no-op sink.
pub fn consensus_metrics() -> &'static dyn ConsensusMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns a static reference to the configured mempool metrics sink.
pub fn mempool_metrics() -> &'static dyn MempoolMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns a static reference to the configured pipeline metrics sink.
pub fn pipeline_metrics() -> &'static dyn PipelineMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns a static reference to the configured bridge metrics sink.
pub fn bridge_metrics() -> &'static dyn BridgeMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns a static reference to the configured error metrics sink.
pub fn error_metrics() -> &'static dyn ErrorMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

// --- Trait Definitions ---

/// A sink for metrics related to the consensus engine.
pub trait ConsensusMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments the counter for blocks proposed by this node.
    fn inc_blocks_proposed(&self);
    /// Increments the counter for blocks committed cluster-wide as seen here.
    fn inc_blocks_committed(&self);
    /// Increments the counter for elections this node started.
    fn inc_elections_started(&self);
    /// Increments the counter for equivocation proofs surfaced.
    fn inc_equivocations_detected(&self);
    /// Sets the gauge for the node's current term.
    fn set_current_term(&self, term: u64);
    /// Sets the gauge for the node's commit index.
    fn set_commit_index(&self, height: u64);
    /// Sets the gauge vector for the node's role (leader/candidate/follower).
    fn set_role(&self, role_name: &str);
    /// Observes the duration of a single consensus tick.
    fn observe_tick_duration(&self, duration_secs: f64);
}
impl ConsensusMetricsSink for NopSink {
    fn inc_blocks_proposed(&self) {}
    fn inc_blocks_committed(&self) {}
    fn inc_elections_started(&self) {}
    fn inc_equivocations_detected(&self) {}
    fn set_current_term(&self, _term: u64) {}
    fn set_commit_index(&self, _height: u64) {}
    fn set_role(&self, _role_name: &str) {}
    fn observe_tick_duration(&self, _duration_secs: f64) {}
}

/// A sink for metrics related to the mempool.
pub trait MempoolMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments the counter for admitted transactions.
    fn inc_admitted(&self);
    /// Increments a counter for rejected admissions, labeled by reason.
    fn inc_rejected(&self, reason: &'static str);
    /// Sets the gauge for the current pool size.
    fn set_pool_size(&self, size: f64);
    /// Increments the counter for transactions evicted by commit or TTL.
    fn inc_evicted(&self, count: u64);
}
impl MempoolMetricsSink for NopSink {
    fn inc_admitted(&self) {}
    fn inc_rejected(&self, _reason: &'static str) {}
    fn set_pool_size(&self, _size: f64) {}
    fn inc_evicted(&self, _count: u64) {}
}

/// A sink for metrics related to the streaming pipeline and its breakers.
pub trait PipelineMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments the counter for completed batches.
    fn inc_batches_completed(&self);
    /// Observes the size chosen by the adaptive batcher.
    fn observe_batch_size(&self, size: f64);
    /// Observes a batch's service time in seconds.
    fn observe_batch_service_time(&self, duration_secs: f64);
    /// Observes one item's end-to-end latency, labeled by priority class.
    fn observe_class_latency(&self, class: &'static str, duration_secs: f64);
    /// Increments the SLA-miss counter for a priority class.
    fn inc_sla_miss(&self, class: &'static str);
    /// Increments a breaker state-transition counter, labeled by dependency
    /// and new state.
    fn inc_breaker_transition(&self, dependency: &'static str, state: &'static str);
}
impl PipelineMetricsSink for NopSink {
    fn inc_batches_completed(&self) {}
    fn observe_batch_size(&self, _size: f64) {}
    fn observe_batch_service_time(&self, _duration_secs: f64) {}
    fn observe_class_latency(&self, _class: &'static str, _duration_secs: f64) {}
    fn inc_sla_miss(&self, _class: &'static str) {}
    fn inc_breaker_transition(&self, _dependency: &'static str, _state: &'static str) {}
}

/// A sink for metrics related to the bridge coordinator.
pub trait BridgeMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments a counter for transfers entering a lifecycle state.
    fn inc_transfer_state(&self, state: &'static str);
    /// Increments the counter for oracle verifications recorded.
    fn inc_verifications(&self);
    /// Sets the gauge for transfers currently pending.
    fn set_pending_transfers(&self, count: f64);
}
impl BridgeMetricsSink for NopSink {
    fn inc_transfer_state(&self, _state: &'static str) {}
    fn inc_verifications(&self) {}
    fn set_pending_transfers(&self, _count: f64) {}
}

/// A sink for recording structured error metrics.
pub trait ErrorMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments a counter for a specific error, categorized by its kind and stable code.
    fn inc_error(&self, kind: &'static str, code: &'static str);
}
impl ErrorMetricsSink for NopSink {
    fn inc_error(&self, _kind: &'static str, _code: &'static str) {}
}

/// A unified sink that implements all domain-specific traits, providing a single
/// point of implementation for metrics backends like Prometheus.
pub trait MetricsSink:
    ConsensusMetricsSink
    + MempoolMetricsSink
    + PipelineMetricsSink
    + BridgeMetricsSink
    + ErrorMetricsSink
{
}

// Blanket implementation to allow any type that implements all sub-traits
// to be used as a `MetricsSink`.
impl<T> MetricsSink for T where
    T: ConsensusMetricsSink
        + MempoolMetricsSink
        + PipelineMetricsSink
        + BridgeMetricsSink
        + ErrorMetricsSink
{
}
