// Path: crates/telemetry/src/prometheus.rs
// A missing collector here is a startup wiring bug; panicking beats
// silently dropping metrics.
#![allow(clippy::expect_used)]
//! A concrete implementation of the metrics sinks using the Prometheus crate.

use crate::sinks::*;
use once_cell::sync::OnceCell;
use prometheus::{
    exponential_buckets, register_gauge, register_gauge_vec, register_histogram,
    register_histogram_vec, register_int_counter, register_int_counter_vec, Gauge, GaugeVec,
    Histogram, HistogramVec, IntCounter, IntCounterVec,
};

// --- Metric Statics ---
// OnceCell holds the collectors; they are initialized exactly once by
// `install`.

static CONSENSUS_BLOCKS_PROPOSED_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static CONSENSUS_BLOCKS_COMMITTED_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static CONSENSUS_ELECTIONS_STARTED_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static CONSENSUS_EQUIVOCATIONS_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static CONSENSUS_CURRENT_TERM: OnceCell<Gauge> = OnceCell::new();
static CONSENSUS_COMMIT_INDEX: OnceCell<Gauge> = OnceCell::new();
static CONSENSUS_ROLE: OnceCell<GaugeVec> = OnceCell::new();
static CONSENSUS_TICK_DURATION_SECONDS: OnceCell<Histogram> = OnceCell::new();

static MEMPOOL_ADMITTED_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static MEMPOOL_REJECTED_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static MEMPOOL_SIZE: OnceCell<Gauge> = OnceCell::new();
static MEMPOOL_EVICTED_TOTAL: OnceCell<IntCounter> = OnceCell::new();

static PIPELINE_BATCHES_COMPLETED_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static PIPELINE_BATCH_SIZE: OnceCell<Histogram> = OnceCell::new();
static PIPELINE_BATCH_SERVICE_SECONDS: OnceCell<Histogram> = OnceCell::new();
static PIPELINE_CLASS_LATENCY_SECONDS: OnceCell<HistogramVec> = OnceCell::new();
static PIPELINE_SLA_MISSES_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static PIPELINE_BREAKER_TRANSITIONS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();

static BRIDGE_TRANSFER_STATES_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static BRIDGE_VERIFICATIONS_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static BRIDGE_PENDING_TRANSFERS: OnceCell<Gauge> = OnceCell::new();

static ERRORS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();

/// The Prometheus-backed metrics sink.
#[derive(Debug, Clone, Copy)]
pub struct PrometheusSink;

/// Helper macro to reduce boilerplate for getting a metric from OnceCell.
/// This will panic if `install()` has not been called, which is intentional
/// as it indicates a critical application setup error.
macro_rules! get_metric {
    ($metric:ident) => {
        $metric
            .get()
            .expect("Prometheus sink not initialized. Call telemetry::prometheus::install() first.")
    };
}

impl ConsensusMetricsSink for PrometheusSink {
    fn inc_blocks_proposed(&self) {
        get_metric!(CONSENSUS_BLOCKS_PROPOSED_TOTAL).inc();
    }
    fn inc_blocks_committed(&self) {
        get_metric!(CONSENSUS_BLOCKS_COMMITTED_TOTAL).inc();
    }
    fn inc_elections_started(&self) {
        get_metric!(CONSENSUS_ELECTIONS_STARTED_TOTAL).inc();
    }
    fn inc_equivocations_detected(&self) {
        get_metric!(CONSENSUS_EQUIVOCATIONS_TOTAL).inc();
    }
    fn set_current_term(&self, term: u64) {
        get_metric!(CONSENSUS_CURRENT_TERM).set(term as f64);
    }
    fn set_commit_index(&self, height: u64) {
        get_metric!(CONSENSUS_COMMIT_INDEX).set(height as f64);
    }
    fn set_role(&self, role_name: &str) {
        for role in &["Follower", "Candidate", "Leader"] {
            get_metric!(CONSENSUS_ROLE)
                .with_label_values(&[role])
                .set(if *role == role_name { 1.0 } else { 0.0 });
        }
    }
    fn observe_tick_duration(&self, duration_secs: f64) {
        get_metric!(CONSENSUS_TICK_DURATION_SECONDS).observe(duration_secs);
    }
}

impl MempoolMetricsSink for PrometheusSink {
    fn inc_admitted(&self) {
        get_metric!(MEMPOOL_ADMITTED_TOTAL).inc();
    }
    fn inc_rejected(&self, reason: &'static str) {
        get_metric!(MEMPOOL_REJECTED_TOTAL)
            .with_label_values(&[reason])
            .inc();
    }
    fn set_pool_size(&self, size: f64) {
        get_metric!(MEMPOOL_SIZE).set(size);
    }
    fn inc_evicted(&self, count: u64) {
        get_metric!(MEMPOOL_EVICTED_TOTAL).inc_by(count);
    }
}

impl PipelineMetricsSink for PrometheusSink {
    fn inc_batches_completed(&self) {
        get_metric!(PIPELINE_BATCHES_COMPLETED_TOTAL).inc();
    }
    fn observe_batch_size(&self, size: f64) {
        get_metric!(PIPELINE_BATCH_SIZE).observe(size);
    }
    fn observe_batch_service_time(&self, duration_secs: f64) {
        get_metric!(PIPELINE_BATCH_SERVICE_SECONDS).observe(duration_secs);
    }
    fn observe_class_latency(&self, class: &'static str, duration_secs: f64) {
        get_metric!(PIPELINE_CLASS_LATENCY_SECONDS)
            .with_label_values(&[class])
            .observe(duration_secs);
    }
    fn inc_sla_miss(&self, class: &'static str) {
        get_metric!(PIPELINE_SLA_MISSES_TOTAL)
            .with_label_values(&[class])
            .inc();
    }
    fn inc_breaker_transition(&self, dependency: &'static str, state: &'static str) {
        get_metric!(PIPELINE_BREAKER_TRANSITIONS_TOTAL)
            .with_label_values(&[dependency, state])
            .inc();
    }
}

impl BridgeMetricsSink for PrometheusSink {
    fn inc_transfer_state(&self, state: &'static str) {
        get_metric!(BRIDGE_TRANSFER_STATES_TOTAL)
            .with_label_values(&[state])
            .inc();
    }
    fn inc_verifications(&self) {
        get_metric!(BRIDGE_VERIFICATIONS_TOTAL).inc();
    }
    fn set_pending_transfers(&self, count: f64) {
        get_metric!(BRIDGE_PENDING_TRANSFERS).set(count);
    }
}

impl ErrorMetricsSink for PrometheusSink {
    fn inc_error(&self, kind: &'static str, code: &'static str) {
        get_metric!(ERRORS_TOTAL)
            .with_label_values(&[kind, code])
            .inc();
    }
}

/// Initializes all Prometheus metrics collectors and returns a static reference to the sink.
/// This function must be called only once at application startup.
#[allow(clippy::expect_used)]
pub fn install() -> Result<&'static dyn MetricsSink, prometheus::Error> {
    CONSENSUS_BLOCKS_PROPOSED_TOTAL
        .set(register_int_counter!(
            "hyperraft_consensus_blocks_proposed_total",
            "Total number of blocks proposed by this node."
        )?)
        .expect("static already initialized");
    CONSENSUS_BLOCKS_COMMITTED_TOTAL
        .set(register_int_counter!(
            "hyperraft_consensus_blocks_committed_total",
            "Total number of blocks observed committed."
        )?)
        .expect("static already initialized");
    CONSENSUS_ELECTIONS_STARTED_TOTAL
        .set(register_int_counter!(
            "hyperraft_consensus_elections_started_total",
            "Total number of elections this node started."
        )?)
        .expect("static already initialized");
    CONSENSUS_EQUIVOCATIONS_TOTAL
        .set(register_int_counter!(
            "hyperraft_consensus_equivocations_total",
            "Total number of equivocation proofs surfaced."
        )?)
        .expect("static already initialized");
    CONSENSUS_CURRENT_TERM
        .set(register_gauge!(
            "hyperraft_consensus_current_term",
            "The node's current term."
        )?)
        .expect("static already initialized");
    CONSENSUS_COMMIT_INDEX
        .set(register_gauge!(
            "hyperraft_consensus_commit_index",
            "The node's commit index."
        )?)
        .expect("static already initialized");
    CONSENSUS_ROLE
        .set(register_gauge_vec!(
            "hyperraft_consensus_role",
            "Current consensus role of the node (1 if active, 0 otherwise).",
            &["role"]
        )?)
        .expect("static already initialized");
    CONSENSUS_TICK_DURATION_SECONDS
        .set(register_histogram!(
            "hyperraft_consensus_tick_duration_seconds",
            "Latency of a single consensus tick.",
            exponential_buckets(0.0005, 2.0, 15)?
        )?)
        .expect("static already initialized");

    MEMPOOL_ADMITTED_TOTAL
        .set(register_int_counter!(
            "hyperraft_mempool_admitted_total",
            "Total transactions admitted to the mempool."
        )?)
        .expect("static already initialized");
    MEMPOOL_REJECTED_TOTAL
        .set(register_int_counter_vec!(
            "hyperraft_mempool_rejected_total",
            "Total admissions rejected, by reason.",
            &["reason"]
        )?)
        .expect("static already initialized");
    MEMPOOL_SIZE
        .set(register_gauge!(
            "hyperraft_mempool_size",
            "Current number of transactions in the mempool."
        )?)
        .expect("static already initialized");
    MEMPOOL_EVICTED_TOTAL
        .set(register_int_counter!(
            "hyperraft_mempool_evicted_total",
            "Total transactions evicted by commit or TTL."
        )?)
        .expect("static already initialized");

    PIPELINE_BATCHES_COMPLETED_TOTAL
        .set(register_int_counter!(
            "hyperraft_pipeline_batches_completed_total",
            "Total batches completed by the pipeline."
        )?)
        .expect("static already initialized");
    PIPELINE_BATCH_SIZE
        .set(register_histogram!(
            "hyperraft_pipeline_batch_size",
            "Size chosen by the adaptive batcher.",
            exponential_buckets(1.0, 2.0, 8)?
        )?)
        .expect("static already initialized");
    PIPELINE_BATCH_SERVICE_SECONDS
        .set(register_histogram!(
            "hyperraft_pipeline_batch_service_seconds",
            "Service time of one batch.",
            exponential_buckets(0.0005, 2.0, 15)?
        )?)
        .expect("static already initialized");
    PIPELINE_CLASS_LATENCY_SECONDS
        .set(register_histogram_vec!(
            "hyperraft_pipeline_class_latency_seconds",
            "End-to-end latency by priority class.",
            &["class"],
            exponential_buckets(0.0005, 2.0, 15)?
        )?)
        .expect("static already initialized");
    PIPELINE_SLA_MISSES_TOTAL
        .set(register_int_counter_vec!(
            "hyperraft_pipeline_sla_misses_total",
            "SLA misses by priority class.",
            &["class"]
        )?)
        .expect("static already initialized");
    PIPELINE_BREAKER_TRANSITIONS_TOTAL
        .set(register_int_counter_vec!(
            "hyperraft_pipeline_breaker_transitions_total",
            "Circuit breaker state transitions, by dependency and new state.",
            &["dependency", "state"]
        )?)
        .expect("static already initialized");

    BRIDGE_TRANSFER_STATES_TOTAL
        .set(register_int_counter_vec!(
            "hyperraft_bridge_transfer_states_total",
            "Bridge transfers entering a lifecycle state.",
            &["state"]
        )?)
        .expect("static already initialized");
    BRIDGE_VERIFICATIONS_TOTAL
        .set(register_int_counter!(
            "hyperraft_bridge_verifications_total",
            "Oracle verifications recorded."
        )?)
        .expect("static already initialized");
    BRIDGE_PENDING_TRANSFERS
        .set(register_gauge!(
            "hyperraft_bridge_pending_transfers",
            "Transfers currently pending."
        )?)
        .expect("static already initialized");

    ERRORS_TOTAL
        .set(register_int_counter_vec!(
            "hyperraft_errors_total",
            "Total number of errors, categorized by kind and stable code.",
            &["kind", "code"]
        )?)
        .expect("static already initialized");

    static SINK: PrometheusSink = PrometheusSink;
    Ok(&SINK)
}
