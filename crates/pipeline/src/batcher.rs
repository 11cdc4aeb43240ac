// Path: crates/pipeline/src/batcher.rs

//! Adaptive batch sizing.
//!
//! The batcher targets a fixed per-batch service time and sizes batches
//! from two signals only: the current ingress queue depth and a smoothed,
//! server-side estimate of downstream per-transaction latency. Anything a
//! client claims about its own latency is a hint at best and is never fed
//! into the estimator.

use hyperraft_telemetry::pipeline_metrics;
use parking_lot::Mutex;

/// Smallest batch the sizer will emit.
pub const MIN_BATCH: usize = 1;
/// Largest batch the sizer will emit.
pub const MAX_ADAPTIVE_BATCH: usize = 100;
/// Target service time for one batch, microseconds.
pub const BATCH_TARGET_US: f64 = 5_000.0;

/// EWMA weight for new latency samples.
const ALPHA: f64 = 0.2;
/// Estimator seed: one millisecond per transaction.
const SEED_LATENCY_US: f64 = 1_000.0;

struct Estimate {
    per_tx_latency_us: f64,
}

/// Sizes batches in `[1, 100]` from queue depth and smoothed latency.
pub struct AdaptiveBatcher {
    estimate: Mutex<Estimate>,
}

impl Default for AdaptiveBatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptiveBatcher {
    /// Creates a batcher with the seeded latency estimate.
    pub fn new() -> Self {
        Self {
            estimate: Mutex::new(Estimate {
                per_tx_latency_us: SEED_LATENCY_US,
            }),
        }
    }

    /// The next batch size for the given ingress queue depth.
    ///
    /// `size = clamp(B_target / ℓ · f(d), 1, 100)` with `f(d) = √(1 + d)`,
    /// sub-linear in the depth so bursts widen batches without letting the
    /// service-time target run away.
    pub fn next_size(&self, queue_depth: usize) -> usize {
        let latency = self.estimate.lock().per_tx_latency_us;
        let base = BATCH_TARGET_US / latency.max(1.0);
        let f = (1.0 + queue_depth as f64).sqrt();
        let size = (base * f) as usize;
        let size = size.clamp(MIN_BATCH, MAX_ADAPTIVE_BATCH);
        pipeline_metrics().observe_batch_size(size as f64);
        size
    }

    /// Feeds one completed batch back into the estimator.
    pub fn observe_batch(&self, batch_size: usize, processing_us: u64) {
        if batch_size == 0 {
            return;
        }
        let sample = processing_us as f64 / batch_size as f64;
        let mut estimate = self.estimate.lock();
        estimate.per_tx_latency_us =
            (1.0 - ALPHA) * estimate.per_tx_latency_us + ALPHA * sample;
        pipeline_metrics().observe_batch_service_time(processing_us as f64 / 1e6);
        pipeline_metrics().inc_batches_completed();
    }

    /// The current smoothed per-transaction latency estimate, microseconds.
    pub fn latency_estimate_us(&self) -> f64 {
        self.estimate.lock().per_tx_latency_us
    }

    /// Reported throughput for one batch: `size · 10⁶ / processing_us`.
    pub fn throughput_tps(batch_size: usize, processing_us: u64) -> u64 {
        if processing_us == 0 {
            return 0;
        }
        (batch_size as u64).saturating_mul(1_000_000) / processing_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_stays_clamped() {
        let batcher = AdaptiveBatcher::new();
        assert!(batcher.next_size(0) >= MIN_BATCH);
        assert!(batcher.next_size(1_000_000) <= MAX_ADAPTIVE_BATCH);
    }

    #[test]
    fn slower_downstream_shrinks_batches() {
        let batcher = AdaptiveBatcher::new();
        let before = batcher.next_size(16);
        // Feed several slow batches: 10 ms per tx.
        for _ in 0..50 {
            batcher.observe_batch(10, 100_000);
        }
        let after = batcher.next_size(16);
        assert!(after < before, "{after} !< {before}");
    }

    #[test]
    fn deeper_queue_widens_batches_sublinearly() {
        let batcher = AdaptiveBatcher::new();
        let shallow = batcher.next_size(0);
        let deep = batcher.next_size(99);
        assert!(deep > shallow);
        // √(1+99) = 10: sub-linear in the 100× depth increase.
        assert!(deep <= shallow * 10 + 1);
    }

    #[test]
    fn estimator_converges_toward_samples() {
        let batcher = AdaptiveBatcher::new();
        for _ in 0..200 {
            batcher.observe_batch(1, 2_000);
        }
        let estimate = batcher.latency_estimate_us();
        assert!((estimate - 2_000.0).abs() < 50.0, "estimate {estimate}");
    }

    #[test]
    fn throughput_formula() {
        assert_eq!(AdaptiveBatcher::throughput_tps(50, 5_000), 10_000);
        assert_eq!(AdaptiveBatcher::throughput_tps(1, 0), 0);
    }
}
