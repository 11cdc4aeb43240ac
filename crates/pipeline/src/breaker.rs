// Path: crates/pipeline/src/breaker.rs

//! Circuit breakers for downstream dependencies.
//!
//! CLOSED -> OPEN after a run of consecutive failures; after the reset
//! window, HALF_OPEN admits exactly one probe. A successful probe closes
//! the breaker, a failed one reopens it. While OPEN, calls fail fast with
//! `Unavailable`. Reads may degrade to a local fallback at the call site;
//! writes never silently succeed.

use hyperraft_telemetry::pipeline_metrics;
use hyperraft_types::config::BreakerConfig;
use hyperraft_types::error::PipelineError;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// The observable state of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls fail fast until the reset window elapses.
    Open,
    /// One probe call is in flight.
    HalfOpen,
}

impl BreakerState {
    /// The stable label used for metrics and health checks.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

enum Inner {
    Closed { consecutive_failures: u32 },
    Open { since: Instant },
    HalfOpen { probe_in_flight: bool },
}

/// A circuit breaker wrapping one named downstream dependency.
pub struct CircuitBreaker {
    dependency: &'static str,
    failure_threshold: u32,
    reset: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker for `dependency`.
    pub fn new(dependency: &'static str, config: BreakerConfig) -> Self {
        Self {
            dependency,
            failure_threshold: config.failure_threshold.max(1),
            reset: Duration::from_millis(config.reset_ms),
            inner: Mutex::new(Inner::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    /// The dependency this breaker guards.
    pub fn dependency(&self) -> &'static str {
        self.dependency
    }

    /// The breaker's current state, advancing OPEN -> HALF_OPEN when the
    /// reset window has elapsed.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        if let Inner::Open { since } = *inner {
            if since.elapsed() >= self.reset {
                *inner = Inner::HalfOpen {
                    probe_in_flight: false,
                };
                self.transition("half_open");
            }
        }
        match *inner {
            Inner::Closed { .. } => BreakerState::Closed,
            Inner::Open { .. } => BreakerState::Open,
            Inner::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    /// Admission check before a call. `Ok` means the call may proceed and
    /// its outcome must be reported via [`Self::record_success`] or
    /// [`Self::record_failure`].
    pub fn admit(&self) -> Result<(), PipelineError> {
        let mut inner = self.inner.lock();
        match &mut *inner {
            Inner::Closed { .. } => Ok(()),
            Inner::Open { since } => {
                if since.elapsed() >= self.reset {
                    *inner = Inner::HalfOpen {
                        probe_in_flight: true,
                    };
                    self.transition("half_open");
                    Ok(())
                } else {
                    Err(PipelineError::Unavailable(self.dependency))
                }
            }
            Inner::HalfOpen { probe_in_flight } => {
                if *probe_in_flight {
                    Err(PipelineError::Unavailable(self.dependency))
                } else {
                    *probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Reports a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match &*inner {
            Inner::Closed { .. } => {
                *inner = Inner::Closed {
                    consecutive_failures: 0,
                };
            }
            Inner::HalfOpen { .. } => {
                *inner = Inner::Closed {
                    consecutive_failures: 0,
                };
                self.transition("closed");
                tracing::info!(target: "pipeline", dependency = self.dependency, "breaker closed");
            }
            Inner::Open { .. } => {}
        }
    }

    /// Reports a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match &mut *inner {
            Inner::Closed {
                consecutive_failures,
            } => {
                *consecutive_failures += 1;
                if *consecutive_failures >= self.failure_threshold {
                    *inner = Inner::Open {
                        since: Instant::now(),
                    };
                    self.transition("open");
                    tracing::warn!(
                        target: "pipeline",
                        dependency = self.dependency,
                        "breaker opened"
                    );
                }
            }
            Inner::HalfOpen { .. } => {
                *inner = Inner::Open {
                    since: Instant::now(),
                };
                self.transition("open");
                tracing::warn!(
                    target: "pipeline",
                    dependency = self.dependency,
                    "probe failed; breaker reopened"
                );
            }
            Inner::Open { .. } => {}
        }
    }

    /// Runs `op` under the breaker: admission check, call, outcome report.
    /// The inner result is the downstream outcome, untouched.
    pub async fn call<T, E, Fut>(
        &self,
        op: impl FnOnce() -> Fut,
    ) -> Result<Result<T, E>, PipelineError>
    where
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.admit()?;
        let outcome = op().await;
        match &outcome {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        }
        Ok(outcome)
    }

    fn transition(&self, state: &'static str) {
        pipeline_metrics().inc_breaker_transition(self.dependency, state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "consensus_submit",
            BreakerConfig {
                failure_threshold: threshold,
                reset_ms,
            },
        )
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let b = breaker(3, 60_000);
        for _ in 0..2 {
            b.admit().unwrap();
            b.record_failure();
        }
        assert_eq!(b.state(), BreakerState::Closed);
        b.admit().unwrap();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(matches!(
            b.admit(),
            Err(PipelineError::Unavailable("consensus_submit"))
        ));
    }

    #[test]
    fn success_resets_failure_run() {
        let b = breaker(3, 60_000);
        b.admit().unwrap();
        b.record_failure();
        b.admit().unwrap();
        b.record_failure();
        b.admit().unwrap();
        b.record_success();
        b.admit().unwrap();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_admits_single_probe() {
        let b = breaker(1, 0);
        b.admit().unwrap();
        b.record_failure();
        // Reset window of zero: next check is a probe.
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.admit().unwrap();
        // A second caller is rejected while the probe is out.
        assert!(b.admit().is_err());
        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn failed_probe_reopens() {
        let b = breaker(1, 0);
        b.admit().unwrap();
        b.record_failure();
        b.admit().unwrap();
        b.record_failure();
        // Reopened; with a zero reset it is immediately probe-able again,
        // but the state after the failed probe was Open.
        assert!(matches!(b.state(), BreakerState::HalfOpen | BreakerState::Open));
    }
}
