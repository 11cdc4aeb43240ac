// Path: crates/telemetry/src/time.rs
use std::time::Instant;

/// A drop-guard that reports the elapsed scope duration to a callback.
///
/// Used for consensus ticks, batch service times and apply latency.
pub struct ScopeTimer<F: Fn(f64)> {
    observe: F,
    start: Instant,
}

impl<F: Fn(f64)> ScopeTimer<F> {
    /// Starts the timer; `observe` receives seconds on drop.
    pub fn new(observe: F) -> Self {
        Self {
            observe,
            start: Instant::now(),
        }
    }
}

impl<F: Fn(f64)> Drop for ScopeTimer<F> {
    fn drop(&mut self) {
        (self.observe)(self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn observes_on_drop() {
        let fired = Arc::new(AtomicBool::new(false));
        {
            let fired = fired.clone();
            let _timer = ScopeTimer::new(move |secs| {
                assert!(secs >= 0.0);
                fired.store(true, Ordering::SeqCst);
            });
        }
        assert!(fired.load(Ordering::SeqCst));
    }
}
