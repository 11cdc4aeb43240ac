// Path: crates/pipeline/src/priority.rs

//! Priority queues with per-class latency SLAs.
//!
//! Three queues are polled in strict order CRITICAL -> HIGH -> NORMAL. To
//! keep NORMAL from starving under sustained CRITICAL load, the scheduler
//! yields one NORMAL item after every 64 consecutive CRITICAL items.
//! Enqueue order is preserved within a class.

use hyperraft_telemetry::pipeline_metrics;
use hyperraft_types::config::PrioritySlaMs;
use hyperraft_types::tx::PriorityClass;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Consecutive CRITICAL items after which one NORMAL item is yielded.
const STARVATION_YIELD_EVERY: u32 = 64;

struct Enqueued<T> {
    item: T,
    enqueued_at: Instant,
}

/// One item popped from the scheduler.
pub struct Scheduled<T> {
    /// The item itself.
    pub item: T,
    /// Its class.
    pub class: PriorityClass,
    /// When it entered the queue; the SLA clock starts here.
    pub enqueued_at: Instant,
}

/// Strict-priority scheduler with an anti-starvation yield.
pub struct PriorityScheduler<T> {
    queues: [Mutex<VecDeque<Enqueued<T>>>; 3],
    consecutive_critical: Mutex<u32>,
}

impl<T> Default for PriorityScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PriorityScheduler<T> {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self {
            queues: [
                Mutex::new(VecDeque::new()),
                Mutex::new(VecDeque::new()),
                Mutex::new(VecDeque::new()),
            ],
            consecutive_critical: Mutex::new(0),
        }
    }

    fn queue(&self, class: PriorityClass) -> &Mutex<VecDeque<Enqueued<T>>> {
        let index = match class {
            PriorityClass::Critical => 0,
            PriorityClass::High => 1,
            PriorityClass::Normal => 2,
        };
        self.queues
            .get(index)
            .unwrap_or_else(|| unreachable!("three class queues"))
    }

    /// Enqueues one item at its class.
    pub fn push(&self, class: PriorityClass, item: T) {
        self.queue(class).lock().push_back(Enqueued {
            item,
            enqueued_at: Instant::now(),
        });
    }

    /// Pops the next item under strict priority with the 64:1 yield.
    pub fn pop(&self) -> Option<Scheduled<T>> {
        let mut streak = self.consecutive_critical.lock();

        if *streak >= STARVATION_YIELD_EVERY {
            if let Some(entry) = self.queue(PriorityClass::Normal).lock().pop_front() {
                *streak = 0;
                return Some(Scheduled {
                    item: entry.item,
                    class: PriorityClass::Normal,
                    enqueued_at: entry.enqueued_at,
                });
            }
            *streak = 0;
        }

        for class in PriorityClass::ALL {
            if let Some(entry) = self.queue(class).lock().pop_front() {
                if class == PriorityClass::Critical {
                    *streak += 1;
                } else {
                    *streak = 0;
                }
                return Some(Scheduled {
                    item: entry.item,
                    class,
                    enqueued_at: entry.enqueued_at,
                });
            }
        }
        None
    }

    /// The number of queued items across all classes.
    pub fn len(&self) -> usize {
        self.queues.iter().map(|q| q.lock().len()).sum()
    }

    /// Returns `true` when no items are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The depth of one class queue.
    pub fn depth(&self, class: PriorityClass) -> usize {
        self.queue(class).lock().len()
    }
}

/// The per-item completion record handed back to clients.
#[derive(Debug, Clone, Copy)]
pub struct SlaOutcome {
    /// End-to-end latency from enqueue to completion, milliseconds.
    pub actual_latency_ms: f64,
    /// True iff the latency met the class SLA.
    pub sla_met: bool,
}

/// Counts SLA misses per class against the configured targets.
pub struct SlaTracker {
    sla: PrioritySlaMs,
    misses: [AtomicU64; 3],
}

impl SlaTracker {
    /// Creates a tracker with the given per-class SLAs.
    pub fn new(sla: PrioritySlaMs) -> Self {
        Self {
            sla,
            misses: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
        }
    }

    fn sla_for(&self, class: PriorityClass) -> Duration {
        let ms = match class {
            PriorityClass::Critical => self.sla.critical,
            PriorityClass::High => self.sla.high,
            PriorityClass::Normal => self.sla.normal,
        };
        Duration::from_millis(ms)
    }

    fn miss_counter(&self, class: PriorityClass) -> &AtomicU64 {
        let index = match class {
            PriorityClass::Critical => 0,
            PriorityClass::High => 1,
            PriorityClass::Normal => 2,
        };
        self.misses
            .get(index)
            .unwrap_or_else(|| unreachable!("three class counters"))
    }

    /// Records one completion and returns its outcome.
    pub fn complete(&self, class: PriorityClass, enqueued_at: Instant) -> SlaOutcome {
        let elapsed = enqueued_at.elapsed();
        let sla_met = elapsed <= self.sla_for(class);
        if !sla_met {
            self.miss_counter(class).fetch_add(1, Ordering::Relaxed);
            pipeline_metrics().inc_sla_miss(class.label());
        }
        pipeline_metrics().observe_class_latency(class.label(), elapsed.as_secs_f64());
        SlaOutcome {
            actual_latency_ms: elapsed.as_secs_f64() * 1e3,
            sla_met,
        }
    }

    /// Total misses recorded for a class.
    pub fn misses(&self, class: PriorityClass) -> u64 {
        self.miss_counter(class).load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_priority_order() {
        let scheduler = PriorityScheduler::new();
        scheduler.push(PriorityClass::Normal, "n1");
        scheduler.push(PriorityClass::High, "h1");
        scheduler.push(PriorityClass::Critical, "c1");
        scheduler.push(PriorityClass::Normal, "n2");

        let order: Vec<&str> = std::iter::from_fn(|| scheduler.pop())
            .map(|s| s.item)
            .collect();
        assert_eq!(order, vec!["c1", "h1", "n1", "n2"]);
    }

    #[test]
    fn fifo_within_class() {
        let scheduler = PriorityScheduler::new();
        for i in 0..5 {
            scheduler.push(PriorityClass::High, i);
        }
        let order: Vec<i32> = std::iter::from_fn(|| scheduler.pop())
            .map(|s| s.item)
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn normal_yields_after_64_critical() {
        let scheduler = PriorityScheduler::new();
        scheduler.push(PriorityClass::Normal, "starved");
        for i in 0..200 {
            scheduler.push(PriorityClass::Critical, "c");
            let _ = i;
        }

        let mut popped_before_normal = 0;
        loop {
            let scheduled = scheduler.pop().unwrap();
            if scheduled.class == PriorityClass::Normal {
                break;
            }
            popped_before_normal += 1;
        }
        assert_eq!(popped_before_normal, 64);
    }

    #[test]
    fn sla_tracker_counts_misses() {
        let tracker = SlaTracker::new(PrioritySlaMs {
            critical: 0,
            high: 1_000,
            normal: 1_000,
        });
        let outcome = tracker.complete(
            PriorityClass::Critical,
            Instant::now() - Duration::from_millis(5),
        );
        assert!(!outcome.sla_met);
        assert!(outcome.actual_latency_ms >= 5.0);
        assert_eq!(tracker.misses(PriorityClass::Critical), 1);

        let outcome = tracker.complete(PriorityClass::High, Instant::now());
        assert!(outcome.sla_met);
        assert_eq!(tracker.misses(PriorityClass::High), 0);
    }
}
