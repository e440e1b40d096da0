use crate::frontier::Completion;
use crate::metrics::snapshot::MetricsSnapshot;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

/// Agent-local counters behind the progress display. Crawl-wide numbers
/// live in the statistics store.
#[derive(Clone)]
pub struct MetricsCollector {
    requests_queued: Arc<AtomicU64>,
    requests_dispatched: Arc<AtomicU64>,
    requests_succeeded: Arc<AtomicU64>,
    requests_failed: Arc<AtomicU64>,
    requests_finished: Arc<AtomicU64>,
    requests_retried: Arc<AtomicU64>,
    requests_abandoned: Arc<AtomicU64>,
    requests_reclaimed: Arc<AtomicU64>,
    late_completions: Arc<AtomicU64>,
    active_workers: Arc<AtomicU64>,
    total_response_time_ms: Arc<AtomicU64>,
    start_time: Arc<Instant>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            requests_queued: Arc::new(AtomicU64::new(0)),
            requests_dispatched: Arc::new(AtomicU64::new(0)),
            requests_succeeded: Arc::new(AtomicU64::new(0)),
            requests_failed: Arc::new(AtomicU64::new(0)),
            requests_finished: Arc::new(AtomicU64::new(0)),
            requests_retried: Arc::new(AtomicU64::new(0)),
            requests_abandoned: Arc::new(AtomicU64::new(0)),
            requests_reclaimed: Arc::new(AtomicU64::new(0)),
            late_completions: Arc::new(AtomicU64::new(0)),
            active_workers: Arc::new(AtomicU64::new(0)),
            total_response_time_ms: Arc::new(AtomicU64::new(0)),
            start_time: Arc::new(Instant::now()),
        }
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_queued(&self, count: u64) {
        self.requests_queued.fetch_add(count, Ordering::SeqCst);
    }

    pub fn add_dispatched(&self, count: u64) {
        self.requests_dispatched.fetch_add(count, Ordering::SeqCst);
    }

    pub fn add_reclaimed(&self, count: u64) {
        self.requests_reclaimed.fetch_add(count, Ordering::SeqCst);
    }

    pub fn increment_active_workers(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement_active_workers(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn active_workers(&self) -> u64 {
        self.active_workers.load(Ordering::SeqCst)
    }

    /// Records one download attempt and what the frontier made of it.
    pub fn record_attempt(&self, succeeded: bool, duration: Duration, completion: Completion) {
        if succeeded {
            self.requests_succeeded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.requests_failed.fetch_add(1, Ordering::SeqCst);
        }
        self.total_response_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
        self.record_completion(completion);
    }

    pub fn record_completion(&self, completion: Completion) {
        match completion {
            Completion::Succeeded => {
                self.requests_finished.fetch_add(1, Ordering::SeqCst);
            }
            Completion::Retried { .. } => {
                self.requests_retried.fetch_add(1, Ordering::SeqCst);
            }
            Completion::Abandoned => {
                self.requests_finished.fetch_add(1, Ordering::SeqCst);
                self.requests_abandoned.fetch_add(1, Ordering::SeqCst);
            }
            Completion::Reclaimed => {
                self.late_completions.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let succeeded = self.requests_succeeded.load(Ordering::SeqCst);
        let failed = self.requests_failed.load(Ordering::SeqCst);
        let attempts = succeeded + failed;
        let total_time = self.total_response_time_ms.load(Ordering::SeqCst);

        let success_rate = if attempts > 0 {
            (succeeded as f64 / attempts as f64) * 100.0
        } else {
            0.0
        };

        let avg_response_time_ms = if attempts > 0 {
            total_time / attempts
        } else {
            0
        };

        let elapsed = self.start_time.elapsed().as_secs_f64();

        MetricsSnapshot {
            requests_queued: self.requests_queued.load(Ordering::SeqCst),
            requests_dispatched: self.requests_dispatched.load(Ordering::SeqCst),
            requests_succeeded: succeeded,
            requests_failed: failed,
            requests_finished: self.requests_finished.load(Ordering::SeqCst),
            requests_retried: self.requests_retried.load(Ordering::SeqCst),
            requests_abandoned: self.requests_abandoned.load(Ordering::SeqCst),
            requests_reclaimed: self.requests_reclaimed.load(Ordering::SeqCst),
            late_completions: self.late_completions.load(Ordering::SeqCst),
            active_workers: self.active_workers.load(Ordering::SeqCst),
            success_rate,
            avg_response_time_ms,
            requests_per_second: if elapsed > 0.0 {
                attempts as f64 / elapsed
            } else {
                0.0
            },
            elapsed_seconds: elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_derives_rates() {
        let metrics = MetricsCollector::new();
        metrics.add_queued(4);
        metrics.record_attempt(true, Duration::from_millis(100), Completion::Succeeded);
        metrics.record_attempt(
            false,
            Duration::from_millis(300),
            Completion::Retried { retried_times: 1 },
        );
        metrics.record_completion(Completion::Abandoned);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_queued, 4);
        assert_eq!(snapshot.requests_succeeded, 1);
        assert_eq!(snapshot.requests_failed, 1);
        assert_eq!(snapshot.requests_retried, 1);
        assert_eq!(snapshot.requests_abandoned, 1);
        assert_eq!(snapshot.requests_finished, 2);
        assert_eq!(snapshot.avg_response_time_ms, 200);
        assert!((snapshot.success_rate - 50.0).abs() < f64::EPSILON);
    }
}
