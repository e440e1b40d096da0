use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requests_queued: u64,
    pub requests_dispatched: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub requests_finished: u64,
    pub requests_retried: u64,
    pub requests_abandoned: u64,
    pub requests_reclaimed: u64,
    pub late_completions: u64,
    pub active_workers: u64,
    pub success_rate: f64,
    pub avg_response_time_ms: u64,
    pub requests_per_second: f64,
    pub elapsed_seconds: f64,
}

