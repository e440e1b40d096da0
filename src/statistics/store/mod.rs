use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStatisticsStore;
pub use sqlite::SqliteStatisticsStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlStatus {
    /// Counters exist but no `Start` arrived yet.
    Pending,
    Running,
    Exited,
}

/// Progress counters of one crawl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlStatistics {
    pub owner: String,
    pub name: Option<String>,
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub exited_at: Option<DateTime<Utc>>,
    pub last_modified_at: DateTime<Utc>,
}

impl CrawlStatistics {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: None,
            total: 0,
            success: 0,
            failure: 0,
            started_at: None,
            exited_at: None,
            last_modified_at: Utc::now(),
        }
    }

    /// Requests not yet finished. Saturates at zero when completions
    /// overtake their `Total`.
    pub fn left(&self) -> u64 {
        self.total
            .saturating_sub(self.success)
            .saturating_sub(self.failure)
    }

    pub fn status(&self) -> CrawlStatus {
        if self.exited_at.is_some() {
            CrawlStatus::Exited
        } else if self.started_at.is_some() {
            CrawlStatus::Running
        } else {
            CrawlStatus::Pending
        }
    }
}

/// Cumulative results of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatistics {
    pub agent_id: String,
    pub agent_name: Option<String>,
    pub success: u64,
    pub failure: u64,
    pub elapsed_ms: u64,
    pub registered_at: Option<DateTime<Utc>>,
    pub last_seen_at: DateTime<Utc>,
}

impl AgentStatistics {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_name: None,
            success: 0,
            failure: 0,
            elapsed_ms: 0,
            registered_at: None,
            last_seen_at: Utc::now(),
        }
    }

    pub fn average_latency_ms(&self) -> u64 {
        let requests = self.success + self.failure;
        if requests > 0 {
            self.elapsed_ms / requests
        } else {
            0
        }
    }
}

/// Where aggregated counters live.
///
/// Every mutation must be atomic per owner (or agent): concurrent
/// increments for the same key may not be lost.
#[async_trait]
pub trait StatisticsStore: Send + Sync {
    /// Creates the record on first start; later starts only rename.
    async fn start(&self, owner: &str, name: &str) -> Result<()>;
    async fn exit(&self, owner: &str) -> Result<()>;
    async fn increase_total(&self, owner: &str, count: u64) -> Result<()>;
    async fn increase_success(&self, owner: &str) -> Result<()>;
    async fn increase_failure(&self, owner: &str) -> Result<()>;

    async fn register_agent(&self, agent_id: &str, agent_name: &str) -> Result<()>;
    async fn increase_agent_success(&self, agent_id: &str, elapsed_ms: u64) -> Result<()>;
    async fn increase_agent_failure(&self, agent_id: &str, elapsed_ms: u64) -> Result<()>;

    async fn crawl(&self, owner: &str) -> Result<Option<CrawlStatistics>>;
    /// Most recently modified first.
    async fn crawls(&self, offset: usize, limit: usize) -> Result<Vec<CrawlStatistics>>;
    async fn agent(&self, agent_id: &str) -> Result<Option<AgentStatistics>>;
    async fn agents(&self) -> Result<Vec<AgentStatistics>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn left_never_goes_negative() {
        let mut stats = CrawlStatistics::new("job");
        stats.success = 2;
        assert_eq!(stats.left(), 0);

        stats.total = 10;
        stats.failure = 3;
        assert_eq!(stats.left(), 5);
    }

    #[test]
    fn status_follows_start_and_exit() {
        let mut stats = CrawlStatistics::new("job");
        assert_eq!(stats.status(), CrawlStatus::Pending);
        stats.started_at = Some(Utc::now());
        assert_eq!(stats.status(), CrawlStatus::Running);
        stats.exited_at = Some(Utc::now());
        assert_eq!(stats.status(), CrawlStatus::Exited);
    }

    #[test]
    fn average_latency_handles_no_requests() {
        let mut agent = AgentStatistics::new("a");
        assert_eq!(agent.average_latency_ms(), 0);
        agent.success = 3;
        agent.failure = 1;
        agent.elapsed_ms = 400;
        assert_eq!(agent.average_latency_ms(), 100);
    }
}
