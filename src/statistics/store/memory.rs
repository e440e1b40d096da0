use super::{AgentStatistics, CrawlStatistics, StatisticsStore};
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

/// Process-local store. Each owner and agent sits behind its own map entry,
/// so updates to different keys do not contend.
#[derive(Default)]
pub struct MemoryStatisticsStore {
    crawls: DashMap<String, CrawlStatistics>,
    agents: DashMap<String, AgentStatistics>,
}

impl MemoryStatisticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update_crawl(&self, owner: &str, apply: impl FnOnce(&mut CrawlStatistics)) {
        let mut entry = self
            .crawls
            .entry(owner.to_string())
            .or_insert_with(|| CrawlStatistics::new(owner));
        apply(entry.value_mut());
        entry.last_modified_at = Utc::now();
    }

    fn update_agent(&self, agent_id: &str, apply: impl FnOnce(&mut AgentStatistics)) {
        let mut entry = self
            .agents
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentStatistics::new(agent_id));
        apply(entry.value_mut());
        entry.last_seen_at = Utc::now();
    }
}

#[async_trait]
impl StatisticsStore for MemoryStatisticsStore {
    async fn start(&self, owner: &str, name: &str) -> Result<()> {
        self.update_crawl(owner, |stats| {
            stats.name = Some(name.to_string());
            if stats.started_at.is_none() {
                stats.started_at = Some(Utc::now());
            }
        });
        Ok(())
    }

    async fn exit(&self, owner: &str) -> Result<()> {
        self.update_crawl(owner, |stats| stats.exited_at = Some(Utc::now()));
        Ok(())
    }

    async fn increase_total(&self, owner: &str, count: u64) -> Result<()> {
        self.update_crawl(owner, |stats| stats.total += count);
        Ok(())
    }

    async fn increase_success(&self, owner: &str) -> Result<()> {
        self.update_crawl(owner, |stats| stats.success += 1);
        Ok(())
    }

    async fn increase_failure(&self, owner: &str) -> Result<()> {
        self.update_crawl(owner, |stats| stats.failure += 1);
        Ok(())
    }

    async fn register_agent(&self, agent_id: &str, agent_name: &str) -> Result<()> {
        self.update_agent(agent_id, |agent| {
            agent.agent_name = Some(agent_name.to_string());
            if agent.registered_at.is_none() {
                agent.registered_at = Some(Utc::now());
            }
        });
        Ok(())
    }

    async fn increase_agent_success(&self, agent_id: &str, elapsed_ms: u64) -> Result<()> {
        self.update_agent(agent_id, |agent| {
            agent.success += 1;
            agent.elapsed_ms += elapsed_ms;
        });
        Ok(())
    }

    async fn increase_agent_failure(&self, agent_id: &str, elapsed_ms: u64) -> Result<()> {
        self.update_agent(agent_id, |agent| {
            agent.failure += 1;
            agent.elapsed_ms += elapsed_ms;
        });
        Ok(())
    }

    async fn crawl(&self, owner: &str) -> Result<Option<CrawlStatistics>> {
        Ok(self.crawls.get(owner).map(|entry| entry.value().clone()))
    }

    async fn crawls(&self, offset: usize, limit: usize) -> Result<Vec<CrawlStatistics>> {
        let mut all: Vec<CrawlStatistics> = self.crawls.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| {
            b.last_modified_at
                .cmp(&a.last_modified_at)
                .then_with(|| a.owner.cmp(&b.owner))
        });
        Ok(all.into_iter().skip(offset).take(limit).collect())
    }

    async fn agent(&self, agent_id: &str) -> Result<Option<AgentStatistics>> {
        Ok(self.agents.get(agent_id).map(|entry| entry.value().clone()))
    }

    async fn agents(&self) -> Result<Vec<AgentStatistics>> {
        let mut all: Vec<AgentStatistics> = self.agents.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn counters_are_created_lazily() {
        let store = MemoryStatisticsStore::new();
        assert!(store.crawl("job").await.unwrap().is_none());

        store.increase_success("job").await.unwrap();
        let stats = store.crawl("job").await.unwrap().unwrap();
        assert_eq!(stats.success, 1);
        assert!(stats.name.is_none());
        assert!(stats.started_at.is_none());
    }

    #[tokio::test]
    async fn restart_keeps_counts_and_first_start_time() {
        let store = MemoryStatisticsStore::new();
        store.start("job", "first").await.unwrap();
        store.increase_total("job", 4).await.unwrap();
        let started_at = store.crawl("job").await.unwrap().unwrap().started_at;

        store.start("job", "second").await.unwrap();
        let stats = store.crawl("job").await.unwrap().unwrap();
        assert_eq!(stats.name.as_deref(), Some("second"));
        assert_eq!(stats.total, 4);
        assert_eq!(stats.started_at, started_at);
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryStatisticsStore::new());
        let mut tasks = Vec::new();
        for worker in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..250 {
                    store.increase_success("job").await.unwrap();
                    store
                        .increase_agent_success(&format!("agent-{}", worker % 2), 10)
                        .await
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.crawl("job").await.unwrap().unwrap().success, 2000);
        let agents = store.agents().await.unwrap();
        assert_eq!(agents.len(), 2);
        assert!(agents.iter().all(|a| a.success == 1000 && a.elapsed_ms == 10_000));
    }

    #[tokio::test]
    async fn crawls_are_paged() {
        let store = MemoryStatisticsStore::new();
        for owner in ["a", "b", "c"] {
            store.increase_total(owner, 1).await.unwrap();
        }
        assert_eq!(store.crawls(0, 2).await.unwrap().len(), 2);
        assert_eq!(store.crawls(2, 2).await.unwrap().len(), 1);
        assert!(store.crawls(5, 2).await.unwrap().is_empty());
    }
}
