use super::event::{StatisticsEvent, StatisticsMessage};
use super::store::StatisticsStore;
use crate::bus::{Message, MessageBus, MessageHandler, Subscription, STATISTICS_TOPIC};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Folds statistics events into a store.
///
/// Late events are applied as they come: an `Exit` does not close the
/// counters, and duplicates delivered by the bus are counted again.
pub struct StatisticsAggregator {
    store: Arc<dyn StatisticsStore>,
}

impl StatisticsAggregator {
    pub fn new(store: Arc<dyn StatisticsStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn StatisticsStore> {
        self.store.clone()
    }

    pub async fn apply(&self, event: &StatisticsEvent) -> Result<()> {
        match event {
            StatisticsEvent::Total { owner, count } => self.store.increase_total(owner, *count).await,
            StatisticsEvent::Success { owner } => self.store.increase_success(owner).await,
            StatisticsEvent::Failure { owner } => self.store.increase_failure(owner).await,
            StatisticsEvent::Start { owner, name } => {
                log::info!("Crawl {} ({}) started", owner, name);
                self.store.start(owner, name).await
            }
            StatisticsEvent::Exit { owner } => {
                log::info!("Crawl {} exited", owner);
                self.store.exit(owner).await
            }
            StatisticsEvent::RegisterAgent { agent_id, agent_name } => {
                log::info!("Agent {} registered as {}", agent_id, agent_name);
                self.store.register_agent(agent_id, agent_name).await
            }
            StatisticsEvent::AgentSuccess { agent_id, elapsed_ms } => {
                self.store.increase_agent_success(agent_id, *elapsed_ms).await
            }
            StatisticsEvent::AgentFailure { agent_id, elapsed_ms } => {
                self.store.increase_agent_failure(agent_id, *elapsed_ms).await
            }
            StatisticsEvent::Print { owner } => self.print(owner).await,
        }
    }

    async fn print(&self, owner: &str) -> Result<()> {
        match self.store.crawl(owner).await? {
            Some(stats) => log::info!(
                "Crawl {}: total {}, success {}, failure {}, left {}",
                stats.name.as_deref().unwrap_or(owner),
                stats.total,
                stats.success,
                stats.failure,
                stats.left()
            ),
            None => log::info!("Crawl {}: no statistics yet", owner),
        }
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for StatisticsAggregator {
    async fn handle(&self, message: &Message) -> Result<()> {
        let decoded = StatisticsMessage::decode(&message.payload)?;
        log::trace!("Statistics event {:?} from {}", decoded.event, decoded.timestamp);
        self.apply(&decoded.event).await.map_err(|e| {
            log::error!(
                "Cannot apply statistics for {}: {}",
                decoded.event.owner().unwrap_or("agent"),
                e
            );
            e
        })
    }
}

/// The aggregator bound to the statistics topic of a bus.
pub struct StatisticsService {
    aggregator: Arc<StatisticsAggregator>,
    subscription: Mutex<Option<Subscription>>,
}

impl StatisticsService {
    pub async fn start(bus: &dyn MessageBus, store: Arc<dyn StatisticsStore>) -> Result<Self> {
        let aggregator = Arc::new(StatisticsAggregator::new(store));
        let subscription = bus.subscribe(STATISTICS_TOPIC, aggregator.clone()).await?;
        log::info!(
            "Statistics service listening on {} (subscription {})",
            subscription.topic(),
            subscription.id()
        );

        Ok(Self {
            aggregator,
            subscription: Mutex::new(Some(subscription)),
        })
    }

    pub fn store(&self) -> Arc<dyn StatisticsStore> {
        self.aggregator.store()
    }

    pub async fn is_running(&self) -> bool {
        self.subscription.lock().await.is_some()
    }

    /// Unsubscribes after every already-delivered message was applied.
    pub async fn stop(&self) {
        let subscription = self.subscription.lock().await.take();
        if let Some(subscription) = subscription {
            let id = subscription.id();
            subscription.unsubscribe().await;
            log::info!("Statistics service stopped (subscription {})", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcessBus;
    use crate::statistics::client::StatisticsClient;
    use crate::statistics::store::MemoryStatisticsStore;

    async fn running() -> (Arc<InProcessBus>, StatisticsService, StatisticsClient) {
        let bus = Arc::new(InProcessBus::new(0));
        let store: Arc<dyn StatisticsStore> = Arc::new(MemoryStatisticsStore::new());
        let service = StatisticsService::start(bus.as_ref(), store).await.unwrap();
        let client = StatisticsClient::new(bus.clone());
        (bus, service, client)
    }

    #[tokio::test]
    async fn folds_counts_for_an_owner() {
        let (_bus, service, client) = running().await;
        client.increase_total("job1", 10).await.unwrap();
        for _ in 0..3 {
            client.increase_success("job1").await.unwrap();
        }
        for _ in 0..2 {
            client.increase_failure("job1").await.unwrap();
        }
        service.stop().await;

        let stats = service.store().crawl("job1").await.unwrap().unwrap();
        assert_eq!((stats.total, stats.success, stats.failure), (10, 3, 2));
        assert_eq!(stats.left(), 5);
    }

    #[tokio::test]
    async fn events_after_exit_still_count() {
        let (_bus, service, client) = running().await;
        client.start("job", "demo").await.unwrap();
        client.exit("job").await.unwrap();
        client.increase_success("job").await.unwrap();
        client.print("job").await.unwrap();
        service.stop().await;

        let stats = service.store().crawl("job").await.unwrap().unwrap();
        assert_eq!(stats.success, 1);
        assert!(stats.exited_at.is_some());
    }

    #[tokio::test]
    async fn print_does_not_touch_the_store() {
        let (_bus, service, client) = running().await;
        client.print("ghost").await.unwrap();
        service.stop().await;
        assert!(service.store().crawl("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn undecodable_payload_is_reported_not_fatal() {
        let (bus, service, client) = running().await;
        let mut failures = bus.failures();

        bus.publish(STATISTICS_TOPIC, b"not json".to_vec()).await.unwrap();
        client.increase_total("job", 1).await.unwrap();
        service.stop().await;

        let failure = failures.try_recv().expect("decode failure reported");
        assert_eq!(failure.topic, STATISTICS_TOPIC);
        assert_eq!(service.store().crawl("job").await.unwrap().unwrap().total, 1);
        assert!(!service.is_running().await);
    }

    #[tokio::test]
    async fn agent_events_build_agent_records() {
        let (_bus, service, client) = running().await;
        client.register_agent("a1", "worker").await.unwrap();
        client.increase_agent_success("a1", 30).await.unwrap();
        client.increase_agent_failure("a1", 50).await.unwrap();
        service.stop().await;

        let agent = service.store().agent("a1").await.unwrap().unwrap();
        assert_eq!(agent.agent_name.as_deref(), Some("worker"));
        assert_eq!(agent.average_latency_ms(), 40);
    }
}
