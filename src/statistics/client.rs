use super::event::{StatisticsEvent, StatisticsMessage};
use crate::bus::{MessageBus, STATISTICS_TOPIC};
use crate::error::Result;
use std::sync::Arc;

/// Publishes statistics events onto the bus.
#[derive(Clone)]
pub struct StatisticsClient {
    bus: Arc<dyn MessageBus>,
}

impl StatisticsClient {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }

    pub async fn increase_total(&self, owner: &str, count: u64) -> Result<()> {
        self.publish(StatisticsEvent::Total {
            owner: owner.to_string(),
            count,
        })
        .await
    }

    pub async fn increase_success(&self, owner: &str) -> Result<()> {
        self.publish(StatisticsEvent::Success {
            owner: owner.to_string(),
        })
        .await
    }

    pub async fn increase_failure(&self, owner: &str) -> Result<()> {
        self.publish(StatisticsEvent::Failure {
            owner: owner.to_string(),
        })
        .await
    }

    pub async fn start(&self, owner: &str, name: &str) -> Result<()> {
        self.publish(StatisticsEvent::Start {
            owner: owner.to_string(),
            name: name.to_string(),
        })
        .await
    }

    pub async fn exit(&self, owner: &str) -> Result<()> {
        self.publish(StatisticsEvent::Exit {
            owner: owner.to_string(),
        })
        .await
    }

    pub async fn register_agent(&self, agent_id: &str, agent_name: &str) -> Result<()> {
        self.publish(StatisticsEvent::RegisterAgent {
            agent_id: agent_id.to_string(),
            agent_name: agent_name.to_string(),
        })
        .await
    }

    pub async fn increase_agent_success(&self, agent_id: &str, elapsed_ms: u64) -> Result<()> {
        self.publish(StatisticsEvent::AgentSuccess {
            agent_id: agent_id.to_string(),
            elapsed_ms,
        })
        .await
    }

    pub async fn increase_agent_failure(&self, agent_id: &str, elapsed_ms: u64) -> Result<()> {
        self.publish(StatisticsEvent::AgentFailure {
            agent_id: agent_id.to_string(),
            elapsed_ms,
        })
        .await
    }

    pub async fn print(&self, owner: &str) -> Result<()> {
        self.publish(StatisticsEvent::Print {
            owner: owner.to_string(),
        })
        .await
    }

    pub async fn publish(&self, event: StatisticsEvent) -> Result<()> {
        let payload = StatisticsMessage::new(event).encode()?;
        self.bus.publish(STATISTICS_TOPIC, payload).await
    }
}
