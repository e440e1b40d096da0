use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A fact reported by an agent. Events are deltas, never snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatisticsEvent {
    Total { owner: String, count: u64 },
    Success { owner: String },
    Failure { owner: String },
    Start { owner: String, name: String },
    Exit { owner: String },
    RegisterAgent { agent_id: String, agent_name: String },
    AgentSuccess { agent_id: String, elapsed_ms: u64 },
    AgentFailure { agent_id: String, elapsed_ms: u64 },
    Print { owner: String },
}

impl StatisticsEvent {
    /// The crawl an event belongs to; `None` for agent events.
    pub fn owner(&self) -> Option<&str> {
        match self {
            Self::Total { owner, .. }
            | Self::Success { owner }
            | Self::Failure { owner }
            | Self::Start { owner, .. }
            | Self::Exit { owner }
            | Self::Print { owner } => Some(owner),
            Self::RegisterAgent { .. } | Self::AgentSuccess { .. } | Self::AgentFailure { .. } => None,
        }
    }
}

/// Wire envelope on the statistics topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsMessage {
    pub timestamp: DateTime<Utc>,
    pub event: StatisticsEvent,
}

impl StatisticsMessage {
    pub fn new(event: StatisticsEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_is_tagged_json() {
        let message = StatisticsMessage::new(StatisticsEvent::Total {
            owner: "job1".to_string(),
            count: 10,
        });
        let value: serde_json::Value = serde_json::from_slice(&message.encode().unwrap()).unwrap();
        assert_eq!(value["event"]["type"], "total");
        assert_eq!(value["event"]["owner"], "job1");
        assert_eq!(value["event"]["count"], 10);

        let decoded = StatisticsMessage::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn garbage_does_not_decode() {
        assert!(StatisticsMessage::decode(b"{\"event\":{\"type\":\"nope\"}}").is_err());
        assert!(StatisticsMessage::decode(b"\x00\x01").is_err());
    }

    #[test]
    fn agent_events_have_no_owner() {
        let event = StatisticsEvent::AgentSuccess {
            agent_id: "a".to_string(),
            elapsed_ms: 5,
        };
        assert_eq!(event.owner(), None);
        assert_eq!(
            StatisticsEvent::Exit { owner: "job".to_string() }.owner(),
            Some("job")
        );
    }
}
