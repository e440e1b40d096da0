//! Topic-addressed publish/subscribe.
//!
//! The coordination core only relies on the contract below: `publish` hands
//! the payload off without waiting for subscribers, messages from one
//! publisher on one topic reach each subscriber in order, and a failing
//! handler never takes the bus down.

pub mod memory;

pub use memory::InProcessBus;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;

pub const STATISTICS_TOPIC: &str = "Statistics";

#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
    pub published_at: DateTime<Utc>,
}

/// A handler failure, reported once the bus gave up redelivering.
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    pub topic: String,
    pub subscription_id: u64,
    pub attempts: u32,
    pub error: String,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<()>;
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    async fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> Result<Subscription>;
}

/// Live subscription. Dropping it keeps the handler registered; call
/// `unsubscribe` to stop delivery.
pub struct Subscription {
    id: u64,
    topic: String,
    cancel: Option<Box<dyn FnOnce() + Send>>,
    delivery: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(
        id: u64,
        topic: impl Into<String>,
        cancel: Box<dyn FnOnce() + Send>,
        delivery: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            id,
            topic: topic.into(),
            cancel: Some(cancel),
            delivery,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Stops delivery. Messages already handed to this subscription are
    /// processed before this returns.
    pub async fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
        if let Some(delivery) = self.delivery.take() {
            if let Err(e) = delivery.await {
                log::error!("Delivery task for {} ended abnormally: {}", self.topic, e);
            }
        }
    }
}
