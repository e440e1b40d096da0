use super::{DeliveryFailure, Message, MessageBus, MessageHandler, Subscription};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc};

struct Subscriber {
    id: u64,
    sender: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct Topics {
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl Topics {
    fn remove(&self, topic: &str, id: u64) {
        let mut subscribers = self.subscribers.write();
        if let Some(list) = subscribers.get_mut(topic) {
            list.retain(|s| s.id != id);
            if list.is_empty() {
                subscribers.remove(topic);
            }
        }
    }
}

/// Bus living inside one process.
///
/// Each subscription owns an unbounded FIFO channel drained by its own
/// delivery task, so publishing never waits on a handler. A handler error
/// (or panic) triggers up to `max_redeliveries` immediate redeliveries of
/// the same message before the failure is logged and broadcast on
/// `failures()`.
pub struct InProcessBus {
    topics: Arc<Topics>,
    next_id: AtomicU64,
    max_redeliveries: u32,
    failures: broadcast::Sender<DeliveryFailure>,
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new(3)
    }
}

impl InProcessBus {
    pub fn new(max_redeliveries: u32) -> Self {
        let (failures, _) = broadcast::channel(256);
        Self {
            topics: Arc::new(Topics::default()),
            next_id: AtomicU64::new(1),
            max_redeliveries,
            failures,
        }
    }

    pub fn failures(&self) -> broadcast::Receiver<DeliveryFailure> {
        self.failures.subscribe()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .subscribers
            .read()
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageBus for InProcessBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let message = Message {
            topic: topic.to_string(),
            payload,
            published_at: Utc::now(),
        };

        let subscribers = self.topics.subscribers.read();
        match subscribers.get(topic) {
            Some(list) => {
                for subscriber in list {
                    if subscriber.sender.send(message.clone()).is_err() {
                        log::debug!("Subscriber {} on {} is gone", subscriber.id, topic);
                    }
                }
            }
            None => log::trace!("No subscribers on {}", topic),
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> Result<Subscription> {
        if topic.is_empty() {
            return Err(Error::Bus("Topic name must not be empty".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.topics
            .subscribers
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber { id, sender });

        let delivery = tokio::spawn(deliver(
            id,
            receiver,
            handler,
            self.max_redeliveries,
            self.failures.clone(),
        ));

        let topics: Weak<Topics> = Arc::downgrade(&self.topics);
        let owned_topic = topic.to_string();
        let cancel = Box::new(move || {
            if let Some(topics) = topics.upgrade() {
                topics.remove(&owned_topic, id);
            }
        });

        log::debug!("Subscription {} registered on {}", id, topic);
        Ok(Subscription::new(id, topic, cancel, Some(delivery)))
    }
}

async fn deliver(
    subscription_id: u64,
    mut receiver: mpsc::UnboundedReceiver<Message>,
    handler: Arc<dyn MessageHandler>,
    max_redeliveries: u32,
    failures: broadcast::Sender<DeliveryFailure>,
) {
    while let Some(message) = receiver.recv().await {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let outcome = AssertUnwindSafe(handler.handle(&message)).catch_unwind().await;
            let error = match outcome {
                Ok(Ok(())) => break,
                Ok(Err(e)) => e.to_string(),
                Err(_) => "handler panicked".to_string(),
            };

            if attempts <= max_redeliveries {
                log::warn!(
                    "Handler on {} failed (attempt {}): {}; redelivering",
                    message.topic,
                    attempts,
                    error
                );
                continue;
            }

            log::error!(
                "Giving up on message for {} after {} attempts: {}",
                message.topic,
                attempts,
                error
            );
            let _ = failures.send(DeliveryFailure {
                topic: message.topic.clone(),
                subscription_id,
                attempts,
                error,
            });
            break;
        }
    }
    log::trace!("Delivery task {} finished", subscription_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicU32;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, message: &Message) -> Result<()> {
            self.seen.lock().push(message.payload.clone());
            Ok(())
        }
    }

    struct Flaky {
        failures_left: AtomicU32,
        handled: AtomicU32,
    }

    #[async_trait]
    impl MessageHandler for Flaky {
        async fn handle(&self, _message: &Message) -> Result<()> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(Error::Internal("not yet".to_string()));
            }
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Panicking;

    #[async_trait]
    impl MessageHandler for Panicking {
        async fn handle(&self, _message: &Message) -> Result<()> {
            panic!("handler blew up");
        }
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let bus = InProcessBus::default();
        let recorder = Arc::new(Recorder::default());
        let subscription = bus.subscribe("numbers", recorder.clone()).await.unwrap();

        for i in 0..100u8 {
            bus.publish("numbers", vec![i]).await.unwrap();
        }
        bus.publish("other", vec![255]).await.unwrap();
        subscription.unsubscribe().await;

        let seen: Vec<u8> = recorder.seen.lock().iter().map(|p| p[0]).collect();
        assert_eq!(seen, (0..100u8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn every_subscriber_gets_a_copy() {
        let bus = InProcessBus::default();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let a = bus.subscribe("t", first.clone()).await.unwrap();
        let b = bus.subscribe("t", second.clone()).await.unwrap();
        assert_eq!(bus.subscriber_count("t"), 2);

        bus.publish("t", b"hello".to_vec()).await.unwrap();
        a.unsubscribe().await;
        b.unsubscribe().await;

        assert_eq!(first.seen.lock().len(), 1);
        assert_eq!(second.seen.lock().len(), 1);
        assert_eq!(bus.subscriber_count("t"), 0);
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_fine() {
        let bus = InProcessBus::default();
        bus.publish("nobody", vec![1, 2, 3]).await.unwrap();
    }

    #[tokio::test]
    async fn failed_handler_is_redelivered() {
        let bus = InProcessBus::new(3);
        let flaky = Arc::new(Flaky {
            failures_left: AtomicU32::new(2),
            handled: AtomicU32::new(0),
        });
        let mut failures = bus.failures();
        let subscription = bus.subscribe("t", flaky.clone()).await.unwrap();

        bus.publish("t", vec![1]).await.unwrap();
        subscription.unsubscribe().await;

        assert_eq!(flaky.handled.load(Ordering::SeqCst), 1);
        assert!(failures.try_recv().is_err());
    }

    #[tokio::test]
    async fn exhausted_redeliveries_are_reported_and_bus_keeps_going() {
        let bus = InProcessBus::new(1);
        let mut failures = bus.failures();
        let recorder = Arc::new(Recorder::default());
        let broken = bus.subscribe("t", Arc::new(Panicking)).await.unwrap();
        let healthy = bus.subscribe("t", recorder.clone()).await.unwrap();

        bus.publish("t", vec![7]).await.unwrap();
        bus.publish("t", vec![8]).await.unwrap();
        broken.unsubscribe().await;
        healthy.unsubscribe().await;

        let failure = failures.try_recv().expect("failure reported");
        assert_eq!(failure.topic, "t");
        assert_eq!(failure.attempts, 2);
        assert!(failures.try_recv().is_ok());
        assert_eq!(recorder.seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn empty_topic_is_rejected() {
        let bus = InProcessBus::default();
        let result = bus.subscribe("", Arc::new(Recorder::default())).await;
        assert!(matches!(result, Err(Error::Bus(_))));
    }
}
