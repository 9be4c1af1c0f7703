//! In-process broker
//!
//! Topics fan out every published message to each attached subscription.
//! A subscription is a FIFO queue shared by all of its receivers (competing
//! consumers), and tracks which deliveries are still waiting for an ACK.
//!
//! The state sits behind a single lock that is never held across an await;
//! receivers wait on the per-subscription queue instead.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::topic::Topic;
use super::{
    Acker, BrokerClient, BrokerError, BrokerResult, Delivery, DeliveryStream, SubscriptionHandle,
    SubscriptionOptions, TopicInfo,
};

#[derive(Debug, Clone)]
struct QueuedMessage {
    message_id: String,
    data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub message_id: String,
    pub delivered_at: i64,
}

/// Delivery accounting for one subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    pub pending_acks: usize,
    pub acked: u64,
}

#[derive(Debug)]
struct Subscription {
    topic: String,
    options: SubscriptionOptions,
    sender: mpsc::UnboundedSender<QueuedMessage>,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<QueuedMessage>>>,
    pending_acks: HashMap<String, PendingMessage>,
    acked: u64,
}

#[derive(Debug, Default)]
struct State {
    topics: HashMap<String, Topic>,
    subscriptions: HashMap<String, Subscription>,
}

#[derive(Debug)]
struct Inner {
    project_id: String,
    state: Mutex<State>,
    next_id: AtomicU64,
}

impl Inner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl Acker for Inner {
    async fn ack(&self, subscription: &str, ack_id: &str) {
        let mut state = self.state.lock();
        let Some(sub) = state.subscriptions.get_mut(subscription) else {
            warn!(subscription, ack_id, "ack for unknown subscription");
            return;
        };
        if sub.pending_acks.remove(ack_id).is_some() {
            sub.acked += 1;
        } else {
            debug!(subscription, ack_id, "ack for unknown ack id");
        }
    }
}

/// Cheap to clone; clones share the same broker.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new("local-project")
    }
}

impl MemoryBroker {
    pub fn new(project_id: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                project_id: project_id.to_string(),
                state: Mutex::new(State::default()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    fn topic_info(&self, topic: &str) -> TopicInfo {
        TopicInfo {
            id: topic.to_string(),
            name: format!("projects/{}/topics/{}", self.inner.project_id, topic),
        }
    }

    /// Number of subscriptions that exist on the broker.
    pub fn subscription_count(&self) -> usize {
        self.inner.state.lock().subscriptions.len()
    }

    pub fn subscription_options(&self, name: &str) -> Option<SubscriptionOptions> {
        self.inner
            .state
            .lock()
            .subscriptions
            .get(name)
            .map(|sub| sub.options)
    }

    pub fn subscription_stats(&self, name: &str) -> Option<SubscriptionStats> {
        self.inner
            .state
            .lock()
            .subscriptions
            .get(name)
            .map(|sub| SubscriptionStats {
                pending_acks: sub.pending_acks.len(),
                acked: sub.acked,
            })
    }

    /// Removes a subscription. Receive streams on it end once they have
    /// drained what was already queued.
    pub fn delete_subscription(&self, name: &str) -> BrokerResult<()> {
        let mut state = self.inner.state.lock();
        let sub = state
            .subscriptions
            .remove(name)
            .ok_or_else(|| BrokerError::SubscriptionNotFound(name.to_string()))?;
        if let Some(topic) = state.topics.get_mut(&sub.topic) {
            topic.detach(name);
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    async fn create_topic(&self, topic: &str) -> BrokerResult<TopicInfo> {
        if topic.is_empty() {
            return Err(BrokerError::Rejected("topic name must not be empty".into()));
        }
        let mut state = self.inner.state.lock();
        if state.topics.contains_key(topic) {
            return Err(BrokerError::TopicExists(topic.to_string()));
        }
        state.topics.insert(topic.to_string(), Topic::new(topic));
        Ok(self.topic_info(topic))
    }

    async fn list_topics(&self) -> BrokerResult<Vec<TopicInfo>> {
        let state = self.inner.state.lock();
        let mut names: Vec<&String> = state.topics.keys().collect();
        names.sort();
        Ok(names.into_iter().map(|name| self.topic_info(name)).collect())
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> BrokerResult<String> {
        let state = self.inner.state.lock();
        let topic = state
            .topics
            .get(topic)
            .ok_or_else(|| BrokerError::TopicNotFound(topic.to_string()))?;

        let message_id = self.inner.next_id().to_string();
        let queued = QueuedMessage {
            message_id: message_id.clone(),
            data,
        };

        for sub_name in &topic.subscriptions {
            match state.subscriptions.get(sub_name) {
                Some(sub) => {
                    if sub.sender.send(queued.clone()).is_err() {
                        warn!(
                            topic = %topic.name,
                            subscription = %sub_name,
                            "subscription queue closed"
                        );
                    }
                }
                None => warn!(
                    topic = %topic.name,
                    subscription = %sub_name,
                    "topic references missing subscription"
                ),
            }
        }

        Ok(message_id)
    }

    async fn create_subscription_if_absent(
        &self,
        topic: &str,
        name: &str,
        options: &SubscriptionOptions,
    ) -> BrokerResult<SubscriptionHandle> {
        let mut state = self.inner.state.lock();
        if !state.topics.contains_key(topic) {
            return Err(BrokerError::TopicNotFound(topic.to_string()));
        }

        if let Some(existing) = state.subscriptions.get(name) {
            return Ok(SubscriptionHandle {
                name: name.to_string(),
                topic: existing.topic.clone(),
            });
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        state.subscriptions.insert(
            name.to_string(),
            Subscription {
                topic: topic.to_string(),
                options: *options,
                sender,
                receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
                pending_acks: HashMap::new(),
                acked: 0,
            },
        );
        if let Some(t) = state.topics.get_mut(topic) {
            t.attach(name);
        }

        Ok(SubscriptionHandle {
            name: name.to_string(),
            topic: topic.to_string(),
        })
    }

    async fn receive(&self, subscription: &SubscriptionHandle) -> BrokerResult<DeliveryStream> {
        let receiver = {
            let state = self.inner.state.lock();
            state
                .subscriptions
                .get(&subscription.name)
                .map(|sub| sub.receiver.clone())
                .ok_or_else(|| BrokerError::SubscriptionNotFound(subscription.name.clone()))?
        };

        let inner = self.inner.clone();
        let name = subscription.name.clone();

        let deliveries = stream::unfold(
            (receiver, inner, name),
            |(receiver, inner, name)| async move {
                let next = receiver.lock().await.recv().await;
                let queued = next?;

                let ack_id = format!("{}-{}", name, inner.next_id());
                {
                    let mut state = inner.state.lock();
                    if let Some(sub) = state.subscriptions.get_mut(&name) {
                        sub.pending_acks.insert(
                            ack_id.clone(),
                            PendingMessage {
                                message_id: queued.message_id.clone(),
                                delivered_at: chrono::Utc::now().timestamp_millis(),
                            },
                        );
                    }
                }

                let acker: Arc<dyn Acker> = inner.clone();
                let delivery = Delivery::new(
                    queued.message_id,
                    queued.data,
                    name.clone(),
                    ack_id,
                    acker,
                );
                Some((Ok(delivery), (receiver, inner, name)))
            },
        );

        Ok(Box::pin(deliveries))
    }
}
