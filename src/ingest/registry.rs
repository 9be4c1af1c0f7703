//! Subscription registry
//!
//! Maps a topic to its single registry entry. Each topic owns a
//! `OnceCell`, so concurrent registrations for one topic serialize on that
//! cell while other topics proceed independently. A failed provisioning
//! installs nothing: the empty cell is dropped unless a waiter is about to
//! retry it.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};
use uuid::Uuid;

use super::buffer::MessageBuffer;
use super::listener::{ListenerHandle, TopicListener};
use crate::broker::{BrokerError, SubscriptionHandle};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to provision subscription for topic {topic}: {source}")]
    Provision {
        topic: String,
        #[source]
        source: BrokerError,
    },
    #[error("registry is shutting down")]
    ShuttingDown,
}

/// Process-unique identity of a registration, sortable by creation time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
pub struct RegistryEntry {
    id: SubscriptionId,
    topic: String,
    subscription: SubscriptionHandle,
    buffer: Arc<MessageBuffer>,
    listener: ListenerHandle,
}

impl RegistryEntry {
    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn subscription(&self) -> &SubscriptionHandle {
        &self.subscription
    }

    pub fn buffer(&self) -> &Arc<MessageBuffer> {
        &self.buffer
    }

    pub fn listener(&self) -> &ListenerHandle {
        &self.listener
    }
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: DashMap<String, Arc<OnceCell<Arc<RegistryEntry>>>>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, topic: &str) -> Option<Arc<RegistryEntry>> {
        self.entries
            .get(topic)
            .and_then(|cell| cell.get().cloned())
    }

    /// Returns the entry for `topic`, provisioning it first if there is none.
    ///
    /// `provision` receives the fresh buffer and the listener's stop token and
    /// must hand back an opened listener. It runs at most once per topic at a
    /// time; on success the listener is spawned and the entry installed. The
    /// boolean is `true` only for the call that created the entry.
    pub async fn register_or_get<F, Fut>(
        &self,
        topic: &str,
        provision: F,
    ) -> Result<(Arc<RegistryEntry>, bool), RegistryError>
    where
        F: FnOnce(Arc<MessageBuffer>, CancellationToken) -> Fut,
        Fut: Future<Output = Result<TopicListener, BrokerError>>,
    {
        if let Some(entry) = self.lookup(topic) {
            return Ok((entry, false));
        }
        if self.shutdown.is_cancelled() {
            return Err(RegistryError::ShuttingDown);
        }

        let cell = self.entries.entry(topic.to_string()).or_default().clone();

        let mut created = false;
        let created_flag = &mut created;
        let result = cell
            .get_or_try_init(|| async move {
                let buffer = Arc::new(MessageBuffer::new(topic));
                let cancel = self.shutdown.child_token();

                let listener = provision(buffer.clone(), cancel.clone())
                    .await
                    .map_err(|source| RegistryError::Provision {
                        topic: topic.to_string(),
                        source,
                    })?;

                let subscription = listener.subscription().clone();
                let task = self.tasks.spawn(listener.run());
                let entry = RegistryEntry {
                    id: SubscriptionId::generate(),
                    topic: topic.to_string(),
                    subscription,
                    buffer,
                    listener: ListenerHandle::new(cancel, task),
                };
                info!(topic, sub_id = %entry.id, subscription = %entry.subscription.name, "registered subscription");
                *created_flag = true;
                Ok::<_, RegistryError>(Arc::new(entry))
            })
            .await;

        let entry = match result {
            Ok(entry) => entry.clone(),
            Err(e) => {
                self.discard_empty_slot(topic, &cell);
                return Err(e);
            }
        };

        if !created {
            debug!(topic, sub_id = %entry.id, "subscription already registered");
        }
        Ok((entry, created))
    }

    /// Drops the slot for `topic` after a failed provision, unless another
    /// caller is still waiting on the same cell and will retry it.
    fn discard_empty_slot(&self, topic: &str, cell: &Arc<OnceCell<Arc<RegistryEntry>>>) {
        // Map and `cell` hold one reference each; any more is a waiter.
        let removed = self.entries.remove_if(topic, |_, slot| {
            Arc::ptr_eq(slot, cell) && !slot.initialized() && Arc::strong_count(slot) == 2
        });
        if removed.is_some() {
            debug!(topic, "discarded slot after failed provisioning");
        }
    }

    #[cfg(test)]
    pub(crate) fn slot_count(&self) -> usize {
        self.entries.len()
    }

    /// Every installed entry, ordered by identity (creation order).
    pub fn entries(&self) -> Vec<Arc<RegistryEntry>> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .filter_map(|cell| cell.value().get().cloned())
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|cell| cell.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops every listener and waits for them to exit. Further
    /// registrations are refused; existing entries stay readable.
    pub async fn shutdown(&self) {
        info!(listeners = self.len(), "stopping listeners");
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}
