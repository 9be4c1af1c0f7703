//! The `broker` module is the seam between the service and the external
//! publish/subscribe broker.
//!
//! `BrokerClient` is everything the rest of the crate needs from a broker:
//! topic administration, publishing, idempotent subscription provisioning and
//! a pull-style receive stream whose deliveries are acknowledged explicitly.
//!
//! Two implementations ship with the crate:
//! - `memory`: an in-process broker, used by default and by the tests.
//! - `rest`: the Pub/Sub REST API, usable against the emulator or the hosted
//!   service.

pub mod memory;
pub mod rest;
mod topic;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::Serialize;
use thiserror::Error;

use crate::config::{BrokerBackend, BrokerSettings};

pub use memory::MemoryBroker;
pub use rest::{RestBroker, RestBrokerConfig};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("topic not found: {0}")]
    TopicNotFound(String),
    #[error("topic already exists: {0}")]
    TopicExists(String),
    #[error("subscription already exists: {0}")]
    SubscriptionExists(String),
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),
    #[error("broker rejected request: {0}")]
    Rejected(String),
    #[error("broker transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed broker response: {0}")]
    Protocol(String),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// A topic as reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicInfo {
    /// Short topic name, e.g. `orders`.
    pub id: String,
    /// Fully qualified name, e.g. `projects/p/topics/orders`.
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionOptions {
    pub enable_message_ordering: bool,
}

/// A broker-side subscription the service can receive from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub name: String,
    pub topic: String,
}

/// Derives the broker-side subscription name for `topic`.
pub fn subscription_name(topic: &str, suffix: &str) -> String {
    format!("{topic}-{suffix}")
}

/// Acknowledges deliveries on behalf of a backend.
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self, subscription: &str, ack_id: &str);
}

/// One message handed out by a receive stream.
///
/// Dropping a delivery without calling `ack` leaves it outstanding on the
/// broker.
pub struct Delivery {
    pub message_id: String,
    pub data: Vec<u8>,
    subscription: String,
    ack_id: String,
    acker: Arc<dyn Acker>,
}

impl Delivery {
    pub fn new(
        message_id: String,
        data: Vec<u8>,
        subscription: String,
        ack_id: String,
        acker: Arc<dyn Acker>,
    ) -> Self {
        Self {
            message_id,
            data,
            subscription,
            ack_id,
            acker,
        }
    }

    pub async fn ack(self) {
        self.acker.ack(&self.subscription, &self.ack_id).await;
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message_id", &self.message_id)
            .field("subscription", &self.subscription)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Deliveries for one subscription. An `Err` item or the end of the stream
/// means the subscription is lost for this receiver.
pub type DeliveryStream = BoxStream<'static, BrokerResult<Delivery>>;

#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn create_topic(&self, topic: &str) -> BrokerResult<TopicInfo>;

    async fn list_topics(&self) -> BrokerResult<Vec<TopicInfo>>;

    /// Publishes raw bytes and returns the broker-assigned message id.
    async fn publish(&self, topic: &str, data: Vec<u8>) -> BrokerResult<String>;

    /// Creates `name` on `topic`, or returns the existing subscription of that name.
    async fn create_subscription_if_absent(
        &self,
        topic: &str,
        name: &str,
        options: &SubscriptionOptions,
    ) -> BrokerResult<SubscriptionHandle>;

    async fn receive(&self, subscription: &SubscriptionHandle) -> BrokerResult<DeliveryStream>;
}

/// Builds the configured backend.
pub fn build_broker(settings: &BrokerSettings) -> BrokerResult<Arc<dyn BrokerClient>> {
    match settings.backend {
        BrokerBackend::Memory => Ok(Arc::new(MemoryBroker::new(&settings.project_id))),
        BrokerBackend::Rest => Ok(Arc::new(RestBroker::new(RestBrokerConfig::from(settings))?)),
    }
}

#[cfg(test)]
mod tests;
