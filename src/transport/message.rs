use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::broker::TopicInfo;
use crate::ingest::RegistryEntry;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTopicRequest {
    pub topic_name: String,
}

/// Serialized as `{"ID": ...}`, the shape existing UI clients read.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTopicResponse {
    #[serde(rename = "ID")]
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TopicModel {
    pub display_name: String,
    pub id: String,
}

impl From<TopicInfo> for TopicModel {
    fn from(topic: TopicInfo) -> Self {
        Self {
            display_name: topic.id,
            id: topic.name,
        }
    }
}

/// Body of a publish: `payload` is any JSON value and is published as its
/// JSON encoding.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubscribeRequest {
    #[serde(default)]
    pub enable_message_ordering: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LocationResponse {
    pub location: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubscriptionStatus {
    pub topic: String,
    pub id: String,
    pub subscription: String,
    pub count: usize,
    pub running: bool,
}

impl From<&RegistryEntry> for SubscriptionStatus {
    fn from(entry: &RegistryEntry) -> Self {
        Self {
            topic: entry.topic().to_string(),
            id: entry.id().to_string(),
            subscription: entry.subscription().name.clone(),
            count: entry.buffer().count(),
            running: entry.listener().is_running(),
        }
    }
}

pub fn subscription_location(topic: &str, id: &str) -> String {
    format!("/topics/{topic}/subscriptions/{id}")
}
