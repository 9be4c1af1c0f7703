use std::sync::Arc;

use tracing::info;

use super::listener::TopicListener;
use super::registry::{RegistryEntry, RegistryError, SubscriptionRegistry};
use crate::broker::{BrokerClient, SubscriptionOptions, subscription_name};

/// Wires the broker client to the registry: watching a topic provisions the
/// broker-side subscription, opens a listener on it and registers the
/// result, all under the registry's per-topic exclusivity.
pub struct IngestPipeline {
    client: Arc<dyn BrokerClient>,
    registry: Arc<SubscriptionRegistry>,
    subscription_suffix: String,
}

impl IngestPipeline {
    pub fn new(
        client: Arc<dyn BrokerClient>,
        registry: Arc<SubscriptionRegistry>,
        subscription_suffix: &str,
    ) -> Self {
        Self {
            client,
            registry,
            subscription_suffix: subscription_suffix.to_string(),
        }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn client(&self) -> &Arc<dyn BrokerClient> {
        &self.client
    }

    /// Idempotent: an already watched topic returns its existing entry and
    /// `false`, and `options` are ignored.
    pub async fn watch(
        &self,
        topic: &str,
        options: SubscriptionOptions,
    ) -> Result<(Arc<RegistryEntry>, bool), RegistryError> {
        let client = self.client.clone();
        let name = subscription_name(topic, &self.subscription_suffix);

        self.registry
            .register_or_get(topic, |buffer, cancel| async move {
                info!(topic, subscription = %name, "creating subscription");
                let handle = client
                    .create_subscription_if_absent(topic, &name, &options)
                    .await?;
                TopicListener::open(client.as_ref(), handle, buffer, cancel).await
            })
            .await
    }
}
