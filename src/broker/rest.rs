//! Pub/Sub REST client
//!
//! Talks to the `v1` REST surface of Google Cloud Pub/Sub. Point `endpoint`
//! at the emulator (`http://localhost:8085`) for local work, or at
//! `https://pubsub.googleapis.com` together with an `access_token`.
//!
//! Receiving is pull based: the stream pulls batches, idles for
//! `pull_interval` after an empty or timed-out pull, and retries failed
//! pulls with a doubling backoff. After `max_pull_failures` consecutive
//! failures it yields the last error and ends.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::stream;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    Acker, BrokerClient, BrokerError, BrokerResult, Delivery, DeliveryStream, SubscriptionHandle,
    SubscriptionOptions, TopicInfo,
};
use crate::config::BrokerSettings;

const MAX_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RestBrokerConfig {
    pub endpoint: String,
    pub project_id: String,
    pub access_token: Option<String>,
    pub request_timeout: Duration,
    pub pull_max_messages: u32,
    pub pull_interval: Duration,
    pub max_pull_failures: u32,
}

impl From<&BrokerSettings> for RestBrokerConfig {
    fn from(settings: &BrokerSettings) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            project_id: settings.project_id.clone(),
            access_token: settings.access_token.clone(),
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
            pull_max_messages: settings.pull_max_messages.max(1),
            pull_interval: Duration::from_millis(settings.pull_interval_ms),
            max_pull_failures: settings.max_pull_failures.max(1),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TopicResource {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListTopicsResponse {
    #[serde(default)]
    topics: Vec<TopicResource>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct PublishRequest {
    messages: Vec<OutgoingMessage>,
}

#[derive(Debug, Serialize)]
struct OutgoingMessage {
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionRequest {
    topic: String,
    enable_message_ordering: bool,
}

#[derive(Debug, Deserialize)]
struct SubscriptionResource {
    topic: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PullResponse {
    #[serde(default)]
    pub(crate) received_messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReceivedMessage {
    pub(crate) ack_id: String,
    pub(crate) message: PubsubMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PubsubMessage {
    #[serde(default)]
    pub(crate) data: Option<String>,
    #[serde(default)]
    pub(crate) message_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest<'a> {
    ack_ids: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct Empty {}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

/// Short name of a fully qualified resource (`projects/p/topics/t` → `t`).
pub(crate) fn short_name(resource: &str) -> &str {
    resource.rsplit('/').next().unwrap_or(resource)
}

/// Extracts the human readable message from a Pub/Sub error body.
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

fn rejected(status: StatusCode, message: String) -> BrokerError {
    BrokerError::Rejected(format!("{status}: {message}"))
}

/// Turns one pull batch into deliveries acknowledged through `acker`.
///
/// A payload that is not valid base64 is handed on as an empty body so that
/// it is still acknowledged downstream.
pub(crate) fn deliveries_from_pull(
    response: PullResponse,
    subscription: &str,
    acker: &Arc<dyn Acker>,
) -> Vec<Delivery> {
    response
        .received_messages
        .into_iter()
        .map(|received| {
            let data = match received.message.data.as_deref() {
                Some(encoded) => STANDARD.decode(encoded).unwrap_or_else(|e| {
                    warn!(
                        subscription,
                        message_id = %received.message.message_id,
                        error = %e,
                        "payload is not valid base64"
                    );
                    Vec::new()
                }),
                None => Vec::new(),
            };
            Delivery::new(
                received.message.message_id,
                data,
                subscription.to_string(),
                received.ack_id,
                acker.clone(),
            )
        })
        .collect()
}

#[derive(Debug)]
struct RestInner {
    http: reqwest::Client,
    config: RestBrokerConfig,
}

impl RestInner {
    pub(crate) fn url(&self, path: &str) -> String {
        format!(
            "{}/v1/projects/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.project_id,
            path
        )
    }

    fn topic_resource(&self, topic: &str) -> String {
        format!("projects/{}/topics/{}", self.config.project_id, topic)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match &self.config.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn call<T, F>(&self, request: RequestBuilder, on_error: F) -> BrokerResult<T>
    where
        T: DeserializeOwned,
        F: FnOnce(StatusCode, String) -> BrokerError,
    {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| BrokerError::Protocol(e.to_string()));
        }
        let body = response.text().await.unwrap_or_default();
        Err(on_error(status, error_message(&body)))
    }

    async fn pull(&self, subscription: &str) -> BrokerResult<PullResponse> {
        let request = self
            .request(Method::POST, &format!("subscriptions/{subscription}:pull"))
            .json(&PullRequest {
                max_messages: self.config.pull_max_messages,
            });
        self.call(request, |status, message| match status {
            StatusCode::NOT_FOUND => BrokerError::SubscriptionNotFound(subscription.to_string()),
            _ => rejected(status, message),
        })
        .await
    }

    async fn get_subscription(&self, name: &str) -> BrokerResult<SubscriptionResource> {
        let request = self.request(Method::GET, &format!("subscriptions/{name}"));
        self.call(request, |status, message| match status {
            StatusCode::NOT_FOUND => BrokerError::SubscriptionNotFound(name.to_string()),
            _ => rejected(status, message),
        })
        .await
    }
}

#[async_trait]
impl Acker for RestInner {
    async fn ack(&self, subscription: &str, ack_id: &str) {
        let request = self
            .request(
                Method::POST,
                &format!("subscriptions/{subscription}:acknowledge"),
            )
            .json(&AcknowledgeRequest {
                ack_ids: vec![ack_id],
            });
        if let Err(e) = self.call::<Empty, _>(request, rejected).await {
            warn!(subscription, error = %e, "failed to acknowledge message");
        }
    }
}

/// Cheap to clone; clones share one HTTP connection pool.
#[derive(Debug, Clone)]
pub struct RestBroker {
    inner: Arc<RestInner>,
}

impl RestBroker {
    pub fn new(config: RestBrokerConfig) -> BrokerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            inner: Arc::new(RestInner { http, config }),
        })
    }

    pub fn config(&self) -> &RestBrokerConfig {
        &self.inner.config
    }
}

struct PullState {
    inner: Arc<RestInner>,
    acker: Arc<dyn Acker>,
    subscription: String,
    pending: VecDeque<Delivery>,
    failures: u32,
    exhausted: bool,
}

async fn next_delivery(mut state: PullState) -> Option<(BrokerResult<Delivery>, PullState)> {
    loop {
        if let Some(delivery) = state.pending.pop_front() {
            return Some((Ok(delivery), state));
        }
        if state.exhausted {
            return None;
        }

        match state.inner.pull(&state.subscription).await {
            Ok(batch) if batch.received_messages.is_empty() => {
                state.failures = 0;
                tokio::time::sleep(state.inner.config.pull_interval).await;
            }
            Ok(batch) => {
                state.failures = 0;
                debug!(
                    subscription = %state.subscription,
                    count = batch.received_messages.len(),
                    "pulled messages"
                );
                let deliveries = deliveries_from_pull(batch, &state.subscription, &state.acker);
                state.pending.extend(deliveries);
            }
            // The broker holds an idle pull open; running out the clock
            // means nothing arrived, not that the connection is gone.
            Err(BrokerError::Transport(e)) if e.is_timeout() => {
                state.failures = 0;
                debug!(subscription = %state.subscription, "pull timed out while idle");
                tokio::time::sleep(state.inner.config.pull_interval).await;
            }
            Err(e) => {
                state.failures += 1;
                if state.failures >= state.inner.config.max_pull_failures {
                    state.exhausted = true;
                    return Some((Err(e), state));
                }
                let backoff = Duration::from_millis(250)
                    .saturating_mul(1 << state.failures.min(5))
                    .min(MAX_BACKOFF);
                warn!(
                    subscription = %state.subscription,
                    attempt = state.failures,
                    error = %e,
                    "pull failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

#[async_trait]
impl BrokerClient for RestBroker {
    async fn create_topic(&self, topic: &str) -> BrokerResult<TopicInfo> {
        let request = self
            .inner
            .request(Method::PUT, &format!("topics/{topic}"))
            .json(&serde_json::json!({}));
        let created: TopicResource = self
            .inner
            .call(request, |status, message| match status {
                StatusCode::CONFLICT => BrokerError::TopicExists(topic.to_string()),
                _ => rejected(status, message),
            })
            .await?;
        Ok(TopicInfo {
            id: short_name(&created.name).to_string(),
            name: created.name,
        })
    }

    async fn list_topics(&self) -> BrokerResult<Vec<TopicInfo>> {
        let mut topics = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.inner.request(Method::GET, "topics");
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: ListTopicsResponse = self.inner.call(request, rejected).await?;

            topics.extend(page.topics.into_iter().map(|t| TopicInfo {
                id: short_name(&t.name).to_string(),
                name: t.name,
            }));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(topics)
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> BrokerResult<String> {
        let request = self
            .inner
            .request(Method::POST, &format!("topics/{topic}:publish"))
            .json(&PublishRequest {
                messages: vec![OutgoingMessage {
                    data: STANDARD.encode(data),
                }],
            });
        let response: PublishResponse = self
            .inner
            .call(request, |status, message| match status {
                StatusCode::NOT_FOUND => BrokerError::TopicNotFound(topic.to_string()),
                _ => rejected(status, message),
            })
            .await?;
        response
            .message_ids
            .into_iter()
            .next()
            .ok_or_else(|| BrokerError::Protocol("publish returned no message id".into()))
    }

    async fn create_subscription_if_absent(
        &self,
        topic: &str,
        name: &str,
        options: &SubscriptionOptions,
    ) -> BrokerResult<SubscriptionHandle> {
        let request = self
            .inner
            .request(Method::PUT, &format!("subscriptions/{name}"))
            .json(&SubscriptionRequest {
                topic: self.inner.topic_resource(topic),
                enable_message_ordering: options.enable_message_ordering,
            });

        let created = self
            .inner
            .call::<SubscriptionResource, _>(request, |status, message| match status {
                StatusCode::NOT_FOUND => BrokerError::TopicNotFound(topic.to_string()),
                StatusCode::CONFLICT => BrokerError::SubscriptionExists(name.to_string()),
                _ => rejected(status, message),
            })
            .await;

        let resource = match created {
            Ok(resource) => resource,
            Err(BrokerError::SubscriptionExists(_)) => {
                debug!(subscription = name, "subscription already exists, reusing");
                self.inner.get_subscription(name).await?
            }
            Err(e) => return Err(e),
        };

        Ok(SubscriptionHandle {
            name: name.to_string(),
            topic: short_name(&resource.topic).to_string(),
        })
    }

    async fn receive(&self, subscription: &SubscriptionHandle) -> BrokerResult<DeliveryStream> {
        // Fail at startup rather than inside the stream when the subscription is gone.
        self.inner.get_subscription(&subscription.name).await?;

        let acker: Arc<dyn Acker> = self.inner.clone();
        let state = PullState {
            inner: self.inner.clone(),
            acker,
            subscription: subscription.name.clone(),
            pending: VecDeque::new(),
            failures: 0,
            exhausted: false,
        };

        Ok(Box::pin(stream::unfold(state, next_delivery)))
    }
}

#[cfg(test)]
impl RestBroker {
    pub(crate) fn url_for(&self, path: &str) -> String {
        self.inner.url(path)
    }
}
