//! Request handlers. Each one validates its input, delegates to the broker
//! client, the ingest pipeline or the history store, and maps failures onto
//! an `ApiError`.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::{debug, error, info, warn};

use super::error::ApiError;
use super::http::AppState;
use super::message::{
    CreateTopicRequest, CreateTopicResponse, LocationResponse, PublishRequest, SubscribeRequest,
    SubscriptionStatus, TopicModel, subscription_location,
};
use crate::broker::SubscriptionOptions;
use crate::history::SentMessage;
use crate::ingest::{DecodedMessage, RegistryError};

pub async fn list_topics(
    State(state): State<AppState>,
) -> Result<Json<Vec<TopicModel>>, ApiError> {
    let topics = state.pipeline.client().list_topics().await.map_err(|e| {
        error!(error = %e, "failed to list topics");
        ApiError::internal("ERROR_GET_TOPICS", e.to_string())
    })?;
    Ok(Json(topics.into_iter().map(TopicModel::from).collect()))
}

pub async fn create_topic(
    State(state): State<AppState>,
    body: Result<Json<CreateTopicRequest>, JsonRejection>,
) -> Result<Json<CreateTopicResponse>, ApiError> {
    let Json(request) = body.map_err(|rejection| {
        ApiError::bad_request(
            "ERROR_READING_CREATE_TOPIC_CONTENT",
            format!(
                "An error occurred reading the create topic content: {}",
                rejection.body_text()
            ),
        )
    })?;

    let topic = state
        .pipeline
        .client()
        .create_topic(&request.topic_name)
        .await
        .map_err(|e| {
            error!(topic = %request.topic_name, error = %e, "failed to create topic");
            ApiError::bad_request(
                "ERROR_CREATING_TOPIC",
                format!("An error occurred creating the topic: {e}"),
            )
        })?;
    info!(topic = %topic.id, "topic created");
    Ok(Json(CreateTopicResponse { id: topic.name }))
}

/// Publishes the JSON encoding of `payload`. Failures carry no body.
pub async fn publish_message(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    body: Result<Json<PublishRequest>, JsonRejection>,
) -> StatusCode {
    let Ok(Json(request)) = body else {
        return StatusCode::BAD_REQUEST;
    };
    let payload = request.payload.to_string();

    match state
        .pipeline
        .client()
        .publish(&topic, payload.clone().into_bytes())
        .await
    {
        Ok(message_id) => {
            debug!(topic = %topic, message_id = %message_id, "message published");
        }
        Err(e) => {
            error!(topic = %topic, error = %e, "failed to publish message");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    }

    if let Some(history) = &state.history {
        if let Err(e) = history.record(&payload) {
            warn!(topic = %topic, error = %e, "failed to record sent message");
        }
    }
    StatusCode::NO_CONTENT
}

/// Ensures a listener for `topic` and answers with its location. The body
/// is optional; when present it may enable message ordering on a freshly
/// created broker subscription.
pub async fn subscribe(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        SubscribeRequest::default()
    } else {
        serde_json::from_slice::<SubscribeRequest>(&body).map_err(|e| {
            ApiError::bad_request("ERROR_READING_SUBSCRIBE_CONTENT", e.to_string())
        })?
    };
    let options = SubscriptionOptions {
        enable_message_ordering: request.enable_message_ordering,
    };

    let (entry, created) = state
        .pipeline
        .watch(&topic, options)
        .await
        .map_err(|e| match e {
            RegistryError::ShuttingDown => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "SHUTTING_DOWN",
                e.to_string(),
            ),
            RegistryError::Provision { .. } => {
                error!(topic = %topic, error = %e, "failed to subscribe to topic");
                ApiError::bad_request("ERROR_SUBSCRIBING_TO_TOPIC", e.to_string())
            }
        })?;

    if created {
        info!(topic = %topic, sub_id = %entry.id(), "watching topic");
    }
    let location = subscription_location(&topic, entry.id().as_str());
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location.clone())],
        Json(LocationResponse { location }),
    )
        .into_response())
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Path((topic, id)): Path<(String, String)>,
) -> Result<Json<Vec<Arc<DecodedMessage>>>, ApiError> {
    let entry = state.pipeline.registry().lookup(&topic).ok_or_else(|| {
        ApiError::not_found(
            "NON_EXISTENT_TOPIC",
            format!("no subscription exists for topic '{topic}'"),
        )
    })?;
    if entry.id().as_str() != id {
        return Err(ApiError::not_found(
            "NON_EXISTENT_SUBSCRIPTION",
            format!("the subscription you requested '{id}' does not exist"),
        ));
    }
    Ok(Json(entry.buffer().snapshot()))
}

pub async fn list_subscriptions(State(state): State<AppState>) -> Json<Vec<SubscriptionStatus>> {
    let entries = state.pipeline.registry().entries();
    Json(
        entries
            .iter()
            .map(|entry| SubscriptionStatus::from(entry.as_ref()))
            .collect(),
    )
}

pub async fn sent_history(
    State(state): State<AppState>,
) -> Result<Json<Vec<SentMessage>>, ApiError> {
    let history = state.history.as_ref().ok_or_else(|| {
        ApiError::not_found("HISTORY_DISABLED", "sent history is disabled")
    })?;
    let messages = history.list().map_err(|e| {
        error!(error = %e, "failed to read sent history");
        ApiError::internal("DB_ERROR", e.to_string())
    })?;
    Ok(Json(messages))
}

