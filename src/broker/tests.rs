use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use super::rest::{
    PullResponse, RestBrokerConfig, deliveries_from_pull, error_message, short_name,
};
use super::topic::Topic;
use super::{
    Acker, BrokerClient, BrokerError, MemoryBroker, RestBroker, SubscriptionHandle,
    SubscriptionOptions, subscription_name,
};

#[derive(Default)]
struct RecordingAcker {
    acked: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Acker for RecordingAcker {
    async fn ack(&self, subscription: &str, ack_id: &str) {
        self.acked
            .lock()
            .push((subscription.to_string(), ack_id.to_string()));
    }
}

#[test]
fn test_topic_attach_and_detach() {
    let mut topic = Topic::new("orders");
    assert_eq!(topic.name, "orders");
    topic.attach("orders-sub");
    topic.attach("orders-sub");
    assert_eq!(topic.subscriptions.len(), 1);
    topic.detach("orders-sub");
    assert!(topic.subscriptions.is_empty());
}

#[test]
fn test_subscription_name_appends_suffix() {
    assert_eq!(
        subscription_name("orders", "pubsub_ui-alice"),
        "orders-pubsub_ui-alice"
    );
}

#[tokio::test]
async fn test_memory_create_and_list_topics() {
    let broker = MemoryBroker::new("demo");
    let created = broker.create_topic("orders").await.unwrap();
    assert_eq!(created.id, "orders");
    assert_eq!(created.name, "projects/demo/topics/orders");
    broker.create_topic("audit").await.unwrap();

    let topics = broker.list_topics().await.unwrap();
    let ids: Vec<_> = topics.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["audit", "orders"]);

    let err = broker.create_topic("orders").await.unwrap_err();
    assert!(matches!(err, BrokerError::TopicExists(name) if name == "orders"));
}

#[tokio::test]
async fn test_memory_publish_to_missing_topic_fails() {
    let broker = MemoryBroker::default();
    let err = broker.publish("nope", b"{}".to_vec()).await.unwrap_err();
    assert!(matches!(err, BrokerError::TopicNotFound(_)));
}

#[tokio::test]
async fn test_memory_subscription_is_idempotent() {
    let broker = MemoryBroker::default();
    broker.create_topic("orders").await.unwrap();
    let options = SubscriptionOptions {
        enable_message_ordering: true,
    };

    let first = broker
        .create_subscription_if_absent("orders", "orders-sub", &options)
        .await
        .unwrap();
    let second = broker
        .create_subscription_if_absent("orders", "orders-sub", &SubscriptionOptions::default())
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(broker.subscription_count(), 1);
    assert_eq!(broker.subscription_options("orders-sub"), Some(options));
}

#[tokio::test]
async fn test_memory_subscription_on_missing_topic_fails() {
    let broker = MemoryBroker::default();
    let err = broker
        .create_subscription_if_absent("ghost", "ghost-sub", &SubscriptionOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::TopicNotFound(_)));
    assert_eq!(broker.subscription_count(), 0);
}

#[tokio::test]
async fn test_memory_receive_delivers_in_order_and_tracks_acks() {
    let broker = MemoryBroker::default();
    broker.create_topic("orders").await.unwrap();
    let handle = broker
        .create_subscription_if_absent("orders", "orders-sub", &SubscriptionOptions::default())
        .await
        .unwrap();
    let mut deliveries = broker.receive(&handle).await.unwrap();

    broker.publish("orders", b"first".to_vec()).await.unwrap();
    broker.publish("orders", b"second".to_vec()).await.unwrap();

    let first = deliveries.next().await.unwrap().unwrap();
    let second = deliveries.next().await.unwrap().unwrap();
    assert_eq!(first.data, b"first");
    assert_eq!(second.data, b"second");

    let stats = broker.subscription_stats("orders-sub").unwrap();
    assert_eq!(stats.pending_acks, 2);
    assert_eq!(stats.acked, 0);

    first.ack().await;
    second.ack().await;
    let stats = broker.subscription_stats("orders-sub").unwrap();
    assert_eq!(stats.pending_acks, 0);
    assert_eq!(stats.acked, 2);
}

#[tokio::test]
async fn test_memory_publish_fans_out_to_every_subscription() {
    let broker = MemoryBroker::default();
    broker.create_topic("orders").await.unwrap();
    let a = broker
        .create_subscription_if_absent("orders", "a", &SubscriptionOptions::default())
        .await
        .unwrap();
    let b = broker
        .create_subscription_if_absent("orders", "b", &SubscriptionOptions::default())
        .await
        .unwrap();
    let mut stream_a = broker.receive(&a).await.unwrap();
    let mut stream_b = broker.receive(&b).await.unwrap();

    broker.publish("orders", b"x".to_vec()).await.unwrap();

    assert_eq!(stream_a.next().await.unwrap().unwrap().data, b"x");
    assert_eq!(stream_b.next().await.unwrap().unwrap().data, b"x");
}

#[tokio::test]
async fn test_memory_stream_ends_when_subscription_deleted() {
    let broker = MemoryBroker::default();
    broker.create_topic("orders").await.unwrap();
    let handle = broker
        .create_subscription_if_absent("orders", "orders-sub", &SubscriptionOptions::default())
        .await
        .unwrap();
    let mut deliveries = broker.receive(&handle).await.unwrap();

    broker.delete_subscription("orders-sub").unwrap();

    let next = tokio::time::timeout(Duration::from_secs(1), deliveries.next())
        .await
        .expect("stream should end promptly");
    assert!(next.is_none());
    assert!(matches!(
        broker.receive(&handle).await,
        Err(BrokerError::SubscriptionNotFound(_))
    ));
}

#[test]
fn test_short_name_and_error_message() {
    assert_eq!(short_name("projects/p/topics/orders"), "orders");
    assert_eq!(short_name("orders"), "orders");

    let body = r#"{"error":{"code":404,"message":"Resource not found","status":"NOT_FOUND"}}"#;
    assert_eq!(error_message(body), "Resource not found");
    assert_eq!(error_message(" plain text "), "plain text");
}

#[tokio::test]
async fn test_pull_response_becomes_deliveries() {
    let body = r#"{
        "receivedMessages": [
            {"ackId": "ack-1", "message": {"data": "eyJhIjoxfQ==", "messageId": "1"}},
            {"ackId": "ack-2", "message": {"data": "%%%", "messageId": "2"}},
            {"ackId": "ack-3", "message": {"messageId": "3"}}
        ]
    }"#;
    let response: PullResponse = serde_json::from_str(body).unwrap();
    let recorder = Arc::new(RecordingAcker::default());
    let acker: Arc<dyn Acker> = recorder.clone();

    let deliveries = deliveries_from_pull(response, "orders-sub", &acker);
    assert_eq!(deliveries.len(), 3);
    assert_eq!(deliveries[0].data, br#"{"a":1}"#);
    assert!(deliveries[1].data.is_empty());
    assert!(deliveries[2].data.is_empty());

    for delivery in deliveries {
        delivery.ack().await;
    }
    let acked = recorder.acked.lock().clone();
    assert_eq!(
        acked,
        vec![
            ("orders-sub".to_string(), "ack-1".to_string()),
            ("orders-sub".to_string(), "ack-2".to_string()),
            ("orders-sub".to_string(), "ack-3".to_string()),
        ]
    );
}

#[test]
fn test_empty_pull_response() {
    let response: PullResponse = serde_json::from_str("{}").unwrap();
    assert!(response.received_messages.is_empty());
}

#[test]
fn test_rest_urls_are_project_scoped() {
    let broker = RestBroker::new(RestBrokerConfig {
        endpoint: "http://localhost:8085/".to_string(),
        project_id: "demo".to_string(),
        access_token: None,
        request_timeout: Duration::from_secs(1),
        pull_max_messages: 10,
        pull_interval: Duration::from_millis(10),
        max_pull_failures: 1,
    })
    .unwrap();

    assert_eq!(
        broker.url_for("topics/orders:publish"),
        "http://localhost:8085/v1/projects/demo/topics/orders:publish"
    );
}

#[tokio::test]
async fn test_rest_unreachable_endpoint_is_transport_error() {
    let broker = RestBroker::new(RestBrokerConfig {
        endpoint: "http://127.0.0.1:1".to_string(),
        project_id: "demo".to_string(),
        access_token: Some("token".to_string()),
        request_timeout: Duration::from_millis(500),
        pull_max_messages: 10,
        pull_interval: Duration::from_millis(10),
        max_pull_failures: 1,
    })
    .unwrap();

    let err = broker.list_topics().await.unwrap_err();
    assert!(matches!(err, BrokerError::Transport(_)));
}

#[tokio::test]
async fn test_build_broker_selects_backend() {
    let mut settings = crate::config::Settings::default().broker;
    settings.project_id = "demo".to_string();
    let broker = super::build_broker(&settings).unwrap();
    let topic = broker.create_topic("orders").await.unwrap();
    assert_eq!(topic.name, "projects/demo/topics/orders");

    settings.backend = crate::config::BrokerBackend::Rest;
    assert!(super::build_broker(&settings).is_ok());
}

#[derive(Default)]
struct MockPubsub {
    pulls: AtomicUsize,
    acks: AtomicUsize,
}

const IDLE_PULLS: usize = 2;

async fn mock_get_subscription(Path(name): Path<String>) -> Json<Value> {
    Json(json!({
        "name": format!("projects/demo/subscriptions/{name}"),
        "topic": "projects/demo/topics/orders",
    }))
}

async fn mock_put_subscription() -> Response {
    (
        StatusCode::CONFLICT,
        Json(json!({"error": {"code": 409, "message": "Subscription already exists", "status": "ALREADY_EXISTS"}})),
    )
        .into_response()
}

async fn mock_subscription_action(
    State(mock): State<Arc<MockPubsub>>,
    Path(action): Path<String>,
) -> Response {
    if action.ends_with(":acknowledge") {
        mock.acks.fetch_add(1, Ordering::SeqCst);
        return Json(json!({})).into_response();
    }
    if action.starts_with("broken") {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": {"code": 500, "message": "internal"}})),
        )
            .into_response();
    }

    // Long-poll: hold the first pulls open past the client timeout.
    if mock.pulls.fetch_add(1, Ordering::SeqCst) < IDLE_PULLS {
        tokio::time::sleep(Duration::from_secs(2)).await;
        return Json(json!({})).into_response();
    }
    Json(json!({
        "receivedMessages": [
            {"ackId": "ack-1", "message": {"data": "eyJhIjoxfQ==", "messageId": "1"}}
        ]
    }))
    .into_response()
}

async fn start_mock_pubsub() -> (String, Arc<MockPubsub>) {
    let mock = Arc::new(MockPubsub::default());
    let app = Router::new()
        .route(
            "/v1/projects/demo/subscriptions/{action}",
            get(mock_get_subscription)
                .put(mock_put_subscription)
                .post(mock_subscription_action),
        )
        .with_state(mock.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move { axum::serve(listener, app).await });
    (endpoint, mock)
}

fn mock_broker(endpoint: String) -> RestBroker {
    RestBroker::new(RestBrokerConfig {
        endpoint,
        project_id: "demo".to_string(),
        access_token: None,
        request_timeout: Duration::from_millis(200),
        pull_max_messages: 10,
        pull_interval: Duration::from_millis(10),
        max_pull_failures: 1,
    })
    .unwrap()
}

#[tokio::test]
async fn test_rest_pull_timeouts_on_idle_subscription_keep_stream_open() {
    let (endpoint, mock) = start_mock_pubsub().await;
    let broker = mock_broker(endpoint);
    let handle = SubscriptionHandle {
        name: "orders-x".to_string(),
        topic: "orders".to_string(),
    };

    let mut deliveries = broker.receive(&handle).await.unwrap();
    let delivery = tokio::time::timeout(Duration::from_secs(5), deliveries.next())
        .await
        .expect("delivery after idle pulls")
        .expect("stream still open")
        .expect("idle pulls are not failures");

    assert_eq!(delivery.data, br#"{"a":1}"#);
    assert!(mock.pulls.load(Ordering::SeqCst) > IDLE_PULLS);

    delivery.ack().await;
    assert_eq!(mock.acks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rest_failed_pulls_end_stream_with_error() {
    let (endpoint, _mock) = start_mock_pubsub().await;
    let broker = mock_broker(endpoint);
    let handle = SubscriptionHandle {
        name: "broken-x".to_string(),
        topic: "orders".to_string(),
    };

    let mut deliveries = broker.receive(&handle).await.unwrap();
    let next = tokio::time::timeout(Duration::from_secs(5), deliveries.next())
        .await
        .expect("stream gives up");
    assert!(matches!(next, Some(Err(BrokerError::Rejected(_)))));
    assert!(deliveries.next().await.is_none());
}

#[tokio::test]
async fn test_rest_existing_subscription_is_reused() {
    let (endpoint, _mock) = start_mock_pubsub().await;
    let broker = mock_broker(endpoint);

    let handle = broker
        .create_subscription_if_absent("orders", "orders-x", &SubscriptionOptions::default())
        .await
        .unwrap();
    assert_eq!(
        handle,
        SubscriptionHandle {
            name: "orders-x".to_string(),
            topic: "orders".to_string(),
        }
    );
}
