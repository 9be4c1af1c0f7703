use std::sync::Arc;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::buffer::MessageBuffer;
use super::message::DecodedMessage;
use crate::broker::{BrokerClient, BrokerResult, Delivery, DeliveryStream, SubscriptionHandle};

/// Why a listener's receive loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerExit {
    /// The stop token fired.
    Cancelled,
    /// The broker ended the delivery stream.
    Closed,
    /// The broker reported an error on the delivery stream.
    Failed,
}

/// Decodes one delivery into `buffer`, then acknowledges it.
///
/// The ack is sent whether or not the payload decoded, so a malformed
/// message is dropped for good. Returns whether a message was appended.
pub async fn handle_delivery(buffer: &MessageBuffer, delivery: Delivery) -> bool {
    let appended = match DecodedMessage::decode(&delivery.data) {
        Ok(message) => {
            debug!(topic = buffer.topic(), message_id = %delivery.message_id, "message received");
            buffer.append(message);
            true
        }
        Err(e) => {
            warn!(
                topic = buffer.topic(),
                message_id = %delivery.message_id,
                error = %e,
                "dropping message that is not a JSON object"
            );
            false
        }
    };
    delivery.ack().await;
    appended
}

/// The receive loop bound to one broker subscription.
///
/// `open` attaches to the subscription and fails if the broker refuses;
/// `run` then drains deliveries into the buffer until cancelled or until
/// the broker ends the stream.
pub struct TopicListener {
    subscription: SubscriptionHandle,
    buffer: Arc<MessageBuffer>,
    deliveries: DeliveryStream,
    cancel: CancellationToken,
}

impl TopicListener {
    pub async fn open(
        client: &dyn BrokerClient,
        subscription: SubscriptionHandle,
        buffer: Arc<MessageBuffer>,
        cancel: CancellationToken,
    ) -> BrokerResult<Self> {
        let deliveries = client.receive(&subscription).await?;
        Ok(Self {
            subscription,
            buffer,
            deliveries,
            cancel,
        })
    }

    pub fn subscription(&self) -> &SubscriptionHandle {
        &self.subscription
    }

    pub async fn run(mut self) -> ListenerExit {
        info!(
            topic = %self.subscription.topic,
            subscription = %self.subscription.name,
            "listener started"
        );

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(subscription = %self.subscription.name, "listener stopped");
                    return ListenerExit::Cancelled;
                }
                next = self.deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    handle_delivery(&self.buffer, delivery).await;
                }
                Some(Err(e)) => {
                    error!(subscription = %self.subscription.name, error = %e, "receive loop failed");
                    return ListenerExit::Failed;
                }
                None => {
                    warn!(subscription = %self.subscription.name, "delivery stream closed");
                    return ListenerExit::Closed;
                }
            }
        }
    }
}

/// Handle to a spawned listener task.
#[derive(Debug)]
pub struct ListenerHandle {
    cancel: CancellationToken,
    task: JoinHandle<ListenerExit>,
}

impl ListenerHandle {
    pub(crate) fn new(cancel: CancellationToken, task: JoinHandle<ListenerExit>) -> Self {
        Self { cancel, task }
    }

    /// Whether the receive loop is still alive. A dead listener is not restarted.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signals the receive loop to stop; does not wait for it.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}
