use std::sync::Arc;

use parking_lot::RwLock;

use super::message::DecodedMessage;

/// Append-only, arrival-ordered store of decoded messages for one topic.
///
/// Written by the topic's listener, read by any number of HTTP readers.
/// Nothing is ever evicted; `count` lets tooling watch the growth.
#[derive(Debug)]
pub struct MessageBuffer {
    topic: String,
    messages: RwLock<Vec<Arc<DecodedMessage>>>,
}

impl MessageBuffer {
    pub fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            messages: RwLock::new(Vec::new()),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn append(&self, message: DecodedMessage) {
        self.messages.write().push(Arc::new(message));
    }

    /// Copies out every message appended so far. The lock is held only for
    /// the duration of cloning the `Arc`s.
    pub fn snapshot(&self) -> Vec<Arc<DecodedMessage>> {
        self.messages.read().clone()
    }

    pub fn count(&self) -> usize {
        self.messages.read().len()
    }
}
