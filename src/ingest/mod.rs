//! The `ingest` module is the core of the service: it turns broker
//! subscriptions into buffers that HTTP readers can poll.
//!
//! - `message`: decoding raw payloads into JSON objects.
//! - `buffer`: the append-only per-topic message store.
//! - `listener`: the receive loop that fills a buffer and acknowledges
//!   every delivery.
//! - `registry`: at most one listener per topic, created idempotently.
//! - `pipeline`: the glue that provisions a subscription and registers its
//!   listener in one step.

pub mod buffer;
pub mod listener;
pub mod message;
pub mod pipeline;
pub mod registry;

pub use buffer::MessageBuffer;
pub use listener::{ListenerExit, ListenerHandle, TopicListener, handle_delivery};
pub use message::DecodedMessage;
pub use pipeline::IngestPipeline;
pub use registry::{RegistryEntry, RegistryError, SubscriptionId, SubscriptionRegistry};
