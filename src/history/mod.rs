//! The `history` module keeps a durable record of the messages this service
//! has published, so an operator can pick a previous payload again.
//!
//! It uses `sled` as an embedded key-value store. Only published payloads
//! are stored; subscription buffers stay in memory.

pub mod sled_store;

pub use sled_store::{HistoryError, SentHistory, SentMessage};
