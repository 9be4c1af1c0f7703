//! # pubsub-lens
//!
//! `pubsub-lens` is an HTTP façade over a publish/subscribe broker. It lets
//! an operator list and create topics, publish JSON payloads, and "watch" a
//! topic: the service provisions a durable broker subscription, runs a
//! background listener on it and buffers every JSON object it receives so
//! the buffer can be polled over HTTP.
//!
//! ## Core Modules
//!
//! - `broker`: the broker client seam, with in-memory and REST backends.
//! - `config`: loading settings from files and the environment.
//! - `history`: the durable record of published payloads.
//! - `ingest`: listeners, buffers and the subscription registry.
//! - `server`: wiring everything together and running the HTTP server.
//! - `transport`: the axum router, handlers and JSON models.
//! - `utils`: logging setup and the top-level error type.

pub mod broker;
pub mod config;
pub mod history;
pub mod ingest;
pub mod server;
pub mod transport;
pub mod utils;
