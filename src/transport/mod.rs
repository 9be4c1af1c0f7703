//! The `transport` module is the HTTP face of the service.
//!
//! It defines the JSON request/response models, maps failures onto HTTP
//! status codes and error bodies, and builds the axum router that exposes
//! topic administration, publishing, subscription polling and the sent
//! history.

pub mod error;
pub mod handlers;
pub mod http;
pub mod message;

pub use http::{AppState, build_router, serve};
