//! The `utils` module provides a collection of utility functions and common
//! definitions used across the application.
//!
//! It centralizes the process-level error type and the tracing setup.

pub mod error;
pub mod logging;
