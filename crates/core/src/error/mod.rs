//! Error handling framework for the Singura platform.
//!
//! Structured errors carry a standardized [`ErrorCode`], a severity, and a
//! context record (error id, request id, organization/connection scope) so
//! that failures in the OAuth lifecycle, discovery runs, and the detection
//! pipeline can be classified, logged, and mapped onto HTTP responses
//! consistently. The propagation policy lives with the code definitions:
//! `is_retryable` drives backoff loops, `http_status` drives the API layer.

pub mod codes;
pub mod context;
pub mod framework;

pub use codes::ErrorCode;
pub use context::ErrorContext;
pub use framework::{Error, ErrorSeverity, Result};
