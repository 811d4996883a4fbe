//! Retry and timeout helpers for calls to external services.

pub mod retry;

pub use retry::{with_retry, RetryConfig, Transient};
