//! Resilience patterns for provider calls.
//!
//! - Retry with exponential backoff for transient failures

mod retry;

pub use retry::{RetryPolicy, BACKOFF_FACTOR};
