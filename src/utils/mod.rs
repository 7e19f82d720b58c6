//! Utility modules.

pub mod retry;
pub mod text;

pub use retry::{ErrorClass, RetryPolicy, RetryResult, Retryable, with_retry};
pub use text::{distribute_tokens, estimate_tokens};
