//! Session-scoped async primitives: bounded retry, cancellable background
//! task slots and typed push feeds.

pub mod feed;
pub mod retry;
pub mod task;

pub use feed::Feed;
pub use retry::{retry_with_backoff, RetryPolicy};
pub use task::{StopReason, TaskSlot};
pub use tokio_util::sync::CancellationToken;
