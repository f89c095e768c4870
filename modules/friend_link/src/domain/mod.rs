pub mod alias;
pub mod error;
pub mod failures;
pub mod fanout;
pub mod friends;
pub mod invites;
pub mod link_requests;
pub mod normalize;
pub mod pending;
pub mod ports;
pub mod preview;
pub mod reconcile;
pub mod session;

use sessionkit::{retry_with_backoff, RetryPolicy};
use std::future::Future;

use crate::domain::error::{DomainError, DomainResult};

/// Run a remote-store call under `policy`, mapping the final transport
/// failure into [`DomainError::Remote`].
pub(crate) async fn remote_call<T, F, Fut>(policy: &RetryPolicy, name: &str, op: F) -> DomainResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    retry_with_backoff(policy, name, op)
        .await
        .map_err(|e| DomainError::remote(format!("{name}: {e:#}")))
}
