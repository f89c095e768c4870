use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Result returned by background tasks.
type TaskResult<T = ()> = anyhow::Result<T>;

/// Reason why a slot's task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Nothing was running, or the task had already returned.
    Finished,
    /// The task observed cancellation and returned in time.
    Cancelled,
    /// The task ignored cancellation and was aborted.
    Timeout,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    finished: Arc<AtomicBool>,
}

impl Running {
    fn kill(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// Holder for one recurring background task.
///
/// At most one task runs per slot: starting a new one cancels and aborts the
/// predecessor first. Dropping the slot cancels whatever is running.
pub struct TaskSlot {
    name: &'static str,
    running: Mutex<Option<Running>>,
}

impl TaskSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            running: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Spawn `make(cancel)` as the slot's task, replacing any predecessor.
    ///
    /// The returned token is the one handed to the task; a parent token can
    /// be chained with [`TaskSlot::replace_with_parent`].
    #[tracing::instrument(skip(self, make), fields(task = self.name), level = "debug")]
    pub fn replace<F, Fut>(&self, make: F) -> CancellationToken
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult<()>> + Send + 'static,
    {
        self.spawn_with(CancellationToken::new(), make)
    }

    /// Like [`TaskSlot::replace`], but the task is also cancelled with `parent`.
    pub fn replace_with_parent<F, Fut>(&self, parent: &CancellationToken, make: F) -> CancellationToken
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult<()>> + Send + 'static,
    {
        self.spawn_with(parent.child_token(), make)
    }

    fn spawn_with<F, Fut>(&self, token: CancellationToken, make: F) -> CancellationToken
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult<()>> + Send + 'static,
    {
        let mut guard = self.running.lock();
        if let Some(prev) = guard.take() {
            tracing::debug!(task = self.name, "cancelling predecessor");
            prev.kill();
        }

        let finished = Arc::new(AtomicBool::new(false));
        let finished_flag = finished.clone();
        let name = self.name;
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = make(task_token).await {
                tracing::error!(task = name, error = %e, "background task error");
            }
            finished_flag.store(true, Ordering::Release);
            tracing::debug!(task = name, "background task finished");
        });

        *guard = Some(Running {
            cancel: token.clone(),
            handle,
            finished,
        });
        token
    }

    /// Whether a task is present and has not returned yet.
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.finished.load(Ordering::Acquire))
    }

    /// Request cancellation and wait up to `timeout` for the task to return.
    pub async fn stop(&self, timeout: Duration) -> StopReason {
        let Some(running) = self.running.lock().take() else {
            return StopReason::Finished;
        };
        if running.finished.load(Ordering::Acquire) {
            return StopReason::Finished;
        }

        running.cancel.cancel();
        let mut handle = running.handle;
        let reason = match tokio::time::timeout(timeout, &mut handle).await {
            Ok(_) => StopReason::Cancelled,
            Err(_) => {
                tracing::warn!(task = self.name, "stop timed out; aborting task");
                handle.abort();
                StopReason::Timeout
            }
        };
        tracing::debug!(task = self.name, ?reason, "background task stopped");
        reason
    }

    /// Cancel without waiting.
    pub fn cancel(&self) {
        if let Some(running) = self.running.lock().take() {
            running.kill();
        }
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn replace_cancels_predecessor() {
        let slot = TaskSlot::new("sync");
        let first_cancelled = Arc::new(AtomicBool::new(false));
        let flag = first_cancelled.clone();

        let first = slot.replace(move |cancel| async move {
            cancel.cancelled().await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        assert!(slot.is_running());

        let second = slot.replace(|cancel| async move {
            cancel.cancelled().await;
            Ok(())
        });

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(slot.stop(Duration::from_secs(1)).await, StopReason::Cancelled);
        assert!(!slot.is_running());
    }

    #[tokio::test]
    async fn stop_without_task_is_finished() {
        let slot = TaskSlot::new("idle");
        assert_eq!(slot.stop(Duration::from_millis(10)).await, StopReason::Finished);
    }

    #[tokio::test]
    async fn stop_aborts_task_ignoring_cancellation() {
        let slot = TaskSlot::new("stubborn");
        slot.replace(|_cancel| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        });
        assert_eq!(slot.stop(Duration::from_millis(20)).await, StopReason::Timeout);
    }

    #[tokio::test]
    async fn parent_token_cancels_child_task() {
        let slot = TaskSlot::new("child");
        let parent = CancellationToken::new();
        let ticks = Arc::new(AtomicU32::new(0));
        let t = ticks.clone();
        let child = slot.replace_with_parent(&parent, move |cancel| async move {
            cancel.cancelled().await;
            t.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        parent.cancel();
        assert!(child.is_cancelled());
        let reason = slot.stop(Duration::from_secs(1)).await;
        assert!(matches!(reason, StopReason::Cancelled | StopReason::Finished));
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }
}
