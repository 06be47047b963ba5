//! Single-flight ownership of the autopilot's in-progress visit.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DEFAULT_ABORT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionId(u64);

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A visit's claim on the guard.
///
/// Work holding a handle must confirm [`ExecutionGuard::is_live`] after every
/// suspension point before acting on what it awaited.
#[derive(Debug, Clone)]
pub struct ExecutionHandle {
    id: ExecutionId,
    cancel: CancellationToken,
}

impl ExecutionHandle {
    pub fn id(&self) -> ExecutionId {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

struct LiveExecution {
    id: ExecutionId,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

struct GuardInner {
    next_id: AtomicU64,
    abort_grace: Duration,
    live: Mutex<Option<LiveExecution>>,
}

/// Holds at most one live [`ExecutionHandle`].
///
/// Starting a new execution first cancels the live one and waits for its task
/// to unwind, so two visits never overlap.
#[derive(Clone)]
pub struct ExecutionGuard {
    inner: Arc<GuardInner>,
}

impl Default for ExecutionGuard {
    fn default() -> Self {
        Self::new(DEFAULT_ABORT_GRACE)
    }
}

impl ExecutionGuard {
    /// `abort_grace` bounds how long `begin` and `abort_live` wait for a
    /// cancelled task before hard-aborting it.
    pub fn new(abort_grace: Duration) -> Self {
        Self {
            inner: Arc::new(GuardInner {
                next_id: AtomicU64::new(0),
                abort_grace,
                live: Mutex::new(None),
            }),
        }
    }

    fn live(&self) -> MutexGuard<'_, Option<LiveExecution>> {
        self.inner
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Abort and drain any live execution, then claim a fresh one.
    pub async fn begin(&self) -> ExecutionHandle {
        self.abort_live().await;

        let id = ExecutionId(self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let cancel = CancellationToken::new();
        let displaced = self.live().replace(LiveExecution {
            id,
            cancel: cancel.clone(),
            task: None,
        });

        // Only reachable if another caller began while we were draining.
        if let Some(displaced) = displaced {
            warn!(execution = %displaced.id, "Displaced a concurrently started execution");
            displaced.cancel.cancel();
            if let Some(task) = displaced.task {
                task.abort();
            }
        }

        debug!(execution = %id, "Execution started");
        ExecutionHandle { id, cancel }
    }

    /// Hand the task running `handle` to the guard so aborts can drain it.
    pub fn attach(&self, handle: &ExecutionHandle, task: JoinHandle<()>) {
        let mut live = self.live();
        match live.as_mut() {
            Some(current) if current.id == handle.id && !handle.is_cancelled() => {
                current.task = Some(task);
            }
            _ => task.abort(),
        }
    }

    /// Cancel `handle` and drop it from the guard if it is the live one.
    /// Idempotent; does not wait for the task.
    pub fn abort(&self, handle: &ExecutionHandle) {
        handle.cancel.cancel();
        let taken = {
            let mut live = self.live();
            match live.as_ref() {
                Some(current) if current.id == handle.id => live.take(),
                _ => None,
            }
        };
        if let Some(taken) = taken
            && let Some(task) = taken.task
        {
            task.abort();
        }
    }

    /// Cancel whatever is live and wait for its task to finish.
    pub async fn abort_live(&self) {
        let Some(previous) = self.live().take() else {
            return;
        };

        previous.cancel.cancel();
        let Some(mut task) = previous.task else {
            return;
        };

        if tokio::time::timeout(self.inner.abort_grace, &mut task)
            .await
            .is_err()
        {
            warn!(
                execution = %previous.id,
                grace_ms = self.inner.abort_grace.as_millis() as u64,
                "Execution ignored cancellation; aborting task"
            );
            task.abort();
        }
        debug!(execution = %previous.id, "Execution aborted");
    }

    /// Drop a naturally finished execution without cancelling it.
    /// Returns false if `id` was no longer live.
    pub fn release(&self, id: ExecutionId) -> bool {
        let mut live = self.live();
        match live.as_ref() {
            Some(current) if current.id == id => {
                live.take();
                true
            }
            _ => false,
        }
    }

    /// Not cancelled, and still the execution the guard recognizes.
    pub fn is_live(&self, handle: &ExecutionHandle) -> bool {
        !handle.is_cancelled() && self.is_current(handle.id)
    }

    pub fn is_current(&self, id: ExecutionId) -> bool {
        self.live()
            .as_ref()
            .is_some_and(|current| current.id == id)
    }

    pub fn has_live(&self) -> bool {
        self.live().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn begin_supersedes_previous_handle() {
        let guard = ExecutionGuard::default();
        let first = guard.begin().await;
        let second = guard.begin().await;

        assert!(first.is_cancelled());
        assert!(!guard.is_live(&first));
        assert!(guard.is_live(&second));
        assert!(second.id() > first.id());
    }

    #[tokio::test]
    async fn begin_waits_for_cancelled_task_to_unwind() {
        let guard = ExecutionGuard::default();
        let first = guard.begin().await;
        let unwound = Arc::new(AtomicBool::new(false));

        let task_handle = first.clone();
        let task_unwound = unwound.clone();
        let task = tokio::spawn(async move {
            task_handle.cancelled().await;
            tokio::task::yield_now().await;
            task_unwound.store(true, Ordering::SeqCst);
        });
        guard.attach(&first, task);

        let _second = guard.begin().await;
        assert!(unwound.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn stubborn_task_is_hard_aborted_after_grace() {
        let guard = ExecutionGuard::new(Duration::from_millis(100));
        let first = guard.begin().await;
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        guard.attach(&first, task);

        let started = tokio::time::Instant::now();
        guard.abort_live().await;
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(!guard.has_live());
    }

    #[tokio::test]
    async fn abort_is_idempotent() {
        let guard = ExecutionGuard::default();
        let handle = guard.begin().await;

        guard.abort(&handle);
        guard.abort(&handle);

        assert!(handle.is_cancelled());
        assert!(!guard.has_live());
    }

    #[tokio::test]
    async fn aborting_stale_handle_leaves_live_one_alone() {
        let guard = ExecutionGuard::default();
        let stale = guard.begin().await;
        let live = guard.begin().await;

        guard.abort(&stale);

        assert!(guard.is_live(&live));
    }

    #[tokio::test]
    async fn release_only_matches_live_id() {
        let guard = ExecutionGuard::default();
        let first = guard.begin().await;
        let second = guard.begin().await;

        assert!(!guard.release(first.id()));
        assert!(guard.release(second.id()));
        assert!(!guard.has_live());
        assert!(!second.is_cancelled());
    }

    #[tokio::test]
    async fn attach_to_dead_handle_aborts_task() {
        let guard = ExecutionGuard::default();
        let handle = guard.begin().await;
        guard.abort(&handle);

        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let abort_handle = task.abort_handle();
        guard.attach(&handle, task);
        for _ in 0..10 {
            if abort_handle.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(abort_handle.is_finished());
    }
}
