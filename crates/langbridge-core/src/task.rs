use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Process-wide counter for diagnostic correlation of spawned tasks.
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// A unit of concurrent execution owned by the bridge.
///
/// The runnable receives a cancellation token in place of the asynchronous
/// interruption signal a blocking implementation would use: long waits must
/// be raced against `shutdown.cancelled()` so an external `interrupt` call
/// unblocks them promptly.
#[async_trait]
pub trait Runnable: Send + Sync + 'static {
    async fn run(self: Arc<Self>, shutdown: CancellationToken);
}

/// Handle to a spawned [`Runnable`].
///
/// Spawning clones the runnable's `Arc` into the task, so the runnable cannot
/// be destroyed while its task is still executing; the clone is released when
/// the trampoline unwinds. A watch channel records termination, signalled by
/// a drop guard, so it fires even if the task body panics.
pub struct TaskHandle {
    id: u64,
    shutdown: CancellationToken,
    terminated: watch::Receiver<bool>,
}

struct TerminationGuard {
    id: u64,
    signal: watch::Sender<bool>,
}

impl Drop for TerminationGuard {
    fn drop(&mut self) {
        debug!(task_id = self.id, "bridge task terminated");
        let _ = self.signal.send(true);
    }
}

impl TaskHandle {
    pub fn spawn<R: Runnable>(runnable: Arc<R>) -> TaskHandle {
        let id = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
        let shutdown = CancellationToken::new();
        let (signal, terminated) = watch::channel(false);

        let token = shutdown.clone();
        tokio::spawn(async move {
            let _guard = TerminationGuard { id, signal };
            debug!(task_id = id, "bridge task started");
            runnable.run(token).await;
        });

        TaskHandle {
            id,
            shutdown,
            terminated,
        }
    }

    /// Diagnostic identifier, unique for the life of the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cancel the task's token, unblocking any wait racing against it.
    pub fn interrupt(&self) {
        self.shutdown.cancel();
    }

    pub fn is_interrupted(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Wait up to `timeout` for the task to finish. Returns whether
    /// termination was observed.
    pub async fn wait_terminated(&self, timeout: Duration) -> bool {
        let mut terminated = self.terminated.clone();
        if *terminated.borrow_and_update() {
            return true;
        }
        let observed = tokio::time::timeout(timeout, async {
            while terminated.changed().await.is_ok() {
                if *terminated.borrow() {
                    return true;
                }
            }
            // Sender dropped without signalling: the task is gone either way.
            true
        })
        .await;
        observed.unwrap_or(false) || *self.terminated.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct Immediate;

    #[async_trait]
    impl Runnable for Immediate {
        async fn run(self: Arc<Self>, _shutdown: CancellationToken) {}
    }

    struct ParkedUntilInterrupted {
        interrupted: AtomicBool,
    }

    #[async_trait]
    impl Runnable for ParkedUntilInterrupted {
        async fn run(self: Arc<Self>, shutdown: CancellationToken) {
            shutdown.cancelled().await;
            self.interrupted.store(true, Ordering::SeqCst);
        }
    }

    struct Panicking;

    #[async_trait]
    impl Runnable for Panicking {
        async fn run(self: Arc<Self>, _shutdown: CancellationToken) {
            panic!("runnable died");
        }
    }

    #[tokio::test]
    async fn task_ids_increase_monotonically() {
        let first = TaskHandle::spawn(Arc::new(Immediate));
        let second = TaskHandle::spawn(Arc::new(Immediate));
        assert!(second.id() > first.id());
    }

    #[tokio::test]
    async fn interrupt_unblocks_a_parked_task() {
        let runnable = Arc::new(ParkedUntilInterrupted {
            interrupted: AtomicBool::new(false),
        });
        let handle = TaskHandle::spawn(runnable.clone());

        assert!(!handle.wait_terminated(Duration::from_millis(50)).await);
        handle.interrupt();
        assert!(handle.wait_terminated(Duration::from_secs(2)).await);
        assert!(runnable.interrupted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn termination_is_signalled_on_panic() {
        let handle = TaskHandle::spawn(Arc::new(Panicking));
        assert!(handle.wait_terminated(Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn spawn_retains_the_runnable_for_the_task() {
        let runnable = Arc::new(ParkedUntilInterrupted {
            interrupted: AtomicBool::new(false),
        });
        let weak = Arc::downgrade(&runnable);
        let handle = TaskHandle::spawn(runnable);

        // Caller's clone is gone but the task still holds one.
        assert!(weak.upgrade().is_some());

        handle.interrupt();
        assert!(handle.wait_terminated(Duration::from_secs(2)).await);
        // Give the trampoline a beat to drop its retained clone.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(weak.upgrade().is_none());
    }
}
