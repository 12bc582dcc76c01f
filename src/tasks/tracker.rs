//! Counter-backed tracker for detached tasks.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::Notify;

use crate::observability::metrics;

#[derive(Debug, Default)]
struct Inner {
    outstanding: AtomicUsize,
    idle: Notify,
}

/// Launches fire-and-forget tasks and lets shutdown wait for them.
///
/// Cloning is cheap; all clones share one counter.
#[derive(Debug, Clone, Default)]
pub struct BackgroundTasks {
    inner: Arc<Inner>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` on the runtime without waiting for it.
    ///
    /// A panic inside the task is logged and swallowed. Must be called from
    /// within a Tokio runtime.
    pub fn run<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.track();

        tokio::spawn(async move {
            let _guard = guard;
            if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
                report_panic(name, panic);
            }
        });
    }

    /// Run a synchronous closure on the blocking pool without waiting for it.
    pub fn run_blocking<F>(&self, name: &'static str, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.track();

        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(task)) {
                report_panic(name, panic);
            }
        });
    }

    /// Number of tasks started but not yet finished.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::SeqCst)
    }

    /// Wait until no tracked task is running. Returns at once if none are.
    pub async fn wait(&self) {
        loop {
            let idle = self.inner.idle.notified();
            tokio::pin!(idle);
            // Register before checking the counter so a concurrent final
            // decrement cannot slip between the check and the await.
            idle.as_mut().enable();

            if self.outstanding() == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Like [`wait`](Self::wait), but gives up after `timeout`.
    /// Returns `true` if every task finished in time.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }

    fn track(&self) -> TaskGuard {
        let outstanding = self.inner.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::record_background_outstanding(outstanding);
        TaskGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Decrements the outstanding count when the task frame is dropped.
struct TaskGuard {
    inner: Arc<Inner>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let previous = self.inner.outstanding.fetch_sub(1, Ordering::SeqCst);
        metrics::record_background_outstanding(previous - 1);
        if previous == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

fn report_panic(name: &'static str, panic: Box<dyn Any + Send>) {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());

    metrics::record_background_panic(name);
    tracing::error!(task = name, panic = %message, "Background task panicked");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn wait_returns_immediately_when_idle() {
        let tasks = BackgroundTasks::new();
        assert_eq!(tasks.outstanding(), 0);
        assert!(tasks.wait_timeout(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn run_counts_before_the_task_starts() {
        let tasks = BackgroundTasks::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        tasks.run("blocked", async move {
            let _ = release_rx.await;
        });
        assert_eq!(tasks.outstanding(), 1);
        assert!(!tasks.wait_timeout(Duration::from_millis(50)).await);

        release_tx.send(()).unwrap();
        tasks.wait().await;
        assert_eq!(tasks.outstanding(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn panics_are_contained_and_counted_down() {
        let tasks = BackgroundTasks::new();
        let completed = Arc::new(AtomicU32::new(0));

        for i in 0..32u32 {
            let completed = Arc::clone(&completed);
            tasks.run("mixed", async move {
                tokio::time::sleep(Duration::from_millis(u64::from(i % 5))).await;
                if i % 4 == 0 {
                    panic!("task {i} failed");
                }
                completed.fetch_add(1, Ordering::SeqCst);
            });
        }

        tasks.wait().await;
        assert_eq!(tasks.outstanding(), 0);
        assert_eq!(completed.load(Ordering::SeqCst), 24);
    }

    #[tokio::test]
    async fn blocking_tasks_are_tracked() {
        let tasks = BackgroundTasks::new();
        let completed = Arc::new(AtomicU32::new(0));

        let c = Arc::clone(&completed);
        tasks.run_blocking("sync-ok", move || {
            std::thread::sleep(Duration::from_millis(20));
            c.fetch_add(1, Ordering::SeqCst);
        });
        tasks.run_blocking("sync-panic", || panic!("boom"));

        tasks.wait().await;
        assert_eq!(tasks.outstanding(), 0);
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clones_share_the_counter() {
        let tasks = BackgroundTasks::new();
        let clone = tasks.clone();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        clone.run("clone", async move {
            let _ = release_rx.await;
        });
        assert_eq!(tasks.outstanding(), 1);

        release_tx.send(()).unwrap();
        tasks.wait().await;
        assert_eq!(clone.outstanding(), 0);
    }
}
