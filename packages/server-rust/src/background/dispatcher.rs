//! Fire-and-forget execution lane for best-effort side effects.
//!
//! `run` spawns the task and returns immediately. Whatever the task does,
//! including panicking, ends at the task boundary as a [`TaskError`] that is
//! logged once; the caller never observes it.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tracing::error;

/// Terminal failure of a background task.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The task returned an error.
    #[error("{0:#}")]
    Failed(#[from] anyhow::Error),
    /// The task panicked; carries the panic message when it was a string.
    #[error("task panicked: {0}")]
    Panicked(String),
}

/// Spawns detached tasks and contains their faults.
///
/// No ordering, cancellation or timeout is imposed. A task that never
/// completes keeps its slot forever. The number of running tasks is tracked
/// so shutdown can wait for them with [`Dispatcher::wait_idle`].
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    in_flight: Arc<AtomicU64>,
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Launches `task` on the runtime and returns without waiting.
    ///
    /// `name` labels the task in logs and metrics.
    pub fn run<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let guard = InFlightGuard::new(&self.in_flight);

        tokio::spawn(async move {
            let _guard = guard;
            if let Err(err) = contain(task).await {
                metrics::counter!("background_task_failures_total", "task" => name).increment(1);
                error!(task = name, error = %err, "background task failed");
            }
        });
    }

    /// Number of tasks launched but not yet finished.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits until no task is running, up to `timeout`.
    ///
    /// Returns `false` if tasks were still running at the deadline. Running
    /// tasks are not cancelled either way.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Runs `task`, converting a panic into [`TaskError::Panicked`].
async fn contain<F>(task: F) -> Result<(), TaskError>
where
    F: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(task).catch_unwind().await {
        Ok(result) => result.map_err(TaskError::Failed),
        Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Decrements the in-flight counter on drop, including during unwinding.
#[derive(Debug)]
struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl InFlightGuard {
    fn new(in_flight: &Arc<AtomicU64>) -> Self {
        in_flight.fetch_add(1, Ordering::Relaxed);
        Self {
            in_flight: Arc::clone(in_flight),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use tokio::sync::oneshot;

    use super::*;

    #[tokio::test]
    async fn run_returns_before_task_completes() {
        let dispatcher = Dispatcher::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel::<()>();

        dispatcher.run("blocked", async move {
            let _ = release_rx.await;
            let _ = done_tx.send(());
            Ok(())
        });

        // Still running: run() did not wait for it.
        assert_eq!(dispatcher.in_flight(), 1);

        release_tx.send(()).unwrap();
        done_rx.await.unwrap();
        assert!(dispatcher.wait_idle(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn panicking_task_does_not_affect_later_tasks() {
        let dispatcher = Dispatcher::new();
        let counter = Arc::new(AtomicU32::new(0));

        dispatcher.run("explodes", async {
            panic!("smtp client exploded");
        });

        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            dispatcher.run("counts", async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        assert!(dispatcher.wait_idle(Duration::from_secs(1)).await);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn contain_converts_panics_and_errors() {
        let panicked = contain(async { panic!("boom") }).await;
        assert!(matches!(panicked, Err(TaskError::Panicked(msg)) if msg == "boom"));

        let owned = contain(async { panic!("{} {}", "formatted", 1) }).await;
        assert!(matches!(owned, Err(TaskError::Panicked(msg)) if msg == "formatted 1"));

        let failed = contain(async { Err(anyhow::anyhow!("delivery failed")) }).await;
        assert!(matches!(failed, Err(TaskError::Failed(e)) if e.to_string() == "delivery failed"));

        assert!(contain(async { Ok(()) }).await.is_ok());
    }

    #[tokio::test]
    async fn wait_idle_times_out_without_cancelling() {
        let dispatcher = Dispatcher::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        dispatcher.run("slow", async move {
            let _ = release_rx.await;
            Ok(())
        });

        assert!(!dispatcher.wait_idle(Duration::from_millis(30)).await);
        assert_eq!(dispatcher.in_flight(), 1);

        release_tx.send(()).unwrap();
        assert!(dispatcher.wait_idle(Duration::from_secs(1)).await);
    }
}
