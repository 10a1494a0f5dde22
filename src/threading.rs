//! Threading Module
//!
//! Panic-guarded task helpers shared by the timing wheel and the cleaner.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::error;

// == Run Safe ==
/// Awaits `fut`, logging and swallowing a panic instead of unwinding.
pub async fn run_safe<F>(fut: F)
where
    F: Future<Output = ()>,
{
    if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
        error!(panic = %panic_message(&panic), "recovered from panic in task");
    }
}

// == Go Safe ==
/// Spawns `fut` on the runtime behind [`run_safe`].
pub fn go_safe<F>(fut: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(run_safe(fut))
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

// == Task Runner ==
/// Runs tasks on spawned tasks with at most `concurrency` of them in flight.
///
/// [`TaskRunner::schedule`] waits for a free slot, so a saturated runner
/// pushes back on whoever is scheduling.
#[derive(Debug, Clone)]
pub struct TaskRunner {
    permits: Arc<Semaphore>,
}

impl TaskRunner {
    /// Creates a runner allowing `concurrency` tasks at once (at least one).
    pub fn new(concurrency: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Waits for a free slot, then spawns `task`. The slot is released when
    /// the task finishes, whether it completed or panicked.
    pub async fn schedule<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // The semaphore is never closed.
        let Ok(permit) = self.permits.clone().acquire_owned().await else {
            return;
        };

        go_safe(async move {
            let _permit = permit;
            task.await;
        });
    }

    /// Number of free slots.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
