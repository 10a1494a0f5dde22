//! Cache Cleaner Task
//!
//! Retries cache cleanup work (typically deleting keys from a remote store)
//! until it succeeds or the backoff ladder runs out.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::threading::TaskRunner;
use crate::wheel::TimingWheel;

const WHEEL_INTERVAL: Duration = Duration::from_secs(1);
const WHEEL_SLOTS: usize = 300;
const WORKERS: usize = 5;
const KEY_LEN: usize = 8;

/// Cleanup work; called once per attempt.
type CleanFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Clone)]
struct CleanTask {
    delay: Duration,
    task: CleanFn,
    keys: Vec<String>,
}

/// Delay before the next attempt after one scheduled with `delay` failed.
fn next_delay(delay: Duration) -> Option<Duration> {
    match delay.as_secs() {
        0..=1 => Some(Duration::from_secs(5)),
        2..=5 => Some(Duration::from_secs(60)),
        6..=60 => Some(Duration::from_secs(5 * 60)),
        61..=300 => Some(Duration::from_secs(60 * 60)),
        _ => None,
    }
}

fn random_key() -> String {
    std::iter::repeat_with(fastrand::alphanumeric)
        .take(KEY_LEN)
        .collect()
}

// == Cache Cleaner ==
/// Runs cleanup tasks in the background, retrying failures with backoff.
///
/// A task is first attempted one second after it is added. A failed attempt
/// is retried after 5 s, 1 min, 5 min and 1 h; if the last one fails too the
/// task is logged with its keys and dropped.
#[derive(Debug)]
pub struct CacheCleaner {
    wheel: TimingWheel<String, CleanTask>,
}

impl CacheCleaner {
    /// Starts the cleaner. Must be called from within a tokio runtime.
    pub fn new() -> Result<Self> {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let wheel = TimingWheel::new(WHEEL_INTERVAL, WHEEL_SLOTS, move |key: String, task: CleanTask| {
            let _ = fired_tx.send((key, task));
            async {}
        })?;

        tokio::spawn(retry_loop(wheel.clone(), fired_rx, TaskRunner::new(WORKERS)));

        Ok(Self { wheel })
    }

    // == Add Clean Task ==
    /// Schedules `task`, whose purpose is cleaning up `keys`.
    ///
    /// # Arguments
    /// * `task` - Cleanup work, called again on every retry
    /// * `keys` - Keys the task deals with, reported if it finally fails
    pub async fn add_clean_task<F, Fut>(&self, task: F, keys: Vec<String>) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let task = CleanTask {
            delay: WHEEL_INTERVAL,
            task: Arc::new(move || task().boxed()),
            keys,
        };
        self.wheel.set_timer(random_key(), task, WHEEL_INTERVAL).await
    }

    /// Stops the cleaner; pending retries are abandoned.
    pub fn stop(&self) {
        self.wheel.stop();
    }
}

impl Drop for CacheCleaner {
    fn drop(&mut self) {
        self.wheel.stop();
    }
}

/// Runs fired tasks and reschedules the failures. Ends when the wheel stops,
/// which drops the only sender.
async fn retry_loop(
    wheel: TimingWheel<String, CleanTask>,
    mut fired: mpsc::UnboundedReceiver<(String, CleanTask)>,
    runner: TaskRunner,
) {
    while let Some((key, task)) = fired.recv().await {
        let wheel = wheel.clone();
        runner
            .schedule(async move {
                let err = match (task.task)().await {
                    Ok(()) => {
                        debug!(keys = ?task.keys, "clean task done");
                        return;
                    }
                    Err(err) => err,
                };

                let Some(delay) = next_delay(task.delay) else {
                    error!(keys = ?task.keys, %err, "clean task failed, giving up");
                    return;
                };

                warn!(keys = ?task.keys, %err, retry_in = ?delay, "clean task failed, retrying");
                let retry = CleanTask { delay, ..task };
                if let Err(err) = wheel.set_timer(key, retry, delay).await {
                    debug!(%err, "cleaner stopped, dropping clean task");
                }
            })
            .await;
    }
}
