//! Timing Wheel Module
//!
//! A channel-driven timing wheel. One actor task owns the slot ring; handles
//! talk to it only through its mailbox.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, Interval};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::threading::{go_safe, run_safe, TaskRunner};
use crate::wheel::ring::{Moved, Ring};

/// Concurrent workers used to flush a wheel with [`TimingWheel::drain`].
pub const DRAIN_WORKERS: usize = 8;

/// Callback invoked with the key and value of a fired timer.
pub type Execute<K, V> = Arc<dyn Fn(K, V) -> BoxFuture<'static, ()> + Send + Sync>;

enum Command<K, V> {
    Set { key: K, value: V, delay: Duration },
    Move { key: K, delay: Duration },
    Remove(K),
    Drain {
        task: Execute<K, V>,
        done: oneshot::Sender<()>,
    },
}

// == Timing Wheel ==
/// Handle to a running timing wheel.
///
/// Handles are cheap to clone and all refer to the same actor. Every
/// operation waits until the actor accepts it, or fails with
/// [`CacheError::Closed`] once the wheel has been stopped.
pub struct TimingWheel<K, V> {
    interval: Duration,
    commands: mpsc::Sender<Command<K, V>>,
    stop: CancellationToken,
}

impl<K, V> Clone for TimingWheel<K, V> {
    fn clone(&self) -> Self {
        Self {
            interval: self.interval,
            commands: self.commands.clone(),
            stop: self.stop.clone(),
        }
    }
}

impl<K, V> Debug for TimingWheel<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimingWheel")
            .field("interval", &self.interval)
            .field("stopped", &self.stop.is_cancelled())
            .finish()
    }
}

impl<K, V> TimingWheel<K, V> {
    /// Duration of one tick.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    // == Stop ==
    /// Stops the wheel for good. Pending timers never fire.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Returns true once [`TimingWheel::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

impl<K, V> TimingWheel<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    V: Clone + Send + 'static,
{
    // == Constructor ==
    /// Starts a wheel of `num_slots` slots advancing every `interval`.
    ///
    /// Must be called from within a tokio runtime. The first tick happens
    /// one `interval` after construction.
    ///
    /// # Errors
    /// [`CacheError::Argument`] if `interval` or `num_slots` is zero.
    pub fn new<F, Fut>(interval: Duration, num_slots: usize, execute: F) -> Result<Self>
    where
        F: Fn(K, V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if interval.is_zero() || num_slots == 0 {
            return Err(CacheError::Argument(format!(
                "interval: {:?}, slots: {}",
                interval, num_slots
            )));
        }

        let (commands, mailbox) = mpsc::channel(1);
        let stop = CancellationToken::new();
        let ticker = time::interval_at(Instant::now() + interval, interval);

        let actor = Actor {
            ring: Ring::new(interval, num_slots),
            execute: Arc::new(move |key, value| execute(key, value).boxed()),
            drain_runner: TaskRunner::new(DRAIN_WORKERS),
        };
        tokio::spawn(actor.run(ticker, mailbox, stop.clone()));

        Ok(Self {
            interval,
            commands,
            stop,
        })
    }

    // == Set Timer ==
    /// Arms a timer for `key`, or replaces the value of an existing timer
    /// and reschedules it. Delays shorter than one tick fire on the next tick.
    pub async fn set_timer(&self, key: K, value: V, delay: Duration) -> Result<()> {
        check_delay(delay)?;
        self.send(Command::Set { key, value, delay }).await
    }

    // == Move Timer ==
    /// Reschedules the timer of `key`. A delay shorter than one tick runs the
    /// callback right away instead. Unknown keys are ignored.
    pub async fn move_timer(&self, key: K, delay: Duration) -> Result<()> {
        check_delay(delay)?;
        self.send(Command::Move { key, delay }).await
    }

    // == Remove Timer ==
    /// Cancels the timer of `key`. Unknown keys are ignored.
    pub async fn remove_timer(&self, key: K) -> Result<()> {
        self.send(Command::Remove(key)).await
    }

    // == Drain ==
    /// Removes every pending timer and hands each one to `task` on a pool of
    /// [`DRAIN_WORKERS`] workers.
    ///
    /// Returns once all timers have been handed out; the tasks themselves
    /// may still be running.
    pub async fn drain<F, Fut>(&self, task: F) -> Result<()>
    where
        F: Fn(K, V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (done, walked) = oneshot::channel();
        let task: Execute<K, V> = Arc::new(move |key, value| task(key, value).boxed());
        self.send(Command::Drain { task, done }).await?;
        walked.await.map_err(|_| CacheError::Closed)
    }

    async fn send(&self, command: Command<K, V>) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => Err(CacheError::Closed),
            sent = self.commands.send(command) => sent.map_err(|_| CacheError::Closed),
        }
    }
}

fn check_delay(delay: Duration) -> Result<()> {
    if delay.is_zero() {
        return Err(CacheError::Argument(format!("delay: {:?}", delay)));
    }
    Ok(())
}

// == Actor ==
struct Actor<K, V> {
    ring: Ring<K, V>,
    execute: Execute<K, V>,
    drain_runner: TaskRunner,
}

impl<K, V> Actor<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    V: Clone + Send + 'static,
{
    async fn run(
        mut self,
        mut ticker: Interval,
        mut mailbox: mpsc::Receiver<Command<K, V>>,
        stop: CancellationToken,
    ) {
        // However the loop ends, handles must see the wheel as stopped.
        let _stopped = stop.clone().drop_guard();

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => self.on_tick(),
                command = mailbox.recv() => match command {
                    Some(command) => self.handle(command).await,
                    // every handle is gone
                    None => break,
                },
            }
        }

        debug!(pending = self.ring.len(), "timing wheel stopped");
    }

    async fn handle(&mut self, command: Command<K, V>) {
        match command {
            Command::Set { key, value, delay } => self.ring.set(key, value, delay),
            Command::Move { key, delay } => match self.ring.move_timer(&key, delay) {
                Moved::Rescheduled => {}
                Moved::Unknown => debug!(?key, "no timer to move"),
                Moved::RunNow(key, value) => {
                    let execute = self.execute.clone();
                    go_safe(async move { execute(key, value).await });
                }
            },
            Command::Remove(key) => {
                self.ring.remove(&key);
            }
            Command::Drain { task, done } => {
                for (key, value) in self.ring.drain() {
                    let task = task.clone();
                    self.drain_runner
                        .schedule(async move { task(key, value).await })
                        .await;
                }
                let _ = done.send(());
            }
        }
    }

    fn on_tick(&mut self) {
        let fired = self.ring.tick();
        if fired.is_empty() {
            return;
        }

        let execute = self.execute.clone();
        tokio::spawn(async move {
            for (key, value) in fired {
                let execute = execute.clone();
                run_safe(async move { execute(key, value).await }).await;
            }
        });
    }
}
