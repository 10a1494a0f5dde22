//! Cache Store Module
//!
//! Main cache engine combining HashMap storage with LRU tracking, timing-wheel
//! expiration and coalesced loading.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::lru::{EvictionPolicy, KeyLru, NoLru};
use crate::cache::stats::{CacheStats, StatsCounter};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::jitter::Jitter;
use crate::sync::SharedCalls;
use crate::tasks::spawn_stats_reporter;
use crate::wheel::{Execute, TimingWheel};

// == Locked State ==
/// Map and eviction policy, always accessed together under one mutex.
struct State<V> {
    data: HashMap<String, V>,
    lru: Box<dyn EvictionPolicy>,
}

impl<V> State<V> {
    /// Stores `value` and tracks `key`. Returns whether the key was already
    /// present and the keys the policy evicted; evicted keys are already gone
    /// from the map, their timers are not.
    fn insert(&mut self, key: &str, value: V) -> (bool, Vec<String>) {
        let existed = self.data.insert(key.to_owned(), value).is_some();

        let State { data, lru } = self;
        let mut evicted = Vec::new();
        lru.add(key, &mut |gone| {
            data.remove(&gone);
            evicted.push(gone);
        });

        (existed, evicted)
    }

    /// Drops `key` from the map and the policy. Caller holds the lock.
    fn forget(&mut self, key: &str) -> Option<V> {
        let State { data, lru } = self;
        let value = data.remove(key);
        lru.remove(key, &mut |gone| {
            data.remove(&gone);
        });
        value
    }
}

struct Inner<V> {
    name: String,
    expire: Duration,
    state: Mutex<State<V>>,
    wheel: TimingWheel<String, V>,
    barrier: SharedCalls<V, CacheError>,
    jitter: Jitter,
    stats: StatsCounter,
}

impl<V> Drop for Inner<V> {
    fn drop(&mut self) {
        self.wheel.stop();
    }
}

// == Cache ==
/// In-process cache with per-key expiry, optional LRU bound and coalesced
/// loading through [`Cache::take`].
///
/// Handles are cheap to clone. Expiry is driven by a timing wheel running on
/// the tokio runtime the cache was built in; dropping the last handle stops it.
pub struct Cache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for Cache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> std::fmt::Debug for Cache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.inner.name)
            .field("expire", &self.inner.expire)
            .field("size", &self.inner.state.lock().data.len())
            .finish()
    }
}

impl<V> Cache<V>
where
    V: Clone + Send + Sync + 'static,
{
    // == Constructors ==
    /// Creates an unbounded cache whose entries expire after `expire`.
    pub fn new(expire: Duration) -> Result<Self> {
        Self::builder(expire).build()
    }

    /// Starts a builder for a cache whose entries expire after `expire`.
    pub fn builder(expire: Duration) -> CacheBuilder<V> {
        CacheBuilder::new(expire)
    }

    /// Diagnostic name given at construction.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Default expiry.
    pub fn expire(&self) -> Duration {
        self.inner.expire
    }

    // == Get ==
    /// Returns a clone of the value stored under `key`.
    ///
    /// Reads do not refresh the key's LRU position.
    pub fn get(&self, key: &str) -> Option<V> {
        let value = self.peek(key);
        match value {
            Some(_) => self.inner.stats.record_hit(),
            None => self.inner.stats.record_miss(),
        }
        value
    }

    fn peek(&self, key: &str) -> Option<V> {
        self.inner.state.lock().data.get(key).cloned()
    }

    // == Set ==
    /// Stores `value` under `key` with the default expiry.
    pub async fn set(&self, key: &str, value: V) -> Result<()> {
        self.set_with_expire(key, value, self.inner.expire).await
    }

    /// Stores `value` under `key`, expiring after roughly `expire`.
    ///
    /// Overwriting a key moves its existing timer; a new key gets a new one.
    pub async fn set_with_expire(&self, key: &str, value: V, expire: Duration) -> Result<()> {
        check_expire(expire)?;
        self.check_open()?;

        let (existed, evicted) = self.inner.state.lock().insert(key, value.clone());
        let armed = self.arm_timer(key, value, expire, existed, evicted).await;
        self.untrack_on_error(key, armed)
    }

    // == Take ==
    /// Returns the value under `key`, loading it with `fetch` on a miss.
    ///
    /// Concurrent misses for the same key share one `fetch`; all of them
    /// receive its value or its error. A loaded value is stored with the
    /// default expiry.
    pub async fn take<F, Fut>(&self, key: &str, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        self.take_with_expire(key, self.inner.expire, fetch).await
    }

    /// Like [`Cache::take`], storing a loaded value with `expire`.
    pub async fn take_with_expire<F, Fut>(&self, key: &str, expire: Duration, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        self.inner
            .barrier
            .call(key, || async move {
                // Another caller may have stored it since our lookup.
                if let Some(value) = self.peek(key) {
                    return Ok(value);
                }

                let value = fetch().await?;
                self.set_with_expire(key, value.clone(), expire).await?;
                Ok(value)
            })
            .await
    }

    // == Refresh ==
    /// Stores `value` under `key` and arms a fresh timer with the default
    /// expiry.
    pub async fn refresh(&self, key: &str, value: V) -> Result<()> {
        self.refresh_with_expire(key, value, self.inner.expire).await
    }

    /// Stores `value` under `key` and arms a fresh timer, whether or not the
    /// key already had one.
    pub async fn refresh_with_expire(&self, key: &str, value: V, expire: Duration) -> Result<()> {
        check_expire(expire)?;
        self.check_open()?;

        let (_, evicted) = self.inner.state.lock().insert(key, value.clone());
        let armed = self.arm_timer(key, value, expire, false, evicted).await;
        self.untrack_on_error(key, armed)
    }

    // == Delete ==
    /// Removes `key` and cancels its timer. Absent keys are fine.
    pub async fn del(&self, key: &str) -> Result<()> {
        self.inner.state.lock().forget(key);
        self.inner.wheel.remove_timer(key.to_owned()).await
    }

    // == Size ==
    /// Number of entries.
    pub fn size(&self) -> usize {
        self.inner.state.lock().data.len()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    // == Stats ==
    /// Snapshot of the cache counters.
    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot(&self.inner.name, self.size())
    }

    // == Close ==
    /// Stops expiry for good. Later writes and deletes fail with
    /// [`CacheError::Closed`]; reads keep working on what is left.
    pub fn close(&self) {
        self.inner.wheel.stop();
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.wheel.is_stopped() {
            return Err(CacheError::Closed);
        }
        Ok(())
    }

    /// Cancels the timers of evicted keys, then moves the timer of `key` if
    /// it already had one or arms a new one.
    async fn arm_timer(
        &self,
        key: &str,
        value: V,
        expire: Duration,
        existed: bool,
        evicted: Vec<String>,
    ) -> Result<()> {
        self.forget_timers(evicted).await?;

        let ttl = self.ttl(expire);
        if existed {
            self.inner.wheel.move_timer(key.to_owned(), ttl).await
        } else {
            self.inner.wheel.set_timer(key.to_owned(), value, ttl).await
        }
    }

    /// Drops `key` again when its timer could not be armed, so no entry is
    /// left without an expiry.
    fn untrack_on_error(&self, key: &str, armed: Result<()>) -> Result<()> {
        if armed.is_err() {
            self.inner.state.lock().forget(key);
        }
        armed
    }

    fn ttl(&self, expire: Duration) -> Duration {
        self.inner
            .jitter
            .around_duration(expire)
            .max(Duration::from_nanos(1))
    }

    /// Cancels the timers of keys the LRU policy pushed out.
    async fn forget_timers(&self, evicted: Vec<String>) -> Result<()> {
        if evicted.is_empty() {
            return Ok(());
        }

        self.inner.stats.record_evictions(evicted.len());
        debug!(cache = %self.inner.name, count = evicted.len(), "evicted least recently used keys");
        for key in evicted {
            self.inner.wheel.remove_timer(key).await?;
        }
        Ok(())
    }
}

fn check_expire(expire: Duration) -> Result<()> {
    if expire.is_zero() {
        return Err(CacheError::Argument(format!("expire: {:?}", expire)));
    }
    Ok(())
}

// == Cache Builder ==
/// Options for building a [`Cache`].
pub struct CacheBuilder<V> {
    expire: Duration,
    limit: usize,
    name: String,
    execute: Option<Execute<String, V>>,
    interval: Duration,
    slots: usize,
    deviation: f64,
    stats_interval: Option<Duration>,
}

impl<V> CacheBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Starts from the default configuration with the given expiry and no
    /// stats reporting.
    pub fn new(expire: Duration) -> Self {
        let config = CacheConfig::default();
        Self {
            expire,
            stats_interval: None,
            ..Self::from_config(&config)
        }
    }

    /// Starts from a loaded configuration.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            expire: config.expire(),
            limit: config.limit,
            name: String::new(),
            execute: None,
            interval: config.wheel_interval(),
            slots: config.wheel_slots,
            deviation: config.jitter_deviation,
            stats_interval: config.stats_interval(),
        }
    }

    /// Bounds the cache to `limit` keys with LRU eviction; 0 means unbounded.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Names the cache in logs and stats.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replaces the expiry callback.
    ///
    /// The default callback deletes the expired key. A replacement is fully
    /// responsible for what happens to it, including calling [`Cache::del`].
    pub fn execute<F, Fut>(mut self, execute: F) -> Self
    where
        F: Fn(String, V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.execute = Some(Arc::new(move |key: String, value: V| {
            execute(key, value).boxed()
        }));
        self
    }

    /// Sets the timing-wheel tick and slot count.
    pub fn wheel(mut self, interval: Duration, slots: usize) -> Self {
        self.interval = interval;
        self.slots = slots;
        self
    }

    /// Sets the relative jitter applied to every expiry.
    pub fn jitter(mut self, deviation: f64) -> Self {
        self.deviation = deviation;
        self
    }

    /// Logs a stats line every `interval`.
    /// A zero interval disables reporting.
    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    // == Build ==
    /// Builds the cache. Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// [`CacheError::Argument`] for a zero expiry, tick or slot count.
    pub fn build(self) -> Result<Cache<V>> {
        check_expire(self.expire)?;

        let handle: Arc<OnceLock<Weak<Inner<V>>>> = Arc::new(OnceLock::new());
        let execute: Execute<String, V> = match self.execute {
            Some(execute) => execute,
            None => {
                let handle = handle.clone();
                Arc::new(move |key: String, _value: V| {
                    let inner = handle.get().and_then(Weak::upgrade);
                    async move {
                        let Some(inner) = inner else { return };
                        let cache = Cache { inner };
                        if let Err(err) = cache.del(&key).await {
                            warn!(cache = %cache.inner.name, %key, %err, "failed to delete expired key");
                        }
                    }
                    .boxed()
                })
            }
        };

        let wheel = TimingWheel::new(self.interval, self.slots, move |key: String, value: V| {
            execute(key, value)
        })?;

        let lru: Box<dyn EvictionPolicy> = if self.limit > 0 {
            Box::new(KeyLru::new(self.limit))
        } else {
            Box::new(NoLru)
        };

        let inner = Arc::new(Inner {
            name: self.name,
            expire: self.expire,
            state: Mutex::new(State {
                data: HashMap::new(),
                lru,
            }),
            wheel,
            barrier: SharedCalls::new(),
            jitter: Jitter::new(self.deviation),
            stats: StatsCounter::default(),
        });
        let _ = handle.set(Arc::downgrade(&inner));

        if let Some(interval) = self.stats_interval {
            let weak = Arc::downgrade(&inner);
            spawn_stats_reporter(interval, move || {
                weak.upgrade().map(|inner| Cache { inner }.stats())
            });
        }

        Ok(Cache { inner })
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::mpsc;
    use tokio::time::sleep;

    const SECOND: Duration = Duration::from_secs(1);

    fn cache(expire: Duration) -> Cache<String> {
        Cache::builder(expire).name("test").build().unwrap()
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = cache(60 * SECOND);

        cache.set("key1", "value1".to_string()).await.unwrap();

        assert_eq!(cache.get("key1"), Some("value1".to_string()));
        assert_eq!(cache.size(), 1);
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let cache = cache(60 * SECOND);
        assert_eq!(cache.get("nonexistent"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_overwrite() {
        let cache = cache(60 * SECOND);

        cache.set("key1", "value1".to_string()).await.unwrap();
        cache.set("key1", "value2".to_string()).await.unwrap();

        assert_eq!(cache.get("key1"), Some("value2".to_string()));
        assert_eq!(cache.size(), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let cache = cache(60 * SECOND);

        cache.set("key1", "value1".to_string()).await.unwrap();
        cache.del("key1").await.unwrap();

        assert!(cache.is_empty());
        assert_eq!(cache.get("key1"), None);
    }

    #[tokio::test]
    async fn test_delete_nonexistent() {
        let cache = cache(60 * SECOND);
        cache.del("nonexistent").await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_expire_is_rejected() {
        let cache = cache(60 * SECOND);

        assert!(matches!(
            cache.set_with_expire("k", "v".into(), Duration::ZERO).await,
            Err(CacheError::Argument(_))
        ));
        assert!(matches!(
            cache.refresh_with_expire("k", "v".into(), Duration::ZERO).await,
            Err(CacheError::Argument(_))
        ));
        assert_eq!(cache.size(), 0);
        assert!(matches!(
            Cache::<String>::new(Duration::ZERO),
            Err(CacheError::Argument(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires() {
        let cache = cache(10 * SECOND);
        cache.set("key1", "value1".to_string()).await.unwrap();

        sleep(8 * SECOND).await;
        assert!(cache.get("key1").is_some());

        sleep(4 * SECOND).await;
        assert!(cache.get("key1").is_none());
        assert_eq!(cache.size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_extends_expiry() {
        let cache = cache(10 * SECOND);
        cache.set("key1", "v1".to_string()).await.unwrap();

        sleep(6 * SECOND).await;
        cache.set("key1", "v2".to_string()).await.unwrap();

        sleep(7 * SECOND).await;
        assert_eq!(cache.get("key1"), Some("v2".to_string()));

        sleep(5 * SECOND).await;
        assert_eq!(cache.get("key1"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_rearms_timer() {
        let cache = cache(5 * SECOND);
        cache.set("key1", "v1".to_string()).await.unwrap();

        sleep(3 * SECOND).await;
        cache.refresh("key1", "v2".to_string()).await.unwrap();

        sleep(Duration::from_millis(3500)).await;
        assert_eq!(cache.get("key1"), Some("v2".to_string()));

        sleep(3 * SECOND).await;
        assert_eq!(cache.get("key1"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_after_expiry() {
        let cache = cache(3 * SECOND);
        cache.set("key1", "v1".to_string()).await.unwrap();
        sleep(5 * SECOND).await;
        assert!(cache.is_empty());

        cache.refresh("key1", "v2".to_string()).await.unwrap();
        assert_eq!(cache.get("key1"), Some("v2".to_string()));

        sleep(5 * SECOND).await;
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_eviction() {
        let cache: Cache<u32> = Cache::builder(60 * SECOND).limit(2).build().unwrap();

        cache.set("x", 1).await.unwrap();
        cache.set("y", 2).await.unwrap();
        cache.set("z", 3).await.unwrap();

        assert_eq!(cache.get("x"), None);
        assert_eq!(cache.get("y"), Some(2));
        assert_eq!(cache.get("z"), Some(3));
        assert_eq!(cache.size(), 2);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_write_bumps_recency() {
        let cache: Cache<u32> = Cache::builder(60 * SECOND).limit(2).build().unwrap();

        cache.set("x", 1).await.unwrap();
        cache.set("y", 2).await.unwrap();
        cache.set("x", 10).await.unwrap();
        cache.set("z", 3).await.unwrap();

        assert_eq!(cache.get("x"), Some(10));
        assert_eq!(cache.get("y"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicted_key_timer_is_cancelled() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cache: Cache<u32> = Cache::builder(5 * SECOND)
            .limit(1)
            .execute(move |key, _| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(key);
                }
            })
            .build()
            .unwrap();

        cache.set("a", 1).await.unwrap();
        cache.set("b", 2).await.unwrap();

        // Only the surviving key's timer fires.
        assert_eq!(rx.recv().await, Some("b".to_string()));
        sleep(20 * SECOND).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_execute_replaces_delete() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cache: Cache<u32> = Cache::builder(2 * SECOND)
            .execute(move |key, value| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send((key, value));
                }
            })
            .build()
            .unwrap();

        cache.set("k", 42).await.unwrap();

        assert_eq!(rx.recv().await, Some(("k".to_string(), 42)));
        // The custom callback did not delete the entry.
        assert_eq!(cache.get("k"), Some(42));
    }

    #[tokio::test]
    async fn test_take_hit_skips_fetch() {
        let cache = cache(60 * SECOND);
        cache.set("k", "cached".to_string()).await.unwrap();

        let value = cache
            .take("k", || async { anyhow::bail!("fetch must not run") })
            .await
            .unwrap();
        assert_eq!(value, "cached");
    }

    #[tokio::test]
    async fn test_take_miss_stores_value() {
        let cache = cache(60 * SECOND);

        let value = cache
            .take("k", || async { Ok("loaded".to_string()) })
            .await
            .unwrap();

        assert_eq!(value, "loaded");
        assert_eq!(cache.get("k"), Some("loaded".to_string()));
    }

    #[tokio::test]
    async fn test_take_error_is_not_cached() {
        let cache = cache(60 * SECOND);
        let calls = AtomicUsize::new(0);

        let err = cache
            .take("k", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("backend down")
            })
            .await
            .unwrap_err();
        assert_eq!(err.fetch_error().unwrap().to_string(), "backend down");
        assert_eq!(cache.get("k"), None);

        let value = cache
            .take("k", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("recovered".to_string())
            })
            .await
            .unwrap();
        assert_eq!(value, "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_with_expire_uses_given_expiry() {
        let cache = cache(600 * SECOND);

        cache
            .take_with_expire("k", 3 * SECOND, || async { Ok("v".to_string()) })
            .await
            .unwrap();

        sleep(5 * SECOND).await;
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test]
    async fn test_stats_track_lookups() {
        let cache = cache(60 * SECOND);
        cache.set("k", "v".to_string()).await.unwrap();

        cache.get("k");
        cache.get("missing");

        let stats = cache.stats();
        assert_eq!(stats.name, "test");
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_entries, 1);
    }

    #[tokio::test]
    async fn test_close_rejects_writes() {
        let cache = cache(60 * SECOND);
        cache.set("k", "v".to_string()).await.unwrap();
        cache.close();

        assert!(matches!(
            cache.set("other", "v".to_string()).await,
            Err(CacheError::Closed)
        ));
        assert_eq!(cache.get("other"), None);
        assert!(matches!(
            cache.refresh("fresh", "v".to_string()).await,
            Err(CacheError::Closed)
        ));
        assert_eq!(cache.get("fresh"), None);
        assert!(matches!(
            cache.take("loaded", || async { Ok("v".to_string()) }).await,
            Err(CacheError::Closed)
        ));
        assert_eq!(cache.get("loaded"), None);

        assert_eq!(cache.get("k"), Some("v".to_string()));
        assert_eq!(cache.size(), 1);
        assert!(matches!(cache.del("missing").await, Err(CacheError::Closed)));
    }

    #[test]
    fn test_zero_stats_interval_disables_reporting() {
        let builder = Cache::<u32>::builder(SECOND).stats_interval(Duration::ZERO);
        assert_eq!(builder.stats_interval, None);

        let builder = Cache::<u32>::builder(SECOND).stats_interval(30 * SECOND);
        assert_eq!(builder.stats_interval, Some(30 * SECOND));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_expire_is_accepted() {
        let cache = cache(60 * SECOND);
        cache
            .set_with_expire("forever", "v".to_string(), Duration::MAX)
            .await
            .unwrap();
        cache.set("short", "v".to_string()).await.unwrap();

        sleep(120 * SECOND).await;
        assert_eq!(cache.get("forever"), Some("v".to_string()));
        assert_eq!(cache.get("short"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_cache_stops_wheel() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let cache: Cache<u32> = Cache::builder(2 * SECOND)
            .execute(move |_, _| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build()
            .unwrap();

        cache.set("k", 1).await.unwrap();
        drop(cache);

        sleep(10 * SECOND).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
