//! Shared Calls Module
//!
//! Coalesces concurrent calls for the same key into a single execution
//! whose outcome every caller receives.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

type Outcome<T, E> = Option<Result<T, E>>;
type Call<T, E> = Arc<watch::Sender<Outcome<T, E>>>;

// == Shared Calls ==
/// Runs at most one call per key at a time.
///
/// Callers that arrive while a call for their key is in flight wait for it
/// and receive a clone of its result, error included. Once a call has
/// finished its record is gone, so the next caller starts a fresh one.
pub struct SharedCalls<T, E> {
    calls: Mutex<HashMap<String, Call<T, E>>>,
}

impl<T, E> Default for SharedCalls<T, E> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl<T, E> std::fmt::Debug for SharedCalls<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCalls")
            .field("in_flight", &self.calls.lock().len())
            .finish()
    }
}

impl<T, E> SharedCalls<T, E>
where
    T: Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    // == Call ==
    /// Runs `f` unless a call for `key` is already in flight, in which case
    /// its result is awaited and returned instead.
    pub async fn call<F, Fut>(&self, key: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_ex(key, f).await.0
    }

    // == Call Ex ==
    /// Like [`SharedCalls::call`], also reporting whether this caller is the
    /// one that ran `f`.
    ///
    /// If the running call is dropped before it finishes, its waiters start
    /// over and one of them runs its own `f`.
    pub async fn call_ex<F, Fut>(&self, key: &str, f: F) -> (Result<T, E>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let call = loop {
            let mut done = {
                let mut calls = self.calls.lock();
                match calls.get(key) {
                    Some(call) => call.subscribe(),
                    None => {
                        let call = Arc::new(watch::channel(None).0);
                        calls.insert(key.to_owned(), call.clone());
                        break call;
                    }
                }
            };

            let outcome = done
                .wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|outcome| (*outcome).clone());
            if let Some(result) = outcome {
                return (result, false);
            }
        };

        let registered = Deregister {
            calls: &self.calls,
            key,
            call: &call,
        };
        let result = f().await;
        drop(registered);

        call.send_replace(Some(result.clone()));
        (result, true)
    }

    /// Number of keys with a call in flight.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}

/// Removes the record of a call when the call finishes or is dropped.
struct Deregister<'a, T, E> {
    calls: &'a Mutex<HashMap<String, Call<T, E>>>,
    key: &'a str,
    call: &'a Call<T, E>,
}

impl<T, E> Drop for Deregister<'_, T, E> {
    fn drop(&mut self) {
        let mut calls = self.calls.lock();
        if calls
            .get(self.key)
            .is_some_and(|current| Arc::ptr_eq(current, self.call))
        {
            calls.remove(self.key);
        }
    }
}
