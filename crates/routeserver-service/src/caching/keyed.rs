use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use lru::LruCache;
use sentry::{Hub, SentryFutureExt};

use super::{CacheEntry, CacheError, CapacityError};

type LoadChannel<V> = Shared<oneshot::Receiver<CacheEntry<Arc<V>>>>;
type LoadSender<V> = oneshot::Sender<CacheEntry<Arc<V>>>;

/// A bounded, string-keyed cache which loads missing entries on demand.
///
/// Values are handed out as [`Arc`]s and are never mutated while cached. Loads run as separate
/// tasks on the current tokio runtime, so a caller giving up on a lookup does not abort the load
/// for everyone else waiting on it.
pub struct KeyedLoadingCache<V> {
    name: &'static str,
    state: Arc<Mutex<CacheState<V>>>,
}

struct CacheState<V> {
    entries: LruCache<String, Arc<V>>,
    /// Loads currently in progress.
    loading: HashMap<String, LoadChannel<V>>,
}

impl<V> Clone for KeyedLoadingCache<V> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            state: Arc::clone(&self.state),
        }
    }
}

impl<V> std::fmt::Debug for KeyedLoadingCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (capacity, entries, loading) = self
            .state
            .try_lock()
            .map(|state| {
                let capacity = state.entries.cap().get();
                (capacity, state.entries.len(), state.loading.len())
            })
            .unwrap_or_default();
        f.debug_struct("KeyedLoadingCache")
            .field("name", &self.name)
            .field("capacity", &capacity)
            .field("in-memory items", &entries)
            .field("running loads", &loading)
            .finish()
    }
}

impl<V: Send + Sync + 'static> KeyedLoadingCache<V> {
    pub fn new(name: &'static str, capacity: usize) -> Result<Self, CapacityError> {
        let capacity = NonZeroUsize::new(capacity).ok_or(CapacityError { name })?;

        Ok(Self {
            name,
            state: Arc::new(Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                loading: HashMap::new(),
            })),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        lock(&self.state).entries.cap().get()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.state).entries.contains(key)
    }

    /// Returns the cached value for `key` without marking it as used.
    pub fn peek(&self, key: &str) -> Option<Arc<V>> {
        lock(&self.state).entries.peek(key).cloned()
    }

    /// Returns the value for `key`, loading it with `loader` if it is not cached.
    ///
    /// `loader` is only invoked if the key is neither cached nor currently being loaded by
    /// another caller. It runs on its own task, without holding any lock on the cache.
    /// Concurrent callers of the same key all receive the result of that single load. Errors are
    /// passed on to all of them, but are not cached.
    pub async fn get<F, Fut>(&self, key: &str, loader: F) -> CacheEntry<Arc<V>>
    where
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = CacheEntry<V>> + Send + 'static,
    {
        let name = self.name;
        metric!(counter("caches.access") += 1, "cache" => name);

        let (channel, sender) = {
            let mut state = lock(&self.state);
            if let Some(value) = state.entries.get(key) {
                metric!(counter("caches.memory.hit") += 1, "cache" => name);
                return Ok(Arc::clone(value));
            }

            match state.loading.get(key) {
                Some(channel) => {
                    metric!(counter("caches.channel.hit") += 1, "cache" => name);
                    (channel.clone(), None)
                }
                None => {
                    let (sender, receiver) = oneshot::channel();
                    let channel = receiver.shared();
                    state.loading.insert(key.to_owned(), channel.clone());
                    (channel, Some(sender))
                }
            }
        };

        if let Some(sender) = sender {
            self.spawn_load(key.to_owned(), loader, sender);
        }

        channel.await.unwrap_or_else(|_cancelled| {
            tracing::error!(cache = name, key, "Load channel dropped");
            Err(CacheError::InternalError)
        })
    }

    /// Installs `value` under `key`, replacing any cached value.
    pub fn put(&self, key: &str, value: V) -> Arc<V> {
        let value = Arc::new(value);
        let mut state = lock(&self.state);
        state.push(self.name, key.to_owned(), Arc::clone(&value));
        value
    }

    fn spawn_load<F, Fut>(&self, key: String, loader: F, sender: LoadSender<V>)
    where
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = CacheEntry<V>> + Send + 'static,
    {
        let name = self.name;
        let state = Arc::clone(&self.state);

        let future = async move {
            tracing::debug!(cache = name, key, "Loading");
            let load_key = key.clone();
            let load = async move { loader(load_key).await };
            let result = match AssertUnwindSafe(load).catch_unwind().await {
                Ok(result) => result,
                Err(_panic) => {
                    tracing::error!(cache = name, key, "Loader panicked");
                    Err(CacheError::InternalError)
                }
            };

            let status = match &result {
                Ok(_) => "ok",
                Err(err) => err.kind(),
            };
            metric!(counter("caches.load") += 1, "cache" => name, "status" => status);

            // Installing the value and retiring the channel happen under one lock, so that a
            // concurrent lookup either finds the entry or joins this load.
            let result = {
                let mut state = lock(&state);
                state.loading.remove(&key);
                result.map(|value| state.install(name, key, value))
            };
            sender.send(result).ok();
        }
        .bind_hub(Hub::new_from_top(Hub::current()));

        tokio::spawn(future);
    }
}

impl<V> CacheState<V> {
    /// Installs a freshly loaded value.
    ///
    /// A value put into the cache while the load was running takes precedence.
    fn install(&mut self, name: &'static str, key: String, value: V) -> Arc<V> {
        if let Some(existing) = self.entries.get(&key) {
            return Arc::clone(existing);
        }
        let value = Arc::new(value);
        self.push(name, key, Arc::clone(&value));
        value
    }

    fn push(&mut self, name: &'static str, key: String, value: Arc<V>) {
        let pushed = key.clone();
        if let Some((evicted, _)) = self.entries.push(key, value) {
            if evicted != pushed {
                tracing::debug!(cache = name, key = %evicted, "Evicted");
                metric!(counter("caches.evicted") += 1, "cache" => name);
            }
        }
    }
}

fn lock<V>(state: &Mutex<CacheState<V>>) -> MutexGuard<'_, CacheState<V>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
