//! Single-flight memoizing cache for expensive resources.
//!
//! [`ResourceCache::get_or_create`] runs the factory at most once per key
//! while a construction is in flight; every concurrent caller for that key
//! waits for the same outcome. Successes are retained until
//! [`ResourceCache::invalidate`]; failures are handed to the waiters and then
//! forgotten, so the next call builds again.
//!
//! The cache performs no logging or other side effects of its own. Callers
//! that want progress reporting wrap the call.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::error::{CaptionError, CaptionResult};

type Outcome<V> = CaptionResult<Arc<V>>;

enum Slot<V> {
    Ready(Arc<V>),
    Building {
        generation: u64,
        outcome: watch::Receiver<Option<Outcome<V>>>,
    },
}

enum Step<V> {
    Wait(watch::Receiver<Option<Outcome<V>>>),
    Build {
        generation: u64,
        publish: watch::Sender<Option<Outcome<V>>>,
    },
}

/// Memoizes one shared `Arc<V>` per key.
///
/// No lock is held while the factory runs or while a cached value is used.
pub struct ResourceCache<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
    next_generation: AtomicU64,
}

impl<K, V> Default for ResourceCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync,
    V: Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ResourceCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync,
    V: Send + Sync,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Slot<V>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cached value for `key`, constructing it with `factory` if
    /// needed.
    ///
    /// If the caller that is constructing is dropped mid-flight, one of the
    /// waiters takes over with its own factory.
    pub async fn get_or_create<F, Fut>(&self, key: &K, factory: F) -> CaptionResult<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CaptionResult<V>>,
    {
        let mut factory = Some(factory);

        loop {
            let step = {
                let mut slots = self.lock();
                match slots.get(key) {
                    Some(Slot::Ready(value)) => return Ok(Arc::clone(value)),
                    Some(Slot::Building { outcome, .. }) => Step::Wait(outcome.clone()),
                    None => {
                        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                        let (publish, outcome) = watch::channel(None);
                        slots.insert(
                            key.clone(),
                            Slot::Building {
                                generation,
                                outcome,
                            },
                        );
                        Step::Build {
                            generation,
                            publish,
                        }
                    }
                }
            };

            match step {
                Step::Wait(mut outcome) => {
                    if let Ok(published) = outcome.wait_for(Option::is_some).await {
                        if let Some(result) = published.as_ref() {
                            return result.clone();
                        }
                    }
                    // Builder went away without publishing; race for the slot again.
                }
                Step::Build {
                    generation,
                    publish,
                } => {
                    let mut guard = BuildGuard {
                        cache: self,
                        key,
                        generation,
                        finished: false,
                    };
                    let Some(factory) = factory.take() else {
                        return Err(CaptionError::ConstructionFailure {
                            resource: key.to_string(),
                            reason: "factory already consumed".to_string(),
                        });
                    };

                    let result = factory().await.map(Arc::new);
                    guard.finish(&result);
                    publish.send_replace(Some(result.clone()));
                    return result;
                }
            }
        }
    }

    /// Drop the cached entry for `key`. Holders of the old `Arc` keep it.
    ///
    /// An in-flight construction for `key` still completes for its waiters
    /// but is not retained. Returns `true` when an entry was removed.
    pub fn invalidate(&self, key: &K) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Cached value for `key`, without constructing.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        match self.lock().get(key) {
            Some(Slot::Ready(value)) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    /// `true` when a constructed value is cached for `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Number of constructed values currently cached.
    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Settles the slot a builder reserved, including when the builder is dropped.
struct BuildGuard<'a, K, V>
where
    K: Eq + Hash,
{
    cache: &'a ResourceCache<K, V>,
    key: &'a K,
    generation: u64,
    finished: bool,
}

impl<K, V> BuildGuard<'_, K, V>
where
    K: Eq + Hash + Clone,
{
    fn owns_slot(&self, slots: &HashMap<K, Slot<V>>) -> bool {
        matches!(
            slots.get(self.key),
            Some(Slot::Building { generation, .. }) if *generation == self.generation
        )
    }

    fn finish(&mut self, result: &Outcome<V>) {
        self.finished = true;
        let mut slots = self.cache.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.owns_slot(&slots) {
            // Invalidated while building.
            return;
        }
        match result {
            Ok(value) => {
                slots.insert(self.key.clone(), Slot::Ready(Arc::clone(value)));
            }
            Err(_) => {
                slots.remove(self.key);
            }
        }
    }
}

impl<K, V> Drop for BuildGuard<'_, K, V>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut slots = self.cache.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let owned = matches!(
            slots.get(self.key),
            Some(Slot::Building { generation, .. }) if *generation == self.generation
        );
        if owned {
            slots.remove(self.key);
        }
    }
}
