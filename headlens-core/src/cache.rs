//! Keyed snapshot cache with singleflight semantics.
//!
//! Concurrent requests for the same uncomputed key coalesce onto one
//! pipeline execution; requests for different keys never block each other.
//! The computation runs in a spawned task, so a waiter that times out
//! (caller-side `tokio::time::timeout`) does not abort it for the others.
//! A failed computation is fanned out to every waiter and the entry is
//! removed: the key is never poisoned and the next request retries.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, watch};
use tracing::{debug, warn};

use crate::error::{ProfilerError, Result};
use crate::snapshot::ProfileSnapshot;

/// Everything that determines a profiler run's output. Any change in any
/// component yields a different cache key and forces recomputation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ProfileKey {
    pub model_id: String,
    pub corpus_hash: String,
    pub cluster_count: usize,
    pub reducer_seed: u64,
    pub clusterer_seed: u64,
}

impl ProfileKey {
    /// Stable sha256 over the canonical JSON form.
    pub fn cache_key(&self) -> String {
        let json = serde_json::to_vec(self).expect("key serialization cannot fail");
        let mut hasher = Sha256::new();
        hasher.update(&json);
        format!("{:x}", hasher.finalize())
    }
}

enum ComputeState<V> {
    Pending,
    Done(std::result::Result<Arc<V>, String>),
}

// Manual impl: the payload is behind an `Arc`, so the state is cloneable
// for any `V`, Clone or not.
impl<V> Clone for ComputeState<V> {
    fn clone(&self) -> Self {
        match self {
            Self::Pending => Self::Pending,
            Self::Done(result) => Self::Done(result.clone()),
        }
    }
}

enum Entry<V> {
    InFlight(watch::Receiver<ComputeState<V>>),
    Ready(Arc<V>),
}

struct CacheInner<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
    computations: AtomicU64,
}

/// Populate-on-first-access cache of immutable values, keyed by
/// [`ProfileKey`]. Defaults to holding [`ProfileSnapshot`]s.
pub struct ProfileCache<V = ProfileSnapshot> {
    inner: Arc<CacheInner<V>>,
}

impl<V> Default for ProfileCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Clone for ProfileCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> ProfileCache<V> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
                computations: AtomicU64::new(0),
            }),
        }
    }

    /// Fetch without computing.
    pub async fn get(&self, key: &ProfileKey) -> Option<Arc<V>> {
        let entries = self.inner.entries.lock().await;
        match entries.get(&key.cache_key()) {
            Some(Entry::Ready(value)) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    /// Drop the entry for `key`. In-flight waiters still receive their
    /// result; only future lookups recompute.
    pub async fn invalidate(&self, key: &ProfileKey) {
        let mut entries = self.inner.entries.lock().await;
        entries.remove(&key.cache_key());
    }

    /// Number of pipeline executions started (for tests and diagnostics).
    pub fn computations(&self) -> u64 {
        self.inner.computations.load(Ordering::SeqCst)
    }
}

impl<V: Send + Sync + 'static> ProfileCache<V> {
    /// Return the cached value for `key`, computing it at most once across
    /// all concurrent callers. `compute` runs detached; its result is
    /// published to every waiter.
    pub async fn get_or_compute<F, Fut>(&self, key: &ProfileKey, compute: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let cache_key = key.cache_key();
        let mut rx = {
            let mut entries = self.inner.entries.lock().await;
            match entries.get(&cache_key) {
                Some(Entry::Ready(value)) => return Ok(Arc::clone(value)),
                Some(Entry::InFlight(rx)) => rx.clone(),
                None => {
                    let (tx, rx) = watch::channel(ComputeState::Pending);
                    entries.insert(cache_key.clone(), Entry::InFlight(rx.clone()));
                    self.inner.computations.fetch_add(1, Ordering::SeqCst);
                    debug!(key = %cache_key, "starting profile computation");
                    let inner = Arc::clone(&self.inner);
                    let task_key = cache_key.clone();
                    let fut = compute();
                    tokio::spawn(async move {
                        let outcome = fut.await;
                        let mut entries = inner.entries.lock().await;
                        let state = match outcome {
                            Ok(value) => {
                                let value = Arc::new(value);
                                entries.insert(task_key, Entry::Ready(Arc::clone(&value)));
                                ComputeState::Done(Ok(value))
                            }
                            Err(e) => {
                                // Leave no entry behind: the key can be
                                // retried by the next caller.
                                warn!(key = %task_key, error = %e, "profile computation failed");
                                entries.remove(&task_key);
                                ComputeState::Done(Err(e.to_string()))
                            }
                        };
                        drop(entries);
                        let _ = tx.send(state);
                    });
                    rx
                }
            }
        };

        loop {
            if let ComputeState::Done(result) = rx.borrow_and_update().clone() {
                return result.map_err(ProfilerError::CacheCompute);
            }
            if rx.changed().await.is_err() {
                // Compute task dropped its sender without publishing; clear
                // the stale entry so a retry is possible.
                let mut entries = self.inner.entries.lock().await;
                if matches!(entries.get(&cache_key), Some(Entry::InFlight(_))) {
                    entries.remove(&cache_key);
                }
                return Err(ProfilerError::CacheCompute(
                    "computation task terminated without a result".into(),
                ));
            }
        }
    }
}
