//! In-flight request de-duplication
//!
//! At most one request per key is outstanding. A second caller for the
//! same key awaits the first caller's request instead of issuing its own.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::error::{ClientError, Result};
use crate::metrics::DEDUPLICATED_REQUESTS_TOTAL;

type SharedRequest<V> = Shared<BoxFuture<'static, std::result::Result<V, Arc<ClientError>>>>;

/// Pending requests keyed by operation target
pub struct InFlight<K, V>
where
    V: Clone,
{
    pending: Mutex<HashMap<K, SharedRequest<V>>>,
    operation: &'static str,
}

/// Removes the leader's entry even if the leader is dropped mid-request
struct Cleanup<'a, K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pending: &'a Mutex<HashMap<K, SharedRequest<V>>>,
    key: Option<K>,
}

impl<K, V> Drop for Cleanup<'_, K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.remove(&key);
        }
    }
}

impl<K, V> InFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(operation: &'static str) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            operation,
        }
    }

    /// Run `make()` unless a request for `key` is already pending
    ///
    /// `make` is only called by the first caller.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let (request, _cleanup) = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            match pending.get(&key) {
                Some(existing) => {
                    DEDUPLICATED_REQUESTS_TOTAL
                        .with_label_values(&[self.operation])
                        .inc();
                    tracing::debug!(operation = self.operation, "Joined in-flight request");
                    (existing.clone(), None)
                }
                None => {
                    let request = make().map(|r| r.map_err(Arc::new)).boxed().shared();
                    pending.insert(key.clone(), request.clone());
                    let cleanup = Cleanup {
                        pending: &self.pending,
                        key: Some(key),
                    };
                    (request, Some(cleanup))
                }
            }
        };

        request.await.map_err(ClientError::from)
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending
            .lock()
            .map(|pending| pending.contains_key(key))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_share_one_request() {
        let inflight: InFlight<String, u32> = InFlight::new("test_shared");
        let calls = Arc::new(AtomicUsize::new(0));

        let make = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(42)
            }
        };

        let (a, b) = tokio::join!(
            inflight.run("user-1".to_string(), make(calls.clone())),
            inflight.run("user-1".to_string(), make(calls.clone())),
        );

        assert_eq!(a.unwrap(), 42);
        assert_eq!(b.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(inflight.is_empty());
    }

    #[tokio::test]
    async fn different_keys_run_independently() {
        let inflight: InFlight<&'static str, u32> = InFlight::new("test_keys");
        let calls = Arc::new(AtomicUsize::new(0));

        let c1 = calls.clone();
        let c2 = calls.clone();
        let (a, b) = tokio::join!(
            inflight.run("a", move || async move {
                c1.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            }),
            inflight.run("b", move || async move {
                c2.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            }),
        );

        assert_eq!((a.unwrap(), b.unwrap()), (1, 2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn errors_reach_every_caller() {
        let inflight: InFlight<u8, ()> = InFlight::new("test_errors");

        let (a, b) = tokio::join!(
            inflight.run(1, || async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err(ClientError::NotFound)
            }),
            inflight.run(1, || async { Ok(()) }),
        );

        assert!(a.is_err());
        assert!(b.is_err());
        assert!(!inflight.is_pending(&1));
    }

    #[tokio::test]
    async fn sequential_calls_are_not_merged() {
        let inflight: InFlight<u8, u8> = InFlight::new("test_sequential");
        assert_eq!(inflight.run(1, || async { Ok(1) }).await.unwrap(), 1);
        assert_eq!(inflight.run(1, || async { Ok(2) }).await.unwrap(), 2);
    }
}
