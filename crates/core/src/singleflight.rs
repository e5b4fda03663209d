use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;

use crate::error::CoreResult;

type SharedFetch<T> = Shared<BoxFuture<'static, Arc<CoreResult<T>>>>;

/// For every fingerprint, guarantees at-most-one concurrent upstream fetch.
/// Concurrent callers for the same key attach to the in-flight `Shared`
/// future and receive its eventual result. The in-flight future is never
/// spawned onto the runtime independently: it only makes progress while at
/// least one caller is polling it, so if every waiter drops its clone the
/// fetch is dropped too: cancellation of all waiters cancels the
/// underlying fetch only when no requester remains.
pub struct SingleflightGate<T> {
    inflight: Mutex<HashMap<String, (u64, SharedFetch<T>)>>,
    next_generation: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> SingleflightGate<T> {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    pub async fn run<F, Fut>(&self, key: &str, make_fut: F) -> CoreResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<T>> + Send + 'static,
    {
        let (generation, shared) = {
            let mut guard = self.inflight.lock().await;
            match guard.get(key) {
                Some((generation, existing)) => (*generation, existing.clone()),
                None => {
                    let fut = make_fut();
                    let boxed: BoxFuture<'static, Arc<CoreResult<T>>> =
                        Box::pin(async move { Arc::new(fut.await) });
                    let shared = boxed.shared();
                    let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
                    guard.insert(key.to_string(), (generation, shared.clone()));
                    (generation, shared)
                }
            }
        };

        let result = shared.await;

        // Completion removes the fingerprint from the in-flight table
        // atomically; only the caller whose generation still matches the
        // map's current entry removes it, so a fresh fetch started
        // immediately after this one finished is not evicted by a late
        // waiter of the previous generation.
        {
            let mut guard = self.inflight.lock().await;
            if matches!(guard.get(key), Some((current_generation, _)) if *current_generation == generation) {
                guard.remove(key);
            }
        }

        (*result).clone()
    }

    pub async fn in_flight_count(&self) -> usize {
        self.inflight.lock().await.len()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for SingleflightGate<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_for_same_key_get_one_upstream_call() {
        let gate: Arc<SingleflightGate<i32>> = Arc::new(SingleflightGate::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let gate = gate.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                gate.run("fingerprint", move || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(42)
                    }
                })
                .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_run_independently() {
        let gate: SingleflightGate<i32> = SingleflightGate::new();
        let a = gate.run("a", || async { Ok(1) });
        let b = gate.run("b", || async { Ok(2) });
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 2);
    }
}
