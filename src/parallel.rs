//! Bounded worker pool for bulk commands
//!
//! Items run concurrently, at most `threads` at a time, in no particular
//! order. Each worker checks the cancel flag before starting its item.

use crate::error::{Error, Result};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Default `--threads`.
pub const DEFAULT_THREADS: usize = 4;

/// Shared cancellation flag, set on interrupt.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of one item.
#[derive(Debug)]
pub struct ItemResult<T, R> {
    pub item: T,
    pub result: Result<R>,
}

/// Run `work` over `items` with at most `threads` in flight. Results come
/// back in completion order, one per item. Items not started before
/// cancellation fail with [`Error::Interrupted`]; a worker that panics or
/// is aborted fails its item with [`Error::Internal`].
pub async fn run_bounded<T, R, F, Fut>(
    items: Vec<T>,
    threads: usize,
    cancel: &CancelFlag,
    work: F,
) -> Vec<ItemResult<T, R>>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(threads.max(1)));
    let work = Arc::new(work);
    let mut tasks = JoinSet::new();
    let mut pending: Vec<Option<T>> = Vec::with_capacity(items.len());

    for (index, item) in items.into_iter().enumerate() {
        pending.push(Some(item.clone()));
        let semaphore = semaphore.clone();
        let work = work.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Err(_) => Err(Error::Internal("worker pool closed".to_string())),
                Ok(_permit) if cancel.is_cancelled() => Err(Error::Interrupted),
                Ok(_permit) => AssertUnwindSafe(async move { work(item).await })
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(Error::Internal(format!("worker panicked: {}", panic_text(&*panic))))),
            };
            (index, result)
        });
    }

    let mut results = Vec::with_capacity(pending.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, result)) => {
                if let Some(item) = pending.get_mut(index).and_then(Option::take) {
                    results.push(ItemResult { item, result });
                }
            }
            Err(e) => tracing::warn!("Worker task failed: {}", e),
        }
    }
    // Items whose task never reported back.
    results.extend(pending.into_iter().flatten().map(|item| ItemResult {
        item,
        result: Err(Error::Internal("worker task ended without a result".to_string())),
    }));
    results
}

fn panic_text(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown cause")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_all_items_run() {
        let cancel = CancelFlag::new();
        let results = run_bounded(vec![1, 2, 3, 4, 5], 2, &cancel, |n: i32| async move { Ok(n * 10) }).await;
        let mut values: Vec<i32> = results.into_iter().map(|r| r.result.unwrap()).collect();
        values.sort();
        assert_eq!(values, vec![10, 20, 30, 40, 50]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let cancel = CancelFlag::new();
        let (a, p) = (active.clone(), peak.clone());
        run_bounded((0..12).collect(), 3, &cancel, move |_: i32| {
            let (a, p) = (a.clone(), p.clone());
            async move {
                let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                a.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_cancelled_items_are_interrupted() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let results = run_bounded(vec!["a", "b"], 4, &cancel, |_: &str| async { Ok(()) }).await;
        assert!(results.iter().all(|r| matches!(r.result, Err(Error::Interrupted))));
    }

    #[tokio::test]
    async fn test_failures_are_per_item() {
        let cancel = CancelFlag::new();
        let results = run_bounded(vec![1, 2], 2, &cancel, |n: i32| async move {
            if n == 2 {
                Err(Error::Internal("boom".to_string()))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(results.iter().filter(|r| r.result.is_err()).count(), 1);
    }

    #[tokio::test]
    async fn test_panicking_worker_fails_its_item() {
        let cancel = CancelFlag::new();
        let results = run_bounded(vec![1, 2, 3], 2, &cancel, |n: i32| async move {
            if n == 2 {
                panic!("boom");
            }
            Ok(n)
        })
        .await;
        assert_eq!(results.len(), 3);
        let failed: Vec<_> = results.iter().filter(|r| r.result.is_err()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].item, 2);
        assert!(matches!(&failed[0].result, Err(Error::Internal(m)) if m.contains("boom")));
    }
}
