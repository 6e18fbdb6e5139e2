//! Parallel Executor (C3): runs a function over a list of items with
//! bounded concurrency, a per-task timeout, and structured failure capture.
//! Orchestration is cooperative (`tokio` tasks gated by a semaphore); each
//! task still shells out to the engine as a real OS child process, so the
//! distinction from a process-pool executor is about isolation of the
//! orchestration layer, not of the engine invocation itself.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Optional progress callback invoked after each task settles. Must not be
/// called while any task-local lock is held.
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

pub struct ExecutionReport<T> {
    pub results: Vec<Option<T>>,
    pub failed_indices: Vec<usize>,
}

/// Runs `f(item)` for every item in `items`, at most `max_workers` at a
/// time. A task that doesn't settle within `timeout` is abandoned (its
/// index is recorded as failed); an error returned by `f` itself is also
/// recorded as failed and logged. `cancel`, when triggered, stops new
/// submissions; in-flight tasks are allowed to finish or be abandoned.
pub async fn execute<I, T, F, Fut>(
    items: Vec<I>,
    max_workers: usize,
    timeout: Option<Duration>,
    cancel: CancellationToken,
    progress: Option<ProgressFn>,
    f: F,
) -> ExecutionReport<T>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
{
    let total = items.len();
    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();
    let mut failed_indices = Vec::new();
    let mut done = 0usize;

    let mut set = JoinSet::new();
    let mut pending = items.into_iter().enumerate();
    let mut id_to_idx: HashMap<Id, usize> = HashMap::new();

    loop {
        while set.len() < max_workers.max(1) {
            if cancel.is_cancelled() {
                break;
            }
            let Some((idx, item)) = pending.next() else {
                break;
            };
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
            let task_fn = f.clone();
            let span = tracing::info_span!("executor_task", index = idx);
            let handle = set.spawn(async move {
                let _permit = permit;
                let fut = task_fn(item);
                let outcome = match timeout {
                    Some(d) => tokio::time::timeout(d, fut)
                        .await
                        .map_err(|_| "task timed out".to_string())
                        .and_then(|r| r),
                    None => fut.await,
                };
                (idx, outcome)
            }.instrument(span));
            id_to_idx.insert(handle.id(), idx);
        }

        if set.is_empty() {
            break;
        }

        match set.join_next_with_id().await {
            Some(Ok((_id, (idx, Ok(value))))) => {
                results[idx] = Some(value);
            }
            Some(Ok((_id, (idx, Err(reason))))) => {
                tracing::warn!(index = idx, error = %reason, "executor task failed");
                failed_indices.push(idx);
            }
            Some(Err(join_err)) => {
                let idx = id_to_idx.get(&join_err.id()).copied();
                tracing::warn!(index = ?idx, error = %join_err, "executor task panicked or was cancelled");
                if let Some(idx) = idx {
                    failed_indices.push(idx);
                }
            }
            None => break,
        }

        done += 1;
        if let Some(cb) = &progress {
            cb(done, total);
        }
    }

    ExecutionReport {
        results,
        failed_indices,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounds_concurrency_and_records_timeouts() {
        let items = vec![10u64, 200u64, 10u64];
        let report = execute(
            items,
            2,
            Some(Duration::from_millis(50)),
            CancellationToken::new(),
            None,
            |millis| async move {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok::<u64, String>(millis)
            },
        )
        .await;

        assert_eq!(report.failed_indices, vec![1]);
        assert_eq!(report.results[0], Some(10));
        assert_eq!(report.results[2], Some(10));
    }

    #[tokio::test]
    async fn errors_from_f_are_captured_without_aborting_batch() {
        let items = vec![1, 2, 3];
        let report = execute(items, 3, None, CancellationToken::new(), None, |i| async move {
            if i == 2 {
                Err("boom".to_string())
            } else {
                Ok::<i32, String>(i)
            }
        })
        .await;

        assert_eq!(report.failed_indices, vec![1]);
        assert_eq!(report.results, vec![Some(1), None, Some(3)]);
    }

    #[tokio::test]
    async fn panicked_task_is_recorded_in_failed_indices() {
        let items = vec![1, 2, 3];
        let report = execute(items, 3, None, CancellationToken::new(), None, |i| async move {
            if i == 2 {
                panic!("boom");
            }
            Ok::<i32, String>(i)
        })
        .await;

        assert_eq!(report.failed_indices, vec![1]);
        assert_eq!(report.results, vec![Some(1), None, Some(3)]);
    }
}
