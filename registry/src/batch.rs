//! Bounded fan-out for multi-item operations.
//!
//! A permit is taken from the semaphore before each task is spawned, so at
//! most `workers` tasks exist at once. Results come back in input order
//! whatever the completion order was.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

pub const STATUS_ERROR: &str = "error";
pub const STATUS_CANCELLED: &str = "cancelled";

/// Outcome of one input item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub status: String,
    /// Machine-readable failure code, set with `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl BatchItem {
    pub fn success(index: usize, status: &str) -> Self {
        Self {
            index,
            status: status.to_string(),
            ..Default::default()
        }
    }

    pub fn failure(index: usize, reason: &str, message: impl Into<String>) -> Self {
        Self {
            index,
            status: STATUS_ERROR.to_string(),
            reason: Some(reason.to_string()),
            error: Some(message.into()),
            ..Default::default()
        }
    }

    fn cancelled(index: usize) -> Self {
        Self {
            index,
            status: STATUS_CANCELLED.to_string(),
            reason: Some(STATUS_CANCELLED.to_string()),
            error: Some("batch cancelled before this item started".to_string()),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_failure(&self) -> bool {
        self.status == STATUS_ERROR || self.status == STATUS_CANCELLED
    }
}

/// Aggregate of a batch call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<BatchItem>,
}

impl BatchReport {
    fn from_items(results: Vec<BatchItem>) -> Self {
        let failed = results.iter().filter(|item| item.is_failure()).count();
        Self {
            total: results.len(),
            succeeded: results.len() - failed,
            failed,
            results,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchExecutor {
    workers: usize,
    cancel: CancellationToken,
}

impl BatchExecutor {
    pub fn new(workers: usize, cancel: CancellationToken) -> Self {
        Self {
            workers: workers.max(1),
            cancel,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `op` once per item. A failing or panicking item never affects the
    /// others; once cancelled, items not yet started are reported as
    /// `cancelled` while running ones finish.
    pub async fn run<T, F, Fut>(&self, label: &str, items: Vec<T>, op: F) -> BatchReport
    where
        T: Send + 'static,
        F: Fn(usize, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BatchItem> + Send + 'static,
    {
        let total = items.len();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let op = Arc::new(op);
        let mut tasks = Vec::with_capacity(total);

        for (index, item) in items.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                tasks.push((index, None));
                continue;
            };

            let op = op.clone();
            let task = tokio::spawn(async move {
                let result = (*op)(index, item).await;
                drop(permit);
                result
            });
            tasks.push((index, Some(task)));
        }

        let mut results = Vec::with_capacity(total);
        for (index, task) in tasks {
            let item = match task {
                None => BatchItem::cancelled(index),
                Some(handle) => match handle.await {
                    Ok(mut item) => {
                        item.index = index;
                        item
                    }
                    Err(e) => {
                        warn!(index, "Batch task failed to complete: {e}");
                        BatchItem::failure(index, "backend_error", format!("task failed: {e}"))
                    }
                },
            };
            results.push(item);
        }

        let report = BatchReport::from_items(results);
        info!(
            operation = label,
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            "Batch completed"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let executor = BatchExecutor::new(3, CancellationToken::new());
        let report = executor
            .run("order", vec![30u64, 10, 20, 0], |index, delay| async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                BatchItem::success(index, "done").with_id(delay.to_string())
            })
            .await;

        let ids: Vec<_> = report.results.iter().map(|r| r.id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["30", "10", "20", "0"]);
        assert_eq!(report.succeeded, 4);
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_workers() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let executor = BatchExecutor::new(2, CancellationToken::new());
        let (r, p) = (running.clone(), peak.clone());
        executor
            .run("bounded", (0..8).collect::<Vec<_>>(), move |index, _| {
                let (running, peak) = (r.clone(), p.clone());
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    BatchItem::success(index, "done")
                }
            })
            .await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_failures_and_panics_are_isolated() {
        let executor = BatchExecutor::new(4, CancellationToken::new());
        let report = executor
            .run("isolation", vec![0, 1, 2, 3], |index, value| async move {
                match value {
                    1 => BatchItem::failure(index, "validation_error", "bad item"),
                    2 => panic!("worker blew up"),
                    _ => BatchItem::success(index, "ok"),
                }
            })
            .await;

        assert_eq!((report.total, report.succeeded, report.failed), (4, 2, 2));
        assert_eq!(report.results[1].error.as_deref(), Some("bad item"));
        assert_eq!(report.results[2].status, STATUS_ERROR);
        assert_eq!(report.results[3].status, "ok");
    }

    #[tokio::test]
    async fn test_cancelled_batch_marks_unstarted_items() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let executor = BatchExecutor::new(2, cancel);
        let report = executor
            .run("cancel", vec![1, 2, 3], |index, _| async move {
                BatchItem::success(index, "ok")
            })
            .await;

        assert_eq!(report.failed, 3);
        assert!(report.results.iter().all(|r| r.status == STATUS_CANCELLED));
    }
}
