// Concurrent fetch orchestrator
//
// Every fetch runs as its own spawned task and reports on a dedicated oneshot
// channel. The join consumes channels in completion order and stops at the
// first error. Sibling tasks are never cancelled; a result that arrives after
// the join has returned is dropped with its channel.

use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{AppError, AppResult};

pub type FetchTask<T> = Pin<Box<dyn Future<Output = AppResult<T>> + Send + 'static>>;

#[derive(Debug, Clone, Default)]
pub struct FetchOrchestrator {
    short_circuits: Arc<AtomicU64>,
}

impl FetchOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Box a future as a [`FetchTask`].
    pub fn task<T, F>(future: F) -> FetchTask<T>
    where
        F: Future<Output = AppResult<T>> + Send + 'static,
    {
        Box::pin(future)
    }

    /// Run all tasks concurrently. Results come back in task order; the
    /// first error to arrive is returned without waiting for the rest.
    pub async fn fetch_all<T>(&self, tasks: Vec<FetchTask<T>>) -> AppResult<Vec<T>>
    where
        T: Send + 'static,
    {
        let total = tasks.len();
        let mut pending = FuturesUnordered::new();
        for (index, task) in tasks.into_iter().enumerate() {
            let receiver = spawn_fetch(task);
            pending.push(async move { (index, receiver.await) });
        }

        let mut slots: Vec<Option<T>> = (0..total).map(|_| None).collect();
        while let Some((index, received)) = pending.next().await {
            match settle(received) {
                Ok(value) => slots[index] = Some(value),
                Err(e) => {
                    self.short_circuits.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        "Fetch {} of {} failed, abandoning {} in flight: {}",
                        index,
                        total,
                        pending.len(),
                        e
                    );
                    return Err(e);
                }
            }
        }

        slots
            .into_iter()
            .map(|slot| slot.ok_or_else(|| AppError::Internal("fetch result missing".to_string())))
            .collect()
    }

    /// Two heterogeneous fetches joined with the same first-error rule.
    pub async fn fetch_pair<A, B, FA, FB>(&self, first: FA, second: FB) -> AppResult<(A, B)>
    where
        A: Send + 'static,
        B: Send + 'static,
        FA: Future<Output = AppResult<A>> + Send + 'static,
        FB: Future<Output = AppResult<B>> + Send + 'static,
    {
        let mut first_rx = spawn_fetch(first);
        let mut second_rx = spawn_fetch(second);
        let mut first_value = None;
        let mut second_value = None;

        while first_value.is_none() || second_value.is_none() {
            let outcome = tokio::select! {
                received = &mut first_rx, if first_value.is_none() => {
                    settle(received).map(|value| first_value = Some(value))
                }
                received = &mut second_rx, if second_value.is_none() => {
                    settle(received).map(|value| second_value = Some(value))
                }
            };
            if let Err(e) = outcome {
                self.short_circuits.fetch_add(1, Ordering::Relaxed);
                debug!("Paired fetch failed, abandoning sibling: {}", e);
                return Err(e);
            }
        }

        match (first_value, second_value) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(AppError::Internal("fetch result missing".to_string())),
        }
    }

    /// Number of joins that returned early on an error.
    pub fn short_circuits(&self) -> u64 {
        self.short_circuits.load(Ordering::Relaxed)
    }
}

fn spawn_fetch<T, F>(future: F) -> oneshot::Receiver<AppResult<T>>
where
    T: Send + 'static,
    F: Future<Output = AppResult<T>> + Send + 'static,
{
    let (sender, receiver) = oneshot::channel();
    tokio::spawn(async move {
        // The receiver is gone once the join has short-circuited.
        let _ = sender.send(future.await);
    });
    receiver
}

fn settle<T>(received: Result<AppResult<T>, oneshot::error::RecvError>) -> AppResult<T> {
    match received {
        Ok(result) => result.map_err(translate),
        Err(_) => Err(AppError::Internal("fetch task ended without a result".to_string())),
    }
}

/// NotFound and timeouts keep their kind; everything else is internal.
fn translate(error: AppError) -> AppError {
    match error {
        AppError::NotFound(_) | AppError::TimeoutError(_) | AppError::Internal(_) => error,
        other => AppError::Internal(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_fetch_all_keeps_task_order() {
        let orchestrator = FetchOrchestrator::new();
        let tasks = vec![
            FetchOrchestrator::task(async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(1)
            }),
            FetchOrchestrator::task(async { Ok(2) }),
            FetchOrchestrator::task(async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(3)
            }),
        ];

        assert_eq!(orchestrator.fetch_all(tasks).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(orchestrator.short_circuits(), 0);
    }

    #[tokio::test]
    async fn test_not_found_short_circuits_blocked_sibling() {
        let orchestrator = FetchOrchestrator::new();
        let started = Instant::now();

        let result = orchestrator
            .fetch_pair(
                async { Err::<(), _>(AppError::NotFound("post alice:1".to_string())) },
                async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<_, AppError>("late")
                },
            )
            .await;

        assert!(result.unwrap_err().is_not_found());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(orchestrator.short_circuits(), 1);
    }

    #[tokio::test]
    async fn test_errors_are_translated() {
        let orchestrator = FetchOrchestrator::new();

        let err = orchestrator
            .fetch_all(vec![FetchOrchestrator::task(async {
                Err::<(), _>(AppError::CacheError("connection reset".to_string()))
            })])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));

        let err = orchestrator
            .fetch_all(vec![FetchOrchestrator::task(async {
                Err::<(), _>(AppError::TimeoutError("store find_one".to_string()))
            })])
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_sibling_runs_to_completion_after_short_circuit() {
        let orchestrator = FetchOrchestrator::new();
        let (done_tx, done_rx) = oneshot::channel();

        let result = orchestrator
            .fetch_pair(
                async { Err::<(), _>(AppError::NotFound("user".to_string())) },
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    let _ = done_tx.send(());
                    Ok::<_, AppError>(())
                },
            )
            .await;
        assert!(result.is_err());

        tokio::time::timeout(Duration::from_secs(1), done_rx)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_fetch_all_empty() {
        let orchestrator = FetchOrchestrator::new();
        let result: Vec<u8> = orchestrator.fetch_all(Vec::new()).await.unwrap();
        assert!(result.is_empty());
    }
}
