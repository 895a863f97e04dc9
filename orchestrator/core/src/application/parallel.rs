// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Fan-out Primitives
//!
//! Both helpers spawn one tokio task per index, with no ordering between
//! siblings and no shared pool. Every task races the parent's cancellation
//! token, and no new task is launched once the token fires.
//!
//! | Helper | Failure policy |
//! |--------|----------------|
//! | [`collect_first_error`] | first error returned immediately, stragglers detached |
//! | [`run_all`] | nothing propagated; callers log inside the task |

use crate::domain::error::Cancelled;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Run `f(0..n)` concurrently and return the first error, or `Ok` once all
/// succeed.
///
/// On the first failure the remaining tasks are not awaited and not aborted:
/// they run to completion in the background and their results are dropped.
pub async fn collect_first_error<F, Fut, E>(
    cancel: &CancellationToken,
    n: usize,
    f: F,
) -> Result<(), E>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: From<Cancelled> + Send + 'static,
{
    let mut pending = FuturesUnordered::new();

    for i in 0..n {
        if cancel.is_cancelled() {
            debug!(launched = i, total = n, "fan-out cancelled before launch");
            return Err(Cancelled.into());
        }
        let token = cancel.clone();
        let task = f(i);
        pending.push(tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(E::from(Cancelled)),
                result = task => result,
            }
        }));
    }

    while let Some(joined) = pending.next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(join_err) if join_err.is_panic() => std::panic::resume_unwind(join_err.into_panic()),
            Err(_) => return Err(Cancelled.into()),
        }
    }

    Ok(())
}

/// Run `f(0..n)` concurrently and wait for all of them. Failures stay inside
/// the tasks; the caller re-derives state afterwards.
pub async fn run_all<F, Fut>(cancel: &CancellationToken, n: usize, f: F)
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut handles = Vec::with_capacity(n);

    for i in 0..n {
        if cancel.is_cancelled() {
            debug!(launched = i, total = n, "fan-out cancelled before launch");
            break;
        }
        let token = cancel.clone();
        let task = f(i);
        handles.push(tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = task => {}
            }
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            warn!("fan-out task did not complete: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::AgentError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    fn rejected(i: usize) -> AgentError {
        AgentError::ControlPlane {
            status: 500,
            message: format!("task {} failed", i),
        }
    }

    #[tokio::test]
    async fn test_zero_tasks_is_a_noop() {
        let cancel = CancellationToken::new();
        let result: Result<(), AgentError> =
            collect_first_error(&cancel, 0, |_| async { Ok(()) }).await;
        assert!(result.is_ok());

        run_all(&cancel, 0, |_| async {}).await;
    }

    #[tokio::test]
    async fn test_first_error_returns_without_waiting_for_slow_tasks() {
        let cancel = CancellationToken::new();
        let started = Instant::now();

        let result = collect_first_error(&cancel, 5, |i| async move {
            if i == 2 {
                return Err(rejected(i));
            }
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await;

        match result {
            Err(AgentError::ControlPlane { message, .. }) => assert_eq!(message, "task 2 failed"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_stragglers_run_to_completion_after_first_error() {
        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicUsize::new(0));

        let counter = finished.clone();
        let result = collect_first_error(&cancel, 5, move |i| {
            let counter = counter.clone();
            async move {
                if i == 0 {
                    return Err(rejected(i));
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_all_success() {
        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicUsize::new(0));

        let counter = finished.clone();
        let result: Result<(), AgentError> = collect_first_error(&cancel, 4, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(finished.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_parent_cancellation_stops_pending_tasks() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result: Result<(), AgentError> = collect_first_error(&cancel, 3, |_| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(AgentError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_already_cancelled_token_launches_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let launched = Arc::new(AtomicUsize::new(0));

        let counter = launched.clone();
        run_all(&cancel, 3, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {}
        })
        .await;

        assert_eq!(launched.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_all_completes_when_every_task_fails() {
        let cancel = CancellationToken::new();
        let sink: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let log = sink.clone();
        run_all(&cancel, 3, move |i| {
            let log = log.clone();
            async move {
                let err = rejected(i);
                log.lock().push(err.to_string());
            }
        })
        .await;

        let mut failures = sink.lock().clone();
        failures.sort();
        assert_eq!(failures.len(), 3);
        assert!(failures[0].contains("task 0 failed"));
        assert!(failures[2].contains("task 2 failed"));
    }
}
