// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Convergence Wait
//!
//! The control plane applies role changes and departures asynchronously.
//! [`wait_until`] re-runs a predicate until it holds, the deadline passes
//! or the caller cancels. The predicate always runs once before any waiting,
//! and the deadline also bounds a predicate call that is still in flight.

use crate::domain::error::SwarmError;
use futures::StreamExt;
use skiff_core::NodeEventStream;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What wakes the wait up for another check.
pub enum Trigger {
    Interval(Duration),
    /// Re-check on every event of the node, and at least every `fallback`.
    /// A stream that ends or fails degrades to `Interval(fallback)`.
    Events {
        stream: NodeEventStream,
        fallback: Duration,
    },
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Interval(d) => f.debug_tuple("Interval").field(d).finish(),
            Trigger::Events { fallback, .. } => f
                .debug_struct("Events")
                .field("fallback", fallback)
                .finish_non_exhaustive(),
        }
    }
}

impl Trigger {
    async fn tick(&mut self) {
        match self {
            Trigger::Interval(period) => tokio::time::sleep(*period).await,
            Trigger::Events { stream, fallback } => {
                let fallback = *fallback;
                tokio::select! {
                    item = stream.next() => match item {
                        Some(Ok(event)) => {
                            debug!(action = %event.action, node_id = %event.actor.id, "node event");
                        }
                        Some(Err(e)) => {
                            debug!("node event stream failed, polling instead: {}", e);
                            *self = Trigger::Interval(fallback);
                        }
                        None => {
                            debug!("node event stream ended, polling instead");
                            *self = Trigger::Interval(fallback);
                        }
                    },
                    _ = tokio::time::sleep(fallback) => {}
                }
            }
        }
    }
}

/// Wait until `check` returns `true`.
///
/// Fails with `ConvergenceTimeout` naming `node_id` once `timeout` elapses,
/// with `Cancelled` when `cancel` fires, and with the predicate's own error
/// as soon as it returns one.
pub async fn wait_until<F, Fut>(
    cancel: &CancellationToken,
    timeout: Duration,
    node_id: &str,
    mut trigger: Trigger,
    mut check: F,
) -> Result<(), SwarmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, SwarmError>>,
{
    let deadline = Instant::now() + timeout;
    let timed_out = || SwarmError::ConvergenceTimeout {
        node_id: node_id.to_string(),
        waited: timeout,
    };

    loop {
        let converged = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SwarmError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => return Err(timed_out()),
            result = check() => result?,
        };
        if converged {
            return Ok(());
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SwarmError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => return Err(timed_out()),
            _ = trigger.tick() => {}
        }
    }
}
