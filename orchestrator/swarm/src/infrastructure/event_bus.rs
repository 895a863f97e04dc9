// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Event Bus - Pub/Sub for Coordinator Events
//
// In-memory fan-out of coordinator events over a tokio broadcast channel.
// Slow subscribers lose the oldest events once the buffer is full.

use crate::domain::events::{CoordinatorEvent, CoordinatorObserver};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Observer that republishes coordinator events to any number of subscribers
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<CoordinatorEvent>>,
}

impl EventBus {
    /// Create an event bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (256)
    pub fn with_default_capacity() -> Self {
        Self::new(256)
    }

    pub fn publish(&self, event: CoordinatorEvent) {
        // send() only fails when nobody is subscribed
        if self.sender.send(event).is_err() {
            debug!("No subscribers listening to coordinator event");
        }
    }

    /// Subscribe to every coordinator event
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to events about one host only
    pub fn subscribe_host(&self, host: impl Into<String>) -> HostEventReceiver {
        HostEventReceiver {
            receiver: self.sender.subscribe(),
            host: host.into(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl CoordinatorObserver for EventBus {
    fn on_event(&self, event: &CoordinatorEvent) {
        self.publish(event.clone());
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all coordinator events
pub struct EventReceiver {
    receiver: broadcast::Receiver<CoordinatorEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<CoordinatorEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<CoordinatorEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver filtered to a single host
pub struct HostEventReceiver {
    receiver: broadcast::Receiver<CoordinatorEvent>,
    host: String,
}

impl HostEventReceiver {
    /// Receive the next event naming this receiver's host
    pub async fn recv(&mut self) -> Result<CoordinatorEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.host() == Some(self.host.as_str()) {
                return Ok(event);
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}
