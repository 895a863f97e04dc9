// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Coordinator Events
//!
//! Everything the coordinator does or fails to do per host is published as a
//! [`CoordinatorEvent`] to the [`CoordinatorObserver`] injected at
//! construction. Best-effort operations (`leave_all`, `remove_extra`,
//! `close`) report per-host failures only this way.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skiff_core::NodeRole;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    SnapshotTaken {
        members: usize,
        managers: usize,
        workers: usize,
        missing: usize,
        extra: usize,
        taken_at: DateTime<Utc>,
    },
    AgentUnreachable {
        host: String,
        error: String,
    },
    ClusterInitialized {
        host: String,
        node_id: String,
    },
    NodeJoined {
        host: String,
    },
    JoinFailed {
        host: String,
        error: String,
    },
    RoleChanged {
        node_id: String,
        role: NodeRole,
    },
    RoleChangeFailed {
        node_id: String,
        role: NodeRole,
        error: String,
    },
    NodeLeft {
        host: String,
        force: bool,
    },
    LeaveFailed {
        host: String,
        error: String,
    },
    NodeRemoved {
        node_id: String,
        addr: String,
    },
    RemovalSkipped {
        node_id: String,
        addr: String,
        reason: String,
    },
    RemovalFailed {
        node_id: String,
        addr: String,
        error: String,
    },
    ConvergenceTimedOut {
        node_id: String,
        waited_ms: u64,
    },
    CoordinatorSwitched {
        from: String,
        to: String,
    },
    AgentCloseFailed {
        host: String,
        error: String,
    },
}

impl CoordinatorEvent {
    /// Host the event is about, when it names one.
    pub fn host(&self) -> Option<&str> {
        match self {
            Self::AgentUnreachable { host, .. }
            | Self::ClusterInitialized { host, .. }
            | Self::NodeJoined { host }
            | Self::JoinFailed { host, .. }
            | Self::NodeLeft { host, .. }
            | Self::LeaveFailed { host, .. }
            | Self::AgentCloseFailed { host, .. } => Some(host),
            Self::NodeRemoved { addr, .. }
            | Self::RemovalSkipped { addr, .. }
            | Self::RemovalFailed { addr, .. } => Some(addr),
            Self::CoordinatorSwitched { to, .. } => Some(to),
            Self::SnapshotTaken { .. }
            | Self::RoleChanged { .. }
            | Self::RoleChangeFailed { .. }
            | Self::ConvergenceTimedOut { .. } => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::AgentUnreachable { .. }
                | Self::JoinFailed { .. }
                | Self::RoleChangeFailed { .. }
                | Self::LeaveFailed { .. }
                | Self::RemovalFailed { .. }
                | Self::ConvergenceTimedOut { .. }
                | Self::AgentCloseFailed { .. }
        )
    }
}

pub trait CoordinatorObserver: Send + Sync {
    fn on_event(&self, event: &CoordinatorEvent);
}

/// Default observer: forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl CoordinatorObserver for TracingObserver {
    fn on_event(&self, event: &CoordinatorEvent) {
        let host = event.host().unwrap_or("-");
        if event.is_failure() {
            warn!(host = %host, ?event, "coordinator event");
        } else {
            info!(host = %host, ?event, "coordinator event");
        }
    }
}
