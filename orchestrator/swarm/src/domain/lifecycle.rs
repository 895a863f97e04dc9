// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Node Lifecycle
//!
//! ```text
//! NotMember ──▶ Joining ──▶ Worker ◀──▶ Manager
//!     ▲            │           │           │
//!     │            ▼           ▼           ▼ (force, or after demotion)
//!     └──────── NotMember   Leaving ◀──────┘
//!                              │
//!                              ▼
//!                           Removed ──▶ NotMember
//! ```
//!
//! The coordinator checks every step against this table before it issues
//! the remote call, so an illegal request never reaches a daemon.

use crate::domain::error::SwarmError;
use crate::domain::membership::MemberState;
use serde::{Deserialize, Serialize};
use skiff_core::NodeRole;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeLifecycle {
    NotMember,
    Joining,
    Worker,
    Manager,
    Leaving,
    Removed,
}

impl NodeLifecycle {
    /// Whether `self -> to` is allowed. Managers may only start leaving
    /// when `force` is set; otherwise they are demoted first.
    pub fn can_transition(self, to: NodeLifecycle, force: bool) -> bool {
        use NodeLifecycle::*;

        matches!(
            (self, to),
            (NotMember, Joining)
                | (Joining, Worker)
                | (Joining, Manager)
                | (Joining, NotMember)
                | (Worker, Manager)
                | (Manager, Worker)
                | (Worker, Leaving)
                | (Leaving, Removed)
                | (Leaving, NotMember)
                | (Removed, NotMember)
        ) || (self == Manager && to == Leaving && force)
    }

    pub fn transition(self, to: NodeLifecycle, force: bool) -> Result<NodeLifecycle, SwarmError> {
        if self.can_transition(to, force) {
            Ok(to)
        } else {
            Err(SwarmError::IllegalTransition { from: self, to })
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, NodeLifecycle::Worker | NodeLifecycle::Manager)
    }
}

impl From<MemberState> for NodeLifecycle {
    fn from(state: MemberState) -> Self {
        match state {
            MemberState::NotMember => NodeLifecycle::NotMember,
            MemberState::Worker => NodeLifecycle::Worker,
            MemberState::Manager => NodeLifecycle::Manager,
        }
    }
}

impl From<NodeRole> for NodeLifecycle {
    fn from(role: NodeRole) -> Self {
        match role {
            NodeRole::Worker => NodeLifecycle::Worker,
            NodeRole::Manager => NodeLifecycle::Manager,
        }
    }
}

impl fmt::Display for NodeLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeLifecycle::NotMember => "not-member",
            NodeLifecycle::Joining => "joining",
            NodeLifecycle::Worker => "worker",
            NodeLifecycle::Manager => "manager",
            NodeLifecycle::Leaving => "leaving",
            NodeLifecycle::Removed => "removed",
        };
        f.write_str(name)
    }
}
