// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Membership Snapshot
//!
//! Point-in-time view of the cluster, assembled from every agent's own
//! `info` answer plus the roster of one reachable manager. A snapshot is
//! never reused across a mutation: the coordinator takes a fresh one.
//!
//! | Set | Definition |
//! |-----|------------|
//! | Desired | every agent the coordinator was built with |
//! | Actual | agents reporting an active membership under their own address |
//! | Missing | Desired − Actual |
//! | Extra | roster nodes that no agent runs |
//!
//! An agent's own address is its SSH host, which may be a name. The control
//! plane advertises IPs, so a member also answers to the IP its session
//! reached.

use crate::domain::error::SwarmError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skiff_core::{matches_ip, Node, NodeRole, SwarmInfo};
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

/// Local membership state as an agent reports it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberState {
    #[default]
    NotMember,
    Worker,
    Manager,
}

impl MemberState {
    pub fn from_info(info: &SwarmInfo) -> Self {
        if !info.is_active() {
            MemberState::NotMember
        } else if info.control_available {
            MemberState::Manager
        } else {
            MemberState::Worker
        }
    }

    pub fn is_active(self) -> bool {
        self != MemberState::NotMember
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberState::NotMember => f.write_str("not-member"),
            MemberState::Worker => f.write_str("worker"),
            MemberState::Manager => f.write_str("manager"),
        }
    }
}

/// One agent's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberView {
    pub addr: String,
    pub state: MemberState,
    pub cluster_id: Option<String>,
    pub node_id: Option<String>,
    pub node_addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<IpAddr>,
}

impl MemberView {
    /// View of an agent that could not be reached.
    pub fn unreachable(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            state: MemberState::NotMember,
            cluster_id: None,
            node_id: None,
            node_addr: None,
            remote_ip: None,
        }
    }

    pub fn from_info(addr: impl Into<String>, info: &SwarmInfo) -> Self {
        let state = MemberState::from_info(info);
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            addr: addr.into(),
            state,
            cluster_id: info.cluster_id().map(str::to_string),
            node_id: state.is_active().then(|| non_empty(&info.node_id)).flatten(),
            node_addr: non_empty(&info.node_addr),
            remote_ip: None,
        }
    }

    pub fn with_remote_ip(mut self, ip: Option<IpAddr>) -> Self {
        self.remote_ip = ip;
        self
    }

    /// Whether `addr` names this agent's host.
    pub fn answers_to(&self, addr: &str) -> bool {
        addr == self.addr || matches_ip(self.remote_ip, addr)
    }

    /// Active and advertising its own agent address.
    pub fn is_actual(&self) -> bool {
        self.state.is_active() && self.node_addr.as_deref().is_some_and(|a| self.answers_to(a))
    }

    /// Whether this agent runs roster node `node`.
    fn runs(&self, node: &Node) -> bool {
        let same_id = self.state.is_active() && self.node_id.as_deref() == Some(node.id.as_str());
        same_id || self.answers_to(node.addr())
    }
}

/// Roster entry that no agent accounts for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraNode {
    pub node_id: String,
    pub addr: String,
    pub role: NodeRole,
    pub is_leader: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipSnapshot {
    pub members: Vec<MemberView>,
    /// Node list from the first reachable manager; empty without one.
    pub roster: Vec<Node>,
    /// Address of the manager the roster came from.
    pub roster_source: Option<String>,
    pub taken_at: DateTime<Utc>,
}

impl MembershipSnapshot {
    /// Assemble a snapshot, rejecting agents that disagree on the cluster.
    pub fn new(
        members: Vec<MemberView>,
        roster: Vec<Node>,
        roster_source: Option<String>,
    ) -> Result<Self, SwarmError> {
        let cluster_ids: BTreeSet<&str> = members
            .iter()
            .filter(|m| m.state.is_active())
            .filter_map(|m| m.cluster_id.as_deref())
            .collect();
        if cluster_ids.len() > 1 {
            return Err(SwarmError::SplitMembership {
                cluster_ids: cluster_ids.into_iter().map(str::to_string).collect(),
            });
        }

        Ok(Self {
            members,
            roster,
            roster_source,
            taken_at: Utc::now(),
        })
    }

    pub fn cluster_id(&self) -> Option<&str> {
        self.members
            .iter()
            .filter(|m| m.state.is_active())
            .find_map(|m| m.cluster_id.as_deref())
    }

    /// Whether any agent belongs to a cluster.
    pub fn exists(&self) -> bool {
        self.members.iter().any(|m| m.state.is_active())
    }

    pub fn member(&self, addr: &str) -> Option<&MemberView> {
        self.members.iter().find(|m| m.addr == addr)
    }

    pub fn actual(&self) -> Vec<&MemberView> {
        self.members.iter().filter(|m| m.is_actual()).collect()
    }

    pub fn missing(&self) -> Vec<&MemberView> {
        self.members.iter().filter(|m| !m.is_actual()).collect()
    }

    pub fn managers(&self) -> Vec<&MemberView> {
        self.members
            .iter()
            .filter(|m| m.state == MemberState::Manager)
            .collect()
    }

    pub fn workers(&self) -> Vec<&MemberView> {
        self.members
            .iter()
            .filter(|m| m.state == MemberState::Worker)
            .collect()
    }

    pub fn extra(&self) -> Vec<ExtraNode> {
        self.roster
            .iter()
            .filter(|node| !self.members.iter().any(|m| m.runs(node)))
            .map(|node| ExtraNode {
                node_id: node.id.clone(),
                addr: node.addr().to_string(),
                role: node.spec.role,
                is_leader: node.is_leader(),
            })
            .collect()
    }

    pub fn leader_id(&self) -> Option<&str> {
        self.roster
            .iter()
            .find(|n| n.is_leader())
            .map(|n| n.id.as_str())
    }

    /// Roster nodes currently `Ready`.
    pub fn active_nodes(&self) -> Vec<&Node> {
        self.roster.iter().filter(|n| n.is_ready()).collect()
    }
}
