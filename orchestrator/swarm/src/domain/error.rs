// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::lifecycle::NodeLifecycle;
use skiff_core::{AgentError, Cancelled};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("{addr}: {source}")]
    Agent {
        addr: String,
        #[source]
        source: AgentError,
    },

    /// The mutation would leave the cluster without a usable manager set.
    #[error("quorum violation: {0}")]
    QuorumViolation(String),

    #[error("agents report more than one cluster: {}", cluster_ids.join(", "))]
    SplitMembership { cluster_ids: Vec<String> },

    #[error("node {node_id} did not converge within {}", fmt_secs(*waited))]
    ConvergenceTimeout { node_id: String, waited: Duration },

    #[error("cluster has {actual} managers, {desired} desired")]
    QuorumUnmet { desired: usize, actual: usize },

    #[error("no manager node found or available")]
    NoManager,

    #[error("coordinator has no agents")]
    NoAgents,

    #[error("illegal node transition {from} -> {to}")]
    IllegalTransition {
        from: NodeLifecycle,
        to: NodeLifecycle,
    },

    #[error("failed to join: {}", addrs.join(", "))]
    JoinFailed { addrs: Vec<String> },

    #[error("operation cancelled")]
    Cancelled,
}

fn fmt_secs(waited: Duration) -> String {
    format!("{:.1}s", waited.as_secs_f64())
}

impl SwarmError {
    /// Attach the agent address to an agent failure.
    pub fn agent(addr: impl Into<String>, source: AgentError) -> Self {
        match source {
            AgentError::Cancelled => Self::Cancelled,
            source => Self::Agent {
                addr: addr.into(),
                source,
            },
        }
    }

    /// Transport failures and convergence timeouts may be retried; the rest
    /// need operator attention or a fresh snapshot.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Agent { source, .. } => source.is_retryable(),
            Self::ConvergenceTimeout { .. } => true,
            _ => false,
        }
    }
}

impl From<Cancelled> for SwarmError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_core::TransportError;

    #[test]
    fn test_retryable_classification() {
        let transport = SwarmError::agent(
            "10.0.0.1",
            AgentError::Transport(TransportError::Closed {
                addr: "10.0.0.1".to_string(),
            }),
        );
        assert!(transport.is_retryable());

        let timeout = SwarmError::ConvergenceTimeout {
            node_id: "n1".to_string(),
            waited: Duration::from_secs(2),
        };
        assert!(timeout.is_retryable());

        let rejected = SwarmError::agent(
            "10.0.0.1",
            AgentError::ControlPlane {
                status: 503,
                message: "This node is not a swarm manager.".to_string(),
            },
        );
        assert!(!rejected.is_retryable());
        assert!(!SwarmError::QuorumViolation("last manager".to_string()).is_retryable());
        assert!(!SwarmError::SplitMembership { cluster_ids: vec![] }.is_retryable());
    }

    #[test]
    fn test_agent_cancellation_is_not_wrapped() {
        let err = SwarmError::agent("10.0.0.1", AgentError::Cancelled);
        assert!(matches!(err, SwarmError::Cancelled));
    }

    #[test]
    fn test_messages_name_the_subject() {
        let err = SwarmError::SplitMembership {
            cluster_ids: vec!["abc".to_string(), "def".to_string()],
        };
        assert_eq!(err.to_string(), "agents report more than one cluster: abc, def");

        let err = SwarmError::ConvergenceTimeout {
            node_id: "n7".to_string(),
            waited: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "node n7 did not converge within 1.5s");
    }
}
