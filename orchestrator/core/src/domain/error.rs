// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use thiserror::Error;

/// Marker error for an operation aborted through its cancellation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Failures of the SSH session or the tunnel riding on it.
///
/// A `Dial` error means the tunnel never carried a byte; anything after that
/// is `Io` or `Closed`.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to dial {addr}: {reason}")]
    Dial { addr: String, reason: String },

    #[error("I/O failure on {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to {addr} is closed")]
    Closed { addr: String },

    #[error("command `{command}` on {addr} exited with status {status}: {stderr}")]
    CommandFailed {
        addr: String,
        command: String,
        status: i32,
        stderr: String,
    },
}

impl TransportError {
    pub fn dial(addr: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Dial {
            addr: addr.into(),
            reason: reason.to_string(),
        }
    }

    pub fn io(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            addr: addr.into(),
            source,
        }
    }
}

/// Error returned by every remote agent operation.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The remote daemon understood the request and refused it.
    #[error("control plane rejected request ({status}): {message}")]
    ControlPlane { status: u16, message: String },

    #[error("unexpected control plane response: {0}")]
    Protocol(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<Cancelled> for AgentError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

impl AgentError {
    /// Transport failures can be retried by re-dialing; control-plane
    /// rejections call for a fresh snapshot instead.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// True for the daemon's "this node is not a swarm manager" family of errors.
    pub fn is_not_manager(&self) -> bool {
        match self {
            Self::ControlPlane { message, .. } => {
                let message = message.to_ascii_lowercase();
                message.contains("not a swarm manager") || message.contains("not part of a swarm")
            }
            _ => false,
        }
    }

    pub fn is_already_member(&self) -> bool {
        match self {
            Self::ControlPlane { message, .. } => message
                .to_ascii_lowercase()
                .contains("already part of a swarm"),
            _ => false,
        }
    }
}
