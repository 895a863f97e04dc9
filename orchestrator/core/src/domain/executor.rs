// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Capabilities of a remote shell session.
//!
//! Running a command and opening a control-plane tunnel are separate
//! concerns, so they are separate traits. `SshSession` implements both.

use crate::domain::error::TransportError;
use async_trait::async_trait;
use std::net::IpAddr;
use tokio::io::{AsyncRead, AsyncWrite};

/// A raw duplex byte stream, e.g. a tunnel through a remote command.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type BoxConnection = Box<dyn Connection>;

/// Captured result of a finished remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    /// Host this executor talks to; the identity of the owning agent.
    fn addr(&self) -> &str;

    /// IP address the session actually reached, when known. A host given
    /// by name is advertised by its control plane under this address.
    fn remote_ip(&self) -> Option<IpAddr> {
        None
    }

    /// Run `command` to completion and capture its output. A non-zero exit
    /// status is not an error at this level.
    async fn run(&self, command: &str) -> Result<CommandOutput, TransportError>;

    /// Release the session. Calling twice is harmless.
    async fn close(&self) -> Result<(), TransportError>;
}

#[async_trait]
pub trait ControlPlaneDialer: Send + Sync {
    /// Open a fresh connection to the remote control plane.
    async fn dial(&self) -> Result<BoxConnection, TransportError>;
}
