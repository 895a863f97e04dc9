// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Remote Agent Handle
//!
//! Bundles a host's shell session (`ProcessExecutor`) with its control-plane
//! client (`ControlPlane`). Every request/response operation:
//!
//! - holds the agent's session lock, so one host never sees two requests at
//!   once while different hosts proceed in parallel;
//! - races the caller's cancellation token and, on cancellation, drops the
//!   in-flight request, which tears the tunnel down instead of leaving it
//!   running unattended.
//!
//! Manager-only operations (`list_nodes`, `update_node_role`, `remove_node`,
//! `stream_node_events`) assume the caller already knows this agent is a
//! manager.

use crate::domain::control_plane::{ControlPlane, NodeEventStream};
use crate::domain::error::{AgentError, TransportError};
use crate::domain::executor::ProcessExecutor;
use crate::domain::node::{
    ClusterInspect, ClusterSpec, InitRequest, JoinRequest, Node, NodeRole, SwarmInfo,
};
use crate::infrastructure::engine::EngineClient;
use crate::infrastructure::ssh::{SshSession, SshTarget};
use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Remote probe deciding whether the control plane is usable on a host.
pub const DEFAULT_PROBE_COMMAND: &str = "docker info";

pub struct Agent {
    addr: String,
    remote_ip: Option<IpAddr>,
    executor: Arc<dyn ProcessExecutor>,
    control: Arc<dyn ControlPlane>,
    session: Mutex<()>,
    probe_command: String,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent").field("addr", &self.addr).finish()
    }
}

impl Agent {
    /// The agent's identity is the executor's address.
    pub fn new(executor: Arc<dyn ProcessExecutor>, control: Arc<dyn ControlPlane>) -> Self {
        Self {
            addr: executor.addr().to_string(),
            remote_ip: executor.remote_ip(),
            executor,
            control,
            session: Mutex::new(()),
            probe_command: DEFAULT_PROBE_COMMAND.to_string(),
        }
    }

    /// Wire an open SSH session to a Docker Engine client tunneled through it.
    pub fn over_ssh(session: SshSession) -> Self {
        let session = Arc::new(session);
        let control = Arc::new(EngineClient::new(session.target().host.clone(), session.clone()));
        Self::new(session, control)
    }

    /// Open an SSH session to `target` and build an agent on top of it.
    pub async fn connect(target: SshTarget) -> Result<Self, TransportError> {
        let session = SshSession::connect(target).await?;
        Ok(Self::over_ssh(session))
    }

    pub fn with_probe_command(mut self, command: impl Into<String>) -> Self {
        self.probe_command = command.into();
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// IP address the session reached, if the executor knows it.
    pub fn remote_ip(&self) -> Option<IpAddr> {
        self.remote_ip
    }

    /// Address to advertise to the control plane: the resolved IP when
    /// known, since daemons reject host names there.
    pub fn advertise_addr(&self) -> String {
        match self.remote_ip {
            Some(ip) => ip.to_string(),
            None => self.addr.clone(),
        }
    }

    /// Whether a control-plane address refers to this agent's host, either
    /// verbatim or through the IP the session resolved to.
    pub fn answers_to(&self, addr: &str) -> bool {
        addr == self.addr || matches_ip(self.remote_ip, addr)
    }

    /// Serialize against this agent and abort on cancellation.
    async fn guarded<T, Fut>(&self, cancel: &CancellationToken, fut: Fut) -> Result<T, AgentError>
    where
        Fut: Future<Output = Result<T, AgentError>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            result = async {
                let _session = self.session.lock().await;
                fut.await
            } => result,
        }
    }

    pub async fn info(&self, cancel: &CancellationToken) -> Result<SwarmInfo, AgentError> {
        self.guarded(cancel, self.control.info()).await
    }

    pub async fn cluster_inspect(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ClusterInspect, AgentError> {
        self.guarded(cancel, self.control.cluster_inspect()).await
    }

    /// Bootstrap a new cluster with this agent as its only manager.
    pub async fn cluster_init(
        &self,
        cancel: &CancellationToken,
        listen_addr: &str,
        advertise_addr: &str,
        labels: HashMap<String, String>,
    ) -> Result<String, AgentError> {
        info!(host = %self.addr, listen = %listen_addr, advertise = %advertise_addr, "initializing cluster");
        let request = InitRequest {
            listen_addr: listen_addr.to_string(),
            advertise_addr: advertise_addr.to_string(),
            spec: ClusterSpec { labels },
        };
        self.guarded(cancel, self.control.cluster_init(request)).await
    }

    /// Join as a worker. Being a member already counts as success.
    pub async fn cluster_join(
        &self,
        cancel: &CancellationToken,
        join_token: &str,
        manager_addr: &str,
        listen_addr: &str,
    ) -> Result<(), AgentError> {
        info!(host = %self.addr, manager = %manager_addr, "joining cluster");
        let request = JoinRequest {
            listen_addr: listen_addr.to_string(),
            advertise_addr: self.advertise_addr(),
            remote_addrs: vec![manager_addr.to_string()],
            join_token: join_token.to_string(),
        };
        match self.guarded(cancel, self.control.cluster_join(request)).await {
            Err(e) if e.is_already_member() => {
                debug!(host = %self.addr, "already a cluster member");
                Ok(())
            }
            other => other,
        }
    }

    pub async fn cluster_leave(
        &self,
        cancel: &CancellationToken,
        force: bool,
    ) -> Result<(), AgentError> {
        info!(host = %self.addr, force, "leaving cluster");
        self.guarded(cancel, self.control.cluster_leave(force)).await
    }

    pub async fn list_nodes(&self, cancel: &CancellationToken) -> Result<Vec<Node>, AgentError> {
        self.guarded(cancel, self.control.list_nodes()).await
    }

    pub async fn inspect_node(
        &self,
        cancel: &CancellationToken,
        id: &str,
    ) -> Result<Node, AgentError> {
        self.guarded(cancel, self.control.inspect_node(id)).await
    }

    /// Change a node's role, carrying its current version to the daemon.
    /// A node already holding `role` is left untouched.
    pub async fn update_node_role(
        &self,
        cancel: &CancellationToken,
        id: &str,
        role: NodeRole,
    ) -> Result<(), AgentError> {
        self.guarded(cancel, async {
            let node = self.control.inspect_node(id).await?;
            if node.spec.role == role {
                debug!(host = %self.addr, node_id = %id, %role, "role already set");
                return Ok(());
            }
            let mut spec = node.spec;
            spec.role = role;
            info!(host = %self.addr, node_id = %id, %role, "updating node role");
            self.control.update_node(id, node.version, spec).await
        })
        .await
    }

    pub async fn remove_node(
        &self,
        cancel: &CancellationToken,
        id: &str,
        force: bool,
    ) -> Result<(), AgentError> {
        info!(host = %self.addr, node_id = %id, force, "removing node from roster");
        self.guarded(cancel, self.control.remove_node(id, force)).await
    }

    /// Open an event stream for one node. The stream uses its own
    /// connection, so it is not serialized with other requests.
    pub async fn stream_node_events(
        &self,
        cancel: &CancellationToken,
        node_id: &str,
    ) -> Result<NodeEventStream, AgentError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            result = self.control.node_events(node_id) => result,
        }
    }

    /// Whether the control plane answers on this host.
    pub async fn is_control_plane_installed(
        &self,
        cancel: &CancellationToken,
    ) -> Result<bool, AgentError> {
        self.guarded(cancel, async {
            let output = self.executor.run(&self.probe_command).await?;
            if !output.success() {
                debug!(host = %self.addr, status = output.status, "control plane probe failed: {}", output.stderr.trim());
            }
            Ok(output.success())
        })
        .await
    }

    /// Drop the control-plane connection, then the shell session.
    pub async fn close(&self) -> Result<(), AgentError> {
        self.control.close().await;
        self.executor.close().await?;
        Ok(())
    }
}

/// Whether `addr` parses to the same IP as `ip`.
pub fn matches_ip(ip: Option<IpAddr>, addr: &str) -> bool {
    match (ip, addr.parse::<IpAddr>()) {
        (Some(ip), Ok(other)) => ip == other,
        _ => false,
    }
}
