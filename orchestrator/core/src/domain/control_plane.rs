// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::error::AgentError;
use crate::domain::node::{
    ClusterInspect, InitRequest, JoinRequest, Node, NodeEvent, NodeSpec, ObjectVersion, SwarmInfo,
};
use async_trait::async_trait;
use futures::stream::BoxStream;

pub type NodeEventStream = BoxStream<'static, Result<NodeEvent, AgentError>>;

/// Client for one host's control-plane daemon.
///
/// Implementations own their connection and may establish it lazily. Callers
/// must not issue two requests concurrently against the same instance; the
/// [`Agent`](crate::Agent) handle enforces that.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn info(&self) -> Result<SwarmInfo, AgentError>;

    async fn cluster_inspect(&self) -> Result<ClusterInspect, AgentError>;

    /// Returns the node id of the new (sole) manager.
    async fn cluster_init(&self, request: InitRequest) -> Result<String, AgentError>;

    async fn cluster_join(&self, request: JoinRequest) -> Result<(), AgentError>;

    async fn cluster_leave(&self, force: bool) -> Result<(), AgentError>;

    async fn list_nodes(&self) -> Result<Vec<Node>, AgentError>;

    async fn inspect_node(&self, id: &str) -> Result<Node, AgentError>;

    async fn update_node(
        &self,
        id: &str,
        version: ObjectVersion,
        spec: NodeSpec,
    ) -> Result<(), AgentError>;

    async fn remove_node(&self, id: &str, force: bool) -> Result<(), AgentError>;

    /// Stream of events concerning a single node. Opened on its own
    /// connection so it never blocks request/response calls.
    async fn node_events(&self, node_id: &str) -> Result<NodeEventStream, AgentError>;

    /// Drop the connection. Calling twice is harmless.
    async fn close(&self);
}
