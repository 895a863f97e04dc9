// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent serialization and cancellation, driven poll by poll.

use async_trait::async_trait;
use skiff_core::{
    collect_first_error, Agent, AgentError, ClusterInspect, CommandOutput, ControlPlane,
    InitRequest, JoinRequest, Node, NodeEventStream, NodeSpec, ObjectVersion, ProcessExecutor,
    SwarmInfo, TransportError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_test::{assert_pending, assert_ready, assert_ready_ok, task};
use tokio_util::sync::CancellationToken;

struct Host(String);

#[async_trait]
impl ProcessExecutor for Host {
    fn addr(&self) -> &str {
        &self.0
    }

    async fn run(&self, _command: &str) -> Result<CommandOutput, TransportError> {
        Ok(CommandOutput::default())
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Counts requests dropped before they finished.
struct DropCounter(Arc<AtomicUsize>, bool);

impl Drop for DropCounter {
    fn drop(&mut self) {
        if !self.1 {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// `info` blocks until the gate hands out a permit; everything else answers
/// at once.
struct GatedDaemon {
    gate: Arc<Semaphore>,
    abandoned: Arc<AtomicUsize>,
    failing: bool,
}

impl GatedDaemon {
    fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            abandoned: Arc::new(AtomicUsize::new(0)),
            failing: false,
        }
    }
}

#[async_trait]
impl ControlPlane for GatedDaemon {
    async fn info(&self) -> Result<SwarmInfo, AgentError> {
        let mut guard = DropCounter(self.abandoned.clone(), false);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| AgentError::Protocol(e.to_string()))?;
        permit.forget();
        guard.1 = true;
        Ok(SwarmInfo {
            node_id: "n1".to_string(),
            ..Default::default()
        })
    }

    async fn cluster_inspect(&self) -> Result<ClusterInspect, AgentError> {
        Ok(ClusterInspect::default())
    }

    async fn cluster_init(&self, _request: InitRequest) -> Result<String, AgentError> {
        Ok("n1".to_string())
    }

    async fn cluster_join(&self, _request: JoinRequest) -> Result<(), AgentError> {
        Ok(())
    }

    async fn cluster_leave(&self, _force: bool) -> Result<(), AgentError> {
        if self.failing {
            return Err(AgentError::ControlPlane {
                status: 503,
                message: "This node is not part of a swarm".to_string(),
            });
        }
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, AgentError> {
        Ok(Vec::new())
    }

    async fn inspect_node(&self, id: &str) -> Result<Node, AgentError> {
        Err(AgentError::ControlPlane {
            status: 404,
            message: format!("node {} not found", id),
        })
    }

    async fn update_node(
        &self,
        _id: &str,
        _version: ObjectVersion,
        _spec: NodeSpec,
    ) -> Result<(), AgentError> {
        Ok(())
    }

    async fn remove_node(&self, _id: &str, _force: bool) -> Result<(), AgentError> {
        Ok(())
    }

    async fn node_events(&self, _node_id: &str) -> Result<NodeEventStream, AgentError> {
        Ok(Box::pin(futures::stream::empty()))
    }

    async fn close(&self) {}
}

fn agent(addr: &str, daemon: GatedDaemon) -> (Agent, Arc<Semaphore>, Arc<AtomicUsize>) {
    let gate = daemon.gate.clone();
    let abandoned = daemon.abandoned.clone();
    let agent = Agent::new(Arc::new(Host(addr.to_string())), Arc::new(daemon));
    (agent, gate, abandoned)
}

#[test]
fn test_second_request_waits_for_the_first() {
    let (agent, gate, _) = agent("10.0.0.1", GatedDaemon::new());
    let cancel = CancellationToken::new();

    let mut first = task::spawn(agent.info(&cancel));
    assert_pending!(first.poll());

    let mut second = task::spawn(agent.list_nodes(&cancel));
    assert_pending!(second.poll());

    gate.add_permits(1);
    assert!(first.is_woken());
    let info = assert_ready_ok!(first.poll());
    assert_eq!(info.node_id, "n1");
    drop(first);

    assert!(second.is_woken());
    assert_ready_ok!(second.poll());
}

#[test]
fn test_other_hosts_are_not_blocked() {
    let (busy, _gate, _) = agent("10.0.0.1", GatedDaemon::new());
    let (idle, _, _) = agent("10.0.0.2", GatedDaemon::new());
    let cancel = CancellationToken::new();

    let mut blocked = task::spawn(busy.info(&cancel));
    assert_pending!(blocked.poll());

    let mut other = task::spawn(idle.list_nodes(&cancel));
    assert_ready_ok!(other.poll());
}

#[test]
fn test_cancelled_waiter_gives_up_its_turn() {
    let (agent, gate, _) = agent("10.0.0.1", GatedDaemon::new());
    let cancel = CancellationToken::new();
    let waiter_cancel = CancellationToken::new();

    let mut first = task::spawn(agent.info(&cancel));
    assert_pending!(first.poll());
    let mut waiter = task::spawn(agent.list_nodes(&waiter_cancel));
    assert_pending!(waiter.poll());

    waiter_cancel.cancel();
    assert!(waiter.is_woken());
    let result = assert_ready!(waiter.poll());
    assert!(matches!(result, Err(AgentError::Cancelled)));

    gate.add_permits(1);
    assert_ready_ok!(first.poll());
}

#[test]
fn test_cancellation_drops_the_in_flight_request() {
    let (agent, _gate, abandoned) = agent("10.0.0.1", GatedDaemon::new());
    let cancel = CancellationToken::new();

    let mut request = task::spawn(agent.info(&cancel));
    assert_pending!(request.poll());
    assert_eq!(abandoned.load(Ordering::SeqCst), 0);

    cancel.cancel();
    let result = assert_ready!(request.poll());
    assert!(matches!(result, Err(AgentError::Cancelled)));
    assert_eq!(abandoned.load(Ordering::SeqCst), 1);

    // The lock was released with the dropped request.
    let fresh = CancellationToken::new();
    let mut next = task::spawn(agent.list_nodes(&fresh));
    assert_ready_ok!(next.poll());
}

#[tokio::test]
async fn test_fan_out_returns_first_failure() {
    let mut failing = GatedDaemon::new();
    failing.failing = true;
    let agents: Vec<Arc<Agent>> = vec![
        Arc::new(agent("10.0.0.1", GatedDaemon::new()).0),
        Arc::new(agent("10.0.0.2", failing).0),
        Arc::new(agent("10.0.0.3", GatedDaemon::new()).0),
    ];
    let cancel = CancellationToken::new();

    let result = collect_first_error(&cancel, agents.len(), |i| {
        let agent = agents[i].clone();
        let cancel = cancel.clone();
        async move { agent.cluster_leave(&cancel, false).await }
    })
    .await;

    match result {
        Err(e @ AgentError::ControlPlane { .. }) => assert!(e.is_not_manager()),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_fan_out_refuses_to_start_when_cancelled() {
    let agents: Vec<Arc<Agent>> = vec![Arc::new(agent("10.0.0.1", GatedDaemon::new()).0)];
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = collect_first_error(&cancel, agents.len(), |i| {
        let agent = agents[i].clone();
        let cancel = cancel.clone();
        async move { agent.cluster_leave(&cancel, true).await }
    })
    .await;

    assert!(matches!(result, Err(AgentError::Cancelled)));
}
