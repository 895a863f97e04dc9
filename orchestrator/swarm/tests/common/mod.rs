// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory cluster used by the coordinator tests.
//!
//! Every simulated host exposes a `ControlPlane` and a `ProcessExecutor`
//! over one shared state, behaving like a Docker daemon in swarm mode for the
//! calls the coordinator makes: managers answer roster queries, role changes
//! carry a version, demoted managers lose their manager status, leaving nodes
//! turn `down` and stay in the roster until removed.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use skiff_core::{
    Agent, AgentError, ClusterInfo, ClusterInspect, CommandOutput, ControlPlane, InitRequest,
    JoinRequest, JoinTokens, LocalNodeState, ManagerStatus, Node, NodeEventStream, NodeRole,
    NodeSpec, NodeState, NodeStatus, ObjectVersion, ProcessExecutor, SwarmInfo, TransportError,
};
use skiff_swarm::{Coordinator, CoordinatorConfig, CoordinatorEvent, CoordinatorObserver};
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SimNode {
    pub id: String,
    pub addr: String,
    pub role: NodeRole,
    pub state: NodeState,
    pub manager: bool,
    pub leader: bool,
    pub version: u64,
}

#[derive(Debug, Default)]
pub struct SimState {
    /// host address -> (cluster id, node id)
    pub membership: BTreeMap<String, (String, String)>,
    /// cluster id -> roster
    pub clusters: BTreeMap<String, Vec<SimNode>>,
    pub unreachable: HashSet<String>,
    pub without_daemon: HashSet<String>,
    /// Node ids whose role updates are refused.
    pub reject_role_change: HashSet<String>,
    /// Node ids whose role updates are accepted but never take effect.
    pub stalled: HashSet<String>,
    pub next_id: usize,
    pub joins_in_flight: usize,
    pub max_joins_in_flight: usize,
    pub calls: Vec<String>,
}

impl SimState {
    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn roster(&self, cluster: &str) -> &[SimNode] {
        self.clusters.get(cluster).map(Vec::as_slice).unwrap_or(&[])
    }

    fn node_mut(&mut self, cluster: &str, id: &str) -> Option<&mut SimNode> {
        self.clusters
            .get_mut(cluster)
            .and_then(|nodes| nodes.iter_mut().find(|n| n.id == id))
    }

    fn local_node(&self, addr: &str) -> Option<(&str, &SimNode)> {
        let (cluster, node_id) = self.membership.get(addr)?;
        let node = self.roster(cluster).iter().find(|n| &n.id == node_id)?;
        Some((cluster.as_str(), node))
    }

    /// Give leadership to another ready manager when the leader steps down.
    fn hand_over_leadership(&mut self, cluster: &str, from: &str) {
        let Some(nodes) = self.clusters.get_mut(cluster) else {
            return;
        };
        let was_leader = nodes.iter().any(|n| n.id == from && n.leader);
        if !was_leader {
            return;
        }
        for node in nodes.iter_mut() {
            node.leader = false;
        }
        if let Some(next) = nodes
            .iter_mut()
            .find(|n| n.id != from && n.manager && n.state == NodeState::Ready)
        {
            next.leader = true;
        }
    }
}

fn rejected(status: u16, message: &str) -> AgentError {
    AgentError::ControlPlane {
        status,
        message: message.to_string(),
    }
}

fn not_manager() -> AgentError {
    rejected(
        503,
        "This node is not a swarm manager. Use \"docker swarm init\" or \"docker swarm join\" to connect this node to swarm and try again.",
    )
}

fn to_node(node: &SimNode) -> Node {
    Node {
        id: node.id.clone(),
        version: ObjectVersion {
            index: node.version,
        },
        spec: NodeSpec {
            role: node.role,
            ..Default::default()
        },
        status: NodeStatus {
            state: node.state,
            addr: node.addr.clone(),
            ..Default::default()
        },
        manager_status: node.manager.then(|| ManagerStatus {
            leader: node.leader,
            reachability: "reachable".to_string(),
            addr: format!("{}:2377", node.addr),
        }),
        ..Default::default()
    }
}

#[derive(Clone, Default)]
pub struct SimCluster {
    pub state: Arc<Mutex<SimState>>,
    pub closed: Arc<AtomicUsize>,
}

impl SimCluster {
    pub fn host(i: usize) -> String {
        format!("10.0.0.{}", i)
    }

    /// `10.0.0.1` .. `10.0.0.n`.
    pub fn hosts(n: usize) -> Vec<String> {
        (1..=n).map(Self::host).collect()
    }

    /// Seed a cluster directly. The first manager leads it.
    pub fn seed(&self, cluster: &str, members: &[(&str, NodeRole)]) {
        let members: Vec<(&str, &str, NodeRole)> =
            members.iter().map(|(addr, role)| (*addr, *addr, *role)).collect();
        self.seed_advertised(cluster, &members);
    }

    /// Seed a cluster whose nodes advertise an address other than the host
    /// name their agents use: `(host, advertised address, role)`.
    pub fn seed_advertised(&self, cluster: &str, members: &[(&str, &str, NodeRole)]) {
        let mut state = self.state.lock();
        let mut nodes = Vec::new();
        let mut leader_taken = false;
        for (host, addr, role) in members {
            let id = state.fresh_id("node");
            let manager = *role == NodeRole::Manager;
            let leader = manager && !leader_taken;
            leader_taken |= leader;
            nodes.push(SimNode {
                id: id.clone(),
                addr: addr.to_string(),
                role: *role,
                state: NodeState::Ready,
                manager,
                leader,
                version: 1,
            });
            state
                .membership
                .insert(host.to_string(), (cluster.to_string(), id));
        }
        state.clusters.insert(cluster.to_string(), nodes);
    }

    pub fn agent(&self, addr: &str) -> Agent {
        self.agent_reaching(addr, None)
    }

    /// Agent for a host given by name whose session reached `ip`, if any.
    pub fn agent_reaching(&self, addr: &str, ip: Option<&str>) -> Agent {
        let executor = Arc::new(SimExecutor {
            addr: addr.to_string(),
            remote_ip: ip.and_then(|ip| ip.parse().ok()),
            cluster: self.clone(),
        });
        let control = Arc::new(SimControlPlane {
            addr: addr.to_string(),
            cluster: self.clone(),
        });
        Agent::new(executor, control)
    }

    pub fn agents(&self, addrs: &[String]) -> Vec<Agent> {
        addrs.iter().map(|a| self.agent(a)).collect()
    }

    pub fn coordinator(&self, addrs: &[String]) -> Coordinator {
        Coordinator::new(self.agents(addrs), fast_config())
    }

    pub fn set_unreachable(&self, addr: &str) {
        self.state.lock().unreachable.insert(addr.to_string());
    }

    pub fn node_id(&self, addr: &str) -> Option<String> {
        self.state.lock().membership.get(addr).map(|(_, id)| id.clone())
    }

    /// Nodes of the only cluster, or of the given host's cluster.
    pub fn roster_of(&self, addr: &str) -> Vec<SimNode> {
        let state = self.state.lock();
        match state.membership.get(addr) {
            Some((cluster, _)) => state.roster(cluster).to_vec(),
            None => Vec::new(),
        }
    }

    pub fn ready_managers(&self, addr: &str) -> usize {
        self.roster_of(addr)
            .iter()
            .filter(|n| n.state == NodeState::Ready && n.manager)
            .count()
    }

    pub fn ready_nodes(&self, addr: &str) -> usize {
        self.roster_of(addr)
            .iter()
            .filter(|n| n.state == NodeState::Ready)
            .count()
    }

    pub fn is_member(&self, addr: &str) -> bool {
        self.state.lock().membership.contains_key(addr)
    }

    pub fn leader_addr(&self, addr: &str) -> Option<String> {
        self.roster_of(addr)
            .into_iter()
            .find(|n| n.leader)
            .map(|n| n.addr)
    }
}

pub fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig {
        convergence_timeout: Duration::from_millis(300),
        poll_interval: Duration::from_millis(5),
        ..Default::default()
    }
}

pub struct SimExecutor {
    addr: String,
    remote_ip: Option<IpAddr>,
    cluster: SimCluster,
}

#[async_trait]
impl ProcessExecutor for SimExecutor {
    fn addr(&self) -> &str {
        &self.addr
    }

    fn remote_ip(&self) -> Option<IpAddr> {
        self.remote_ip
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, TransportError> {
        let state = self.cluster.state.lock();
        if state.unreachable.contains(&self.addr) {
            return Err(TransportError::dial(&self.addr, "connection refused"));
        }
        let installed = !state.without_daemon.contains(&self.addr);
        Ok(CommandOutput {
            status: if command == "docker info" && installed { 0 } else { 127 },
            stdout: String::new(),
            stderr: if installed {
                String::new()
            } else {
                "docker: command not found".to_string()
            },
        })
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.cluster.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct SimControlPlane {
    addr: String,
    cluster: SimCluster,
}

impl SimControlPlane {
    fn reachable(&self, state: &mut SimState, call: &str) -> Result<(), AgentError> {
        state.calls.push(format!("{} {}", self.addr, call));
        if state.unreachable.contains(&self.addr) {
            return Err(AgentError::Transport(TransportError::dial(
                &self.addr,
                "ssh: connect to host: Connection refused",
            )));
        }
        Ok(())
    }

    /// Cluster id when this host is a ready manager.
    fn manager_cluster(&self, state: &SimState) -> Result<String, AgentError> {
        match state.local_node(&self.addr) {
            Some((cluster, node)) if node.manager && node.state == NodeState::Ready => {
                Ok(cluster.to_string())
            }
            _ => Err(not_manager()),
        }
    }
}

#[async_trait]
impl ControlPlane for SimControlPlane {
    async fn info(&self) -> Result<SwarmInfo, AgentError> {
        let mut state = self.cluster.state.lock();
        self.reachable(&mut state, "info")?;

        let Some((cluster, node)) = state.local_node(&self.addr) else {
            return Ok(SwarmInfo::default());
        };
        let roster = state.roster(cluster);
        Ok(SwarmInfo {
            node_id: node.id.clone(),
            node_addr: node.addr.clone(),
            local_node_state: LocalNodeState::Active,
            control_available: node.manager,
            nodes: roster.len(),
            managers: roster.iter().filter(|n| n.manager).count(),
            cluster: Some(ClusterInfo {
                id: cluster.to_string(),
            }),
            ..Default::default()
        })
    }

    async fn cluster_inspect(&self) -> Result<ClusterInspect, AgentError> {
        let mut state = self.cluster.state.lock();
        self.reachable(&mut state, "cluster_inspect")?;
        let cluster = self.manager_cluster(&state)?;
        Ok(ClusterInspect {
            id: cluster.clone(),
            join_tokens: JoinTokens {
                worker: format!("SWMTKN-{}-worker", cluster),
                manager: format!("SWMTKN-{}-manager", cluster),
            },
        })
    }

    async fn cluster_init(&self, request: InitRequest) -> Result<String, AgentError> {
        let mut state = self.cluster.state.lock();
        self.reachable(&mut state, "cluster_init")?;
        if state.membership.contains_key(&self.addr) {
            return Err(rejected(503, "This node is already part of a swarm. Use \"docker swarm leave\" to leave this swarm and join another one."));
        }

        let cluster = state.fresh_id("cluster");
        let id = state.fresh_id("node");
        state.clusters.insert(
            cluster.clone(),
            vec![SimNode {
                id: id.clone(),
                addr: request.advertise_addr.clone(),
                role: NodeRole::Manager,
                state: NodeState::Ready,
                manager: true,
                leader: true,
                version: 1,
            }],
        );
        state
            .membership
            .insert(self.addr.clone(), (cluster, id.clone()));
        Ok(id)
    }

    async fn cluster_join(&self, request: JoinRequest) -> Result<(), AgentError> {
        {
            let mut state = self.cluster.state.lock();
            self.reachable(&mut state, "cluster_join")?;
            if state.membership.contains_key(&self.addr) {
                return Err(rejected(503, "This node is already part of a swarm. Use \"docker swarm leave\" to leave this swarm and join another one."));
            }
            state.joins_in_flight += 1;
            state.max_joins_in_flight = state.max_joins_in_flight.max(state.joins_in_flight);
        }

        tokio::time::sleep(Duration::from_millis(2)).await;

        let mut state = self.cluster.state.lock();
        state.joins_in_flight -= 1;

        let cluster = request
            .join_token
            .strip_prefix("SWMTKN-")
            .and_then(|t| t.strip_suffix("-worker"))
            .map(str::to_string)
            .filter(|c| state.clusters.contains_key(c))
            .ok_or_else(|| rejected(400, "invalid join token"))?;

        let id = state.fresh_id("node");
        if let Some(nodes) = state.clusters.get_mut(&cluster) {
            nodes.push(SimNode {
                id: id.clone(),
                addr: request.advertise_addr.clone(),
                role: NodeRole::Worker,
                state: NodeState::Ready,
                manager: false,
                leader: false,
                version: 1,
            });
        }
        state.membership.insert(self.addr.clone(), (cluster, id));
        Ok(())
    }

    async fn cluster_leave(&self, force: bool) -> Result<(), AgentError> {
        let mut state = self.cluster.state.lock();
        self.reachable(&mut state, "cluster_leave")?;

        let Some((cluster, node)) = state.local_node(&self.addr) else {
            return Err(rejected(503, "This node is not part of a swarm"));
        };
        let (cluster, id, manager) = (cluster.to_string(), node.id.clone(), node.manager);
        if manager && !force {
            return Err(rejected(
                503,
                "You are attempting to leave the swarm on a node that is participating as a manager.",
            ));
        }

        state.hand_over_leadership(&cluster, &id);
        if let Some(node) = state.node_mut(&cluster, &id) {
            node.state = NodeState::Down;
            node.leader = false;
        }
        state.membership.remove(&self.addr);
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, AgentError> {
        let mut state = self.cluster.state.lock();
        self.reachable(&mut state, "list_nodes")?;
        let cluster = self.manager_cluster(&state)?;
        Ok(state.roster(&cluster).iter().map(to_node).collect())
    }

    async fn inspect_node(&self, id: &str) -> Result<Node, AgentError> {
        let mut state = self.cluster.state.lock();
        self.reachable(&mut state, "inspect_node")?;
        let cluster = self.manager_cluster(&state)?;
        state
            .roster(&cluster)
            .iter()
            .find(|n| n.id == id)
            .map(to_node)
            .ok_or_else(|| rejected(404, &format!("node {} not found", id)))
    }

    async fn update_node(
        &self,
        id: &str,
        version: ObjectVersion,
        spec: NodeSpec,
    ) -> Result<(), AgentError> {
        let mut state = self.cluster.state.lock();
        self.reachable(&mut state, &format!("update_node {} {}", id, spec.role))?;
        let cluster = self.manager_cluster(&state)?;

        if state.reject_role_change.contains(id) {
            return Err(rejected(500, "rpc error: code = Unknown desc = role change refused"));
        }
        let stalled = state.stalled.contains(id);
        let managers = state.roster(&cluster).iter().filter(|n| n.manager).count();

        let node = state
            .node_mut(&cluster, id)
            .ok_or_else(|| rejected(404, &format!("node {} not found", id)))?;
        if node.version != version.index {
            return Err(rejected(500, "update out of sequence"));
        }
        if spec.role == NodeRole::Worker && node.manager && managers == 1 {
            return Err(rejected(400, "attempting to demote the last manager of the swarm"));
        }

        node.version += 1;
        node.role = spec.role;
        if !stalled {
            node.manager = spec.role == NodeRole::Manager;
        }
        let was_leader = node.leader;
        if spec.role == NodeRole::Worker && was_leader && !stalled {
            state.hand_over_leadership(&cluster, id);
            if let Some(node) = state.node_mut(&cluster, id) {
                node.leader = false;
            }
        }
        Ok(())
    }

    async fn remove_node(&self, id: &str, force: bool) -> Result<(), AgentError> {
        let mut state = self.cluster.state.lock();
        self.reachable(&mut state, &format!("remove_node {}", id))?;
        let cluster = self.manager_cluster(&state)?;

        let Some(node) = state.roster(&cluster).iter().find(|n| n.id == id).cloned() else {
            return Err(rejected(404, &format!("node {} not found", id)));
        };
        if node.manager && node.state == NodeState::Ready {
            return Err(rejected(
                400,
                "rpc error: node is a cluster manager and is a member of the raft cluster. It must be demoted to worker before removal",
            ));
        }
        if node.state == NodeState::Ready && !force {
            return Err(rejected(400, "node is not down and can't be removed"));
        }

        if let Some(nodes) = state.clusters.get_mut(&cluster) {
            nodes.retain(|n| n.id != id);
        }
        state
            .membership
            .retain(|_, (c, node_id)| !(c == &cluster && node_id == id));
        Ok(())
    }

    async fn node_events(&self, _node_id: &str) -> Result<NodeEventStream, AgentError> {
        Ok(Box::pin(futures::stream::empty()))
    }

    async fn close(&self) {}
}

/// Observer keeping every event for later assertions.
#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<CoordinatorEvent>>,
}

impl RecordingObserver {
    pub fn snapshot(&self) -> Vec<CoordinatorEvent> {
        self.events.lock().clone()
    }
}

impl CoordinatorObserver for RecordingObserver {
    fn on_event(&self, event: &CoordinatorEvent) {
        self.events.lock().push(event.clone());
    }
}
