// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cluster Coordinator
//!
//! Holds the desired agents and drives the cluster towards them: bootstrap,
//! join, leave, removal of stray roster entries and manager rebalancing.
//!
//! ## Operations
//!
//! | Operation | Failure policy |
//! |-----------|----------------|
//! | [`Coordinator::snapshot`] | unreachable agents count as not-member; split membership fails |
//! | [`Coordinator::init`] | bootstrap errors fail; per-node join failures end in `JoinFailed` |
//! | [`Coordinator::join_nodes`] | sequential joins, failures collected, then rebalance |
//! | [`Coordinator::leave_node`] | quorum violations and convergence timeouts fail |
//! | [`Coordinator::leave_all`] | best effort, failures reported to the observer |
//! | [`Coordinator::remove_extra`] | best effort, summarized in a `RemovalReport` |
//! | [`Coordinator::reconcile`] | init or join + remove, summarized in a `ReconcileReport` |
//!
//! ## Manager Selection
//!
//! Role changes are issued through a *coordinating manager*. The reported
//! leader is preferred so that the two nodes a rebalance never demotes (the
//! coordinator and the leader) are usually one and the same.
//!
//! Every call re-derives state from the agents; nothing is cached between
//! calls.

use crate::application::config::{ConvergenceStrategy, CoordinatorConfig};
use crate::application::convergence::{wait_until, Trigger};
use crate::domain::error::SwarmError;
use crate::domain::events::{CoordinatorEvent, CoordinatorObserver, TracingObserver};
use crate::domain::lifecycle::NodeLifecycle;
use crate::domain::membership::{ExtraNode, MemberState, MemberView, MembershipSnapshot};
use crate::domain::quorum::desired_managers;
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use skiff_core::{run_all, Agent, AgentError, Node, NodeRole, NodeState, SwarmInfo};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of [`Coordinator::remove_extra`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemovalReport {
    pub removed: Vec<ExtraNode>,
    /// Extra managers left in place because they lead the cluster.
    pub skipped_leaders: Vec<ExtraNode>,
    pub failed: Vec<RemovalFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalFailure {
    pub node: ExtraNode,
    pub error: String,
}

/// Outcome of [`Coordinator::reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// A new cluster was bootstrapped.
    pub initialized: bool,
    pub joined: Vec<String>,
    pub join_failed: Vec<String>,
    pub removal: RemovalReport,
}

#[derive(Debug, Default)]
struct JoinOutcome {
    joined: Vec<String>,
    failed: Vec<String>,
}

impl JoinOutcome {
    fn into_result(self) -> Result<(), SwarmError> {
        if self.failed.is_empty() {
            Ok(())
        } else {
            Err(SwarmError::JoinFailed { addrs: self.failed })
        }
    }
}

fn at(agent: &Agent) -> impl Fn(AgentError) -> SwarmError + '_ {
    move |e| SwarmError::agent(agent.addr(), e)
}

pub struct Coordinator {
    agents: Vec<Arc<Agent>>,
    config: CoordinatorConfig,
    observer: Arc<dyn CoordinatorObserver>,
}

impl Coordinator {
    /// `agents` is the desired member set. Its order matters: the first
    /// agent bootstraps a new cluster. Agents with an address already seen
    /// are dropped.
    pub fn new(agents: Vec<Agent>, config: CoordinatorConfig) -> Self {
        let mut unique: Vec<Arc<Agent>> = Vec::with_capacity(agents.len());
        for agent in agents {
            if unique.iter().any(|a| a.addr() == agent.addr()) {
                warn!(host = %agent.addr(), "duplicate agent address ignored");
                continue;
            }
            unique.push(Arc::new(agent));
        }

        Self {
            agents: unique,
            config,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn CoordinatorObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn agents(&self) -> &[Arc<Agent>] {
        &self.agents
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// The agent that bootstraps a new cluster: always the first desired
    /// agent.
    pub fn bootstrap_leader(&self) -> Option<&Arc<Agent>> {
        self.agents.first()
    }

    pub fn get_agent_by_address(&self, addr: &str) -> Option<Arc<Agent>> {
        self.agents.iter().find(|a| a.answers_to(addr)).cloned()
    }

    fn emit(&self, event: CoordinatorEvent) {
        self.observer.on_event(&event);
    }

    // ---------------------------------------------------------------------
    // Discovery
    // ---------------------------------------------------------------------

    /// Ask every agent for its membership in parallel and fetch the roster
    /// from the first reachable manager.
    pub async fn snapshot(
        &self,
        cancel: &CancellationToken,
    ) -> Result<MembershipSnapshot, SwarmError> {
        let views: Arc<Mutex<Vec<MemberView>>> = Arc::new(Mutex::new(
            self.agents
                .iter()
                .map(|a| MemberView::unreachable(a.addr()).with_remote_ip(a.remote_ip()))
                .collect(),
        ));

        run_all(cancel, self.agents.len(), |i| {
            let agent = self.agents[i].clone();
            let views = views.clone();
            let observer = self.observer.clone();
            let cancel = cancel.clone();
            async move {
                match agent.info(&cancel).await {
                    Ok(info) => {
                        views.lock()[i] =
                            MemberView::from_info(agent.addr(), &info).with_remote_ip(agent.remote_ip())
                    }
                    Err(AgentError::Cancelled) => {}
                    Err(e) => observer.on_event(&CoordinatorEvent::AgentUnreachable {
                        host: agent.addr().to_string(),
                        error: e.to_string(),
                    }),
                }
            }
        })
        .await;

        if cancel.is_cancelled() {
            return Err(SwarmError::Cancelled);
        }

        let members = std::mem::take(&mut *views.lock());
        let mut snapshot = MembershipSnapshot::new(members, Vec::new(), None)?;

        let managers: Vec<String> = snapshot.managers().iter().map(|m| m.addr.clone()).collect();
        for addr in managers {
            let Some(agent) = self.get_agent_by_address(&addr) else {
                continue;
            };
            match agent.list_nodes(cancel).await {
                Ok(nodes) => {
                    snapshot.roster = nodes;
                    snapshot.roster_source = Some(addr);
                    break;
                }
                Err(AgentError::Cancelled) => return Err(SwarmError::Cancelled),
                Err(e) => warn!(host = %addr, "could not list nodes: {}", e),
            }
        }

        self.emit(CoordinatorEvent::SnapshotTaken {
            members: snapshot.members.len(),
            managers: snapshot.managers().len(),
            workers: snapshot.workers().len(),
            missing: snapshot.missing().len(),
            extra: snapshot.extra().len(),
            taken_at: snapshot.taken_at,
        });

        Ok(snapshot)
    }

    /// Whether any desired agent already belongs to a cluster.
    pub async fn exists(&self, cancel: &CancellationToken) -> Result<bool, SwarmError> {
        Ok(self.snapshot(cancel).await?.exists())
    }

    /// First agent reporting itself a manager whose node id is not excluded.
    async fn find_manager(
        &self,
        cancel: &CancellationToken,
        exclude: &[&str],
    ) -> Result<(Arc<Agent>, SwarmInfo), SwarmError> {
        for agent in &self.agents {
            match agent.info(cancel).await {
                Ok(info) if info.is_manager() && !exclude.contains(&info.node_id.as_str()) => {
                    return Ok((agent.clone(), info));
                }
                Ok(_) => {}
                Err(AgentError::Cancelled) => return Err(SwarmError::Cancelled),
                Err(e) => debug!(host = %agent.addr(), "skipping unreachable agent: {}", e),
            }
        }
        Err(SwarmError::NoManager)
    }

    /// Pick the coordinating manager, preferring the leader. Returns the
    /// agent and its node id.
    async fn find_coordinator(
        &self,
        cancel: &CancellationToken,
        exclude: &[&str],
    ) -> Result<(Arc<Agent>, String), SwarmError> {
        let (manager, info) = self.find_manager(cancel, exclude).await?;
        let nodes = manager.list_nodes(cancel).await.map_err(at(&manager))?;

        let leader = nodes
            .iter()
            .find(|n| n.is_leader() && !exclude.contains(&n.id.as_str()));
        if let Some(leader) = leader.filter(|l| l.id != info.node_id) {
            for agent in &self.agents {
                match agent.info(cancel).await {
                    Ok(i) if i.node_id == leader.id && i.is_manager() => {
                        return Ok((agent.clone(), i.node_id));
                    }
                    Ok(_) => {}
                    Err(AgentError::Cancelled) => return Err(SwarmError::Cancelled),
                    Err(_) => {}
                }
            }
        }

        Ok((manager, info.node_id))
    }

    // ---------------------------------------------------------------------
    // Bootstrap and join
    // ---------------------------------------------------------------------

    /// Bootstrap a cluster on the first desired agent, join the rest as
    /// workers, then rebalance.
    pub async fn init(&self, cancel: &CancellationToken) -> Result<(), SwarmError> {
        self.bootstrap(cancel).await?.into_result()
    }

    async fn bootstrap(&self, cancel: &CancellationToken) -> Result<JoinOutcome, SwarmError> {
        let leader = self.bootstrap_leader().ok_or(SwarmError::NoAgents)?.clone();

        let info = leader.info(cancel).await.map_err(at(&leader))?;
        NodeLifecycle::from(MemberState::from_info(&info))
            .transition(NodeLifecycle::Joining, false)?;

        let node_id = leader
            .cluster_init(
                cancel,
                &self.config.listen_addr(),
                &leader.advertise_addr(),
                self.config.labels.clone(),
            )
            .await
            .map_err(at(&leader))?;
        info!(host = %leader.addr(), node_id = %node_id, "cluster initialized");
        self.emit(CoordinatorEvent::ClusterInitialized {
            host: leader.addr().to_string(),
            node_id: node_id.clone(),
        });

        let rest = self.agents[1..].to_vec();
        self.join_with_manager(cancel, &leader, &node_id, &rest).await
    }

    /// Join `agents` as workers through a current manager, then rebalance.
    pub async fn join_nodes(
        &self,
        cancel: &CancellationToken,
        agents: &[Arc<Agent>],
    ) -> Result<(), SwarmError> {
        let (manager, manager_id) = self.find_coordinator(cancel, &[]).await?;
        self.join_with_manager(cancel, &manager, &manager_id, agents)
            .await?
            .into_result()
    }

    async fn join_with_manager(
        &self,
        cancel: &CancellationToken,
        manager: &Agent,
        manager_id: &str,
        agents: &[Arc<Agent>],
    ) -> Result<JoinOutcome, SwarmError> {
        let mut outcome = JoinOutcome::default();
        if agents.is_empty() {
            return Ok(outcome);
        }

        let cluster = manager.cluster_inspect(cancel).await.map_err(at(manager))?;
        let info = manager.info(cancel).await.map_err(at(manager))?;
        let advertised = if info.node_addr.is_empty() {
            manager.advertise_addr()
        } else {
            info.node_addr
        };
        let manager_addr = self.config.remote_addr(&advertised);
        let listen_addr = self.config.listen_addr();

        // One join at a time: parallel joins race the control plane's own
        // membership protocol.
        for agent in agents {
            let joined = agent
                .cluster_join(cancel, &cluster.join_tokens.worker, &manager_addr, &listen_addr)
                .await;
            match joined {
                Ok(()) => {
                    counter!("skiff_joins_total").increment(1);
                    self.emit(CoordinatorEvent::NodeJoined {
                        host: agent.addr().to_string(),
                    });
                    outcome.joined.push(agent.addr().to_string());
                }
                Err(AgentError::Cancelled) => return Err(SwarmError::Cancelled),
                Err(e) => {
                    counter!("skiff_join_failures_total").increment(1);
                    self.emit(CoordinatorEvent::JoinFailed {
                        host: agent.addr().to_string(),
                        error: e.to_string(),
                    });
                    outcome.failed.push(agent.addr().to_string());
                }
            }
        }

        self.rebalance_with(cancel, manager, manager_id).await?;
        Ok(outcome)
    }

    // ---------------------------------------------------------------------
    // Quorum
    // ---------------------------------------------------------------------

    /// Bring the manager count to `desired_managers(active nodes)`.
    pub async fn rebalance(&self, cancel: &CancellationToken) -> Result<(), SwarmError> {
        let (manager, manager_id) = self.find_coordinator(cancel, &[]).await?;
        self.rebalance_with(cancel, &manager, &manager_id).await
    }

    async fn rebalance_with(
        &self,
        cancel: &CancellationToken,
        manager: &Agent,
        manager_id: &str,
    ) -> Result<(), SwarmError> {
        let nodes = manager.list_nodes(cancel).await.map_err(at(manager))?;
        let active = nodes.iter().filter(|n| n.is_ready()).count();
        let desired = desired_managers(active);
        let current = nodes
            .iter()
            .filter(|n| n.is_ready() && n.is_manager())
            .count();

        debug!(active, desired, current, "rebalancing managers");
        let actual = self
            .adjust_managers(cancel, manager, &nodes, current, desired, &[manager_id])
            .await?;

        if actual != desired {
            warn!(desired, actual, "manager quorum not reached");
            return Err(SwarmError::QuorumUnmet { desired, actual });
        }
        Ok(())
    }

    /// Promote or demote ready nodes one at a time until `current` reaches
    /// `desired`, and return the count reached. Nodes in `protected` and the
    /// leader are never demoted; a rejected change moves on to the next
    /// candidate, a convergence timeout stops the adjustment.
    async fn adjust_managers(
        &self,
        cancel: &CancellationToken,
        manager: &Agent,
        nodes: &[Node],
        mut current: usize,
        desired: usize,
        protected: &[&str],
    ) -> Result<usize, SwarmError> {
        let eligible = |n: &&Node| n.is_ready() && !protected.contains(&n.id.as_str());

        if current < desired {
            for node in nodes.iter().filter(eligible).filter(|n| !n.is_manager()) {
                if current == desired {
                    break;
                }
                match self.change_role(cancel, manager, node, NodeRole::Manager).await {
                    Ok(()) => current += 1,
                    Err(e) => self.skip_candidate(node, NodeRole::Manager, e)?,
                }
            }
        } else if current > desired {
            let candidates = nodes
                .iter()
                .filter(eligible)
                .filter(|n| n.is_manager() && !n.is_leader());
            for node in candidates {
                if current == desired {
                    break;
                }
                match self.change_role(cancel, manager, node, NodeRole::Worker).await {
                    Ok(()) => current -= 1,
                    Err(e) => self.skip_candidate(node, NodeRole::Worker, e)?,
                }
            }
        }

        Ok(current)
    }

    fn skip_candidate(&self, node: &Node, role: NodeRole, err: SwarmError) -> Result<(), SwarmError> {
        match err {
            SwarmError::ConvergenceTimeout { .. } | SwarmError::Cancelled => Err(err),
            err => {
                self.emit(CoordinatorEvent::RoleChangeFailed {
                    node_id: node.id.clone(),
                    role,
                    error: err.to_string(),
                });
                Ok(())
            }
        }
    }

    /// Set a node's role through `manager` and wait until the roster agrees.
    async fn change_role(
        &self,
        cancel: &CancellationToken,
        manager: &Agent,
        node: &Node,
        role: NodeRole,
    ) -> Result<(), SwarmError> {
        if node.spec.role == role {
            return Ok(());
        }
        NodeLifecycle::from(node.spec.role).transition(NodeLifecycle::from(role), false)?;

        manager
            .update_node_role(cancel, &node.id, role)
            .await
            .map_err(at(manager))?;
        counter!("skiff_role_changes_total", "role" => role.to_string()).increment(1);
        self.emit(CoordinatorEvent::RoleChanged {
            node_id: node.id.clone(),
            role,
        });

        let node_id = node.id.as_str();
        self.converge(cancel, manager, node_id, move || async move {
            let node = manager
                .inspect_node(cancel, node_id)
                .await
                .map_err(at(manager))?;
            Ok(match role {
                NodeRole::Manager => {
                    node.is_manager() && node.is_ready() && node.manager_status.is_some()
                }
                NodeRole::Worker => !node.is_manager() && node.manager_status.is_none(),
            })
        })
        .await
    }

    /// Wait for a post-condition about `node_id`, woken as configured.
    async fn converge<F, Fut>(
        &self,
        cancel: &CancellationToken,
        manager: &Agent,
        node_id: &str,
        check: F,
    ) -> Result<(), SwarmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, SwarmError>>,
    {
        let interval = self.config.poll_interval;
        let trigger = match self.config.strategy {
            ConvergenceStrategy::Poll => Trigger::Interval(interval),
            ConvergenceStrategy::Events => match manager.stream_node_events(cancel, node_id).await {
                Ok(stream) => Trigger::Events {
                    stream,
                    fallback: interval,
                },
                Err(AgentError::Cancelled) => return Err(SwarmError::Cancelled),
                Err(e) => {
                    debug!(node_id = %node_id, "no event stream, polling: {}", e);
                    Trigger::Interval(interval)
                }
            },
        };

        let result = wait_until(cancel, self.config.convergence_timeout, node_id, trigger, check).await;
        if let Err(SwarmError::ConvergenceTimeout { node_id, waited }) = &result {
            counter!("skiff_convergence_timeouts_total").increment(1);
            self.emit(CoordinatorEvent::ConvergenceTimedOut {
                node_id: node_id.clone(),
                waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
            });
        }
        result
    }

    // ---------------------------------------------------------------------
    // Leave
    // ---------------------------------------------------------------------

    /// Take one agent out of the cluster.
    ///
    /// A graceful manager departure first hands its role to replacements;
    /// with `force` the node leaves at once and a remaining manager removes
    /// its roster entry.
    pub async fn leave_node(
        &self,
        cancel: &CancellationToken,
        agent: &Arc<Agent>,
        force: bool,
    ) -> Result<(), SwarmError> {
        let info = agent.info(cancel).await.map_err(at(agent))?;
        match MemberState::from_info(&info) {
            MemberState::NotMember => {
                debug!(host = %agent.addr(), "not a cluster member, nothing to leave");
                Ok(())
            }
            MemberState::Worker => self.leave_worker(cancel, agent, &info.node_id, force).await,
            MemberState::Manager if force => {
                self.force_leave_manager(cancel, agent, &info.node_id).await
            }
            MemberState::Manager => self.leave_manager(cancel, agent, &info.node_id).await,
        }
    }

    async fn leave_worker(
        &self,
        cancel: &CancellationToken,
        agent: &Agent,
        node_id: &str,
        force: bool,
    ) -> Result<(), SwarmError> {
        NodeLifecycle::Worker.transition(NodeLifecycle::Leaving, force)?;

        let (coordinator, coordinator_id) = self.find_coordinator(cancel, &[node_id]).await?;
        self.depart(cancel, &coordinator, agent, node_id, force).await?;
        self.rebalance_with(cancel, &coordinator, &coordinator_id).await
    }

    async fn leave_manager(
        &self,
        cancel: &CancellationToken,
        agent: &Arc<Agent>,
        node_id: &str,
    ) -> Result<(), SwarmError> {
        NodeLifecycle::Manager
            .transition(NodeLifecycle::Worker, false)?
            .transition(NodeLifecycle::Leaving, false)?;

        let nodes = agent.list_nodes(cancel).await.map_err(at(agent))?;
        let active = nodes.iter().filter(|n| n.is_ready()).count();
        let managers = nodes
            .iter()
            .filter(|n| n.is_ready() && n.is_manager())
            .count();
        let remaining = active.saturating_sub(1);

        if managers <= 1 && remaining < 3 {
            return Err(SwarmError::QuorumViolation(format!(
                "{} is the only manager and {} node(s) would remain; add nodes before removing it",
                agent.addr(),
                remaining
            )));
        }

        // The sole manager coordinates its own replacement.
        let (coordinator, coordinator_id) = match self.find_coordinator(cancel, &[node_id]).await {
            Ok(found) => found,
            Err(SwarmError::NoManager) => (agent.clone(), node_id.to_string()),
            Err(e) => return Err(e),
        };

        let desired = desired_managers(remaining);
        let current = managers.saturating_sub(1);
        let protected = [coordinator_id.as_str(), node_id];
        let reached = self
            .adjust_managers(cancel, &coordinator, &nodes, current, desired, &protected)
            .await?;
        debug!(host = %agent.addr(), desired, reached, "replacement managers in place");

        let (coordinator, coordinator_id) = if coordinator_id == node_id {
            let (next, next_id) = self.find_coordinator(cancel, &[node_id]).await?;
            info!(from = %agent.addr(), to = %next.addr(), "switching coordinating manager");
            self.emit(CoordinatorEvent::CoordinatorSwitched {
                from: agent.addr().to_string(),
                to: next.addr().to_string(),
            });
            (next, next_id)
        } else {
            (coordinator, coordinator_id)
        };

        let node = coordinator
            .inspect_node(cancel, node_id)
            .await
            .map_err(at(&coordinator))?;
        self.change_role(cancel, &coordinator, &node, NodeRole::Worker).await?;

        self.depart(cancel, &coordinator, agent, node_id, false).await?;
        self.rebalance_with(cancel, &coordinator, &coordinator_id).await
    }

    async fn force_leave_manager(
        &self,
        cancel: &CancellationToken,
        agent: &Agent,
        node_id: &str,
    ) -> Result<(), SwarmError> {
        NodeLifecycle::Manager.transition(NodeLifecycle::Leaving, true)?;

        self.leave(cancel, agent, true).await?;
        let (coordinator, coordinator_id) = self.find_coordinator(cancel, &[node_id]).await?;
        self.remove_roster_entry(cancel, &coordinator, node_id, agent.addr(), true)
            .await?;
        self.rebalance_with(cancel, &coordinator, &coordinator_id).await
    }

    async fn leave(&self, cancel: &CancellationToken, agent: &Agent, force: bool) -> Result<(), SwarmError> {
        agent.cluster_leave(cancel, force).await.map_err(at(agent))?;
        counter!("skiff_leaves_total", "force" => force.to_string()).increment(1);
        self.emit(CoordinatorEvent::NodeLeft {
            host: agent.addr().to_string(),
            force,
        });
        Ok(())
    }

    /// Leave, wait until the roster reports the node down, then drop its
    /// roster entry.
    async fn depart(
        &self,
        cancel: &CancellationToken,
        coordinator: &Agent,
        agent: &Agent,
        node_id: &str,
        force: bool,
    ) -> Result<(), SwarmError> {
        self.leave(cancel, agent, force).await?;

        self.converge(cancel, coordinator, node_id, move || async move {
            let nodes = coordinator.list_nodes(cancel).await.map_err(at(coordinator))?;
            Ok(nodes
                .iter()
                .find(|n| n.id == node_id)
                .is_none_or(|n| n.status.state == NodeState::Down))
        })
        .await?;

        self.remove_roster_entry(cancel, coordinator, node_id, agent.addr(), false)
            .await
    }

    async fn remove_roster_entry(
        &self,
        cancel: &CancellationToken,
        manager: &Agent,
        node_id: &str,
        addr: &str,
        force: bool,
    ) -> Result<(), SwarmError> {
        match manager.remove_node(cancel, node_id, force).await {
            Ok(()) => {}
            Err(AgentError::ControlPlane { status: 404, .. }) => {
                debug!(node_id = %node_id, "roster entry already gone");
            }
            Err(e) => return Err(SwarmError::agent(manager.addr(), e)),
        }
        counter!("skiff_nodes_removed_total").increment(1);
        self.emit(CoordinatorEvent::NodeRemoved {
            node_id: node_id.to_string(),
            addr: addr.to_string(),
        });
        Ok(())
    }

    /// Force every member agent out of the cluster in parallel. Failures
    /// are reported to the observer and do not stop the others.
    pub async fn leave_all(&self, cancel: &CancellationToken) -> Result<(), SwarmError> {
        run_all(cancel, self.agents.len(), |i| {
            let agent = self.agents[i].clone();
            let observer = self.observer.clone();
            let cancel = cancel.clone();
            async move {
                let failed = |error: String| CoordinatorEvent::LeaveFailed {
                    host: agent.addr().to_string(),
                    error,
                };
                let info = match agent.info(&cancel).await {
                    Ok(info) => info,
                    Err(AgentError::Cancelled) => return,
                    Err(e) => return observer.on_event(&failed(e.to_string())),
                };
                if !info.is_active() {
                    return;
                }
                match agent.cluster_leave(&cancel, true).await {
                    Ok(()) => {
                        counter!("skiff_leaves_total", "force" => "true").increment(1);
                        observer.on_event(&CoordinatorEvent::NodeLeft {
                            host: agent.addr().to_string(),
                            force: true,
                        });
                    }
                    Err(AgentError::Cancelled) => {}
                    Err(e) => observer.on_event(&failed(e.to_string())),
                }
            }
        })
        .await;

        if cancel.is_cancelled() {
            return Err(SwarmError::Cancelled);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Reconciliation
    // ---------------------------------------------------------------------

    /// Remove roster nodes that match no desired agent. A leading manager is
    /// skipped; every other failure is recorded and the next node tried.
    pub async fn remove_extra(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RemovalReport, SwarmError> {
        let snapshot = self.snapshot(cancel).await?;
        let extra = snapshot.extra();
        let mut report = RemovalReport::default();
        if extra.is_empty() {
            return Ok(report);
        }

        let (manager, _) = self.find_coordinator(cancel, &[]).await?;
        for node in extra {
            if node.role == NodeRole::Manager && node.is_leader {
                self.emit(CoordinatorEvent::RemovalSkipped {
                    node_id: node.node_id.clone(),
                    addr: node.addr.clone(),
                    reason: "node is the cluster leader".to_string(),
                });
                report.skipped_leaders.push(node);
                continue;
            }

            match self.remove_extra_node(cancel, &manager, &node).await {
                Ok(()) => report.removed.push(node),
                Err(SwarmError::Cancelled) => return Err(SwarmError::Cancelled),
                Err(e) => {
                    self.emit(CoordinatorEvent::RemovalFailed {
                        node_id: node.node_id.clone(),
                        addr: node.addr.clone(),
                        error: e.to_string(),
                    });
                    report.failed.push(RemovalFailure {
                        node,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    async fn remove_extra_node(
        &self,
        cancel: &CancellationToken,
        manager: &Agent,
        extra: &ExtraNode,
    ) -> Result<(), SwarmError> {
        if extra.role == NodeRole::Manager {
            let node = manager
                .inspect_node(cancel, &extra.node_id)
                .await
                .map_err(at(manager))?;
            self.change_role(cancel, manager, &node, NodeRole::Worker).await?;
        }

        self.remove_roster_entry(cancel, manager, &extra.node_id, &extra.addr, true)
            .await?;

        let node_id = extra.node_id.as_str();
        self.converge(cancel, manager, node_id, move || async move {
            let nodes = manager.list_nodes(cancel).await.map_err(at(manager))?;
            Ok(!nodes.iter().any(|n| n.id == node_id))
        })
        .await
    }

    /// Bring the cluster in line with the desired agents: bootstrap when no
    /// cluster exists, otherwise join the missing agents, remove extra roster
    /// entries and rebalance.
    pub async fn reconcile(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport, SwarmError> {
        let snapshot = self.snapshot(cancel).await?;
        let mut report = ReconcileReport::default();

        if !snapshot.exists() {
            let outcome = self.bootstrap(cancel).await?;
            report.initialized = true;
            report.joined = outcome.joined;
            report.join_failed = outcome.failed;
            return Ok(report);
        }

        let missing: Vec<Arc<Agent>> = snapshot
            .missing()
            .iter()
            .filter_map(|m| self.get_agent_by_address(&m.addr))
            .collect();
        // Joining rebalances on its own; only a removal undoes that.
        let joined = !missing.is_empty();
        if joined {
            let (manager, manager_id) = self.find_coordinator(cancel, &[]).await?;
            let outcome = self
                .join_with_manager(cancel, &manager, &manager_id, &missing)
                .await?;
            report.joined = outcome.joined;
            report.join_failed = outcome.failed;
        }

        report.removal = self.remove_extra(cancel).await?;
        if !joined || !report.removal.removed.is_empty() {
            self.rebalance(cancel).await?;
        }
        Ok(report)
    }

    /// Close every agent's connections in parallel.
    pub async fn close(&self) {
        let cancel = CancellationToken::new();
        run_all(&cancel, self.agents.len(), |i| {
            let agent = self.agents[i].clone();
            let observer = self.observer.clone();
            async move {
                if let Err(e) = agent.close().await {
                    observer.on_event(&CoordinatorEvent::AgentCloseFailed {
                        host: agent.addr().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        })
        .await;
    }
}
