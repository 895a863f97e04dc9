// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the skiff CLI

pub mod apply;
pub mod check;
pub mod leave;
pub mod status;

use crate::manifest::ClusterManifest;
use anyhow::{bail, Result};
use colored::Colorize;
use futures::future::join_all;
use skiff_core::infrastructure::{SshSession, SshTarget};
use skiff_core::Agent;
use skiff_swarm::{Coordinator, MemberState};
use tracing::warn;

/// Agents for every reachable machine, in manifest order, plus the hosts
/// that could not be dialed.
pub struct Dialed {
    pub agents: Vec<Agent>,
    pub unreachable: Vec<String>,
}

/// Open SSH sessions to all `machines` in parallel.
pub async fn dial(machines: &[SshTarget], tunnel_command: &str) -> Dialed {
    let sessions = join_all(machines.iter().cloned().map(|target| async move {
        let host = target.host.clone();
        (host, SshSession::connect(target).await)
    }))
    .await;

    let mut dialed = Dialed {
        agents: Vec::with_capacity(sessions.len()),
        unreachable: Vec::new(),
    };
    for (host, session) in sessions {
        match session {
            Ok(session) => dialed
                .agents
                .push(Agent::over_ssh(session.with_tunnel_command(tunnel_command))),
            Err(e) => {
                warn!(host = %host, "machine unreachable: {}", e);
                dialed.unreachable.push(host);
            }
        }
    }
    dialed
}

/// Coordinator over every machine of the manifest that answered.
pub async fn connect(manifest: &ClusterManifest) -> Result<(Coordinator, Vec<String>)> {
    let dialed = dial(&manifest.machines, &manifest.coordinator.tunnel_command).await;
    for host in &dialed.unreachable {
        eprintln!("{} {} is unreachable, skipping", "!".yellow(), host);
    }
    if dialed.agents.is_empty() {
        bail!("none of the {} machine(s) could be reached", manifest.machines.len());
    }
    Ok((
        Coordinator::new(dialed.agents, manifest.coordinator.clone()),
        dialed.unreachable,
    ))
}

pub(crate) fn paint_state(state: MemberState) -> colored::ColoredString {
    match state {
        MemberState::Manager => "manager".green().bold(),
        MemberState::Worker => "worker".green(),
        MemberState::NotMember => "not-member".dimmed(),
    }
}
