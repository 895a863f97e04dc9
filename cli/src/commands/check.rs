// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `skiff check`: is the control plane installed on every machine?

use super::dial;
use crate::manifest::ClusterManifest;
use anyhow::{bail, Result};
use colored::Colorize;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

pub async fn execute(manifest: &ClusterManifest, cancel: &CancellationToken) -> Result<()> {
    let dialed = dial(&manifest.machines, &manifest.coordinator.tunnel_command).await;

    let probes = join_all(dialed.agents.iter().map(|agent| async move {
        (agent.addr().to_string(), agent.is_control_plane_installed(cancel).await)
    }))
    .await;

    let mut problems = dialed.unreachable.len();
    for host in &dialed.unreachable {
        println!("{} {}: unreachable", "✗".red(), host);
    }
    for (host, probe) in probes {
        match probe {
            Ok(true) => println!("{} {}: control plane installed", "✓".green(), host),
            Ok(false) => {
                problems += 1;
                println!("{} {}: control plane not installed", "✗".red(), host);
            }
            Err(e) => {
                problems += 1;
                println!("{} {}: {}", "✗".red(), host, e);
            }
        }
    }

    for agent in &dialed.agents {
        if let Err(e) = agent.close().await {
            tracing::warn!(host = %agent.addr(), "failed to close session: {}", e);
        }
    }

    if problems > 0 {
        bail!("{} machine(s) are not ready", problems);
    }
    Ok(())
}
