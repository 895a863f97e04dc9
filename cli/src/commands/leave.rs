// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `skiff leave` and `skiff teardown`.

use super::connect;
use crate::manifest::ClusterManifest;
use anyhow::{bail, Context, Result};
use colored::Colorize;
use tokio_util::sync::CancellationToken;

/// Take `host` out of the cluster, or every machine when no host is given.
pub async fn execute(
    manifest: &ClusterManifest,
    cancel: &CancellationToken,
    host: Option<String>,
    force: bool,
) -> Result<()> {
    let Some(host) = host else {
        return teardown(manifest, cancel).await;
    };
    if manifest.machine(&host).is_none() {
        bail!("{} is not listed in the manifest", host);
    }

    let (coordinator, _) = connect(manifest).await?;
    let result = match coordinator.get_agent_by_address(&host) {
        Some(agent) => coordinator.leave_node(cancel, &agent, force).await,
        None => {
            coordinator.close().await;
            bail!("{} could not be reached", host);
        }
    };
    coordinator.close().await;

    result.with_context(|| format!("Failed to take {} out of the cluster", host))?;
    println!("{} {} left the cluster", "✓".green(), host);
    Ok(())
}

/// Force every reachable machine out of the cluster.
pub async fn teardown(manifest: &ClusterManifest, cancel: &CancellationToken) -> Result<()> {
    let (coordinator, _) = connect(manifest).await?;
    let result = coordinator.leave_all(cancel).await;
    coordinator.close().await;

    result.context("Failed to tear down the cluster")?;
    println!("{}", "✓ Cluster torn down".green());
    Ok(())
}
