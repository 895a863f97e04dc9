// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `skiff apply`: bring the cluster in line with the manifest.

use super::connect;
use crate::manifest::ClusterManifest;
use anyhow::{bail, Context, Result};
use colored::Colorize;
use skiff_swarm::ReconcileReport;
use tokio_util::sync::CancellationToken;

pub async fn execute(manifest: &ClusterManifest, cancel: &CancellationToken) -> Result<()> {
    let (coordinator, unreachable) = connect(manifest).await?;
    if !unreachable.is_empty() {
        coordinator.close().await;
        // An undialed machine would look like a stray roster entry and be removed.
        bail!(
            "refusing to apply while machines are unreachable: {}",
            unreachable.join(", ")
        );
    }

    let report = coordinator.reconcile(cancel).await;
    coordinator.close().await;

    let report = report.context("Failed to apply cluster manifest")?;
    print_report(&report);
    if !report.join_failed.is_empty() {
        bail!("{} machine(s) failed to join", report.join_failed.len());
    }
    Ok(())
}

fn print_report(report: &ReconcileReport) {
    if report.initialized {
        println!("{}", "✓ Cluster initialized".green());
    }
    for host in &report.joined {
        println!("{} {} joined", "✓".green(), host);
    }
    for host in &report.join_failed {
        println!("{} {} failed to join", "✗".red(), host);
    }
    for node in &report.removal.removed {
        println!("{} removed stray node {} ({})", "✓".green(), node.node_id, node.addr);
    }
    for node in &report.removal.skipped_leaders {
        println!(
            "{} kept stray node {} ({}): it leads the cluster",
            "!".yellow(),
            node.node_id,
            node.addr
        );
    }
    for failure in &report.removal.failed {
        println!(
            "{} could not remove {} ({}): {}",
            "✗".red(),
            failure.node.node_id,
            failure.node.addr,
            failure.error
        );
    }
    println!("{}", "Cluster is up to date".bold());
}
