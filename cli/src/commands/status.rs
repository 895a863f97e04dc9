// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `skiff status`: membership of every machine and the roster's strays.

use super::{connect, paint_state};
use crate::manifest::ClusterManifest;
use anyhow::{Context, Result};
use colored::Colorize;
use skiff_swarm::{desired_managers, MembershipSnapshot};
use tokio_util::sync::CancellationToken;

pub async fn execute(manifest: &ClusterManifest, cancel: &CancellationToken) -> Result<()> {
    let (coordinator, unreachable) = connect(manifest).await?;
    let snapshot = coordinator.snapshot(cancel).await;
    coordinator.close().await;

    let snapshot = snapshot.context("Failed to read cluster membership")?;
    print_snapshot(&snapshot, &unreachable);
    Ok(())
}

fn print_snapshot(snapshot: &MembershipSnapshot, unreachable: &[String]) {
    match snapshot.cluster_id() {
        Some(id) => println!("{} {}", "Cluster:".bold(), id),
        None => {
            println!("{}", "No cluster exists on these machines.".yellow());
        }
    }
    println!();

    println!("{:<24} {:<12} {}", "MACHINE".bold(), "STATE".bold(), "NODE".bold());
    let leader = snapshot.leader_id();
    for member in &snapshot.members {
        let node = member.node_id.as_deref().unwrap_or("-");
        let marker = if leader.is_some() && member.node_id.as_deref() == leader {
            " (leader)".cyan().to_string()
        } else {
            String::new()
        };
        println!(
            "{:<24} {:<12} {}{}",
            member.addr,
            paint_state(member.state),
            node,
            marker
        );
    }
    for host in unreachable {
        println!("{:<24} {:<12} -", host, "unreachable".red());
    }

    let extra = snapshot.extra();
    if !extra.is_empty() {
        println!();
        println!("{}", "Roster entries without a machine:".bold());
        for node in extra {
            println!("  {} {} ({})", node.node_id, node.addr, node.role);
        }
    }

    let missing = snapshot.missing();
    if snapshot.exists() && !missing.is_empty() {
        println!();
        println!("{}", "Machines not yet in the cluster:".bold());
        for member in missing {
            println!("  {}", member.addr);
        }
    }

    if snapshot.exists() {
        let active = snapshot.active_nodes();
        let managers = active.iter().filter(|n| n.is_manager()).count();
        println!();
        println!(
            "{} of {} ready node(s) are managers; policy wants {}",
            managers,
            active.len(),
            desired_managers(active.len())
        );
    }
}
