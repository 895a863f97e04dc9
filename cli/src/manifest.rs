// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cluster manifest (`skiff.yaml`).
//!
//! ```yaml
//! machines:
//!   - host: 10.0.0.1
//!     user: deploy
//!     identity_file: /home/deploy/.ssh/cluster
//!   - host: 10.0.0.2
//! coordinator:
//!   convergence_timeout: 2m
//!   strategy: events
//! ```
//!
//! Machine order matters: the first machine bootstraps a new cluster.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use skiff_core::infrastructure::SshTarget;
use skiff_swarm::CoordinatorConfig;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const DEFAULT_MANIFEST: &str = "./skiff.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterManifest {
    pub machines: Vec<SshTarget>,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,
}

impl ClusterManifest {
    /// Load from `path`, or from `./skiff.yaml` when no path is given.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_MANIFEST));
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read cluster manifest {:?}", path))?;
        Self::from_yaml(&raw).with_context(|| format!("Invalid cluster manifest {:?}", path))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let manifest: Self = serde_yaml::from_str(raw).context("Failed to parse YAML")?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        if self.machines.is_empty() {
            bail!("manifest lists no machines");
        }

        let mut seen = HashSet::new();
        for machine in &self.machines {
            if machine.host.trim().is_empty() {
                bail!("machine entry with an empty host");
            }
            if !seen.insert(machine.host.as_str()) {
                bail!("machine {} is listed twice", machine.host);
            }
        }

        if self.coordinator.poll_interval.is_zero() {
            bail!("coordinator.poll_interval must be greater than zero");
        }
        if self.coordinator.convergence_timeout < self.coordinator.poll_interval {
            bail!("coordinator.convergence_timeout is shorter than coordinator.poll_interval");
        }
        Ok(())
    }

    pub fn machine(&self, host: &str) -> Option<&SshTarget> {
        self.machines.iter().find(|m| m.host == host)
    }
}
