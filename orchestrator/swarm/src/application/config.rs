// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Coordinator configuration.
//!
//! Deserialized from the `coordinator` section of the cluster manifest.
//! Durations use humantime notation (`2m`, `500ms`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Label put on every cluster this tool bootstraps.
pub const MANAGED_LABEL: &str = "skiff.managed";

/// How post-condition waits learn about state changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConvergenceStrategy {
    /// Re-check on a fixed interval.
    #[default]
    Poll,
    /// Re-check whenever the node's event stream reports a change, falling
    /// back to polling when no stream is available.
    Events,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Upper bound for every convergence wait.
    #[serde(default = "default_convergence_timeout", with = "humantime_serde")]
    pub convergence_timeout: Duration,

    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    #[serde(default)]
    pub strategy: ConvergenceStrategy,

    /// Port the cluster's control-plane traffic listens on.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    #[serde(default = "default_labels")]
    pub labels: HashMap<String, String>,

    /// Remote command bridging the tunnel to the daemon socket.
    #[serde(default = "default_tunnel_command")]
    pub tunnel_command: String,
}

fn default_convergence_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_listen_port() -> u16 {
    2377
}

fn default_labels() -> HashMap<String, String> {
    HashMap::from([(MANAGED_LABEL.to_string(), "true".to_string())])
}

fn default_tunnel_command() -> String {
    skiff_core::infrastructure::DEFAULT_TUNNEL_COMMAND.to_string()
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            convergence_timeout: default_convergence_timeout(),
            poll_interval: default_poll_interval(),
            strategy: ConvergenceStrategy::default(),
            listen_port: default_listen_port(),
            labels: default_labels(),
            tunnel_command: default_tunnel_command(),
        }
    }
}

impl CoordinatorConfig {
    /// Address new members listen on for cluster traffic.
    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.listen_port)
    }

    /// Address other members use to reach a manager advertising `host`.
    pub fn remote_addr(&self, host: &str) -> String {
        if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, self.listen_port)
        } else {
            format!("{}:{}", host, self.listen_port)
        }
    }
}
