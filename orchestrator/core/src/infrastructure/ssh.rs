// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # SSH Session
//!
//! One authenticated OpenSSH connection per host, kept alive as a control
//! master. Every later command (probes, tunnels) is multiplexed over that
//! master through its control socket, so authentication happens exactly once
//! and no extra TCP connection is opened.
//!
//! Key material and agent integration are the caller's business: the session
//! only forwards an optional identity file to `ssh`.

use crate::domain::error::TransportError;
use crate::domain::executor::{BoxConnection, CommandOutput, ControlPlaneDialer, ProcessExecutor};
use crate::infrastructure::tunnel::Tunnel;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Command relaying the Docker daemon's API socket over stdin/stdout.
pub const DEFAULT_TUNNEL_COMMAND: &str = "docker system dial-stdio";

/// Exit status `ssh` itself uses for connection and authentication errors.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Where and how to reach one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshTarget {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Value for `StrictHostKeyChecking` ("yes", "accept-new", "no").
    #[serde(default = "default_host_key_checking")]
    pub host_key_checking: String,
}

fn default_port() -> u16 {
    22
}

fn default_user() -> String {
    "root".to_string()
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_host_key_checking() -> String {
    "accept-new".to_string()
}

impl SshTarget {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            user: default_user(),
            identity_file: None,
            connect_timeout_secs: default_connect_timeout(),
            host_key_checking: default_host_key_checking(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// Options shared by the master and every multiplexed client.
    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "-o".to_string(),
            format!("StrictHostKeyChecking={}", self.host_key_checking),
            "-p".to_string(),
            self.port.to_string(),
            "-l".to_string(),
            self.user.clone(),
        ];
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
            args.push("-o".to_string());
            args.push("IdentitiesOnly=yes".to_string());
        }
        args
    }
}

/// Server address from an `SSH_CONNECTION` value
/// (`client_ip client_port server_ip server_port`).
fn server_ip(ssh_connection: &str) -> Option<IpAddr> {
    ssh_connection.split_whitespace().nth(2)?.parse().ok()
}

async fn resolve(target: &SshTarget) -> Option<IpAddr> {
    if let Ok(ip) = target.host.parse() {
        return Some(ip);
    }
    match tokio::net::lookup_host((target.host.as_str(), target.port)).await {
        Ok(mut addrs) => addrs.next().map(|a| a.ip()),
        Err(e) => {
            debug!(host = %target.host, "could not resolve host: {}", e);
            None
        }
    }
}

/// An open SSH connection to one host.
pub struct SshSession {
    target: SshTarget,
    control_path: PathBuf,
    tunnel_command: String,
    remote_ip: Option<IpAddr>,
    closed: AtomicBool,
}

impl SshSession {
    /// Authenticate once and leave a persistent control master behind.
    pub async fn connect(target: SshTarget) -> Result<Self, TransportError> {
        let control_path =
            std::env::temp_dir().join(format!("skiff-{}.sock", Uuid::new_v4().simple()));

        let output = Command::new("ssh")
            .args(target.base_args())
            .arg("-o")
            .arg("ControlMaster=auto")
            .arg("-o")
            .arg("ControlPersist=yes")
            .arg("-o")
            .arg(format!("ControlPath={}", control_path.display()))
            .arg(&target.host)
            .arg("echo $SSH_CONNECTION")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| TransportError::dial(&target.host, format!("failed to run ssh: {}", e)))?;

        if !output.status.success() {
            return Err(TransportError::dial(
                &target.host,
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }

        let remote_ip = match server_ip(&String::from_utf8_lossy(&output.stdout)) {
            Some(ip) => Some(ip),
            None => resolve(&target).await,
        };

        info!(
            host = %target.host,
            port = target.port,
            user = %target.user,
            remote_ip = ?remote_ip,
            "SSH session established"
        );

        Ok(Self {
            target,
            control_path,
            tunnel_command: DEFAULT_TUNNEL_COMMAND.to_string(),
            remote_ip,
            closed: AtomicBool::new(false),
        })
    }

    /// Replace the remote command used to open control-plane tunnels.
    pub fn with_tunnel_command(mut self, command: impl Into<String>) -> Self {
        self.tunnel_command = command.into();
        self
    }

    pub fn target(&self) -> &SshTarget {
        &self.target
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// An `ssh` invocation riding on the control master; the remote command
    /// is appended by the caller.
    fn command(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(self.target.base_args())
            .arg("-o")
            .arg("ControlMaster=no")
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg(&self.target.host)
            .arg("--");
        cmd
    }

    fn exit_args(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
            "-O".to_string(),
            "exit".to_string(),
            self.target.host.clone(),
        ]
    }
}

#[async_trait]
impl ProcessExecutor for SshSession {
    fn addr(&self) -> &str {
        &self.target.host
    }

    fn remote_ip(&self) -> Option<IpAddr> {
        self.remote_ip
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed {
                addr: self.target.host.clone(),
            });
        }

        debug!(host = %self.target.host, cmd = %command, "running remote command");

        let output = self
            .command()
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| TransportError::io(&self.target.host, e))?;

        let status = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if status == SSH_CONNECTION_FAILURE {
            return Err(TransportError::dial(&self.target.host, stderr.trim()));
        }

        Ok(CommandOutput {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
        })
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let output = Command::new("ssh")
            .args(self.exit_args())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| TransportError::io(&self.target.host, e))?;

        if !output.status.success() {
            // The master may already be gone (host rebooted, socket removed).
            warn!(
                host = %self.target.host,
                "failed to stop SSH control master: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let _ = std::fs::remove_file(&self.control_path);

        info!(host = %self.target.host, "SSH session closed");
        Ok(())
    }
}

#[async_trait]
impl ControlPlaneDialer for SshSession {
    async fn dial(&self) -> Result<BoxConnection, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed {
                addr: self.target.host.clone(),
            });
        }

        let mut cmd = self.command();
        cmd.arg(&self.tunnel_command);
        let tunnel = Tunnel::spawn(self.target.host.clone(), cmd)?;
        Ok(Box::new(tunnel))
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        // Best effort: do not leave a persistent master behind.
        let _ = std::process::Command::new("ssh")
            .args(self.exit_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
    }
}
