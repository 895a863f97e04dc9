// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Transport Tunnel
//!
//! Wraps a spawned command's stdin/stdout as one duplex byte stream. With the
//! command being `ssh host docker system dial-stdio`, a plain HTTP client can
//! talk to the remote daemon as if it held a raw socket to it.
//!
//! The tunnel imposes no framing and no deadlines. A command that dies before
//! the first byte comes back is reported as a [`TunnelNotEstablished`] I/O
//! error, so callers can tell a failed dial from a connection that broke later.

use crate::domain::error::TransportError;
use parking_lot::Mutex;
use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, ReadBuf};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

const STDERR_CAPTURE_LIMIT: usize = 4096;

/// Carried inside an [`io::Error`] when the tunnel command exits (or breaks
/// the pipe) before producing any output.
#[derive(Debug, Clone, thiserror::Error)]
#[error("tunnel command exited before the connection was established{}", stderr_suffix(.stderr))]
pub struct TunnelNotEstablished {
    pub stderr: String,
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

impl TunnelNotEstablished {
    /// Find a tunnel dial failure anywhere in an error's source chain.
    pub fn find<'a>(
        err: &'a (dyn std::error::Error + 'static),
    ) -> Option<&'a TunnelNotEstablished> {
        let mut current: Option<&'a (dyn std::error::Error + 'static)> = Some(err);
        while let Some(e) = current {
            if let Some(found) = e.downcast_ref::<TunnelNotEstablished>() {
                return Some(found);
            }
            if let Some(io_err) = e.downcast_ref::<io::Error>() {
                if let Some(found) = io_err
                    .get_ref()
                    .and_then(|inner| inner.downcast_ref::<TunnelNotEstablished>())
                {
                    return Some(found);
                }
            }
            current = e.source();
        }
        None
    }
}

pub struct Tunnel {
    addr: String,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Arc<Mutex<String>>,
    received: bool,
}

impl Tunnel {
    /// Spawn `command` with piped stdio. Failing to start the process is a
    /// dial error.
    pub fn spawn(addr: impl Into<String>, mut command: Command) -> Result<Self, TransportError> {
        let addr = addr.into();

        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| TransportError::dial(&addr, format!("failed to start tunnel command: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::dial(&addr, "tunnel command has no stdin pipe"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::dial(&addr, "tunnel command has no stdout pipe"))?;

        let captured = Arc::new(Mutex::new(String::new()));
        if let Some(stderr) = child.stderr.take() {
            let sink = captured.clone();
            let host = addr.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(host = %host, "tunnel stderr: {}", line);
                    let mut buf = sink.lock();
                    if buf.len() < STDERR_CAPTURE_LIMIT {
                        buf.push_str(&line);
                        buf.push('\n');
                    }
                }
            });
        }

        debug!(host = %addr, "tunnel command started");

        Ok(Self {
            addr,
            child: Some(child),
            stdin: Some(stdin),
            stdout: Some(stdout),
            stderr: captured,
            received: false,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whatever the command wrote to stderr so far (bounded).
    pub fn stderr(&self) -> String {
        self.stderr.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.child.is_none()
    }

    /// Terminate the command and reap it. A second call is a no-op.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.stdin.take();
        self.stdout.take();

        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        // The command may already have exited on its own.
        if let Err(e) = child.start_kill() {
            if e.kind() != io::ErrorKind::InvalidInput {
                return Err(TransportError::io(&self.addr, e));
            }
        }
        child
            .wait()
            .await
            .map_err(|e| TransportError::io(&self.addr, e))?;

        debug!(host = %self.addr, "tunnel closed");
        Ok(())
    }

    fn not_established(&self) -> io::Error {
        io::Error::new(
            io::ErrorKind::NotConnected,
            TunnelNotEstablished {
                stderr: self.stderr(),
            },
        )
    }

    fn closed() -> io::Error {
        io::Error::new(io::ErrorKind::BrokenPipe, "tunnel is closed")
    }
}

impl AsyncRead for Tunnel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        let Some(stdout) = this.stdout.as_mut() else {
            return Poll::Ready(Err(Tunnel::closed()));
        };

        let before = buf.filled().len();
        match Pin::new(stdout).poll_read(cx, buf) {
            Poll::Ready(Ok(())) if buf.filled().len() > before => {
                this.received = true;
                Poll::Ready(Ok(()))
            }
            // EOF before the first byte: the command never got going.
            Poll::Ready(Ok(())) if !this.received => Poll::Ready(Err(this.not_established())),
            Poll::Ready(Err(_)) if !this.received => Poll::Ready(Err(this.not_established())),
            other => other,
        }
    }
}

impl AsyncWrite for Tunnel {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let Some(stdin) = this.stdin.as_mut() else {
            return Poll::Ready(Err(Tunnel::closed()));
        };
        match Pin::new(stdin).poll_write(cx, data) {
            Poll::Ready(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe && !this.received => {
                Poll::Ready(Err(this.not_established()))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.stdin.as_mut() {
            Some(stdin) => Pin::new(stdin).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.stdin.as_mut() {
            Some(stdin) => Pin::new(stdin).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn shell(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn test_tunnel_relays_bytes_both_ways() {
        let mut tunnel = Tunnel::spawn("local", Command::new("cat")).unwrap();

        tunnel.write_all(b"ping\n").await.unwrap();
        tunnel.flush().await.unwrap();

        let mut buf = [0u8; 5];
        tunnel.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping\n");

        tunnel.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_local_binary_is_a_dial_error() {
        let result = Tunnel::spawn("local", Command::new("/nonexistent/skiff-tunnel-binary"));
        assert!(matches!(result, Err(TransportError::Dial { .. })));
    }

    #[tokio::test]
    async fn test_command_exiting_early_is_reported_as_not_established() {
        let mut tunnel = Tunnel::spawn(
            "local",
            shell("echo 'docker: command not found' >&2; exit 127"),
        )
        .unwrap();

        let mut buf = [0u8; 16];
        let err = tunnel.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert!(TunnelNotEstablished::find(&err).is_some());
    }

    #[derive(Debug, thiserror::Error)]
    #[error("request failed")]
    struct RequestFailed(#[source] io::Error);

    #[test]
    fn test_dial_failure_is_found_through_wrapping_errors() {
        let inner = io::Error::new(
            io::ErrorKind::NotConnected,
            TunnelNotEstablished {
                stderr: "permission denied".to_string(),
            },
        );
        let wrapped = RequestFailed(inner);

        let found = TunnelNotEstablished::find(&wrapped).map(|f| f.stderr.clone());
        assert_eq!(found.as_deref(), Some("permission denied"));

        let unrelated = RequestFailed(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(TunnelNotEstablished::find(&unrelated).is_none());
    }

    #[tokio::test]
    async fn test_eof_after_data_is_plain_eof() {
        let mut tunnel = Tunnel::spawn("local", shell("printf hello")).unwrap();

        let mut out = Vec::new();
        tunnel.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn test_double_close_is_a_noop() {
        let mut tunnel = Tunnel::spawn("local", Command::new("cat")).unwrap();
        tunnel.close().await.unwrap();
        assert!(tunnel.is_closed());
        tunnel.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_io_after_close_fails() {
        let mut tunnel = Tunnel::spawn("local", Command::new("cat")).unwrap();
        tunnel.close().await.unwrap();

        let err = tunnel.write_all(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
