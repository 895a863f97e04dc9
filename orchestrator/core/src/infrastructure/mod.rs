// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure Layer
//!
//! Concrete adapters behind the domain traits.
//!
//! - [`ssh`]: `SshSession`, `ProcessExecutor` + `ControlPlaneDialer` over OpenSSH
//! - [`tunnel`]: `Tunnel`, child-process stdio as a duplex stream
//! - [`engine`]: `EngineClient`, `ControlPlane` over HTTP/1.1

pub mod engine;
pub mod ssh;
pub mod tunnel;

pub use engine::EngineClient;
pub use ssh::{SshSession, SshTarget, DEFAULT_TUNNEL_COMMAND};
pub use tunnel::{Tunnel, TunnelNotEstablished};
