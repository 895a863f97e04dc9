// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `skiff-core`: Remote Host Plumbing
//!
//! Everything the cluster coordinator needs to talk to one remote host without
//! any agent pre-installed and without any port opened besides SSH.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | Control-plane model, `ControlPlane` / `ProcessExecutor` / `ControlPlaneDialer` traits, error taxonomy |
//! | [`infrastructure`] | Infrastructure | `SshSession`, `Tunnel`, `EngineClient` (Docker Engine API over the tunnel) |
//! | [`application`] | Application | `Agent` handle, parallel fan-out primitives |
//!
//! ## Data Flow
//!
//! ```text
//! SshSession ──dial──▶ Tunnel (ssh host docker system dial-stdio)
//!                         │
//!                         ▼
//!                  EngineClient (HTTP/1.1 over the tunnel)
//!                         │
//!                         ▼
//!                  Agent (serialized, cancellable operations)
//! ```

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::agent::{matches_ip, Agent};
pub use application::parallel::{collect_first_error, run_all};
pub use domain::*;
