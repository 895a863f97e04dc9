// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Core Domain Layer
//!
//! Pure types and capability traits. No I/O lives here.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`node`] | `SwarmInfo`, `Node`, `NodeRole`, `NodeState`, `InitRequest`, `JoinRequest`, `NodeEvent` |
//! | [`control_plane`] | `ControlPlane` trait |
//! | [`executor`] | `ProcessExecutor`, `ControlPlaneDialer`, `Connection` |
//! | [`error`] | `AgentError`, `TransportError`, `Cancelled` |

pub mod control_plane;
pub mod error;
pub mod executor;
pub mod node;

pub use control_plane::*;
pub use error::*;
pub use executor::*;
pub use node::*;
