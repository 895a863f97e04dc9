// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Application Layer
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`coordinator`] | `Coordinator`: snapshot, init, join, leave, remove, reconcile |
//! | [`convergence`] | `wait_until` and its `Trigger` |
//! | [`config`] | `CoordinatorConfig` |

pub mod config;
pub mod convergence;
pub mod coordinator;

pub use config::{ConvergenceStrategy, CoordinatorConfig, MANAGED_LABEL};
pub use convergence::{wait_until, Trigger};
pub use coordinator::{Coordinator, ReconcileReport, RemovalFailure, RemovalReport};
