// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `skiff-swarm`: Cluster Membership and Quorum Coordination
//!
//! Turns a list of [`skiff_core::Agent`]s into one cluster and keeps its
//! manager set at the size the quorum policy asks for.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | quorum policy, membership snapshot, node lifecycle, events, `SwarmError` |
//! | [`application`] | Application | `Coordinator`, convergence wait, `CoordinatorConfig` |
//! | [`infrastructure`] | Infrastructure | `EventBus` observer |
//!
//! ## Key Concepts
//!
//! - **Desired set**: the agents the coordinator is built with, in order.
//!   The first one bootstraps a new cluster.
//! - **Snapshot**: every agent's own view plus one manager's roster, taken
//!   fresh for every decision.
//! - **Convergence**: role changes and departures are applied asynchronously
//!   by the control plane; every mutation waits for the roster to agree.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::*;
pub use domain::*;
pub use infrastructure::EventBus;
