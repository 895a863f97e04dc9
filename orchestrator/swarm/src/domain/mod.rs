// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Domain Layer
//!
//! Pure coordination types. No I/O dependencies.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`quorum`] | `desired_managers`, `MAX_MANAGERS` |
//! | [`membership`] | `MembershipSnapshot`, `MemberView`, `MemberState`, `ExtraNode` |
//! | [`lifecycle`] | `NodeLifecycle` |
//! | [`events`] | `CoordinatorEvent`, `CoordinatorObserver`, `TracingObserver` |
//! | [`error`] | `SwarmError` |

pub mod error;
pub mod events;
pub mod lifecycle;
pub mod membership;
pub mod quorum;

pub use error::*;
pub use events::*;
pub use lifecycle::*;
pub use membership::*;
pub use quorum::*;
