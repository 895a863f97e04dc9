// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Core Application Layer
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`agent`] | `Agent`: serialized, cancellable operations against one host |
//! | [`parallel`] | `collect_first_error` / `run_all` fan-out helpers |

pub mod agent;
pub mod parallel;

pub use agent::{Agent, DEFAULT_PROBE_COMMAND};
pub use parallel::{collect_first_error, run_all};
