// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Quorum Policy
//!
//! Maps the number of active nodes to the number of managers the cluster
//! should run.
//!
//! | Active nodes | Managers |
//! |--------------|----------|
//! | 0 | 0 |
//! | 1–2 | 1 |
//! | 3 | 3 |
//! | > 3 | `min(7, total / 2 + 1)` |

/// Upper bound on the manager group size.
pub const MAX_MANAGERS: usize = 7;

pub fn desired_managers(total: usize) -> usize {
    match total {
        0 => 0,
        1 | 2 => 1,
        3 => 3,
        n => (n / 2 + 1).min(MAX_MANAGERS),
    }
}
