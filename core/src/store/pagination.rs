/*
 * pagination.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Mailgate, a stateless mail retrieval gateway.
 *
 * Mailgate is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Mailgate is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Mailgate.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Retrieval window arithmetic shared by every protocol session.
//!
//! Message 1 is the oldest. A page walks from `start_range` down to `end_range`, both
//! inclusive, and the next page starts just below `end_range`.

/// Inclusive window of message numbers for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalRange {
    pub start_range: u32,
    pub end_range: u32,
    /// `None` when `end_range` is the first message.
    pub next_start_range: Option<u32>,
}

impl RetrievalRange {
    /// Number of messages in the window.
    pub fn len(&self) -> u32 {
        self.start_range - self.end_range + 1
    }

    /// Message numbers newest first.
    pub fn descending(&self) -> impl Iterator<Item = u32> {
        (self.end_range..=self.start_range).rev()
    }
}

/// Compute the window for `count` messages starting at `start` (the newest message
/// when absent or zero).
///
/// `total` must be at least 1: an empty mailbox is answered by the caller without a
/// window. `count` of 0 is treated as 1. A `start` past the end of the mailbox is
/// clamped to `total`.
pub fn compute_range(total: u32, count: u32, start: Option<u32>) -> RetrievalRange {
    debug_assert!(total > 0, "compute_range called for an empty mailbox");
    let count = count.max(1);
    let start_range = match start {
        Some(s) if s > 0 => s.min(total),
        _ => total,
    };
    let end_range = if start_range > count { start_range - count + 1 } else { 1 };
    let next_start_range = if end_range == 1 { None } else { Some(end_range - 1) };
    RetrievalRange {
        start_range,
        end_range,
        next_start_range,
    }
}
