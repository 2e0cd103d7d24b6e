//! Shared time budget helpers for deadline-bound sessions.

use std::time::{Duration, Instant};

/// Return the remaining time budget until `deadline`, or `None` once it has passed.
pub fn remaining_budget(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|remaining| !remaining.is_zero())
}

/// Remaining budget capped at `limit`, or `None` once the deadline has passed.
pub fn capped_budget(deadline: Instant, limit: Duration) -> Option<Duration> {
    remaining_budget(deadline).map(|remaining| remaining.min(limit))
}
