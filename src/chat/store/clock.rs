//! Server-side timestamp source.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};

/// Strictly increasing clock with microsecond resolution.
///
/// Two writes never receive the same timestamp, even when the wall clock
/// stalls or steps backwards.
#[derive(Debug, Default)]
pub struct ServerClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl ServerClock {
    /// Create a clock with no history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock whose next timestamp is after `last`.
    #[must_use]
    pub const fn starting_after(last: Option<DateTime<Utc>>) -> Self {
        Self {
            last: Mutex::new(last),
        }
    }

    /// Next timestamp.
    pub fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let mut now = Utc::now().trunc_subsecs(6);
        if let Some(previous) = *last {
            if now <= previous {
                now = previous + TimeDelta::microseconds(1);
            }
        }
        *last = Some(now);
        now
    }
}
