// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Manually driven clock.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flowline_core::{parse_ts, Clock};

/// A [`Clock`] that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Start at a stored-format or RFC 3339 timestamp.
    ///
    /// # Panics
    ///
    /// Panics if `ts` does not parse.
    pub fn at(ts: &str) -> Self {
        match parse_ts(ts) {
            Ok(now) => Self::new(now),
            Err(e) => panic!("invalid ManualClock start `{ts}`: {e}"),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}
