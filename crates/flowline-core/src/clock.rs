// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Injected time source and the timestamp format stored in SQLite.
//!
//! Timestamps are fixed-width UTC strings so SQL comparisons on them order
//! the same way the instants do.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::FlowlineError;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Source of "now" for the engine and every scheduled job.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Format an instant the way it is stored.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp. RFC 3339 input is accepted too.
pub fn parse_ts(s: &str) -> Result<DateTime<Utc>, FlowlineError> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT) {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| FlowlineError::Internal(format!("invalid timestamp `{s}`: {e}")))
}
