//! Occupancy intervals and the caller-side pre-pass that builds them.
//!
//! A [`TimeInterval`] is a span during which a user was logged into a
//! workstation. The end may be absent while the session is still open.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A raw occupancy record. An absent `end` means "ongoing".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub begin: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeInterval {
    pub fn new(begin: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Self {
        Self { begin, end }
    }

    pub fn closed(begin: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            begin,
            end: Some(end),
        }
    }

    pub fn ongoing(begin: DateTime<Utc>) -> Self {
        Self { begin, end: None }
    }

    /// Clip this interval to `[window_start, window_end]`.
    ///
    /// An ongoing interval is treated as ending at `window_end`. Returns `None`
    /// when nothing of positive length remains.
    pub fn clip(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.begin.max(window_start);
        let end = self.end.unwrap_or(window_end).min(window_end);
        (end > start).then_some((start, end))
    }

    /// Length of a closed interval. `None` while ongoing.
    pub fn duration(&self) -> Option<Duration> {
        self.end.map(|end| end - self.begin)
    }
}

/// A location record as decoded from the intranet API, timestamps still raw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub id: i64,
    pub begin_at: String,
    #[serde(default)]
    pub end_at: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
}

/// Build clean intervals from raw location records.
///
/// Records are dropped when their `begin_at` does not parse as RFC 3339, when a
/// present `end_at` does not parse, or when the end precedes the begin. Among
/// well-formed records sharing an id, the first one wins. Input order is
/// preserved.
pub fn intervals_from_records(records: &[LocationRecord]) -> Vec<TimeInterval> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(records.len());

    for record in records {
        let Some(interval) = parse_record(record) else {
            tracing::debug!(id = record.id, "dropping malformed location record");
            continue;
        };
        if seen.insert(record.id) {
            out.push(interval);
        }
    }

    out
}

fn parse_record(record: &LocationRecord) -> Option<TimeInterval> {
    let begin = parse_timestamp(&record.begin_at)?;
    let end = match record.end_at.as_deref() {
        None => None,
        Some(raw) => {
            let end = parse_timestamp(raw)?;
            if end < begin {
                return None;
            }
            Some(end)
        }
    };
    Some(TimeInterval { begin, end })
}

/// Parse an RFC 3339 timestamp into UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
