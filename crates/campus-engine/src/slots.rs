//! Merge 15-minute evaluation-slot records into contiguous display ranges.
//!
//! Records are sorted by `(begin, end)` and scanned once. A record extends the
//! current run when it has the same reservation state, the same reservation
//! key if reserved, and starts where the run ends (within
//! [`ADJACENCY_EPSILON`]). Overlap alone is not adjacency.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, DurationRound, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Tolerance for timestamp jitter when testing time-adjacency.
pub const ADJACENCY_EPSILON: Duration = Duration::milliseconds(500);

/// Length of one atomic reservation unit.
pub const SLOT_LENGTH: Duration = Duration::minutes(15);

/// One atomic reservation unit. `reservation_key` identifies the owning
/// evaluation team; `None` means the slot is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub id: i64,
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub reservation_key: Option<i64>,
}

impl SlotRecord {
    pub fn is_reserved(&self) -> bool {
        self.reservation_key.is_some()
    }
}

/// A maximal run of time-adjacent records sharing reservation state and key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySlot {
    /// Record ids in scan order.
    pub ids: Vec<i64>,
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub is_reserved: bool,
    pub reservation_key: Option<i64>,
}

impl DisplaySlot {
    fn start_run(record: &SlotRecord) -> Self {
        Self {
            ids: vec![record.id],
            begin: record.begin,
            end: record.end,
            is_reserved: record.is_reserved(),
            reservation_key: record.reservation_key,
        }
    }

    /// Whether `record` continues this run.
    fn accepts(&self, record: &SlotRecord) -> bool {
        if record.is_reserved() != self.is_reserved {
            return false;
        }
        if record.is_reserved() && record.reservation_key != self.reservation_key {
            return false;
        }
        (record.begin - self.end).abs() <= ADJACENCY_EPSILON
    }

    fn extend(&mut self, record: &SlotRecord) {
        self.ids.push(record.id);
        self.end = self.end.max(record.end);
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.begin).num_minutes()
    }

    /// Collapse this run back into a single record spanning it, carrying the
    /// first id.
    pub fn to_boundary_record(&self) -> SlotRecord {
        SlotRecord {
            id: self.ids.first().copied().unwrap_or_default(),
            begin: self.begin,
            end: self.end,
            reservation_key: self.reservation_key,
        }
    }

    /// Local calendar day on which this run begins.
    pub fn day(&self, tz: Tz) -> NaiveDate {
        self.begin.with_timezone(&tz).date_naive()
    }
}

/// Merge slot records into display runs.
///
/// Empty input yields an empty output. Output runs are in ascending time order.
pub fn merge_slots(records: &[SlotRecord]) -> Vec<DisplaySlot> {
    let mut sorted: Vec<&SlotRecord> = records.iter().collect();
    sorted.sort_by_key(|r| (r.begin, r.end));

    let mut merged: Vec<DisplaySlot> = Vec::new();
    let mut current: Option<DisplaySlot> = None;

    for record in sorted {
        match current.as_mut() {
            Some(run) if run.accepts(record) => run.extend(record),
            _ => {
                if let Some(done) = current.replace(DisplaySlot::start_run(record)) {
                    merged.push(done);
                }
            }
        }
    }

    merged.extend(current);
    merged
}

/// Group display runs by the local day they begin on.
pub fn group_by_day(slots: &[DisplaySlot], tz: Tz) -> BTreeMap<NaiveDate, Vec<DisplaySlot>> {
    let mut days: BTreeMap<NaiveDate, Vec<DisplaySlot>> = BTreeMap::new();
    for slot in slots {
        days.entry(slot.day(tz)).or_default().push(slot.clone());
    }
    days
}

/// The 15-minute grid points from `begin` (rounded down) to `end` (rounded up).
///
/// Consecutive pairs are the record boundaries the server creates when a
/// range is offered. Returns an empty list when `end <= begin`.
pub fn quarter_hour_boundaries(begin: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    if end <= begin {
        return Vec::new();
    }

    let (Ok(first), Ok(end_floor)) = (
        begin.duration_trunc(SLOT_LENGTH),
        end.duration_trunc(SLOT_LENGTH),
    ) else {
        return Vec::new();
    };
    let last = if end_floor < end {
        end_floor + SLOT_LENGTH
    } else {
        end_floor
    };

    let mut points = Vec::new();
    let mut cursor = first;
    while cursor <= last {
        points.push(cursor);
        cursor += SLOT_LENGTH;
    }
    points
}
