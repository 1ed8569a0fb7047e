//! Daily occupancy aggregation over a fixed window of calendar days.
//!
//! Intervals are clipped to the window, split at local-midnight boundaries of
//! the requested time zone, and each piece is credited to the day it starts
//! in. Overlapping intervals both contribute; deduplication belongs to the
//! caller (see [`crate::interval::intervals_from_records`]).
//!
//! A server-side pre-aggregated "stats" map is preferred when it carries any
//! time at all; [`resolve_daily_hours`] implements that fallback.

use std::collections::BTreeMap;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::interval::TimeInterval;

/// Occupied hours for one calendar day in the aggregation time zone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyBucket {
    pub day: NaiveDate,
    pub hours: f64,
}

impl DailyBucket {
    /// The instant at which this bucket's day begins in `tz`.
    pub fn starts_at(&self, tz: Tz) -> DateTime<Utc> {
        local_midnight(tz, self.day)
    }
}

/// Which data path produced a set of buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoursSource {
    /// Server-side pre-aggregated statistics.
    Stats,
    /// Local aggregation of raw occupancy intervals.
    Intervals,
}

/// The instant at which `date` begins in `tz`.
///
/// An ambiguous midnight resolves to the earliest instant. A midnight skipped
/// by a DST transition resolves to the first valid local time of that day.
pub fn local_midnight(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    if let Some(dt) = tz.from_local_datetime(&midnight).earliest() {
        return dt.with_timezone(&Utc);
    }

    // Gaps are at most a few hours; probe forward on a quarter-hour grid.
    (1..=96)
        .map(|step| midnight + chrono::Duration::minutes(15 * step))
        .find_map(|probe| tz.from_local_datetime(&probe).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}

/// Aggregate occupancy intervals into one bucket per calendar day in
/// `[window_start, window_end)`.
///
/// The result is ordered by day and contains zero-hour days. An empty or
/// inverted window yields no buckets. Intervals that are empty after clipping
/// are dropped silently. Hours are not rounded.
pub fn aggregate(
    intervals: &[TimeInterval],
    window_start: NaiveDate,
    window_end: NaiveDate,
    tz: Tz,
) -> Vec<DailyBucket> {
    if window_start >= window_end {
        return Vec::new();
    }

    let days: Vec<NaiveDate> = window_start
        .iter_days()
        .take_while(|d| *d < window_end)
        .collect();

    // boundaries[i] is the start of days[i]; the final entry closes the window.
    let boundaries: Vec<DateTime<Utc>> = days
        .iter()
        .chain(std::iter::once(&window_end))
        .map(|d| local_midnight(tz, *d))
        .collect();

    let mut buckets: Vec<DailyBucket> = days
        .iter()
        .map(|&day| DailyBucket { day, hours: 0.0 })
        .collect();

    let window_open = boundaries[0];
    let window_close = boundaries[boundaries.len() - 1];

    for interval in intervals {
        let Some((begin, end)) = interval.clip(window_open, window_close) else {
            continue;
        };

        // Index of the day containing `begin`. begin >= boundaries[0], so the
        // partition point is at least 1.
        let first = boundaries.partition_point(|b| *b <= begin) - 1;

        for (i, bucket) in buckets.iter_mut().enumerate().skip(first) {
            let segment_start = begin.max(boundaries[i]);
            let segment_end = end.min(boundaries[i + 1]);
            if segment_end <= segment_start {
                break;
            }
            bucket.hours += hours_between(segment_start, segment_end);
        }
    }

    buckets
}

fn hours_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 3_600_000.0
}

/// The window covering the last `days` calendar days, ending with `today`.
///
/// Returns `(start, end)` with `end` exclusive. `days == 0` gives an empty
/// window starting the day after `today`.
pub fn recent_window(today: NaiveDate, days: u32) -> (NaiveDate, NaiveDate) {
    let end = today + Days::new(1);
    let start = end
        .checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MIN);
    (start, end)
}

/// Sum of all bucket hours.
pub fn total_hours(buckets: &[DailyBucket]) -> f64 {
    buckets.iter().map(|b| b.hours).sum()
}

/// Render hours for display as `"{h}h{mm}"`, rounded to the nearest minute.
///
/// ```
/// use campus_engine::aggregate::format_hours;
/// assert_eq!(format_hours(2.5), "2h30");
/// assert_eq!(format_hours(0.0), "0h00");
/// ```
pub fn format_hours(hours: f64) -> String {
    let minutes = (hours.max(0.0) * 60.0).round() as i64;
    format!("{}h{:02}", minutes / 60, minutes % 60)
}

/// Parse a server-side stats duration of the form `HH:MM:SS[.ffffff]` into hours.
///
/// The hour component may exceed 24 (stats for a day can be computed on
/// overlapping sessions).
///
/// # Errors
/// Returns `EngineError::InvalidDuration` if the string is not three
/// colon-separated components with minutes and seconds below 60.
pub fn parse_stats_duration(raw: &str) -> Result<f64> {
    let invalid = || EngineError::InvalidDuration(raw.to_string());

    let mut parts = raw.trim().split(':');
    let (Some(h), Some(m), Some(s), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };

    let hours: u64 = h.parse().map_err(|_| invalid())?;
    let minutes: u64 = m.parse().map_err(|_| invalid())?;
    let seconds: f64 = s.parse().map_err(|_| invalid())?;
    if minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        return Err(invalid());
    }

    Ok(hours as f64 + minutes as f64 / 60.0 + seconds / 3600.0)
}

/// Convert a raw stats map (`"YYYY-MM-DD" -> "HH:MM:SS.ffffff"`) into hours per day.
///
/// Entries whose date or duration does not parse are dropped.
pub fn stats_from_raw(raw: &BTreeMap<String, String>) -> BTreeMap<NaiveDate, f64> {
    raw.iter()
        .filter_map(|(date, duration)| {
            let day = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
            let hours = parse_stats_duration(duration).ok()?;
            Some((day, hours))
        })
        .collect()
}

/// Lay server-side stats onto the same per-day grid [`aggregate`] produces.
///
/// Days missing from `stats` are zero; days outside the window are ignored.
pub fn buckets_from_stats(
    stats: &BTreeMap<NaiveDate, f64>,
    window_start: NaiveDate,
    window_end: NaiveDate,
) -> Vec<DailyBucket> {
    window_start
        .iter_days()
        .take_while(|d| *d < window_end)
        .map(|day| DailyBucket {
            day,
            hours: stats.get(&day).copied().unwrap_or(0.0),
        })
        .collect()
}

/// Resolve daily hours using the stats-first fallback hierarchy.
///
/// Stats win when present and their in-window total is positive; otherwise
/// the raw intervals are aggregated.
pub fn resolve_daily_hours(
    stats: Option<&BTreeMap<NaiveDate, f64>>,
    intervals: &[TimeInterval],
    window_start: NaiveDate,
    window_end: NaiveDate,
    tz: Tz,
) -> (Vec<DailyBucket>, HoursSource) {
    if let Some(stats) = stats {
        let buckets = buckets_from_stats(stats, window_start, window_end);
        if total_hours(&buckets) > 0.0 {
            return (buckets, HoursSource::Stats);
        }
    }

    (
        aggregate(intervals, window_start, window_end, tz),
        HoursSource::Intervals,
    )
}
