//! Tests for daily occupancy aggregation and the stats fallback.

use std::collections::BTreeMap;

use campus_engine::aggregate::{
    aggregate, buckets_from_stats, format_hours, local_midnight, parse_stats_duration,
    recent_window, resolve_daily_hours, stats_from_raw, total_hours, HoursSource,
};
use campus_engine::interval::TimeInterval;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use chrono_tz::Europe::Paris;

// ── Helpers ─────────────────────────────────────────────────────────────────

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

fn local(tz: Tz, year: i32, month: u32, day: u32, hour: u32, min: u32) -> DateTime<Utc> {
    tz.with_ymd_and_hms(year, month, day, hour, min, 0)
        .unwrap()
        .with_timezone(&Utc)
}

fn paris(year: i32, month: u32, day: u32, hour: u32, min: u32) -> DateTime<Utc> {
    local(Paris, year, month, day, hour, min)
}

fn hours(buckets: &[campus_engine::DailyBucket]) -> Vec<f64> {
    buckets.iter().map(|b| b.hours).collect()
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

// ── Window shape ────────────────────────────────────────────────────────────

#[test]
fn three_day_window_single_afternoon_session() {
    let intervals = vec![TimeInterval::closed(
        paris(2026, 6, 1, 14, 0),
        paris(2026, 6, 1, 16, 30),
    )];

    let buckets = aggregate(&intervals, date(2026, 6, 1), date(2026, 6, 4), Paris);

    assert_eq!(buckets.len(), 3);
    assert_eq!(hours(&buckets), vec![2.5, 0.0, 0.0]);
    assert_eq!(buckets[0].day, date(2026, 6, 1));
    assert_eq!(buckets[1].day, date(2026, 6, 2));
    assert_eq!(buckets[2].day, date(2026, 6, 3));
}

#[test]
fn no_intervals_yields_all_zero_buckets() {
    let buckets = aggregate(&[], date(2026, 6, 1), date(2026, 6, 8), Paris);

    assert_eq!(buckets.len(), 7);
    assert!(buckets.iter().all(|b| b.hours == 0.0));
}

#[test]
fn empty_or_inverted_window_yields_nothing() {
    let intervals = vec![TimeInterval::ongoing(paris(2026, 6, 1, 8, 0))];

    assert!(aggregate(&intervals, date(2026, 6, 1), date(2026, 6, 1), Paris).is_empty());
    assert!(aggregate(&intervals, date(2026, 6, 5), date(2026, 6, 1), Paris).is_empty());
}

#[test]
fn buckets_start_at_local_midnight() {
    let buckets = aggregate(&[], date(2026, 6, 1), date(2026, 6, 2), Paris);

    // Paris is UTC+2 in summer.
    assert_eq!(
        buckets[0].starts_at(Paris),
        Utc.with_ymd_and_hms(2026, 5, 31, 22, 0, 0).unwrap()
    );
}

// ── Clipping ────────────────────────────────────────────────────────────────

#[test]
fn session_spanning_midnight_splits_across_two_days() {
    let intervals = vec![TimeInterval::closed(
        paris(2026, 6, 1, 22, 0),
        paris(2026, 6, 2, 1, 30),
    )];

    let buckets = aggregate(&intervals, date(2026, 6, 1), date(2026, 6, 4), Paris);

    assert_eq!(hours(&buckets), vec![2.0, 1.5, 0.0]);
}

#[test]
fn ongoing_session_is_clipped_to_window_end() {
    let intervals = vec![TimeInterval::ongoing(paris(2026, 6, 3, 20, 0))];

    let buckets = aggregate(&intervals, date(2026, 6, 1), date(2026, 6, 4), Paris);

    assert_eq!(hours(&buckets), vec![0.0, 0.0, 4.0]);
}

#[test]
fn session_starting_before_window_is_clipped_to_window_start() {
    let intervals = vec![TimeInterval::closed(
        paris(2026, 5, 31, 18, 0),
        paris(2026, 6, 1, 3, 0),
    )];

    let buckets = aggregate(&intervals, date(2026, 6, 1), date(2026, 6, 3), Paris);

    assert_eq!(hours(&buckets), vec![3.0, 0.0]);
}

#[test]
fn sessions_entirely_outside_window_are_ignored() {
    let intervals = vec![
        TimeInterval::closed(paris(2026, 5, 20, 9, 0), paris(2026, 5, 20, 12, 0)),
        TimeInterval::closed(paris(2026, 6, 10, 9, 0), paris(2026, 6, 10, 12, 0)),
    ];

    let buckets = aggregate(&intervals, date(2026, 6, 1), date(2026, 6, 3), Paris);

    assert_eq!(total_hours(&buckets), 0.0);
}

#[test]
fn zero_length_session_contributes_nothing() {
    let at = paris(2026, 6, 1, 10, 0);
    let intervals = vec![TimeInterval::closed(at, at)];

    let buckets = aggregate(&intervals, date(2026, 6, 1), date(2026, 6, 2), Paris);

    assert_eq!(hours(&buckets), vec![0.0]);
}

#[test]
fn overlapping_sessions_both_contribute() {
    let intervals = vec![
        TimeInterval::closed(paris(2026, 6, 1, 9, 0), paris(2026, 6, 1, 11, 0)),
        TimeInterval::closed(paris(2026, 6, 1, 10, 0), paris(2026, 6, 1, 12, 0)),
    ];

    let buckets = aggregate(&intervals, date(2026, 6, 1), date(2026, 6, 2), Paris);

    assert_eq!(hours(&buckets), vec![4.0]);
}

#[test]
fn multi_day_session_fills_intermediate_days() {
    let intervals = vec![TimeInterval::closed(
        paris(2026, 6, 1, 12, 0),
        paris(2026, 6, 3, 6, 0),
    )];

    let buckets = aggregate(&intervals, date(2026, 6, 1), date(2026, 6, 4), Paris);

    assert_eq!(hours(&buckets), vec![12.0, 24.0, 6.0]);
}

// ── Time zones and DST ──────────────────────────────────────────────────────

#[test]
fn spring_forward_day_has_23_hours() {
    // Europe/Paris jumps from 02:00 to 03:00 on 2026-03-29.
    let intervals = vec![TimeInterval::ongoing(paris(2026, 3, 28, 12, 0))];

    let buckets = aggregate(&intervals, date(2026, 3, 29), date(2026, 3, 30), Paris);

    assert_eq!(hours(&buckets), vec![23.0]);
}

#[test]
fn fall_back_day_has_25_hours() {
    // Europe/Paris repeats 02:00-03:00 on 2026-10-25.
    let intervals = vec![TimeInterval::ongoing(paris(2026, 10, 24, 12, 0))];

    let buckets = aggregate(&intervals, date(2026, 10, 25), date(2026, 10, 26), Paris);

    assert_eq!(hours(&buckets), vec![25.0]);
}

#[test]
fn day_boundaries_follow_the_requested_zone() {
    // 23:30-00:30 UTC on June 1st is 01:30-02:30 in Paris, all on June 2nd.
    let intervals = vec![TimeInterval::closed(
        Utc.with_ymd_and_hms(2026, 6, 1, 23, 30, 0).unwrap(),
        Utc.with_ymd_and_hms(2026, 6, 2, 0, 30, 0).unwrap(),
    )];

    let in_utc = aggregate(&intervals, date(2026, 6, 1), date(2026, 6, 3), chrono_tz::UTC);
    let in_paris = aggregate(&intervals, date(2026, 6, 1), date(2026, 6, 3), Paris);

    assert_eq!(hours(&in_utc), vec![0.5, 0.5]);
    assert_eq!(hours(&in_paris), vec![0.0, 1.0]);
}

#[test]
fn skipped_midnight_resolves_to_first_valid_instant() {
    // Brazil started DST at 00:00 on 2018-11-04, jumping straight to 01:00.
    let tz: Tz = "America/Sao_Paulo".parse().unwrap();

    let start = local_midnight(tz, date(2018, 11, 4));

    assert_eq!(start, Utc.with_ymd_and_hms(2018, 11, 4, 3, 0, 0).unwrap());
}

// ── Presentation ────────────────────────────────────────────────────────────

#[test]
fn format_hours_rounds_to_nearest_minute() {
    assert_eq!(format_hours(2.5), "2h30");
    assert_eq!(format_hours(0.0), "0h00");
    assert_eq!(format_hours(1.999), "2h00");
    assert_eq!(format_hours(10.0 + 5.0 / 60.0), "10h05");
    assert_eq!(format_hours(-1.0), "0h00");
}

#[test]
fn recent_window_ends_after_today() {
    let (start, end) = recent_window(date(2026, 3, 10), 7);

    assert_eq!(start, date(2026, 3, 4));
    assert_eq!(end, date(2026, 3, 11));
    assert_eq!(aggregate(&[], start, end, Paris).len(), 7);
}

// ── Stats fallback ──────────────────────────────────────────────────────────

#[test]
fn parse_stats_duration_accepts_server_format() {
    assert_close(parse_stats_duration("05:30:00.000000").unwrap(), 5.5);
    assert_close(parse_stats_duration("00:00:36").unwrap(), 0.01);
    assert_close(parse_stats_duration("25:15:00").unwrap(), 25.25);
}

#[test]
fn parse_stats_duration_rejects_malformed_input() {
    for raw in ["", "abc", "1:2", "01:60:00", "01:00:60", "1:2:3:4", "-1:00:00"] {
        assert!(
            parse_stats_duration(raw).is_err(),
            "{raw:?} should be rejected"
        );
    }
}

#[test]
fn stats_from_raw_drops_malformed_entries() {
    let raw: BTreeMap<String, String> = [
        ("2026-06-01", "02:30:00.000000"),
        ("2026-06-02", "garbage"),
        ("not-a-date", "01:00:00"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    let stats = stats_from_raw(&raw);

    assert_eq!(stats.len(), 1);
    assert_close(stats[&date(2026, 6, 1)], 2.5);
}

#[test]
fn buckets_from_stats_fill_missing_days_and_ignore_outside_days() {
    let stats: BTreeMap<NaiveDate, f64> =
        [(date(2026, 6, 2), 3.0), (date(2026, 7, 1), 9.0)].into_iter().collect();

    let buckets = buckets_from_stats(&stats, date(2026, 6, 1), date(2026, 6, 4));

    assert_eq!(hours(&buckets), vec![0.0, 3.0, 0.0]);
}

#[test]
fn resolve_prefers_non_zero_stats() {
    let stats: BTreeMap<NaiveDate, f64> = [(date(2026, 6, 1), 1.0)].into_iter().collect();
    let intervals = vec![TimeInterval::closed(
        paris(2026, 6, 1, 9, 0),
        paris(2026, 6, 1, 17, 0),
    )];

    let (buckets, source) =
        resolve_daily_hours(Some(&stats), &intervals, date(2026, 6, 1), date(2026, 6, 2), Paris);

    assert_eq!(source, HoursSource::Stats);
    assert_eq!(hours(&buckets), vec![1.0]);
}

#[test]
fn resolve_falls_back_when_stats_are_zero_or_missing() {
    let zero: BTreeMap<NaiveDate, f64> = [(date(2026, 6, 1), 0.0)].into_iter().collect();
    let intervals = vec![TimeInterval::closed(
        paris(2026, 6, 1, 9, 0),
        paris(2026, 6, 1, 17, 0),
    )];

    let (from_zero, source_zero) =
        resolve_daily_hours(Some(&zero), &intervals, date(2026, 6, 1), date(2026, 6, 2), Paris);
    let (from_none, source_none) =
        resolve_daily_hours(None, &intervals, date(2026, 6, 1), date(2026, 6, 2), Paris);

    assert_eq!(source_zero, HoursSource::Intervals);
    assert_eq!(source_none, HoursSource::Intervals);
    assert_eq!(hours(&from_zero), vec![8.0]);
    assert_eq!(from_zero, from_none);
}

#[test]
fn stats_and_interval_paths_agree_for_the_same_sessions() {
    let intervals = vec![
        TimeInterval::closed(paris(2026, 6, 1, 8, 15), paris(2026, 6, 1, 12, 40)),
        TimeInterval::closed(paris(2026, 6, 1, 23, 10), paris(2026, 6, 2, 2, 5)),
        TimeInterval::closed(paris(2026, 6, 3, 13, 0), paris(2026, 6, 3, 19, 59)),
    ];
    let (start, end) = (date(2026, 6, 1), date(2026, 6, 4));
    let aggregated = aggregate(&intervals, start, end, Paris);

    // What the server would report for those sessions, second precision.
    let raw: BTreeMap<String, String> = aggregated
        .iter()
        .map(|b| {
            let secs = (b.hours * 3600.0).round() as u64;
            (
                b.day.format("%Y-%m-%d").to_string(),
                format!("{:02}:{:02}:{:02}.000000", secs / 3600, secs / 60 % 60, secs % 60),
            )
        })
        .collect();
    let stats = stats_from_raw(&raw);

    let (resolved, source) = resolve_daily_hours(Some(&stats), &intervals, start, end, Paris);

    assert_eq!(source, HoursSource::Stats);
    for (from_stats, from_intervals) in resolved.iter().zip(&aggregated) {
        assert_eq!(from_stats.day, from_intervals.day);
        assert!((from_stats.hours - from_intervals.hours).abs() < 1e-6);
    }
}
