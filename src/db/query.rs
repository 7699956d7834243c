//! Tier-aware query layer.
//!
//! Every query picks a storage tier from the requested window and the
//! effective retention horizons, then stitches the current (not yet
//! aggregated) hour from raw heartbeats where the tier alone would miss it.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::RetentionConfig;

use super::aggregation::truncate_to;
use super::models::*;
use super::store::Store;

/// One chart sample. `status == -1` marks "no samples" so the UI can
/// distinguish a gap from an outage.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChartPoint {
    pub time: String,
    pub duration: i64,
    pub status: i64,
    pub uptime: f64,
    #[serde(rename = "isLive")]
    pub is_live: bool,
}

/// One row of the tier-selected range dump.
#[derive(Debug, Clone, Serialize)]
pub struct RangePoint {
    pub time: String,
    pub status: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    pub duration: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "upCount")]
    pub up_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "downCount")]
    pub down_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "totalCount")]
    pub total_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "minDuration")]
    pub min_duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "maxDuration")]
    pub max_duration: Option<i64>,
    #[serde(rename = "type")]
    pub tier: &'static str,
}

/// Per-monitor availability/latency summary.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStats {
    #[serde(rename = "uptime1h")]
    pub uptime_1h: f64,
    #[serde(rename = "uptime24h")]
    pub uptime_24h: f64,
    #[serde(rename = "uptime7d")]
    pub uptime_7d: f64,
    #[serde(rename = "uptime30d")]
    pub uptime_30d: f64,
    #[serde(rename = "avgResponse24h")]
    pub avg_response_24h: f64,
}

/// Availability percent over the last `hours`.
pub fn uptime_stats(store: &Store, retention: &RetentionConfig, monitor_id: i64, hours: i64) -> f64 {
    uptime_stats_at(store, retention, monitor_id, hours, Utc::now())
}

pub fn uptime_stats_at(
    store: &Store,
    retention: &RetentionConfig,
    monitor_id: i64,
    hours: i64,
    now: DateTime<Utc>,
) -> f64 {
    let since = now - Duration::hours(hours);
    let raw_hours = retention.effective_raw_hours();
    let hourly_days = retention.effective_hourly_days();

    if hours <= raw_hours {
        let (up, total) = store.raw_counts_since(monitor_id, since).unwrap_or((0, 0));
        if total == 0 {
            return 100.0;
        }
        return up as f64 / total as f64 * 100.0;
    }

    // Aggregate tier strictly before the current top-of-hour, plus the live
    // (un-aggregated) bucket from raw data.
    let current_hour = truncate_to(now, 3600);
    let (agg_up, agg_total) = if hours <= hourly_days * 24 {
        store
            .hourly_counts_between(monitor_id, since, current_hour)
            .unwrap_or((0, 0))
    } else {
        store
            .daily_counts_between(monitor_id, since, current_hour)
            .unwrap_or((0, 0))
    };
    let (live_up, live_total) = store
        .raw_counts_since(monitor_id, current_hour)
        .unwrap_or((0, 0));

    let up = agg_up + live_up;
    let total = agg_total + live_total;
    if total == 0 {
        return 100.0;
    }
    up as f64 / total as f64 * 100.0
}

/// Mean response time in milliseconds over the last `hours`, successful
/// checks only. The aggregate branch is weighted by sample count and does not
/// include the live raw hour.
pub fn avg_response(store: &Store, retention: &RetentionConfig, monitor_id: i64, hours: i64) -> f64 {
    avg_response_at(store, retention, monitor_id, hours, Utc::now())
}

pub fn avg_response_at(
    store: &Store,
    retention: &RetentionConfig,
    monitor_id: i64,
    hours: i64,
    now: DateTime<Utc>,
) -> f64 {
    let since = now - Duration::hours(hours);
    let raw_hours = retention.effective_raw_hours();
    let hourly_days = retention.effective_hourly_days();

    if hours <= raw_hours {
        return store
            .raw_avg_duration_since(monitor_id, since)
            .unwrap_or(0.0);
    }

    let (sum_duration, up_count) = if hours <= hourly_days * 24 {
        store
            .hourly_weighted_since(monitor_id, since)
            .unwrap_or((0, 0))
    } else {
        let days = (hours / 24).max(1);
        let cutoff = now - Duration::days(days);
        store
            .daily_weighted_since(monitor_id, cutoff)
            .unwrap_or((0, 0))
    };

    if up_count > 0 {
        sum_duration as f64 / up_count as f64
    } else {
        0.0
    }
}

/// Chart series for the `24h` (24 hourly points) or `7d` (28 six-hour points)
/// view. The final point is synthesized live from raw data.
pub fn chart_data(store: &Store, monitor_id: i64, view: &str) -> Vec<ChartPoint> {
    chart_data_at(store, monitor_id, view, Utc::now())
}

pub fn chart_data_at(
    store: &Store,
    monitor_id: i64,
    view: &str,
    now: DateTime<Utc>,
) -> Vec<ChartPoint> {
    let current_hour = truncate_to(now, 3600);
    match view {
        "7d" => chart_data_7d(store, monitor_id, now, current_hour),
        _ => chart_data_24h(store, monitor_id, now, current_hour),
    }
}

fn chart_data_24h(
    store: &Store,
    monitor_id: i64,
    now: DateTime<Utc>,
    current_hour: DateTime<Utc>,
) -> Vec<ChartPoint> {
    let start = current_hour - Duration::hours(23);
    let rows = store
        .hourly_rows_between(monitor_id, start, current_hour)
        .unwrap_or_default();

    let mut points = Vec::with_capacity(24);
    for i in 0..23 {
        let hour = start + Duration::hours(i);
        match rows.iter().find(|r| r.hour == hour) {
            Some(row) => {
                let status = if row.uptime < 5000 { STATUS_DOWN } else { STATUS_UP };
                points.push(ChartPoint {
                    time: hour.to_rfc3339(),
                    duration: row.avg_duration,
                    status,
                    uptime: row.uptime_percent(),
                    is_live: false,
                });
            }
            None => points.push(empty_point(hour, false)),
        }
    }
    points.push(live_hour_point(store, monitor_id, current_hour, now));
    points
}

fn chart_data_7d(
    store: &Store,
    monitor_id: i64,
    now: DateTime<Utc>,
    current_hour: DateTime<Utc>,
) -> Vec<ChartPoint> {
    let start = current_hour - Duration::hours(167);
    let rows = store
        .hourly_rows_between(monitor_id, start, current_hour)
        .unwrap_or_default();

    let mut points = Vec::with_capacity(28);
    for i in 0..27 {
        let slot_start = start + Duration::hours(6 * i);
        let slot_end = slot_start + Duration::hours(6);

        let mut duration_sum = 0i64;
        let mut up = 0i64;
        let mut down = 0i64;
        let mut hour_count = 0i64;
        for row in rows.iter().filter(|r| r.hour >= slot_start && r.hour < slot_end) {
            duration_sum += row.avg_duration;
            up += row.up_count;
            down += row.down_count;
            hour_count += 1;
        }

        if hour_count > 0 {
            let uptime = if up + down > 0 {
                up as f64 / (up + down) as f64 * 100.0
            } else {
                100.0
            };
            let status = if uptime < 50.0 { STATUS_DOWN } else { STATUS_UP };
            points.push(ChartPoint {
                time: slot_start.to_rfc3339(),
                duration: duration_sum / hour_count,
                status,
                uptime,
                is_live: false,
            });
        } else {
            points.push(empty_point(slot_start, false));
        }
    }
    points.push(live_slot_point(store, monitor_id, current_hour, now, 6));
    points
}

/// Live point for the current hour, computed from raw heartbeats.
fn live_hour_point(
    store: &Store,
    monitor_id: i64,
    current_hour: DateTime<Utc>,
    now: DateTime<Utc>,
) -> ChartPoint {
    let beats = store
        .heartbeats_since(monitor_id, current_hour)
        .unwrap_or_default();
    if beats.is_empty() {
        return empty_point(now, true);
    }

    let mut duration_sum = 0i64;
    let mut up = 0i64;
    let mut down = 0i64;
    for h in &beats {
        if h.status == STATUS_UP {
            duration_sum += h.duration;
            up += 1;
        } else if h.status == STATUS_DOWN {
            down += 1;
        }
    }

    let avg_duration = if up > 0 { duration_sum / up } else { 0 };
    let total = up + down;
    let uptime = if total > 0 {
        up as f64 / total as f64 * 100.0
    } else {
        100.0
    };

    ChartPoint {
        time: now.to_rfc3339(),
        duration: avg_duration,
        // Rows come back newest first.
        status: beats[0].status,
        uptime,
        is_live: true,
    }
}

/// Live point for the current 6-hour slot: aggregated hours already written
/// for the slot fused with the raw current hour.
fn live_slot_point(
    store: &Store,
    monitor_id: i64,
    current_hour: DateTime<Utc>,
    now: DateTime<Utc>,
    slot_hours: i64,
) -> ChartPoint {
    let day_start = truncate_to(current_hour, 86400);
    let hours_into_day = (current_hour - day_start).num_hours();
    let slot_start = day_start + Duration::hours((hours_into_day / slot_hours) * slot_hours);

    let mut duration_sum = 0i64;
    let mut up = 0i64;
    let mut down = 0i64;
    let mut sample_count = 0i64;

    for row in store
        .hourly_rows_between(monitor_id, slot_start, current_hour)
        .unwrap_or_default()
    {
        duration_sum += row.avg_duration;
        up += row.up_count;
        down += row.down_count;
        sample_count += 1;
    }

    let beats = store
        .heartbeats_since(monitor_id, current_hour)
        .unwrap_or_default();
    let mut live_duration = 0i64;
    let mut live_up = 0i64;
    let mut live_down = 0i64;
    for h in &beats {
        if h.status == STATUS_UP {
            live_duration += h.duration;
            live_up += 1;
        } else if h.status == STATUS_DOWN {
            live_down += 1;
        }
    }

    if live_up > 0 {
        duration_sum += live_duration / live_up;
        up += live_up;
        down += live_down;
        sample_count += 1;
    } else if !beats.is_empty() {
        down += live_down;
    }

    if sample_count == 0 {
        return empty_point(now, true);
    }

    let total = up + down;
    let uptime = if total > 0 {
        up as f64 / total as f64 * 100.0
    } else {
        100.0
    };
    let mut status = if uptime < 50.0 { STATUS_DOWN } else { STATUS_UP };
    if let Some(latest) = beats.first() {
        status = latest.status;
    }

    ChartPoint {
        time: now.to_rfc3339(),
        duration: duration_sum / sample_count,
        status,
        uptime,
        is_live: true,
    }
}

fn empty_point(time: DateTime<Utc>, is_live: bool) -> ChartPoint {
    ChartPoint {
        time: time.to_rfc3339(),
        duration: 0,
        status: STATUS_NONE,
        uptime: 100.0,
        is_live,
    }
}

/// Tier-selected row dump for a trailing window; returns the rows and the
/// tier they came from.
pub fn heartbeats_with_range(
    store: &Store,
    retention: &RetentionConfig,
    monitor_id: i64,
    hours: i64,
) -> (Vec<RangePoint>, &'static str) {
    heartbeats_with_range_at(store, retention, monitor_id, hours, Utc::now())
}

pub fn heartbeats_with_range_at(
    store: &Store,
    retention: &RetentionConfig,
    monitor_id: i64,
    hours: i64,
    now: DateTime<Utc>,
) -> (Vec<RangePoint>, &'static str) {
    let raw_hours = retention.effective_raw_hours();
    let hourly_days = retention.effective_hourly_days();

    if hours <= raw_hours {
        let rows = store
            .heartbeats_since(monitor_id, now - Duration::hours(hours))
            .unwrap_or_default();
        let points = rows
            .into_iter()
            .map(|h| RangePoint {
                time: h.time.to_rfc3339(),
                status: h.status,
                msg: Some(h.message),
                duration: h.duration,
                uptime: None,
                up_count: None,
                down_count: None,
                total_count: None,
                min_duration: None,
                max_duration: None,
                tier: "raw",
            })
            .collect();
        (points, "raw")
    } else if hours <= hourly_days * 24 {
        let rows = store
            .hourly_rows_since(monitor_id, now - Duration::hours(hours))
            .unwrap_or_default();
        let points = rows
            .into_iter()
            .map(|h| RangePoint {
                time: h.hour.to_rfc3339(),
                status: if h.uptime < 5000 { STATUS_DOWN } else { STATUS_UP },
                msg: None,
                duration: h.avg_duration,
                uptime: Some(h.uptime_percent()),
                up_count: Some(h.up_count),
                down_count: Some(h.down_count),
                total_count: Some(h.total_count),
                min_duration: Some(h.min_duration),
                max_duration: Some(h.max_duration),
                tier: "hourly",
            })
            .collect();
        (points, "hourly")
    } else {
        let days = (hours / 24).max(1);
        let rows = store
            .daily_rows_since(monitor_id, now - Duration::days(days))
            .unwrap_or_default();
        let points = rows
            .into_iter()
            .map(|h| RangePoint {
                time: h.date.to_rfc3339(),
                status: if h.uptime < 5000 { STATUS_DOWN } else { STATUS_UP },
                msg: None,
                duration: h.avg_duration,
                uptime: Some(h.uptime_percent()),
                up_count: Some(h.up_count),
                down_count: Some(h.down_count),
                total_count: Some(h.total_count),
                min_duration: Some(h.min_duration),
                max_duration: Some(h.max_duration),
                tier: "daily",
            })
            .collect();
        (points, "daily")
    }
}

/// The availability/latency bundle shown next to each monitor.
pub fn monitor_stats(store: &Store, retention: &RetentionConfig, monitor_id: i64) -> MonitorStats {
    MonitorStats {
        uptime_1h: uptime_stats(store, retention, monitor_id, 1),
        uptime_24h: uptime_stats(store, retention, monitor_id, 24),
        uptime_7d: uptime_stats(store, retention, monitor_id, 7 * 24),
        uptime_30d: uptime_stats(store, retention, monitor_id, 30 * 24),
        avg_response_24h: avg_response(store, retention, monitor_id, 24),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::NamedTempFile;

    fn test_store() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::open(tmp.path()).unwrap();
        (tmp, store)
    }

    fn beat(monitor_id: i64, time: DateTime<Utc>, status: i64, duration: i64) -> Heartbeat {
        Heartbeat {
            id: 0,
            monitor_id,
            status,
            message: String::new(),
            time,
            duration,
        }
    }

    fn hourly(monitor_id: i64, hour: DateTime<Utc>, up: i64, total: i64, sum: i64) -> HeartbeatHourly {
        let avg = if up > 0 { sum / up } else { 0 };
        HeartbeatHourly {
            id: 0,
            monitor_id,
            hour,
            up_count: up,
            down_count: total - up,
            total_count: total,
            sum_duration: sum,
            avg_duration: avg,
            min_duration: 0,
            max_duration: 0,
            uptime: if total > 0 { up * 10000 / total } else { 0 },
        }
    }

    #[test]
    fn test_uptime_raw_branch() {
        let (_tmp, store) = test_store();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap();
        let retention = RetentionConfig::default();

        for i in 0..10 {
            let status = if i < 9 { STATUS_UP } else { STATUS_DOWN };
            store
                .insert_heartbeats(&[beat(1, now - Duration::minutes(i * 5), status, 100)])
                .unwrap();
        }

        let uptime = uptime_stats_at(&store, &retention, 1, 24, now);
        assert!((uptime - 90.0).abs() < 0.01);
    }

    #[test]
    fn test_uptime_no_data_is_100() {
        let (_tmp, store) = test_store();
        let retention = RetentionConfig::default();
        assert_eq!(uptime_stats(&store, &retention, 99, 24), 100.0);
    }

    #[test]
    fn test_uptime_aggregate_branch_fuses_live_bucket() {
        let (_tmp, store) = test_store();
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 12, 30, 0).unwrap();
        let current_hour = Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();
        let retention = RetentionConfig::default();

        // 30 hourly rows: 60 checks each, 54 UP (90%).
        for i in 1..=30 {
            store
                .insert_hourly(&hourly(1, current_hour - Duration::hours(i), 54, 60, 5400))
                .unwrap();
        }
        // Live bucket: 10 raw checks, all UP.
        for i in 0..10 {
            store
                .insert_heartbeats(&[beat(1, current_hour + Duration::minutes(i * 3), STATUS_UP, 80)])
                .unwrap();
        }

        let uptime = uptime_stats_at(&store, &retention, 1, 30, now);
        let expected = (30.0 * 54.0 + 10.0) / (30.0 * 60.0 + 10.0) * 100.0;
        assert!((uptime - expected).abs() < 0.01);
    }

    #[test]
    fn test_avg_response_tiers() {
        let (_tmp, store) = test_store();
        let now = Utc.with_ymd_and_hms(2024, 5, 3, 8, 15, 0).unwrap();
        let retention = RetentionConfig::default();

        // Raw branch excludes failures and zero durations.
        store
            .insert_heartbeats(&[
                beat(1, now - Duration::minutes(10), STATUS_UP, 100),
                beat(1, now - Duration::minutes(20), STATUS_UP, 200),
                beat(1, now - Duration::minutes(30), STATUS_DOWN, 0),
            ])
            .unwrap();
        let raw = avg_response_at(&store, &retention, 1, 24, now);
        assert!((raw - 150.0).abs() < 0.01);

        // Hourly branch is weighted: (1000 + 800) / (10 + 2).
        store
            .insert_hourly(&hourly(2, now - Duration::hours(30), 10, 10, 1000))
            .unwrap();
        store
            .insert_hourly(&hourly(2, now - Duration::hours(31), 2, 4, 800))
            .unwrap();
        let weighted = avg_response_at(&store, &retention, 2, 48, now);
        assert!((weighted - 150.0).abs() < 0.01);

        // No successful samples yields 0.
        assert_eq!(avg_response_at(&store, &retention, 3, 48, now), 0.0);
    }

    #[test]
    fn test_tier_boundaries() {
        let (_tmp, store) = test_store();
        let retention = RetentionConfig::default();
        let now = Utc.with_ymd_and_hms(2024, 5, 4, 9, 0, 0).unwrap();

        let (_, tier) = heartbeats_with_range_at(&store, &retention, 1, 24, now);
        assert_eq!(tier, "raw");
        let (_, tier) = heartbeats_with_range_at(&store, &retention, 1, 25, now);
        assert_eq!(tier, "hourly");
        let (_, tier) = heartbeats_with_range_at(&store, &retention, 1, 7 * 24, now);
        assert_eq!(tier, "hourly");
        let (_, tier) = heartbeats_with_range_at(&store, &retention, 1, 7 * 24 + 1, now);
        assert_eq!(tier, "daily");
    }

    #[test]
    fn test_chart_24h_missing_buckets_and_live_point() {
        let (_tmp, store) = test_store();
        let now = Utc.with_ymd_and_hms(2024, 5, 5, 16, 40, 0).unwrap();
        let current_hour = Utc.with_ymd_and_hms(2024, 5, 5, 16, 0, 0).unwrap();

        // One known hourly bucket three hours back; everything else missing.
        store
            .insert_hourly(&hourly(1, current_hour - Duration::hours(3), 12, 12, 1200))
            .unwrap();
        // Live hour: 2 UP at 100ms, 1 DOWN.
        store
            .insert_heartbeats(&[
                beat(1, current_hour + Duration::minutes(5), STATUS_UP, 100),
                beat(1, current_hour + Duration::minutes(10), STATUS_UP, 100),
                beat(1, current_hour + Duration::minutes(15), STATUS_DOWN, 0),
            ])
            .unwrap();

        let points = chart_data_at(&store, 1, "24h", now);
        assert_eq!(points.len(), 24);

        // Missing bucket sentinel.
        assert_eq!(points[0].status, STATUS_NONE);
        assert_eq!(points[0].uptime, 100.0);
        assert_eq!(points[0].duration, 0);

        // The populated bucket: index 20 is current_hour-3h (start is -23h).
        assert_eq!(points[20].status, STATUS_UP);
        assert_eq!(points[20].duration, 100);

        // Live point: avg over UP rows only, latest raw status.
        let live = &points[23];
        assert!(live.is_live);
        assert_eq!(live.duration, 100);
        assert_eq!(live.status, STATUS_DOWN);
        assert!((live.uptime - 66.6667).abs() < 0.01);
    }

    #[test]
    fn test_chart_7d_shape() {
        let (_tmp, store) = test_store();
        let now = Utc.with_ymd_and_hms(2024, 5, 6, 13, 10, 0).unwrap();
        let current_hour = Utc.with_ymd_and_hms(2024, 5, 6, 13, 0, 0).unwrap();
        let start = current_hour - Duration::hours(167);

        // Fill the first slot's six hours.
        for i in 0..6 {
            store
                .insert_hourly(&hourly(1, start + Duration::hours(i), 10, 10, 1000))
                .unwrap();
        }

        let points = chart_data_at(&store, 1, "7d", now);
        assert_eq!(points.len(), 28);
        assert_eq!(points[0].status, STATUS_UP);
        assert_eq!(points[0].duration, 100);
        assert!((points[0].uptime - 100.0).abs() < f64::EPSILON);
        assert_eq!(points[1].status, STATUS_NONE);
        assert!(points[27].is_live);
    }

    #[test]
    fn test_live_slot_fuses_hourly_and_raw() {
        let (_tmp, store) = test_store();
        // 13:10 sits in the 12:00-18:00 slot; 12:00 is aggregated, 13:xx raw.
        let now = Utc.with_ymd_and_hms(2024, 5, 7, 13, 10, 0).unwrap();
        let current_hour = Utc.with_ymd_and_hms(2024, 5, 7, 13, 0, 0).unwrap();

        store
            .insert_hourly(&hourly(1, current_hour - Duration::hours(1), 6, 6, 600))
            .unwrap();
        store
            .insert_heartbeats(&[
                beat(1, current_hour + Duration::minutes(2), STATUS_UP, 300),
                beat(1, current_hour + Duration::minutes(4), STATUS_UP, 300),
            ])
            .unwrap();

        let points = chart_data_at(&store, 1, "7d", now);
        let live = &points[27];
        assert!(live.is_live);
        // (100 + 300) / 2 samples.
        assert_eq!(live.duration, 200);
        assert_eq!(live.status, STATUS_UP);
        assert!((live.uptime - 100.0).abs() < f64::EPSILON);
    }
}
