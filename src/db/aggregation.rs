//! Roll-up of raw heartbeats into hourly and daily tiers, plus retention
//! pruning.
//!
//! The worker runs once at start-up and then every hour. Each bucket is
//! written at most once per `(monitor, hour)` / `(monitor, date)`; re-entry
//! skips existing rows, so a crashed or restarted pass is safe to repeat.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::broadcast;

use crate::config::RetentionConfig;

use super::models::{HeartbeatDaily, HeartbeatHourly};
use super::store::Store;

/// Background aggregation worker.
pub struct Aggregator {
    store: Arc<Store>,
    retention: RetentionConfig,
    stop: broadcast::Sender<()>,
}

impl Aggregator {
    pub fn new(store: Arc<Store>, retention: RetentionConfig) -> Self {
        let (stop, _) = broadcast::channel(1);
        Self {
            store,
            retention,
            stop,
        }
    }

    /// Start the hourly aggregation task; the first pass runs immediately.
    pub fn start(&self) {
        let store = self.store.clone();
        let retention = self.retention;
        let mut stop_rx = self.stop.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(StdDuration::from_secs(3600));
            loop {
                tokio::select! {
                    _ = stop_rx.recv() => {
                        tracing::info!("Aggregation worker stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        run_at(&store, &retention, Utc::now());
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        let _ = self.stop.send(());
    }
}

/// Run the complete sequence synchronously (admin endpoints and tests).
pub fn force_aggregation(store: &Store, retention: &RetentionConfig) {
    run_at(store, retention, Utc::now());
}

/// One full pass relative to `now`: hourly roll-up, daily roll-up, pruning.
pub fn run_at(store: &Store, retention: &RetentionConfig, now: DateTime<Utc>) {
    tracing::debug!("Running heartbeat aggregation");
    aggregate_hourly_at(store, now);
    aggregate_daily_at(store, now);
    prune_at(store, retention, now);
}

/// Roll raw heartbeats of the most recent fully elapsed hour into the hourly
/// tier.
pub fn aggregate_hourly_at(store: &Store, now: DateTime<Utc>) {
    let hour_end = truncate_to(now, 3600);
    let hour_start = hour_end - Duration::hours(1);

    let ids = match store.monitor_ids() {
        Ok(ids) => ids,
        Err(e) => {
            tracing::error!("Aggregation: failed to list monitors: {}", e);
            return;
        }
    };

    let mut aggregated = 0usize;
    for monitor_id in ids {
        match store.hourly_exists(monitor_id, hour_start) {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                tracing::error!("Aggregation: existence check failed for {}: {}", monitor_id, e);
                continue;
            }
        }

        let bucket = match store.aggregate_raw_window(monitor_id, hour_start, hour_end) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!("Aggregation: raw query failed for {}: {}", monitor_id, e);
                continue;
            }
        };
        if bucket.total_count == 0 {
            continue;
        }

        let uptime = bucket.up_count * 10000 / bucket.total_count;
        let avg_duration = if bucket.up_count > 0 {
            bucket.sum_duration / bucket.up_count
        } else {
            0
        };

        let row = HeartbeatHourly {
            id: 0,
            monitor_id,
            hour: hour_start,
            up_count: bucket.up_count,
            down_count: bucket.down_count,
            total_count: bucket.total_count,
            sum_duration: bucket.sum_duration,
            avg_duration,
            min_duration: bucket.min_duration,
            max_duration: bucket.max_duration,
            uptime,
        };
        if let Err(e) = store.insert_hourly(&row) {
            tracing::error!(
                "Aggregation: hourly insert failed for monitor {}: {}",
                monitor_id,
                e
            );
        } else {
            aggregated += 1;
        }
    }

    if aggregated > 0 {
        tracing::info!(
            "Created {} hourly aggregates for hour {}",
            aggregated,
            hour_start.format("%Y-%m-%d %H:%M")
        );
    }
}

/// Roll yesterday's hourly rows into the daily tier using weighted averages.
pub fn aggregate_daily_at(store: &Store, now: DateTime<Utc>) {
    let today = truncate_to(now, 86400);
    let yesterday = today - Duration::days(1);

    let ids = match store.monitor_ids() {
        Ok(ids) => ids,
        Err(e) => {
            tracing::error!("Aggregation: failed to list monitors: {}", e);
            return;
        }
    };

    let mut aggregated = 0usize;
    for monitor_id in ids {
        match store.daily_exists(monitor_id, yesterday) {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                tracing::error!("Aggregation: existence check failed for {}: {}", monitor_id, e);
                continue;
            }
        }

        let bucket = match store.aggregate_hourly_window(monitor_id, yesterday, today) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!("Aggregation: hourly query failed for {}: {}", monitor_id, e);
                continue;
            }
        };
        if bucket.total_count == 0 {
            continue;
        }

        let uptime = bucket.up_count * 10000 / bucket.total_count;
        // Weighted by up_count so hours with more samples count proportionally.
        let avg_duration = if bucket.up_count > 0 {
            bucket.sum_duration / bucket.up_count
        } else {
            0
        };

        let row = HeartbeatDaily {
            id: 0,
            monitor_id,
            date: yesterday,
            up_count: bucket.up_count,
            down_count: bucket.down_count,
            total_count: bucket.total_count,
            sum_duration: bucket.sum_duration,
            avg_duration,
            min_duration: bucket.min_duration,
            max_duration: bucket.max_duration,
            uptime,
        };
        if let Err(e) = store.insert_daily(&row) {
            tracing::error!(
                "Aggregation: daily insert failed for monitor {}: {}",
                monitor_id,
                e
            );
        } else {
            aggregated += 1;
        }
    }

    if aggregated > 0 {
        tracing::info!(
            "Created {} daily aggregates for {}",
            aggregated,
            yesterday.format("%Y-%m-%d")
        );
    }
}

/// Delete rows older than each tier's retention horizon.
pub fn prune_at(store: &Store, retention: &RetentionConfig, now: DateTime<Utc>) {
    let raw_cutoff = now - Duration::hours(retention.effective_raw_hours());
    match store.prune_heartbeats_before(raw_cutoff) {
        Ok(n) if n > 0 => tracing::info!("Pruned {} raw heartbeats", n),
        Ok(_) => {}
        Err(e) => tracing::error!("Failed to prune raw heartbeats: {}", e),
    }

    let hourly_cutoff = now - Duration::days(retention.effective_hourly_days());
    match store.prune_hourly_before(hourly_cutoff) {
        Ok(n) if n > 0 => tracing::info!("Pruned {} hourly aggregates", n),
        Ok(_) => {}
        Err(e) => tracing::error!("Failed to prune hourly aggregates: {}", e),
    }

    let daily_cutoff = now - Duration::days(retention.effective_daily_days());
    match store.prune_daily_before(daily_cutoff) {
        Ok(n) if n > 0 => tracing::info!("Pruned {} daily aggregates", n),
        Ok(_) => {}
        Err(e) => tracing::error!("Failed to prune daily aggregates: {}", e),
    }
}

/// Truncate a timestamp down to a multiple of `window_secs`.
pub fn truncate_to(dt: DateTime<Utc>, window_secs: i64) -> DateTime<Utc> {
    let ts = dt.timestamp();
    let truncated = ts - ts.rem_euclid(window_secs);
    DateTime::from_timestamp(truncated, 0).unwrap_or(dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::*;
    use chrono::TimeZone;
    use tempfile::NamedTempFile;

    fn test_store() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::open(tmp.path()).unwrap();
        (tmp, store)
    }

    fn add_monitor(store: &Store, name: &str) -> i64 {
        let mut m = Monitor {
            name: name.to_string(),
            url: "https://example.com".to_string(),
            ..Default::default()
        };
        store.add_monitor(&mut m).unwrap()
    }

    fn seed_hour(store: &Store, monitor_id: i64, hour: DateTime<Utc>, up: usize, down: usize) {
        let mut beats = Vec::new();
        for i in 0..up {
            beats.push(Heartbeat {
                id: 0,
                monitor_id,
                status: STATUS_UP,
                message: "HTTP 200 OK".to_string(),
                time: hour + Duration::seconds(10 * i as i64),
                duration: 100,
            });
        }
        for i in 0..down {
            beats.push(Heartbeat {
                id: 0,
                monitor_id,
                status: STATUS_DOWN,
                message: "Timeout".to_string(),
                time: hour + Duration::seconds(1800 + 10 * i as i64),
                duration: 0,
            });
        }
        store.insert_heartbeats(&beats).unwrap();
    }

    #[test]
    fn test_truncate_to() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 1, 12, 34, 56).unwrap();
        assert_eq!(
            truncate_to(dt, 3600),
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
        );
        assert_eq!(
            truncate_to(dt, 86400),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_hourly_rollup_invariants() {
        let (_tmp, store) = test_store();
        let id = add_monitor(&store, "agg");
        let hour = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        seed_hour(&store, id, hour, 9, 1);

        let now = hour + Duration::hours(1) + Duration::minutes(5);
        aggregate_hourly_at(&store, now);

        let rows = store
            .hourly_rows_between(id, hour, hour + Duration::hours(1))
            .unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.up_count, 9);
        assert_eq!(row.down_count, 1);
        assert_eq!(row.total_count, 10);
        assert!(row.up_count + row.down_count <= row.total_count);
        assert_eq!(row.sum_duration, 900);
        assert_eq!(row.avg_duration, 100);
        assert_eq!(row.min_duration, 100);
        assert_eq!(row.max_duration, 100);
        assert_eq!(row.uptime, 9 * 10000 / 10);
    }

    #[test]
    fn test_hourly_rollup_idempotent() {
        let (_tmp, store) = test_store();
        let id = add_monitor(&store, "idem");
        let hour = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        seed_hour(&store, id, hour, 5, 0);

        let now = hour + Duration::hours(1) + Duration::minutes(1);
        aggregate_hourly_at(&store, now);
        aggregate_hourly_at(&store, now);

        let rows = store
            .hourly_rows_between(id, hour, hour + Duration::hours(1))
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_hourly_rollup_skips_empty_hour() {
        let (_tmp, store) = test_store();
        let id = add_monitor(&store, "empty");
        let hour = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let now = hour + Duration::hours(1);
        aggregate_hourly_at(&store, now);
        assert!(store
            .hourly_rows_between(id, hour, now)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_daily_rollup_weighted_average() {
        let (_tmp, store) = test_store();
        let id = add_monitor(&store, "daily");
        let day = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        // Hour A: 10 UP samples at 100ms. Hour B: 2 UP samples at 400ms.
        // Weighted average = (1000 + 800) / 12 = 150, not (100+400)/2.
        store
            .insert_hourly(&HeartbeatHourly {
                id: 0,
                monitor_id: id,
                hour: day,
                up_count: 10,
                down_count: 0,
                total_count: 10,
                sum_duration: 1000,
                avg_duration: 100,
                min_duration: 90,
                max_duration: 120,
                uptime: 10000,
            })
            .unwrap();
        store
            .insert_hourly(&HeartbeatHourly {
                id: 0,
                monitor_id: id,
                hour: day + Duration::hours(1),
                up_count: 2,
                down_count: 2,
                total_count: 4,
                sum_duration: 800,
                avg_duration: 400,
                min_duration: 350,
                max_duration: 450,
                uptime: 5000,
            })
            .unwrap();

        let now = day + Duration::days(1) + Duration::hours(2);
        aggregate_daily_at(&store, now);

        let rows = store
            .daily_rows_since(id, day - Duration::days(1))
            .unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.up_count, 12);
        assert_eq!(row.total_count, 14);
        assert_eq!(row.sum_duration, 1800);
        assert_eq!(row.avg_duration, 150);
        assert_eq!(row.uptime, 12 * 10000 / 14);
    }

    #[test]
    fn test_prune_respects_horizons() {
        let (_tmp, store) = test_store();
        let id = add_monitor(&store, "prune");
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        store
            .insert_heartbeats(&[
                Heartbeat {
                    id: 0,
                    monitor_id: id,
                    status: STATUS_UP,
                    message: String::new(),
                    time: now - Duration::hours(30),
                    duration: 10,
                },
                Heartbeat {
                    id: 0,
                    monitor_id: id,
                    status: STATUS_UP,
                    message: String::new(),
                    time: now - Duration::hours(2),
                    duration: 10,
                },
            ])
            .unwrap();

        let retention = RetentionConfig::default();
        prune_at(&store, &retention, now);

        let remaining = store
            .heartbeats_since(id, now - Duration::days(30))
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].time, now - Duration::hours(2));
    }

    #[test]
    fn test_full_pass_twice_is_noop() {
        let (_tmp, store) = test_store();
        let id = add_monitor(&store, "force");
        let now = Utc.with_ymd_and_hms(2024, 6, 2, 10, 7, 0).unwrap();
        let hour = truncate_to(now, 3600) - Duration::hours(1);
        seed_hour(&store, id, hour, 6, 0);

        let retention = RetentionConfig::default();
        run_at(&store, &retention, now);
        let first = store
            .hourly_rows_between(id, hour, hour + Duration::hours(1))
            .unwrap();
        assert_eq!(first.len(), 1);

        // The second pass finds the existing row and does nothing.
        run_at(&store, &retention, now);
        let second = store
            .hourly_rows_between(id, hour, hour + Duration::hours(1))
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].id, second[0].id);
    }
}
