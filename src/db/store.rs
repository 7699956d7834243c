//! SQLite store: monitors, raw heartbeats, hourly/daily aggregates,
//! notification rules.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
}

/// Aggregate counters over a time window, produced by a single grouped query.
#[derive(Debug, Clone, Default)]
pub struct AggBucket {
    pub up_count: i64,
    pub down_count: i64,
    pub total_count: i64,
    pub sum_duration: i64,
    pub min_duration: i64,
    pub max_duration: i64,
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at the given path and run migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    // --- Monitor CRUD ---

    /// Insert a new monitor and return its id.
    pub fn add_monitor(&self, m: &mut Monitor) -> Result<i64, DbError> {
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO monitors (name, url, type, method, body, headers, form_data, timeout,
                                   expected_status, response_regex, follow_redirects, interval,
                                   active, status, message, last_check, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                m.name,
                m.url,
                m.kind,
                m.method,
                m.body,
                m.headers,
                m.form_data,
                m.timeout,
                m.expected_status,
                m.response_regex,
                m.follow_redirects as i64,
                m.interval,
                m.active,
                m.status,
                m.message,
                m.last_check.map(fmt_time),
                fmt_time(now),
                fmt_time(now),
            ],
        )?;
        let id = conn.last_insert_rowid();
        m.id = id;
        m.created_at = now;
        m.updated_at = now;
        Ok(id)
    }

    /// Update every configurable column of a monitor.
    pub fn update_monitor(&self, m: &Monitor) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE monitors SET name=?1, url=?2, type=?3, method=?4, body=?5, headers=?6,
                                 form_data=?7, timeout=?8, expected_status=?9, response_regex=?10,
                                 follow_redirects=?11, interval=?12, active=?13, updated_at=?14
             WHERE id=?15",
            params![
                m.name,
                m.url,
                m.kind,
                m.method,
                m.body,
                m.headers,
                m.form_data,
                m.timeout,
                m.expected_status,
                m.response_regex,
                m.follow_redirects as i64,
                m.interval,
                m.active,
                fmt_time(Utc::now()),
                m.id,
            ],
        )?;
        Ok(())
    }

    /// Update only the observed-state columns, leaving configuration alone so
    /// concurrent edits are not clobbered.
    pub fn update_monitor_status(
        &self,
        id: i64,
        status: i64,
        message: &str,
        last_check: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE monitors SET status=?1, message=?2, last_check=?3 WHERE id=?4",
            params![status, message, fmt_time(last_check), id],
        )?;
        Ok(())
    }

    pub fn set_monitor_active(&self, id: i64, active: i64) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE monitors SET active=?1, updated_at=?2 WHERE id=?3",
            params![active, fmt_time(Utc::now()), id],
        )?;
        Ok(())
    }

    pub fn get_monitor(&self, id: i64) -> Result<Monitor, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {} FROM monitors WHERE id = ?1", MONITOR_COLUMNS),
            params![id],
            monitor_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    pub fn list_monitors(&self) -> Result<Vec<Monitor>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare(&format!("SELECT {} FROM monitors ORDER BY id", MONITOR_COLUMNS))?;
        let monitors = stmt
            .query_map([], monitor_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(monitors)
    }

    pub fn monitor_ids(&self) -> Result<Vec<i64>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id FROM monitors ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(ids)
    }

    /// Count monitors carrying `name`, excluding `exclude_id` (pass 0 for none).
    pub fn count_monitors_named(&self, name: &str, exclude_id: i64) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM monitors WHERE name = ?1 AND id != ?2",
            params![name, exclude_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Delete a monitor and every heartbeat tier referencing it.
    pub fn delete_monitor(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM heartbeats WHERE monitor_id = ?1", params![id])?;
        conn.execute(
            "DELETE FROM heartbeats_hourly WHERE monitor_id = ?1",
            params![id],
        )?;
        conn.execute(
            "DELETE FROM heartbeats_daily WHERE monitor_id = ?1",
            params![id],
        )?;
        conn.execute("DELETE FROM monitors WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Delete heartbeat history across all tiers, keeping the monitor itself.
    pub fn clear_monitor_events(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM heartbeats WHERE monitor_id = ?1", params![id])?;
        conn.execute(
            "DELETE FROM heartbeats_hourly WHERE monitor_id = ?1",
            params![id],
        )?;
        conn.execute(
            "DELETE FROM heartbeats_daily WHERE monitor_id = ?1",
            params![id],
        )?;
        Ok(())
    }

    // --- Raw heartbeats ---

    /// Insert heartbeats in a single transaction.
    pub fn insert_heartbeats(&self, batch: &[Heartbeat]) -> Result<(), DbError> {
        if batch.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO heartbeats (monitor_id, status, message, time, duration)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for h in batch {
                stmt.execute(params![
                    h.monitor_id,
                    h.status,
                    h.message,
                    fmt_time(h.time),
                    h.duration,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Most recent heartbeats, newest first.
    pub fn recent_heartbeats(&self, monitor_id: i64, limit: i64) -> Result<Vec<Heartbeat>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, monitor_id, status, message, time, duration FROM heartbeats
             WHERE monitor_id = ?1 ORDER BY time DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![monitor_id, limit], heartbeat_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// Last `limit` raw statuses, newest first.
    pub fn recent_statuses(&self, monitor_id: i64, limit: i64) -> Result<Vec<i64>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT status FROM heartbeats WHERE monitor_id = ?1 ORDER BY time DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![monitor_id, limit], |row| row.get(0))?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// Heartbeats at or after `since`, newest first.
    pub fn heartbeats_since(
        &self,
        monitor_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<Heartbeat>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, monitor_id, status, message, time, duration FROM heartbeats
             WHERE monitor_id = ?1 AND time >= ?2 ORDER BY time DESC",
        )?;
        let rows = stmt
            .query_map(params![monitor_id, fmt_time(since)], heartbeat_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// `(up, total)` over raw heartbeats at or after `since`.
    pub fn raw_counts_since(
        &self,
        monitor_id: i64,
        since: DateTime<Utc>,
    ) -> Result<(i64, i64), DbError> {
        let conn = self.conn.lock().unwrap();
        let counts = conn.query_row(
            "SELECT COALESCE(SUM(CASE WHEN status = 1 THEN 1 ELSE 0 END), 0), COUNT(*)
             FROM heartbeats WHERE monitor_id = ?1 AND time >= ?2",
            params![monitor_id, fmt_time(since)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(counts)
    }

    /// Mean duration over successful heartbeats with a non-zero duration.
    pub fn raw_avg_duration_since(
        &self,
        monitor_id: i64,
        since: DateTime<Utc>,
    ) -> Result<f64, DbError> {
        let conn = self.conn.lock().unwrap();
        let avg = conn.query_row(
            "SELECT COALESCE(AVG(duration), 0) FROM heartbeats
             WHERE monitor_id = ?1 AND time >= ?2 AND status = 1 AND duration > 0",
            params![monitor_id, fmt_time(since)],
            |row| row.get(0),
        )?;
        Ok(avg)
    }

    /// Grouped counters over raw heartbeats in `[start, end)`.
    pub fn aggregate_raw_window(
        &self,
        monitor_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AggBucket, DbError> {
        let conn = self.conn.lock().unwrap();
        let bucket = conn.query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN status = 1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 0 THEN 1 ELSE 0 END), 0),
                COUNT(*),
                COALESCE(SUM(CASE WHEN status = 1 THEN duration ELSE 0 END), 0),
                COALESCE(MIN(CASE WHEN status = 1 THEN duration ELSE NULL END), 0),
                COALESCE(MAX(CASE WHEN status = 1 THEN duration ELSE NULL END), 0)
             FROM heartbeats
             WHERE monitor_id = ?1 AND time >= ?2 AND time < ?3",
            params![monitor_id, fmt_time(start), fmt_time(end)],
            |row| {
                Ok(AggBucket {
                    up_count: row.get(0)?,
                    down_count: row.get(1)?,
                    total_count: row.get(2)?,
                    sum_duration: row.get(3)?,
                    min_duration: row.get(4)?,
                    max_duration: row.get(5)?,
                })
            },
        )?;
        Ok(bucket)
    }

    pub fn prune_heartbeats_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM heartbeats WHERE time < ?1",
            params![fmt_time(cutoff)],
        )?;
        Ok(n)
    }

    // --- Hourly aggregates ---

    pub fn hourly_exists(&self, monitor_id: i64, hour: DateTime<Utc>) -> Result<bool, DbError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM heartbeats_hourly WHERE monitor_id = ?1 AND hour = ?2",
            params![monitor_id, fmt_time(hour)],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn insert_hourly(&self, row: &HeartbeatHourly) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO heartbeats_hourly (monitor_id, hour, up_count, down_count, total_count,
                                            sum_duration, avg_duration, min_duration, max_duration, uptime)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                row.monitor_id,
                fmt_time(row.hour),
                row.up_count,
                row.down_count,
                row.total_count,
                row.sum_duration,
                row.avg_duration,
                row.min_duration,
                row.max_duration,
                row.uptime,
            ],
        )?;
        Ok(())
    }

    /// Hourly rows in `[from, to)`, oldest first.
    pub fn hourly_rows_between(
        &self,
        monitor_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<HeartbeatHourly>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, monitor_id, hour, up_count, down_count, total_count, sum_duration,
                    avg_duration, min_duration, max_duration, uptime
             FROM heartbeats_hourly
             WHERE monitor_id = ?1 AND hour >= ?2 AND hour < ?3 ORDER BY hour ASC",
        )?;
        let rows = stmt
            .query_map(
                params![monitor_id, fmt_time(from), fmt_time(to)],
                hourly_from_row,
            )?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// Hourly rows strictly after `since`, newest first.
    pub fn hourly_rows_since(
        &self,
        monitor_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<HeartbeatHourly>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, monitor_id, hour, up_count, down_count, total_count, sum_duration,
                    avg_duration, min_duration, max_duration, uptime
             FROM heartbeats_hourly
             WHERE monitor_id = ?1 AND hour > ?2 ORDER BY hour DESC",
        )?;
        let rows = stmt
            .query_map(params![monitor_id, fmt_time(since)], hourly_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// `(up_sum, total_sum)` over hourly rows with `from <= hour < to`.
    pub fn hourly_counts_between(
        &self,
        monitor_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<(i64, i64), DbError> {
        let conn = self.conn.lock().unwrap();
        let counts = conn.query_row(
            "SELECT COALESCE(SUM(up_count), 0), COALESCE(SUM(total_count), 0)
             FROM heartbeats_hourly
             WHERE monitor_id = ?1 AND hour >= ?2 AND hour < ?3",
            params![monitor_id, fmt_time(from), fmt_time(to)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(counts)
    }

    /// `(sum_duration, up_count)` totals over hourly rows at or after `since`.
    pub fn hourly_weighted_since(
        &self,
        monitor_id: i64,
        since: DateTime<Utc>,
    ) -> Result<(i64, i64), DbError> {
        let conn = self.conn.lock().unwrap();
        let totals = conn.query_row(
            "SELECT COALESCE(SUM(sum_duration), 0), COALESCE(SUM(up_count), 0)
             FROM heartbeats_hourly WHERE monitor_id = ?1 AND hour >= ?2",
            params![monitor_id, fmt_time(since)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(totals)
    }

    /// Grouped counters over hourly rows in `[start, end)`, for the daily roll-up.
    pub fn aggregate_hourly_window(
        &self,
        monitor_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AggBucket, DbError> {
        let conn = self.conn.lock().unwrap();
        let bucket = conn.query_row(
            "SELECT
                COALESCE(SUM(up_count), 0),
                COALESCE(SUM(down_count), 0),
                COALESCE(SUM(total_count), 0),
                COALESCE(SUM(sum_duration), 0),
                COALESCE(MIN(min_duration), 0),
                COALESCE(MAX(max_duration), 0)
             FROM heartbeats_hourly
             WHERE monitor_id = ?1 AND hour >= ?2 AND hour < ?3",
            params![monitor_id, fmt_time(start), fmt_time(end)],
            |row| {
                Ok(AggBucket {
                    up_count: row.get(0)?,
                    down_count: row.get(1)?,
                    total_count: row.get(2)?,
                    sum_duration: row.get(3)?,
                    min_duration: row.get(4)?,
                    max_duration: row.get(5)?,
                })
            },
        )?;
        Ok(bucket)
    }

    pub fn prune_hourly_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM heartbeats_hourly WHERE hour < ?1",
            params![fmt_time(cutoff)],
        )?;
        Ok(n)
    }

    // --- Daily aggregates ---

    pub fn daily_exists(&self, monitor_id: i64, date: DateTime<Utc>) -> Result<bool, DbError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM heartbeats_daily WHERE monitor_id = ?1 AND date = ?2",
            params![monitor_id, fmt_time(date)],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn insert_daily(&self, row: &HeartbeatDaily) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO heartbeats_daily (monitor_id, date, up_count, down_count, total_count,
                                           sum_duration, avg_duration, min_duration, max_duration, uptime)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                row.monitor_id,
                fmt_time(row.date),
                row.up_count,
                row.down_count,
                row.total_count,
                row.sum_duration,
                row.avg_duration,
                row.min_duration,
                row.max_duration,
                row.uptime,
            ],
        )?;
        Ok(())
    }

    /// Daily rows strictly after `since`, newest first.
    pub fn daily_rows_since(
        &self,
        monitor_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<HeartbeatDaily>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, monitor_id, date, up_count, down_count, total_count, sum_duration,
                    avg_duration, min_duration, max_duration, uptime
             FROM heartbeats_daily
             WHERE monitor_id = ?1 AND date > ?2 ORDER BY date DESC",
        )?;
        let rows = stmt
            .query_map(params![monitor_id, fmt_time(since)], daily_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// `(up_sum, total_sum)` over daily rows with `from <= date < to`.
    pub fn daily_counts_between(
        &self,
        monitor_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<(i64, i64), DbError> {
        let conn = self.conn.lock().unwrap();
        let counts = conn.query_row(
            "SELECT COALESCE(SUM(up_count), 0), COALESCE(SUM(total_count), 0)
             FROM heartbeats_daily
             WHERE monitor_id = ?1 AND date >= ?2 AND date < ?3",
            params![monitor_id, fmt_time(from), fmt_time(to)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(counts)
    }

    /// `(sum_duration, up_count)` totals over daily rows at or after `since`.
    pub fn daily_weighted_since(
        &self,
        monitor_id: i64,
        since: DateTime<Utc>,
    ) -> Result<(i64, i64), DbError> {
        let conn = self.conn.lock().unwrap();
        let totals = conn.query_row(
            "SELECT COALESCE(SUM(sum_duration), 0), COALESCE(SUM(up_count), 0)
             FROM heartbeats_daily WHERE monitor_id = ?1 AND date >= ?2",
            params![monitor_id, fmt_time(since)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(totals)
    }

    pub fn prune_daily_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM heartbeats_daily WHERE date < ?1",
            params![fmt_time(cutoff)],
        )?;
        Ok(n)
    }

    // --- Notification rules ---

    pub fn add_notification(&self, n: &mut Notification) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO notifications (name, type, config, active) VALUES (?1, ?2, ?3, ?4)",
            params![n.name, n.kind, n.config, n.active as i64],
        )?;
        let id = conn.last_insert_rowid();
        n.id = id;
        Ok(id)
    }

    pub fn update_notification(&self, n: &Notification) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE notifications SET name=?1, type=?2, config=?3, active=?4 WHERE id=?5",
            params![n.name, n.kind, n.config, n.active as i64, n.id],
        )?;
        Ok(())
    }

    pub fn get_notification(&self, id: i64) -> Result<Notification, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, name, type, config, active FROM notifications WHERE id = ?1",
            params![id],
            notification_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    pub fn list_notifications(&self) -> Result<Vec<Notification>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT id, name, type, config, active FROM notifications ORDER BY id")?;
        let rows = stmt
            .query_map([], notification_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// Active rules of one kind (`trigger` or `schedule`).
    pub fn active_notifications_of_kind(&self, kind: &str) -> Result<Vec<Notification>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, type, config, active FROM notifications
             WHERE type = ?1 AND active = 1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![kind], notification_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn delete_notification(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM notifications WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn set_notification_active(&self, id: i64, active: bool) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE notifications SET active=?1 WHERE id=?2",
            params![active as i64, id],
        )?;
        Ok(())
    }

    /// Force every trigger rule inactive; returns the number of rows touched.
    pub fn deactivate_trigger_rules(&self) -> Result<usize, DbError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE notifications SET active = 0 WHERE type = 'trigger'",
            [],
        )?;
        Ok(n)
    }
}

const MONITOR_COLUMNS: &str = "id, name, url, type, method, body, headers, form_data, timeout, \
     expected_status, response_regex, follow_redirects, interval, active, status, message, \
     last_check, created_at, updated_at";

fn notification_from_row(row: &rusqlite::Row<'_>) -> SqlResult<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: row.get(2)?,
        config: row.get(3)?,
        active: row.get::<_, i64>(4)? != 0,
    })
}

fn monitor_from_row(row: &rusqlite::Row<'_>) -> SqlResult<Monitor> {
    let last_check: Option<String> = row.get(16)?;
    let created_at: String = row.get(17)?;
    let updated_at: String = row.get(18)?;
    Ok(Monitor {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        kind: row.get(3)?,
        method: row.get(4)?,
        body: row.get(5)?,
        headers: row.get(6)?,
        form_data: row.get(7)?,
        timeout: row.get(8)?,
        expected_status: row.get(9)?,
        response_regex: row.get(10)?,
        follow_redirects: row.get::<_, i64>(11)? != 0,
        interval: row.get(12)?,
        active: row.get(13)?,
        status: row.get(14)?,
        message: row.get(15)?,
        last_check: last_check.as_deref().and_then(parse_db_time),
        created_at: parse_db_time(&created_at).unwrap_or_else(Utc::now),
        updated_at: parse_db_time(&updated_at).unwrap_or_else(Utc::now),
    })
}

fn heartbeat_from_row(row: &rusqlite::Row<'_>) -> SqlResult<Heartbeat> {
    let time: String = row.get(4)?;
    Ok(Heartbeat {
        id: row.get(0)?,
        monitor_id: row.get(1)?,
        status: row.get(2)?,
        message: row.get(3)?,
        time: parse_db_time(&time).unwrap_or_else(Utc::now),
        duration: row.get(5)?,
    })
}

fn hourly_from_row(row: &rusqlite::Row<'_>) -> SqlResult<HeartbeatHourly> {
    let hour: String = row.get(2)?;
    Ok(HeartbeatHourly {
        id: row.get(0)?,
        monitor_id: row.get(1)?,
        hour: parse_db_time(&hour).unwrap_or_else(Utc::now),
        up_count: row.get(3)?,
        down_count: row.get(4)?,
        total_count: row.get(5)?,
        sum_duration: row.get(6)?,
        avg_duration: row.get(7)?,
        min_duration: row.get(8)?,
        max_duration: row.get(9)?,
        uptime: row.get(10)?,
    })
}

fn daily_from_row(row: &rusqlite::Row<'_>) -> SqlResult<HeartbeatDaily> {
    let date: String = row.get(2)?;
    Ok(HeartbeatDaily {
        id: row.get(0)?,
        monitor_id: row.get(1)?,
        date: parse_db_time(&date).unwrap_or_else(Utc::now),
        up_count: row.get(3)?,
        down_count: row.get(4)?,
        total_count: row.get(5)?,
        sum_duration: row.get(6)?,
        avg_duration: row.get(7)?,
        min_duration: row.get(8)?,
        max_duration: row.get(9)?,
        uptime: row.get(10)?,
    })
}

/// Format a timestamp the way it is stored and compared in the database.
pub fn fmt_time(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S%.9f").to_string()
}

/// Parse a datetime string from the database.
pub fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        "%Y-%m-%d %H:%M:%S%.9f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}
