//! Notification state machine.
//!
//! A trigger worker consumes check results and applies per-(rule, monitor)
//! hysteresis: a status only becomes "hard" after N consecutive observations,
//! and only hard transitions email. A second worker ticks every minute and
//! sends daily reports at each schedule rule's wall-clock time.
//!
//! On process start every trigger rule is reset to inactive so a restart
//! cannot replay alerts from stale state; operators re-enable explicitly.

pub mod mailer;

pub use mailer::{EmailService, SentEmail};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};

use crate::config::RetentionConfig;
use crate::db::models::*;
use crate::db::{query, Store};

pub const NOTIFICATION_TYPE_TRIGGER: &str = "trigger";
pub const NOTIFICATION_TYPE_SCHEDULE: &str = "schedule";

/// Capacity of the scheduler -> notifier channel; publishes are non-blocking.
pub const CHECK_RESULT_BUFFER: usize = 1000;

/// One probe outcome as seen by the notifier.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub monitor_id: i64,
    pub name: String,
    pub url: String,
    pub status: i64,
    pub message: String,
}

/// Hysteresis counters for one (rule, monitor) pair.
#[derive(Debug, Clone, Default)]
pub struct NotificationState {
    pub consecutive_failures: i64,
    pub consecutive_successes: i64,
    pub last_sent_status: i64,
}

/// Shared map of hysteresis states keyed by `"{rule_id}_{monitor_id}"`.
#[derive(Clone, Default)]
pub struct NotifierStates(Arc<Mutex<HashMap<String, NotificationState>>>);

impl NotifierStates {
    fn key(rule_id: i64, monitor_id: i64) -> String {
        format!("{}_{}", rule_id, monitor_id)
    }

    /// Drop state for every monitor under one rule.
    pub fn reset_rule(&self, rule_id: i64) {
        let prefix = format!("{}_", rule_id);
        self.0
            .lock()
            .unwrap()
            .retain(|key, _| !key.starts_with(&prefix));
    }

    /// Drop state for one monitor across all rules.
    pub fn reset_monitor(&self, monitor_id: i64) {
        let suffix = format!("_{}", monitor_id);
        self.0
            .lock()
            .unwrap()
            .retain(|key, _| !key.ends_with(&suffix));
    }

    pub fn reset_all(&self) {
        self.0.lock().unwrap().clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    #[cfg(test)]
    pub fn insert_for_test(&self, key: &str) {
        self.0
            .lock()
            .unwrap()
            .insert(key.to_string(), NotificationState::default());
    }
}

#[derive(Debug, Deserialize, Default)]
struct TriggerConfig {
    #[serde(default)]
    monitor_name: String,
    #[serde(default)]
    on_status: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    max_retries: i64,
    #[serde(default)]
    max_retries_recovery: i64,
}

#[derive(Debug, Deserialize, Default)]
struct ScheduleConfig {
    #[serde(default)]
    time: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    timezone: String,
}

pub struct Notifier {
    store: Arc<Store>,
    retention: RetentionConfig,
    mailer: Arc<EmailService>,
    states: NotifierStates,
    stop: broadcast::Sender<()>,
}

impl Notifier {
    pub fn new(store: Arc<Store>, retention: RetentionConfig, mailer: Arc<EmailService>) -> Self {
        let (stop, _) = broadcast::channel(1);
        Self {
            store,
            retention,
            mailer,
            states: NotifierStates::default(),
            stop,
        }
    }

    /// Handle the scheduler uses to clean up state for stopped monitors.
    pub fn states(&self) -> NotifierStates {
        self.states.clone()
    }

    /// Reset trigger rules, then spawn the trigger and schedule workers.
    /// Returns the sender the scheduler publishes check results onto.
    pub fn start(self: &Arc<Self>) -> mpsc::Sender<CheckResult> {
        match self.store.deactivate_trigger_rules() {
            Ok(n) if n > 0 => {
                tracing::info!("Reset {} trigger notification rules to inactive", n)
            }
            Ok(_) => {}
            Err(e) => tracing::error!("Failed to reset trigger notifications: {}", e),
        }

        let (tx, rx) = mpsc::channel(CHECK_RESULT_BUFFER);

        let notifier = self.clone();
        tokio::spawn(run_trigger_worker(notifier, rx));

        let notifier = self.clone();
        tokio::spawn(run_schedule_worker(notifier));

        tx
    }

    pub fn stop(&self) {
        let _ = self.stop.send(());
    }

    /// Apply every active trigger rule to one check result.
    pub async fn process_check_result(&self, result: &CheckResult) {
        let rules = match self
            .store
            .active_notifications_of_kind(NOTIFICATION_TYPE_TRIGGER)
        {
            Ok(rules) => rules,
            Err(e) => {
                tracing::error!("Failed to fetch trigger rules: {}", e);
                return;
            }
        };

        for rule in rules {
            let cfg: TriggerConfig = match serde_json::from_str(&rule.config) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::error!("Bad trigger config for rule {}: {}", rule.id, e);
                    continue;
                }
            };

            if cfg.monitor_name != "*" && cfg.monitor_name != result.name {
                continue;
            }

            let key = NotifierStates::key(rule.id, result.monitor_id);
            let transition = {
                let mut states = self.states.0.lock().unwrap();
                match states.get_mut(&key) {
                    None => {
                        // First observation arms the pair silently.
                        states.insert(
                            key,
                            NotificationState {
                                last_sent_status: result.status,
                                ..Default::default()
                            },
                        );
                        None
                    }
                    Some(state) => evaluate_transition(
                        state,
                        result.status,
                        cfg.max_retries.max(1),
                        cfg.max_retries_recovery.max(1),
                    ),
                }
            };

            if let Some((old_status, new_status)) = transition {
                let should_notify = match cfg.on_status.as_str() {
                    "change" => true,
                    "down" => new_status == STATUS_DOWN,
                    "up" => new_status == STATUS_UP,
                    _ => false,
                };
                if should_notify && !cfg.email.is_empty() {
                    self.send_trigger_notification(
                        &cfg.email,
                        &result.name,
                        &result.url,
                        old_status,
                        new_status,
                        &result.message,
                    )
                    .await;
                }
            }
        }
    }

    async fn send_trigger_notification(
        &self,
        email: &str,
        name: &str,
        url: &str,
        old_status: i64,
        new_status: i64,
        message: &str,
    ) {
        let to = vec![email.to_string()];
        let subject = format!("PulseWatch Alert: {} is {}", name, status_label(new_status));
        let html = render_status_change(name, url, old_status, new_status, message);

        tracing::info!("Sending trigger email to {} for {}", email, name);
        // Delivery failure does not roll back the hysteresis state; the
        // observable status changed regardless.
        if let Err(e) = self.mailer.send_with_retry(&to, &subject, &html).await {
            tracing::error!("Failed to send trigger email to {}: {}", email, e);
        }
    }

    /// Evaluate schedule rules against the current minute.
    async fn run_schedule_tick(&self) {
        let rules = match self
            .store
            .active_notifications_of_kind(NOTIFICATION_TYPE_SCHEDULE)
        {
            Ok(rules) => rules,
            Err(e) => {
                tracing::error!("Failed to fetch schedule rules: {}", e);
                return;
            }
        };

        for rule in rules {
            let cfg: ScheduleConfig = match serde_json::from_str(&rule.config) {
                Ok(cfg) => cfg,
                Err(_) => continue,
            };
            if cfg.email.is_empty() || !schedule_rule_due(&cfg.time, &cfg.timezone) {
                continue;
            }
            tracing::info!(
                "Triggering scheduled report for {} at {} ({})",
                cfg.email,
                cfg.time,
                cfg.timezone
            );
            self.send_report(&cfg.email).await;
        }
    }

    /// Build and send the daily report from a snapshot of monitor rows.
    pub async fn send_report(&self, email: &str) {
        let monitors = match self.store.list_monitors() {
            Ok(monitors) => monitors,
            Err(e) => {
                tracing::error!("Failed to snapshot monitors for report: {}", e);
                return;
            }
        };

        let mut up = 0usize;
        let mut down = 0usize;
        let mut rows = String::new();
        let mut total_active = 0usize;

        for m in monitors.iter().filter(|m| m.active == 1) {
            total_active += 1;
            match m.status {
                STATUS_UP => up += 1,
                STATUS_DOWN => down += 1,
                _ => {}
            }
            let uptime_24h = query::uptime_stats(&self.store, &self.retention, m.id, 24);
            let avg_24h = query::avg_response(&self.store, &self.retention, m.id, 24);
            rows.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{:.2}%</td><td>{:.0} ms</td><td>{}</td></tr>",
                m.name,
                m.kind.to_uppercase(),
                uptime_24h,
                avg_24h,
                status_label(m.status),
            ));
        }

        let uptime_percent = if total_active > 0 {
            up as f64 / total_active as f64 * 100.0
        } else {
            0.0
        };

        let date = Utc::now().format("%Y-%m-%d");
        let subject = format!("PulseWatch Daily Report - {}", date);
        let html = format!(
            "<h2>Daily Report {}</h2>\
             <p>{} active monitors, {} up, {} down ({:.1}% availability)</p>\
             <table><tr><th>Name</th><th>Type</th><th>Uptime 24h</th>\
             <th>Avg Response 24h</th><th>Status</th></tr>{}</table>",
            date, total_active, up, down, uptime_percent, rows
        );

        if let Err(e) = self
            .mailer
            .send_with_retry(&[email.to_string()], &subject, &html)
            .await
        {
            tracing::error!("Failed to send report to {}: {}", email, e);
        }
    }
}

/// Update counters for one observation and report a hard-status transition as
/// `(old, new)`. Only definitive statuses move the counters; PENDING and
/// MAINTENANCE leave both the counters and the hard status alone.
fn evaluate_transition(
    state: &mut NotificationState,
    status: i64,
    threshold_down: i64,
    threshold_up: i64,
) -> Option<(i64, i64)> {
    if status == STATUS_DOWN {
        state.consecutive_failures += 1;
        state.consecutive_successes = 0;
    } else if status == STATUS_UP {
        state.consecutive_successes += 1;
        state.consecutive_failures = 0;
    }

    let mut hard = state.last_sent_status;
    if status == STATUS_DOWN && state.consecutive_failures >= threshold_down {
        hard = STATUS_DOWN;
    } else if status == STATUS_UP && state.consecutive_successes >= threshold_up {
        hard = STATUS_UP;
    }

    if hard != state.last_sent_status {
        let old = state.last_sent_status;
        state.last_sent_status = hard;
        Some((old, hard))
    } else {
        None
    }
}

/// True when the rule's `HH:MM` matches the current minute in its timezone.
/// Unloadable timezones fall back to local time.
fn schedule_rule_due(time: &str, timezone: &str) -> bool {
    let now = Utc::now();
    let hhmm = if timezone.is_empty() {
        now.with_timezone(&chrono::Local).format("%H:%M").to_string()
    } else {
        match timezone.parse::<chrono_tz::Tz>() {
            Ok(tz) => now.with_timezone(&tz).format("%H:%M").to_string(),
            Err(_) => {
                tracing::error!("Failed to load timezone {}", timezone);
                now.with_timezone(&chrono::Local).format("%H:%M").to_string()
            }
        }
    };
    time == hhmm
}

fn render_status_change(
    name: &str,
    url: &str,
    old_status: i64,
    new_status: i64,
    message: &str,
) -> String {
    format!(
        "<h2>{} is {}</h2>\
         <p>Status changed from {} to {}</p>\
         <p>URL: {}</p>\
         <p>{}</p>\
         <p>{}</p>",
        name,
        status_label(new_status),
        status_label(old_status),
        status_label(new_status),
        url,
        message,
        Utc::now().format("%Y-%m-%d %H:%M:%S"),
    )
}

async fn run_trigger_worker(notifier: Arc<Notifier>, mut rx: mpsc::Receiver<CheckResult>) {
    tracing::info!("Notification worker started");
    let mut stop_rx = notifier.stop.subscribe();
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Some(result) => notifier.process_check_result(&result).await,
                    None => break,
                }
            }
            _ = stop_rx.recv() => {
                tracing::info!("Notification worker stopped");
                break;
            }
        }
    }
}

async fn run_schedule_worker(notifier: Arc<Notifier>) {
    tracing::info!("Scheduled worker started");
    let mut stop_rx = notifier.stop.subscribe();
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    // The first tick fires immediately; skip it so a restart at 09:00 does not
    // double-send a 09:00 report.
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => notifier.run_schedule_tick().await,
            _ = stop_rx.recv() => {
                tracing::info!("Scheduled worker stopped");
                break;
            }
        }
    }
}
