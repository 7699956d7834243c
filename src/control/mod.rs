//! Control surface: the admin operations behind the external transport.
//!
//! Callers arrive already authenticated; payloads are loosely-typed JSON maps
//! coerced through [`payload`]. Every operation returns a response struct, a
//! validation failure never mutates anything.

pub mod payload;

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::config::RetentionConfig;
use crate::db::models::*;
use crate::db::{aggregation, DbError, Store};
use crate::notifier::{EmailService, NotifierStates};
use crate::probe::{self, Resolver};
use crate::scheduler::{Scheduler, MIN_MONITOR_INTERVAL};

use payload::{get_bool, get_i64, get_string};

const RECENT_RESULTS_LEN: usize = 30;
const TEST_MESSAGE_CAP: usize = 50_000;

#[derive(Debug, Clone, Serialize)]
pub struct ControlResponse {
    pub ok: bool,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none", rename = "monitorID")]
    pub monitor_id: Option<i64>,
}

impl ControlResponse {
    fn ok(msg: &str) -> Self {
        Self {
            ok: true,
            msg: msg.to_string(),
            monitor_id: None,
        }
    }

    fn ok_with_id(msg: &str, id: i64) -> Self {
        Self {
            ok: true,
            msg: msg.to_string(),
            monitor_id: Some(id),
        }
    }

    fn fail(msg: &str) -> Self {
        Self {
            ok: false,
            msg: msg.to_string(),
            monitor_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleResponse {
    pub ok: bool,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestResponse {
    pub ok: bool,
    pub status: i64,
    pub msg: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub msg: String,
    pub imported: usize,
    pub skipped: usize,
    #[serde(rename = "skippedNames")]
    pub skipped_names: Vec<String>,
}

/// List-view row: configuration plus observed state and the last 30 raw
/// statuses (oldest first, left-padded with -1).
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSummary {
    pub id: i64,
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub interval: i64,
    pub active: i64,
    pub status: i64,
    #[serde(rename = "msg")]
    pub message: String,
    pub last_check: Option<DateTime<Utc>>,
    #[serde(rename = "recentResults")]
    pub recent_results: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorDetail {
    #[serde(flatten)]
    pub monitor: Monitor,
    #[serde(rename = "recentResults")]
    pub recent_results: Vec<i64>,
}

/// Exported monitor configuration: probe settings only, no observed state.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorExport {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub method: String,
    pub body: String,
    pub headers: String,
    pub form_data: String,
    pub timeout: i64,
    pub expected_status: i64,
    pub response_regex: String,
    pub follow_redirects: bool,
    pub interval: i64,
    pub active: i64,
}

impl From<&Monitor> for MonitorExport {
    fn from(m: &Monitor) -> Self {
        Self {
            name: m.name.clone(),
            url: m.url.clone(),
            kind: m.kind.clone(),
            method: m.method.clone(),
            body: m.body.clone(),
            headers: m.headers.clone(),
            form_data: m.form_data.clone(),
            timeout: m.timeout,
            expected_status: m.expected_status,
            response_regex: m.response_regex.clone(),
            follow_redirects: m.follow_redirects,
            interval: m.interval,
            active: m.active,
        }
    }
}

pub struct ControlSurface {
    store: Arc<Store>,
    scheduler: Arc<Scheduler>,
    resolver: Arc<Resolver>,
    retention: RetentionConfig,
    mailer: Arc<EmailService>,
    notifier_states: NotifierStates,
}

impl ControlSurface {
    pub fn new(
        store: Arc<Store>,
        scheduler: Arc<Scheduler>,
        resolver: Arc<Resolver>,
        retention: RetentionConfig,
        mailer: Arc<EmailService>,
        notifier_states: NotifierStates,
    ) -> Self {
        Self {
            store,
            scheduler,
            resolver,
            retention,
            mailer,
            notifier_states,
        }
    }

    // --- Monitor operations ---

    pub fn list_monitors(&self) -> Result<Vec<MonitorSummary>, DbError> {
        let monitors = self.store.list_monitors()?;
        Ok(monitors
            .iter()
            .map(|m| MonitorSummary {
                id: m.id,
                name: m.name.clone(),
                url: m.url.clone(),
                kind: m.kind.clone(),
                interval: m.interval,
                active: m.active,
                status: m.status,
                message: m.message.clone(),
                last_check: m.last_check,
                recent_results: self.recent_results(m.id),
            })
            .collect())
    }

    pub fn get_monitor(&self, id: i64) -> Result<MonitorDetail, DbError> {
        let monitor = self.store.get_monitor(id)?;
        let recent_results = self.recent_results(id);
        Ok(MonitorDetail {
            monitor,
            recent_results,
        })
    }

    fn recent_results(&self, id: i64) -> Vec<i64> {
        let mut statuses = self
            .store
            .recent_statuses(id, RECENT_RESULTS_LEN as i64)
            .unwrap_or_default();
        while statuses.len() < RECENT_RESULTS_LEN {
            statuses.push(STATUS_NONE);
        }
        statuses.reverse();
        statuses
    }

    pub fn create_monitor(&self, data: &Value) -> ControlResponse {
        let name = get_string(data, "name");
        if name.is_empty() {
            return ControlResponse::fail("Name is required");
        }

        match self.store.count_monitors_named(&name, 0) {
            Ok(0) => {}
            Ok(_) => return ControlResponse::fail("A monitor with this name already exists"),
            Err(e) => return ControlResponse::fail(&format!("Failed to add monitor: {}", e)),
        }

        let mut m = monitor_from_payload(data, Monitor::default());
        m.name = name;
        m.status = STATUS_PENDING;
        m.active = 1;
        if m.interval < MIN_MONITOR_INTERVAL {
            m.interval = MIN_MONITOR_INTERVAL;
        }

        if let Err(e) = self.store.add_monitor(&mut m) {
            return ControlResponse::fail(&format!("Failed to add monitor: {}", e));
        }
        self.scheduler.start_monitor(&m);
        ControlResponse::ok_with_id("Added successfully", m.id)
    }

    pub fn edit_monitor(&self, data: &Value) -> ControlResponse {
        let id = match get_i64(data, "id") {
            Some(id) => id,
            None => return ControlResponse::fail("Monitor id is required"),
        };
        let existing = match self.store.get_monitor(id) {
            Ok(m) => m,
            Err(_) => return ControlResponse::fail("Monitor not found"),
        };
        let old_active = existing.active;

        let new_name = get_string(data, "name");
        if new_name.is_empty() {
            return ControlResponse::fail("Name is required");
        }
        if existing.name != new_name {
            match self.store.count_monitors_named(&new_name, id) {
                Ok(0) => {}
                Ok(_) => return ControlResponse::fail("A monitor with this name already exists"),
                Err(e) => return ControlResponse::fail(&format!("Failed to edit monitor: {}", e)),
            }
        }

        let mut m = monitor_from_payload(data, existing);
        m.id = id;
        m.name = new_name;
        // Edits may change active; default keeps the current value.
        if let Some(active) = get_i64(data, "active") {
            m.active = active;
        }
        if m.interval < MIN_MONITOR_INTERVAL {
            m.interval = MIN_MONITOR_INTERVAL;
        }

        if let Err(e) = self.store.update_monitor(&m) {
            return ControlResponse::fail(&format!("Failed to edit monitor: {}", e));
        }

        if old_active != m.active {
            if m.active == 0 {
                self.scheduler.stop_monitor(m.id);
            } else {
                self.scheduler.start_monitor(&m);
            }
        } else if m.active == 1 {
            // Restart so a changed interval takes effect immediately.
            self.scheduler.stop_monitor(m.id);
            self.scheduler.start_monitor(&m);
        }

        ControlResponse::ok_with_id("Saved successfully", m.id)
    }

    pub fn toggle_active(&self, id: i64, active: i64) -> ControlResponse {
        let mut m = match self.store.get_monitor(id) {
            Ok(m) => m,
            Err(_) => return ControlResponse::fail("Monitor not found"),
        };
        let old_active = m.active;
        if let Err(e) = self.store.set_monitor_active(id, active) {
            return ControlResponse::fail(&e.to_string());
        }
        if old_active != active {
            if active == 0 {
                self.scheduler.stop_monitor(id);
            } else {
                m.active = active;
                self.scheduler.start_monitor(&m);
            }
        }
        ControlResponse::ok("")
    }

    pub fn delete_monitor(&self, id: i64) -> ControlResponse {
        self.scheduler.stop_monitor(id);
        match self.store.delete_monitor(id) {
            Ok(()) => ControlResponse::ok("Deleted successfully"),
            Err(e) => ControlResponse::fail(&format!("Failed to delete monitor: {}", e)),
        }
    }

    pub fn clear_events(&self, id: i64) -> ControlResponse {
        match self.store.clear_monitor_events(id) {
            Ok(()) => ControlResponse::ok("All events and aggregated data cleared"),
            Err(e) => ControlResponse::fail(&format!("Failed to clear events: {}", e)),
        }
    }

    /// One-shot probe without persistence or scheduling.
    pub async fn test_monitor(&self, data: &Value) -> TestResponse {
        let mut m = monitor_from_payload(data, Monitor::default());
        m.name = get_string(data, "name");

        // Unsafe upload paths fail before any file or network I/O.
        if let Some(bad) = first_invalid_form_path(&m.form_data) {
            return TestResponse {
                ok: false,
                status: 0,
                msg: format!(
                    "Invalid file path: {} (must be relative and cannot contain '..')",
                    bad
                ),
            };
        }

        let (status, mut msg) = probe::run_test(&m, &self.resolver).await;
        if msg.len() > TEST_MESSAGE_CAP {
            let mut end = TEST_MESSAGE_CAP;
            while !msg.is_char_boundary(end) {
                end -= 1;
            }
            msg.truncate(end);
            msg.push_str("...");
        }
        TestResponse {
            ok: true,
            status,
            msg,
        }
    }

    pub fn export_monitors(&self) -> Result<Vec<MonitorExport>, DbError> {
        let monitors = self.store.list_monitors()?;
        Ok(monitors.iter().map(MonitorExport::from).collect())
    }

    /// Import a monitor list: required fields are validated, duplicates by
    /// name are skipped and reported, defaults are normalized, and active
    /// imports are scheduled.
    pub fn import_monitors(&self, items: &Value) -> ImportResponse {
        let monitors: Vec<Monitor> = match serde_json::from_value(items.clone()) {
            Ok(monitors) => monitors,
            Err(_) => {
                return ImportResponse {
                    ok: false,
                    msg: "Invalid JSON format".to_string(),
                    imported: 0,
                    skipped: 0,
                    skipped_names: Vec::new(),
                }
            }
        };

        let mut imported = 0usize;
        let mut skipped = 0usize;
        let mut skipped_names = Vec::new();

        for m in monitors {
            if m.name.is_empty() || m.url.is_empty() {
                continue;
            }
            match self.store.count_monitors_named(&m.name, 0) {
                Ok(0) => {}
                Ok(_) => {
                    skipped += 1;
                    skipped_names.push(m.name.clone());
                    continue;
                }
                Err(e) => {
                    tracing::error!("Import duplicate check failed for {}: {}", m.name, e);
                    continue;
                }
            }

            let mut new_monitor = Monitor {
                id: 0,
                name: m.name,
                url: m.url,
                kind: if is_valid_monitor_type(&m.kind) {
                    m.kind
                } else {
                    MONITOR_TYPE_HTTP.to_string()
                },
                method: if m.method.is_empty() {
                    "GET".to_string()
                } else {
                    m.method
                },
                body: m.body,
                headers: m.headers,
                form_data: sanitize_form_data(&m.form_data),
                timeout: if m.timeout < 1 { 10 } else { m.timeout },
                expected_status: m.expected_status,
                response_regex: m.response_regex,
                follow_redirects: m.follow_redirects,
                interval: if m.interval < 10 { 60 } else { m.interval },
                active: m.active,
                status: STATUS_PENDING,
                message: String::new(),
                last_check: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };

            if self.store.add_monitor(&mut new_monitor).is_ok() {
                imported += 1;
                if new_monitor.active == 1 {
                    self.scheduler.start_monitor(&new_monitor);
                }
            }
        }

        ImportResponse {
            ok: true,
            msg: String::new(),
            imported,
            skipped,
            skipped_names,
        }
    }

    /// Synchronous aggregation pass for admin use.
    pub fn force_aggregation(&self) {
        aggregation::force_aggregation(&self.store, &self.retention);
    }

    // --- Notification rule operations ---

    pub fn list_notifications(&self) -> Result<Vec<Notification>, DbError> {
        self.store.list_notifications()
    }

    pub fn add_notification(&self, data: &Value) -> RuleResponse {
        let mut n = Notification {
            id: 0,
            name: get_string(data, "name"),
            kind: get_string(data, "type"),
            config: data.to_string(),
            active: true,
        };
        match self.store.add_notification(&mut n) {
            Ok(id) => RuleResponse {
                ok: true,
                msg: "Notification added".to_string(),
                id: Some(id),
            },
            Err(e) => RuleResponse {
                ok: false,
                msg: format!("Failed to add notification: {}", e),
                id: None,
            },
        }
    }

    pub fn edit_notification(&self, data: &Value) -> RuleResponse {
        let id = match get_i64(data, "id") {
            Some(id) => id,
            None => {
                return RuleResponse {
                    ok: false,
                    msg: "Notification id is required".to_string(),
                    id: None,
                }
            }
        };
        let mut n = match self.store.get_notification(id) {
            Ok(n) => n,
            Err(_) => {
                return RuleResponse {
                    ok: false,
                    msg: "Notification not found".to_string(),
                    id: None,
                }
            }
        };

        n.name = get_string(data, "name");
        n.kind = get_string(data, "type");
        n.config = data.to_string();
        if let Err(e) = self.store.update_notification(&n) {
            return RuleResponse {
                ok: false,
                msg: format!("Failed to update notification: {}", e),
                id: None,
            };
        }
        // Edited thresholds start from a clean slate.
        self.notifier_states.reset_rule(id);
        RuleResponse {
            ok: true,
            msg: "Notification updated".to_string(),
            id: Some(id),
        }
    }

    pub fn delete_notification(&self, id: i64) -> RuleResponse {
        if let Err(e) = self.store.delete_notification(id) {
            return RuleResponse {
                ok: false,
                msg: e.to_string(),
                id: None,
            };
        }
        self.notifier_states.reset_rule(id);
        RuleResponse {
            ok: true,
            msg: "Deleted successfully".to_string(),
            id: None,
        }
    }

    pub fn toggle_notification(&self, id: i64) -> RuleResponse {
        let n = match self.store.get_notification(id) {
            Ok(n) => n,
            Err(_) => {
                return RuleResponse {
                    ok: false,
                    msg: "Notification not found".to_string(),
                    id: None,
                }
            }
        };
        if let Err(e) = self.store.set_notification_active(id, !n.active) {
            return RuleResponse {
                ok: false,
                msg: e.to_string(),
                id: None,
            };
        }
        self.notifier_states.reset_rule(id);
        RuleResponse {
            ok: true,
            msg: String::new(),
            id: Some(id),
        }
    }

    pub async fn test_notification(&self, data: &Value) -> RuleResponse {
        if get_string(data, "type") == "email" {
            let mut recipient = get_string(data, "resendRecipientEmail");
            if recipient.is_empty() {
                recipient = get_string(data, "recipientEmail");
            }
            if !recipient.is_empty() {
                let result = self
                    .mailer
                    .send(
                        &[recipient],
                        "Test Notification",
                        "This is a test notification from PulseWatch.",
                    )
                    .await;
                return match result {
                    Ok(()) => RuleResponse {
                        ok: true,
                        msg: "Test email sent".to_string(),
                        id: None,
                    },
                    Err(e) => RuleResponse {
                        ok: false,
                        msg: e.to_string(),
                        id: None,
                    },
                };
            }
        }
        RuleResponse {
            ok: false,
            msg: "Unsupported notification type or missing recipient".to_string(),
            id: None,
        }
    }
}

/// Build a monitor from a loose payload on top of `base` (defaults for
/// create, the current row for edit).
fn monitor_from_payload(data: &Value, base: Monitor) -> Monitor {
    let method = get_string(data, "method");
    Monitor {
        url: get_string(data, "url"),
        kind: get_string(data, "type"),
        method: if method.is_empty() {
            "GET".to_string()
        } else {
            method
        },
        body: get_string(data, "body"),
        headers: get_string(data, "headers"),
        form_data: sanitize_form_data(&get_string(data, "form_data")),
        timeout: get_i64(data, "timeout").unwrap_or(10),
        expected_status: get_i64(data, "expected_status").unwrap_or(0),
        response_regex: convert_json_to_regex(&get_string(data, "response_regex")),
        follow_redirects: get_bool(data, "follow_redirects").unwrap_or(true),
        interval: get_i64(data, "interval").unwrap_or(60),
        ..base
    }
}

/// `form_data` must be a JSON array or it is dropped.
pub fn sanitize_form_data(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    match serde_json::from_str::<Value>(s) {
        Ok(Value::Array(_)) => s.to_string(),
        _ => String::new(),
    }
}

/// First `file`-typed form entry with an unsafe path, if any.
fn first_invalid_form_path(form_data: &str) -> Option<String> {
    let fields: Vec<Value> = serde_json::from_str(form_data).ok()?;
    for field in fields {
        if get_string(&field, "type") == "file" {
            let value = get_string(&field, "value");
            if std::path::Path::new(&value).is_absolute() || value.contains("..") {
                return Some(value);
            }
        }
    }
    None
}

/// When `input` parses as JSON, synthesize a permissive regex asserting each
/// quoted key appears in order; otherwise return `input` verbatim.
pub fn convert_json_to_regex(input: &str) -> String {
    if input.is_empty() || serde_json::from_str::<Value>(input).is_err() {
        return input.to_string();
    }

    static KEY_RE: OnceLock<Regex> = OnceLock::new();
    let key_re =
        KEY_RE.get_or_init(|| Regex::new(r#""([^"\\]*(?:\\.[^"\\]*)*)"\s*:"#).unwrap());

    let keys: Vec<&str> = key_re
        .captures_iter(input)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    if keys.is_empty() {
        return input.to_string();
    }

    let mut pattern = String::from("(?s)\\{");
    for key in keys {
        pattern.push_str(&format!(".*\"{}\"", key));
    }
    pattern.push_str(".*\\}");
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_convert_json_to_regex() {
        let pattern = convert_json_to_regex(r#"{"status":"ok","code":200}"#);
        assert_eq!(pattern, r#"(?s)\{.*"status".*"code".*\}"#);

        let re = Regex::new(&pattern).unwrap();
        assert!(re.is_match(r#"{"status":"ok","code":200,"extra":1}"#));
        assert!(re.is_match("{\n  \"status\": \"ok\",\n  \"code\": 200\n}"));
        assert!(!re.is_match(r#"{"code":200}"#));
    }

    #[test]
    fn test_convert_json_to_regex_passthrough() {
        // Non-JSON input is already a regex.
        assert_eq!(convert_json_to_regex("^ok$"), "^ok$");
        assert_eq!(convert_json_to_regex(""), "");
        // Valid JSON without keys stays verbatim.
        assert_eq!(convert_json_to_regex("[1,2,3]"), "[1,2,3]");
        assert_eq!(convert_json_to_regex("42"), "42");
    }

    #[test]
    fn test_convert_json_to_regex_fixpoint() {
        let once = convert_json_to_regex(r#"{"a":1,"b":2}"#);
        let twice = convert_json_to_regex(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_sanitize_form_data() {
        let valid = r#"[{"key":"a","value":"1","type":"text"}]"#;
        assert_eq!(sanitize_form_data(valid), valid);
        assert_eq!(sanitize_form_data("not json"), "");
        assert_eq!(sanitize_form_data(r#"{"key":"a"}"#), "");
        assert_eq!(sanitize_form_data(""), "");
    }

    #[test]
    fn test_first_invalid_form_path() {
        let bad = r#"[{"key":"f","value":"../../etc/passwd","type":"file"}]"#;
        assert_eq!(
            first_invalid_form_path(bad),
            Some("../../etc/passwd".to_string())
        );
        let good = r#"[{"key":"f","value":"upload.txt","type":"file"},{"key":"t","value":"..","type":"text"}]"#;
        assert_eq!(first_invalid_form_path(good), None);
        assert_eq!(first_invalid_form_path(""), None);
    }

    #[test]
    fn test_monitor_from_payload_defaults() {
        let data = json!({"name":"api","url":"https://api.example.com","type":"http"});
        let m = monitor_from_payload(&data, Monitor::default());
        assert_eq!(m.method, "GET");
        assert_eq!(m.timeout, 10);
        assert_eq!(m.interval, 60);
        assert!(m.follow_redirects);
        assert_eq!(m.expected_status, 0);
    }

    #[test]
    fn test_monitor_from_payload_regex_conversion_applied() {
        let data = json!({"url":"https://x","response_regex":"{\"ok\":true}"});
        let m = monitor_from_payload(&data, Monitor::default());
        assert_eq!(m.response_regex, r#"(?s)\{.*"ok".*\}"#);
    }
}
