//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const STATUS_DOWN: i64 = 0;
pub const STATUS_UP: i64 = 1;
pub const STATUS_PENDING: i64 = 2;
pub const STATUS_MAINTENANCE: i64 = 3;

/// Sentinel status used by chart/list consumers for "no samples".
pub const STATUS_NONE: i64 = -1;

pub const MONITOR_TYPE_HTTP: &str = "http";
pub const MONITOR_TYPE_PING: &str = "ping";
pub const MONITOR_TYPE_TCP: &str = "tcp";
pub const MONITOR_TYPE_DNS: &str = "dns";

/// All accepted monitor types.
pub const MONITOR_TYPES: &[&str] = &[
    MONITOR_TYPE_HTTP,
    MONITOR_TYPE_PING,
    MONITOR_TYPE_TCP,
    MONITOR_TYPE_DNS,
];

pub fn is_valid_monitor_type(t: &str) -> bool {
    MONITOR_TYPES.contains(&t)
}

pub fn status_label(status: i64) -> &'static str {
    match status {
        STATUS_UP => "UP",
        STATUS_DOWN => "DOWN",
        STATUS_PENDING => "PENDING",
        STATUS_MAINTENANCE => "MAINTENANCE",
        _ => "UNKNOWN",
    }
}

/// One configured probe target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub body: String,
    /// Either a JSON object of header values or legacy `K=V,K=V` pairs.
    #[serde(default)]
    pub headers: String,
    /// JSON array of `{key, value, type}` multipart fields.
    #[serde(default)]
    pub form_data: String,
    #[serde(default)]
    pub timeout: i64,
    /// 0 means "any 2xx".
    #[serde(default)]
    pub expected_status: i64,
    #[serde(default)]
    pub response_regex: String,
    #[serde(default = "default_true")]
    pub follow_redirects: bool,
    /// Seconds between probe attempts.
    #[serde(default)]
    pub interval: i64,
    #[serde(default)]
    pub active: i64,
    #[serde(default)]
    pub status: i64,
    #[serde(rename = "msg", default)]
    pub message: String,
    #[serde(default)]
    pub last_check: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl Default for Monitor {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            url: String::new(),
            kind: MONITOR_TYPE_HTTP.to_string(),
            method: "GET".to_string(),
            body: String::new(),
            headers: String::new(),
            form_data: String::new(),
            timeout: 10,
            expected_status: 0,
            response_regex: String::new(),
            follow_redirects: true,
            interval: 60,
            active: 1,
            status: STATUS_PENDING,
            message: String::new(),
            last_check: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

/// One probe outcome (raw tier).
#[derive(Debug, Clone, Serialize)]
pub struct Heartbeat {
    pub id: i64,
    pub monitor_id: i64,
    pub status: i64,
    #[serde(rename = "msg")]
    pub message: String,
    pub time: DateTime<Utc>,
    /// Response time in milliseconds; 0 for hard network failures.
    pub duration: i64,
}

/// One monitor x one wall-clock hour.
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatHourly {
    pub id: i64,
    pub monitor_id: i64,
    pub hour: DateTime<Utc>,
    pub up_count: i64,
    pub down_count: i64,
    pub total_count: i64,
    /// Sum of durations over successful heartbeats; feeds weighted daily averages.
    pub sum_duration: i64,
    pub avg_duration: i64,
    pub min_duration: i64,
    pub max_duration: i64,
    /// Scaled integer: 0-10000 is 0.00%-100.00%.
    pub uptime: i64,
}

/// One monitor x one UTC day, derived from the hourly tier.
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatDaily {
    pub id: i64,
    pub monitor_id: i64,
    pub date: DateTime<Utc>,
    pub up_count: i64,
    pub down_count: i64,
    pub total_count: i64,
    pub sum_duration: i64,
    pub avg_duration: i64,
    pub min_duration: i64,
    pub max_duration: i64,
    pub uptime: i64,
}

impl HeartbeatHourly {
    pub fn uptime_percent(&self) -> f64 {
        self.uptime as f64 / 100.0
    }
}

impl HeartbeatDaily {
    pub fn uptime_percent(&self) -> f64 {
        self.uptime as f64 / 100.0
    }
}

/// Notification rule: `trigger` rules alert on confirmed status changes,
/// `schedule` rules send a daily report at a wall-clock time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    /// JSON blob; shape depends on `kind`.
    #[serde(default)]
    pub config: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_labels() {
        assert_eq!(status_label(STATUS_UP), "UP");
        assert_eq!(status_label(STATUS_DOWN), "DOWN");
        assert_eq!(status_label(STATUS_PENDING), "PENDING");
        assert_eq!(status_label(99), "UNKNOWN");
    }

    #[test]
    fn test_monitor_types() {
        assert!(is_valid_monitor_type("http"));
        assert!(is_valid_monitor_type("dns"));
        assert!(!is_valid_monitor_type("icmp"));
        assert!(!is_valid_monitor_type(""));
    }

    #[test]
    fn test_monitor_deserialize_defaults() {
        let m: Monitor = serde_json::from_str(r#"{"name":"a","url":"http://x"}"#).unwrap();
        assert_eq!(m.name, "a");
        assert!(m.follow_redirects);
        assert_eq!(m.id, 0);
    }
}
