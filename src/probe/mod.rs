//! Probe functions.
//!
//! Probes are stateless: `(monitor) -> (status, message, duration)`. Errors
//! never propagate; every failure folds into a DOWN outcome with a short
//! message. Hard network failures (timeout, refused connection, DNS, TLS)
//! zero the duration so the UI renders a gap instead of a latency spike.

pub mod dns;
pub mod http;
pub mod ping;
pub mod resolver;
pub mod tcp;

pub use http::init_clients;
pub use resolver::Resolver;

use std::time::Instant;

use crate::db::models::{
    Monitor, MONITOR_TYPE_DNS, MONITOR_TYPE_HTTP, MONITOR_TYPE_PING, MONITOR_TYPE_TCP, STATUS_DOWN,
};

/// Result of one probe cycle.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub status: i64,
    pub message: String,
    /// Milliseconds; 0 for hard failures.
    pub duration: i64,
}

const HARD_FAILURES: [&str; 4] = [
    "Timeout",
    "Connection Refused",
    "DNS Resolution Failed",
    "TLS Error",
];

/// Transport-level failures that are recorded with zero duration.
pub fn is_hard_failure(message: &str) -> bool {
    HARD_FAILURES.contains(&message)
}

/// Dispatch one check to the monitor's probe type.
pub async fn run_check(m: &Monitor, resolver: &Resolver) -> ProbeOutcome {
    let start = Instant::now();

    match m.kind.as_str() {
        MONITOR_TYPE_HTTP | "" => {
            let (status, message) = http::check_http(m).await;
            let mut duration = start.elapsed().as_millis() as i64;
            if status == STATUS_DOWN && is_hard_failure(&message) {
                duration = 0;
            }
            ProbeOutcome {
                status,
                message,
                duration,
            }
        }
        MONITOR_TYPE_PING => {
            let (status, message, rtt_ms) = ping::check_ping(&m.url, m.timeout).await;
            ProbeOutcome {
                status,
                message,
                duration: rtt_ms,
            }
        }
        MONITOR_TYPE_TCP => {
            let (status, message, duration) = tcp::check_tcp(&m.url, m.timeout, resolver).await;
            ProbeOutcome {
                status,
                message,
                duration,
            }
        }
        MONITOR_TYPE_DNS => {
            let (status, message) = dns::check_dns(&m.url, m.timeout, resolver).await;
            // A DOWN resolution is always a hard failure.
            let duration = if status == STATUS_DOWN {
                0
            } else {
                start.elapsed().as_millis() as i64
            };
            ProbeOutcome {
                status,
                message,
                duration,
            }
        }
        other => ProbeOutcome {
            status: STATUS_DOWN,
            message: format!("Unsupported type: {}", other),
            duration: 0,
        },
    }
}

/// One-shot probe for the admin test path. HTTP returns its raw status code
/// and body preview; other types emulate a 200 on success.
pub async fn run_test(m: &Monitor, resolver: &Resolver) -> (i64, String) {
    match m.kind.as_str() {
        MONITOR_TYPE_HTTP | "" => http::test_http(m).await,
        MONITOR_TYPE_PING => {
            let (status, message, _) = ping::check_ping(&m.url, m.timeout).await;
            (emulated_code(status), message)
        }
        MONITOR_TYPE_TCP => {
            let (status, message, _) = tcp::check_tcp(&m.url, m.timeout, resolver).await;
            (emulated_code(status), message)
        }
        MONITOR_TYPE_DNS => {
            let (status, message) = dns::check_dns(&m.url, m.timeout, resolver).await;
            (emulated_code(status), message)
        }
        _ => (0, "Unknown monitor type".to_string()),
    }
}

fn emulated_code(status: i64) -> i64 {
    if status == crate::db::models::STATUS_UP {
        200
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::STATUS_UP;

    #[test]
    fn test_hard_failure_classification() {
        assert!(is_hard_failure("Timeout"));
        assert!(is_hard_failure("Connection Refused"));
        assert!(is_hard_failure("DNS Resolution Failed"));
        assert!(is_hard_failure("TLS Error"));
        assert!(!is_hard_failure("HTTP 500 Internal Server Error"));
        assert!(!is_hard_failure("Response mismatch"));
    }

    #[tokio::test]
    async fn test_unsupported_type_is_down_with_zero_duration() {
        let m = Monitor {
            kind: "icmp6".to_string(),
            ..Default::default()
        };
        let resolver = Resolver::new("");
        let outcome = run_check(&m, &resolver).await;
        assert_eq!(outcome.status, STATUS_DOWN);
        assert_eq!(outcome.duration, 0);
        assert_eq!(outcome.message, "Unsupported type: icmp6");
    }

    #[tokio::test]
    async fn test_hard_failure_zeroes_duration() {
        let m = Monitor {
            kind: "http".to_string(),
            url: "http://127.0.0.1:1".to_string(),
            timeout: 2,
            ..Default::default()
        };
        let resolver = Resolver::new("");
        let outcome = run_check(&m, &resolver).await;
        assert_eq!(outcome.status, STATUS_DOWN);
        assert_eq!(outcome.message, "Connection Refused");
        assert_eq!(outcome.duration, 0);
    }

    #[tokio::test]
    async fn test_tcp_check_reports_duration() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let m = Monitor {
            kind: "tcp".to_string(),
            url: format!("127.0.0.1:{}", port),
            timeout: 2,
            ..Default::default()
        };
        let resolver = Resolver::new("");
        let outcome = run_check(&m, &resolver).await;
        assert_eq!(outcome.status, STATUS_UP);
        assert!(outcome.message.starts_with("Port Open"));
    }
}
