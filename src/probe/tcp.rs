//! TCP connect probe.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::db::models::{STATUS_DOWN, STATUS_UP};

use super::resolver::Resolver;

/// Dial `host:port`. Returns `(status, message, duration_ms)`; failures carry
/// a zero duration so charts render a gap.
pub async fn check_tcp(addr: &str, timeout_secs: i64, resolver: &Resolver) -> (i64, String, i64) {
    let timeout_secs = if timeout_secs > 0 { timeout_secs } else { 10 };
    let timeout = Duration::from_secs(timeout_secs as u64);

    let start = Instant::now();
    match tokio::time::timeout(timeout, connect(addr, resolver)).await {
        Err(_) => (STATUS_DOWN, "Timeout".to_string(), 0),
        Ok(Err(msg)) => (STATUS_DOWN, msg, 0),
        Ok(Ok(())) => {
            let elapsed = start.elapsed();
            let msg = format!("Port Open ({:.2} ms)", elapsed.as_micros() as f64 / 1000.0);
            (STATUS_UP, msg, elapsed.as_millis() as i64)
        }
    }
}

async fn connect(addr: &str, resolver: &Resolver) -> Result<(), String> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| "Connection Failed".to_string())?;
    let port: u16 = port.parse().map_err(|_| "Connection Failed".to_string())?;
    let host = host.trim_start_matches('[').trim_end_matches(']');

    let ips = resolver
        .lookup(host)
        .await
        .map_err(|_| "Connection Failed".to_string())?;

    let mut last = "Connection Failed".to_string();
    for ip in ips {
        match tokio::net::TcpStream::connect(SocketAddr::new(ip, port)).await {
            Ok(_stream) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                last = "Connection Refused".to_string();
            }
            Err(_) => {}
        }
    }
    Err(last)
}
