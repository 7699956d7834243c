//! DNS resolution probe: UP iff the name yields at least one A/AAAA address.

use std::time::Duration;

use crate::db::models::{STATUS_DOWN, STATUS_UP};

use super::http::truncate_error;
use super::resolver::{ResolveError, Resolver};

pub async fn check_dns(domain: &str, timeout_secs: i64, resolver: &Resolver) -> (i64, String) {
    let timeout_secs = if timeout_secs > 0 { timeout_secs } else { 10 };
    let timeout = Duration::from_secs(timeout_secs as u64);

    match tokio::time::timeout(timeout, resolver.lookup(domain)).await {
        Err(_) => (STATUS_DOWN, "Timeout".to_string()),
        Ok(Err(ResolveError::NotFound)) => (STATUS_DOWN, "Host Not Found".to_string()),
        Ok(Err(ResolveError::Timeout)) => (STATUS_DOWN, "Timeout".to_string()),
        Ok(Err(ResolveError::ServerFailure)) => (STATUS_DOWN, "Server Failure".to_string()),
        Ok(Err(e)) => (STATUS_DOWN, truncate_error(&e.to_string())),
        Ok(Ok(ips)) => match ips.first() {
            Some(ip) => (STATUS_UP, format!("IP: {}", ip)),
            None => (STATUS_DOWN, "No IP found".to_string()),
        },
    }
}
