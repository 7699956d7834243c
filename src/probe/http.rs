//! HTTP probe.
//!
//! A shared keep-alive client pair (redirect-following and not) is built once
//! against the process resolver. Each check runs under a per-request deadline
//! of the monitor's `timeout`; well-known transport failures are normalized
//! into short messages so charts and alerts stay readable.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use reqwest::{multipart, Client, Method, RequestBuilder, Response};
use serde::Deserialize;

use crate::db::models::{Monitor, STATUS_DOWN, STATUS_UP};

use super::resolver::{Resolver, SharedResolver};

const DEFAULT_USER_AGENT: &str = "PulseWatch-Monitor/1.0";
const BODY_DIAGNOSTIC_CAP: usize = 10 * 1024;
const BODY_REGEX_CAP: usize = 1024 * 1024;
const BODY_TEST_CAP: usize = 50 * 1024;

struct HttpClients {
    follow: Client,
    no_follow: Client,
}

static CLIENTS: OnceLock<HttpClients> = OnceLock::new();

/// Build the shared client pair against `resolver`. Called once at start-up;
/// probes issued before this fall back to a default resolver.
pub fn init_clients(resolver: Arc<Resolver>) {
    let _ = CLIENTS.set(build_clients(resolver));
}

fn build_clients(resolver: Arc<Resolver>) -> HttpClients {
    let builder = |redirects: reqwest::redirect::Policy| {
        Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            // Safety net only; the real deadline is set per request.
            .timeout(Duration::from_secs(600))
            .redirect(redirects)
            .dns_resolver(Arc::new(SharedResolver(resolver.clone())))
            .build()
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build HTTP client: {}", e);
                Client::new()
            })
    };
    HttpClients {
        follow: builder(reqwest::redirect::Policy::limited(10)),
        no_follow: builder(reqwest::redirect::Policy::none()),
    }
}

fn client_for(follow_redirects: bool) -> &'static Client {
    let clients = CLIENTS.get_or_init(|| build_clients(Arc::new(Resolver::new(""))));
    if follow_redirects {
        &clients.follow
    } else {
        &clients.no_follow
    }
}

#[derive(Debug, Deserialize)]
struct FormField {
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: String,
    #[serde(rename = "type", default)]
    kind: String,
}

/// Probe `m` once. Returns `(status, message)`; the caller measures duration.
pub async fn check_http(m: &Monitor) -> (i64, String) {
    let req = match build_request(m).await {
        Ok(req) => req,
        Err(msg) => return (STATUS_DOWN, msg),
    };

    let resp = match req.send().await {
        Ok(resp) => resp,
        Err(e) => return (STATUS_DOWN, classify_error(&e)),
    };

    let code = resp.status();
    let reason = code.canonical_reason().unwrap_or("");

    let error_msg = if m.expected_status > 0 {
        if code.as_u16() as i64 != m.expected_status {
            Some(format!(
                "Status {} (Expected {})",
                code.as_u16(),
                m.expected_status
            ))
        } else {
            None
        }
    } else if !code.is_success() {
        Some(format!("HTTP {} {}", code.as_u16(), reason))
    } else {
        None
    };

    if let Some(mut msg) = error_msg {
        // Failed POSTs carry a body excerpt for diagnosability.
        if m.method.eq_ignore_ascii_case("POST") {
            let body = read_body_capped(resp, BODY_DIAGNOSTIC_CAP).await;
            let trimmed = body.trim();
            if !trimmed.is_empty() {
                msg.push_str(&format!(" Body: {}", truncate_body(trimmed)));
            }
        }
        return (STATUS_DOWN, msg);
    }

    if !m.response_regex.is_empty() {
        let body = read_body_capped(resp, BODY_REGEX_CAP).await;
        let re = match Regex::new(&m.response_regex) {
            Ok(re) => re,
            Err(e) => return (STATUS_DOWN, format!("Regex error: {}", e)),
        };
        if !re.is_match(&body) {
            let mut msg = "Response mismatch".to_string();
            let trimmed = body.trim();
            if !trimmed.is_empty() {
                msg.push_str(&format!(" Body: {}", truncate_body(trimmed)));
            }
            return (STATUS_DOWN, msg);
        }
        return (
            STATUS_UP,
            format!("HTTP {} {}, body matched", code.as_u16(), reason),
        );
    }

    (STATUS_UP, format!("HTTP {} {}", code.as_u16(), reason))
}

/// One-shot variant for the admin test path: raw status code and a body
/// preview instead of an UP/DOWN verdict. Errors return code 0.
pub async fn test_http(m: &Monitor) -> (i64, String) {
    let req = match build_request(m).await {
        Ok(req) => req,
        Err(msg) => return (0, msg),
    };

    let resp = match req.send().await {
        Ok(resp) => resp,
        Err(e) => return (0, e.to_string()),
    };

    let code = resp.status().as_u16() as i64;
    let body = read_body_capped(resp, BODY_TEST_CAP).await;
    (code, body)
}

async fn build_request(m: &Monitor) -> Result<RequestBuilder, String> {
    let timeout = if m.timeout <= 0 { 10 } else { m.timeout };
    let method = if m.method.is_empty() {
        Method::GET
    } else {
        Method::from_bytes(m.method.to_uppercase().as_bytes()).unwrap_or(Method::GET)
    };

    let client = client_for(m.follow_redirects);
    let mut req = client
        .request(method.clone(), &m.url)
        .timeout(Duration::from_secs(timeout as u64));

    let is_form_method =
        method == Method::POST || method == Method::PUT || method == Method::PATCH;
    let mut form_used = false;

    if is_form_method && !m.form_data.is_empty() {
        if let Ok(fields) = serde_json::from_str::<Vec<FormField>>(&m.form_data) {
            if !fields.is_empty() {
                let mut form = multipart::Form::new();
                for field in fields {
                    if field.kind == "file" {
                        check_upload_path(&field.value)?;
                        let bytes = tokio::fs::read(&field.value)
                            .await
                            .map_err(|e| format!("Open file failed: {}", e))?;
                        let file_name = Path::new(&field.value)
                            .file_name()
                            .map(|s| s.to_string_lossy().into_owned())
                            .unwrap_or_else(|| field.value.clone());
                        form = form.part(
                            field.key,
                            multipart::Part::bytes(bytes).file_name(file_name),
                        );
                    } else {
                        form = form.text(field.key, field.value);
                    }
                }
                req = req.multipart(form);
                form_used = true;
            }
        }
    }

    if !form_used && !m.body.is_empty() {
        req = req.body(m.body.clone());
    }

    let mut has_user_agent = false;
    for (key, value) in parse_headers(&m.headers) {
        // Multipart owns the content type.
        if form_used && key.eq_ignore_ascii_case("content-type") {
            continue;
        }
        if key.eq_ignore_ascii_case("user-agent") {
            has_user_agent = true;
        }
        req = req.header(key, value);
    }
    if !has_user_agent {
        req = req.header("User-Agent", DEFAULT_USER_AGENT);
    }

    Ok(req)
}

/// Upload paths must stay inside the working directory.
fn check_upload_path(value: &str) -> Result<(), String> {
    if Path::new(value).is_absolute() || value.contains("..") {
        return Err(format!(
            "Invalid file path: {} (must be relative and cannot contain '..')",
            value
        ));
    }
    Ok(())
}

/// Parse headers as a JSON object first, falling back to legacy `K=V,K=V`.
fn parse_headers(headers: &str) -> Vec<(String, String)> {
    if headers.is_empty() {
        return Vec::new();
    }

    if let Ok(map) = serde_json::from_str::<HashMap<String, String>>(headers) {
        if !map.is_empty() {
            return map.into_iter().collect();
        }
    }

    let mut pairs = Vec::new();
    for pair in headers.split(',') {
        let mut kv = pair.splitn(2, '=');
        if let (Some(key), Some(value)) = (kv.next(), kv.next()) {
            let key = key.trim();
            let value = value.trim();
            if !key.is_empty() {
                pairs.push((key.to_string(), value.to_string()));
            }
        }
    }
    pairs
}

/// Normalize well-known transport failures into short codes.
fn classify_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        return "Timeout".to_string();
    }

    let mut chain = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(inner) = source {
        chain.push_str(": ");
        chain.push_str(&inner.to_string());
        source = inner.source();
    }
    let lower = chain.to_lowercase();

    if lower.contains("connection refused") {
        return "Connection Refused".to_string();
    }
    if lower.contains("dns error") || lower.contains("failed to lookup") || lower.contains("no such host") {
        return "DNS Resolution Failed".to_string();
    }
    if lower.contains("tls") || lower.contains("certificate") {
        return "TLS Error".to_string();
    }

    truncate_error(&chain)
}

/// Truncate unknown errors to 37 chars plus an ellipsis.
pub fn truncate_error(s: &str) -> String {
    if s.len() <= 40 {
        return s.to_string();
    }
    let mut end = 37;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

fn truncate_body(s: &str) -> String {
    const MAX: usize = 10_000;
    if s.len() <= MAX {
        return s.to_string();
    }
    let mut end = MAX;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &s[..end])
}

/// Read at most `cap` bytes of the response body.
async fn read_body_capped(mut resp: Response, cap: usize) -> String {
    let mut buf: Vec<u8> = Vec::new();
    while let Ok(Some(chunk)) = resp.chunk().await {
        buf.extend_from_slice(&chunk);
        if buf.len() >= cap {
            buf.truncate(cap);
            break;
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_headers_json() {
        let pairs = parse_headers(r#"{"Authorization":"Bearer x","X-Env":"prod"}"#);
        assert_eq!(pairs.len(), 2);
        assert!(pairs.contains(&("Authorization".to_string(), "Bearer x".to_string())));
    }

    #[test]
    fn test_parse_headers_legacy() {
        let pairs = parse_headers("X-A=1, X-B = two ,broken");
        assert_eq!(
            pairs,
            vec![
                ("X-A".to_string(), "1".to_string()),
                ("X-B".to_string(), "two".to_string()),
            ]
        );
        assert!(parse_headers("").is_empty());
    }

    #[test]
    fn test_upload_path_rejections() {
        assert!(check_upload_path("data/report.txt").is_ok());
        let err = check_upload_path("../../etc/passwd").unwrap_err();
        assert_eq!(
            err,
            "Invalid file path: ../../etc/passwd (must be relative and cannot contain '..')"
        );
        assert!(check_upload_path("/etc/passwd").is_err());
    }

    #[test]
    fn test_truncate_error() {
        assert_eq!(truncate_error("short"), "short");
        let long = "x".repeat(80);
        let truncated = truncate_error(&long);
        assert_eq!(truncated.len(), 40);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_truncate_body_cap() {
        let big = "y".repeat(20_000);
        let out = truncate_body(&big);
        assert!(out.ends_with("...(truncated)"));
        assert!(out.len() < big.len());
    }

    #[tokio::test]
    async fn test_unsafe_form_path_short_circuits() {
        let m = Monitor {
            url: "http://127.0.0.1:1".to_string(),
            method: "POST".to_string(),
            form_data: r#"[{"key":"f","value":"../../etc/passwd","type":"file"}]"#.to_string(),
            ..Default::default()
        };
        let (status, msg) = check_http(&m).await;
        assert_eq!(status, STATUS_DOWN);
        assert_eq!(
            msg,
            "Invalid file path: ../../etc/passwd (must be relative and cannot contain '..')"
        );
    }

    #[tokio::test]
    async fn test_connection_refused_normalized() {
        // Port 1 on loopback is essentially never listening.
        let m = Monitor {
            url: "http://127.0.0.1:1".to_string(),
            timeout: 2,
            ..Default::default()
        };
        let (status, msg) = check_http(&m).await;
        assert_eq!(status, STATUS_DOWN);
        assert_eq!(msg, "Connection Refused");
    }
}
