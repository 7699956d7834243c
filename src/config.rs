//! Configuration loading.
//!
//! A YAML file merged with environment overrides. When the file is missing a
//! default one is written next to the binary and loaded.

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config read error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] figment::Error),
}

const DEFAULT_CONFIG: &str = r#"server:
  port: 37374
notification:
  resend_api_key: "YOUR_RESEND_API_KEY"
  email: "YOUR_EMAIL@example.com"

# Tiered retention: raw heartbeats are kept briefly, aggregates much longer.
retention:
  raw_hours: 24
  hourly_days: 7
  daily_days: 365
"#;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    37374
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub resend_api_key: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub from_email: String,
    #[serde(default)]
    pub from_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Upstream DNS server as `ip` or `ip:port`; empty selects the built-in
    /// fallback chain.
    #[serde(default)]
    pub dns_server: String,
}

/// Retention horizons for the three storage tiers. Zero or negative values
/// fall back to the defaults at read time.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default)]
    pub raw_hours: i64,
    #[serde(default)]
    pub hourly_days: i64,
    #[serde(default)]
    pub daily_days: i64,
}

impl RetentionConfig {
    pub fn effective_raw_hours(&self) -> i64 {
        if self.raw_hours > 0 {
            self.raw_hours
        } else {
            24
        }
    }

    pub fn effective_hourly_days(&self) -> i64 {
        if self.hourly_days > 0 {
            self.hourly_days
        } else {
            7
        }
    }

    pub fn effective_daily_days(&self) -> i64 {
        if self.daily_days > 0 {
            self.daily_days
        } else {
            365
        }
    }
}

impl Config {
    /// Load configuration from `path`, creating a default file when missing,
    /// then apply environment overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        if !Path::new(path).exists() {
            std::fs::write(path, DEFAULT_CONFIG)?;
            tracing::info!("Configuration file not found, created default at {}", path);
        }

        let mut cfg: Config = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("PULSEWATCH_").split("__"))
            .extract()?;

        // Legacy plain-name overrides kept for container deployments.
        if let Ok(key) = std::env::var("RESEND_API_KEY") {
            if !key.is_empty() {
                cfg.notification.resend_api_key = key;
            }
        }
        if let Ok(email) = std::env::var("NOTIFICATION_EMAIL") {
            if !email.is_empty() {
                cfg.notification.email = email;
            }
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse::<u16>() {
                if p != 0 {
                    cfg.server.port = p;
                }
            }
        }

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.server.port, 37374);
        assert_eq!(cfg.retention.effective_raw_hours(), 24);
        assert_eq!(cfg.retention.effective_hourly_days(), 7);
        assert_eq!(cfg.retention.effective_daily_days(), 365);
    }

    #[test]
    fn test_retention_overrides() {
        let r = RetentionConfig {
            raw_hours: 48,
            hourly_days: 14,
            daily_days: 0,
        };
        assert_eq!(r.effective_raw_hours(), 48);
        assert_eq!(r.effective_hourly_days(), 14);
        assert_eq!(r.effective_daily_days(), 365);
    }

    #[test]
    fn test_embedded_default_parses() {
        let cfg: Config = Figment::new()
            .merge(Yaml::string(DEFAULT_CONFIG))
            .extract()
            .unwrap();
        assert_eq!(cfg.server.port, 37374);
        assert_eq!(cfg.retention.raw_hours, 24);
        assert!(cfg.monitor.dns_server.is_empty());
    }

    #[test]
    fn test_load_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let path_str = path.to_str().unwrap();
        let cfg = Config::load(path_str).unwrap();
        assert!(path.exists());
        assert_eq!(cfg.server.port, 37374);
    }
}
