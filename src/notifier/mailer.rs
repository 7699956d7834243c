//! Outbound email.
//!
//! `EmailService` wraps a transport: the Resend HTTP API in production, an
//! in-memory sink for tests. Send retries are owned by the notifier-facing
//! `send_with_retry`, with exponential backoff.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use thiserror::Error;

use crate::config::NotificationConfig;

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";
const MAX_RETRIES: u32 = 3;

#[derive(Error, Debug)]
pub enum EmailError {
    #[error("resend api key is not set")]
    NotConfigured,
    #[error("send failed: {0}")]
    Send(String),
}

/// A captured email (memory transport).
#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

pub struct EmailService {
    transport: EmailTransport,
    from_email: String,
    from_name: String,
}

enum EmailTransport {
    Resend {
        client: reqwest::Client,
        api_key: String,
    },
    Memory(Arc<Mutex<Vec<SentEmail>>>),
}

impl EmailService {
    /// Production transport from the notification config section.
    pub fn from_config(cfg: &NotificationConfig) -> Self {
        let from_email = if cfg.from_email.is_empty() {
            "onboarding@resend.dev".to_string()
        } else {
            cfg.from_email.clone()
        };
        let from_name = if cfg.from_name.is_empty() {
            "PulseWatch Monitor".to_string()
        } else {
            cfg.from_name.clone()
        };
        Self {
            transport: EmailTransport::Resend {
                client: reqwest::Client::new(),
                api_key: cfg.resend_api_key.clone(),
            },
            from_email,
            from_name,
        }
    }

    /// In-memory transport; returns the sink to assert against.
    pub fn memory() -> (Self, Arc<Mutex<Vec<SentEmail>>>) {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let service = Self {
            transport: EmailTransport::Memory(sink.clone()),
            from_email: "test@localhost".to_string(),
            from_name: "PulseWatch Monitor".to_string(),
        };
        (service, sink)
    }

    pub async fn send(&self, to: &[String], subject: &str, html: &str) -> Result<(), EmailError> {
        match &self.transport {
            EmailTransport::Resend { client, api_key } => {
                if api_key.is_empty() {
                    return Err(EmailError::NotConfigured);
                }
                let from = format!("{} <{}>", self.from_name, self.from_email);
                let resp = client
                    .post(RESEND_ENDPOINT)
                    .bearer_auth(api_key)
                    .json(&json!({
                        "from": from,
                        "to": to,
                        "subject": subject,
                        "html": html,
                    }))
                    .send()
                    .await
                    .map_err(|e| EmailError::Send(e.to_string()))?;

                if !resp.status().is_success() {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(EmailError::Send(format!("status {}: {}", status, body)));
                }
                Ok(())
            }
            EmailTransport::Memory(sink) => {
                sink.lock().unwrap().push(SentEmail {
                    to: to.to_vec(),
                    subject: subject.to_string(),
                    html: html.to_string(),
                });
                Ok(())
            }
        }
    }

    /// Send with up to three attempts and 2/4/6 s backoff.
    pub async fn send_with_retry(
        &self,
        to: &[String],
        subject: &str,
        html: &str,
    ) -> Result<(), EmailError> {
        let mut last_err = EmailError::NotConfigured;
        for attempt in 0..MAX_RETRIES {
            match self.send(to, subject, html).await {
                Ok(()) => {
                    tracing::info!("Email sent to {:?}", to);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to send email (attempt {}/{}): {}",
                        attempt + 1,
                        MAX_RETRIES,
                        e
                    );
                    last_err = e;
                }
            }
            if attempt + 1 < MAX_RETRIES {
                tokio::time::sleep(Duration::from_secs(2 * (attempt as u64 + 1))).await;
            }
        }
        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_transport_captures() {
        let (mailer, sink) = EmailService::memory();
        mailer
            .send(&["op@example.com".to_string()], "subject", "<p>hi</p>")
            .await
            .unwrap();
        let sent = sink.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "subject");
        assert_eq!(sent[0].to, vec!["op@example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_api_key_errors() {
        let mailer = EmailService::from_config(&NotificationConfig::default());
        let err = mailer
            .send(&["op@example.com".to_string()], "s", "h")
            .await
            .unwrap_err();
        assert!(matches!(err, EmailError::NotConfigured));
    }
}
