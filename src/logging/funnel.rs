//! Funnel event logging
//!
//! One event per step of the signup funnel. Emails are never written; events
//! carry a prefix of the email hash, which is enough to join steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::auth::short_hash;
use crate::services::DeliveryResult;
use crate::waitlist::ConfirmationStatus;

/// Funnel event types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FunnelEventType {
    SignupAccepted,
    SignupRejected,
    ResendAccepted,
    Confirmation,
    EmailDelivery,
}

/// One funnel step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: FunnelEventType,
    /// Email hash prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Step-specific result (`created`, `rate_limited`, `confirmed`, ...)
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl FunnelEvent {
    pub fn new(event_type: FunnelEventType, outcome: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            subject: None,
            outcome: outcome.to_string(),
            locale: None,
            detail: None,
        }
    }

    /// Attach the email hash (truncated)
    pub fn with_subject(mut self, email_hash: &str) -> Self {
        self.subject = Some(short_hash(email_hash).to_string());
        self
    }

    pub fn with_locale(mut self, locale: Option<&str>) -> Self {
        self.locale = locale.map(str::to_string);
        self
    }

    pub fn with_detail(mut self, detail: String) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Funnel logger; cheap to clone
#[derive(Clone, Default)]
pub struct FunnelLogger {
    inner: Arc<Mutex<FunnelLoggerInner>>,
}

#[derive(Default)]
struct FunnelLoggerInner {
    writer: Option<BufWriter<File>>,
}

impl FunnelLogger {
    /// Logger that only emits through `tracing`
    pub fn new() -> Self {
        Self::default()
    }

    /// Additionally append events to a JSONL file
    pub async fn init_file(&self, path: PathBuf) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut inner = self.inner.lock().await;
        inner.writer = Some(BufWriter::new(file));

        info!("Funnel logging initialized to {}", path.display());
        Ok(())
    }

    /// Record an event
    pub async fn log(&self, event: FunnelEvent) {
        info!(
            funnel = ?event.event_type,
            outcome = %event.outcome,
            subject = event.subject.as_deref().unwrap_or("-"),
            locale = event.locale.as_deref().unwrap_or("-"),
            "Funnel event"
        );

        let mut inner = self.inner.lock().await;
        let Some(writer) = inner.writer.as_mut() else {
            return;
        };

        let jsonl = match event.to_jsonl() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize funnel event: {}", e);
                return;
            }
        };
        if let Err(e) = writeln!(writer, "{}", jsonl) {
            error!("Failed to write funnel event: {}", e);
        }
        if let Err(e) = writer.flush() {
            error!("Failed to flush funnel log: {}", e);
        }
    }

    pub async fn signup_accepted(&self, email_hash: &str, outcome: &str, locale: Option<&str>) {
        let event = FunnelEvent::new(FunnelEventType::SignupAccepted, outcome)
            .with_subject(email_hash)
            .with_locale(locale);
        self.log(event).await;
    }

    /// `reason` is a public error code such as `rate_limited`
    pub async fn signup_rejected(&self, reason: &str, email_hash: Option<&str>) {
        let mut event = FunnelEvent::new(FunnelEventType::SignupRejected, reason);
        if let Some(hash) = email_hash {
            event = event.with_subject(hash);
        }
        self.log(event).await;
    }

    pub async fn resend_accepted(&self, email_hash: &str, outcome: &str) {
        let event = FunnelEvent::new(FunnelEventType::ResendAccepted, outcome).with_subject(email_hash);
        self.log(event).await;
    }

    pub async fn confirmation(&self, status: ConfirmationStatus, doc_id: Option<&str>) {
        let mut event = FunnelEvent::new(FunnelEventType::Confirmation, status.as_str());
        if let Some(id) = doc_id {
            event = event.with_subject(id);
        }
        self.log(event).await;
    }

    pub async fn email_delivery(&self, email_hash: &str, result: &DeliveryResult) {
        let event = match result {
            DeliveryResult::Delivered => FunnelEvent::new(FunnelEventType::EmailDelivery, "delivered"),
            DeliveryResult::Failed { reason } => {
                error!(reason = %reason, "Confirmation email delivery failed");
                FunnelEvent::new(FunnelEventType::EmailDelivery, "failed").with_detail(reason.clone())
            }
        };
        self.log(event.with_subject(email_hash)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = FunnelEvent::new(FunnelEventType::SignupAccepted, "created")
            .with_subject("0123456789abcdef0123")
            .with_locale(Some("es"));

        let jsonl = event.to_jsonl().unwrap();
        assert!(jsonl.contains("signup_accepted"));
        assert!(jsonl.contains("\"subject\":\"0123456789ab\""));
        assert!(jsonl.contains("\"locale\":\"es\""));
        assert!(!jsonl.contains("detail"));
    }

    #[tokio::test]
    async fn test_file_sink_appends_lines() {
        let path = std::env::temp_dir().join(format!("funnel-{}.jsonl", uuid::Uuid::new_v4()));
        let logger = FunnelLogger::new();
        logger.init_file(path.clone()).await.unwrap();

        logger.signup_rejected("captcha_failed", None).await;
        logger
            .email_delivery(
                "abc",
                &DeliveryResult::Failed {
                    reason: "timeout".into(),
                },
            )
            .await;

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("captcha_failed"));
        assert!(lines[1].contains("\"outcome\":\"failed\""));
        let _ = std::fs::remove_file(path);
    }
}
