//! Transactional email
//!
//! Delivery is best-effort. [`Mailer::send`] reports the outcome as a value
//! and never fails; callers log a failed delivery and carry on.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::auth::mask_email;
use crate::types::{Result, WaitlistError};

/// A rendered message ready for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
    pub headers: BTreeMap<String, String>,
}

/// Outcome of one send attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    Delivered,
    Failed { reason: String },
}

impl DeliveryResult {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> DeliveryResult;
}

// =============================================================================
// HTTP API transport
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmailAddress {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendEmailBody {
    sender: EmailAddress,
    to: Vec<EmailAddress>,
    subject: String,
    html_content: String,
    text_content: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, String>,
}

/// JSON email API client (Brevo-compatible `v3/smtp/email`)
pub struct HttpMailer {
    api_url: String,
    api_key: String,
    sender_email: String,
    sender_name: Option<String>,
    http_client: reqwest::Client,
}

impl HttpMailer {
    pub fn new(
        api_url: String,
        api_key: String,
        sender_email: String,
        sender_name: Option<String>,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| WaitlistError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_url,
            api_key,
            sender_email,
            sender_name,
            http_client,
        })
    }

    async fn try_send(&self, email: OutgoingEmail) -> Result<()> {
        let body = SendEmailBody {
            sender: EmailAddress {
                email: self.sender_email.clone(),
                name: self.sender_name.clone(),
            },
            to: vec![EmailAddress {
                email: email.to,
                name: None,
            }],
            subject: email.subject,
            html_content: email.html,
            text_content: email.text,
            headers: email.headers,
        };

        let response = self
            .http_client
            .post(&self.api_url)
            .header("api-key", &self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| WaitlistError::Email(format!("Email API request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let detail = response.text().await.unwrap_or_default();
        Err(WaitlistError::Email(format!(
            "Email API returned {}: {}",
            status,
            detail.chars().take(200).collect::<String>()
        )))
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: OutgoingEmail) -> DeliveryResult {
        match self.try_send(email).await {
            Ok(()) => DeliveryResult::Delivered,
            Err(e) => DeliveryResult::Failed {
                reason: e.to_string(),
            },
        }
    }
}

/// Development transport that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: OutgoingEmail) -> DeliveryResult {
        info!(
            to = %mask_email(&email.to),
            subject = %email.subject,
            "Email delivery skipped (log mailer)"
        );
        DeliveryResult::Delivered
    }
}

// =============================================================================
// Templates
// =============================================================================

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Build the double opt-in message carrying the confirmation link
pub fn confirmation_email(to: &str, link: &str, locale: &str, ttl_hours: u64) -> OutgoingEmail {
    let subject = "Confirm your spot on the waitlist".to_string();
    let safe_link = escape_html(link);
    let lang = escape_html(locale);

    let html = format!(
        r#"<!doctype html>
<html lang="{lang}">
  <body style="font-family:system-ui,sans-serif;line-height:1.5">
    <p>Thanks for joining the waitlist.</p>
    <p>Please confirm your email address:</p>
    <p><a href="{safe_link}">Confirm my email</a></p>
    <p>This link expires in {ttl_hours} hours. If you did not sign up, ignore this message.</p>
  </body>
</html>"#
    );

    let text = format!(
        "Thanks for joining the waitlist.\n\n\
         Confirm your email address:\n{link}\n\n\
         This link expires in {ttl_hours} hours. If you did not sign up, ignore this message.\n"
    );

    let mut headers = BTreeMap::new();
    // Unique per message so clients never thread confirmation mails together
    headers.insert("X-Entity-Ref-ID".to_string(), Uuid::new_v4().to_string());

    OutgoingEmail {
        to: to.to_string(),
        subject,
        html,
        text,
        headers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_email_contents() {
        let link = "https://api.test/waitlist/confirm?token=abc&x=1";
        let email = confirmation_email("a@b.com", link, "fr", 48);

        assert_eq!(email.to, "a@b.com");
        assert!(email.text.contains(link));
        assert!(email.html.contains("token=abc&amp;x=1"));
        assert!(email.html.contains(r#"lang="fr""#));
        assert!(email.html.contains("48 hours"));
        assert!(email.headers.contains_key("X-Entity-Ref-ID"));
    }

    #[test]
    fn test_send_body_shape() {
        let body = SendEmailBody {
            sender: EmailAddress {
                email: "hello@site.test".into(),
                name: Some("Site".into()),
            },
            to: vec![EmailAddress {
                email: "a@b.com".into(),
                name: None,
            }],
            subject: "s".into(),
            html_content: "<p>h</p>".into(),
            text_content: "t".into(),
            headers: BTreeMap::new(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["sender"]["name"], "Site");
        assert_eq!(json["htmlContent"], "<p>h</p>");
        assert_eq!(json["textContent"], "t");
        assert!(json["to"][0].get("name").is_none());
        assert!(json.get("headers").is_none());
    }

    #[tokio::test]
    async fn test_log_mailer_delivers() {
        let email = confirmation_email("a@b.com", "https://x.test", "en", 1);
        assert!(LogMailer.send(email).await.is_delivered());
    }
}
