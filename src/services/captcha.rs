//! Captcha verification
//!
//! The production verifier speaks the siteverify protocol shared by
//! Turnstile, hCaptcha and reCAPTCHA: a form POST of `secret`, `response`
//! and `remoteip`, answered with `{success, error-codes}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{Result, WaitlistError};

/// Provider verdict for one proof
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CaptchaOutcome {
    pub success: bool,
    #[serde(default, rename = "error-codes")]
    pub error_codes: Vec<String>,
}

impl CaptchaOutcome {
    pub fn passed() -> Self {
        Self {
            success: true,
            error_codes: Vec::new(),
        }
    }

    pub fn failed(code: &str) -> Self {
        Self {
            success: false,
            error_codes: vec![code.to_string()],
        }
    }
}

/// Verifies a client-supplied captcha proof.
///
/// `Ok` with `success: false` is a rejected proof; `Err` means the provider
/// could not be asked.
#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    async fn verify(&self, token: &str, remote_ip: Option<&str>) -> Result<CaptchaOutcome>;
}

#[derive(Serialize)]
struct SiteVerifyForm<'a> {
    secret: &'a str,
    response: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    remoteip: Option<&'a str>,
}

/// Siteverify client
pub struct TurnstileVerifier {
    secret: String,
    verify_url: String,
    http_client: reqwest::Client,
}

impl TurnstileVerifier {
    pub fn new(secret: String, verify_url: String) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| WaitlistError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            secret,
            verify_url,
            http_client,
        })
    }
}

#[async_trait]
impl CaptchaVerifier for TurnstileVerifier {
    async fn verify(&self, token: &str, remote_ip: Option<&str>) -> Result<CaptchaOutcome> {
        let form = serde_urlencoded::to_string(SiteVerifyForm {
            secret: &self.secret,
            response: token,
            remoteip: remote_ip,
        })
        .map_err(|e| WaitlistError::Internal(format!("Failed to encode captcha form: {}", e)))?;

        let response = self
            .http_client
            .post(&self.verify_url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(form)
            .send()
            .await
            .map_err(|e| WaitlistError::Captcha(format!("Siteverify request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Captcha provider returned an error status");
            return Err(WaitlistError::Captcha(format!(
                "Siteverify returned status {}",
                status
            )));
        }

        let outcome: CaptchaOutcome = response
            .json()
            .await
            .map_err(|e| WaitlistError::Captcha(format!("Invalid siteverify response: {}", e)))?;

        if !outcome.success {
            debug!(error_codes = ?outcome.error_codes, "Captcha proof rejected");
        }

        Ok(outcome)
    }
}

/// Development verifier: any non-empty proof passes
#[derive(Debug, Default, Clone, Copy)]
pub struct BypassCaptcha;

#[async_trait]
impl CaptchaVerifier for BypassCaptcha {
    async fn verify(&self, token: &str, _remote_ip: Option<&str>) -> Result<CaptchaOutcome> {
        if token.trim().is_empty() {
            Ok(CaptchaOutcome::failed("missing-input-response"))
        } else {
            Ok(CaptchaOutcome::passed())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_parses_provider_payload() {
        let outcome: CaptchaOutcome = serde_json::from_str(
            r#"{"success":false,"error-codes":["invalid-input-response"],"hostname":"x"}"#,
        )
        .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error_codes, vec!["invalid-input-response"]);

        let outcome: CaptchaOutcome = serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert_eq!(outcome, CaptchaOutcome::passed());
    }

    #[test]
    fn test_form_encoding_skips_missing_ip() {
        let form = serde_urlencoded::to_string(SiteVerifyForm {
            secret: "s",
            response: "tok en",
            remoteip: None,
        })
        .unwrap();
        assert_eq!(form, "secret=s&response=tok+en");
    }

    #[tokio::test]
    async fn test_bypass_requires_token() {
        assert!(BypassCaptcha.verify("anything", None).await.unwrap().success);
        assert!(!BypassCaptcha.verify("  ", None).await.unwrap().success);
    }
}
