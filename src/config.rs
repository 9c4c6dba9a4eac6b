//! Configuration for the waitlist service
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

use crate::locale::LocaleConfig;
use crate::ratelimit::{RateLimitRule, RateLimitRules};

/// Upper bound on token lifetime (one year)
const MAX_CONFIRM_TOKEN_TTL_HOURS: u64 = 24 * 365;

/// Waitlist signup and confirmation service
#[derive(Parser, Debug, Clone)]
#[command(name = "waitlist")]
#[command(about = "Waitlist signup, confirmation, consent and analytics API")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (in-memory stores, captcha bypass, log-only mailer)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "waitlist")]
    pub mongodb_db: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Public base URL of this API, used in confirmation links
    #[arg(long, env = "PUBLIC_URL", default_value = "http://localhost:8080")]
    pub public_url: String,

    /// Base URL of the marketing site that hosts the localized result pages
    #[arg(long, env = "SITE_URL", default_value = "http://localhost:3000")]
    pub site_url: String,

    /// Secret mixed into the email hash that keys waitlist records (required in production)
    #[arg(long, env = "EMAIL_HASH_SECRET")]
    pub email_hash_secret: Option<String>,

    /// Lifetime of a confirmation token in hours
    #[arg(long, env = "CONFIRM_TOKEN_TTL_HOURS", default_value = "48")]
    pub confirm_token_ttl_hours: u64,

    /// Signups allowed per client IP per window
    #[arg(long, env = "SIGNUP_RATE_LIMIT_MAX", default_value = "5")]
    pub signup_rate_limit_max: u32,

    /// Signup rate-limit window in seconds
    #[arg(long, env = "SIGNUP_RATE_LIMIT_WINDOW_SECS", default_value = "3600")]
    pub signup_rate_limit_window_secs: u64,

    /// Resends allowed per email per window
    #[arg(long, env = "RESEND_RATE_LIMIT_MAX", default_value = "3")]
    pub resend_rate_limit_max: u32,

    /// Resend rate-limit window in seconds
    #[arg(long, env = "RESEND_RATE_LIMIT_WINDOW_SECS", default_value = "3600")]
    pub resend_rate_limit_window_secs: u64,

    /// Analytics events allowed per client IP per window
    #[arg(long, env = "ANALYTICS_RATE_LIMIT_MAX", default_value = "120")]
    pub analytics_rate_limit_max: u32,

    /// Analytics rate-limit window in seconds
    #[arg(long, env = "ANALYTICS_RATE_LIMIT_WINDOW_SECS", default_value = "60")]
    pub analytics_rate_limit_window_secs: u64,

    /// Captcha provider secret (required in production)
    #[arg(long, env = "CAPTCHA_SECRET")]
    pub captcha_secret: Option<String>,

    /// Captcha siteverify endpoint
    #[arg(
        long,
        env = "CAPTCHA_VERIFY_URL",
        default_value = "https://challenges.cloudflare.com/turnstile/v0/siteverify"
    )]
    pub captcha_verify_url: String,

    /// Transactional email API endpoint
    #[arg(long, env = "EMAIL_API_URL", default_value = "https://api.brevo.com/v3/smtp/email")]
    pub email_api_url: String,

    /// Transactional email API key (required in production)
    #[arg(long, env = "EMAIL_API_KEY")]
    pub email_api_key: Option<String>,

    /// Sender address for transactional email (required in production)
    #[arg(long, env = "EMAIL_SENDER")]
    pub email_sender: Option<String>,

    /// Sender display name
    #[arg(long, env = "EMAIL_SENDER_NAME")]
    pub email_sender_name: Option<String>,

    /// Bearer key for the admin reporting endpoints
    #[arg(long, env = "ADMIN_API_KEY")]
    pub admin_api_key: Option<String>,

    /// Comma-separated list of supported locales
    #[arg(long, env = "SUPPORTED_LOCALES", default_value = "en,es,fr,de")]
    pub supported_locales: String,

    /// Locale used when negotiation finds nothing better
    #[arg(long, env = "DEFAULT_LOCALE", default_value = "en")]
    pub default_locale: String,

    /// Trust X-Forwarded-For for the client IP (only behind a reverse proxy)
    #[arg(long, env = "TRUST_PROXY", default_value = "false")]
    pub trust_proxy: bool,

    /// Optional path for the JSONL funnel log
    #[arg(long, env = "FUNNEL_LOG_PATH")]
    pub funnel_log_path: Option<String>,
}

impl Args {
    /// Get the effective email hash secret (uses a fixed value in dev mode)
    pub fn email_hash_secret(&self) -> String {
        match &self.email_hash_secret {
            Some(secret) if !secret.is_empty() => secret.clone(),
            _ => "dev-only-insecure-email-secret".to_string(),
        }
    }

    /// Confirmation token lifetime
    pub fn confirm_token_ttl(&self) -> Duration {
        Duration::from_secs(self.confirm_token_ttl_hours.saturating_mul(60 * 60))
    }

    /// Locale list and default, normalized to lower case
    pub fn locale_config(&self) -> LocaleConfig {
        let supported = self
            .supported_locales
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        LocaleConfig::new(supported, self.default_locale.trim().to_lowercase())
    }

    /// Rate-limit rules for every scope
    pub fn rate_limit_rules(&self) -> RateLimitRules {
        RateLimitRules {
            submit_per_ip: RateLimitRule::new(
                self.signup_rate_limit_max,
                Duration::from_secs(self.signup_rate_limit_window_secs),
            ),
            resend_per_email: RateLimitRule::new(
                self.resend_rate_limit_max,
                Duration::from_secs(self.resend_rate_limit_window_secs),
            ),
            analytics_per_ip: RateLimitRule::new(
                self.analytics_rate_limit_max,
                Duration::from_secs(self.analytics_rate_limit_window_secs),
            ),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode {
            if self.email_hash_secret.as_deref().map_or(true, str::is_empty) {
                return Err("EMAIL_HASH_SECRET is required in production mode".to_string());
            }
            if self.captcha_secret.as_deref().map_or(true, str::is_empty) {
                return Err("CAPTCHA_SECRET is required in production mode".to_string());
            }
            if self.email_api_key.is_none() || self.email_sender.is_none() {
                return Err(
                    "EMAIL_API_KEY and EMAIL_SENDER are required in production mode".to_string(),
                );
            }
        }

        let locales = self.locale_config();
        if locales.supported().is_empty() {
            return Err("SUPPORTED_LOCALES must list at least one locale".to_string());
        }
        if !locales.is_supported(locales.default_locale()) {
            return Err(format!(
                "DEFAULT_LOCALE '{}' is not in SUPPORTED_LOCALES",
                self.default_locale
            ));
        }

        for (name, max, window) in [
            ("SIGNUP", self.signup_rate_limit_max, self.signup_rate_limit_window_secs),
            ("RESEND", self.resend_rate_limit_max, self.resend_rate_limit_window_secs),
            (
                "ANALYTICS",
                self.analytics_rate_limit_max,
                self.analytics_rate_limit_window_secs,
            ),
        ] {
            if max == 0 || window == 0 {
                return Err(format!(
                    "{name}_RATE_LIMIT_MAX and {name}_RATE_LIMIT_WINDOW_SECS must be greater than zero"
                ));
            }
        }

        if self.confirm_token_ttl_hours == 0 {
            return Err("CONFIRM_TOKEN_TTL_HOURS must be greater than zero".to_string());
        }
        if self.confirm_token_ttl_hours > MAX_CONFIRM_TOKEN_TTL_HOURS {
            return Err(format!(
                "CONFIRM_TOKEN_TTL_HOURS must be at most {}",
                MAX_CONFIRM_TOKEN_TTL_HOURS
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev_args() -> Args {
        Args::parse_from(["waitlist", "--dev-mode"])
    }

    #[test]
    fn test_dev_defaults_validate() {
        let args = dev_args();
        assert!(args.validate().is_ok());
        assert_eq!(args.confirm_token_ttl(), Duration::from_secs(48 * 3600));
        assert_eq!(args.locale_config().default_locale(), "en");
    }

    #[test]
    fn test_production_requires_secrets() {
        let args = Args::parse_from(["waitlist"]);
        let err = args.validate().unwrap_err();
        assert!(err.contains("EMAIL_HASH_SECRET"));

        let args = Args::parse_from([
            "waitlist",
            "--email-hash-secret",
            "s3cret",
            "--captcha-secret",
            "captcha",
            "--email-api-key",
            "key",
            "--email-sender",
            "hello@example.com",
        ]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_default_locale_must_be_supported() {
        let args = Args::parse_from([
            "waitlist",
            "--dev-mode",
            "--supported-locales",
            "en,es",
            "--default-locale",
            "pt",
        ]);
        assert!(args.validate().unwrap_err().contains("DEFAULT_LOCALE"));
    }

    #[test]
    fn test_zero_rate_limit_rejected() {
        let args = Args::parse_from(["waitlist", "--dev-mode", "--signup-rate-limit-max", "0"]);
        assert!(args.validate().unwrap_err().contains("SIGNUP_RATE_LIMIT_MAX"));
    }

    #[test]
    fn test_token_ttl_is_bounded() {
        let year = Args::parse_from(["waitlist", "--dev-mode", "--confirm-token-ttl-hours", "8760"]);
        assert!(year.validate().is_ok());

        let huge = Args::parse_from([
            "waitlist",
            "--dev-mode",
            "--confirm-token-ttl-hours",
            "18446744073709551615",
        ]);
        assert!(huge.validate().unwrap_err().contains("CONFIRM_TOKEN_TTL_HOURS"));
        assert_eq!(huge.confirm_token_ttl(), Duration::from_secs(u64::MAX));
    }
}
