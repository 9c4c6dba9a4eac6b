//! Request payload validation
//!
//! Bodies are parsed once into `serde_json::Value` at the handler boundary and
//! checked here. Each validator returns either a typed, normalized payload or
//! the full list of offending field paths.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::locale::LocaleConfig;

/// Maximum accepted email length (RFC 5321 path limit)
pub const MAX_EMAIL_LEN: usize = 254;

/// Maximum local-part length
pub const MAX_LOCAL_PART_LEN: usize = 64;

/// Maximum length of any attribution value
pub const MAX_ATTRIBUTION_LEN: usize = 200;

/// UTM keys carried through to the record
pub const UTM_KEYS: &[&str] = &["source", "medium", "campaign", "term", "content"];

/// One offending field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    pub path: String,
    pub message: String,
}

/// All problems found in a payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    pub issues: Vec<FieldIssue>,
}

impl ValidationErrors {
    fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.issues.push(FieldIssue {
            path: path.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Client-facing error code.
    ///
    /// `email_required` / `invalid_email` when the email is the only problem,
    /// `invalid_payload` otherwise.
    pub fn code(&self) -> &'static str {
        let only_email = !self.issues.is_empty() && self.issues.iter().all(|i| i.path == "email");
        if only_email {
            if self.issues.iter().any(|i| i.message == EMAIL_REQUIRED) {
                "email_required"
            } else {
                "invalid_email"
            }
        } else {
            "invalid_payload"
        }
    }
}

const EMAIL_REQUIRED: &str = "Email is required";

/// Validated signup body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidSignup {
    pub email: String,
    pub captcha_token: String,
    pub locale: Option<String>,
    /// Filled by the handler from request headers, used when `locale` is absent
    pub negotiated_locale: Option<String>,
    pub utm: BTreeMap<String, String>,
    pub referral: Option<String>,
}

/// Validated resend body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidResend {
    pub email: String,
    pub captcha_token: String,
}

/// Validated consent body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidConsent {
    pub analytics: bool,
    pub marketing: bool,
    pub locale: Option<String>,
}

/// Validated analytics event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidEvent {
    pub name: String,
    pub path: String,
    pub referrer_host: Option<String>,
    pub locale: Option<String>,
}

// =============================================================================
// Email
// =============================================================================

/// Trim and lower-case an email
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Structural email check on an already-normalized address
pub fn is_valid_email(email: &str) -> bool {
    if email.is_empty() || email.len() > MAX_EMAIL_LEN {
        return false;
    }
    if email.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return false;
    }

    let mut parts = email.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };

    if local.is_empty() || local.len() > MAX_LOCAL_PART_LEN {
        return false;
    }
    if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return false;
    }

    if !domain.contains('.') {
        return false;
    }
    domain.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_alphanumeric() || c == '-')
    })
}

fn field_email(body: &Value, errors: &mut ValidationErrors) -> Option<String> {
    match body.get("email") {
        None | Some(Value::Null) => {
            errors.push("email", EMAIL_REQUIRED);
            None
        }
        Some(Value::String(raw)) => {
            let email = normalize_email(raw);
            if email.is_empty() {
                errors.push("email", EMAIL_REQUIRED);
                None
            } else if !is_valid_email(&email) {
                errors.push("email", "Email address is not valid");
                None
            } else {
                Some(email)
            }
        }
        Some(_) => {
            errors.push("email", "Expected a string");
            None
        }
    }
}

fn field_captcha(body: &Value, errors: &mut ValidationErrors) -> Option<String> {
    match body.get("captchaToken") {
        Some(Value::String(token)) if !token.trim().is_empty() => Some(token.trim().to_string()),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            errors.push("captchaToken", "Captcha token is required");
            None
        }
        Some(_) => {
            errors.push("captchaToken", "Expected a string");
            None
        }
    }
}

fn optional_string(
    body: &Value,
    key: &str,
    path: &str,
    max_len: usize,
    errors: &mut ValidationErrors,
) -> Option<String> {
    match body.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.chars().count() > max_len {
                errors.push(path, format!("Must be at most {max_len} characters"));
                None
            } else if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        }
        Some(_) => {
            errors.push(path, "Expected a string");
            None
        }
    }
}

fn field_locale(body: &Value, locales: &LocaleConfig, errors: &mut ValidationErrors) -> Option<String> {
    // An unsupported locale is not an error: negotiation picks one instead.
    optional_string(body, "locale", "locale", 35, errors).and_then(|tag| locales.match_tag(&tag))
}

fn require_bool(body: &Value, key: &str, errors: &mut ValidationErrors) -> Option<bool> {
    match body.get(key) {
        Some(Value::Bool(b)) => Some(*b),
        None | Some(Value::Null) => {
            errors.push(key, "Required");
            None
        }
        Some(_) => {
            errors.push(key, "Expected a boolean");
            None
        }
    }
}

fn require_object(body: &Value, errors: &mut ValidationErrors) -> bool {
    if body.is_object() {
        true
    } else {
        errors.push("", "Expected a JSON object");
        false
    }
}

// =============================================================================
// Payload validators
// =============================================================================

/// `POST /waitlist/signup`
pub fn validate_signup(body: &Value, locales: &LocaleConfig) -> Result<ValidSignup, ValidationErrors> {
    let mut errors = ValidationErrors::default();
    if !require_object(body, &mut errors) {
        return Err(errors);
    }

    let email = field_email(body, &mut errors);

    match body.get("consent") {
        Some(Value::Bool(true)) => {}
        Some(Value::Bool(false)) => errors.push("consent", "Consent must be given"),
        None | Some(Value::Null) => errors.push("consent", "Consent is required"),
        Some(_) => errors.push("consent", "Expected a boolean"),
    }

    let captcha_token = field_captcha(body, &mut errors);
    let locale = field_locale(body, locales, &mut errors);

    let mut utm = BTreeMap::new();
    match body.get("utm") {
        None | Some(Value::Null) => {}
        Some(utm_body @ Value::Object(_)) => {
            for key in UTM_KEYS {
                let path = format!("utm.{key}");
                if let Some(value) =
                    optional_string(utm_body, key, &path, MAX_ATTRIBUTION_LEN, &mut errors)
                {
                    utm.insert((*key).to_string(), value);
                }
            }
        }
        Some(_) => errors.push("utm", "Expected an object"),
    }

    let referral = optional_string(body, "ref", "ref", MAX_ATTRIBUTION_LEN, &mut errors);

    match (email, captcha_token) {
        (Some(email), Some(captcha_token)) if errors.is_empty() => Ok(ValidSignup {
            email,
            captcha_token,
            locale,
            negotiated_locale: None,
            utm,
            referral,
        }),
        _ => Err(errors),
    }
}

/// `POST /waitlist/resend`
pub fn validate_resend(body: &Value) -> Result<ValidResend, ValidationErrors> {
    let mut errors = ValidationErrors::default();
    if !require_object(body, &mut errors) {
        return Err(errors);
    }

    let email = field_email(body, &mut errors);
    let captcha_token = field_captcha(body, &mut errors);

    match (email, captcha_token) {
        (Some(email), Some(captcha_token)) if errors.is_empty() => Ok(ValidResend {
            email,
            captcha_token,
        }),
        _ => Err(errors),
    }
}

/// `POST /consent`
pub fn validate_consent(body: &Value, locales: &LocaleConfig) -> Result<ValidConsent, ValidationErrors> {
    let mut errors = ValidationErrors::default();
    if !require_object(body, &mut errors) {
        return Err(errors);
    }

    let analytics = require_bool(body, "analytics", &mut errors);
    let marketing = require_bool(body, "marketing", &mut errors);
    let locale = field_locale(body, locales, &mut errors);

    match (analytics, marketing) {
        (Some(analytics), Some(marketing)) if errors.is_empty() => Ok(ValidConsent {
            analytics,
            marketing,
            locale,
        }),
        _ => Err(errors),
    }
}

/// `POST /analytics/event`
pub fn validate_event(body: &Value, locales: &LocaleConfig) -> Result<ValidEvent, ValidationErrors> {
    let mut errors = ValidationErrors::default();
    if !require_object(body, &mut errors) {
        return Err(errors);
    }

    let name = match body.get("name") {
        Some(Value::String(name))
            if !name.is_empty()
                && name.len() <= 64
                && name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "_.-".contains(c)) =>
        {
            Some(name.clone())
        }
        _ => {
            errors.push("name", "Expected 1-64 characters of [a-z0-9_.-]");
            None
        }
    };

    let path = match body.get("path") {
        Some(Value::String(path)) if path.starts_with('/') && path.len() <= 512 => {
            // Query strings may carry personal data; keep the path only.
            Some(path.split(['?', '#']).next().unwrap_or("/").to_string())
        }
        _ => {
            errors.push("path", "Expected an absolute path of at most 512 characters");
            None
        }
    };

    let referrer_host = optional_string(body, "referrer", "referrer", 2048, &mut errors)
        .and_then(|r| referrer_host(&r));
    let locale = field_locale(body, locales, &mut errors);

    match (name, path) {
        (Some(name), Some(path)) if errors.is_empty() => Ok(ValidEvent {
            name,
            path,
            referrer_host,
            locale,
        }),
        _ => Err(errors),
    }
}

/// Host part of a referrer URL, lower-cased
pub fn referrer_host(referrer: &str) -> Option<String> {
    let rest = referrer
        .strip_prefix("https://")
        .or_else(|| referrer.strip_prefix("http://"))?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.rsplit('@').next()?.split(':').next()?;
    (!host.is_empty()).then(|| host.to_lowercase())
}
