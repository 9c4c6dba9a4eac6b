//! Confirmation token processing
//!
//! Checks run in a fixed order and every outcome is a lifecycle state, not an
//! error. A well-formed token that fails verification reports `Expired`, the
//! same as a genuinely stale one, so callers cannot tell the two apart.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::auth::{constant_time_equals, hash_token, lookup_hash, short_hash, MIN_TOKEN_LEN};
use crate::types::Result;
use crate::waitlist::record::WaitlistStatus;
use crate::waitlist::store::{ConfirmOutcome, WaitlistStore};

/// Lifecycle outcome of presenting a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    Invalid,
    NotFound,
    Already,
    Expired,
    Confirmed,
}

impl ConfirmationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::NotFound => "not_found",
            Self::Already => "already",
            Self::Expired => "expired",
            Self::Confirmed => "confirmed",
        }
    }
}

impl From<ConfirmOutcome> for ConfirmationStatus {
    fn from(outcome: ConfirmOutcome) -> Self {
        match outcome {
            ConfirmOutcome::Confirmed => Self::Confirmed,
            ConfirmOutcome::Already => Self::Already,
            ConfirmOutcome::Expired => Self::Expired,
            ConfirmOutcome::NotFound => Self::NotFound,
        }
    }
}

/// Result of [`process_confirmation_token`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationResult {
    pub status: ConfirmationStatus,
    /// Email hash of the matched record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

impl ConfirmationResult {
    fn bare(status: ConfirmationStatus) -> Self {
        Self {
            status,
            doc_id: None,
            locale: None,
        }
    }
}

/// Drive a raw token through the confirmation state machine at `now`.
///
/// Only store failures are errors. Sends no email.
pub async fn process_confirmation_token(
    store: &dyn WaitlistStore,
    raw_token: Option<&str>,
    now: DateTime<Utc>,
) -> Result<ConfirmationResult> {
    let token = match raw_token.map(str::trim) {
        Some(t) if t.len() >= MIN_TOKEN_LEN => t,
        _ => return Ok(ConfirmationResult::bare(ConfirmationStatus::Invalid)),
    };

    let lookup = lookup_hash(token);
    let Some(record) = store.find_by_lookup_hash(&lookup).await? else {
        return Ok(ConfirmationResult::bare(ConfirmationStatus::NotFound));
    };

    let outcome = |status| ConfirmationResult {
        status,
        doc_id: Some(record.email_hash.clone()),
        locale: record.locale.clone(),
    };

    match record.status {
        WaitlistStatus::Confirmed => return Ok(outcome(ConfirmationStatus::Already)),
        WaitlistStatus::Expired => return Ok(outcome(ConfirmationStatus::Expired)),
        WaitlistStatus::Pending => {}
    }

    if record.confirm_expires_at.map_or(true, |at| at <= now) {
        store.mark_expired(&lookup, now).await?;
        debug!(doc_id = %short_hash(&record.email_hash), "Confirmation token past expiry");
        return Ok(outcome(ConfirmationStatus::Expired));
    }

    let (Some(salt), Some(expected)) = (
        record.confirm_salt.as_deref(),
        record.confirm_token_hash.as_deref(),
    ) else {
        store.mark_expired(&lookup, now).await?;
        debug!(doc_id = %short_hash(&record.email_hash), "Pending record missing token material");
        return Ok(outcome(ConfirmationStatus::Expired));
    };

    let Ok(presented) = hash_token(token, Some(salt)) else {
        store.mark_expired(&lookup, now).await?;
        debug!(doc_id = %short_hash(&record.email_hash), "Pending record has unusable salt");
        return Ok(outcome(ConfirmationStatus::Expired));
    };
    if !constant_time_equals(&presented.hash, expected) {
        // Also reached by a superseded token replayed against a rotated
        // record; mark_expired only touches the current token.
        store.mark_expired(&lookup, now).await?;
        return Ok(outcome(ConfirmationStatus::Expired));
    }

    let status = ConfirmationStatus::from(store.mark_confirmed(&lookup, now).await?);
    if status == ConfirmationStatus::Confirmed {
        info!(doc_id = %short_hash(&record.email_hash), "Waitlist entry confirmed");
    }
    Ok(outcome(status))
}
