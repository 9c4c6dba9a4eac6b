//! Waitlist storage contract
//!
//! Every mutation is scoped to one record. The confirmation flip is a single
//! conditional update so concurrent confirmations of one token cannot both
//! succeed.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::Result;
use crate::waitlist::record::{PendingToken, WaitlistRecord};

/// Fields written by a signup
#[derive(Debug, Clone)]
pub struct PendingSignup {
    pub email: String,
    pub token: PendingToken,
    /// Explicit choice from the payload; overwrites the stored locale
    pub locale: Option<String>,
    /// Request-negotiated locale, only stored on a new record
    pub fallback_locale: Option<String>,
    pub utm: BTreeMap<String, String>,
    pub referral: Option<String>,
}

impl PendingSignup {
    /// Locale a freshly created record starts with
    pub fn initial_locale(&self) -> Option<String> {
        self.locale.clone().or_else(|| self.fallback_locale.clone())
    }
}

/// Result of `upsert_pending`
///
/// `Created` and `Refreshed` carry the locale now stored on the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new pending record was created
    Created { locale: Option<String> },
    /// An existing pending or expired record got a fresh token
    Refreshed { locale: Option<String> },
    /// The record is confirmed and was left untouched
    AlreadyConfirmed,
    /// A soft-deleted record holds this email; nothing was written
    Suppressed,
}

impl UpsertOutcome {
    /// Locale for the confirmation email, `None` when no email goes out
    pub fn email_locale(&self) -> Option<Option<&str>> {
        match self {
            Self::Created { locale } | Self::Refreshed { locale } => Some(locale.as_deref()),
            Self::AlreadyConfirmed | Self::Suppressed => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Refreshed { .. } => "refreshed",
            Self::AlreadyConfirmed => "already_confirmed",
            Self::Suppressed => "suppressed",
        }
    }
}

/// Result of `rotate_token`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotateOutcome {
    /// Token replaced; carries the record's locale for the email
    Rotated { locale: Option<String> },
    AlreadyConfirmed,
    NotFound,
}

/// Result of the conditional confirmation update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed,
    Already,
    Expired,
    NotFound,
}

/// Signups on one UTC day
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    /// `YYYY-MM-DD`
    pub day: String,
    pub count: u64,
}

/// Aggregate counts for the admin view
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitlistStats {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_locale: BTreeMap<String, u64>,
    pub daily: Vec<DailyCount>,
}

/// Key used for records without a locale in `by_locale`
pub const UNKNOWN_LOCALE: &str = "unknown";

/// Persistence for waitlist records
#[async_trait]
pub trait WaitlistStore: Send + Sync {
    /// Record whose current or retired lookup hash matches. Ambiguous
    /// matches are reported as `None`.
    async fn find_by_lookup_hash(&self, lookup_hash: &str) -> Result<Option<WaitlistRecord>>;

    async fn find_by_email_hash(&self, email_hash: &str) -> Result<Option<WaitlistRecord>>;

    /// Create a pending record or refresh the token of an unconfirmed one.
    /// Attribution is first-touch; locale is refreshed when given.
    async fn upsert_pending(
        &self,
        email_hash: &str,
        signup: PendingSignup,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome>;

    /// Issue a new token for an existing unconfirmed record
    async fn rotate_token(
        &self,
        email_hash: &str,
        token: PendingToken,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome>;

    /// Flip the record holding `lookup_hash` as its current token to
    /// confirmed, if it is pending and unexpired at `now`
    async fn mark_confirmed(&self, lookup_hash: &str, now: DateTime<Utc>) -> Result<ConfirmOutcome>;

    /// Expire the record only while `lookup_hash` is its current token.
    /// Returns whether anything changed.
    async fn mark_expired(&self, lookup_hash: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Totals, per-locale counts and signups per day for the last `days` days
    async fn stats(&self, now: DateTime<Utc>, days: u32) -> Result<WaitlistStats>;

    /// Newest records first
    async fn recent(&self, limit: usize) -> Result<Vec<WaitlistRecord>>;

    /// Backend reachability for readiness probes
    async fn ping(&self) -> Result<()>;
}

/// Classify a failed conditional confirmation from the record as re-read
pub(crate) fn classify_unconfirmed(record: Option<&WaitlistRecord>) -> ConfirmOutcome {
    use crate::waitlist::record::WaitlistStatus;

    match record {
        None => ConfirmOutcome::NotFound,
        Some(r) if r.status == WaitlistStatus::Confirmed => ConfirmOutcome::Already,
        Some(_) => ConfirmOutcome::Expired,
    }
}

/// Day keys for the last `days` days ending with `now`, oldest first
pub(crate) fn day_keys(now: DateTime<Utc>, days: u32) -> Vec<String> {
    (0..days)
        .rev()
        .map(|offset| {
            (now - chrono::Duration::days(i64::from(offset)))
                .format("%Y-%m-%d")
                .to_string()
        })
        .collect()
}
