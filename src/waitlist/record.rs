//! Waitlist record domain type

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Most superseded token lookups remembered per record
pub const RETIRED_LOOKUP_LIMIT: usize = 10;

/// Lifecycle state of a waitlist entry.
///
/// `Pending -> Confirmed` is terminal. `Pending -> Expired` happens when a
/// stale token is presented; a later signup or resend moves the record back
/// to `Pending` with a fresh token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitlistStatus {
    Pending,
    Confirmed,
    Expired,
}

impl WaitlistStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Expired => "expired",
        }
    }
}

/// Freshly issued token material, as persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingToken {
    pub hash: String,
    pub salt: String,
    pub lookup_hash: String,
    pub expires_at: DateTime<Utc>,
}

/// One waitlist entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitlistRecord {
    /// Stable identifier derived from the email
    pub email_hash: String,
    pub email: String,
    pub status: WaitlistStatus,
    #[serde(skip)]
    pub confirm_token_hash: Option<String>,
    #[serde(skip)]
    pub confirm_token_lookup_hash: Option<String>,
    #[serde(skip)]
    pub confirm_salt: Option<String>,
    pub confirm_expires_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub retired_lookup_hashes: Vec<String>,
    pub locale: Option<String>,
    pub utm: BTreeMap<String, String>,
    pub referral: Option<String>,
    pub consented_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WaitlistRecord {
    /// New pending record
    pub fn pending(
        email_hash: String,
        email: String,
        token: PendingToken,
        locale: Option<String>,
        utm: BTreeMap<String, String>,
        referral: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            email_hash,
            email,
            status: WaitlistStatus::Pending,
            confirm_token_hash: Some(token.hash),
            confirm_token_lookup_hash: Some(token.lookup_hash),
            confirm_salt: Some(token.salt),
            confirm_expires_at: Some(token.expires_at),
            confirmed_at: None,
            retired_lookup_hashes: Vec::new(),
            locale,
            utm,
            referral,
            consented_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `lookup_hash` is the current token or a superseded one
    pub fn knows_lookup(&self, lookup_hash: &str) -> bool {
        self.confirm_token_lookup_hash.as_deref() == Some(lookup_hash)
            || self.retired_lookup_hashes.iter().any(|h| h == lookup_hash)
    }

    /// Move the current lookup hash onto the retired list and clear the
    /// token fields
    fn retire_token(&mut self) {
        if let Some(previous) = self.confirm_token_lookup_hash.take() {
            self.retired_lookup_hashes.push(previous);
            let overflow = self
                .retired_lookup_hashes
                .len()
                .saturating_sub(RETIRED_LOOKUP_LIMIT);
            self.retired_lookup_hashes.drain(..overflow);
        }
        self.confirm_token_hash = None;
        self.confirm_salt = None;
    }

    /// Replace the token and return to pending
    pub fn install_token(&mut self, token: PendingToken, now: DateTime<Utc>) {
        self.retire_token();
        self.status = WaitlistStatus::Pending;
        self.confirm_token_hash = Some(token.hash);
        self.confirm_token_lookup_hash = Some(token.lookup_hash);
        self.confirm_salt = Some(token.salt);
        self.confirm_expires_at = Some(token.expires_at);
        self.updated_at = now;
    }

    /// Terminal confirmation; token fields are cleared for good
    pub fn confirm(&mut self, now: DateTime<Utc>) {
        self.retire_token();
        self.status = WaitlistStatus::Confirmed;
        self.confirmed_at.get_or_insert(now);
        self.updated_at = now;
    }

    /// Expire the current token
    pub fn expire(&mut self, now: DateTime<Utc>) {
        self.retire_token();
        self.status = WaitlistStatus::Expired;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(n: usize, now: DateTime<Utc>) -> PendingToken {
        PendingToken {
            hash: format!("hash-{n}"),
            salt: format!("salt-{n}"),
            lookup_hash: format!("lookup-{n}"),
            expires_at: now + Duration::hours(48),
        }
    }

    #[test]
    fn test_install_token_retires_previous() {
        let now = Utc::now();
        let mut record = WaitlistRecord::pending(
            "h".into(),
            "a@example.com".into(),
            token(0, now),
            None,
            BTreeMap::new(),
            None,
            now,
        );
        record.status = WaitlistStatus::Expired;

        record.install_token(token(1, now), now);

        assert_eq!(record.status, WaitlistStatus::Pending);
        assert_eq!(record.confirm_token_lookup_hash.as_deref(), Some("lookup-1"));
        assert!(record.knows_lookup("lookup-0"));
        assert!(record.knows_lookup("lookup-1"));
        assert!(!record.knows_lookup("lookup-2"));
    }

    #[test]
    fn test_retired_list_is_bounded() {
        let now = Utc::now();
        let mut record = WaitlistRecord::pending(
            "h".into(),
            "a@example.com".into(),
            token(0, now),
            None,
            BTreeMap::new(),
            None,
            now,
        );
        for n in 1..=15 {
            record.install_token(token(n, now), now);
        }

        assert_eq!(record.retired_lookup_hashes.len(), RETIRED_LOOKUP_LIMIT);
        assert!(!record.knows_lookup("lookup-4"));
        assert!(record.knows_lookup("lookup-5"));
        assert!(record.knows_lookup("lookup-15"));
    }

    #[test]
    fn test_confirm_clears_token_fields() {
        let now = Utc::now();
        let mut record = WaitlistRecord::pending(
            "h".into(),
            "a@example.com".into(),
            token(0, now),
            None,
            BTreeMap::new(),
            None,
            now,
        );

        record.confirm(now);

        assert_eq!(record.status, WaitlistStatus::Confirmed);
        assert_eq!(record.confirmed_at, Some(now));
        assert!(record.confirm_token_hash.is_none());
        assert!(record.confirm_salt.is_none());
        assert!(record.confirm_token_lookup_hash.is_none());
        assert!(record.knows_lookup("lookup-0"));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&WaitlistStatus::Confirmed).unwrap(),
            "\"confirmed\""
        );
    }
}
