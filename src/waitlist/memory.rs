//! In-memory waitlist store for development mode and tests

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::types::Result;
use crate::waitlist::record::{PendingToken, WaitlistRecord, WaitlistStatus};
use crate::waitlist::store::{
    classify_unconfirmed, day_keys, ConfirmOutcome, DailyCount, PendingSignup, RotateOutcome,
    UpsertOutcome, WaitlistStats, WaitlistStore, UNKNOWN_LOCALE,
};

/// Records keyed by email hash behind one lock; each operation holds the
/// write lock for its whole read-modify-write.
#[derive(Default)]
pub struct MemoryWaitlistStore {
    records: RwLock<HashMap<String, WaitlistRecord>>,
}

impl MemoryWaitlistStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

fn find_current<'a>(
    records: &'a mut HashMap<String, WaitlistRecord>,
    lookup_hash: &str,
) -> Option<&'a mut WaitlistRecord> {
    records
        .values_mut()
        .find(|r| r.confirm_token_lookup_hash.as_deref() == Some(lookup_hash))
}

fn find_known<'a>(
    records: &'a HashMap<String, WaitlistRecord>,
    lookup_hash: &str,
) -> Option<&'a WaitlistRecord> {
    let mut matches = records.values().filter(|r| r.knows_lookup(lookup_hash));
    match (matches.next(), matches.next()) {
        (Some(record), None) => Some(record),
        _ => None,
    }
}

#[async_trait]
impl WaitlistStore for MemoryWaitlistStore {
    async fn find_by_lookup_hash(&self, lookup_hash: &str) -> Result<Option<WaitlistRecord>> {
        let records = self.records.read().await;
        Ok(find_known(&records, lookup_hash).cloned())
    }

    async fn find_by_email_hash(&self, email_hash: &str) -> Result<Option<WaitlistRecord>> {
        Ok(self.records.read().await.get(email_hash).cloned())
    }

    async fn upsert_pending(
        &self,
        email_hash: &str,
        signup: PendingSignup,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        let mut records = self.records.write().await;

        match records.get_mut(email_hash) {
            Some(record) if record.status == WaitlistStatus::Confirmed => {
                Ok(UpsertOutcome::AlreadyConfirmed)
            }
            Some(record) => {
                record.install_token(signup.token, now);
                if signup.locale.is_some() {
                    record.locale = signup.locale;
                }
                Ok(UpsertOutcome::Refreshed {
                    locale: record.locale.clone(),
                })
            }
            None => {
                let locale = signup.initial_locale();
                let record = WaitlistRecord::pending(
                    email_hash.to_string(),
                    signup.email,
                    signup.token,
                    locale.clone(),
                    signup.utm,
                    signup.referral,
                    now,
                );
                records.insert(email_hash.to_string(), record);
                Ok(UpsertOutcome::Created { locale })
            }
        }
    }

    async fn rotate_token(
        &self,
        email_hash: &str,
        token: PendingToken,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome> {
        let mut records = self.records.write().await;

        Ok(match records.get_mut(email_hash) {
            None => RotateOutcome::NotFound,
            Some(record) if record.status == WaitlistStatus::Confirmed => {
                RotateOutcome::AlreadyConfirmed
            }
            Some(record) => {
                record.install_token(token, now);
                RotateOutcome::Rotated {
                    locale: record.locale.clone(),
                }
            }
        })
    }

    async fn mark_confirmed(&self, lookup_hash: &str, now: DateTime<Utc>) -> Result<ConfirmOutcome> {
        let mut records = self.records.write().await;

        if let Some(record) = find_current(&mut records, lookup_hash) {
            let live = record.status == WaitlistStatus::Pending
                && record.confirm_expires_at.is_some_and(|at| at > now);
            if live {
                record.confirm(now);
                return Ok(ConfirmOutcome::Confirmed);
            }
        }

        Ok(classify_unconfirmed(find_known(&records, lookup_hash)))
    }

    async fn mark_expired(&self, lookup_hash: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut records = self.records.write().await;

        match find_current(&mut records, lookup_hash) {
            Some(record) if record.status == WaitlistStatus::Pending => {
                record.expire(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn stats(&self, now: DateTime<Utc>, days: u32) -> Result<WaitlistStats> {
        let records = self.records.read().await;

        let mut stats = WaitlistStats {
            total: records.len() as u64,
            ..Default::default()
        };
        let keys = day_keys(now, days);
        let mut per_day: BTreeMap<String, u64> = keys.iter().map(|k| (k.clone(), 0)).collect();

        for record in records.values() {
            *stats
                .by_status
                .entry(record.status.as_str().to_string())
                .or_default() += 1;
            let locale = record.locale.as_deref().unwrap_or(UNKNOWN_LOCALE);
            *stats.by_locale.entry(locale.to_string()).or_default() += 1;

            let day = record.created_at.format("%Y-%m-%d").to_string();
            if let Some(count) = per_day.get_mut(&day) {
                *count += 1;
            }
        }

        stats.daily = keys
            .into_iter()
            .map(|day| {
                let count = per_day.get(&day).copied().unwrap_or_default();
                DailyCount { day, count }
            })
            .collect();

        Ok(stats)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<WaitlistRecord>> {
        let records = self.records.read().await;
        let mut all: Vec<WaitlistRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        Ok(all)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(n: u32, expires_at: DateTime<Utc>) -> PendingToken {
        PendingToken {
            hash: format!("hash-{n}"),
            salt: format!("salt-{n}"),
            lookup_hash: format!("lookup-{n}"),
            expires_at,
        }
    }

    fn signup(n: u32, now: DateTime<Utc>) -> PendingSignup {
        let mut utm = BTreeMap::new();
        utm.insert("source".to_string(), format!("campaign-{n}"));
        PendingSignup {
            email: "a@b.com".into(),
            token: token(n, now + Duration::hours(48)),
            locale: Some("en".into()),
            fallback_locale: None,
            utm,
            referral: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_create_refresh_confirmed() {
        let store = MemoryWaitlistStore::new();
        let now = Utc::now();

        assert_eq!(
            store.upsert_pending("e1", signup(1, now), now).await.unwrap(),
            UpsertOutcome::Created { locale: Some("en".into()) }
        );
        assert_eq!(
            store.upsert_pending("e1", signup(2, now), now).await.unwrap(),
            UpsertOutcome::Refreshed { locale: Some("en".into()) }
        );

        let record = store.find_by_email_hash("e1").await.unwrap().unwrap();
        assert_eq!(record.confirm_token_lookup_hash.as_deref(), Some("lookup-2"));
        // first-touch attribution
        assert_eq!(record.utm.get("source").map(String::as_str), Some("campaign-1"));

        assert_eq!(
            store.mark_confirmed("lookup-2", now).await.unwrap(),
            ConfirmOutcome::Confirmed
        );
        assert_eq!(
            store.upsert_pending("e1", signup(3, now), now).await.unwrap(),
            UpsertOutcome::AlreadyConfirmed
        );
        let record = store.find_by_email_hash("e1").await.unwrap().unwrap();
        assert_eq!(record.status, WaitlistStatus::Confirmed);
        assert!(record.confirm_token_hash.is_none());
    }

    #[tokio::test]
    async fn test_refresh_keeps_stored_locale_over_fallback() {
        let store = MemoryWaitlistStore::new();
        let now = Utc::now();

        let mut first = signup(1, now);
        first.locale = None;
        first.fallback_locale = Some("fr".into());
        assert_eq!(
            store.upsert_pending("e1", first, now).await.unwrap(),
            UpsertOutcome::Created { locale: Some("fr".into()) }
        );

        let mut again = signup(2, now);
        again.locale = None;
        again.fallback_locale = Some("de".into());
        assert_eq!(
            store.upsert_pending("e1", again, now).await.unwrap(),
            UpsertOutcome::Refreshed { locale: Some("fr".into()) }
        );

        let mut explicit = signup(3, now);
        explicit.locale = Some("es".into());
        assert_eq!(
            store.upsert_pending("e1", explicit, now).await.unwrap(),
            UpsertOutcome::Refreshed { locale: Some("es".into()) }
        );
    }

    #[tokio::test]
    async fn test_mark_confirmed_outcomes() {
        let store = MemoryWaitlistStore::new();
        let now = Utc::now();
        store.upsert_pending("e1", signup(1, now), now).await.unwrap();

        assert_eq!(
            store.mark_confirmed("missing", now).await.unwrap(),
            ConfirmOutcome::NotFound
        );
        assert_eq!(
            store
                .mark_confirmed("lookup-1", now + Duration::hours(48))
                .await
                .unwrap(),
            ConfirmOutcome::Expired
        );
        assert_eq!(
            store.mark_confirmed("lookup-1", now).await.unwrap(),
            ConfirmOutcome::Confirmed
        );
        assert_eq!(
            store.mark_confirmed("lookup-1", now).await.unwrap(),
            ConfirmOutcome::Already
        );
    }

    #[tokio::test]
    async fn test_mark_expired_ignores_retired_tokens() {
        let store = MemoryWaitlistStore::new();
        let now = Utc::now();
        store.upsert_pending("e1", signup(1, now), now).await.unwrap();
        store
            .rotate_token("e1", token(2, now + Duration::hours(48)), now)
            .await
            .unwrap();

        assert!(!store.mark_expired("lookup-1", now).await.unwrap());
        let record = store.find_by_lookup_hash("lookup-1").await.unwrap().unwrap();
        assert_eq!(record.status, WaitlistStatus::Pending);

        assert!(store.mark_expired("lookup-2", now).await.unwrap());
        let record = store.find_by_email_hash("e1").await.unwrap().unwrap();
        assert_eq!(record.status, WaitlistStatus::Expired);
        assert!(record.confirm_token_lookup_hash.is_none());
    }

    #[tokio::test]
    async fn test_rotate_unknown_and_confirmed() {
        let store = MemoryWaitlistStore::new();
        let now = Utc::now();
        let later = now + Duration::hours(1);

        assert_eq!(
            store.rotate_token("nobody", token(9, later), now).await.unwrap(),
            RotateOutcome::NotFound
        );

        store.upsert_pending("e1", signup(1, now), now).await.unwrap();
        store.mark_confirmed("lookup-1", now).await.unwrap();
        assert_eq!(
            store.rotate_token("e1", token(2, later), now).await.unwrap(),
            RotateOutcome::AlreadyConfirmed
        );
    }

    #[tokio::test]
    async fn test_stats_and_recent() {
        let store = MemoryWaitlistStore::new();
        let now = Utc::now();
        let earlier = now - Duration::seconds(1);
        store.upsert_pending("e1", signup(1, now), earlier).await.unwrap();
        let mut other = signup(2, now);
        other.locale = None;
        store.upsert_pending("e2", other, now).await.unwrap();
        store.mark_confirmed("lookup-1", now).await.unwrap();

        let stats = store.stats(now, 14).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_status.get("confirmed"), Some(&1));
        assert_eq!(stats.by_status.get("pending"), Some(&1));
        assert_eq!(stats.by_locale.get(UNKNOWN_LOCALE), Some(&1));
        assert_eq!(stats.daily.len(), 14);
        assert_eq!(stats.daily.iter().map(|d| d.count).sum::<u64>(), 2);

        let recent = store.recent(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].email_hash, "e2");
    }
}
