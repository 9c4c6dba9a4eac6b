//! MongoDB-backed waitlist store

use std::collections::BTreeMap;

use async_trait::async_trait;
use bson::{doc, Bson, DateTime, Document};
use chrono::{Duration, Utc};
use tracing::{debug, warn};

use crate::auth::short_hash;
use crate::db::mongo::{group_count, is_duplicate_key};
use crate::db::schemas::{WaitlistDoc, WAITLIST_COLLECTION};
use crate::db::{MongoClient, MongoCollection};
use crate::types::{Result, WaitlistError};
use crate::waitlist::record::{PendingToken, WaitlistRecord, WaitlistStatus, RETIRED_LOOKUP_LIMIT};
use crate::waitlist::store::{
    classify_unconfirmed, day_keys, ConfirmOutcome, DailyCount, PendingSignup, RotateOutcome,
    UpsertOutcome, WaitlistStats, WaitlistStore, UNKNOWN_LOCALE,
};

/// Attempts before a contended token swap gives up
const MAX_SWAP_ATTEMPTS: usize = 3;

pub struct MongoWaitlistStore {
    client: MongoClient,
    collection: MongoCollection<WaitlistDoc>,
}

/// Outcome of swapping in a new token on an existing record
enum Swap {
    Installed { locale: Option<String> },
    Confirmed,
    Missing,
}

impl MongoWaitlistStore {
    /// Open the collection and apply its indexes
    pub async fn new(client: MongoClient) -> Result<Self> {
        let collection = client.collection::<WaitlistDoc>(WAITLIST_COLLECTION).await?;
        Ok(Self { client, collection })
    }

    /// Replace the token of an unconfirmed record. The update is conditioned
    /// on the lookup hash read beforehand so the retired list never misses
    /// a token swapped in concurrently.
    async fn swap_token(
        &self,
        email_hash: &str,
        token: &PendingToken,
        locale: Option<&str>,
        now: chrono::DateTime<Utc>,
    ) -> Result<Swap> {
        for _ in 0..MAX_SWAP_ATTEMPTS {
            let Some(existing) = self.collection.find_one(doc! { "_id": email_hash }).await? else {
                return Ok(Swap::Missing);
            };
            if existing.status == WaitlistStatus::Confirmed {
                return Ok(Swap::Confirmed);
            }

            let previous = existing.confirm_token_lookup_hash.clone();
            let filter = doc! {
                "_id": email_hash,
                "status": { "$ne": WaitlistStatus::Confirmed.as_str() },
                "confirm_token_lookup_hash": previous.clone().map_or(Bson::Null, Bson::String),
            };

            let mut set = doc! {
                "status": WaitlistStatus::Pending.as_str(),
                "confirm_token_hash": &token.hash,
                "confirm_token_lookup_hash": &token.lookup_hash,
                "confirm_salt": &token.salt,
                "confirm_expires_at": DateTime::from_chrono(token.expires_at),
                "metadata.updated_at": DateTime::from_chrono(now),
            };
            if let Some(locale) = locale {
                set.insert("locale", locale);
            }
            let mut update = doc! { "$set": set };
            if let Some(previous) = previous {
                update.insert("$push", retire(&previous));
            }

            let result = self.collection.update_one(filter, update).await?;
            if result.matched_count == 1 {
                return Ok(Swap::Installed {
                    locale: locale.map(str::to_string).or(existing.locale),
                });
            }
            debug!(email_hash = %short_hash(email_hash), "Token swap lost a race, retrying");
        }

        Err(WaitlistError::Database(
            "Token swap contended too many times".to_string(),
        ))
    }

    async fn group_counts(&self, pipeline: Vec<Document>) -> Result<BTreeMap<String, u64>> {
        let rows = self.collection.aggregate(pipeline).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let key = row.get_str("_id").unwrap_or(UNKNOWN_LOCALE).to_string();
                (key, group_count(row))
            })
            .collect())
    }
}

/// `$push` that appends a retired lookup hash and keeps the list bounded
fn retire(lookup_hash: &str) -> Document {
    doc! {
        "retired_lookup_hashes": {
            "$each": [lookup_hash],
            "$slice": -(RETIRED_LOOKUP_LIMIT as i32),
        }
    }
}

fn clear_token() -> Document {
    doc! {
        "confirm_token_hash": "",
        "confirm_token_lookup_hash": "",
        "confirm_salt": "",
    }
}

#[async_trait]
impl WaitlistStore for MongoWaitlistStore {
    async fn find_by_lookup_hash(&self, lookup_hash: &str) -> Result<Option<WaitlistRecord>> {
        let filter = doc! {
            "$or": [
                { "confirm_token_lookup_hash": lookup_hash },
                { "retired_lookup_hashes": lookup_hash },
            ]
        };
        let mut matches = self.collection.find_many(filter, None, Some(2)).await?;

        if matches.len() > 1 {
            warn!("Lookup hash matched more than one waitlist record");
            return Ok(None);
        }
        Ok(matches.pop().map(WaitlistRecord::from))
    }

    async fn find_by_email_hash(&self, email_hash: &str) -> Result<Option<WaitlistRecord>> {
        Ok(self
            .collection
            .find_one(doc! { "_id": email_hash })
            .await?
            .map(WaitlistRecord::from))
    }

    async fn upsert_pending(
        &self,
        email_hash: &str,
        signup: PendingSignup,
        now: chrono::DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        for _ in 0..MAX_SWAP_ATTEMPTS {
            match self
                .swap_token(email_hash, &signup.token, signup.locale.as_deref(), now)
                .await?
            {
                Swap::Installed { locale } => return Ok(UpsertOutcome::Refreshed { locale }),
                Swap::Confirmed => return Ok(UpsertOutcome::AlreadyConfirmed),
                Swap::Missing => {}
            }

            let locale = signup.initial_locale();
            let record = WaitlistRecord::pending(
                email_hash.to_string(),
                signup.email.clone(),
                signup.token.clone(),
                locale.clone(),
                signup.utm.clone(),
                signup.referral.clone(),
                now,
            );
            match self.collection.insert_one(WaitlistDoc::from(record)).await {
                Ok(()) => return Ok(UpsertOutcome::Created { locale }),
                Err(e) if is_duplicate_key(&e) => {
                    // A soft-deleted document may hold this id
                    if self.collection.is_suppressed(doc! { "_id": email_hash }).await? {
                        debug!(email_hash = %short_hash(email_hash), "Signup for suppressed email ignored");
                        return Ok(UpsertOutcome::Suppressed);
                    }
                    // Another request created it first; refresh that one instead
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(WaitlistError::Database(
            "Waitlist upsert contended too many times".to_string(),
        ))
    }

    async fn rotate_token(
        &self,
        email_hash: &str,
        token: PendingToken,
        now: chrono::DateTime<Utc>,
    ) -> Result<RotateOutcome> {
        Ok(match self.swap_token(email_hash, &token, None, now).await? {
            Swap::Installed { locale } => RotateOutcome::Rotated { locale },
            Swap::Confirmed => RotateOutcome::AlreadyConfirmed,
            Swap::Missing => RotateOutcome::NotFound,
        })
    }

    async fn mark_confirmed(
        &self,
        lookup_hash: &str,
        now: chrono::DateTime<Utc>,
    ) -> Result<ConfirmOutcome> {
        let now = DateTime::from_chrono(now);
        let filter = doc! {
            "confirm_token_lookup_hash": lookup_hash,
            "status": WaitlistStatus::Pending.as_str(),
            "confirm_expires_at": { "$gt": now },
        };
        let update = doc! {
            "$set": {
                "status": WaitlistStatus::Confirmed.as_str(),
                "confirmed_at": now,
                "metadata.updated_at": now,
            },
            "$unset": clear_token(),
            "$push": retire(lookup_hash),
        };

        if self.collection.find_one_and_update(filter, update).await?.is_some() {
            return Ok(ConfirmOutcome::Confirmed);
        }

        let current = self.find_by_lookup_hash(lookup_hash).await?;
        Ok(classify_unconfirmed(current.as_ref()))
    }

    async fn mark_expired(&self, lookup_hash: &str, now: chrono::DateTime<Utc>) -> Result<bool> {
        let filter = doc! {
            "confirm_token_lookup_hash": lookup_hash,
            "status": WaitlistStatus::Pending.as_str(),
        };
        let update = doc! {
            "$set": {
                "status": WaitlistStatus::Expired.as_str(),
                "metadata.updated_at": DateTime::from_chrono(now),
            },
            "$unset": clear_token(),
            "$push": retire(lookup_hash),
        };

        let result = self.collection.update_one(filter, update).await?;
        Ok(result.modified_count > 0)
    }

    async fn stats(&self, now: chrono::DateTime<Utc>, days: u32) -> Result<WaitlistStats> {
        let total = self.collection.count(Document::new()).await?;

        let by_status = self
            .group_counts(vec![doc! { "$group": { "_id": "$status", "count": { "$sum": 1 } } }])
            .await?;
        let by_locale = self
            .group_counts(vec![doc! { "$group": { "_id": "$locale", "count": { "$sum": 1 } } }])
            .await?;

        let keys = day_keys(now, days);
        let since = (now - Duration::days(i64::from(days.saturating_sub(1))))
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc())
            .unwrap_or(now);
        let per_day = self
            .group_counts(vec![
                doc! { "$match": { "metadata.created_at": { "$gte": DateTime::from_chrono(since) } } },
                doc! { "$group": {
                    "_id": { "$dateToString": { "format": "%Y-%m-%d", "date": "$metadata.created_at" } },
                    "count": { "$sum": 1 },
                } },
            ])
            .await?;

        let daily = keys
            .into_iter()
            .map(|day| {
                let count = per_day.get(&day).copied().unwrap_or_default();
                DailyCount { day, count }
            })
            .collect();

        Ok(WaitlistStats {
            total,
            by_status,
            by_locale,
            daily,
        })
    }

    async fn recent(&self, limit: usize) -> Result<Vec<WaitlistRecord>> {
        let docs = self
            .collection
            .find_many(
                Document::new(),
                Some(doc! { "metadata.created_at": -1 }),
                Some(limit as i64),
            )
            .await?;
        Ok(docs.into_iter().map(WaitlistRecord::from).collect())
    }

    async fn ping(&self) -> Result<()> {
        self.client.ping().await
    }
}
