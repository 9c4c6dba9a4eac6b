//! MongoDB-backed consent and analytics storage

use std::collections::BTreeMap;

use async_trait::async_trait;
use bson::{doc, DateTime};

use crate::analytics::{
    top_paths, AnalyticsEvent, AnalyticsStore, AnalyticsSummary, ConsentRecord, ConsentStore,
};
use crate::db::schemas::{
    AnalyticsEventDoc, ConsentDoc, Metadata, ANALYTICS_EVENT_COLLECTION, CONSENT_COLLECTION,
};
use crate::db::mongo::group_count;
use crate::db::{MongoClient, MongoCollection};
use crate::types::Result;

pub struct MongoAnalyticsStore {
    consents: MongoCollection<ConsentDoc>,
    events: MongoCollection<AnalyticsEventDoc>,
}

impl MongoAnalyticsStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            consents: client.collection(CONSENT_COLLECTION).await?,
            events: client.collection(ANALYTICS_EVENT_COLLECTION).await?,
        })
    }

    async fn grouped(&self, since: DateTime, field: &str) -> Result<BTreeMap<String, u64>> {
        let rows = self
            .events
            .aggregate(vec![
                doc! { "$match": { "occurred_at": { "$gte": since } } },
                doc! { "$group": { "_id": format!("${}", field), "count": { "$sum": 1 } } },
            ])
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let key = row.get_str("_id").ok()?.to_string();
                Some((key, group_count(row)))
            })
            .collect())
    }
}

#[async_trait]
impl ConsentStore for MongoAnalyticsStore {
    async fn record_consent(&self, record: ConsentRecord) -> Result<()> {
        let doc = ConsentDoc {
            _id: record.consent_id,
            metadata: Metadata::new(),
            visitor_hash: record.visitor_hash,
            user_agent: record.user_agent,
            analytics: record.grant.analytics,
            marketing: record.grant.marketing,
            locale: record.locale,
            recorded_at: DateTime::from_chrono(record.recorded_at),
        };
        self.consents.insert_one(doc).await
    }
}

#[async_trait]
impl AnalyticsStore for MongoAnalyticsStore {
    async fn record_event(&self, event: AnalyticsEvent) -> Result<()> {
        let doc = AnalyticsEventDoc {
            _id: None,
            metadata: Metadata::new(),
            visitor_hash: event.visitor_hash,
            name: event.name,
            path: event.path,
            locale: event.locale,
            referrer_host: event.referrer_host,
            occurred_at: DateTime::from_chrono(event.occurred_at),
        };
        self.events.insert_one(doc).await
    }

    async fn summary(&self, since: chrono::DateTime<chrono::Utc>, days: u32) -> Result<AnalyticsSummary> {
        let since = DateTime::from_chrono(since);
        let total = self
            .events
            .count(doc! { "occurred_at": { "$gte": since } })
            .await?;
        let by_name = self.grouped(since, "name").await?;
        let paths = self.grouped(since, "path").await?;

        Ok(AnalyticsSummary {
            days,
            total,
            by_name,
            top_paths: top_paths(paths),
        })
    }
}
