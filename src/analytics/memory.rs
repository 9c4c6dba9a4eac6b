//! In-memory consent and analytics storage

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::analytics::{
    top_paths, AnalyticsEvent, AnalyticsStore, AnalyticsSummary, ConsentRecord, ConsentStore,
};
use crate::types::Result;

#[derive(Default)]
pub struct MemoryAnalyticsStore {
    consents: RwLock<Vec<ConsentRecord>>,
    events: RwLock<Vec<AnalyticsEvent>>,
}

impl MemoryAnalyticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn consents(&self) -> Vec<ConsentRecord> {
        self.consents.read().await.clone()
    }

    pub async fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl ConsentStore for MemoryAnalyticsStore {
    async fn record_consent(&self, record: ConsentRecord) -> Result<()> {
        self.consents.write().await.push(record);
        Ok(())
    }
}

#[async_trait]
impl AnalyticsStore for MemoryAnalyticsStore {
    async fn record_event(&self, event: AnalyticsEvent) -> Result<()> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn summary(&self, since: DateTime<Utc>, days: u32) -> Result<AnalyticsSummary> {
        let events = self.events.read().await;

        let mut summary = AnalyticsSummary {
            days,
            ..Default::default()
        };
        let mut paths: BTreeMap<String, u64> = BTreeMap::new();

        for event in events.iter().filter(|e| e.occurred_at >= since) {
            summary.total += 1;
            *summary.by_name.entry(event.name.clone()).or_default() += 1;
            *paths.entry(event.path.clone()).or_default() += 1;
        }
        summary.top_paths = top_paths(paths);

        Ok(summary)
    }
}
