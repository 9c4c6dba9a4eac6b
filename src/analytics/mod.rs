//! Consent records and first-party analytics
//!
//! Nothing here stores a raw IP or an email. Visitors are identified by a
//! hash that rotates daily, so events cannot be joined across days.

pub mod consent;
pub mod memory;
pub mod mongo;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::Result;

pub use consent::{consent_cookie, visitor_hash, ConsentGrant, CONSENT_COOKIE};
pub use memory::MemoryAnalyticsStore;
pub use mongo::MongoAnalyticsStore;

/// Number of paths reported in a summary
pub const TOP_PATHS: usize = 10;

/// One consent decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentRecord {
    pub consent_id: String,
    pub visitor_hash: String,
    pub user_agent: Option<String>,
    pub grant: ConsentGrant,
    pub locale: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// One accepted analytics event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticsEvent {
    pub visitor_hash: String,
    pub name: String,
    pub path: String,
    pub locale: Option<String>,
    pub referrer_host: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathCount {
    pub path: String,
    pub count: u64,
}

/// Event counts over a trailing window
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    pub days: u32,
    pub total: u64,
    pub by_name: BTreeMap<String, u64>,
    pub top_paths: Vec<PathCount>,
}

#[async_trait]
pub trait ConsentStore: Send + Sync {
    async fn record_consent(&self, record: ConsentRecord) -> Result<()>;
}

#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn record_event(&self, event: AnalyticsEvent) -> Result<()>;

    /// Summarize events that occurred at or after `since`
    async fn summary(&self, since: DateTime<Utc>, days: u32) -> Result<AnalyticsSummary>;
}

/// Order path counts by count (descending) then path and keep the top ones
pub(crate) fn top_paths(counts: BTreeMap<String, u64>) -> Vec<PathCount> {
    let mut paths: Vec<PathCount> = counts
        .into_iter()
        .map(|(path, count)| PathCount { path, count })
        .collect();
    paths.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.path.cmp(&b.path)));
    paths.truncate(TOP_PATHS);
    paths
}
