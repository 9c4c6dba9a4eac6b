//! Analytics event schema
//!
//! Events expire after 90 days via a TTL index.

use std::time::Duration;

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for analytics events
pub const ANALYTICS_EVENT_COLLECTION: &str = "analytics_events";

const EVENT_RETENTION: Duration = Duration::from_secs(90 * 24 * 60 * 60);

/// Analytics event stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AnalyticsEventDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub visitor_hash: String,

    pub name: String,

    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer_host: Option<String>,

    pub occurred_at: DateTime,
}

impl IntoIndexes for AnalyticsEventDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "occurred_at": 1 },
                Some(
                    IndexOptions::builder()
                        .expire_after(EVENT_RETENTION)
                        .name("occurred_at_ttl".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "name": 1, "occurred_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("name_occurred_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for AnalyticsEventDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
