//! Consent record schema
//!
//! Append-only audit trail of cookie consent choices.

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for consent records
pub const CONSENT_COLLECTION: &str = "consent_records";

/// Consent document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ConsentDoc {
    /// Random consent ID returned to the client
    pub _id: String,

    #[serde(default)]
    pub metadata: Metadata,

    /// Daily-rotating hash of the client, never the raw IP
    pub visitor_hash: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    pub analytics: bool,

    pub marketing: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,

    pub recorded_at: DateTime,
}

impl IntoIndexes for ConsentDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "recorded_at": -1 },
            Some(
                IndexOptions::builder()
                    .name("recorded_at_index".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for ConsentDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
