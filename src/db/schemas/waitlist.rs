//! Waitlist document schema
//!
//! One document per email, keyed by the secret-mixed email hash.

use std::collections::BTreeMap;

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::waitlist::{WaitlistRecord, WaitlistStatus};

/// Collection name for waitlist entries
pub const WAITLIST_COLLECTION: &str = "waitlist";

/// Waitlist document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct WaitlistDoc {
    /// Email hash
    pub _id: String,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Normalized email address
    pub email: String,

    pub status: WaitlistStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_token_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_token_lookup_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_salt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_expires_at: Option<DateTime>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime>,

    /// Lookup hashes of superseded tokens, newest last
    #[serde(default)]
    pub retired_lookup_hashes: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,

    #[serde(default)]
    pub utm: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referral: Option<String>,

    /// When the signup consent was given
    pub consented_at: DateTime,
}

impl From<WaitlistDoc> for WaitlistRecord {
    fn from(doc: WaitlistDoc) -> Self {
        let created_at = doc
            .metadata
            .created_at
            .unwrap_or(doc.consented_at)
            .to_chrono();
        let updated_at = doc
            .metadata
            .updated_at
            .map(DateTime::to_chrono)
            .unwrap_or(created_at);

        Self {
            email_hash: doc._id,
            email: doc.email,
            status: doc.status,
            confirm_token_hash: doc.confirm_token_hash,
            confirm_token_lookup_hash: doc.confirm_token_lookup_hash,
            confirm_salt: doc.confirm_salt,
            confirm_expires_at: doc.confirm_expires_at.map(DateTime::to_chrono),
            confirmed_at: doc.confirmed_at.map(DateTime::to_chrono),
            retired_lookup_hashes: doc.retired_lookup_hashes,
            locale: doc.locale,
            utm: doc.utm,
            referral: doc.referral,
            consented_at: doc.consented_at.to_chrono(),
            created_at,
            updated_at,
        }
    }
}

impl From<WaitlistRecord> for WaitlistDoc {
    fn from(record: WaitlistRecord) -> Self {
        Self {
            _id: record.email_hash,
            metadata: Metadata {
                is_deleted: false,
                created_at: Some(DateTime::from_chrono(record.created_at)),
                updated_at: Some(DateTime::from_chrono(record.updated_at)),
            },
            email: record.email,
            status: record.status,
            confirm_token_hash: record.confirm_token_hash,
            confirm_token_lookup_hash: record.confirm_token_lookup_hash,
            confirm_salt: record.confirm_salt,
            confirm_expires_at: record.confirm_expires_at.map(DateTime::from_chrono),
            confirmed_at: record.confirmed_at.map(DateTime::from_chrono),
            retired_lookup_hashes: record.retired_lookup_hashes,
            locale: record.locale,
            utm: record.utm,
            referral: record.referral,
            consented_at: DateTime::from_chrono(record.consented_at),
        }
    }
}

impl IntoIndexes for WaitlistDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Current token lookup; at most one live record per token
            (
                doc! { "confirm_token_lookup_hash": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .sparse(true)
                        .name("confirm_token_lookup_unique".to_string())
                        .build(),
                ),
            ),
            // Superseded tokens still resolve to their record
            (
                doc! { "retired_lookup_hashes": 1 },
                Some(
                    IndexOptions::builder()
                        .name("retired_lookup_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "status": 1 },
                Some(
                    IndexOptions::builder()
                        .name("status_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "locale": 1 },
                Some(
                    IndexOptions::builder()
                        .name("locale_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "metadata.created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("created_at_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for WaitlistDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
