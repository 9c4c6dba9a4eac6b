//! Database schemas
//!
//! MongoDB document structures for waitlist records, consent records and
//! analytics events.

mod analytics_event;
mod consent;
mod metadata;
mod waitlist;

pub use analytics_event::{AnalyticsEventDoc, ANALYTICS_EVENT_COLLECTION};
pub use consent::{ConsentDoc, CONSENT_COLLECTION};
pub use metadata::Metadata;
pub use waitlist::{WaitlistDoc, WAITLIST_COLLECTION};
