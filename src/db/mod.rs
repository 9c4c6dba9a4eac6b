//! Database layer for the waitlist service
//!
//! MongoDB storage for waitlist records, consent records and analytics events.

pub mod mongo;
pub mod schemas;

pub use mongo::{MongoClient, MongoCollection};
pub use schemas::{AnalyticsEventDoc, ConsentDoc, Metadata, WaitlistDoc};
