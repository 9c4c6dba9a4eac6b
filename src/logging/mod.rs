//! Logging infrastructure for the waitlist service
//!
//! Funnel events go to `tracing` and, optionally, to a JSONL file for
//! offline conversion analysis.

pub mod funnel;

pub use funnel::{FunnelEvent, FunnelEventType, FunnelLogger};
