//! HTTP routes for the waitlist service

pub mod admin;
pub mod analytics;
pub mod consent;
pub mod health;
pub mod request;
pub mod response;
pub mod waitlist;

pub use admin::{handle_analytics_summary, handle_waitlist_recent, handle_waitlist_stats};
pub use analytics::handle_event;
pub use consent::handle_consent;
pub use health::{health_check, readiness_check, version_info};
pub use request::{RequestMeta, MAX_BODY_BYTES};
pub use response::FullBody;
pub use waitlist::{handle_confirm, handle_resend, handle_signup};
