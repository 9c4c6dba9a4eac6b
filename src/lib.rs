//! Waitlist - signup, confirmation, consent and analytics service
//!
//! Visitors join a waitlist with double opt-in: a signup stores a pending
//! record keyed by a keyed hash of the email and mails a single-use
//! confirmation link. Following the link confirms the record and redirects
//! to a localized result page on the marketing site.
//!
//! ## Services
//!
//! - **Waitlist**: signup, resend and confirmation with rate limiting and captcha
//! - **Consent**: records analytics and marketing consent choices
//! - **Analytics**: first-party, consent-gated page events
//! - **Admin**: bearer-key protected aggregate reports
//! - **Locale**: path, cookie and Accept-Language negotiation for the site

pub mod analytics;
pub mod auth;
pub mod config;
pub mod db;
pub mod locale;
pub mod logging;
pub mod ratelimit;
pub mod routes;
pub mod server;
pub mod services;
pub mod types;
pub mod validation;
pub mod waitlist;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{Result, WaitlistError};
