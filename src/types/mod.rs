//! Shared types for the waitlist service

pub mod error;

pub use error::{Result, WaitlistError};
