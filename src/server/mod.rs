//! HTTP server for the waitlist service

pub mod http;

pub use http::{dispatch, run, AppState, Stores, Transports};
