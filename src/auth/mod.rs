//! Token material and admin authentication
//!
//! Provides:
//! - Confirmation token generation, salted hashing and lookup hashing
//! - Constant-time comparison for secrets
//! - Email hashing (record keys) and masking (display)
//! - Bearer-key validation for the admin reporting endpoints

pub mod admin_key;
pub mod tokens;

pub use admin_key::{extract_bearer, AdminKeyValidator};
pub use tokens::{
    constant_time_equals, email_hash, generate_token, hash_token, lookup_hash, mask_email,
    short_hash, TokenHash, MIN_TOKEN_LEN,
};
