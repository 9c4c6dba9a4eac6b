//! Error types for the waitlist service

/// Main error type for waitlist operations
#[derive(Debug, thiserror::Error)]
pub enum WaitlistError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Captcha verifier error: {0}")]
    Captcha(String),

    #[error("Email transport error: {0}")]
    Email(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for WaitlistError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Result type alias for waitlist operations
pub type Result<T> = std::result::Result<T, WaitlistError>;
