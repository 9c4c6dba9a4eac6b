//! Waitlist signup, confirmation and resend
//!
//! ```text
//! signup ──► pending ──confirm──► confirmed (terminal)
//!               │  ▲
//!   stale token │  │ resend / signup (new token)
//!               ▼  │
//!             expired
//! ```

pub mod confirmation;
pub mod memory;
pub mod mongo;
pub mod record;
pub mod service;
pub mod store;

pub use confirmation::{process_confirmation_token, ConfirmationResult, ConfirmationStatus};
pub use memory::MemoryWaitlistStore;
pub use mongo::MongoWaitlistStore;
pub use record::{PendingToken, WaitlistRecord, WaitlistStatus};
pub use service::{SignupError, WaitlistService, WaitlistSettings};
pub use store::{
    ConfirmOutcome, DailyCount, PendingSignup, RotateOutcome, UpsertOutcome, WaitlistStats,
    WaitlistStore,
};
