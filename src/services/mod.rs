//! Outbound collaborators: captcha verification and transactional email

pub mod captcha;
pub mod mailer;

pub use captcha::{BypassCaptcha, CaptchaOutcome, CaptchaVerifier, TurnstileVerifier};
pub use mailer::{confirmation_email, DeliveryResult, HttpMailer, LogMailer, Mailer, OutgoingEmail};
