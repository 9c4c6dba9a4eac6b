//! Waitlist funnel operations
//!
//! Handlers validate payloads; everything after that lives here so the HTTP
//! layer stays a thin translation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::auth::{email_hash, generate_token, hash_token, short_hash};
use crate::logging::FunnelLogger;
use crate::ratelimit::{RateDecision, RateLimitScope, RateLimiter};
use crate::services::{confirmation_email, CaptchaVerifier, DeliveryResult, Mailer};
use crate::types::WaitlistError;
use crate::validation::{ValidResend, ValidSignup};
use crate::waitlist::confirmation::{process_confirmation_token, ConfirmationResult};
use crate::waitlist::record::PendingToken;
use crate::waitlist::store::{PendingSignup, RotateOutcome, WaitlistStore};

/// Why a signup or resend was turned away
#[derive(Debug, thiserror::Error)]
pub enum SignupError {
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Captcha verification failed")]
    CaptchaFailed,

    #[error(transparent)]
    Internal(#[from] WaitlistError),
}

impl SignupError {
    /// Public error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::CaptchaFailed => "captcha_failed",
            Self::Internal(_) => "server_error",
        }
    }
}

/// Per-deployment settings
#[derive(Debug, Clone)]
pub struct WaitlistSettings {
    pub email_hash_secret: String,
    /// Base URL of this API for confirmation links
    pub public_url: String,
    pub token_ttl: Duration,
    /// Locale for emails when the record has none
    pub default_locale: String,
}

pub struct WaitlistService {
    store: Arc<dyn WaitlistStore>,
    limiter: Arc<RateLimiter>,
    captcha: Arc<dyn CaptchaVerifier>,
    mailer: Arc<dyn Mailer>,
    funnel: FunnelLogger,
    settings: WaitlistSettings,
}

impl WaitlistService {
    pub fn new(
        store: Arc<dyn WaitlistStore>,
        limiter: Arc<RateLimiter>,
        captcha: Arc<dyn CaptchaVerifier>,
        mailer: Arc<dyn Mailer>,
        funnel: FunnelLogger,
        settings: WaitlistSettings,
    ) -> Self {
        Self {
            store,
            limiter,
            captcha,
            mailer,
            funnel,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn WaitlistStore> {
        &self.store
    }

    pub fn settings(&self) -> &WaitlistSettings {
        &self.settings
    }

    /// Accept a validated signup.
    ///
    /// Confirmed emails are a silent no-op so responses never reveal who is
    /// already registered.
    pub async fn signup(&self, signup: ValidSignup, client_ip: &str) -> Result<(), SignupError> {
        self.signup_at(signup, client_ip, Utc::now()).await
    }

    pub async fn signup_at(
        &self,
        signup: ValidSignup,
        client_ip: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SignupError> {
        let doc_id = email_hash(&self.settings.email_hash_secret, &signup.email);

        if let Err(e) = self
            .admit(RateLimitScope::SubmitPerIp, client_ip, &signup.captcha_token, client_ip)
            .await
        {
            self.funnel.signup_rejected(e.code(), Some(&doc_id)).await;
            return Err(e);
        }

        let (raw_token, token) = self.issue_token(now)?;
        let pending = PendingSignup {
            email: signup.email.clone(),
            token,
            locale: signup.locale,
            fallback_locale: signup.negotiated_locale,
            utm: signup.utm,
            referral: signup.referral,
        };

        let outcome = self.store.upsert_pending(&doc_id, pending, now).await?;
        let email_locale = outcome.email_locale();
        self.funnel
            .signup_accepted(&doc_id, outcome.label(), email_locale.flatten())
            .await;

        // Confirmed and suppressed emails get the same success, minus the mail
        if let Some(locale) = email_locale {
            self.send_confirmation(&doc_id, &signup.email, &raw_token, locale)
                .await;
        }

        Ok(())
    }

    /// Issue a fresh link for a pending or expired signup.
    ///
    /// Unknown and confirmed emails get the same success as everyone else.
    pub async fn resend(&self, resend: ValidResend, client_ip: &str) -> Result<(), SignupError> {
        self.resend_at(resend, client_ip, Utc::now()).await
    }

    pub async fn resend_at(
        &self,
        resend: ValidResend,
        client_ip: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SignupError> {
        let doc_id = email_hash(&self.settings.email_hash_secret, &resend.email);

        if let Err(e) = self
            .admit(RateLimitScope::ResendPerEmail, &doc_id, &resend.captcha_token, client_ip)
            .await
        {
            self.funnel.signup_rejected(e.code(), Some(&doc_id)).await;
            return Err(e);
        }

        let (raw_token, token) = self.issue_token(now)?;
        match self.store.rotate_token(&doc_id, token, now).await? {
            RotateOutcome::Rotated { locale } => {
                self.funnel.resend_accepted(&doc_id, "rotated").await;
                self.send_confirmation(&doc_id, &resend.email, &raw_token, locale.as_deref())
                    .await;
            }
            RotateOutcome::AlreadyConfirmed => {
                self.funnel.resend_accepted(&doc_id, "already_confirmed").await;
            }
            RotateOutcome::NotFound => {
                self.funnel.resend_accepted(&doc_id, "unknown").await;
            }
        }

        Ok(())
    }

    /// Process a confirmation link
    pub async fn confirm(&self, raw_token: Option<&str>) -> Result<ConfirmationResult, WaitlistError> {
        self.confirm_at(raw_token, Utc::now()).await
    }

    pub async fn confirm_at(
        &self,
        raw_token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ConfirmationResult, WaitlistError> {
        let result = process_confirmation_token(self.store.as_ref(), raw_token, now).await?;
        self.funnel
            .confirmation(result.status, result.doc_id.as_deref())
            .await;
        Ok(result)
    }

    /// Rate limit, then captcha
    async fn admit(
        &self,
        scope: RateLimitScope,
        key: &str,
        captcha_token: &str,
        client_ip: &str,
    ) -> Result<(), SignupError> {
        if let RateDecision::Deny { retry_after_secs } = self.limiter.check(scope, key) {
            return Err(SignupError::RateLimited { retry_after_secs });
        }

        let remote_ip = (!client_ip.is_empty()).then_some(client_ip);
        let verdict = self.captcha.verify(captcha_token, remote_ip).await?;
        if !verdict.success {
            debug!(error_codes = ?verdict.error_codes, "Captcha rejected");
            return Err(SignupError::CaptchaFailed);
        }

        Ok(())
    }

    fn issue_token(&self, now: DateTime<Utc>) -> Result<(zeroize::Zeroizing<String>, PendingToken), WaitlistError> {
        let raw = generate_token();
        let hashed = hash_token(&raw, None)?;
        let ttl = chrono::Duration::from_std(self.settings.token_ttl)
            .map_err(|e| WaitlistError::Config(format!("Token TTL out of range: {}", e)))?;

        Ok((
            raw,
            PendingToken {
                hash: hashed.hash,
                salt: hashed.salt,
                lookup_hash: hashed.lookup_hash,
                expires_at: now + ttl,
            },
        ))
    }

    /// Build the confirmation link for a raw token
    pub fn confirmation_link(&self, raw_token: &str) -> String {
        format!(
            "{}/waitlist/confirm?token={}",
            self.settings.public_url.trim_end_matches('/'),
            urlencoding::encode(raw_token)
        )
    }

    async fn send_confirmation(&self, doc_id: &str, email: &str, raw_token: &str, locale: Option<&str>) {
        let link = self.confirmation_link(raw_token);
        let locale = locale.unwrap_or(&self.settings.default_locale);
        let ttl_hours = self.settings.token_ttl.as_secs() / 3600;

        let message = confirmation_email(email, &link, locale, ttl_hours);
        let result = self.mailer.send(message).await;
        if let DeliveryResult::Failed { .. } = &result {
            error!(doc_id = %short_hash(doc_id), "Signup kept despite email failure");
        }
        self.funnel.email_delivery(doc_id, &result).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{RateLimitRule, RateLimitRules};
    use crate::services::{BypassCaptcha, CaptchaOutcome, OutgoingEmail};
    use crate::types::Result;
    use crate::waitlist::memory::MemoryWaitlistStore;
    use crate::waitlist::record::{PendingToken, WaitlistRecord, WaitlistStatus};
    use crate::waitlist::store::{ConfirmOutcome, UpsertOutcome, WaitlistStats};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<OutgoingEmail>>,
        fail: bool,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: OutgoingEmail) -> DeliveryResult {
            self.sent.lock().unwrap().push(email);
            if self.fail {
                DeliveryResult::Failed {
                    reason: "provider down".into(),
                }
            } else {
                DeliveryResult::Delivered
            }
        }
    }

    struct RejectingCaptcha;

    #[async_trait]
    impl CaptchaVerifier for RejectingCaptcha {
        async fn verify(&self, _token: &str, _ip: Option<&str>) -> Result<CaptchaOutcome> {
            Ok(CaptchaOutcome::failed("invalid-input-response"))
        }
    }

    /// Memory store that reports every signup as hitting a soft-deleted record
    #[derive(Default)]
    struct SuppressingStore {
        inner: MemoryWaitlistStore,
    }

    #[async_trait]
    impl WaitlistStore for SuppressingStore {
        async fn find_by_lookup_hash(&self, lookup_hash: &str) -> Result<Option<WaitlistRecord>> {
            self.inner.find_by_lookup_hash(lookup_hash).await
        }

        async fn find_by_email_hash(&self, email_hash: &str) -> Result<Option<WaitlistRecord>> {
            self.inner.find_by_email_hash(email_hash).await
        }

        async fn upsert_pending(
            &self,
            _email_hash: &str,
            _signup: PendingSignup,
            _now: DateTime<Utc>,
        ) -> Result<UpsertOutcome> {
            Ok(UpsertOutcome::Suppressed)
        }

        async fn rotate_token(
            &self,
            email_hash: &str,
            token: PendingToken,
            now: DateTime<Utc>,
        ) -> Result<RotateOutcome> {
            self.inner.rotate_token(email_hash, token, now).await
        }

        async fn mark_confirmed(&self, lookup_hash: &str, now: DateTime<Utc>) -> Result<ConfirmOutcome> {
            self.inner.mark_confirmed(lookup_hash, now).await
        }

        async fn mark_expired(&self, lookup_hash: &str, now: DateTime<Utc>) -> Result<bool> {
            self.inner.mark_expired(lookup_hash, now).await
        }

        async fn stats(&self, now: DateTime<Utc>, days: u32) -> Result<WaitlistStats> {
            self.inner.stats(now, days).await
        }

        async fn recent(&self, limit: usize) -> Result<Vec<WaitlistRecord>> {
            self.inner.recent(limit).await
        }

        async fn ping(&self) -> Result<()> {
            self.inner.ping().await
        }
    }

    fn service_with(
        captcha: Arc<dyn CaptchaVerifier>,
        mailer: Arc<RecordingMailer>,
        submit_max: u32,
    ) -> (WaitlistService, Arc<MemoryWaitlistStore>) {
        let store = Arc::new(MemoryWaitlistStore::new());
        let service = service_over(store.clone(), captcha, mailer, submit_max);
        (service, store)
    }

    fn service_over(
        store: Arc<dyn WaitlistStore>,
        captcha: Arc<dyn CaptchaVerifier>,
        mailer: Arc<RecordingMailer>,
        submit_max: u32,
    ) -> WaitlistService {
        let hour = Duration::from_secs(3600);
        let limiter = Arc::new(RateLimiter::in_memory(RateLimitRules {
            submit_per_ip: RateLimitRule::new(submit_max, hour),
            resend_per_email: RateLimitRule::new(3, hour),
            analytics_per_ip: RateLimitRule::new(100, hour),
        }));
        WaitlistService::new(
            store,
            limiter,
            captcha,
            mailer,
            FunnelLogger::new(),
            WaitlistSettings {
                email_hash_secret: "secret".into(),
                public_url: "https://api.test/".into(),
                token_ttl: Duration::from_secs(48 * 3600),
                default_locale: "en".into(),
            },
        )
    }

    fn signup(email: &str) -> ValidSignup {
        ValidSignup {
            email: email.into(),
            captcha_token: "proof".into(),
            locale: None,
            negotiated_locale: None,
            utm: BTreeMap::new(),
            referral: None,
        }
    }

    fn token_from(email: &OutgoingEmail) -> String {
        let (_, token) = email.text.split_once("token=").unwrap();
        token.split_whitespace().next().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_signup_sends_link_that_confirms() {
        let mailer = Arc::new(RecordingMailer::default());
        let (service, store) = service_with(Arc::new(BypassCaptcha), mailer.clone(), 5);

        service.signup(signup("a@b.com"), "1.1.1.1").await.unwrap();

        let doc_id = email_hash("secret", "a@b.com");
        let record = store.find_by_email_hash(&doc_id).await.unwrap().unwrap();
        assert_eq!(record.status, WaitlistStatus::Pending);

        let sent = mailer.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text.contains("https://api.test/waitlist/confirm?token="));

        let token = token_from(&sent[0]);
        let result = service.confirm(Some(token.as_str())).await.unwrap();
        assert_eq!(result.status, crate::waitlist::ConfirmationStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_captcha_rejection_stores_nothing() {
        let mailer = Arc::new(RecordingMailer::default());
        let (service, store) = service_with(Arc::new(RejectingCaptcha), mailer.clone(), 5);

        let err = service.signup(signup("a@b.com"), "1.1.1.1").await.unwrap_err();
        assert_eq!(err.code(), "captcha_failed");
        assert!(store.is_empty().await);
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_email_failure_does_not_fail_signup() {
        let mailer = Arc::new(RecordingMailer {
            fail: true,
            ..Default::default()
        });
        let (service, store) = service_with(Arc::new(BypassCaptcha), mailer, 5);

        service.signup(signup("a@b.com"), "1.1.1.1").await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_confirmed_email_signup_is_silent_noop() {
        let mailer = Arc::new(RecordingMailer::default());
        let (service, store) = service_with(Arc::new(BypassCaptcha), mailer.clone(), 5);

        service.signup(signup("a@b.com"), "1.1.1.1").await.unwrap();
        let token = token_from(&mailer.sent.lock().unwrap()[0]);
        service.confirm(Some(token.as_str())).await.unwrap();

        service.signup(signup("a@b.com"), "1.1.1.1").await.unwrap();
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);

        let doc_id = email_hash("secret", "a@b.com");
        let record = store.find_by_email_hash(&doc_id).await.unwrap().unwrap();
        assert_eq!(record.status, WaitlistStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_suppressed_email_signup_is_silent_noop() {
        let mailer = Arc::new(RecordingMailer::default());
        let store = Arc::new(SuppressingStore::default());
        let service = service_over(store.clone(), Arc::new(BypassCaptcha), mailer.clone(), 5);

        service.signup(signup("gone@b.com"), "1.1.1.1").await.unwrap();
        assert!(mailer.sent.lock().unwrap().is_empty());
        assert!(store.inner.is_empty().await);
    }

    #[tokio::test]
    async fn test_refresh_without_locale_mails_in_stored_locale() {
        let mailer = Arc::new(RecordingMailer::default());
        let (service, store) = service_with(Arc::new(BypassCaptcha), mailer.clone(), 5);

        let mut first = signup("a@b.com");
        first.locale = Some("fr".into());
        service.signup(first, "1.1.1.1").await.unwrap();

        let mut again = signup("a@b.com");
        again.negotiated_locale = Some("de".into());
        service.signup(again, "1.1.1.1").await.unwrap();

        let sent = mailer.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].html.contains(r#"<html lang="fr">"#));

        let doc_id = email_hash("secret", "a@b.com");
        let record = store.find_by_email_hash(&doc_id).await.unwrap().unwrap();
        assert_eq!(record.locale.as_deref(), Some("fr"));
    }

    #[tokio::test]
    async fn test_new_signup_takes_negotiated_locale() {
        let mailer = Arc::new(RecordingMailer::default());
        let (service, store) = service_with(Arc::new(BypassCaptcha), mailer.clone(), 5);

        let mut first = signup("a@b.com");
        first.negotiated_locale = Some("de".into());
        service.signup(first, "1.1.1.1").await.unwrap();

        assert!(mailer.sent.lock().unwrap()[0].html.contains(r#"<html lang="de">"#));
        let doc_id = email_hash("secret", "a@b.com");
        let record = store.find_by_email_hash(&doc_id).await.unwrap().unwrap();
        assert_eq!(record.locale.as_deref(), Some("de"));
    }

    #[tokio::test]
    async fn test_resend_unknown_email_is_silent() {
        let mailer = Arc::new(RecordingMailer::default());
        let (service, store) = service_with(Arc::new(BypassCaptcha), mailer.clone(), 5);

        let resend = ValidResend {
            email: "nobody@b.com".into(),
            captcha_token: "proof".into(),
        };
        service.resend(resend, "1.1.1.1").await.unwrap();
        assert!(store.is_empty().await);
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_precedes_captcha() {
        let mailer = Arc::new(RecordingMailer::default());
        let (service, _) = service_with(Arc::new(RejectingCaptcha), mailer, 1);

        let first = service.signup(signup("a@b.com"), "9.9.9.9").await.unwrap_err();
        assert_eq!(first.code(), "captcha_failed");

        match service.signup(signup("a@b.com"), "9.9.9.9").await {
            Err(SignupError::RateLimited { retry_after_secs }) => assert!(retry_after_secs >= 1),
            other => panic!("expected rate limit, got {:?}", other),
        }
    }
}
