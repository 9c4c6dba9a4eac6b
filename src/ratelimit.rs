//! Fixed-window rate limiting for the public endpoints
//!
//! Counters are keyed by `(scope, identifier)`. The in-memory store is
//! process-local: running several instances multiplies the effective limit.
//! A shared backend only needs to implement [`RateLimitStore`].

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tracing::debug;

/// What a counter protects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitScope {
    SubmitPerIp,
    ResendPerEmail,
    AnalyticsPerIp,
}

impl RateLimitScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubmitPerIp => "submit-per-ip",
            Self::ResendPerEmail => "resend-per-email",
            Self::AnalyticsPerIp => "analytics-per-ip",
        }
    }
}

/// Limit for one scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub max: u32,
    pub window: Duration,
}

impl RateLimitRule {
    pub fn new(max: u32, window: Duration) -> Self {
        Self { max, window }
    }
}

/// Rules for every scope
#[derive(Debug, Clone, Copy)]
pub struct RateLimitRules {
    pub submit_per_ip: RateLimitRule,
    pub resend_per_email: RateLimitRule,
    pub analytics_per_ip: RateLimitRule,
}

impl RateLimitRules {
    pub fn rule(&self, scope: RateLimitScope) -> RateLimitRule {
        match scope {
            RateLimitScope::SubmitPerIp => self.submit_per_ip,
            RateLimitScope::ResendPerEmail => self.resend_per_email,
            RateLimitScope::AnalyticsPerIp => self.analytics_per_ip,
        }
    }
}

impl Default for RateLimitRules {
    fn default() -> Self {
        let hour = Duration::from_secs(60 * 60);
        Self {
            submit_per_ip: RateLimitRule::new(5, hour),
            resend_per_email: RateLimitRule::new(3, hour),
            analytics_per_ip: RateLimitRule::new(120, Duration::from_secs(60)),
        }
    }
}

/// Verdict for a single request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allow,
    Deny { retry_after_secs: u64 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Counter state for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCounter {
    pub count: u32,
    pub window_start_ms: u64,
}

/// Backing store for window counters
pub trait RateLimitStore: Send + Sync {
    /// Record a hit and return the counter after it.
    ///
    /// A missing entry, or one whose window has fully elapsed, restarts at
    /// `{count: 1, window_start: now}`.
    fn hit(&self, key: &str, now_ms: u64, window_ms: u64) -> WindowCounter;

    /// Drop entries whose window ended before `now_ms`
    fn sweep(&self, now_ms: u64, window_ms: u64);

    /// Number of live keys
    fn len(&self) -> usize;
}

/// Process-local counters
#[derive(Default)]
pub struct MemoryRateLimitStore {
    counters: DashMap<String, WindowCounter>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for MemoryRateLimitStore {
    fn hit(&self, key: &str, now_ms: u64, window_ms: u64) -> WindowCounter {
        let mut entry = self.counters.entry(key.to_string()).or_insert(WindowCounter {
            count: 0,
            window_start_ms: now_ms,
        });

        let elapsed = now_ms.saturating_sub(entry.window_start_ms);
        if entry.count == 0 || elapsed >= window_ms {
            *entry = WindowCounter {
                count: 1,
                window_start_ms: now_ms,
            };
        } else {
            entry.count = entry.count.saturating_add(1);
        }

        *entry
    }

    fn sweep(&self, now_ms: u64, window_ms: u64) {
        self.counters
            .retain(|_, counter| now_ms.saturating_sub(counter.window_start_ms) < window_ms);
    }

    fn len(&self) -> usize {
        self.counters.len()
    }
}

/// Applies per-scope rules over a [`RateLimitStore`]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    rules: RateLimitRules,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, rules: RateLimitRules) -> Self {
        Self { store, rules }
    }

    /// In-memory limiter with the given rules
    pub fn in_memory(rules: RateLimitRules) -> Self {
        Self::new(Arc::new(MemoryRateLimitStore::new()), rules)
    }

    pub fn rules(&self) -> &RateLimitRules {
        &self.rules
    }

    /// Check and record a request at the current wall-clock time
    pub fn check(&self, scope: RateLimitScope, identifier: &str) -> RateDecision {
        self.check_at(scope, identifier, now_millis())
    }

    /// Check and record a request at `now_ms`
    pub fn check_at(&self, scope: RateLimitScope, identifier: &str, now_ms: u64) -> RateDecision {
        let rule = self.rules.rule(scope);
        let window_ms = rule.window.as_millis() as u64;
        let key = format!("{}:{}", scope.as_str(), identifier);

        let counter = self.store.hit(&key, now_ms, window_ms);
        if counter.count <= rule.max {
            return RateDecision::Allow;
        }

        let window_end = counter.window_start_ms.saturating_add(window_ms);
        let remaining_ms = window_end.saturating_sub(now_ms);
        let retry_after_secs = remaining_ms.div_ceil(1000).max(1);

        debug!(
            scope = scope.as_str(),
            count = counter.count,
            retry_after_secs,
            "Rate limit exceeded"
        );

        RateDecision::Deny { retry_after_secs }
    }

    /// Drop expired counters for every scope
    pub fn sweep(&self) {
        let longest = [
            self.rules.submit_per_ip.window,
            self.rules.resend_per_email.window,
            self.rules.analytics_per_ip.window,
        ]
        .into_iter()
        .max()
        .unwrap_or_default();
        self.store.sweep(now_millis(), longest.as_millis() as u64);
    }

    /// Number of tracked keys
    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }
}

/// Periodically sweep stale counters so the map stays bounded
pub fn spawn_sweep_task(limiter: Arc<RateLimiter>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            limiter.sweep();
            debug!(keys = limiter.tracked_keys(), "Rate limiter swept");
        }
    });
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32, window_secs: u64) -> RateLimiter {
        let rule = RateLimitRule::new(max, Duration::from_secs(window_secs));
        RateLimiter::in_memory(RateLimitRules {
            submit_per_ip: rule,
            resend_per_email: rule,
            analytics_per_ip: rule,
        })
    }

    #[test]
    fn test_allow_deny_then_allow_after_window() {
        let limiter = limiter(1, 60);
        let t0 = 1_000_000;

        assert_eq!(
            limiter.check_at(RateLimitScope::SubmitPerIp, "1.2.3.4", t0),
            RateDecision::Allow
        );
        assert_eq!(
            limiter.check_at(RateLimitScope::SubmitPerIp, "1.2.3.4", t0 + 59_999),
            RateDecision::Deny { retry_after_secs: 1 }
        );
        assert_eq!(
            limiter.check_at(RateLimitScope::SubmitPerIp, "1.2.3.4", t0 + 60_000),
            RateDecision::Allow
        );
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let limiter = limiter(2, 3600);
        let t0 = 5_000;

        assert!(limiter.check_at(RateLimitScope::SubmitPerIp, "ip", t0).is_allowed());
        assert!(limiter.check_at(RateLimitScope::SubmitPerIp, "ip", t0 + 10).is_allowed());
        let decision = limiter.check_at(RateLimitScope::SubmitPerIp, "ip", t0 + 1_500);
        // 3_600_000 - 1_500 = 3_598_500 ms -> 3599 s
        assert_eq!(decision, RateDecision::Deny { retry_after_secs: 3599 });
    }

    #[test]
    fn test_scopes_are_independent() {
        let limiter = limiter(1, 60);
        let t0 = 10_000;

        assert!(limiter.check_at(RateLimitScope::SubmitPerIp, "x", t0).is_allowed());
        assert!(limiter.check_at(RateLimitScope::ResendPerEmail, "x", t0).is_allowed());
        assert!(!limiter.check_at(RateLimitScope::SubmitPerIp, "x", t0 + 1).is_allowed());
        assert!(limiter.check_at(RateLimitScope::SubmitPerIp, "y", t0 + 1).is_allowed());
    }

    #[test]
    fn test_sweep_drops_expired_counters() {
        let store = MemoryRateLimitStore::new();
        store.hit("a", 0, 1_000);
        store.hit("b", 900, 1_000);
        store.sweep(1_500, 1_000);
        assert_eq!(store.len(), 1);
    }
}
