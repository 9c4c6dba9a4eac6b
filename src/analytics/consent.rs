//! Consent cookie and visitor hashing

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

/// Cookie recording which optional categories the visitor granted
pub const CONSENT_COOKIE: &str = "consent";

const CONSENT_MAX_AGE_SECS: u64 = 180 * 24 * 60 * 60;

/// Optional categories a visitor agreed to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsentGrant {
    pub analytics: bool,
    pub marketing: bool,
}

impl ConsentGrant {
    /// Cookie value: granted categories comma-separated, or `none`
    pub fn cookie_value(&self) -> String {
        let granted: Vec<&str> = [
            (self.analytics, "analytics"),
            (self.marketing, "marketing"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect();

        if granted.is_empty() {
            "none".to_string()
        } else {
            granted.join(",")
        }
    }

    /// Parse a cookie value; unknown categories are ignored
    pub fn from_cookie_value(value: &str) -> Self {
        value
            .split(',')
            .map(str::trim)
            .fold(Self::default(), |mut grant, category| {
                match category {
                    "analytics" => grant.analytics = true,
                    "marketing" => grant.marketing = true,
                    _ => {}
                }
                grant
            })
    }
}

/// `Set-Cookie` value persisting a grant
pub fn consent_cookie(grant: &ConsentGrant, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; Max-Age={}; SameSite=Lax",
        CONSENT_COOKIE,
        grant.cookie_value(),
        CONSENT_MAX_AGE_SECS
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Daily-rotating pseudonymous visitor ID
pub fn visitor_hash(secret: &str, day: NaiveDate, ip: &str, user_agent: &str) -> String {
    let day = day.format("%Y-%m-%d").to_string();
    let mut hasher = Sha256::new();
    for part in [secret, day.as_str(), ip, user_agent] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_value_round_trip() {
        let both = ConsentGrant {
            analytics: true,
            marketing: true,
        };
        assert_eq!(both.cookie_value(), "analytics,marketing");
        assert_eq!(ConsentGrant::default().cookie_value(), "none");
        assert_eq!(ConsentGrant::from_cookie_value("none"), ConsentGrant::default());
        assert_eq!(
            ConsentGrant::from_cookie_value("marketing, analytics,ads"),
            both
        );
    }

    #[test]
    fn test_consent_cookie_attributes() {
        let grant = ConsentGrant {
            analytics: true,
            marketing: false,
        };
        let cookie = consent_cookie(&grant, true);
        assert!(cookie.starts_with("consent=analytics; Path=/"));
        assert!(cookie.ends_with("; Secure"));
        assert!(!consent_cookie(&grant, false).contains("Secure"));
    }

    #[test]
    fn test_visitor_hash_rotates_daily() {
        let d1 = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();

        let a = visitor_hash("s", d1, "1.2.3.4", "ua");
        assert_eq!(a, visitor_hash("s", d1, "1.2.3.4", "ua"));
        assert_ne!(a, visitor_hash("s", d2, "1.2.3.4", "ua"));
        assert_ne!(a, visitor_hash("s", d1, "1.2.3.5", "ua"));
        assert_eq!(a.len(), 64);
    }
}
