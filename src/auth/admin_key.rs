//! Bearer-key authentication for the admin reporting endpoints

use super::tokens::constant_time_equals;

/// Validates `Authorization: Bearer <key>` against the configured admin key
#[derive(Debug, Clone)]
pub struct AdminKeyValidator {
    admin_key: Option<String>,
}

impl AdminKeyValidator {
    pub fn new(admin_key: Option<String>) -> Self {
        Self {
            admin_key: admin_key.filter(|k| !k.is_empty()),
        }
    }

    /// Check if an admin key is configured
    pub fn is_configured(&self) -> bool {
        self.admin_key.is_some()
    }

    /// Validate a presented key. Always false when no key is configured.
    pub fn validate(&self, presented: Option<&str>) -> bool {
        match (&self.admin_key, presented) {
            (Some(expected), Some(key)) => constant_time_equals(key, expected),
            _ => false,
        }
    }
}

/// Extract the token from an `Authorization: Bearer ...` header value
pub fn extract_bearer(header: Option<&str>) -> Option<&str> {
    let value = header?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_rejects_everything() {
        let validator = AdminKeyValidator::new(Some(String::new()));
        assert!(!validator.is_configured());
        assert!(!validator.validate(Some("")));
        assert!(!validator.validate(None));
    }

    #[test]
    fn test_configured_key() {
        let validator = AdminKeyValidator::new(Some("admin-secret".into()));
        assert!(validator.validate(Some("admin-secret")));
        assert!(!validator.validate(Some("admin-secreT")));
        assert!(!validator.validate(None));
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer(Some("Bearer abc")), Some("abc"));
        assert_eq!(extract_bearer(Some("bearer  abc ")), Some("abc"));
        assert_eq!(extract_bearer(Some("Basic abc")), None);
        assert_eq!(extract_bearer(Some("Bearer ")), None);
        assert_eq!(extract_bearer(None), None);
    }
}
