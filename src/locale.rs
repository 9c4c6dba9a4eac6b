//! Locale negotiation for the localized site
//!
//! Precedence is path prefix, then the `locale` cookie, then
//! `Accept-Language`, then the configured default. Crawlers skip cookie and
//! header negotiation so every bot sees the same canonical locale.

use hyper::StatusCode;

/// Cookie that remembers the visitor's explicit locale choice
pub const LOCALE_COOKIE: &str = "locale";

/// User-agent fragments that identify crawlers and link unfurlers
const BOT_MARKERS: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "slurp",
    "facebookexternalhit",
    "embedly",
    "preview",
    "lighthouse",
    "headlesschrome",
    "curl/",
    "wget/",
];

/// Supported locales plus the fallback
#[derive(Debug, Clone)]
pub struct LocaleConfig {
    supported: Vec<String>,
    default_locale: String,
}

impl LocaleConfig {
    pub fn new(supported: Vec<String>, default_locale: String) -> Self {
        Self {
            supported,
            default_locale,
        }
    }

    pub fn supported(&self) -> &[String] {
        &self.supported
    }

    pub fn default_locale(&self) -> &str {
        &self.default_locale
    }

    pub fn is_supported(&self, tag: &str) -> bool {
        self.supported.iter().any(|s| s.eq_ignore_ascii_case(tag))
    }

    /// Map an arbitrary tag onto a supported locale: exact match first,
    /// then the primary subtag (`es-MX` -> `es`).
    pub fn match_tag(&self, tag: &str) -> Option<String> {
        let tag = tag.trim().to_lowercase().replace('_', "-");
        if tag.is_empty() {
            return None;
        }
        if let Some(exact) = self.supported.iter().find(|s| **s == tag) {
            return Some(exact.clone());
        }
        let primary = tag.split('-').next().unwrap_or_default();
        self.supported
            .iter()
            .find(|s| s.split('-').next() == Some(primary))
            .cloned()
    }
}

impl Default for LocaleConfig {
    fn default() -> Self {
        Self::new(
            vec!["en".into(), "es".into(), "fr".into(), "de".into()],
            "en".into(),
        )
    }
}

/// Where the resolved locale came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocaleSource {
    Path,
    Cookie,
    AcceptLanguage,
    Default,
}

/// Request facts that drive negotiation
#[derive(Debug, Clone, Default)]
pub struct LocaleInputs<'a> {
    pub path: &'a str,
    pub cookie: Option<&'a str>,
    pub accept_language: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

/// Outcome of locale negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLocale {
    pub locale: String,
    pub source: LocaleSource,
}

/// A redirect onto a locale-prefixed path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocaleRedirect {
    pub status: StatusCode,
    pub location: String,
    /// Cookie to persist the negotiated choice (humans only)
    pub set_cookie: Option<String>,
}

/// Whether the user agent looks like a crawler
pub fn is_bot(user_agent: Option<&str>) -> bool {
    match user_agent {
        None => true,
        Some(ua) if ua.trim().is_empty() => true,
        Some(ua) => {
            let ua = ua.to_lowercase();
            BOT_MARKERS.iter().any(|marker| ua.contains(marker))
        }
    }
}

/// Locale carried by the first path segment, if supported
pub fn path_locale(config: &LocaleConfig, path: &str) -> Option<String> {
    let first = path.trim_start_matches('/').split('/').next()?;
    config
        .supported()
        .iter()
        .find(|s| s.eq_ignore_ascii_case(first))
        .cloned()
}

/// Parse `Accept-Language` into tags ordered by quality (stable for ties)
pub fn parse_accept_language(header: &str) -> Vec<String> {
    let mut weighted: Vec<(String, f32)> = header
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.trim().split(';');
            let tag = pieces.next()?.trim();
            if tag.is_empty() || tag == "*" {
                return None;
            }
            let quality = pieces
                .find_map(|p| p.trim().strip_prefix("q="))
                .and_then(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            (quality > 0.0).then(|| (tag.to_string(), quality))
        })
        .collect();

    weighted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    weighted.into_iter().map(|(tag, _)| tag).collect()
}

/// Resolve the locale for a request
pub fn resolve_locale(config: &LocaleConfig, inputs: &LocaleInputs<'_>) -> ResolvedLocale {
    if let Some(locale) = path_locale(config, inputs.path) {
        return ResolvedLocale {
            locale,
            source: LocaleSource::Path,
        };
    }

    if !is_bot(inputs.user_agent) {
        if let Some(locale) = inputs.cookie.and_then(|c| config.match_tag(c)) {
            return ResolvedLocale {
                locale,
                source: LocaleSource::Cookie,
            };
        }

        if let Some(header) = inputs.accept_language {
            if let Some(locale) = parse_accept_language(header)
                .iter()
                .find_map(|tag| config.match_tag(tag))
            {
                return ResolvedLocale {
                    locale,
                    source: LocaleSource::AcceptLanguage,
                };
            }
        }
    }

    ResolvedLocale {
        locale: config.default_locale().to_string(),
        source: LocaleSource::Default,
    }
}

/// Redirect an unprefixed path onto its locale-prefixed equivalent.
///
/// Humans get a temporary redirect to the negotiated locale plus a cookie;
/// crawlers get a permanent redirect to the default locale.
pub fn locale_redirect(
    config: &LocaleConfig,
    base_url: &str,
    query: Option<&str>,
    inputs: &LocaleInputs<'_>,
) -> Option<LocaleRedirect> {
    if path_locale(config, inputs.path).is_some() {
        return None;
    }

    let bot = is_bot(inputs.user_agent);
    let resolved = resolve_locale(config, inputs);

    let suffix = if inputs.path == "/" || inputs.path.is_empty() {
        String::new()
    } else {
        inputs.path.to_string()
    };
    let mut location = format!(
        "{}/{}{}",
        base_url.trim_end_matches('/'),
        resolved.locale,
        suffix
    );
    if let Some(q) = query.filter(|q| !q.is_empty()) {
        location.push('?');
        location.push_str(q);
    }

    if bot {
        Some(LocaleRedirect {
            status: StatusCode::PERMANENT_REDIRECT,
            location,
            set_cookie: None,
        })
    } else {
        Some(LocaleRedirect {
            status: StatusCode::TEMPORARY_REDIRECT,
            location,
            set_cookie: Some(format!(
                "{}={}; Path=/; Max-Age=31536000; SameSite=Lax",
                LOCALE_COOKIE, resolved.locale
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BROWSER: &str = "Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101 Firefox/128.0";

    #[test]
    fn test_path_prefix_wins() {
        let config = LocaleConfig::default();
        let inputs = LocaleInputs {
            path: "/fr/waitlist",
            cookie: Some("es"),
            accept_language: Some("de"),
            user_agent: Some(BROWSER),
        };
        let resolved = resolve_locale(&config, &inputs);
        assert_eq!(resolved.locale, "fr");
        assert_eq!(resolved.source, LocaleSource::Path);
    }

    #[test]
    fn test_cookie_beats_header() {
        let config = LocaleConfig::default();
        let inputs = LocaleInputs {
            path: "/pricing",
            cookie: Some("es"),
            accept_language: Some("de-DE,de;q=0.9"),
            user_agent: Some(BROWSER),
        };
        assert_eq!(resolve_locale(&config, &inputs).locale, "es");
    }

    #[test]
    fn test_accept_language_quality_order() {
        let config = LocaleConfig::default();
        let inputs = LocaleInputs {
            path: "/",
            cookie: None,
            accept_language: Some("pt-BR;q=1.0, de;q=0.5, fr-CA;q=0.8"),
            user_agent: Some(BROWSER),
        };
        let resolved = resolve_locale(&config, &inputs);
        assert_eq!(resolved.locale, "fr");
        assert_eq!(resolved.source, LocaleSource::AcceptLanguage);
    }

    #[test]
    fn test_bots_get_default() {
        let config = LocaleConfig::default();
        let inputs = LocaleInputs {
            path: "/",
            cookie: Some("es"),
            accept_language: Some("de"),
            user_agent: Some("Googlebot/2.1 (+http://www.google.com/bot.html)"),
        };
        let resolved = resolve_locale(&config, &inputs);
        assert_eq!(resolved.locale, "en");
        assert_eq!(resolved.source, LocaleSource::Default);
    }

    #[test]
    fn test_redirect_human_and_bot() {
        let config = LocaleConfig::default();
        let human = LocaleInputs {
            path: "/about",
            cookie: None,
            accept_language: Some("es-MX"),
            user_agent: Some(BROWSER),
        };
        let redirect = locale_redirect(&config, "https://site.test/", Some("a=1"), &human).unwrap();
        assert_eq!(redirect.status, StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(redirect.location, "https://site.test/es/about?a=1");
        assert!(redirect.set_cookie.unwrap().starts_with("locale=es"));

        let bot = LocaleInputs {
            user_agent: Some("bingbot/2.0"),
            ..human.clone()
        };
        let redirect = locale_redirect(&config, "https://site.test", None, &bot).unwrap();
        assert_eq!(redirect.status, StatusCode::PERMANENT_REDIRECT);
        assert_eq!(redirect.location, "https://site.test/en/about");
        assert!(redirect.set_cookie.is_none());
    }

    #[test]
    fn test_prefixed_path_not_redirected() {
        let config = LocaleConfig::default();
        let inputs = LocaleInputs {
            path: "/de/",
            user_agent: Some(BROWSER),
            ..Default::default()
        };
        assert!(locale_redirect(&config, "https://site.test", None, &inputs).is_none());
    }

    #[test]
    fn test_match_tag_primary_subtag() {
        let config = LocaleConfig::default();
        assert_eq!(config.match_tag("DE_at"), Some("de".to_string()));
        assert_eq!(config.match_tag("ja"), None);
        assert_eq!(config.match_tag(""), None);
    }
}
