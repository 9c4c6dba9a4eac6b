//! Request facts extracted once per request

use std::net::SocketAddr;

use bytes::Bytes;
use hyper::header::{ACCEPT_LANGUAGE, AUTHORIZATION, COOKIE, USER_AGENT};
use hyper::HeaderMap;
use serde_json::Value;

use crate::locale::{LocaleInputs, LOCALE_COOKIE};

/// Largest accepted request body
pub const MAX_BODY_BYTES: usize = 16 * 1024;

/// Header-derived facts the handlers use
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub path: String,
    pub query: Option<String>,
    pub client_ip: String,
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
    pub authorization: Option<String>,
    cookie_header: Option<String>,
    /// `DNT: 1` or `Sec-GPC: 1`
    pub opted_out: bool,
}

fn header(headers: &HeaderMap, name: impl hyper::header::AsHeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

impl RequestMeta {
    /// Collect request facts. `X-Forwarded-For` is honoured only when the
    /// service sits behind a trusted proxy.
    pub fn from_parts(
        headers: &HeaderMap,
        path: &str,
        query: Option<&str>,
        addr: SocketAddr,
        trust_proxy: bool,
    ) -> Self {
        let forwarded = trust_proxy
            .then(|| header(headers, "x-forwarded-for"))
            .flatten()
            .and_then(|xff| xff.split(',').next().map(|ip| ip.trim().to_string()))
            .filter(|ip| !ip.is_empty());

        let flag = |name: &str| header(headers, name).is_some_and(|v| v.trim() == "1");

        Self {
            path: path.to_string(),
            query: query.map(str::to_string),
            client_ip: forwarded.unwrap_or_else(|| addr.ip().to_string()),
            user_agent: header(headers, USER_AGENT),
            accept_language: header(headers, ACCEPT_LANGUAGE),
            authorization: header(headers, AUTHORIZATION),
            cookie_header: header(headers, COOKIE),
            opted_out: flag("dnt") || flag("sec-gpc"),
        }
    }

    /// Builder used by tests and tools that have no socket
    pub fn for_path(path: &str, client_ip: &str) -> Self {
        let (path, query) = match path.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string())),
            None => (path, None),
        };
        Self {
            path: path.to_string(),
            query,
            client_ip: client_ip.to_string(),
            ..Default::default()
        }
    }

    pub fn with_user_agent(mut self, ua: &str) -> Self {
        self.user_agent = Some(ua.to_string());
        self
    }

    pub fn with_cookie_header(mut self, cookies: &str) -> Self {
        self.cookie_header = Some(cookies.to_string());
        self
    }

    pub fn with_authorization(mut self, value: &str) -> Self {
        self.authorization = Some(value.to_string());
        self
    }

    pub fn with_opt_out(mut self) -> Self {
        self.opted_out = true;
        self
    }

    /// Value of one cookie
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookie_header.as_deref()?.split(';').find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then_some(value.trim())
        })
    }

    /// Value of one query parameter (percent-decoded)
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        serde_urlencoded::from_str::<Vec<(String, String)>>(query)
            .ok()?
            .into_iter()
            .find_map(|(k, v)| (k == name).then_some(v))
    }

    /// Inputs for locale negotiation
    pub fn locale_inputs(&self) -> LocaleInputs<'_> {
        LocaleInputs {
            path: &self.path,
            cookie: self.cookie(LOCALE_COOKIE),
            accept_language: self.accept_language.as_deref(),
            user_agent: self.user_agent.as_deref(),
        }
    }
}

/// Parse a JSON body; `None` when it is not JSON at all
pub fn parse_json(body: &Bytes) -> Option<Value> {
    serde_json::from_slice(body).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn addr() -> SocketAddr {
        "10.0.0.9:5555".parse().unwrap()
    }

    #[test]
    fn test_forwarded_for_only_when_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));

        let trusted = RequestMeta::from_parts(&headers, "/", None, addr(), true);
        assert_eq!(trusted.client_ip, "203.0.113.7");

        let direct = RequestMeta::from_parts(&headers, "/", None, addr(), false);
        assert_eq!(direct.client_ip, "10.0.0.9");
    }

    #[test]
    fn test_privacy_signals() {
        let mut headers = HeaderMap::new();
        headers.insert("sec-gpc", HeaderValue::from_static("1"));
        assert!(RequestMeta::from_parts(&headers, "/", None, addr(), false).opted_out);

        let mut headers = HeaderMap::new();
        headers.insert("dnt", HeaderValue::from_static("0"));
        assert!(!RequestMeta::from_parts(&headers, "/", None, addr(), false).opted_out);
    }

    #[test]
    fn test_cookie_and_query_lookup() {
        let meta = RequestMeta::for_path("/waitlist/confirm?token=a%2Bb&x=1", "1.1.1.1")
            .with_cookie_header("locale=fr; consent=analytics,marketing");

        assert_eq!(meta.cookie("locale"), Some("fr"));
        assert_eq!(meta.cookie("consent"), Some("analytics,marketing"));
        assert_eq!(meta.cookie("missing"), None);
        assert_eq!(meta.query_param("token").as_deref(), Some("a+b"));
        assert_eq!(meta.query_param("nope"), None);
        assert_eq!(meta.path, "/waitlist/confirm");
    }
}
