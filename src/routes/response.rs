//! Response builders shared by the route handlers
//!
//! Builders write status and headers through `Response::new` and
//! `headers_mut` so no path can fail after a handler has decided its answer.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{
    HeaderName, HeaderValue, CACHE_CONTROL, CONTENT_TYPE, LOCATION, RETRY_AFTER, SET_COOKIE,
    WWW_AUTHENTICATE,
};
use hyper::{Response, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};

use crate::validation::ValidationErrors;

pub type FullBody = Full<Bytes>;

/// Serialize `body` as JSON with the given status
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<FullBody> {
    let (status, json) = match serde_json::to_vec(body) {
        Ok(json) => (status, json),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            br#"{"ok":false,"code":"server_error"}"#.to_vec(),
        ),
    };

    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// `200 {ok:true}`
pub fn ok_response() -> Response<FullBody> {
    json_response(StatusCode::OK, &json!({ "ok": true }))
}

/// `{ok:false, code}` with optional details
pub fn error_response(status: StatusCode, code: &str, details: Option<Value>) -> Response<FullBody> {
    let mut body = json!({ "ok": false, "code": code });
    if let Some(details) = details {
        body["details"] = details;
    }
    json_response(status, &body)
}

/// 400 listing every offending field
pub fn validation_response(errors: &ValidationErrors) -> Response<FullBody> {
    error_response(
        StatusCode::BAD_REQUEST,
        errors.code(),
        serde_json::to_value(&errors.issues).ok(),
    )
}

/// 500 with no internals
pub fn server_error_response() -> Response<FullBody> {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "server_error", None)
}

/// 429 with `Retry-After` in whole seconds
pub fn rate_limited_response(retry_after_secs: u64) -> Response<FullBody> {
    let mut response = error_response(
        StatusCode::TOO_MANY_REQUESTS,
        "rate_limited",
        Some(json!({ "retryAfterSeconds": retry_after_secs })),
    );
    response
        .headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
    response
}

pub fn unauthorized_response() -> Response<FullBody> {
    let mut response = error_response(StatusCode::UNAUTHORIZED, "unauthorized", None);
    response
        .headers_mut()
        .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    response
}

pub fn not_found_response(path: &str) -> Response<FullBody> {
    error_response(
        StatusCode::NOT_FOUND,
        "not_found",
        Some(json!({ "path": path })),
    )
}

pub fn method_not_allowed_response() -> Response<FullBody> {
    error_response(StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", None)
}

/// Empty response with the given status
pub fn empty_response(status: StatusCode) -> Response<FullBody> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// Redirect to `location`. An unrepresentable location degrades to `/`.
pub fn redirect_response(status: StatusCode, location: &str) -> Response<FullBody> {
    let mut response = empty_response(status);
    let value = HeaderValue::from_str(location).unwrap_or_else(|_| HeaderValue::from_static("/"));
    let headers = response.headers_mut();
    headers.insert(LOCATION, value);
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// Append a `Set-Cookie` header; invalid cookie strings are dropped
pub fn with_cookie(mut response: Response<FullBody>, cookie: &str) -> Response<FullBody> {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        response.headers_mut().append(SET_COOKIE, value);
    }
    response
}

/// Set an arbitrary static header
pub fn with_header(
    mut response: Response<FullBody>,
    name: HeaderName,
    value: &'static str,
) -> Response<FullBody> {
    response
        .headers_mut()
        .insert(name, HeaderValue::from_static(value));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = rate_limited_response(42);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "42");
    }

    #[test]
    fn test_redirect_falls_back_on_bad_location() {
        let response = redirect_response(StatusCode::SEE_OTHER, "https://x.test/\nbad");
        assert_eq!(response.headers()[LOCATION], "/");

        let response = redirect_response(StatusCode::SEE_OTHER, "https://x.test/en");
        assert_eq!(response.headers()[LOCATION], "https://x.test/en");
    }
}
