//! First-party analytics beacon
//!
//! Events are kept only with analytics consent, no DNT/GPC signal and a
//! human user agent. Anything else is acknowledged with 204 and dropped so
//! the client cannot tell whether it was counted.

use bytes::Bytes;
use chrono::Utc;
use hyper::{Response, StatusCode};
use tracing::{debug, error};

use crate::analytics::{visitor_hash, AnalyticsEvent, ConsentGrant, CONSENT_COOKIE};
use crate::locale::is_bot;
use crate::ratelimit::RateLimitScope;
use crate::routes::request::{parse_json, RequestMeta};
use crate::routes::response::{
    empty_response, error_response, server_error_response, validation_response, FullBody,
};
use crate::server::AppState;
use crate::validation::validate_event;

/// Why an event was dropped, if it was
pub fn drop_reason(state: &AppState, meta: &RequestMeta) -> Option<&'static str> {
    let consented = meta
        .cookie(CONSENT_COOKIE)
        .map(ConsentGrant::from_cookie_value)
        .is_some_and(|grant| grant.analytics);

    if !consented {
        Some("no_consent")
    } else if meta.opted_out {
        Some("opted_out")
    } else if is_bot(meta.user_agent.as_deref()) {
        Some("bot")
    } else if !state
        .limiter
        .check(RateLimitScope::AnalyticsPerIp, &meta.client_ip)
        .is_allowed()
    {
        Some("rate_limited")
    } else {
        None
    }
}

/// POST /analytics/event
pub async fn handle_event(state: &AppState, meta: &RequestMeta, body: Bytes) -> Response<FullBody> {
    if let Some(reason) = drop_reason(state, meta) {
        debug!(reason, "Analytics event dropped");
        return empty_response(StatusCode::NO_CONTENT);
    }

    let Some(json) = parse_json(&body) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid_payload", None);
    };
    let event = match validate_event(&json, &state.locales) {
        Ok(event) => event,
        Err(errors) => return validation_response(&errors),
    };

    let now = Utc::now();
    let record = AnalyticsEvent {
        visitor_hash: visitor_hash(
            &state.args.email_hash_secret(),
            now.date_naive(),
            &meta.client_ip,
            meta.user_agent.as_deref().unwrap_or_default(),
        ),
        name: event.name,
        path: event.path,
        locale: event.locale,
        referrer_host: event.referrer_host,
        occurred_at: now,
    };

    if let Err(e) = state.analytics.record_event(record).await {
        error!(error = %e, "Failed to store analytics event");
        return server_error_response();
    }

    empty_response(StatusCode::NO_CONTENT)
}
