//! Admin reporting endpoints
//!
//! All routes need `Authorization: Bearer <ADMIN_API_KEY>`. With no key
//! configured the whole surface answers 503.

use chrono::{Duration, Utc};
use hyper::{Response, StatusCode};
use serde::Serialize;
use serde_json::json;
use tracing::{error, warn};

use crate::auth::{extract_bearer, mask_email};
use crate::routes::request::RequestMeta;
use crate::routes::response::{
    error_response, json_response, server_error_response, unauthorized_response, FullBody,
};
use crate::server::AppState;
use crate::waitlist::WaitlistRecord;

/// Days covered by the signups-per-day series
pub const STATS_DAYS: u32 = 14;

pub const RECENT_DEFAULT: usize = 50;
pub const RECENT_MAX: usize = 200;

pub const SUMMARY_DEFAULT_DAYS: u32 = 7;
pub const SUMMARY_MAX_DAYS: u32 = 90;

/// One row of the recent-signups view
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentEntry {
    pub email: String,
    pub status: &'static str,
    pub locale: Option<String>,
    pub created_at: String,
    pub confirmed_at: Option<String>,
}

impl From<&WaitlistRecord> for RecentEntry {
    fn from(record: &WaitlistRecord) -> Self {
        Self {
            email: mask_email(&record.email),
            status: record.status.as_str(),
            locale: record.locale.clone(),
            created_at: record.created_at.to_rfc3339(),
            confirmed_at: record.confirmed_at.map(|at| at.to_rfc3339()),
        }
    }
}

/// Check the bearer key; `Err` carries the response to send instead
#[allow(clippy::result_large_err)]
fn authorize(state: &AppState, meta: &RequestMeta) -> Result<(), Response<FullBody>> {
    if !state.admin.is_configured() {
        return Err(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "admin_disabled",
            None,
        ));
    }
    if !state.admin.validate(extract_bearer(meta.authorization.as_deref())) {
        warn!(ip = %meta.client_ip, path = %meta.path, "Rejected admin request");
        return Err(unauthorized_response());
    }
    Ok(())
}

/// Parse a numeric query parameter, clamped to `[min, max]`
fn bounded<T>(meta: &RequestMeta, name: &str, default: T, min: T, max: T) -> T
where
    T: std::str::FromStr + Ord + Copy,
{
    meta.query_param(name)
        .and_then(|v| v.trim().parse::<T>().ok())
        .map(|v| v.clamp(min, max))
        .unwrap_or(default)
}

/// GET /admin/waitlist/stats
pub async fn handle_waitlist_stats(state: &AppState, meta: &RequestMeta) -> Response<FullBody> {
    if let Err(response) = authorize(state, meta) {
        return response;
    }

    match state.waitlist.store().stats(Utc::now(), STATS_DAYS).await {
        Ok(stats) => json_response(StatusCode::OK, &json!({ "ok": true, "stats": stats })),
        Err(e) => {
            error!(error = %e, "Failed to load waitlist stats");
            server_error_response()
        }
    }
}

/// GET /admin/waitlist/recent?limit=
pub async fn handle_waitlist_recent(state: &AppState, meta: &RequestMeta) -> Response<FullBody> {
    if let Err(response) = authorize(state, meta) {
        return response;
    }

    let limit = bounded(meta, "limit", RECENT_DEFAULT, 1, RECENT_MAX);
    match state.waitlist.store().recent(limit).await {
        Ok(records) => {
            let entries: Vec<RecentEntry> = records.iter().map(RecentEntry::from).collect();
            json_response(StatusCode::OK, &json!({ "ok": true, "entries": entries }))
        }
        Err(e) => {
            error!(error = %e, "Failed to load recent signups");
            server_error_response()
        }
    }
}

/// GET /admin/analytics/summary?days=
pub async fn handle_analytics_summary(state: &AppState, meta: &RequestMeta) -> Response<FullBody> {
    if let Err(response) = authorize(state, meta) {
        return response;
    }

    let days = bounded(meta, "days", SUMMARY_DEFAULT_DAYS, 1, SUMMARY_MAX_DAYS);
    let since = Utc::now() - Duration::days(i64::from(days));

    match state.analytics.summary(since, days).await {
        Ok(summary) => json_response(StatusCode::OK, &json!({ "ok": true, "summary": summary })),
        Err(e) => {
            error!(error = %e, "Failed to load analytics summary");
            server_error_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_query_values() {
        let meta = RequestMeta::for_path("/admin/waitlist/recent?limit=500", "1.1.1.1");
        assert_eq!(bounded(&meta, "limit", RECENT_DEFAULT, 1, RECENT_MAX), RECENT_MAX);

        let meta = RequestMeta::for_path("/admin/waitlist/recent?limit=0", "1.1.1.1");
        assert_eq!(bounded(&meta, "limit", RECENT_DEFAULT, 1, RECENT_MAX), 1);

        let meta = RequestMeta::for_path("/admin/waitlist/recent?limit=abc", "1.1.1.1");
        assert_eq!(bounded(&meta, "limit", RECENT_DEFAULT, 1, RECENT_MAX), RECENT_DEFAULT);

        let meta = RequestMeta::for_path("/admin/analytics/summary", "1.1.1.1");
        assert_eq!(
            bounded(&meta, "days", SUMMARY_DEFAULT_DAYS, 1, SUMMARY_MAX_DAYS),
            SUMMARY_DEFAULT_DAYS
        );
    }
}
