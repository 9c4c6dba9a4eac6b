//! Cookie consent endpoint

use bytes::Bytes;
use chrono::Utc;
use hyper::{Response, StatusCode};
use serde_json::json;
use tracing::{debug, error};
use uuid::Uuid;

use crate::analytics::{consent_cookie, visitor_hash, ConsentGrant, ConsentRecord};
use crate::routes::request::{parse_json, RequestMeta};
use crate::routes::response::{
    error_response, json_response, server_error_response, validation_response, with_cookie,
    FullBody,
};
use crate::server::AppState;
use crate::validation::validate_consent;

/// POST /consent
pub async fn handle_consent(state: &AppState, meta: &RequestMeta, body: Bytes) -> Response<FullBody> {
    let Some(json) = parse_json(&body) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid_payload", None);
    };
    let consent = match validate_consent(&json, &state.locales) {
        Ok(consent) => consent,
        Err(errors) => return validation_response(&errors),
    };

    let now = Utc::now();
    let grant = ConsentGrant {
        analytics: consent.analytics,
        marketing: consent.marketing,
    };
    let record = ConsentRecord {
        consent_id: Uuid::new_v4().to_string(),
        visitor_hash: visitor_hash(
            &state.args.email_hash_secret(),
            now.date_naive(),
            &meta.client_ip,
            meta.user_agent.as_deref().unwrap_or_default(),
        ),
        user_agent: meta.user_agent.clone(),
        grant,
        locale: consent.locale,
        recorded_at: now,
    };
    let consent_id = record.consent_id.clone();

    if let Err(e) = state.consents.record_consent(record).await {
        error!(error = %e, "Failed to store consent record");
        return server_error_response();
    }
    debug!(analytics = grant.analytics, marketing = grant.marketing, "Consent recorded");

    let response = json_response(StatusCode::OK, &json!({ "ok": true, "consentId": consent_id }));
    with_cookie(response, &consent_cookie(&grant, state.secure_cookies()))
}
