//! Waitlist endpoints
//!
//! - `POST /waitlist/signup`
//! - `POST /waitlist/resend`
//! - `GET /waitlist/confirm?token=...`

use bytes::Bytes;
use hyper::{Response, StatusCode};
use tracing::{error, warn};

use crate::locale::resolve_locale;
use crate::routes::request::{parse_json, RequestMeta};
use crate::routes::response::{
    error_response, ok_response, rate_limited_response, redirect_response, server_error_response,
    validation_response, FullBody,
};
use crate::server::AppState;
use crate::validation::{validate_resend, validate_signup, ValidationErrors};
use crate::waitlist::{ConfirmationStatus, SignupError};

fn invalid_json() -> Response<FullBody> {
    error_response(StatusCode::BAD_REQUEST, "invalid_payload", None)
}

fn signup_error_response(err: SignupError) -> Response<FullBody> {
    match err {
        SignupError::RateLimited { retry_after_secs } => rate_limited_response(retry_after_secs),
        SignupError::CaptchaFailed => {
            error_response(StatusCode::BAD_REQUEST, SignupError::CaptchaFailed.code(), None)
        }
        SignupError::Internal(e) => {
            error!(error = %e, "Waitlist request failed");
            server_error_response()
        }
    }
}

/// POST /waitlist/signup
pub async fn handle_signup(state: &AppState, meta: &RequestMeta, body: Bytes) -> Response<FullBody> {
    let Some(json) = parse_json(&body) else {
        return invalid_json();
    };

    let mut signup = match validate_signup(&json, &state.locales) {
        Ok(signup) => signup,
        Err(errors) => return rejected(state, &errors).await,
    };

    if signup.locale.is_none() {
        signup.negotiated_locale = Some(resolve_locale(&state.locales, &meta.locale_inputs()).locale);
    }

    match state.waitlist.signup(signup, &meta.client_ip).await {
        Ok(()) => ok_response(),
        Err(e) => signup_error_response(e),
    }
}

/// POST /waitlist/resend
pub async fn handle_resend(state: &AppState, meta: &RequestMeta, body: Bytes) -> Response<FullBody> {
    let Some(json) = parse_json(&body) else {
        return invalid_json();
    };

    let resend = match validate_resend(&json) {
        Ok(resend) => resend,
        Err(errors) => return rejected(state, &errors).await,
    };

    match state.waitlist.resend(resend, &meta.client_ip).await {
        Ok(()) => ok_response(),
        Err(e) => signup_error_response(e),
    }
}

async fn rejected(state: &AppState, errors: &ValidationErrors) -> Response<FullBody> {
    state.funnel.signup_rejected(errors.code(), None).await;
    validation_response(errors)
}

/// Result page slug for a confirmation outcome
pub fn result_page(status: ConfirmationStatus) -> &'static str {
    match status {
        ConfirmationStatus::Confirmed => "confirmed",
        ConfirmationStatus::Already => "already-confirmed",
        ConfirmationStatus::Expired => "expired",
        ConfirmationStatus::Invalid | ConfirmationStatus::NotFound => "invalid",
    }
}

/// GET /waitlist/confirm
///
/// Every lifecycle outcome is a redirect to a localized result page; only
/// infrastructure failures produce an error status.
pub async fn handle_confirm(state: &AppState, meta: &RequestMeta) -> Response<FullBody> {
    let token = meta.query_param("token");

    let result = match state.waitlist.confirm(token.as_deref()).await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Confirmation failed");
            return server_error_response();
        }
    };

    let locale = result
        .locale
        .as_deref()
        .and_then(|l| state.locales.match_tag(l))
        .unwrap_or_else(|| resolve_locale(&state.locales, &meta.locale_inputs()).locale);

    if result.status == ConfirmationStatus::NotFound {
        warn!("Confirmation token matched no record");
    }

    let location = format!(
        "{}/{}/waitlist/{}",
        state.args.site_url.trim_end_matches('/'),
        locale,
        result_page(result.status)
    );
    redirect_response(StatusCode::SEE_OTHER, &location)
}
