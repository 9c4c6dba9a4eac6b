//! Health check endpoints
//!
//! - /health - Liveness probe (is the process running?)
//! - /ready - Readiness probe (can the backing store be reached?)
//! - /version - Build information stamped by build.rs

use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::warn;

use crate::routes::response::{json_response, FullBody};
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub status: &'static str,
    pub version: &'static str,
    /// Uptime in seconds
    pub uptime: u64,
    pub timestamp: String,
    /// `development` or `production`
    pub mode: &'static str,
    /// `mongodb` or `memory`
    pub storage: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
    pub commit: &'static str,
    pub commit_full: &'static str,
    pub build_time: &'static str,
    pub service: &'static str,
}

/// Handle liveness probe (/health)
pub fn health_check(state: &AppState) -> Response<FullBody> {
    let response = HealthResponse {
        healthy: true,
        status: "online",
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        mode: if state.args.dev_mode {
            "development"
        } else {
            "production"
        },
        storage: if state.mongo.is_some() { "mongodb" } else { "memory" },
    };
    json_response(StatusCode::OK, &response)
}

/// Handle readiness probe (/ready)
pub async fn readiness_check(state: &AppState) -> Response<FullBody> {
    match state.waitlist.store().ping().await {
        Ok(()) => json_response(
            StatusCode::OK,
            &ReadyResponse {
                ready: true,
                error: None,
            },
        ),
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                &ReadyResponse {
                    ready: false,
                    error: Some("store unreachable".to_string()),
                },
            )
        }
    }
}

/// Handle version info (/version)
pub fn version_info() -> Response<FullBody> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        commit_full: option_env!("GIT_COMMIT_FULL").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        service: "waitlist",
    };
    json_response(StatusCode::OK, &response)
}
