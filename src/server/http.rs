//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo, one task per connection. Routing is a
//! plain `(Method, path)` match in [`dispatch`], which takes an already
//! collected body so it can be driven without a socket.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, ORIGIN, VARY,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::analytics::{AnalyticsStore, ConsentStore, MemoryAnalyticsStore, MongoAnalyticsStore};
use crate::auth::AdminKeyValidator;
use crate::config::Args;
use crate::db::MongoClient;
use crate::locale::{locale_redirect, LocaleConfig};
use crate::logging::FunnelLogger;
use crate::ratelimit::{spawn_sweep_task, RateLimiter};
use crate::routes::response::{
    empty_response, error_response, method_not_allowed_response, not_found_response,
    redirect_response, with_cookie, with_header, FullBody,
};
use crate::routes::{self, RequestMeta, MAX_BODY_BYTES};
use crate::services::{BypassCaptcha, CaptchaVerifier, HttpMailer, LogMailer, Mailer, TurnstileVerifier};
use crate::types::{Result, WaitlistError};
use crate::waitlist::{
    MemoryWaitlistStore, MongoWaitlistStore, WaitlistService, WaitlistSettings, WaitlistStore,
};

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// How long in-flight connections get to finish after shutdown begins
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// How often stale rate-limit counters are swept
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// =============================================================================
// Application state
// =============================================================================

/// Persistence backends
pub struct Stores {
    pub waitlist: Arc<dyn WaitlistStore>,
    pub consents: Arc<dyn ConsentStore>,
    pub analytics: Arc<dyn AnalyticsStore>,
}

impl Stores {
    /// Process-local stores for development and tests
    pub fn in_memory() -> Self {
        let analytics = Arc::new(MemoryAnalyticsStore::new());
        Self {
            waitlist: Arc::new(MemoryWaitlistStore::new()),
            consents: analytics.clone(),
            analytics,
        }
    }

    /// MongoDB collections, indexes applied
    pub async fn mongo(client: &MongoClient) -> Result<Self> {
        let analytics = Arc::new(MongoAnalyticsStore::new(client).await?);
        Ok(Self {
            waitlist: Arc::new(MongoWaitlistStore::new(client.clone()).await?),
            consents: analytics.clone(),
            analytics,
        })
    }
}

/// Outbound collaborators
pub struct Transports {
    pub captcha: Arc<dyn CaptchaVerifier>,
    pub mailer: Arc<dyn Mailer>,
}

impl Transports {
    /// Real providers where configured; development mode may fall back to
    /// the bypass verifier and the log-only mailer
    pub fn from_args(args: &Args) -> Result<Self> {
        let captcha: Arc<dyn CaptchaVerifier> = match &args.captcha_secret {
            Some(secret) if !secret.is_empty() => Arc::new(TurnstileVerifier::new(
                secret.clone(),
                args.captcha_verify_url.clone(),
            )?),
            _ if args.dev_mode => {
                warn!("CAPTCHA_SECRET not set - captcha checks bypassed (dev mode)");
                Arc::new(BypassCaptcha)
            }
            _ => return Err(WaitlistError::Config("CAPTCHA_SECRET is required".into())),
        };

        let mailer: Arc<dyn Mailer> = match (&args.email_api_key, &args.email_sender) {
            (Some(key), Some(sender)) => Arc::new(HttpMailer::new(
                args.email_api_url.clone(),
                key.clone(),
                sender.clone(),
                args.email_sender_name.clone(),
            )?),
            _ if args.dev_mode => {
                warn!("Email API not configured - confirmation emails are only logged (dev mode)");
                Arc::new(LogMailer)
            }
            _ => {
                return Err(WaitlistError::Config(
                    "EMAIL_API_KEY and EMAIL_SENDER are required".into(),
                ))
            }
        };

        Ok(Self { captcha, mailer })
    }
}

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub locales: LocaleConfig,
    pub waitlist: WaitlistService,
    pub consents: Arc<dyn ConsentStore>,
    pub analytics: Arc<dyn AnalyticsStore>,
    pub limiter: Arc<RateLimiter>,
    pub admin: AdminKeyValidator,
    pub funnel: FunnelLogger,
    pub mongo: Option<MongoClient>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        args: Args,
        stores: Stores,
        transports: Transports,
        funnel: FunnelLogger,
        mongo: Option<MongoClient>,
    ) -> Self {
        let locales = args.locale_config();
        let limiter = Arc::new(RateLimiter::in_memory(args.rate_limit_rules()));
        let settings = WaitlistSettings {
            email_hash_secret: args.email_hash_secret(),
            public_url: args.public_url.clone(),
            token_ttl: args.confirm_token_ttl(),
            default_locale: locales.default_locale().to_string(),
        };
        let waitlist = WaitlistService::new(
            stores.waitlist,
            limiter.clone(),
            transports.captcha,
            transports.mailer,
            funnel.clone(),
            settings,
        );

        Self {
            admin: AdminKeyValidator::new(args.admin_api_key.clone()),
            args,
            locales,
            waitlist,
            consents: stores.consents,
            analytics: stores.analytics,
            limiter,
            funnel,
            mongo,
            started_at: Instant::now(),
        }
    }

    /// Cookies get `Secure` when the public URL is https
    pub fn secure_cookies(&self) -> bool {
        self.args.public_url.starts_with("https://")
    }

    /// Origin of the marketing site, the only origin granted CORS
    fn site_origin(&self) -> &str {
        let url = self.args.site_url.trim_end_matches('/');
        match url.find("://") {
            Some(scheme_end) => {
                let rest = &url[scheme_end + 3..];
                let host_end = rest.find('/').map_or(url.len(), |i| scheme_end + 3 + i);
                &url[..host_end]
            }
            None => url,
        }
    }
}

// =============================================================================
// Server
// =============================================================================

/// Serve until `shutdown` resolves, then drain open connections
pub async fn run(state: Arc<AppState>, shutdown: impl Future<Output = ()>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;
    info!("Waitlist service listening on {}", state.args.listen);

    if state.args.dev_mode {
        warn!("Development mode enabled - in-memory stores and relaxed providers allowed");
    }

    spawn_sweep_task(Arc::clone(&state.limiter), SWEEP_INTERVAL);

    let (drain_tx, drain_rx) = watch::channel(false);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Error accepting connection: {:?}", e);
                        continue;
                    }
                };

                let state = Arc::clone(&state);
                let mut drain_rx = drain_rx.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    let conn = http1::Builder::new()
                        .title_case_headers(true)
                        .serve_connection(io, service);
                    tokio::pin!(conn);

                    let mut draining = false;
                    loop {
                        tokio::select! {
                            result = conn.as_mut() => {
                                if let Err(err) = result {
                                    debug!("Error serving connection from {}: {:?}", addr, err);
                                }
                                break;
                            }
                            _ = drain_rx.changed(), if !draining => {
                                draining = true;
                                conn.as_mut().graceful_shutdown();
                            }
                        }
                    }
                });
            }
            _ = &mut shutdown => {
                info!("Shutdown requested, draining connections");
                break;
            }
        }
    }

    drop(listener);
    drop(drain_rx);
    let _ = drain_tx.send(true);
    if tokio::time::timeout(DRAIN_TIMEOUT, drain_tx.closed()).await.is_err() {
        warn!("Connections still open after {:?}, exiting anyway", DRAIN_TIMEOUT);
    }

    info!("Server stopped");
    Ok(())
}

/// Read the body (bounded), route, and apply CORS
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let (parts, body) = req.into_parts();
    let meta = RequestMeta::from_parts(
        &parts.headers,
        parts.uri.path(),
        parts.uri.query(),
        addr,
        state.args.trust_proxy,
    );
    let origin = parts
        .headers
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    debug!("[{}] {} {}", meta.client_ip, parts.method, meta.path);

    let body = if parts.method == Method::POST {
        match Limited::new(body, MAX_BODY_BYTES).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(_) => {
                let response = error_response(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", None);
                return Ok(to_boxed(apply_cors(&state, origin.as_deref(), response)));
            }
        }
    } else {
        Bytes::new()
    };

    let response = dispatch(&state, &parts.method, &meta, body).await;
    Ok(to_boxed(apply_cors(&state, origin.as_deref(), response)))
}

/// Route a request with a collected body
pub async fn dispatch(
    state: &AppState,
    method: &Method,
    meta: &RequestMeta,
    body: Bytes,
) -> Response<FullBody> {
    if method == Method::OPTIONS {
        return preflight_response();
    }

    match (method.clone(), meta.path.as_str()) {
        (Method::POST, "/waitlist/signup") => routes::handle_signup(state, meta, body).await,
        (Method::POST, "/waitlist/resend") => routes::handle_resend(state, meta, body).await,
        (Method::GET, "/waitlist/confirm") => routes::handle_confirm(state, meta).await,

        (Method::POST, "/consent") => routes::handle_consent(state, meta, body).await,
        (Method::POST, "/analytics/event") => routes::handle_event(state, meta, body).await,

        (Method::GET, "/admin/waitlist/stats") => routes::handle_waitlist_stats(state, meta).await,
        (Method::GET, "/admin/waitlist/recent") => routes::handle_waitlist_recent(state, meta).await,
        (Method::GET, "/admin/analytics/summary") => {
            routes::handle_analytics_summary(state, meta).await
        }

        (Method::GET, "/health") => routes::health_check(state),
        (Method::GET, "/ready") => routes::readiness_check(state).await,
        (Method::GET, "/version") => routes::version_info(),

        (Method::GET, path) if !is_api_path(path) => localized_redirect(state, meta),

        (_, path) if is_api_path(path) => {
            if is_known_route(path) {
                method_not_allowed_response()
            } else {
                not_found_response(path)
            }
        }
        (_, path) => not_found_response(path),
    }
}

const API_PREFIXES: &[&str] = &["/waitlist/", "/consent", "/analytics/", "/admin/", "/health", "/ready", "/version"];

const KNOWN_ROUTES: &[&str] = &[
    "/waitlist/signup",
    "/waitlist/resend",
    "/waitlist/confirm",
    "/consent",
    "/analytics/event",
    "/admin/waitlist/stats",
    "/admin/waitlist/recent",
    "/admin/analytics/summary",
    "/health",
    "/ready",
    "/version",
];

fn is_api_path(path: &str) -> bool {
    API_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

fn is_known_route(path: &str) -> bool {
    KNOWN_ROUTES.contains(&path)
}

/// Send page requests to their locale-prefixed location on the site
fn localized_redirect(state: &AppState, meta: &RequestMeta) -> Response<FullBody> {
    match locale_redirect(
        &state.locales,
        &state.args.site_url,
        meta.query.as_deref(),
        &meta.locale_inputs(),
    ) {
        Some(redirect) => {
            let response = redirect_response(redirect.status, &redirect.location);
            match redirect.set_cookie {
                Some(cookie) => with_cookie(response, &cookie),
                None => response,
            }
        }
        None => not_found_response(&meta.path),
    }
}

/// CORS preflight response
fn preflight_response() -> Response<FullBody> {
    let response = empty_response(StatusCode::NO_CONTENT);
    let response = with_header(response, ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type, Authorization");
    let response = with_header(response, ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS");
    with_header(response, ACCESS_CONTROL_MAX_AGE, "600")
}

/// Grant CORS (with credentials) to the site origin only
fn apply_cors(state: &AppState, origin: Option<&str>, mut response: Response<FullBody>) -> Response<FullBody> {
    let headers = response.headers_mut();
    headers.insert(VARY, HeaderValue::from_static("Origin"));

    let Some(origin) = origin.filter(|o| *o == state.site_origin()) else {
        return response;
    };
    if let Ok(value) = HeaderValue::from_str(origin) {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
        headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
    }
    response
}

/// Convert a Full<Bytes> body to BoxBody
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}
