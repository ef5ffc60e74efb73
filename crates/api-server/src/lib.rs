//! Read-only HTTP surface over the insider-trading platform's persisted state, plus
//! the admin endpoints that enqueue work onto the job queue. Authentication, billing,
//! and full user management are treated as external collaborators here: the surface
//! exists (so the read endpoints can be exercised behind a session), but the identity
//! provider and payment processor are not reimplemented — see `auth` and `billing`.

pub mod admin_routes;
pub mod audit;
pub mod auth;
pub mod billing;
pub mod brute_force;
pub mod feedback;
pub mod ip_allowlist;
pub mod market_routes;
pub mod request_id;
pub mod security_headers;

use axum::{
    extract::MatchedPath,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use insider_core::Config;
use job_queue::JobQueue;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use brute_force::BruteForceGuard;
use ip_allowlist::IpAllowlist;

/// Shared state handed to every route. Cheap to clone: every field is a handle.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub queue: JobQueue,
    pub cfg: Arc<Config>,
    pub brute_force: Arc<BruteForceGuard>,
    pub admin_allowlist: Option<IpAllowlist>,
}

/// Uniform response envelope used by every endpoint in this crate.
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self { success: true, data: Some(data), error: None })
    }
}

/// Domain error surfaced to HTTP clients. Mirrors the propagation policy of spec §7's
/// "user-facing" error class: auth/subscription/not-found map onto the listed status
/// codes with a consistent `detail`-shaped envelope.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("subscription required")]
    SubscriptionRequired,
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("queue error: {0}")]
    Queue(#[from] job_queue::QueueError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::SubscriptionRequired => StatusCode::PAYMENT_REQUIRED,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Database(_) | AppError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if matches!(status, StatusCode::INTERNAL_SERVER_ERROR) {
            tracing::error!(error = %self, "request failed");
        }

        (status, Json(serde_json::json!({ "success": false, "error": self.to_string() }))).into_response()
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn metrics(axum::extract::State(state): axum::extract::State<AppState>) -> Result<impl IntoResponse, AppError> {
    let (pending, running, success, error): (i64, i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE status = 'pending'),
            COUNT(*) FILTER (WHERE status = 'running'),
            COUNT(*) FILTER (WHERE status = 'success'),
            COUNT(*) FILTER (WHERE status = 'error')
        FROM jobs
        "#,
    )
    .fetch_one(&state.pool)
    .await?;

    Ok(ApiResponse::ok(serde_json::json!({
        "jobs_pending": pending,
        "jobs_running": running,
        "jobs_success": success,
        "jobs_error": error,
    })))
}

fn build_router(state: AppState) -> Router {
    let admin_router = admin_routes::router()
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), ip_allowlist::admin_ip_gate));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .merge(auth::router())
        .merge(billing::router())
        .merge(feedback::router())
        .merge(market_routes::router())
        .nest("/api/admin", admin_router)
        .layer(axum::middleware::from_fn(security_headers::security_headers_middleware))
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<_>| {
            let path = req.extensions().get::<MatchedPath>().map(MatchedPath::as_str).unwrap_or(req.uri().path());
            tracing::info_span!("request", method = %req.method(), path, request_id = tracing::field::Empty)
        }))
        .with_state(state)
}

pub async fn run_server() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).json().init();

    let cfg = Config::from_env();
    let pool = PgPoolOptions::new().max_connections(10).connect(&cfg.db_dsn).await?;
    insider_core::schema::bootstrap(&pool).await?;

    let queue = JobQueue::new(pool.clone());
    let state = AppState {
        pool,
        queue,
        cfg: Arc::new(cfg),
        brute_force: Arc::new(BruteForceGuard::new()),
        admin_allowlist: IpAllowlist::from_env(),
    };

    let cleanup_guard = state.brute_force.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            cleanup_guard.cleanup();
        }
    });

    let bind_addr = std::env::var("API_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(%bind_addr, "api-server listening");

    axum::serve(listener, build_router(state).into_make_service_with_connect_info::<std::net::SocketAddr>()).await?;
    Ok(())
}
