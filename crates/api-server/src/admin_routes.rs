//! Admin-only surface: job listing, per-stage enqueue endpoints, and user creation.
//! Nested under `/api/admin` and gated by both `AuthUser::is_admin` (checked per
//! handler) and the IP allowlist middleware applied where this router is mounted.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use job_queue::EnqueueRequest;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{audit::{log_audit, verify_audit_chain, AuditChainVerification}, auth::{admin_create_user, AuthUser}, AppError, AppState, ApiResponse};

fn require_admin(user: &AuthUser) -> Result<(), AppError> {
    if user.is_admin {
        Ok(())
    } else {
        Err(AppError::Forbidden("admin access required".into()))
    }
}

#[derive(Deserialize)]
pub struct JobListQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Serialize, sqlx::FromRow)]
pub struct JobSummary {
    pub job_id: i64,
    pub job_type: String,
    pub status: String,
    pub priority: i32,
    pub dedupe_key: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub updated_at: String,
}

async fn list_jobs(
    State(state): State<AppState>,
    admin: AuthUser,
    Query(q): Query<JobListQuery>,
) -> Result<Json<ApiResponse<Vec<JobSummary>>>, AppError> {
    require_admin(&admin)?;
    let limit = q.limit.clamp(1, 1000);

    let rows: Vec<JobSummary> = if let Some(status) = &q.status {
        sqlx::query_as(
            "SELECT job_id, job_type, status, priority, dedupe_key, attempts, max_attempts, last_error, updated_at FROM jobs WHERE status = $1 ORDER BY updated_at DESC LIMIT $2",
        )
        .bind(status)
        .bind(limit)
        .fetch_all(&state.pool)
        .await?
    } else {
        sqlx::query_as(
            "SELECT job_id, job_type, status, priority, dedupe_key, attempts, max_attempts, last_error, updated_at FROM jobs ORDER BY updated_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&state.pool)
        .await?
    };

    Ok(ApiResponse::ok(rows))
}

async fn monitoring_metrics(State(state): State<AppState>, admin: AuthUser) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    require_admin(&admin)?;

    let by_type: Vec<(String, String, i64)> = sqlx::query_as(
        "SELECT job_type, status, COUNT(*) FROM jobs GROUP BY job_type, status ORDER BY job_type, status",
    )
    .fetch_all(&state.pool)
    .await?;

    let backfill_by_status: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM backfill_queue GROUP BY status").fetch_all(&state.pool).await?;

    Ok(ApiResponse::ok(json!({
        "jobs_by_type_status": by_type.into_iter().map(|(t, s, c)| json!({"job_type": t, "status": s, "count": c})).collect::<Vec<_>>(),
        "backfill_by_status": backfill_by_status.into_iter().map(|(s, c)| json!({"status": s, "count": c})).collect::<Vec<_>>(),
    })))
}

#[derive(Deserialize)]
pub struct IngestAccessionRequest {
    pub accession_number: String,
    pub issuer_cik: Option<String>,
}

async fn ingest_accession(
    State(state): State<AppState>,
    admin: AuthUser,
    Json(req): Json<IngestAccessionRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    require_admin(&admin)?;

    state
        .queue
        .enqueue(
            EnqueueRequest::new(
                "FETCH_ACCESSION_DOCS",
                format!("FETCH|{}", req.accession_number),
                json!({ "accession_number": req.accession_number, "issuer_cik": req.issuer_cik, "ai_requested": false }),
            )
            .priority(100),
        )
        .await?;

    log_audit(&state.pool, "INGEST_ACCESSION", None, Some(&req.accession_number), None, &admin.user_id.to_string()).await;
    Ok(ApiResponse::ok(json!({ "enqueued": true })))
}

async fn reparse_ticker(
    State(state): State<AppState>,
    admin: AuthUser,
    Path(ticker): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    require_admin(&admin)?;

    state
        .queue
        .enqueue(
            EnqueueRequest::new(
                "REPARSE_TICKER",
                format!("REPARSE|{ticker}|{}", state.cfg.current_parse_version),
                json!({ "ticker": ticker, "parse_version": state.cfg.current_parse_version }),
            )
            .priority(30)
            .requeue_if_exists(true),
        )
        .await?;

    log_audit(&state.pool, "REPARSE_TICKER", Some(&ticker), None, None, &admin.user_id.to_string()).await;
    Ok(ApiResponse::ok(json!({ "enqueued": true })))
}

async fn backfill_ticker(
    State(state): State<AppState>,
    admin: AuthUser,
    Path(ticker): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    require_admin(&admin)?;

    let issuer_ciks: Vec<(String,)> =
        sqlx::query_as("SELECT issuer_cik FROM issuer_master WHERE current_ticker = $1").bind(&ticker).fetch_all(&state.pool).await?;

    if issuer_ciks.is_empty() {
        return Err(AppError::NotFound);
    }

    for (issuer_cik,) in &issuer_ciks {
        state
            .queue
            .enqueue(
                EnqueueRequest::new(
                    "BACKFILL_DISCOVER_ISSUER",
                    format!("BACKFILL_DISCOVER|{issuer_cik}|{}", state.cfg.backfill_start_year),
                    json!({ "issuer_cik": issuer_cik, "start_year": state.cfg.backfill_start_year }),
                )
                .priority(25),
            )
            .await?;
    }

    log_audit(&state.pool, "BACKFILL_TICKER", Some(&ticker), None, Some(&format!("{} issuer(s)", issuer_ciks.len())), &admin.user_id.to_string())
        .await;
    Ok(ApiResponse::ok(json!({ "enqueued_issuers": issuer_ciks.len() })))
}

#[derive(Deserialize)]
pub struct FetchBenchmarkRequest {
    pub symbol: Option<String>,
}

async fn fetch_benchmark_prices(
    State(state): State<AppState>,
    admin: AuthUser,
    Json(req): Json<FetchBenchmarkRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    require_admin(&admin)?;
    let symbol = req.symbol.unwrap_or_else(|| state.cfg.benchmark_symbol.clone());

    state
        .queue
        .enqueue(
            EnqueueRequest::new("FETCH_BENCHMARK_PRICES", format!("BENCH_PRICES|{symbol}"), json!({ "symbol": symbol })).priority(65),
        )
        .await?;

    log_audit(&state.pool, "FETCH_BENCHMARK_PRICES", Some(&symbol), None, None, &admin.user_id.to_string()).await;
    Ok(ApiResponse::ok(json!({ "enqueued": true })))
}

async fn regenerate_ai(
    State(state): State<AppState>,
    admin: AuthUser,
    Path((issuer_cik, owner_key, accession_number)): Path<(String, String, String)>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    require_admin(&admin)?;

    state
        .queue
        .enqueue(
            EnqueueRequest::new(
                "RUN_AI_FOR_EVENT",
                format!("AI|{issuer_cik}|{owner_key}|{accession_number}|{}|force", state.cfg.prompt_version),
                json!({ "issuer_cik": issuer_cik, "owner_key": owner_key, "accession_number": accession_number, "force": true }),
            )
            .priority(95)
            .requeue_if_exists(true),
        )
        .await?;

    log_audit(
        &state.pool,
        "REGENERATE_AI",
        None,
        Some(&format!("{issuer_cik}/{owner_key}/{accession_number}")),
        None,
        &admin.user_id.to_string(),
    )
    .await;
    Ok(ApiResponse::ok(json!({ "enqueued": true })))
}

async fn audit_verify(State(state): State<AppState>, admin: AuthUser) -> Result<Json<ApiResponse<AuditChainVerification>>, AppError> {
    require_admin(&admin)?;
    Ok(ApiResponse::ok(verify_audit_chain(&state.pool).await?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/metrics", get(monitoring_metrics))
        .route("/users", post(admin_create_user))
        .route("/ingest/accession", post(ingest_accession))
        .route("/reparse_ticker/:ticker", post(reparse_ticker))
        .route("/backfill_ticker/:ticker", post(backfill_ticker))
        .route("/fetch_benchmark_prices", post(fetch_benchmark_prices))
        .route("/event/:issuer_cik/:owner_key/:accession_number/regenerate_ai", post(regenerate_ai))
        .route("/audit/verify", get(audit_verify))
}
