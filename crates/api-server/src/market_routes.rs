//! Read-only event/ticker/price surface (spec §6): ticker list, per-ticker events,
//! the global event feed, single-event detail, and per-ticker price history.
//! Non-admin reads require an active/trialing subscription (or the dev bypass).

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{auth::{require_subscription, AuthUser}, AppError, AppState, ApiResponse};

#[derive(Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Serialize, sqlx::FromRow)]
pub struct TickerSummary {
    pub ticker: String,
    pub issuer_name: Option<String>,
    pub issuer_cik: String,
    pub market_cap_bucket: Option<String>,
    pub last_filing_date: Option<String>,
}

async fn list_tickers(
    State(state): State<AppState>,
    user: AuthUser,
    Query(page): Query<PageQuery>,
) -> Result<Json<ApiResponse<Vec<TickerSummary>>>, AppError> {
    require_subscription(&user)?;

    let limit = page.limit.clamp(1, 500);
    let rows: Vec<TickerSummary> = sqlx::query_as(
        r#"
        SELECT im.current_ticker AS ticker, im.issuer_name, im.issuer_cik,
               mc.market_cap_bucket, im.last_filing_date
        FROM issuer_master im
        LEFT JOIN market_cap_cache mc ON mc.ticker = im.current_ticker
        WHERE im.current_ticker IS NOT NULL AND im.current_ticker <> ''
        ORDER BY im.last_filing_date DESC NULLS LAST
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(limit)
    .bind(page.offset.max(0))
    .fetch_all(&state.pool)
    .await?;

    Ok(ApiResponse::ok(rows))
}

#[derive(Serialize, sqlx::FromRow)]
pub struct EventSummary {
    pub issuer_cik: String,
    pub owner_key: String,
    pub accession_number: String,
    pub ticker: Option<String>,
    pub filing_date: String,
    pub owner_name_display: Option<String>,
    pub has_buy: bool,
    pub has_sell: bool,
    pub buy_dollars_total: Option<f64>,
    pub sell_dollars_total: Option<f64>,
    pub ai_buy_rating: Option<f64>,
    pub ai_sell_rating: Option<f64>,
}

const EVENT_SUMMARY_COLUMNS: &str = r#"
    issuer_cik, owner_key, accession_number, ticker, filing_date, owner_name_display,
    has_buy <> 0 AS has_buy, has_sell <> 0 AS has_sell,
    buy_dollars_total, sell_dollars_total, ai_buy_rating, ai_sell_rating
"#;

async fn ticker_events(
    State(state): State<AppState>,
    user: AuthUser,
    Path(ticker): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<ApiResponse<Vec<EventSummary>>>, AppError> {
    require_subscription(&user)?;

    let limit = page.limit.clamp(1, 500);
    let sql = format!(
        "SELECT {EVENT_SUMMARY_COLUMNS} FROM insider_events WHERE ticker = $1 ORDER BY filing_date DESC LIMIT $2 OFFSET $3"
    );
    let rows: Vec<EventSummary> =
        sqlx::query_as(&sql).bind(&ticker).bind(limit).bind(page.offset.max(0)).fetch_all(&state.pool).await?;

    Ok(ApiResponse::ok(rows))
}

async fn global_events(
    State(state): State<AppState>,
    user: AuthUser,
    Query(page): Query<PageQuery>,
) -> Result<Json<ApiResponse<Vec<EventSummary>>>, AppError> {
    require_subscription(&user)?;

    let limit = page.limit.clamp(1, 500);
    let sql = format!("SELECT {EVENT_SUMMARY_COLUMNS} FROM insider_events ORDER BY filing_date DESC LIMIT $1 OFFSET $2");
    let rows: Vec<EventSummary> = sqlx::query_as(&sql).bind(limit).bind(page.offset.max(0)).fetch_all(&state.pool).await?;

    Ok(ApiResponse::ok(rows))
}

#[derive(Serialize)]
pub struct EventDetail {
    pub event: serde_json::Value,
    pub outcomes: Vec<serde_json::Value>,
}

async fn event_detail(
    State(state): State<AppState>,
    user: AuthUser,
    Path((issuer_cik, owner_key, accession_number)): Path<(String, String, String)>,
) -> Result<Json<ApiResponse<EventDetail>>, AppError> {
    require_subscription(&user)?;

    let event_row: Option<serde_json::Value> = sqlx::query_scalar(
        r#"
        SELECT row_to_json(e) FROM (
            SELECT * FROM insider_events WHERE issuer_cik = $1 AND owner_key = $2 AND accession_number = $3
        ) e
        "#,
    )
    .bind(&issuer_cik)
    .bind(&owner_key)
    .bind(&accession_number)
    .fetch_optional(&state.pool)
    .await?;

    let Some(event) = event_row else {
        return Err(AppError::NotFound);
    };

    let outcomes: Vec<serde_json::Value> = sqlx::query_scalar(
        r#"
        SELECT row_to_json(o) FROM (
            SELECT * FROM event_outcomes WHERE issuer_cik = $1 AND owner_key = $2 AND accession_number = $3
        ) o
        "#,
    )
    .bind(&issuer_cik)
    .bind(&owner_key)
    .bind(&accession_number)
    .fetch_all(&state.pool)
    .await?;

    Ok(ApiResponse::ok(EventDetail { event, outcomes }))
}

#[derive(Serialize, sqlx::FromRow)]
pub struct PricePoint {
    pub date: String,
    pub adj_close: f64,
}

async fn ticker_prices(
    State(state): State<AppState>,
    user: AuthUser,
    Path(ticker): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<ApiResponse<Vec<PricePoint>>>, AppError> {
    require_subscription(&user)?;

    let issuer_cik: Option<(String,)> =
        sqlx::query_as("SELECT issuer_cik FROM issuer_master WHERE current_ticker = $1").bind(&ticker).fetch_optional(&state.pool).await?;

    let Some((issuer_cik,)) = issuer_cik else {
        return Err(AppError::NotFound);
    };

    let limit = page.limit.clamp(1, 2000);
    let rows: Vec<PricePoint> = sqlx::query_as(
        "SELECT date, adj_close FROM issuer_prices_daily WHERE issuer_cik = $1 ORDER BY date DESC LIMIT $2 OFFSET $3",
    )
    .bind(&issuer_cik)
    .bind(limit)
    .bind(page.offset.max(0))
    .fetch_all(&state.pool)
    .await?;

    Ok(ApiResponse::ok(rows))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/tickers", get(list_tickers))
        .route("/api/tickers/:ticker/events", get(ticker_events))
        .route("/api/tickers/:ticker/prices", get(ticker_prices))
        .route("/api/events", get(global_events))
        .route("/api/events/:issuer_cik/:owner_key/:accession_number", get(event_detail))
}
