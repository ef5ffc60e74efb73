//! Vendor fetch handlers (EOD prices, market cap, news, benchmark), each with the
//! self-heal requeue logic the choreography table assigns to them.

use crate::runtime::WorkerContext;
use insider_core::{PipelineError, PipelineResult};
use job_queue::EnqueueRequest;
use market_data_gateway::{fetch_and_store_benchmark_prices, fetch_and_store_market_cap, fetch_and_store_news, fetch_and_store_prices_for_issuer};
use serde_json::{json, Value};

fn str_field<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(|v| v.as_str())
}

pub async fn handle_fetch_prices(ctx: &WorkerContext, payload: &Value) -> PipelineResult<()> {
    let issuer_cik = str_field(payload, "issuer_cik")
        .ok_or_else(|| PipelineError::InvalidData("FETCH_EOD_PRICES_FOR_ISSUER payload missing issuer_cik".into()))?;

    fetch_and_store_prices_for_issuer(&ctx.pool, &ctx.eodhd, issuer_cik).await?;
    requeue_missing_price_series(ctx, issuer_cik).await?;
    Ok(())
}

/// After a successful price refresh, requeue any trend/outcomes job for this issuer
/// whose recorded missing-reason was specifically `missing_price_series` — the one
/// failure mode this fetch can itself resolve.
async fn requeue_missing_price_series(ctx: &WorkerContext, issuer_cik: &str) -> PipelineResult<()> {
    let trend_rows: Vec<(String, String, String)> = sqlx::query_as(
        r#"
        SELECT issuer_cik, owner_key, accession_number FROM insider_events
        WHERE issuer_cik = $1 AND trend_missing_reason = 'missing_price_series'
        "#,
    )
    .bind(issuer_cik)
    .fetch_all(&ctx.pool)
    .await?;

    for (cik, owner_key, accession_number) in trend_rows {
        ctx.queue
            .enqueue(
                EnqueueRequest::new(
                    "COMPUTE_TREND_FOR_EVENT",
                    format!("TREND|{cik}|{owner_key}|{accession_number}|{}", ctx.cfg.current_trend_version),
                    json!({ "issuer_cik": cik, "owner_key": owner_key, "accession_number": accession_number }),
                )
                .priority(85)
                .requeue_if_exists(true),
            )
            .await
            .map_err(|e| PipelineError::Other(e.to_string()))?;
    }

    let outcome_rows: Vec<(String, String, String)> = sqlx::query_as(
        r#"
        SELECT issuer_cik, owner_key, accession_number FROM event_outcomes
        WHERE issuer_cik = $1 AND (missing_reason_60d = 'missing_price_series' OR missing_reason_180d = 'missing_price_series')
        "#,
    )
    .bind(issuer_cik)
    .fetch_all(&ctx.pool)
    .await?;

    for (cik, owner_key, accession_number) in outcome_rows {
        ctx.queue
            .enqueue(
                EnqueueRequest::new(
                    "COMPUTE_OUTCOMES_FOR_EVENT",
                    format!("OUT|{cik}|{owner_key}|{accession_number}|{}", ctx.cfg.current_outcomes_version),
                    json!({ "issuer_cik": cik, "owner_key": owner_key, "accession_number": accession_number }),
                )
                .priority(85)
                .requeue_if_exists(true),
            )
            .await
            .map_err(|e| PipelineError::Other(e.to_string()))?;
    }

    Ok(())
}

pub async fn handle_fetch_market_cap(ctx: &WorkerContext, payload: &Value) -> PipelineResult<()> {
    let ticker = str_field(payload, "ticker")
        .ok_or_else(|| PipelineError::InvalidData("FETCH_MARKET_CAP_FOR_TICKER payload missing ticker".into()))?;
    fetch_and_store_market_cap(&ctx.pool, &ctx.eodhd, ticker, ctx.cfg.market_cap_max_age_days).await
}

pub async fn handle_fetch_news(ctx: &WorkerContext, payload: &Value) -> PipelineResult<()> {
    let ticker = str_field(payload, "ticker")
        .ok_or_else(|| PipelineError::InvalidData("FETCH_NEWS_FOR_TICKER payload missing ticker".into()))?;
    fetch_and_store_news(&ctx.pool, &ctx.eodhd, ticker, ctx.cfg.news_max_age_hours).await
}

const BENCH_MISSING_REASONS: &[&str] =
    &["missing_benchmark_series", "benchmark_anchor_not_found", "benchmark_bad_p0", "insufficient_benchmark_future_data"];

pub async fn handle_fetch_benchmark(ctx: &WorkerContext, payload: &Value) -> PipelineResult<()> {
    let symbol = str_field(payload, "symbol").unwrap_or(&ctx.cfg.benchmark_symbol);
    let resolved = fetch_and_store_benchmark_prices(&ctx.pool, &ctx.eodhd, symbol).await?;
    insider_core::app_config::upsert(&ctx.pool, "benchmark_symbol_resolved", &resolved).await?;
    requeue_benchmark_missing(ctx, &resolved).await?;
    Ok(())
}

async fn requeue_benchmark_missing(ctx: &WorkerContext, symbol: &str) -> PipelineResult<()> {
    let rows: Vec<(String, String, String)> = sqlx::query_as(
        r#"
        SELECT issuer_cik, owner_key, accession_number FROM event_outcomes
        WHERE bench_symbol = $1 AND (bench_missing_reason_60d = ANY($2) OR bench_missing_reason_180d = ANY($2))
        "#,
    )
    .bind(symbol)
    .bind(BENCH_MISSING_REASONS)
    .fetch_all(&ctx.pool)
    .await?;

    for (cik, owner_key, accession_number) in rows {
        ctx.queue
            .enqueue(
                EnqueueRequest::new(
                    "COMPUTE_OUTCOMES_FOR_EVENT",
                    format!("OUT|{cik}|{owner_key}|{accession_number}|{}", ctx.cfg.current_outcomes_version),
                    json!({ "issuer_cik": cik, "owner_key": owner_key, "accession_number": accession_number }),
                )
                .priority(85)
                .requeue_if_exists(true),
            )
            .await
            .map_err(|e| PipelineError::Other(e.to_string()))?;
    }

    Ok(())
}
