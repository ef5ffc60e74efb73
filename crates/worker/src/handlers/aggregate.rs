//! `AGGREGATE_ACCESSION`: rolls up raw rows into `insider_events` and fans out every
//! downstream producer (prices, market cap, news, clusters, trend, outcomes, and —
//! only when the filing was poller-discovered — the AI judgment).

use crate::runtime::WorkerContext;
use aggregator::aggregate_accession;
use insider_core::{EventKey, PipelineError, PipelineResult};
use job_queue::EnqueueRequest;
use serde_json::{json, Value};

fn str_field<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(|v| v.as_str())
}

fn bool_field(payload: &Value, key: &str, default: bool) -> bool {
    payload.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

pub async fn handle(ctx: &WorkerContext, payload: &Value) -> PipelineResult<()> {
    let accession_number = str_field(payload, "accession_number")
        .ok_or_else(|| PipelineError::InvalidData("AGGREGATE_ACCESSION payload missing accession_number".into()))?;
    let parse_version = str_field(payload, "parse_version").unwrap_or(&ctx.cfg.current_parse_version);
    let ai_requested = bool_field(payload, "ai_requested", false);

    let event_keys = aggregate_accession(&ctx.pool, parse_version, accession_number).await?;

    if let Some(first) = event_keys.first() {
        let issuer_cik = first.issuer_cik.clone();

        let ticker: Option<String> =
            sqlx::query_scalar("SELECT current_ticker FROM issuer_master WHERE issuer_cik = $1")
                .bind(&issuer_cik)
                .fetch_optional(&ctx.pool)
                .await?
                .flatten();

        ctx.queue
            .enqueue(
                EnqueueRequest::new(
                    "FETCH_EOD_PRICES_FOR_ISSUER",
                    format!("PRICES|{issuer_cik}"),
                    json!({ "issuer_cik": issuer_cik }),
                )
                .priority(70),
            )
            .await
            .map_err(|e| PipelineError::Other(e.to_string()))?;

        if let Some(ticker) = &ticker {
            ctx.queue
                .enqueue(
                    EnqueueRequest::new(
                        "FETCH_MARKET_CAP_FOR_TICKER",
                        format!("MCAP|{ticker}"),
                        json!({ "ticker": ticker }),
                    )
                    .priority(60),
                )
                .await
                .map_err(|e| PipelineError::Other(e.to_string()))?;

            ctx.queue
                .enqueue(
                    EnqueueRequest::new(
                        "FETCH_NEWS_FOR_TICKER",
                        format!("NEWS|{ticker}"),
                        json!({ "ticker": ticker }),
                    )
                    .priority(60),
                )
                .await
                .map_err(|e| PipelineError::Other(e.to_string()))?;

            ctx.queue
                .enqueue(
                    EnqueueRequest::new(
                        "COMPUTE_CLUSTERS_FOR_TICKER",
                        format!("CLUSTERS|{ticker}|{}", ctx.cfg.current_cluster_version),
                        json!({ "ticker": ticker }),
                    )
                    .priority(75),
                )
                .await
                .map_err(|e| PipelineError::Other(e.to_string()))?;
        }
    }

    for event_key in &event_keys {
        enqueue_event_chain(ctx, event_key, ai_requested).await?;
    }

    Ok(())
}

async fn enqueue_event_chain(ctx: &WorkerContext, event_key: &EventKey, ai_requested: bool) -> PipelineResult<()> {
    let EventKey { issuer_cik, owner_key, accession_number } = event_key;

    ctx.queue
        .enqueue(
            EnqueueRequest::new(
                "COMPUTE_TREND_FOR_EVENT",
                format!("TREND|{issuer_cik}|{owner_key}|{accession_number}|{}", ctx.cfg.current_trend_version),
                json!({ "issuer_cik": issuer_cik, "owner_key": owner_key, "accession_number": accession_number }),
            )
            .priority(80),
        )
        .await
        .map_err(|e| PipelineError::Other(e.to_string()))?;

    ctx.queue
        .enqueue(
            EnqueueRequest::new(
                "COMPUTE_OUTCOMES_FOR_EVENT",
                format!("OUT|{issuer_cik}|{owner_key}|{accession_number}|{}", ctx.cfg.current_outcomes_version),
                json!({ "issuer_cik": issuer_cik, "owner_key": owner_key, "accession_number": accession_number }),
            )
            .priority(80),
        )
        .await
        .map_err(|e| PipelineError::Other(e.to_string()))?;

    if ai_requested {
        ctx.queue
            .enqueue(
                EnqueueRequest::new(
                    "RUN_AI_FOR_EVENT",
                    format!("AI|{issuer_cik}|{owner_key}|{accession_number}|{}", ctx.cfg.prompt_version),
                    json!({ "issuer_cik": issuer_cik, "owner_key": owner_key, "accession_number": accession_number }),
                )
                .priority(40),
            )
            .await
            .map_err(|e| PipelineError::Other(e.to_string()))?;
    }

    Ok(())
}
