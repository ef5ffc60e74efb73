//! Quant-engine and AI job handlers. Each wraps the corresponding pure/orchestration
//! function in `quant-engines` or `ai-adapter`, translating their results into the
//! worker's success/deferred/error vocabulary and enqueuing whatever the choreography
//! table says follows a successful run.

use crate::dispatch::JobOutcome;
use crate::runtime::WorkerContext;
use ai_adapter::{run_ai_for_event, AiAdapterError, AiRunOutcome};
use insider_core::{EventKey, OwnerIssuerKey, PipelineError, PipelineResult};
use job_queue::EnqueueRequest;
use quant_engines::{compute_clusters_for_ticker, compute_outcomes_for_event, compute_stats_for_owner_issuer, compute_trend_for_event};
use serde_json::{json, Value};

fn str_field<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(|v| v.as_str())
}

fn event_key_from_payload(payload: &Value, job_type: &str) -> PipelineResult<EventKey> {
    let issuer_cik = str_field(payload, "issuer_cik")
        .ok_or_else(|| PipelineError::InvalidData(format!("{job_type} payload missing issuer_cik")))?;
    let owner_key = str_field(payload, "owner_key")
        .ok_or_else(|| PipelineError::InvalidData(format!("{job_type} payload missing owner_key")))?;
    let accession_number = str_field(payload, "accession_number")
        .ok_or_else(|| PipelineError::InvalidData(format!("{job_type} payload missing accession_number")))?;
    Ok(EventKey::new(issuer_cik, owner_key, accession_number))
}

pub async fn handle_trend(ctx: &WorkerContext, payload: &Value) -> PipelineResult<()> {
    let event_key = event_key_from_payload(payload, "COMPUTE_TREND_FOR_EVENT")?;
    compute_trend_for_event(&ctx.pool, &event_key).await
}

pub async fn handle_outcomes(ctx: &WorkerContext, payload: &Value) -> PipelineResult<()> {
    let event_key = event_key_from_payload(payload, "COMPUTE_OUTCOMES_FOR_EVENT")?;
    let benchmark_symbol = insider_core::app_config::resolve_benchmark_symbol(&ctx.pool, &ctx.cfg.benchmark_symbol).await?;
    compute_outcomes_for_event(&ctx.pool, &ctx.queue, &benchmark_symbol, &ctx.cfg.current_outcomes_version, &event_key)
        .await?;

    let stats_key = OwnerIssuerKey { issuer_cik: event_key.issuer_cik.clone(), owner_key: event_key.owner_key.clone() };
    ctx.queue
        .enqueue(
            EnqueueRequest::new(
                "COMPUTE_STATS_FOR_OWNER_ISSUER",
                format!("STATS|{}|{}|{}", stats_key.issuer_cik, stats_key.owner_key, ctx.cfg.current_stats_version),
                json!({ "issuer_cik": stats_key.issuer_cik, "owner_key": stats_key.owner_key }),
            )
            .priority(75),
        )
        .await
        .map_err(|e| PipelineError::Other(e.to_string()))?;

    Ok(())
}

pub async fn handle_stats(ctx: &WorkerContext, payload: &Value) -> PipelineResult<()> {
    let issuer_cik = str_field(payload, "issuer_cik")
        .ok_or_else(|| PipelineError::InvalidData("COMPUTE_STATS_FOR_OWNER_ISSUER payload missing issuer_cik".into()))?;
    let owner_key = str_field(payload, "owner_key")
        .ok_or_else(|| PipelineError::InvalidData("COMPUTE_STATS_FOR_OWNER_ISSUER payload missing owner_key".into()))?;
    let key = OwnerIssuerKey { issuer_cik: issuer_cik.to_string(), owner_key: owner_key.to_string() };
    compute_stats_for_owner_issuer(&ctx.pool, &ctx.cfg.current_stats_version, &key).await
}

pub async fn handle_clusters(ctx: &WorkerContext, payload: &Value) -> PipelineResult<()> {
    let ticker = str_field(payload, "ticker")
        .ok_or_else(|| PipelineError::InvalidData("COMPUTE_CLUSTERS_FOR_TICKER payload missing ticker".into()))?;
    compute_clusters_for_ticker(&ctx.pool, &ctx.cfg.current_cluster_version, ticker).await
}

/// Unlike the other handlers, the AI adapter distinguishes "deferred" from "skipped"
/// from "generated" itself, so this one builds the `JobOutcome` directly rather than
/// going through `JobOutcome::from_pipeline_result`.
pub async fn handle_ai(ctx: &WorkerContext, payload: &Value) -> JobOutcome {
    let event_key = match event_key_from_payload(payload, "RUN_AI_FOR_EVENT") {
        Ok(k) => k,
        Err(e) => return JobOutcome::Error { message: e.to_string(), retry_after_seconds: None },
    };
    let force = payload.get("force").and_then(|v| v.as_bool()).unwrap_or(false);

    match run_ai_for_event(&ctx.pool, &ctx.queue, &ctx.cfg, &ctx.gemini, &event_key, force).await {
        Ok(AiRunOutcome::Generated) => JobOutcome::Success,
        Ok(AiRunOutcome::SkippedExisting) => JobOutcome::Success,
        Ok(AiRunOutcome::Deferred(missing)) => {
            JobOutcome::Deferred { reason: format!("waiting on: {}", missing.join(",")), retry_after_seconds: Some(20) }
        }
        // A second repair failure (parse or validation) is terminal for this attempt;
        // let the queue's own max_attempts backoff decide whether to give up entirely.
        Err(e @ (AiAdapterError::Parse(_) | AiAdapterError::Validation(_))) => {
            JobOutcome::Error { message: e.to_string(), retry_after_seconds: Some(120) }
        }
        Err(e) => JobOutcome::Error { message: e.to_string(), retry_after_seconds: None },
    }
}
