//! `REPARSE_TICKER`: re-runs the parse stage for every accession already fetched for
//! a ticker's issuer(s), under a new `parse_version`. Always propagates
//! `ai_requested=false` downstream — reparses are bookkeeping, not discovery.

use crate::handlers::parse::run_parse;
use crate::runtime::WorkerContext;
use insider_core::{PipelineError, PipelineResult};
use job_queue::EnqueueRequest;
use serde_json::{json, Value};

pub async fn handle(ctx: &WorkerContext, payload: &Value) -> PipelineResult<()> {
    let ticker = payload
        .get("ticker")
        .and_then(|v| v.as_str())
        .ok_or_else(|| PipelineError::InvalidData("REPARSE_TICKER payload missing ticker".into()))?;
    let parse_version =
        payload.get("parse_version").and_then(|v| v.as_str()).unwrap_or(&ctx.cfg.current_parse_version).to_string();

    let issuer_ciks: Vec<String> =
        sqlx::query_scalar("SELECT issuer_cik FROM issuer_master WHERE current_ticker = $1")
            .bind(ticker)
            .fetch_all(&ctx.pool)
            .await?;

    for issuer_cik in issuer_ciks {
        let accessions: Vec<String> = sqlx::query_scalar("SELECT accession_number FROM filings WHERE issuer_cik = $1")
            .bind(&issuer_cik)
            .fetch_all(&ctx.pool)
            .await?;

        for accession_number in accessions {
            run_parse(&ctx.pool, &accession_number, &parse_version).await?;

            ctx.queue
                .enqueue(
                    EnqueueRequest::new(
                        "AGGREGATE_ACCESSION",
                        format!("AGG|{accession_number}|{parse_version}"),
                        json!({
                            "accession_number": accession_number,
                            "parse_version": parse_version,
                            "ai_requested": false,
                        }),
                    )
                    .priority(50),
                )
                .await
                .map_err(|e| PipelineError::Other(e.to_string()))?;
        }
    }

    Ok(())
}
