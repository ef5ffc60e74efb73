//! Historical backfill: `BACKFILL_DISCOVER_ISSUER` lists every Form 4 accession for
//! an issuer since a start year and seeds `backfill_queue`; `BACKFILL_ENQUEUE_BATCH`
//! pages through that table, enqueueing bounded batches of `FETCH_ACCESSION_DOCS`
//! jobs so a single issuer's history doesn't flood the queue (or the SEC gateway) at
//! once.

use crate::runtime::WorkerContext;
use insider_core::time::utcnow_iso;
use insider_core::{PipelineError, PipelineResult};
use job_queue::EnqueueRequest;
use serde_json::{json, Value};
use std::collections::BTreeSet;

fn str_field<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(|v| v.as_str())
}

fn int_field(payload: &Value, key: &str, default: i32) -> i32 {
    payload.get(key).and_then(|v| v.as_i64()).map(|v| v as i32).unwrap_or(default)
}

pub async fn handle_discover(ctx: &WorkerContext, payload: &Value) -> PipelineResult<()> {
    let issuer_cik = str_field(payload, "issuer_cik")
        .ok_or_else(|| PipelineError::InvalidData("BACKFILL_DISCOVER_ISSUER payload missing issuer_cik".into()))?;
    let start_year = int_field(payload, "start_year", ctx.cfg.backfill_start_year);

    let filings = ctx
        .sec
        .list_form4_accessions_since(issuer_cik, start_year)
        .await
        .map_err(|e| PipelineError::Request(e.to_string()))?;

    let now = utcnow_iso();
    let mut years = BTreeSet::new();

    for filing in &filings {
        let year = filing.filing_date.as_deref().and_then(|d| d.get(0..4)).unwrap_or("0000").to_string();
        years.insert(year);

        sqlx::query(
            r#"
            INSERT INTO backfill_queue (issuer_cik, accession_number, filing_date, form_type, status, created_at, updated_at)
            VALUES ($1,$2,$3,$4,'pending',$5,$5)
            ON CONFLICT (issuer_cik, accession_number) DO NOTHING
            "#,
        )
        .bind(issuer_cik)
        .bind(&filing.accession_number)
        .bind(&filing.filing_date)
        .bind(&filing.form_type)
        .bind(&now)
        .execute(&ctx.pool)
        .await?;
    }

    for year in years {
        ctx.queue
            .enqueue(
                EnqueueRequest::new(
                    "BACKFILL_ENQUEUE_BATCH",
                    format!("BACKFILL_BATCH|{issuer_cik}|{year}|{}|0", ctx.cfg.current_parse_version),
                    json!({ "issuer_cik": issuer_cik, "year": year, "page": 0 }),
                )
                .priority(20),
            )
            .await
            .map_err(|e| PipelineError::Other(e.to_string()))?;
    }

    Ok(())
}

pub async fn handle_enqueue_batch(ctx: &WorkerContext, payload: &Value) -> PipelineResult<()> {
    let issuer_cik = str_field(payload, "issuer_cik")
        .ok_or_else(|| PipelineError::InvalidData("BACKFILL_ENQUEUE_BATCH payload missing issuer_cik".into()))?;
    let year = str_field(payload, "year")
        .ok_or_else(|| PipelineError::InvalidData("BACKFILL_ENQUEUE_BATCH payload missing year".into()))?;
    let page = int_field(payload, "page", 0);
    let like_pattern = format!("{year}-%");

    let batch: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT accession_number FROM backfill_queue
        WHERE issuer_cik = $1 AND status = 'pending' AND filing_date LIKE $2
        ORDER BY filing_date ASC
        LIMIT $3
        "#,
    )
    .bind(issuer_cik)
    .bind(&like_pattern)
    .bind(ctx.cfg.backfill_batch_size)
    .fetch_all(&ctx.pool)
    .await?;

    let now = utcnow_iso();
    let batch_len = batch.len() as i64;

    for accession_number in &batch {
        ctx.queue
            .enqueue(
                EnqueueRequest::new(
                    "FETCH_ACCESSION_DOCS",
                    format!("FETCH|{accession_number}"),
                    json!({ "accession_number": accession_number, "issuer_cik": issuer_cik, "ai_requested": false }),
                )
                .priority(10),
            )
            .await
            .map_err(|e| PipelineError::Other(e.to_string()))?;

        sqlx::query("UPDATE backfill_queue SET status = 'queued', updated_at = $1 WHERE issuer_cik = $2 AND accession_number = $3")
            .bind(&now)
            .bind(issuer_cik)
            .bind(accession_number)
            .execute(&ctx.pool)
            .await?;
    }

    // A full batch means more pending rows may remain for this year: page through
    // with a fresh dedupe key (this job hasn't reached a terminal state yet, so
    // reusing the same key would just be skipped as already-active) and a short
    // pacing delay.
    if batch_len == ctx.cfg.backfill_batch_size {
        let next_page = page + 1;
        ctx.queue
            .enqueue(
                EnqueueRequest::new(
                    "BACKFILL_ENQUEUE_BATCH",
                    format!("BACKFILL_BATCH|{issuer_cik}|{year}|{}|{next_page}", ctx.cfg.current_parse_version),
                    json!({ "issuer_cik": issuer_cik, "year": year, "page": next_page }),
                )
                .priority(20)
                .run_after(insider_core::time::iso_after_seconds(5)),
            )
            .await
            .map_err(|e| PipelineError::Other(e.to_string()))?;
    }

    Ok(())
}
