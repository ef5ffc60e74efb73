//! `FETCH_ACCESSION_DOCS`: resolves and downloads one accession's Form 4 ownership
//! document, persists it, and enqueues the parse stage.

use crate::runtime::WorkerContext;
use insider_core::time::utcnow_iso;
use insider_core::{PipelineError, PipelineResult};
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
        .ok_or_else(|| PipelineError::InvalidData("FETCH_ACCESSION_DOCS payload missing accession_number".into()))?;
    let issuer_cik_hint = str_field(payload, "issuer_cik");
    let ai_requested = bool_field(payload, "ai_requested", false);

    let metadata = ctx
        .sec
        .fetch_filing_metadata(accession_number, issuer_cik_hint)
        .await
        .map_err(|e| PipelineError::Request(e.to_string()))?;

    let (xml_text, source_url) = ctx
        .sec
        .fetch_form4_xml(accession_number, issuer_cik_hint.or(Some(metadata.issuer_cik.as_str())))
        .await
        .map_err(|e| PipelineError::Request(e.to_string()))?;

    let now = utcnow_iso();

    sqlx::query(
        r#"
        INSERT INTO filing_documents (accession_number, issuer_cik, filing_date, form_type, source_url, xml_text, fetched_at)
        VALUES ($1,$2,$3,$4,$5,$6,$7)
        ON CONFLICT (accession_number) DO UPDATE SET
            issuer_cik = EXCLUDED.issuer_cik,
            filing_date = EXCLUDED.filing_date,
            form_type = EXCLUDED.form_type,
            source_url = EXCLUDED.source_url,
            xml_text = EXCLUDED.xml_text,
            fetched_at = EXCLUDED.fetched_at
        "#,
    )
    .bind(accession_number)
    .bind(&metadata.issuer_cik)
    .bind(&metadata.filing_date)
    .bind(&metadata.form_type)
    .bind(&source_url)
    .bind(&xml_text)
    .bind(&now)
    .execute(&ctx.pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO filings (accession_number, issuer_cik, ticker_reported, form_type, filing_date, source_url, parse_version, ingested_at)
        VALUES ($1,$2,NULL,$3,$4,$5,$6,$7)
        ON CONFLICT (accession_number) DO UPDATE SET
            issuer_cik = EXCLUDED.issuer_cik,
            form_type = COALESCE(EXCLUDED.form_type, filings.form_type),
            filing_date = COALESCE(EXCLUDED.filing_date, filings.filing_date),
            source_url = EXCLUDED.source_url
        "#,
    )
    .bind(accession_number)
    .bind(&metadata.issuer_cik)
    .bind(metadata.form_type.as_deref().unwrap_or("4"))
    .bind(metadata.filing_date.as_deref().unwrap_or(""))
    .bind(&source_url)
    .bind(&ctx.cfg.current_parse_version)
    .bind(&now)
    .execute(&ctx.pool)
    .await?;

    let dedupe_key = format!("PARSE|{accession_number}|{}", ctx.cfg.current_parse_version);
    ctx.queue
        .enqueue(
            EnqueueRequest::new(
                "PARSE_ACCESSION_DOCS",
                dedupe_key,
                json!({
                    "accession_number": accession_number,
                    "parse_version": ctx.cfg.current_parse_version,
                    "ai_requested": ai_requested,
                }),
            )
            .priority(90),
        )
        .await
        .map_err(|e| PipelineError::Other(e.to_string()))?;

    Ok(())
}
