//! `PARSE_ACCESSION_DOCS`: parses a fetched filing's XML into raw per-owner,
//! per-transaction rows, upserts issuer/owner identity, and enqueues aggregation.

use crate::runtime::WorkerContext;
use form4_parser::{parse_form4_xml, ParsedForm4, ReportingOwner, TransactionRow};
use insider_core::time::utcnow_iso;
use insider_core::{PipelineError, PipelineResult};
use job_queue::EnqueueRequest;
use owner_identity::build_owner_identity;
use serde_json::{json, Value};
use sqlx::PgPool;

fn str_field<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(|v| v.as_str())
}

fn bool_field(payload: &Value, key: &str, default: bool) -> bool {
    payload.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

/// Parse a candidate price string tolerant of thousands separators and a leading
/// currency symbol; returns `None` (never an error) on anything unparseable, since
/// an unparseable price is the aggregator's problem to record as a missing-reason,
/// not the parse stage's.
fn parse_price(raw: Option<&str>) -> Option<f64> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    let cleaned: String = raw.chars().filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-').collect();
    cleaned.parse::<f64>().ok()
}

pub async fn handle(ctx: &WorkerContext, payload: &Value) -> PipelineResult<()> {
    let accession_number = str_field(payload, "accession_number")
        .ok_or_else(|| PipelineError::InvalidData("PARSE_ACCESSION_DOCS payload missing accession_number".into()))?;
    let parse_version = str_field(payload, "parse_version").unwrap_or(&ctx.cfg.current_parse_version).to_string();
    let ai_requested = bool_field(payload, "ai_requested", false);

    run_parse(&ctx.pool, accession_number, &parse_version).await?;

    let dedupe_key = format!("AGG|{accession_number}|{parse_version}");
    ctx.queue
        .enqueue(
            EnqueueRequest::new(
                "AGGREGATE_ACCESSION",
                dedupe_key,
                json!({
                    "accession_number": accession_number,
                    "parse_version": parse_version,
                    "ai_requested": ai_requested,
                }),
            )
            .priority(85),
        )
        .await
        .map_err(|e| PipelineError::Other(e.to_string()))?;

    Ok(())
}

/// Shared by `PARSE_ACCESSION_DOCS` and `REPARSE_TICKER`: loads the already-fetched
/// document for `accession_number`, parses it, and replaces its raw rows.
pub async fn run_parse(pool: &PgPool, accession_number: &str, parse_version: &str) -> PipelineResult<()> {
    let doc: Option<(String, Option<String>)> =
        sqlx::query_as("SELECT xml_text, issuer_cik FROM filing_documents WHERE accession_number = $1")
            .bind(accession_number)
            .fetch_optional(pool)
            .await?;

    let Some((xml_text, doc_issuer_cik)) = doc else {
        return Err(PipelineError::InvalidData(format!(
            "no filing_documents row for accession {accession_number}; fetch must run first"
        )));
    };

    let parsed: ParsedForm4 =
        parse_form4_xml(&xml_text).map_err(|e| PipelineError::InvalidData(format!("form4 parse failed: {e}")))?;

    let issuer_cik = owner_identity::normalize_cik(parsed.issuer_cik.as_deref().or(doc_issuer_cik.as_deref()))
        .or(doc_issuer_cik)
        .ok_or_else(|| PipelineError::InvalidData(format!("accession {accession_number} has no resolvable issuer CIK")))?;

    let now = utcnow_iso();

    // issuer_master: ticker only overwritten when the new filing carries a non-empty one.
    sqlx::query(
        r#"
        INSERT INTO issuer_master (issuer_cik, current_ticker, ticker_updated_at, issuer_name, last_filing_date)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (issuer_cik) DO UPDATE SET
            current_ticker = COALESCE(NULLIF(EXCLUDED.current_ticker, ''), issuer_master.current_ticker),
            ticker_updated_at = CASE WHEN NULLIF(EXCLUDED.current_ticker, '') IS NOT NULL THEN EXCLUDED.ticker_updated_at ELSE issuer_master.ticker_updated_at END,
            issuer_name = COALESCE(NULLIF(EXCLUDED.issuer_name, ''), issuer_master.issuer_name),
            last_filing_date = NULLIF(GREATEST(COALESCE(issuer_master.last_filing_date, ''), COALESCE(EXCLUDED.last_filing_date, '')), '')
        "#,
    )
    .bind(&issuer_cik)
    .bind(parsed.issuer_trading_symbol.as_deref().unwrap_or(""))
    .bind(&now)
    .bind(parsed.issuer_name.as_deref().unwrap_or(""))
    .bind(earliest_filing_date(&parsed).unwrap_or_default())
    .execute(pool)
    .await?;

    sqlx::query(
        "UPDATE filings SET issuer_cik = $1, ticker_reported = $2, parse_version = $3 WHERE accession_number = $4",
    )
    .bind(&issuer_cik)
    .bind(&parsed.issuer_trading_symbol)
    .bind(parse_version)
    .bind(accession_number)
    .execute(pool)
    .await?;

    sqlx::query("DELETE FROM form4_rows_raw WHERE accession_number = $1 AND issuer_cik = $2")
        .bind(accession_number)
        .bind(&issuer_cik)
        .execute(pool)
        .await?;

    // Per the data model, a raw row exists per transaction-row-per-reporting-owner:
    // joint filings replicate every row across each signer.
    let owners: Vec<&ReportingOwner> = if parsed.reporting_owners.is_empty() {
        vec![]
    } else {
        parsed.reporting_owners.iter().collect()
    };

    if owners.is_empty() {
        insert_rows_for_owner(pool, accession_number, &issuer_cik, None, &parsed.transactions).await?;
    } else {
        for owner in owners {
            insert_rows_for_owner(pool, accession_number, &issuer_cik, Some(owner), &parsed.transactions).await?;
        }
    }

    Ok(())
}

fn earliest_filing_date(parsed: &ParsedForm4) -> Option<String> {
    parsed.transactions.iter().filter_map(|t| t.transaction_date.clone()).min()
}

async fn insert_rows_for_owner(
    pool: &PgPool,
    accession_number: &str,
    issuer_cik: &str,
    owner: Option<&ReportingOwner>,
    transactions: &[TransactionRow],
) -> PipelineResult<()> {
    let owner_cik = owner.and_then(|o| o.owner_cik.as_deref());
    let owner_name_raw = owner.and_then(|o| o.owner_name.as_deref());
    let identity = build_owner_identity(owner_cik, owner_name_raw);

    let relationship = json!({
        "officer_title": owner.and_then(|o| o.officer_title.clone()),
        "is_officer": owner.and_then(|o| o.is_officer),
        "is_director": owner.and_then(|o| o.is_director),
        "is_ten_percent_owner": owner.and_then(|o| o.is_ten_percent_owner),
    });

    for tx in transactions {
        let price = parse_price(tx.price_raw.as_deref());
        let shares_abs = tx.shares.map(f64::abs);

        let raw_payload = json!({
            "transaction": tx.raw_payload,
            "reporting_owner": relationship,
            "footnotes": tx.footnotes,
            "is_entity_name_guess": identity.is_entity_name_guess,
        });
        let raw_payload_json = serde_json::to_string(&raw_payload).unwrap_or_default();
        let parser_warnings_json = serde_json::to_string(&tx.parser_warnings).unwrap_or_default();

        sqlx::query(
            r#"
            INSERT INTO form4_rows_raw (
                accession_number, issuer_cik, owner_key, owner_cik, owner_name_raw, owner_name_normalized,
                owner_name_hash, is_derivative, transaction_code, transaction_date,
                shares_raw, shares_abs, price_raw, price, shares_owned_following,
                parser_warnings_json, raw_payload_json
            ) VALUES ($1,$2,$3,$4,$5,$6, $7,$8,$9,$10, $11,$12,$13,$14,$15, $16,$17)
            "#,
        )
        .bind(accession_number)
        .bind(issuer_cik)
        .bind(&identity.owner_key)
        .bind(&identity.owner_cik)
        .bind(owner_name_raw)
        .bind(&identity.owner_name_normalized)
        .bind(&identity.owner_name_hash)
        .bind(tx.is_derivative as i32)
        .bind(&tx.transaction_code)
        .bind(&tx.transaction_date)
        .bind(tx.shares)
        .bind(shares_abs)
        .bind(&tx.price_raw)
        .bind(price)
        .bind(tx.shares_owned_following)
        .bind(&parser_warnings_json)
        .bind(&raw_payload_json)
        .execute(pool)
        .await?;
    }

    Ok(())
}
