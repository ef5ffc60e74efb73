pub mod baseline;
pub mod client;
pub mod error;
pub mod input;
pub mod prompt;

pub use client::GeminiClient;
pub use error::{AiAdapterError, AiAdapterResult};

use ai_validation::{extract_json_from_text, validate_ai_output};
use insider_core::error::PipelineResult;
use insider_core::time::utcnow_iso;
use insider_core::types::EventKey;
use insider_core::{hashing::sha256_hex, Config};
use job_queue::{EnqueueRequest, JobQueue};
use serde_json::Value;
use sqlx::PgPool;

/// What happened when `run_ai_for_event` was asked to produce a verdict.
#[derive(Debug)]
pub enum AiRunOutcome {
    /// A fresh model call succeeded and was persisted.
    Generated,
    /// The same input (by dedupe hash + prompt version) already has an output.
    SkippedExisting,
    /// One or more prerequisite producers hadn't run yet; they were enqueued and
    /// this job should be retried later without consuming an attempt.
    Deferred(Vec<&'static str>),
}

#[derive(sqlx::FromRow)]
struct GateRow {
    ticker: Option<String>,
    trend_computed_at: Option<String>,
    stats_computed_at: Option<String>,
    cluster_computed_at: Option<String>,
}

async fn check_prerequisites(
    pool: &PgPool,
    job_queue: &JobQueue,
    cfg: &Config,
    event_key: &EventKey,
) -> PipelineResult<Vec<&'static str>> {
    let row: Option<GateRow> = sqlx::query_as(
        "SELECT ticker, trend_computed_at, stats_computed_at, cluster_computed_at
         FROM insider_events WHERE issuer_cik = $1 AND owner_key = $2 AND accession_number = $3",
    )
    .bind(&event_key.issuer_cik)
    .bind(&event_key.owner_key)
    .bind(&event_key.accession_number)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(vec!["event_missing"]);
    };

    let mut missing = Vec::new();

    if row.trend_computed_at.is_none() {
        missing.push("trend");
        let dedupe_key = format!(
            "TREND|{}|{}|{}|{}",
            event_key.issuer_cik, event_key.owner_key, event_key.accession_number, cfg.current_trend_version
        );
        let payload = serde_json::json!({
            "issuer_cik": event_key.issuer_cik,
            "owner_key": event_key.owner_key,
            "accession_number": event_key.accession_number,
        });
        job_queue
            .enqueue(EnqueueRequest::new("COMPUTE_TREND_FOR_EVENT", dedupe_key, payload).priority(80))
            .await?;
    }

    if row.stats_computed_at.is_none() {
        missing.push("stats");
        let dedupe_key = format!(
            "STATS|{}|{}|{}",
            event_key.issuer_cik, event_key.owner_key, cfg.current_stats_version
        );
        let payload = serde_json::json!({"issuer_cik": event_key.issuer_cik, "owner_key": event_key.owner_key});
        job_queue
            .enqueue(EnqueueRequest::new("COMPUTE_STATS_FOR_OWNER_ISSUER", dedupe_key, payload).priority(80))
            .await?;
    }

    if let Some(ticker) = &row.ticker {
        if row.cluster_computed_at.is_none() {
            missing.push("clusters");
            let dedupe_key = format!("CLUSTERS|{ticker}|{}", cfg.current_cluster_version);
            let payload = serde_json::json!({"ticker": ticker});
            job_queue
                .enqueue(EnqueueRequest::new("COMPUTE_CLUSTERS_FOR_TICKER", dedupe_key, payload).priority(80))
                .await?;
        }
    }

    Ok(missing)
}

async fn existing_output(
    pool: &PgPool,
    event_key: &EventKey,
    inputs_hash: &str,
    prompt_version: &str,
) -> Result<bool, sqlx::Error> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT ai_output_id FROM ai_outputs
         WHERE issuer_cik = $1 AND owner_key = $2 AND accession_number = $3
           AND inputs_hash = $4 AND prompt_version = $5
         LIMIT 1",
    )
    .bind(&event_key.issuer_cik)
    .bind(&event_key.owner_key)
    .bind(&event_key.accession_number)
    .bind(inputs_hash)
    .bind(prompt_version)
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}

async fn call_model_with_one_repair(
    client: &GeminiClient,
    cfg: &Config,
    ai_input: &Value,
) -> AiAdapterResult<Value> {
    let prompt_text = prompt::build_ai_prompt(ai_input);
    let raw = client.generate(&prompt_text, cfg.ai_temperature).await?;

    let parsed = match extract_json_from_text(&raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "ai output failed to parse, attempting one repair call");
            let repair_prompt = prompt::build_repair_prompt(ai_input, &raw, &e.0);
            let repaired_raw = client.generate(&repair_prompt, cfg.ai_temperature).await?;
            extract_json_from_text(&repaired_raw).map_err(|e| AiAdapterError::Parse(e.0))?
        }
    };

    match validate_ai_output(&parsed, ai_input) {
        Ok(()) => Ok(parsed),
        Err(e) => {
            tracing::warn!(error = %e, "ai output failed validation, attempting one repair call");
            let repair_prompt =
                prompt::build_repair_prompt(ai_input, &serde_json::to_string(&parsed).unwrap_or_default(), &e.0);
            let repaired_raw = client.generate(&repair_prompt, cfg.ai_temperature).await?;
            let repaired = extract_json_from_text(&repaired_raw).map_err(|e| AiAdapterError::Parse(e.0))?;
            validate_ai_output(&repaired, ai_input)?;
            Ok(repaired)
        }
    }
}

async fn persist_output(
    pool: &PgPool,
    cfg: &Config,
    event_key: &EventKey,
    ai_input: &Value,
    ai_output: &Value,
    inputs_hash: &str,
) -> Result<(), sqlx::Error> {
    let model_id = ai_output.get("model_id").and_then(|v| v.as_str()).unwrap_or(&cfg.gemini_model).to_string();
    let buy_rating = ai_output.pointer("/verdict/buy_signal/rating").and_then(|v| v.as_f64());
    let sell_rating = ai_output.pointer("/verdict/sell_signal/rating").and_then(|v| v.as_f64());
    let buy_confidence = ai_output.pointer("/verdict/buy_signal/confidence").and_then(|v| v.as_f64());
    let sell_confidence = ai_output.pointer("/verdict/sell_signal/confidence").and_then(|v| v.as_f64());
    // An absent side (not_applicable) has no confidence entry, not a zero one.
    let confidence = match (buy_confidence, sell_confidence) {
        (Some(b), Some(s)) => Some(b.max(s)),
        (Some(b), None) => Some(b),
        (None, Some(s)) => Some(s),
        (None, None) => None,
    };

    let now = utcnow_iso();
    let input_json = serde_json::to_string(ai_input).unwrap_or_default();
    let output_json = serde_json::to_string(ai_output).unwrap_or_default();

    sqlx::query(
        r#"
        INSERT INTO ai_outputs (
            issuer_cik, owner_key, accession_number,
            model_id, prompt_version, input_schema_version, output_schema_version, inputs_hash,
            buy_rating, sell_rating, confidence,
            input_json, output_json, generated_at
        ) VALUES ($1,$2,$3, $4,$5,$6,$7,$8, $9,$10,$11, $12,$13,$14)
        "#,
    )
    .bind(&event_key.issuer_cik)
    .bind(&event_key.owner_key)
    .bind(&event_key.accession_number)
    .bind(&model_id)
    .bind(&cfg.prompt_version)
    .bind(&cfg.ai_input_schema_version)
    .bind(&cfg.ai_output_schema_version)
    .bind(inputs_hash)
    .bind(buy_rating)
    .bind(sell_rating)
    .bind(confidence)
    .bind(&input_json)
    .bind(&output_json)
    .bind(&now)
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        UPDATE insider_events SET
            ai_buy_rating = $1, ai_sell_rating = $2, ai_confidence = $3,
            ai_model_id = $4, ai_prompt_version = $5, ai_generated_at = $6,
            ai_computed_at = $6
        WHERE issuer_cik = $7 AND owner_key = $8 AND accession_number = $9
        "#,
    )
    .bind(buy_rating)
    .bind(sell_rating)
    .bind(confidence)
    .bind(&model_id)
    .bind(&cfg.prompt_version)
    .bind(&now)
    .bind(&event_key.issuer_cik)
    .bind(&event_key.owner_key)
    .bind(&event_key.accession_number)
    .execute(pool)
    .await?;

    Ok(())
}

/// Runs the AI judgment step for one event: gates on trend/stats/cluster having
/// already run, skips work when an identical input already produced an output
/// (unless `force`), and otherwise calls the model with one repair attempt on
/// either a parse or a validation failure.
pub async fn run_ai_for_event(
    pool: &PgPool,
    job_queue: &JobQueue,
    cfg: &Config,
    client: &GeminiClient,
    event_key: &EventKey,
    force: bool,
) -> AiAdapterResult<AiRunOutcome> {
    let missing = check_prerequisites(pool, job_queue, cfg, event_key).await?;
    if !missing.is_empty() {
        return Ok(AiRunOutcome::Deferred(missing));
    }

    let ai_input = input::assemble_ai_input(pool, cfg, event_key).await?;
    let inputs_hash = sha256_hex(&input::canonicalize_for_hash(&ai_input));

    if !force && existing_output(pool, event_key, &inputs_hash, &cfg.prompt_version).await? {
        return Ok(AiRunOutcome::SkippedExisting);
    }

    let ai_output = call_model_with_one_repair(client, cfg, &ai_input).await?;
    persist_output(pool, cfg, event_key, &ai_input, &ai_output, &inputs_hash).await?;

    Ok(AiRunOutcome::Generated)
}
