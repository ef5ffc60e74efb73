//! Incremental daily price refresh for issuers and the benchmark symbol.

use crate::eodhd::EodhdClient;
use chrono::{Duration, NaiveDate, Utc};
use insider_core::time::utcnow_iso;
use insider_core::{PipelineError, PipelineResult};
use sqlx::PgPool;

/// How far back of the last-known price date to refetch, to pick up vendor revisions
/// (splits, late adjustments) to recently published closes.
const REFRESH_OVERLAP_DAYS: i64 = 30;
const BACKFILL_START_DATE: &str = "2000-01-01";

fn today_iso() -> String {
    Utc::now().date_naive().to_string()
}

fn window_start(last_known: Option<&str>) -> String {
    match last_known.and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()) {
        Some(date) => (date - Duration::days(REFRESH_OVERLAP_DAYS)).to_string(),
        None => BACKFILL_START_DATE.to_string(),
    }
}

/// Fetch and upsert the incremental price window for one issuer's current ticker.
/// Refetches the trailing 30 days of any prior history (to absorb vendor revisions)
/// or the full history from 2000-01-01 if the issuer has none on file yet.
pub async fn fetch_and_store_prices_for_issuer(
    pool: &PgPool,
    client: &EodhdClient,
    issuer_cik: &str,
) -> PipelineResult<()> {
    let ticker: Option<(Option<String>,)> =
        sqlx::query_as("SELECT current_ticker FROM issuer_master WHERE issuer_cik = $1")
            .bind(issuer_cik)
            .fetch_optional(pool)
            .await?;
    let Some(ticker) = ticker.and_then(|(t,)| t) else {
        return Err(PipelineError::InvalidData(format!("issuer {issuer_cik} has no current_ticker")));
    };

    let symbol = client.resolve_symbol(&ticker).await.map_err(|e| PipelineError::Request(e.to_string()))?;

    let last_known: Option<(String,)> =
        sqlx::query_as("SELECT MAX(date) FROM issuer_prices_daily WHERE issuer_cik = $1")
            .bind(issuer_cik)
            .fetch_optional(pool)
            .await?;
    let from_date = window_start(last_known.as_ref().map(|(d,)| d.as_str()));
    let to_date = today_iso();

    let rows = client
        .fetch_eod_prices(&symbol, &from_date, &to_date)
        .await
        .map_err(|e| PipelineError::Request(e.to_string()))?;

    let now = utcnow_iso();
    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO issuer_prices_daily (issuer_cik, date, adj_close, source_ticker, updated_at)
            VALUES ($1,$2,$3,$4,$5)
            ON CONFLICT (issuer_cik, date) DO UPDATE SET
                adj_close = EXCLUDED.adj_close,
                source_ticker = EXCLUDED.source_ticker,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(issuer_cik)
        .bind(&row.date)
        .bind(row.adj_close)
        .bind(&symbol)
        .bind(&now)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Fetch and upsert the incremental price window for the benchmark symbol, returning
/// the EODHD symbol actually resolved and used.
pub async fn fetch_and_store_benchmark_prices(
    pool: &PgPool,
    client: &EodhdClient,
    symbol: &str,
) -> PipelineResult<String> {
    if symbol.trim().is_empty() {
        return Err(PipelineError::InvalidData("benchmark symbol must not be blank".to_string()));
    }

    let resolved = client.resolve_symbol(symbol).await.map_err(|e| PipelineError::Request(e.to_string()))?;

    let last_known: Option<(String,)> = sqlx::query_as("SELECT MAX(date) FROM benchmark_prices_daily WHERE symbol = $1")
        .bind(&resolved)
        .fetch_optional(pool)
        .await?;
    let from_date = window_start(last_known.as_ref().map(|(d,)| d.as_str()));
    let to_date = today_iso();

    let rows = client
        .fetch_eod_prices(&resolved, &from_date, &to_date)
        .await
        .map_err(|e| PipelineError::Request(e.to_string()))?;

    let now = utcnow_iso();
    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO benchmark_prices_daily (symbol, date, adj_close, updated_at)
            VALUES ($1,$2,$3,$4)
            ON CONFLICT (symbol, date) DO UPDATE SET
                adj_close = EXCLUDED.adj_close,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&resolved)
        .bind(&row.date)
        .bind(row.adj_close)
        .bind(&now)
        .execute(pool)
        .await?;
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_history_backfills_from_2000() {
        assert_eq!(window_start(None), "2000-01-01");
    }

    #[test]
    fn existing_history_refetches_trailing_30_days() {
        assert_eq!(window_start(Some("2024-06-15")), "2024-05-16");
    }
}
