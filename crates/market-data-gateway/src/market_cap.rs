//! Fundamentals and market-cap caching: refreshes the per-ticker fundamentals snapshot
//! on a staleness cadence, then denormalizes market cap onto every matching event row.

use crate::eodhd::EodhdClient;
use chrono::{DateTime, Utc};
use insider_core::time::utcnow_iso;
use insider_core::{MarketCapBucket, PipelineError, PipelineResult};
use sqlx::PgPool;

fn is_stale(updated_at: Option<&str>, max_age_days: i64) -> bool {
    let Some(updated_at) = updated_at else { return true };
    let Ok(parsed) = DateTime::parse_from_rfc3339(updated_at) else { return true };
    let age = Utc::now().signed_duration_since(parsed.with_timezone(&Utc));
    age > chrono::Duration::days(max_age_days)
}

fn bucket_label(market_cap: Option<i64>) -> Option<&'static str> {
    market_cap.map(|mc| MarketCapBucket::from_market_cap(mc).as_str())
}

fn first_f64(obj: &serde_json::Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| obj.get(k)).and_then(|v| v.as_f64())
}

fn first_str(obj: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| obj.get(k)).and_then(|v| v.as_str()).map(str::to_string)
}

/// Extracted fundamentals fields pulled from the vendor's `Highlights`/`SharesStats`/
/// `General`/`Technicals` sub-objects, each tried under several observed key-name variants.
#[derive(Debug, Clone, Default)]
struct ExtractedFundamentals {
    market_cap: Option<i64>,
    pe_ratio: Option<f64>,
    eps: Option<f64>,
    shares_outstanding: Option<f64>,
    sector: Option<String>,
    beta: Option<f64>,
}

fn extract_fundamentals(payload: &serde_json::Value) -> ExtractedFundamentals {
    let empty = serde_json::Value::Null;
    let highlights = payload.get("Highlights").unwrap_or(&empty);
    let shares_stats = payload.get("SharesStats").unwrap_or(&empty);
    let general = payload.get("General").unwrap_or(&empty);
    let technicals = payload.get("Technicals").unwrap_or(&empty);

    ExtractedFundamentals {
        market_cap: first_f64(highlights, &["MarketCapitalization", "MarketCapitalizationUSD", "MarketCapitalizationUsd"])
            .map(|v| v as i64),
        pe_ratio: first_f64(highlights, &["PERatio", "PeRatio", "peRatio"]),
        eps: first_f64(highlights, &["EarningsShare", "EPS", "Eps", "eps"]),
        shares_outstanding: first_f64(
            shares_stats,
            &["SharesOutstanding", "sharesOutstanding", "SharesOutstandingCommon"],
        ),
        sector: first_str(general, &["Sector", "sector"]),
        beta: first_f64(technicals, &["Beta", "beta"]),
    }
}

/// Refresh one ticker's fundamentals/market-cap cache (skipping the fetch if the
/// existing cache row is still within `max_age_days`), then stamp the resulting
/// market cap and bucket onto every `insider_events` row sharing that ticker.
pub async fn fetch_and_store_market_cap(
    pool: &PgPool,
    client: &EodhdClient,
    ticker: &str,
    max_age_days: i64,
) -> PipelineResult<()> {
    let cached: Option<(Option<String>,)> =
        sqlx::query_as("SELECT market_cap_updated_at FROM market_cap_cache WHERE ticker = $1")
            .bind(ticker)
            .fetch_optional(pool)
            .await?;
    let cached_at = cached.and_then(|(t,)| t);

    if !is_stale(cached_at.as_deref(), max_age_days) {
        tracing::debug!(ticker, "market cap cache still fresh, skipping fetch");
        return Ok(());
    }

    let symbol = client.resolve_symbol(ticker).await.map_err(|e| PipelineError::Request(e.to_string()))?;
    let payload = client.fetch_fundamentals(&symbol).await.map_err(|e| PipelineError::Request(e.to_string()))?;
    let extracted = extract_fundamentals(&payload);
    let now = utcnow_iso();
    let payload_json = serde_json::to_string(&payload).unwrap_or_default();

    sqlx::query(
        r#"
        INSERT INTO issuer_fundamentals_cache (
            ticker, eodhd_symbol, market_cap, pe_ratio, eps, shares_outstanding, sector, beta, fundamentals_json, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
        ON CONFLICT (ticker) DO UPDATE SET
            eodhd_symbol = EXCLUDED.eodhd_symbol,
            market_cap = EXCLUDED.market_cap,
            pe_ratio = EXCLUDED.pe_ratio,
            eps = EXCLUDED.eps,
            shares_outstanding = EXCLUDED.shares_outstanding,
            sector = EXCLUDED.sector,
            beta = EXCLUDED.beta,
            fundamentals_json = EXCLUDED.fundamentals_json,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(ticker)
    .bind(&symbol)
    .bind(extracted.market_cap)
    .bind(extracted.pe_ratio)
    .bind(extracted.eps)
    .bind(extracted.shares_outstanding)
    .bind(&extracted.sector)
    .bind(extracted.beta)
    .bind(&payload_json)
    .bind(&now)
    .execute(pool)
    .await?;

    let bucket = bucket_label(extracted.market_cap);
    sqlx::query(
        r#"
        INSERT INTO market_cap_cache (ticker, market_cap, market_cap_bucket, market_cap_source, market_cap_updated_at)
        VALUES ($1,$2,$3,'eodhd',$4)
        ON CONFLICT (ticker) DO UPDATE SET
            market_cap = EXCLUDED.market_cap,
            market_cap_bucket = EXCLUDED.market_cap_bucket,
            market_cap_source = EXCLUDED.market_cap_source,
            market_cap_updated_at = EXCLUDED.market_cap_updated_at
        "#,
    )
    .bind(ticker)
    .bind(extracted.market_cap)
    .bind(bucket)
    .bind(&now)
    .execute(pool)
    .await?;

    sqlx::query(
        "UPDATE insider_events SET market_cap = $1, market_cap_bucket = $2, market_cap_updated_at = $3 WHERE ticker = $4",
    )
    .bind(extracted.market_cap)
    .bind(bucket)
    .bind(&now)
    .bind(ticker)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_timestamp_is_always_stale() {
        assert!(is_stale(None, 7));
    }

    #[test]
    fn unparseable_timestamp_is_stale() {
        assert!(is_stale(Some("not-a-date"), 7));
    }

    #[test]
    fn recent_timestamp_is_fresh() {
        let now = utcnow_iso();
        assert!(!is_stale(Some(&now), 7));
    }

    #[test]
    fn extracts_first_matching_key_variant_per_field() {
        let payload = json!({
            "Highlights": {"MarketCapitalizationUSD": 5_000_000_000.0, "PeRatio": 22.5},
            "SharesStats": {"sharesOutstanding": 1_000_000.0},
            "General": {"sector": "Technology"},
            "Technicals": {"Beta": 1.2}
        });
        let extracted = extract_fundamentals(&payload);
        assert_eq!(extracted.market_cap, Some(5_000_000_000));
        assert_eq!(extracted.pe_ratio, Some(22.5));
        assert_eq!(extracted.shares_outstanding, Some(1_000_000.0));
        assert_eq!(extracted.sector.as_deref(), Some("Technology"));
        assert_eq!(extracted.beta, Some(1.2));
    }

    #[test]
    fn bucket_is_none_when_market_cap_absent() {
        assert_eq!(bucket_label(None), None);
        assert_eq!(bucket_label(Some(100_000_000)), Some("micro"));
    }
}
