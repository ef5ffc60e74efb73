//! Recent news ingestion for a ticker, cached with an hours-based staleness window.

use crate::eodhd::EodhdClient;
use chrono::{DateTime, Duration, Utc};
use insider_core::time::utcnow_iso;
use insider_core::PipelineResult;
use sqlx::PgPool;

const NEWS_LOOKBACK_DAYS: i64 = 30;
const NEWS_LIMIT: u32 = 50;

fn is_fresh(fetched_at: Option<&str>, max_age_hours: i64) -> bool {
    let Some(fetched_at) = fetched_at else { return false };
    let Ok(parsed) = DateTime::parse_from_rfc3339(fetched_at) else { return false };
    let age = Utc::now().signed_duration_since(parsed.with_timezone(&Utc));
    age <= Duration::hours(max_age_hours)
}

/// Refresh a ticker's news cache, skipping the fetch if the newest cached item is
/// still within `max_age_hours`. Each item upserts independently so one malformed
/// vendor row never drops the rest of the batch.
pub async fn fetch_and_store_news(
    pool: &PgPool,
    client: &EodhdClient,
    ticker: &str,
    max_age_hours: i64,
) -> PipelineResult<()> {
    let latest: Option<(Option<String>,)> =
        sqlx::query_as("SELECT MAX(fetched_at) FROM issuer_news WHERE ticker = $1")
            .bind(ticker)
            .fetch_optional(pool)
            .await?;
    let latest = latest.and_then(|(t,)| t);

    if is_fresh(latest.as_deref(), max_age_hours) {
        tracing::debug!(ticker, "news cache still fresh, skipping fetch");
        return Ok(());
    }

    let symbol = match client.resolve_symbol(ticker).await {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!(ticker, error = %e, "could not resolve symbol for news fetch");
            return Ok(());
        }
    };

    let today = Utc::now().date_naive();
    let date_from = (today - Duration::days(NEWS_LOOKBACK_DAYS)).to_string();
    let date_to = today.to_string();

    let items = match client.fetch_news(&symbol, &date_from, &date_to, NEWS_LIMIT).await {
        Ok(items) => items,
        Err(e) => {
            tracing::debug!(ticker, error = %e, "news fetch failed, leaving cache as-is");
            return Ok(());
        }
    };

    let now = utcnow_iso();
    for item in items {
        let item_json = serde_json::to_string(&serde_json::json!({
            "url": item.url,
            "title": item.title,
            "source": item.source,
            "published_at": item.published_at,
            "summary": item.summary,
            "sentiment": item.sentiment,
        }))
        .unwrap_or_default();

        let result = sqlx::query(
            r#"
            INSERT INTO issuer_news (ticker, published_at, title, source, url, sentiment, summary, news_json, fetched_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            ON CONFLICT (ticker, url) DO UPDATE SET
                published_at = EXCLUDED.published_at,
                title = EXCLUDED.title,
                source = EXCLUDED.source,
                sentiment = EXCLUDED.sentiment,
                summary = EXCLUDED.summary,
                news_json = EXCLUDED.news_json,
                fetched_at = EXCLUDED.fetched_at
            "#,
        )
        .bind(ticker)
        .bind(&item.published_at)
        .bind(&item.title)
        .bind(&item.source)
        .bind(&item.url)
        .bind(item.sentiment)
        .bind(&item.summary)
        .bind(&item_json)
        .bind(&now)
        .execute(pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(ticker, url = %item.url, error = %e, "skipping one malformed news item");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_timestamp_is_not_fresh() {
        assert!(!is_fresh(None, 12));
    }

    #[test]
    fn recent_timestamp_is_fresh() {
        let now = utcnow_iso();
        assert!(is_fresh(Some(&now), 12));
    }
}
