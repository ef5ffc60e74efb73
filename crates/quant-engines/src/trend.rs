//! Price-anchored trend context: 20/60 trading-day pre-returns, 52-week range distance,
//! and SMA-50/200 sign, anchored on the first trading day on/after an event's open-market
//! trade date.

use insider_core::time::utcnow_iso;
use insider_core::{EventKey, PipelineError, PipelineResult};
use sqlx::PgPool;

#[derive(Debug, Clone, PartialEq)]
pub struct TrendResult {
    pub anchor_trading_date: String,
    pub close: f64,
    pub ret_20d: f64,
    pub ret_60d: f64,
    pub dist_52w_high: f64,
    pub dist_52w_low: f64,
    pub above_sma_50: bool,
    pub above_sma_200: bool,
}

/// Resolve the trend anchor and derived signals from a sorted `(date, close)` series.
///
/// `dates` must be ascending. Requires 252 trailing trading days (SMA-200 plus the 52-week
/// window) before the anchor, which is also the deepest of the four lookback requirements.
pub fn compute_trend(trade_date: &str, dates: &[String], closes: &[f64]) -> Result<TrendResult, &'static str> {
    if dates.is_empty() {
        return Err("missing_price_series");
    }

    let i = dates.iter().position(|d| d.as_str() >= trade_date).ok_or("anchor_not_found")?;

    if i < 199 {
        return Err("insufficient_history_for_sma200");
    }
    if i < 251 {
        return Err("insufficient_history_for_52w");
    }
    if i < 60 {
        return Err("insufficient_history_for_60d");
    }
    if i < 20 {
        return Err("insufficient_history_for_20d");
    }

    let close_anchor = closes[i];
    let ret_20d = (close_anchor / closes[i - 20]) - 1.0;
    let ret_60d = (close_anchor / closes[i - 60]) - 1.0;

    let window_52w = &closes[i - 251..=i];
    let high_52 = window_52w.iter().cloned().fold(f64::MIN, f64::max);
    let low_52 = window_52w.iter().cloned().fold(f64::MAX, f64::min);
    let dist_52w_high = (close_anchor / high_52) - 1.0;
    let dist_52w_low = (close_anchor / low_52) - 1.0;

    let sma50 = closes[i - 49..=i].iter().sum::<f64>() / 50.0;
    let sma200 = closes[i - 199..=i].iter().sum::<f64>() / 200.0;

    Ok(TrendResult {
        anchor_trading_date: dates[i].clone(),
        close: close_anchor,
        ret_20d,
        ret_60d,
        dist_52w_high,
        dist_52w_low,
        above_sma_50: close_anchor > sma50,
        above_sma_200: close_anchor > sma200,
    })
}

/// Choose the anchor trade date: the earliest of any open-market buy/sell trade date
/// present on the event, falling back to the event's overall trade date.
fn resolve_anchor_trade_date(
    event_trade_date: Option<&str>,
    has_buy: bool,
    buy_trade_date: Option<&str>,
    has_sell: bool,
    sell_trade_date: Option<&str>,
) -> Option<String> {
    let mut open_market: Vec<&str> = Vec::new();
    if has_buy {
        if let Some(d) = buy_trade_date {
            open_market.push(d);
        }
    }
    if has_sell {
        if let Some(d) = sell_trade_date {
            open_market.push(d);
        }
    }
    if let Some(min) = open_market.into_iter().min() {
        return Some(min.to_string());
    }
    event_trade_date.map(|s| s.to_string())
}

struct EventRow {
    issuer_cik: String,
    event_trade_date: Option<String>,
    has_buy: bool,
    has_sell: bool,
    buy_trade_date: Option<String>,
    sell_trade_date: Option<String>,
}

pub async fn compute_trend_for_event(pool: &PgPool, event_key: &EventKey) -> PipelineResult<()> {
    let ev: Option<(String, Option<String>, bool, bool, Option<String>, Option<String>)> = sqlx::query_as(
        r#"
        SELECT issuer_cik, event_trade_date, has_buy <> 0, has_sell <> 0, buy_trade_date, sell_trade_date
        FROM insider_events
        WHERE issuer_cik = $1 AND owner_key = $2 AND accession_number = $3
        "#,
    )
    .bind(&event_key.issuer_cik)
    .bind(&event_key.owner_key)
    .bind(&event_key.accession_number)
    .fetch_optional(pool)
    .await?;

    let Some((issuer_cik, event_trade_date, has_buy, has_sell, buy_trade_date, sell_trade_date)) = ev else {
        return Err(PipelineError::MissingEvent(format!("{event_key:?}")));
    };
    let row = EventRow { issuer_cik, event_trade_date, has_buy, has_sell, buy_trade_date, sell_trade_date };

    let trade_date = resolve_anchor_trade_date(
        row.event_trade_date.as_deref(),
        row.has_buy,
        row.buy_trade_date.as_deref(),
        row.has_sell,
        row.sell_trade_date.as_deref(),
    );

    let Some(trade_date) = trade_date else {
        return set_missing(pool, event_key, "missing_event_trade_date").await;
    };

    let series: Vec<(String, f64)> =
        sqlx::query_as("SELECT date, adj_close FROM issuer_prices_daily WHERE issuer_cik = $1 ORDER BY date ASC")
            .bind(&row.issuer_cik)
            .fetch_all(pool)
            .await?;

    let dates: Vec<String> = series.iter().map(|(d, _)| d.clone()).collect();
    let closes: Vec<f64> = series.iter().map(|(_, c)| *c).collect();

    match compute_trend(&trade_date, &dates, &closes) {
        Ok(result) => {
            let now = utcnow_iso();
            sqlx::query(
                r#"
                UPDATE insider_events
                SET trend_anchor_trading_date = $1, trend_close = $2,
                    trend_ret_20d = $3, trend_ret_60d = $4,
                    trend_dist_52w_high = $5, trend_dist_52w_low = $6,
                    trend_above_sma_50 = $7, trend_above_sma_200 = $8,
                    trend_missing_reason = NULL,
                    trend_computed_at = $9
                WHERE issuer_cik = $10 AND owner_key = $11 AND accession_number = $12
                "#,
            )
            .bind(&result.anchor_trading_date)
            .bind(result.close)
            .bind(result.ret_20d)
            .bind(result.ret_60d)
            .bind(result.dist_52w_high)
            .bind(result.dist_52w_low)
            .bind(result.above_sma_50 as i32)
            .bind(result.above_sma_200 as i32)
            .bind(&now)
            .bind(&event_key.issuer_cik)
            .bind(&event_key.owner_key)
            .bind(&event_key.accession_number)
            .execute(pool)
            .await?;
            tracing::debug!(?event_key, anchor = %result.anchor_trading_date, "trend computed");
            Ok(())
        }
        Err(reason) => set_missing(pool, event_key, reason).await,
    }
}

async fn set_missing(pool: &PgPool, event_key: &EventKey, reason: &str) -> PipelineResult<()> {
    let now = utcnow_iso();
    sqlx::query(
        r#"
        UPDATE insider_events
        SET trend_anchor_trading_date = NULL, trend_close = NULL,
            trend_ret_20d = NULL, trend_ret_60d = NULL,
            trend_dist_52w_high = NULL, trend_dist_52w_low = NULL,
            trend_above_sma_50 = NULL, trend_above_sma_200 = NULL,
            trend_missing_reason = $1,
            trend_computed_at = $2
        WHERE issuer_cik = $3 AND owner_key = $4 AND accession_number = $5
        "#,
    )
    .bind(reason)
    .bind(&now)
    .bind(&event_key.issuer_cik)
    .bind(&event_key.owner_key)
    .bind(&event_key.accession_number)
    .execute(pool)
    .await?;
    tracing::debug!(?event_key, reason, "trend missing");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(n: usize) -> (Vec<String>, Vec<f64>) {
        let dates: Vec<String> = (0..n).map(|i| format!("2020-{:02}-{:02}", 1 + i / 28, 1 + i % 28)).collect();
        let closes: Vec<f64> = (0..n).map(|i| 100.0 + i as f64 * 0.1).collect();
        (dates, closes)
    }

    #[test]
    fn insufficient_history_reports_sma200_first() {
        let (dates, closes) = series(100);
        let err = compute_trend("2020-01-01", &dates, &closes).unwrap_err();
        assert_eq!(err, "insufficient_history_for_sma200");
    }

    #[test]
    fn anchor_not_found_when_trade_date_after_series_end() {
        let (dates, closes) = series(300);
        let err = compute_trend("2099-01-01", &dates, &closes).unwrap_err();
        assert_eq!(err, "anchor_not_found");
    }

    #[test]
    fn computes_signals_with_enough_history() {
        let (dates, closes) = series(400);
        let anchor_date = dates[300].clone();
        let result = compute_trend(&anchor_date, &dates, &closes).unwrap();
        assert_eq!(result.anchor_trading_date, anchor_date);
        assert!(result.above_sma_50);
        assert!(result.above_sma_200);
        assert!(result.ret_20d > 0.0);
        assert!(result.ret_60d > 0.0);
    }

    #[test]
    fn anchor_resolution_prefers_earliest_open_market_date() {
        let resolved = resolve_anchor_trade_date(Some("2020-01-10"), true, Some("2020-01-05"), true, Some("2020-01-08"));
        assert_eq!(resolved.as_deref(), Some("2020-01-05"));
    }

    #[test]
    fn anchor_resolution_falls_back_to_event_trade_date() {
        let resolved = resolve_anchor_trade_date(Some("2020-01-10"), false, None, false, None);
        assert_eq!(resolved.as_deref(), Some("2020-01-10"));
    }
}
