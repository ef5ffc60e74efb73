//! Forward-return outcomes: per-side (buy/sell) +60/+180 trading-day returns on the
//! issuer, paired with a benchmark return and the excess (alpha) over that benchmark.

use insider_core::time::utcnow_iso;
use insider_core::{EventKey, PipelineError, PipelineResult, Side};
use job_queue::{EnqueueRequest, JobQueue};
use serde_json::json;
use sqlx::PgPool;

#[derive(Debug, Clone, Default)]
pub struct HorizonOutcome {
    pub future_date: Option<String>,
    pub future_price: Option<f64>,
    pub trade_return: Option<f64>,
    pub missing_reason: Option<&'static str>,
    pub bench_return: Option<f64>,
    pub bench_missing_reason: Option<&'static str>,
    pub excess_return: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct SideOutcome {
    pub trade_date: Option<String>,
    pub anchor_trading_date: Option<String>,
    pub p0: Option<f64>,
    pub d60: HorizonOutcome,
    pub d180: HorizonOutcome,
}

fn find_anchor_index(dates: &[String], trade_date: &str) -> Option<usize> {
    dates.iter().position(|d| d.as_str() >= trade_date)
}

fn trade_return(side: Side, p0: f64, fp: f64) -> f64 {
    match side {
        Side::Buy => (fp / p0) - 1.0,
        Side::Sell => (p0 - fp) / p0,
    }
}

fn bench_return(side: Side, b0: f64, bf: f64) -> f64 {
    match side {
        Side::Buy => (bf / b0) - 1.0,
        Side::Sell => (b0 - bf) / b0,
    }
}

/// Compute the forward returns and benchmark comparison for one side of one event.
///
/// `issuer_dates`/`issuer_closes` and `bench_dates`/`bench_closes` must each be sorted
/// ascending. When the side itself cannot be anchored (no trade date, no usable `p0`,
/// or no matching trading day), the same missing reason is stamped on both horizons.
pub fn compute_side_outcome(
    side: Side,
    trade_date: Option<&str>,
    p0: Option<f64>,
    issuer_dates: &[String],
    issuer_closes: &[f64],
    bench_dates: &[String],
    bench_closes: &[f64],
) -> SideOutcome {
    let mut out = SideOutcome { trade_date: trade_date.map(str::to_string), ..Default::default() };

    let Some(trade_date) = trade_date else {
        out.d60.missing_reason = Some("missing_trade_date");
        out.d180.missing_reason = Some("missing_trade_date");
        return out;
    };

    let p0 = match p0 {
        Some(v) if v > 0.0 => v,
        _ => {
            out.d60.missing_reason = Some("missing_or_bad_p0");
            out.d180.missing_reason = Some("missing_or_bad_p0");
            return out;
        }
    };
    out.p0 = Some(p0);

    let Some(i) = find_anchor_index(issuer_dates, trade_date) else {
        out.d60.missing_reason = Some("anchor_not_found");
        out.d180.missing_reason = Some("anchor_not_found");
        return out;
    };
    out.anchor_trading_date = Some(issuer_dates[i].clone());

    for (horizon_days, horizon) in [(60usize, &mut out.d60), (180usize, &mut out.d180)] {
        match issuer_closes.get(i + horizon_days) {
            Some(fp) => {
                horizon.future_date = Some(issuer_dates[i + horizon_days].clone());
                horizon.future_price = Some(*fp);
                horizon.trade_return = Some(trade_return(side, p0, *fp));
            }
            None => horizon.missing_reason = Some("insufficient_future_data"),
        }
    }

    let bench_anchor = if bench_dates.is_empty() { None } else { find_anchor_index(bench_dates, trade_date) };

    for (horizon_days, horizon) in [(60usize, &mut out.d60), (180usize, &mut out.d180)] {
        if bench_dates.is_empty() {
            horizon.bench_missing_reason = Some("missing_benchmark_series");
            continue;
        }
        let Some(bi) = bench_anchor else {
            horizon.bench_missing_reason = Some("benchmark_anchor_not_found");
            continue;
        };
        let b0 = bench_closes[bi];
        if b0 <= 0.0 {
            horizon.bench_missing_reason = Some("benchmark_bad_p0");
            continue;
        }
        match bench_closes.get(bi + horizon_days) {
            Some(bf) => horizon.bench_return = Some(bench_return(side, b0, *bf)),
            None => horizon.bench_missing_reason = Some("insufficient_benchmark_future_data"),
        }
    }

    for horizon in [&mut out.d60, &mut out.d180] {
        if let (Some(tr), Some(br)) = (horizon.trade_return, horizon.bench_return) {
            horizon.excess_return = Some(tr - br);
        }
    }

    out
}

async fn load_series(pool: &PgPool, table: &str, key_col: &str, key: &str) -> PipelineResult<(Vec<String>, Vec<f64>)> {
    let query = format!("SELECT date, adj_close FROM {table} WHERE {key_col} = $1 ORDER BY date ASC");
    let rows: Vec<(String, f64)> = sqlx::query_as(&query).bind(key).fetch_all(pool).await?;
    Ok((rows.iter().map(|(d, _)| d.clone()).collect(), rows.iter().map(|(_, c)| *c).collect()))
}

/// Compute outcomes for both present sides of an event, self-healing a missing
/// benchmark price series by enqueueing a fetch job rather than failing outright.
pub async fn compute_outcomes_for_event(
    pool: &PgPool,
    job_queue: &JobQueue,
    benchmark_symbol: &str,
    outcomes_version: &str,
    event_key: &EventKey,
) -> PipelineResult<()> {
    let ev: Option<(String, bool, bool, Option<String>, Option<f64>, Option<String>, Option<f64>)> = sqlx::query_as(
        r#"
        SELECT issuer_cik, has_buy <> 0, has_sell <> 0, buy_trade_date, buy_vwap_price, sell_trade_date, sell_vwap_price
        FROM insider_events
        WHERE issuer_cik = $1 AND owner_key = $2 AND accession_number = $3
        "#,
    )
    .bind(&event_key.issuer_cik)
    .bind(&event_key.owner_key)
    .bind(&event_key.accession_number)
    .fetch_optional(pool)
    .await?;

    let Some((issuer_cik, has_buy, has_sell, buy_trade_date, buy_p0, sell_trade_date, sell_p0)) = ev else {
        return Err(PipelineError::MissingEvent(format!("{event_key:?}")));
    };

    let (issuer_dates, issuer_closes) = load_series(pool, "issuer_prices_daily", "issuer_cik", &issuer_cik).await?;

    if issuer_dates.is_empty() {
        if has_buy {
            upsert_missing(pool, event_key, Side::Buy, benchmark_symbol, outcomes_version, "missing_price_series").await?;
        }
        if has_sell {
            upsert_missing(pool, event_key, Side::Sell, benchmark_symbol, outcomes_version, "missing_price_series").await?;
        }
        touch_event(pool, event_key).await?;
        return Ok(());
    }

    let (bench_dates, bench_closes) = load_series(pool, "benchmark_prices_daily", "symbol", benchmark_symbol).await?;
    if bench_dates.is_empty() {
        let dedupe_key = format!("BENCH_PRICES|{benchmark_symbol}");
        job_queue
            .enqueue(
                EnqueueRequest::new("FETCH_BENCHMARK_PRICES", dedupe_key, json!({ "symbol": benchmark_symbol }))
                    .priority(50),
            )
            .await
            .map_err(|e| PipelineError::Other(e.to_string()))?;
    }

    if has_buy {
        let outcome = compute_side_outcome(
            Side::Buy,
            buy_trade_date.as_deref(),
            buy_p0,
            &issuer_dates,
            &issuer_closes,
            &bench_dates,
            &bench_closes,
        );
        upsert_side(pool, event_key, Side::Buy, benchmark_symbol, outcomes_version, &outcome).await?;
    } else {
        delete_side(pool, event_key, Side::Buy).await?;
    }

    if has_sell {
        let outcome = compute_side_outcome(
            Side::Sell,
            sell_trade_date.as_deref(),
            sell_p0,
            &issuer_dates,
            &issuer_closes,
            &bench_dates,
            &bench_closes,
        );
        upsert_side(pool, event_key, Side::Sell, benchmark_symbol, outcomes_version, &outcome).await?;
    } else {
        delete_side(pool, event_key, Side::Sell).await?;
    }

    touch_event(pool, event_key).await?;
    Ok(())
}

async fn upsert_side(
    pool: &PgPool,
    event_key: &EventKey,
    side: Side,
    bench_symbol: &str,
    outcomes_version: &str,
    outcome: &SideOutcome,
) -> PipelineResult<()> {
    let now = utcnow_iso();
    sqlx::query(
        r#"
        INSERT INTO event_outcomes (
            issuer_cik, owner_key, accession_number, side,
            trade_date, anchor_trading_date, p0,
            future_date_60d, future_price_60d, return_60d, missing_reason_60d,
            bench_symbol, bench_return_60d, bench_missing_reason_60d, excess_return_60d,
            future_date_180d, future_price_180d, return_180d, missing_reason_180d,
            bench_return_180d, bench_missing_reason_180d, excess_return_180d,
            outcomes_version, computed_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22,$23,$24)
        ON CONFLICT (issuer_cik, owner_key, accession_number, side) DO UPDATE SET
            trade_date = EXCLUDED.trade_date,
            anchor_trading_date = EXCLUDED.anchor_trading_date,
            p0 = EXCLUDED.p0,
            future_date_60d = EXCLUDED.future_date_60d,
            future_price_60d = EXCLUDED.future_price_60d,
            return_60d = EXCLUDED.return_60d,
            missing_reason_60d = EXCLUDED.missing_reason_60d,
            bench_symbol = EXCLUDED.bench_symbol,
            bench_return_60d = EXCLUDED.bench_return_60d,
            bench_missing_reason_60d = EXCLUDED.bench_missing_reason_60d,
            excess_return_60d = EXCLUDED.excess_return_60d,
            future_date_180d = EXCLUDED.future_date_180d,
            future_price_180d = EXCLUDED.future_price_180d,
            return_180d = EXCLUDED.return_180d,
            missing_reason_180d = EXCLUDED.missing_reason_180d,
            bench_return_180d = EXCLUDED.bench_return_180d,
            bench_missing_reason_180d = EXCLUDED.bench_missing_reason_180d,
            excess_return_180d = EXCLUDED.excess_return_180d,
            outcomes_version = EXCLUDED.outcomes_version,
            computed_at = EXCLUDED.computed_at
        "#,
    )
    .bind(&event_key.issuer_cik)
    .bind(&event_key.owner_key)
    .bind(&event_key.accession_number)
    .bind(side.as_str())
    .bind(&outcome.trade_date)
    .bind(&outcome.anchor_trading_date)
    .bind(outcome.p0)
    .bind(&outcome.d60.future_date)
    .bind(outcome.d60.future_price)
    .bind(outcome.d60.trade_return)
    .bind(outcome.d60.missing_reason)
    .bind(bench_symbol)
    .bind(outcome.d60.bench_return)
    .bind(outcome.d60.bench_missing_reason)
    .bind(outcome.d60.excess_return)
    .bind(&outcome.d180.future_date)
    .bind(outcome.d180.future_price)
    .bind(outcome.d180.trade_return)
    .bind(outcome.d180.missing_reason)
    .bind(outcome.d180.bench_return)
    .bind(outcome.d180.bench_missing_reason)
    .bind(outcome.d180.excess_return)
    .bind(outcomes_version)
    .bind(&now)
    .execute(pool)
    .await?;
    Ok(())
}

async fn upsert_missing(
    pool: &PgPool,
    event_key: &EventKey,
    side: Side,
    bench_symbol: &str,
    outcomes_version: &str,
    reason: &'static str,
) -> PipelineResult<()> {
    let outcome = SideOutcome {
        d60: HorizonOutcome { missing_reason: Some(reason), ..Default::default() },
        d180: HorizonOutcome { missing_reason: Some(reason), ..Default::default() },
        ..Default::default()
    };
    upsert_side(pool, event_key, side, bench_symbol, outcomes_version, &outcome).await
}

async fn delete_side(pool: &PgPool, event_key: &EventKey, side: Side) -> PipelineResult<()> {
    sqlx::query(
        "DELETE FROM event_outcomes WHERE issuer_cik = $1 AND owner_key = $2 AND accession_number = $3 AND side = $4",
    )
    .bind(&event_key.issuer_cik)
    .bind(&event_key.owner_key)
    .bind(&event_key.accession_number)
    .bind(side.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

async fn touch_event(pool: &PgPool, event_key: &EventKey) -> PipelineResult<()> {
    let now = utcnow_iso();
    sqlx::query(
        "UPDATE insider_events SET outcomes_computed_at = $1 WHERE issuer_cik = $2 AND owner_key = $3 AND accession_number = $4",
    )
    .bind(&now)
    .bind(&event_key.issuer_cik)
    .bind(&event_key.owner_key)
    .bind(&event_key.accession_number)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(n: usize, start: f64) -> (Vec<String>, Vec<f64>) {
        let dates: Vec<String> = (0..n).map(|i| format!("2020-{:02}-{:02}", 1 + i / 28, 1 + i % 28)).collect();
        let closes: Vec<f64> = (0..n).map(|i| start + i as f64).collect();
        (dates, closes)
    }

    #[test]
    fn missing_trade_date_short_circuits_both_horizons() {
        let out = compute_side_outcome(Side::Buy, None, Some(10.0), &[], &[], &[], &[]);
        assert_eq!(out.d60.missing_reason, Some("missing_trade_date"));
        assert_eq!(out.d180.missing_reason, Some("missing_trade_date"));
    }

    #[test]
    fn bad_p0_is_missing() {
        let (dates, closes) = series(300, 10.0);
        let out = compute_side_outcome(Side::Buy, Some("2020-01-01"), Some(0.0), &dates, &closes, &[], &[]);
        assert_eq!(out.d60.missing_reason, Some("missing_or_bad_p0"));
    }

    #[test]
    fn buy_return_positive_when_price_rises() {
        let (dates, closes) = series(300, 10.0);
        let anchor = dates[10].clone();
        let out = compute_side_outcome(Side::Buy, Some(&anchor), Some(closes[10]), &dates, &closes, &[], &[]);
        assert!(out.d60.trade_return.unwrap() > 0.0);
        assert_eq!(out.d60.bench_missing_reason, Some("missing_benchmark_series"));
        assert!(out.d60.excess_return.is_none());
    }

    #[test]
    fn sell_return_is_inverse_of_buy() {
        let (dates, closes) = series(300, 10.0);
        let p0 = closes[10];
        let fp = closes[70];
        let buy = trade_return(Side::Buy, p0, fp);
        let sell = trade_return(Side::Sell, p0, fp);
        assert!((buy + sell).abs() < 1e-9);
        let _ = dates;
    }

    #[test]
    fn excess_return_only_when_both_present() {
        let (dates, closes) = series(300, 10.0);
        let (bdates, bcloses) = series(300, 100.0);
        let anchor = dates[10].clone();
        let out =
            compute_side_outcome(Side::Buy, Some(&anchor), Some(closes[10]), &dates, &closes, &bdates, &bcloses);
        assert!(out.d60.excess_return.is_some());
        assert_eq!(out.d60.excess_return.unwrap(), out.d60.trade_return.unwrap() - out.d60.bench_return.unwrap());
    }

    #[test]
    fn insufficient_future_data_past_series_end() {
        let (dates, closes) = series(50, 10.0);
        let anchor = dates[49].clone();
        let out = compute_side_outcome(Side::Buy, Some(&anchor), Some(closes[49]), &dates, &closes, &[], &[]);
        assert_eq!(out.d60.missing_reason, Some("insufficient_future_data"));
    }
}
