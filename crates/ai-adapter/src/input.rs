//! Assembles `ai_input_v2`: the single JSON document the prompt and the baseline
//! scorer both read from. Every field here is pulled straight from already-computed
//! tables — this module does no computation of its own beyond simple derived ratios
//! (trade_value_pct_market_cap, holdings_change_multiple) that the prompt is told not
//! to recompute.

use crate::baseline::compute_baseline;
use insider_core::error::{PipelineError, PipelineResult};
use insider_core::types::EventKey;
use insider_core::Config;
use serde_json::{json, Value};
use sqlx::PgPool;

const MAX_NEWS_ITEMS: i64 = 8;
const MAX_FOOTNOTES: usize = 20;
const FOOTNOTE_MAX_CHARS: usize = 400;

#[derive(sqlx::FromRow)]
struct EventRow {
    ticker: Option<String>,
    filing_date: String,
    owner_title: Option<String>,
    is_officer: Option<i32>,
    is_director: Option<i32>,

    has_buy: i32,
    buy_trade_date: Option<String>,
    buy_shares_total: Option<f64>,
    buy_dollars_total: Option<f64>,
    buy_vwap_price: Option<f64>,
    buy_vwap_is_partial: Option<i32>,
    buy_shares_owned_following: Option<f64>,
    buy_pct_holdings_change: Option<f64>,

    has_sell: i32,
    sell_trade_date: Option<String>,
    sell_shares_total: Option<f64>,
    sell_dollars_total: Option<f64>,
    sell_vwap_price: Option<f64>,
    sell_vwap_is_partial: Option<i32>,
    sell_shares_owned_following: Option<f64>,
    sell_pct_holdings_change: Option<f64>,

    cluster_flag_buy: Option<i32>,
    cluster_id_buy: Option<String>,
    cluster_flag_sell: Option<i32>,
    cluster_id_sell: Option<String>,

    market_cap: Option<i64>,
    market_cap_bucket: Option<String>,

    trend_anchor_trading_date: Option<String>,
    trend_close: Option<f64>,
    trend_ret_20d: Option<f64>,
    trend_ret_60d: Option<f64>,
    trend_dist_52w_high: Option<f64>,
    trend_dist_52w_low: Option<f64>,
    trend_above_sma_50: Option<i32>,
    trend_above_sma_200: Option<i32>,
    trend_missing_reason: Option<String>,
}

fn int_to_bool(v: Option<i32>) -> Option<bool> {
    v.map(|x| x != 0)
}

fn side_value(
    has: i32,
    trade_date: Option<String>,
    shares_total: Option<f64>,
    dollars_total: Option<f64>,
    vwap_price: Option<f64>,
    vwap_is_partial: Option<i32>,
    shares_owned_following: Option<f64>,
    pct_holdings_change: Option<f64>,
    market_cap: Option<i64>,
    is_buy: bool,
) -> Value {
    let has = has != 0;
    let key = if is_buy { "has_buy" } else { "has_sell" };
    if !has {
        return json!({ key: false });
    }
    let trade_value_pct_market_cap = match (dollars_total, market_cap) {
        (Some(d), Some(mc)) if mc > 0 => Some(d / mc as f64 * 100.0),
        _ => None,
    };
    let holdings_change_multiple = pct_holdings_change.map(|p| 1.0 + p / 100.0);
    let after = shares_owned_following;
    let before = match (after, shares_owned_following, shares_total) {
        (Some(after), Some(_), Some(total)) if is_buy => Some(after - total),
        (Some(after), Some(_), Some(total)) => Some(after + total),
        _ => None,
    };

    json!({
        key: true,
        "trade_date": trade_date,
        "shares": shares_total,
        "dollars": dollars_total,
        "vwap_price": vwap_price,
        "vwap_is_partial": vwap_is_partial.map(|x| x != 0).unwrap_or(false),
        "holdings_change_pct": pct_holdings_change,
        "holdings_change_multiple": holdings_change_multiple,
        "holdings_before": before,
        "holdings_after": after,
        "trade_value_pct_market_cap": trade_value_pct_market_cap,
    })
}

async fn cluster_context_for(pool: &PgPool, cluster_id: Option<&str>) -> PipelineResult<Value> {
    let Some(cluster_id) = cluster_id else {
        return Ok(json!({"cluster_flag": false}));
    };

    #[derive(sqlx::FromRow)]
    struct ClusterRow {
        window_start_date: String,
        window_end_date: String,
        unique_insiders: i32,
        total_dollars: f64,
        execs_involved: i32,
        max_pct_holdings_change: Option<f64>,
    }

    let row: Option<ClusterRow> = sqlx::query_as(
        "SELECT window_start_date, window_end_date, unique_insiders, total_dollars, execs_involved, max_pct_holdings_change
         FROM clusters WHERE cluster_id = $1",
    )
    .bind(cluster_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(json!({"cluster_flag": false}));
    };

    Ok(json!({
        "cluster_flag": true,
        "cluster_id": cluster_id,
        "window_start_date": row.window_start_date,
        "window_end_date": row.window_end_date,
        "unique_insiders": row.unique_insiders,
        "total_dollars": row.total_dollars,
        "execs_involved": row.execs_involved,
        "max_pct_holdings_change": row.max_pct_holdings_change,
    }))
}

async fn insider_stats_for(pool: &PgPool, issuer_cik: &str, owner_key: &str, side: &str, benchmark_symbol: &str) -> PipelineResult<Value> {
    #[derive(sqlx::FromRow)]
    struct StatsRow {
        eligible_n_60d: i32,
        win_rate_60d: Option<f64>,
        avg_return_60d: Option<f64>,
        eligible_n_180d: i32,
        win_rate_180d: Option<f64>,
        avg_return_180d: Option<f64>,
    }

    let row: Option<StatsRow> = sqlx::query_as(
        "SELECT eligible_n_60d, win_rate_60d, avg_return_60d, eligible_n_180d, win_rate_180d, avg_return_180d
         FROM insider_issuer_stats WHERE issuer_cik = $1 AND owner_key = $2 AND side = $3",
    )
    .bind(issuer_cik)
    .bind(owner_key)
    .bind(side)
    .fetch_optional(pool)
    .await?;

    let row = row.unwrap_or(StatsRow {
        eligible_n_60d: 0,
        win_rate_60d: None,
        avg_return_60d: None,
        eligible_n_180d: 0,
        win_rate_180d: None,
        avg_return_180d: None,
    });

    Ok(json!({
        "eligible_n_60d": row.eligible_n_60d,
        "win_rate_60d": row.win_rate_60d,
        "avg_excess_return_60d": row.avg_return_60d,
        "eligible_n_180d": row.eligible_n_180d,
        "win_rate_180d": row.win_rate_180d,
        "avg_excess_return_180d": row.avg_return_180d,
        "benchmark_note": format!("win rates and avg returns are excess over {benchmark_symbol}"),
    }))
}

async fn insider_history_for(
    pool: &PgPool,
    issuer_cik: &str,
    owner_key: &str,
    accession_number: &str,
    filing_date: &str,
) -> PipelineResult<Value> {
    #[derive(sqlx::FromRow)]
    struct PriorRow {
        accession_number: String,
        filing_date: String,
        has_buy: i32,
        has_sell: i32,
        buy_trade_date: Option<String>,
        sell_trade_date: Option<String>,
    }

    let rows: Vec<PriorRow> = sqlx::query_as(
        "SELECT accession_number, filing_date, has_buy, has_sell, buy_trade_date, sell_trade_date
         FROM insider_events WHERE issuer_cik = $1 AND owner_key = $2 AND accession_number != $3",
    )
    .bind(issuer_cik)
    .bind(owner_key)
    .bind(accession_number)
    .fetch_all(pool)
    .await?;

    let cutoff_12m = shift_date(filing_date, -365);

    let mut prior_buy_total = 0i64;
    let mut prior_sell_total = 0i64;
    let mut prior_buy_12m = 0i64;
    let mut prior_sell_12m = 0i64;
    let mut last_buy_date: Option<String> = None;
    let mut last_sell_date: Option<String> = None;

    for row in &rows {
        let in_12m = cutoff_12m.as_deref().map(|cut| row.filing_date.as_str() >= cut).unwrap_or(false);
        if row.has_buy != 0 {
            prior_buy_total += 1;
            if in_12m {
                prior_buy_12m += 1;
            }
            if let Some(d) = &row.buy_trade_date {
                if last_buy_date.as_deref().map(|cur| d.as_str() > cur).unwrap_or(true) {
                    last_buy_date = Some(d.clone());
                }
            }
        }
        if row.has_sell != 0 {
            prior_sell_total += 1;
            if in_12m {
                prior_sell_12m += 1;
            }
            if let Some(d) = &row.sell_trade_date {
                if last_sell_date.as_deref().map(|cur| d.as_str() > cur).unwrap_or(true) {
                    last_sell_date = Some(d.clone());
                }
            }
        }
    }

    Ok(json!({
        "prior_buy_events_total": prior_buy_total,
        "prior_sell_events_total": prior_sell_total,
        "prior_buy_events_12m": prior_buy_12m,
        "prior_sell_events_12m": prior_sell_12m,
        "last_buy_trade_date": last_buy_date,
        "last_sell_trade_date": last_sell_date,
        "history_scope": "issuer_cik+owner_key, excluding the current accession",
    }))
}

async fn issuer_recent_activity(pool: &PgPool, issuer_cik: &str, filing_date: &str) -> PipelineResult<Value> {
    let window_start = shift_date(filing_date, -30).unwrap_or_else(|| filing_date.to_string());

    #[derive(sqlx::FromRow)]
    struct ActivityRow {
        has_buy: i32,
        has_sell: i32,
        buy_dollars_total: Option<f64>,
        sell_dollars_total: Option<f64>,
    }

    let rows: Vec<ActivityRow> = sqlx::query_as(
        "SELECT has_buy, has_sell, buy_dollars_total, sell_dollars_total FROM insider_events
         WHERE issuer_cik = $1 AND filing_date >= $2 AND filing_date <= $3",
    )
    .bind(issuer_cik)
    .bind(&window_start)
    .bind(filing_date)
    .fetch_all(pool)
    .await?;

    let events_count = rows.len() as i64;
    let buys_dollars: f64 = rows.iter().filter(|r| r.has_buy != 0).filter_map(|r| r.buy_dollars_total).sum();
    let sells_dollars: f64 = rows.iter().filter(|r| r.has_sell != 0).filter_map(|r| r.sell_dollars_total).sum();

    Ok(json!({
        "window_days": 30,
        "events_count": events_count,
        "buys_dollars_total": buys_dollars,
        "sells_dollars_total": sells_dollars,
    }))
}

fn shift_date(date: &str, days: i64) -> Option<String> {
    use chrono::NaiveDate;
    let d = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let shifted = d.checked_add_signed(chrono::Duration::days(days))?;
    Some(shifted.to_string())
}

async fn footnotes_for_accession(pool: &PgPool, accession_number: &str) -> PipelineResult<Vec<String>> {
    let payloads: Vec<String> =
        sqlx::query_scalar("SELECT raw_payload_json FROM form4_rows_raw WHERE accession_number = $1")
            .bind(accession_number)
            .fetch_all(pool)
            .await?;

    let mut seen = std::collections::HashSet::new();
    let mut texts = Vec::new();
    for payload in payloads {
        let Ok(v) = serde_json::from_str::<Value>(&payload) else { continue };
        let Some(footnotes) = v.get("footnotes").and_then(|f| f.as_array()) else { continue };
        for fn_entry in footnotes {
            let Some(text) = fn_entry.get("text").and_then(|t| t.as_str()) else { continue };
            let truncated: String = text.chars().take(FOOTNOTE_MAX_CHARS).collect();
            if seen.insert(truncated.clone()) {
                texts.push(truncated);
            }
            if texts.len() >= MAX_FOOTNOTES {
                return Ok(texts);
            }
        }
    }
    Ok(texts)
}

/// Assembles the full `ai_input_v2` document for one event, including the
/// deterministic baseline. Returns `PipelineError::MissingEvent` if the event row
/// itself is gone (should not happen — the caller only reaches here after the
/// event's dependency gates already passed).
pub async fn assemble_ai_input(pool: &PgPool, cfg: &Config, event_key: &EventKey) -> PipelineResult<Value> {
    let row: Option<EventRow> = sqlx::query_as(
        r#"
        SELECT
            ticker, filing_date, owner_title, is_officer, is_director,
            has_buy, buy_trade_date, buy_shares_total, buy_dollars_total, buy_vwap_price,
            buy_vwap_is_partial, buy_shares_owned_following, buy_pct_holdings_change,
            has_sell, sell_trade_date, sell_shares_total, sell_dollars_total, sell_vwap_price,
            sell_vwap_is_partial, sell_shares_owned_following, sell_pct_holdings_change,
            cluster_flag_buy, cluster_id_buy, cluster_flag_sell, cluster_id_sell,
            market_cap, market_cap_bucket,
            trend_anchor_trading_date, trend_close, trend_ret_20d, trend_ret_60d,
            trend_dist_52w_high, trend_dist_52w_low, trend_above_sma_50, trend_above_sma_200,
            trend_missing_reason
        FROM insider_events WHERE issuer_cik = $1 AND owner_key = $2 AND accession_number = $3
        "#,
    )
    .bind(&event_key.issuer_cik)
    .bind(&event_key.owner_key)
    .bind(&event_key.accession_number)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Err(PipelineError::MissingEvent(format!(
            "no insider_events row for {}/{}/{}",
            event_key.issuer_cik, event_key.owner_key, event_key.accession_number
        )));
    };

    let buy = side_value(
        row.has_buy,
        row.buy_trade_date,
        row.buy_shares_total,
        row.buy_dollars_total,
        row.buy_vwap_price,
        row.buy_vwap_is_partial,
        row.buy_shares_owned_following,
        row.buy_pct_holdings_change,
        row.market_cap,
        true,
    );
    let sell = side_value(
        row.has_sell,
        row.sell_trade_date,
        row.sell_shares_total,
        row.sell_dollars_total,
        row.sell_vwap_price,
        row.sell_vwap_is_partial,
        row.sell_shares_owned_following,
        row.sell_pct_holdings_change,
        row.market_cap,
        false,
    );

    let buy_cluster = cluster_context_for(pool, row.cluster_id_buy.as_deref()).await?;
    let sell_cluster = cluster_context_for(pool, row.cluster_id_sell.as_deref()).await?;

    let benchmark_symbol = insider_core::app_config::resolve_benchmark_symbol(pool, &cfg.benchmark_symbol).await?;
    let buy_stats = insider_stats_for(pool, &event_key.issuer_cik, &event_key.owner_key, "buy", &benchmark_symbol).await?;
    let sell_stats = insider_stats_for(pool, &event_key.issuer_cik, &event_key.owner_key, "sell", &benchmark_symbol).await?;

    let insider_history =
        insider_history_for(pool, &event_key.issuer_cik, &event_key.owner_key, &event_key.accession_number, &row.filing_date).await?;

    let issuer_recent = issuer_recent_activity(pool, &event_key.issuer_cik, &row.filing_date).await?;

    let fundamentals: Option<(Option<f64>, Option<f64>, Option<f64>, Option<String>, Option<f64>)> = if let Some(t) = &row.ticker {
        sqlx::query_as("SELECT pe_ratio, eps, shares_outstanding, sector, beta FROM issuer_fundamentals_cache WHERE ticker = $1")
            .bind(t)
            .fetch_optional(pool)
            .await?
    } else {
        None
    };
    let (pe_ratio, eps, shares_outstanding, sector, beta) = fundamentals.unwrap_or((None, None, None, None, None));

    let news: Vec<(Option<String>, Option<String>, Option<String>, Option<f64>, Option<String>)> = if let Some(t) = &row.ticker {
        sqlx::query_as(
            "SELECT published_at, title, source, sentiment, summary FROM issuer_news
             WHERE ticker = $1 ORDER BY published_at DESC NULLS LAST LIMIT $2",
        )
        .bind(t)
        .bind(MAX_NEWS_ITEMS)
        .fetch_all(pool)
        .await?
    } else {
        Vec::new()
    };
    let news: Vec<Value> = news
        .into_iter()
        .map(|(published_at, title, source, sentiment, summary)| {
            json!({"published_at": published_at, "title": title, "source": source, "sentiment": sentiment, "summary": summary})
        })
        .collect();

    let footnotes = footnotes_for_accession(pool, &event_key.accession_number).await?;

    let trend_context = json!({
        "anchor_trading_date": row.trend_anchor_trading_date,
        "anchor_close": row.trend_close,
        "pre_returns": {"ret_20d": row.trend_ret_20d, "ret_60d": row.trend_ret_60d},
        "dist_52w_high": row.trend_dist_52w_high,
        "dist_52w_low": row.trend_dist_52w_low,
        "above_sma_50": int_to_bool(row.trend_above_sma_50),
        "above_sma_200": int_to_bool(row.trend_above_sma_200),
        "missing_reason": row.trend_missing_reason,
    });

    let data_quality = json!({
        "buy_vwap_is_partial": buy.get("vwap_is_partial").cloned().unwrap_or(Value::Bool(false)),
        "sell_vwap_is_partial": sell.get("vwap_is_partial").cloned().unwrap_or(Value::Bool(false)),
        "trend_missing": row.trend_anchor_trading_date.is_none(),
    });

    let mut ai_input = json!({
        "schema_version": cfg.ai_input_schema_version,
        "event_key": {
            "issuer_cik": event_key.issuer_cik,
            "owner_key": event_key.owner_key,
            "accession_number": event_key.accession_number,
        },
        "event": {
            "owner_title": row.owner_title,
            "is_officer": int_to_bool(row.is_officer),
            "is_director": int_to_bool(row.is_director),
            "filing_date": row.filing_date,
            "buy": buy,
            "sell": sell,
        },
        "issuer_context": {
            "ticker": row.ticker,
            "market_cap": row.market_cap,
            "market_cap_bucket": row.market_cap_bucket,
            "fundamentals": {"pe_ratio": pe_ratio, "eps": eps, "shares_outstanding": shares_outstanding, "sector": sector, "beta": beta},
            "news": news,
            "recent_activity_30d": issuer_recent,
        },
        "cluster_context": {"buy_cluster": buy_cluster, "sell_cluster": sell_cluster},
        "insider_stats": {"buy": buy_stats, "sell": sell_stats},
        "insider_history": insider_history,
        "trend_context": trend_context,
        "data_quality": data_quality,
        "benchmark": {"symbol": benchmark_symbol},
        "filing_context": {"footnotes": footnotes},
        "asof_utc": insider_core::time::utcnow_iso(),
    });

    let baseline = compute_baseline(&ai_input);
    ai_input["baseline"] = baseline;

    Ok(ai_input)
}

/// Canonical bytes used for the dedupe hash: strips volatile fields (`asof_utc`) and
/// relies on `serde_json::Value`'s object map already being key-sorted (no
/// `preserve_order` feature), so two semantically-identical inputs hash identically
/// regardless of assembly order.
pub fn canonicalize_for_hash(ai_input: &Value) -> String {
    let mut v = ai_input.clone();
    if let Some(obj) = v.as_object_mut() {
        obj.remove("asof_utc");
    }
    serde_json::to_string(&v).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_drops_asof_and_sorts_keys() {
        let a = json!({"zz": 1, "asof_utc": "2026-01-01T00:00:00Z", "aa": 2});
        let b = json!({"aa": 2, "zz": 1, "asof_utc": "2026-07-27T00:00:00Z"});
        assert_eq!(canonicalize_for_hash(&a), canonicalize_for_hash(&b));
    }

    #[test]
    fn shift_date_moves_back_30_days() {
        assert_eq!(shift_date("2026-03-01", -30), Some("2026-01-30".to_string()));
    }
}
