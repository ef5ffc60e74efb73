//! Rolls up raw Form 4 rows for one accession into `insider_events`, one row per
//! reporting owner on that filing.

pub mod rollup;

use insider_core::error::{PipelineError, PipelineResult};
use insider_core::time::utcnow_iso;
use insider_core::types::EventKey;
use rollup::{rollup_side, RawRow};
use sqlx::PgPool;

fn bool_to_int(b: Option<bool>) -> Option<i32> {
    b.map(|v| if v { 1 } else { 0 })
}

struct RawRowWithOwnerMeta {
    raw: RawRow,
    owner_cik: Option<String>,
    owner_name_raw: Option<String>,
    owner_name_normalized: Option<String>,
    raw_payload_json: String,
}

/// Aggregate every owner's raw rows for `accession_number` into `insider_events`.
/// Returns the event keys touched (one per distinct `owner_key` on the filing).
pub async fn aggregate_accession(
    pool: &PgPool,
    current_parse_version: &str,
    accession_number: &str,
) -> PipelineResult<Vec<EventKey>> {
    tracing::debug!(accession_number, "aggregating accession");

    let filing: Option<(String, Option<String>)> =
        sqlx::query_as("SELECT issuer_cik, filing_date FROM filings WHERE accession_number = $1")
            .bind(accession_number)
            .fetch_optional(pool)
            .await?;

    let Some((issuer_cik, filing_date)) = filing else {
        return Err(PipelineError::MissingEvent(format!(
            "no filings row found for accession {accession_number}"
        )));
    };

    let ticker: Option<String> = sqlx::query_scalar("SELECT current_ticker FROM issuer_master WHERE issuer_cik = $1")
        .bind(&issuer_cik)
        .fetch_optional(pool)
        .await?
        .flatten();

    let market_cap_snapshot: Option<(Option<f64>, Option<String>, Option<String>)> = if let Some(t) = &ticker {
        sqlx::query_as(
            "SELECT market_cap, market_cap_bucket, market_cap_updated_at FROM market_cap_cache WHERE ticker = $1",
        )
        .bind(t)
        .fetch_optional(pool)
        .await?
    } else {
        None
    };
    let (market_cap, market_cap_bucket, market_cap_updated_at) =
        market_cap_snapshot.unwrap_or((None, None, None));

    let owner_keys: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT owner_key FROM form4_rows_raw WHERE accession_number = $1 AND issuer_cik = $2",
    )
    .bind(accession_number)
    .bind(&issuer_cik)
    .fetch_all(pool)
    .await?;

    let mut event_keys = Vec::with_capacity(owner_keys.len());

    for owner_key in owner_keys {
        let event_key = EventKey::new(issuer_cik.clone(), owner_key.clone(), accession_number.to_string());
        event_keys.push(event_key.clone());

        let owner_rows = load_owner_rows(pool, accession_number, &issuer_cik, &owner_key).await?;
        if owner_rows.is_empty() {
            continue;
        }

        let first = &owner_rows[0];
        let owner_cik = first.owner_cik.clone();
        let owner_name_display = first.owner_name_raw.clone().or_else(|| first.owner_name_normalized.clone());

        let (owner_title, is_officer, is_director, is_ten_percent_owner) = extract_relationship(first);

        let raw_rows: Vec<RawRow> = owner_rows.iter().map(|r| r.raw.clone()).collect();

        let derivative_row_count = raw_rows.iter().filter(|r| r.is_derivative).count() as i32;
        let non_open_market_row_count = raw_rows
            .iter()
            .filter(|r| !r.is_derivative && !matches!(r.transaction_code.as_deref(), Some("P") | Some("S")))
            .count() as i32;

        let buy = rollup_side(&raw_rows, "P");
        let sell = rollup_side(&raw_rows, "S");

        let event_trade_date = raw_rows.iter().filter_map(|r| r.transaction_date.as_deref()).min().map(str::to_string);

        let now = utcnow_iso();

        sqlx::query(
            r#"
            INSERT INTO insider_events (
                issuer_cik, owner_key, accession_number,
                ticker, filing_date, event_trade_date,
                owner_cik, owner_name_display, owner_title,
                is_officer, is_director, is_ten_percent_owner,

                has_buy, buy_trade_date, buy_last_tx_date,
                buy_shares_total, buy_dollars_total, buy_vwap_price,
                buy_priced_shares_total, buy_unpriced_shares_total, buy_vwap_is_partial,
                buy_shares_owned_following, buy_pct_holdings_change, buy_pct_change_missing_reason,

                has_sell, sell_trade_date, sell_last_tx_date,
                sell_shares_total, sell_dollars_total, sell_vwap_price,
                sell_priced_shares_total, sell_unpriced_shares_total, sell_vwap_is_partial,
                sell_shares_owned_following, sell_pct_holdings_change, sell_pct_change_missing_reason,

                non_open_market_row_count, derivative_row_count,
                parse_version, event_computed_at,
                market_cap, market_cap_bucket, market_cap_updated_at
            ) VALUES (
                $1,$2,$3,
                $4,$5,$6,
                $7,$8,$9,
                $10,$11,$12,

                $13,$14,$15,
                $16,$17,$18,
                $19,$20,$21,
                $22,$23,$24,

                $25,$26,$27,
                $28,$29,$30,
                $31,$32,$33,
                $34,$35,$36,

                $37,$38,
                $39,$40,
                $41,$42,$43
            )
            ON CONFLICT (issuer_cik, owner_key, accession_number) DO UPDATE SET
                ticker = excluded.ticker,
                filing_date = excluded.filing_date,
                event_trade_date = excluded.event_trade_date,

                owner_cik = excluded.owner_cik,
                owner_name_display = excluded.owner_name_display,
                owner_title = excluded.owner_title,
                is_officer = excluded.is_officer,
                is_director = excluded.is_director,
                is_ten_percent_owner = excluded.is_ten_percent_owner,

                has_buy = excluded.has_buy,
                buy_trade_date = excluded.buy_trade_date,
                buy_last_tx_date = excluded.buy_last_tx_date,
                buy_shares_total = excluded.buy_shares_total,
                buy_dollars_total = excluded.buy_dollars_total,
                buy_vwap_price = excluded.buy_vwap_price,
                buy_priced_shares_total = excluded.buy_priced_shares_total,
                buy_unpriced_shares_total = excluded.buy_unpriced_shares_total,
                buy_vwap_is_partial = excluded.buy_vwap_is_partial,
                buy_shares_owned_following = excluded.buy_shares_owned_following,
                buy_pct_holdings_change = excluded.buy_pct_holdings_change,
                buy_pct_change_missing_reason = excluded.buy_pct_change_missing_reason,

                has_sell = excluded.has_sell,
                sell_trade_date = excluded.sell_trade_date,
                sell_last_tx_date = excluded.sell_last_tx_date,
                sell_shares_total = excluded.sell_shares_total,
                sell_dollars_total = excluded.sell_dollars_total,
                sell_vwap_price = excluded.sell_vwap_price,
                sell_priced_shares_total = excluded.sell_priced_shares_total,
                sell_unpriced_shares_total = excluded.sell_unpriced_shares_total,
                sell_vwap_is_partial = excluded.sell_vwap_is_partial,
                sell_shares_owned_following = excluded.sell_shares_owned_following,
                sell_pct_holdings_change = excluded.sell_pct_holdings_change,
                sell_pct_change_missing_reason = excluded.sell_pct_change_missing_reason,

                non_open_market_row_count = excluded.non_open_market_row_count,
                derivative_row_count = excluded.derivative_row_count,

                parse_version = excluded.parse_version,
                event_computed_at = excluded.event_computed_at,

                -- force recompute of every downstream engine
                trend_computed_at = NULL,
                outcomes_computed_at = NULL,
                stats_computed_at = NULL,
                cluster_computed_at = NULL,
                ai_computed_at = NULL,

                trend_anchor_trading_date = NULL,
                trend_close = NULL,
                trend_ret_20d = NULL,
                trend_ret_60d = NULL,
                trend_dist_52w_high = NULL,
                trend_dist_52w_low = NULL,
                trend_above_sma_50 = NULL,
                trend_above_sma_200 = NULL,
                trend_missing_reason = NULL,

                cluster_flag_buy = NULL,
                cluster_id_buy = NULL,
                cluster_flag_sell = NULL,
                cluster_id_sell = NULL,

                ai_buy_rating = NULL,
                ai_sell_rating = NULL,
                ai_confidence = NULL,
                ai_model_id = NULL,
                ai_prompt_version = NULL,
                ai_generated_at = NULL,

                -- keep an existing market cap snapshot rather than overwrite with NULL
                market_cap = COALESCE(excluded.market_cap, insider_events.market_cap),
                market_cap_bucket = COALESCE(excluded.market_cap_bucket, insider_events.market_cap_bucket),
                market_cap_updated_at = COALESCE(excluded.market_cap_updated_at, insider_events.market_cap_updated_at)
            "#,
        )
        .bind(&issuer_cik)
        .bind(&owner_key)
        .bind(accession_number)
        .bind(&ticker)
        .bind(&filing_date)
        .bind(&event_trade_date)
        .bind(&owner_cik)
        .bind(&owner_name_display)
        .bind(&owner_title)
        .bind(bool_to_int(is_officer))
        .bind(bool_to_int(is_director))
        .bind(bool_to_int(is_ten_percent_owner))
        .bind(buy.has as i32)
        .bind(&buy.trade_date)
        .bind(&buy.last_tx_date)
        .bind(buy.shares_total)
        .bind(buy.dollars_total)
        .bind(buy.vwap_price)
        .bind(buy.priced_shares_total)
        .bind(buy.unpriced_shares_total)
        .bind(buy.vwap_is_partial as i32)
        .bind(buy.shares_owned_following)
        .bind(buy.pct_holdings_change)
        .bind(&buy.pct_change_missing_reason)
        .bind(sell.has as i32)
        .bind(&sell.trade_date)
        .bind(&sell.last_tx_date)
        .bind(sell.shares_total)
        .bind(sell.dollars_total)
        .bind(sell.vwap_price)
        .bind(sell.priced_shares_total)
        .bind(sell.unpriced_shares_total)
        .bind(sell.vwap_is_partial as i32)
        .bind(sell.shares_owned_following)
        .bind(sell.pct_holdings_change)
        .bind(&sell.pct_change_missing_reason)
        .bind(non_open_market_row_count)
        .bind(derivative_row_count)
        .bind(current_parse_version)
        .bind(&now)
        .bind(market_cap)
        .bind(&market_cap_bucket)
        .bind(&market_cap_updated_at)
        .execute(pool)
        .await?;

        tracing::debug!(?event_key, has_buy = buy.has, has_sell = sell.has, "upserted insider_event");
    }

    // Normalize every event for this issuer onto its current ticker, so UI and
    // clustering never see a stale symbol after a rename.
    if let Some(t) = &ticker {
        sqlx::query("UPDATE insider_events SET ticker = $1 WHERE issuer_cik = $2")
            .bind(t)
            .bind(&issuer_cik)
            .execute(pool)
            .await?;
    }

    Ok(event_keys)
}

async fn load_owner_rows(
    pool: &PgPool,
    accession_number: &str,
    issuer_cik: &str,
    owner_key: &str,
) -> PipelineResult<Vec<RawRowWithOwnerMeta>> {
    #[derive(sqlx::FromRow)]
    struct Row {
        row_id: i64,
        is_derivative: i32,
        transaction_code: Option<String>,
        transaction_date: Option<String>,
        shares_abs: Option<f64>,
        price: Option<f64>,
        shares_owned_following: Option<f64>,
        owner_cik: Option<String>,
        owner_name_raw: Option<String>,
        owner_name_normalized: Option<String>,
        raw_payload_json: String,
    }

    let rows: Vec<Row> = sqlx::query_as(
        r#"
        SELECT row_id, is_derivative, transaction_code, transaction_date, shares_abs, price,
               shares_owned_following, owner_cik, owner_name_raw, owner_name_normalized, raw_payload_json
        FROM form4_rows_raw
        WHERE accession_number = $1 AND issuer_cik = $2 AND owner_key = $3
        "#,
    )
    .bind(accession_number)
    .bind(issuer_cik)
    .bind(owner_key)
    .fetch_all(pool)
    .await?;

    let rows = rows
        .into_iter()
        .map(|r| RawRowWithOwnerMeta {
            raw: RawRow {
                row_id: r.row_id,
                is_derivative: r.is_derivative != 0,
                transaction_code: r.transaction_code,
                transaction_date: r.transaction_date,
                shares_abs: r.shares_abs,
                price: r.price,
                shares_owned_following: r.shares_owned_following,
            },
            owner_cik: r.owner_cik,
            owner_name_raw: r.owner_name_raw,
            owner_name_normalized: r.owner_name_normalized,
            raw_payload_json: r.raw_payload_json,
        })
        .collect();

    Ok(rows)
}

/// Best-effort extraction of officer title / relationship flags from the first
/// row's stored raw payload. A parse failure here just means those fields stay
/// `None` — it never fails aggregation.
fn extract_relationship(row: &RawRowWithOwnerMeta) -> (Option<String>, Option<bool>, Option<bool>, Option<bool>) {
    let Ok(payload) = serde_json::from_str::<serde_json::Value>(&row.raw_payload_json) else {
        return (None, None, None, None);
    };
    let ro = payload.get("reporting_owner");
    let title = ro.and_then(|v| v.get("officer_title")).and_then(|v| v.as_str()).map(str::to_string);
    let is_officer = ro.and_then(|v| v.get("is_officer")).and_then(|v| v.as_bool());
    let is_director = ro.and_then(|v| v.get("is_director")).and_then(|v| v.as_bool());
    let is_ten = ro.and_then(|v| v.get("is_ten_percent_owner")).and_then(|v| v.as_bool());
    (title, is_officer, is_director, is_ten)
}
