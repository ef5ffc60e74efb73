//! Single authoritative DDL string plus a serialized bootstrap routine, mirroring how the
//! original platform's `schema.py` shipped one `CREATE TABLE IF NOT EXISTS` blob rather than
//! a migration chain.
//!
//! Timestamps are stored as ISO-8601 UTC strings ending in `Z` (see `insider_core::time`)
//! rather than native `TIMESTAMPTZ` columns, matching the original schema's convention.
//! Boolean-shaped columns are `INTEGER` (0/1) for the same reason: most of this schema was
//! ported column-for-column from a SQLite-first design and Postgres tolerates it fine.

use sqlx::PgPool;

/// Advisory lock key used to serialize schema bootstrap across concurrently-starting
/// processes. Arbitrary but fixed so every process agrees on it.
const SCHEMA_LOCK_KEY: i64 = 0x1d5e_1d5e;

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS app_config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS issuer_master (
    issuer_cik TEXT PRIMARY KEY,
    current_ticker TEXT,
    ticker_updated_at TEXT,
    issuer_name TEXT,
    last_filing_date TEXT
);

CREATE TABLE IF NOT EXISTS filings (
    accession_number TEXT PRIMARY KEY,
    issuer_cik TEXT NOT NULL,
    ticker_reported TEXT,
    form_type TEXT NOT NULL,
    filing_date TEXT NOT NULL,
    source_url TEXT,
    parse_version TEXT NOT NULL,
    ingested_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_filings_issuer_date ON filings (issuer_cik, filing_date);

CREATE TABLE IF NOT EXISTS filing_documents (
    accession_number TEXT PRIMARY KEY,
    issuer_cik TEXT,
    filing_date TEXT,
    form_type TEXT,
    source_url TEXT,
    xml_text TEXT NOT NULL,
    fetched_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_filing_documents_issuer ON filing_documents (issuer_cik);

CREATE TABLE IF NOT EXISTS form4_rows_raw (
    row_id BIGSERIAL PRIMARY KEY,
    accession_number TEXT NOT NULL,
    issuer_cik TEXT NOT NULL,
    owner_key TEXT NOT NULL,
    owner_cik TEXT,
    owner_name_raw TEXT,
    owner_name_normalized TEXT,
    owner_name_hash TEXT,
    is_derivative INTEGER NOT NULL,
    transaction_code TEXT,
    transaction_date TEXT,
    shares_raw DOUBLE PRECISION,
    shares_abs DOUBLE PRECISION,
    price_raw TEXT,
    price DOUBLE PRECISION,
    shares_owned_following DOUBLE PRECISION,
    parser_warnings_json TEXT,
    raw_payload_json TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rows_accession ON form4_rows_raw (accession_number);
CREATE INDEX IF NOT EXISTS idx_rows_eventkey ON form4_rows_raw (issuer_cik, owner_key, accession_number);
CREATE INDEX IF NOT EXISTS idx_rows_issuer_code_date ON form4_rows_raw (issuer_cik, transaction_code, transaction_date);

CREATE TABLE IF NOT EXISTS insider_events (
    issuer_cik TEXT NOT NULL,
    owner_key TEXT NOT NULL,
    accession_number TEXT NOT NULL,

    ticker TEXT,
    filing_date TEXT NOT NULL,
    event_trade_date TEXT,

    owner_cik TEXT,
    owner_name_display TEXT,
    owner_title TEXT,
    is_officer INTEGER,
    is_director INTEGER,
    is_ten_percent_owner INTEGER,

    has_buy INTEGER NOT NULL DEFAULT 0,
    buy_trade_date TEXT,
    buy_last_tx_date TEXT,
    buy_shares_total DOUBLE PRECISION,
    buy_dollars_total DOUBLE PRECISION,
    buy_vwap_price DOUBLE PRECISION,
    buy_priced_shares_total DOUBLE PRECISION,
    buy_unpriced_shares_total DOUBLE PRECISION,
    buy_vwap_is_partial INTEGER,
    buy_shares_owned_following DOUBLE PRECISION,
    buy_pct_holdings_change DOUBLE PRECISION,
    buy_pct_change_missing_reason TEXT,

    has_sell INTEGER NOT NULL DEFAULT 0,
    sell_trade_date TEXT,
    sell_last_tx_date TEXT,
    sell_shares_total DOUBLE PRECISION,
    sell_dollars_total DOUBLE PRECISION,
    sell_vwap_price DOUBLE PRECISION,
    sell_priced_shares_total DOUBLE PRECISION,
    sell_unpriced_shares_total DOUBLE PRECISION,
    sell_vwap_is_partial INTEGER,
    sell_shares_owned_following DOUBLE PRECISION,
    sell_pct_holdings_change DOUBLE PRECISION,
    sell_pct_change_missing_reason TEXT,

    non_open_market_row_count INTEGER NOT NULL DEFAULT 0,
    derivative_row_count INTEGER NOT NULL DEFAULT 0,

    trend_anchor_trading_date TEXT,
    trend_close DOUBLE PRECISION,
    trend_ret_20d DOUBLE PRECISION,
    trend_ret_60d DOUBLE PRECISION,
    trend_dist_52w_high DOUBLE PRECISION,
    trend_dist_52w_low DOUBLE PRECISION,
    trend_above_sma_50 INTEGER,
    trend_above_sma_200 INTEGER,
    trend_missing_reason TEXT,

    cluster_flag_buy INTEGER,
    cluster_id_buy TEXT,
    cluster_flag_sell INTEGER,
    cluster_id_sell TEXT,

    market_cap BIGINT,
    market_cap_bucket TEXT,
    market_cap_updated_at TEXT,

    ai_buy_rating DOUBLE PRECISION,
    ai_sell_rating DOUBLE PRECISION,
    ai_confidence DOUBLE PRECISION,
    ai_model_id TEXT,
    ai_prompt_version TEXT,
    ai_generated_at TEXT,

    parse_version TEXT NOT NULL,
    event_computed_at TEXT NOT NULL,
    trend_computed_at TEXT,
    outcomes_computed_at TEXT,
    stats_computed_at TEXT,
    cluster_computed_at TEXT,
    ai_computed_at TEXT,

    PRIMARY KEY (issuer_cik, owner_key, accession_number)
);
CREATE INDEX IF NOT EXISTS idx_events_ticker_date ON insider_events (ticker, filing_date);
CREATE INDEX IF NOT EXISTS idx_events_issuer_owner_date ON insider_events (issuer_cik, owner_key, filing_date);
CREATE INDEX IF NOT EXISTS idx_events_ticker_trade ON insider_events (ticker, event_trade_date);
CREATE INDEX IF NOT EXISTS idx_events_cluster_buy ON insider_events (ticker, cluster_flag_buy);
CREATE INDEX IF NOT EXISTS idx_events_cluster_sell ON insider_events (ticker, cluster_flag_sell);

CREATE TABLE IF NOT EXISTS event_outcomes (
    issuer_cik TEXT NOT NULL,
    owner_key TEXT NOT NULL,
    accession_number TEXT NOT NULL,
    side TEXT NOT NULL CHECK (side IN ('buy','sell')),

    trade_date TEXT,
    anchor_trading_date TEXT,
    p0 DOUBLE PRECISION,

    future_date_60d TEXT,
    future_price_60d DOUBLE PRECISION,
    return_60d DOUBLE PRECISION,
    missing_reason_60d TEXT,

    bench_symbol TEXT,
    bench_return_60d DOUBLE PRECISION,
    bench_missing_reason_60d TEXT,
    excess_return_60d DOUBLE PRECISION,

    future_date_180d TEXT,
    future_price_180d DOUBLE PRECISION,
    return_180d DOUBLE PRECISION,
    missing_reason_180d TEXT,

    bench_return_180d DOUBLE PRECISION,
    bench_missing_reason_180d TEXT,
    excess_return_180d DOUBLE PRECISION,

    outcomes_version TEXT NOT NULL,
    computed_at TEXT NOT NULL,

    PRIMARY KEY (issuer_cik, owner_key, accession_number, side)
);
CREATE INDEX IF NOT EXISTS idx_outcomes_issuer_owner_side ON event_outcomes (issuer_cik, owner_key, side);

CREATE TABLE IF NOT EXISTS issuer_prices_daily (
    issuer_cik TEXT NOT NULL,
    date TEXT NOT NULL,
    adj_close DOUBLE PRECISION NOT NULL,
    source_ticker TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (issuer_cik, date)
);
CREATE INDEX IF NOT EXISTS idx_prices_issuer_date ON issuer_prices_daily (issuer_cik, date);

CREATE TABLE IF NOT EXISTS benchmark_prices_daily (
    symbol TEXT NOT NULL,
    date TEXT NOT NULL,
    adj_close DOUBLE PRECISION NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (symbol, date)
);
CREATE INDEX IF NOT EXISTS idx_benchmark_prices_symbol_date ON benchmark_prices_daily (symbol, date);

CREATE TABLE IF NOT EXISTS clusters (
    cluster_id TEXT PRIMARY KEY,
    ticker TEXT NOT NULL,
    issuer_cik TEXT,
    side TEXT NOT NULL CHECK (side IN ('buy','sell')),
    window_start_date TEXT NOT NULL,
    window_end_date TEXT NOT NULL,
    unique_insiders INTEGER NOT NULL,
    total_dollars DOUBLE PRECISION NOT NULL,
    execs_involved INTEGER NOT NULL,
    max_pct_holdings_change DOUBLE PRECISION,
    cluster_version TEXT NOT NULL,
    computed_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_clusters_ticker_side_window ON clusters (ticker, side, window_start_date, window_end_date);

CREATE TABLE IF NOT EXISTS cluster_members (
    cluster_id TEXT NOT NULL,
    issuer_cik TEXT NOT NULL,
    owner_key TEXT NOT NULL,
    accession_number TEXT NOT NULL,
    side TEXT NOT NULL CHECK (side IN ('buy','sell')),
    trade_date TEXT NOT NULL,
    dollars_contributed DOUBLE PRECISION,
    pct_holdings_change DOUBLE PRECISION,
    PRIMARY KEY (cluster_id, issuer_cik, owner_key, accession_number, side)
);
CREATE INDEX IF NOT EXISTS idx_cluster_members_event ON cluster_members (issuer_cik, owner_key, accession_number, side);

CREATE TABLE IF NOT EXISTS insider_issuer_stats (
    issuer_cik TEXT NOT NULL,
    owner_key TEXT NOT NULL,
    side TEXT NOT NULL CHECK (side IN ('buy','sell')),

    eligible_n_60d INTEGER NOT NULL,
    win_rate_60d DOUBLE PRECISION,
    avg_return_60d DOUBLE PRECISION,

    eligible_n_180d INTEGER NOT NULL,
    win_rate_180d DOUBLE PRECISION,
    avg_return_180d DOUBLE PRECISION,

    stats_version TEXT NOT NULL,
    computed_at TEXT NOT NULL,

    PRIMARY KEY (issuer_cik, owner_key, side)
);
CREATE INDEX IF NOT EXISTS idx_stats_issuer_owner ON insider_issuer_stats (issuer_cik, owner_key);

CREATE TABLE IF NOT EXISTS market_cap_cache (
    ticker TEXT PRIMARY KEY,
    market_cap BIGINT,
    market_cap_bucket TEXT,
    market_cap_source TEXT NOT NULL DEFAULT 'eodhd',
    market_cap_updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS issuer_fundamentals_cache (
    ticker TEXT PRIMARY KEY,
    eodhd_symbol TEXT,
    market_cap BIGINT,
    pe_ratio DOUBLE PRECISION,
    eps DOUBLE PRECISION,
    shares_outstanding DOUBLE PRECISION,
    sector TEXT,
    beta DOUBLE PRECISION,
    fundamentals_json TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_fundamentals_updated_at ON issuer_fundamentals_cache (updated_at);

CREATE TABLE IF NOT EXISTS issuer_news (
    ticker TEXT NOT NULL,
    published_at TEXT,
    title TEXT,
    source TEXT,
    url TEXT NOT NULL,
    sentiment DOUBLE PRECISION,
    summary TEXT,
    news_json TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    PRIMARY KEY (ticker, url)
);
CREATE INDEX IF NOT EXISTS idx_news_ticker_published ON issuer_news (ticker, published_at);

CREATE TABLE IF NOT EXISTS ai_outputs (
    ai_output_id BIGSERIAL PRIMARY KEY,
    issuer_cik TEXT NOT NULL,
    owner_key TEXT NOT NULL,
    accession_number TEXT NOT NULL,

    model_id TEXT NOT NULL,
    prompt_version TEXT NOT NULL,
    input_schema_version TEXT NOT NULL,
    output_schema_version TEXT NOT NULL,
    inputs_hash TEXT NOT NULL,

    buy_rating DOUBLE PRECISION,
    sell_rating DOUBLE PRECISION,
    confidence DOUBLE PRECISION,

    input_json TEXT NOT NULL,
    output_json TEXT NOT NULL,
    generated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ai_event ON ai_outputs (issuer_cik, owner_key, accession_number);
CREATE INDEX IF NOT EXISTS idx_ai_inputs_hash ON ai_outputs (inputs_hash);

CREATE TABLE IF NOT EXISTS backfill_queue (
    issuer_cik TEXT NOT NULL,
    accession_number TEXT NOT NULL,
    filing_date TEXT,
    form_type TEXT,
    status TEXT NOT NULL CHECK (status IN ('pending','queued','fetched','parsed','error')),
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (issuer_cik, accession_number)
);
CREATE INDEX IF NOT EXISTS idx_backfill_status ON backfill_queue (status, issuer_cik, filing_date);

CREATE TABLE IF NOT EXISTS jobs (
    job_id BIGSERIAL PRIMARY KEY,
    job_type TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('pending','running','success','error')),
    priority INTEGER NOT NULL DEFAULT 100,
    dedupe_key TEXT NOT NULL UNIQUE,
    payload_json TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL DEFAULT 3,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    run_after TEXT
);
CREATE INDEX IF NOT EXISTS idx_jobs_status_priority ON jobs (status, priority, created_at);
CREATE INDEX IF NOT EXISTS idx_jobs_run_after ON jobs (run_after);

CREATE TABLE IF NOT EXISTS data_issues (
    issue_id BIGSERIAL PRIMARY KEY,
    issue_type TEXT NOT NULL,
    severity TEXT NOT NULL CHECK (severity IN ('low','medium','high')),
    issuer_cik TEXT,
    ticker TEXT,
    accession_number TEXT,
    details_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    resolved_at TEXT
);

CREATE TABLE IF NOT EXISTS app_users (
    user_id BIGSERIAL PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    is_admin INTEGER NOT NULL DEFAULT 0,
    subscription_status TEXT NOT NULL DEFAULT 'none',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS app_sessions (
    token TEXT PRIMARY KEY,
    user_id BIGINT NOT NULL REFERENCES app_users(user_id),
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sessions_user ON app_sessions (user_id);

CREATE TABLE IF NOT EXISTS user_feedback (
    feedback_id BIGSERIAL PRIMARY KEY,
    user_id BIGINT,
    message TEXT NOT NULL,
    category TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_log (
    sequence_number BIGSERIAL PRIMARY KEY,
    event_type TEXT NOT NULL,
    ticker TEXT,
    action TEXT,
    details TEXT,
    user_id TEXT,
    prev_hash TEXT NOT NULL DEFAULT '',
    entry_hash TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);
"#;

/// Run the DDL once, serialized across concurrently-starting processes via a session-level
/// Postgres advisory lock so two workers booting at once don't race on `CREATE INDEX`.
pub async fn bootstrap(pool: &PgPool) -> Result<(), sqlx::Error> {
    let mut conn = pool.acquire().await?;
    sqlx::query("SELECT pg_advisory_lock($1)").bind(SCHEMA_LOCK_KEY).execute(&mut *conn).await?;

    let result = sqlx::raw_sql(SCHEMA_SQL).execute(&mut *conn).await;

    sqlx::query("SELECT pg_advisory_unlock($1)").bind(SCHEMA_LOCK_KEY).execute(&mut *conn).await?;

    result.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_sql_is_nonempty_and_balanced() {
        assert!(SCHEMA_SQL.contains("CREATE TABLE IF NOT EXISTS jobs"));
        assert!(SCHEMA_SQL.contains("CREATE TABLE IF NOT EXISTS insider_events"));
        assert_eq!(SCHEMA_SQL.matches('(').count(), SCHEMA_SQL.matches(')').count());
    }
}
