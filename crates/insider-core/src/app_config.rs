//! Thin key/value store for resolved runtime state that isn't tied to any one event —
//! e.g. the benchmark symbol actually resolved (after a ticker-alias lookup) by the last
//! successful `FETCH_BENCHMARK_PRICES` run, or the poller's last-run timestamp. Backed by
//! the `app_config` table (see `schema::SCHEMA_SQL`).

use crate::PipelineResult;
use sqlx::PgPool;

/// Upsert a single config key. Overwrites any existing value.
pub async fn upsert(pool: &PgPool, key: &str, value: &str) -> PipelineResult<()> {
    sqlx::query(
        r#"
        INSERT INTO app_config (key, value) VALUES ($1, $2)
        ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// Fetch a config value, or `None` if the key has never been set.
pub async fn get(pool: &PgPool, key: &str) -> PipelineResult<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM app_config WHERE key = $1").bind(key).fetch_optional(pool).await?;
    Ok(row.map(|(v,)| v))
}

/// Resolve the benchmark symbol actually in use: the last symbol a benchmark-price fetch
/// resolved and cached, falling back to the configured default when nothing has been
/// resolved yet (e.g. before the first `FETCH_BENCHMARK_PRICES` run).
pub async fn resolve_benchmark_symbol(pool: &PgPool, configured_default: &str) -> PipelineResult<String> {
    match get(pool, "benchmark_symbol_resolved").await? {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Ok(configured_default.to_string()),
    }
}
