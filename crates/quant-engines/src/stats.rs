//! Per-(issuer, owner) track-record stats: win rate and average excess return, by side
//! and by horizon, over every accession on file for that pair.

use insider_core::time::utcnow_iso;
use insider_core::{OwnerIssuerKey, PipelineResult, Side};
use sqlx::PgPool;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SideStats {
    pub eligible_n: i64,
    pub win_rate: Option<f64>,
    pub avg_return: Option<f64>,
}

/// Summarize a set of excess returns into eligible-count, win-rate, and mean.
/// `None` for both derived fields when there are no eligible observations.
pub fn summarize(excess_returns: &[f64]) -> SideStats {
    let n = excess_returns.len() as i64;
    if n == 0 {
        return SideStats { eligible_n: 0, win_rate: None, avg_return: None };
    }
    let wins = excess_returns.iter().filter(|r| **r > 0.0).count() as f64;
    let avg = excess_returns.iter().sum::<f64>() / n as f64;
    SideStats { eligible_n: n, win_rate: Some(wins / n as f64), avg_return: Some(avg) }
}

pub async fn compute_stats_for_owner_issuer(pool: &PgPool, stats_version: &str, key: &OwnerIssuerKey) -> PipelineResult<()> {
    for side in [Side::Buy, Side::Sell] {
        let d60: Vec<(f64,)> = sqlx::query_as(
            "SELECT excess_return_60d FROM event_outcomes WHERE issuer_cik = $1 AND owner_key = $2 AND side = $3 AND excess_return_60d IS NOT NULL",
        )
        .bind(&key.issuer_cik)
        .bind(&key.owner_key)
        .bind(side.as_str())
        .fetch_all(pool)
        .await?;
        let d180: Vec<(f64,)> = sqlx::query_as(
            "SELECT excess_return_180d FROM event_outcomes WHERE issuer_cik = $1 AND owner_key = $2 AND side = $3 AND excess_return_180d IS NOT NULL",
        )
        .bind(&key.issuer_cik)
        .bind(&key.owner_key)
        .bind(side.as_str())
        .fetch_all(pool)
        .await?;

        let stats_60d = summarize(&d60.into_iter().map(|(v,)| v).collect::<Vec<_>>());
        let stats_180d = summarize(&d180.into_iter().map(|(v,)| v).collect::<Vec<_>>());
        upsert_stats(pool, key, side, stats_version, stats_60d, stats_180d).await?;
    }

    let now = utcnow_iso();
    sqlx::query("UPDATE insider_events SET stats_computed_at = $1 WHERE issuer_cik = $2 AND owner_key = $3")
        .bind(&now)
        .bind(&key.issuer_cik)
        .bind(&key.owner_key)
        .execute(pool)
        .await?;
    Ok(())
}

async fn upsert_stats(
    pool: &PgPool,
    key: &OwnerIssuerKey,
    side: Side,
    stats_version: &str,
    stats_60d: SideStats,
    stats_180d: SideStats,
) -> PipelineResult<()> {
    let now = utcnow_iso();
    sqlx::query(
        r#"
        INSERT INTO insider_issuer_stats (
            issuer_cik, owner_key, side,
            eligible_n_60d, win_rate_60d, avg_return_60d,
            eligible_n_180d, win_rate_180d, avg_return_180d,
            stats_version, computed_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
        ON CONFLICT (issuer_cik, owner_key, side) DO UPDATE SET
            eligible_n_60d = EXCLUDED.eligible_n_60d,
            win_rate_60d = EXCLUDED.win_rate_60d,
            avg_return_60d = EXCLUDED.avg_return_60d,
            eligible_n_180d = EXCLUDED.eligible_n_180d,
            win_rate_180d = EXCLUDED.win_rate_180d,
            avg_return_180d = EXCLUDED.avg_return_180d,
            stats_version = EXCLUDED.stats_version,
            computed_at = EXCLUDED.computed_at
        "#,
    )
    .bind(&key.issuer_cik)
    .bind(&key.owner_key)
    .bind(side.as_str())
    .bind(stats_60d.eligible_n)
    .bind(stats_60d.win_rate)
    .bind(stats_60d.avg_return)
    .bind(stats_180d.eligible_n)
    .bind(stats_180d.win_rate)
    .bind(stats_180d.avg_return)
    .bind(stats_version)
    .bind(&now)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_series_has_no_rate_or_average() {
        let stats = summarize(&[]);
        assert_eq!(stats, SideStats { eligible_n: 0, win_rate: None, avg_return: None });
    }

    #[test]
    fn win_rate_counts_strictly_positive_excess() {
        let stats = summarize(&[0.1, -0.2, 0.0, 0.05]);
        assert_eq!(stats.eligible_n, 4);
        assert_eq!(stats.win_rate, Some(0.5));
    }

    #[test]
    fn average_is_plain_mean() {
        let stats = summarize(&[0.1, 0.3, -0.1]);
        assert_eq!(stats.eligible_n, 3);
        assert!((stats.avg_return.unwrap() - 0.1).abs() < 1e-12);
    }
}
