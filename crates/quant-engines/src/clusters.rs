//! Insider cluster detection: a left-to-right sweep over same-ticker, same-side
//! candidates grouping same-or-overlapping 14-calendar-day filing windows backed by
//! at least two distinct accessions.

use chrono::NaiveDate;
use insider_core::hashing::sha256_hex;
use insider_core::time::utcnow_iso;
use insider_core::{PipelineResult, Side};
use sqlx::PgPool;
use std::collections::BTreeSet;

const WINDOW_DAYS: i64 = 14;
const MIN_FILINGS: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub issuer_cik: String,
    pub owner_key: String,
    pub accession_number: String,
    pub trade_date: String,
    pub dollars: f64,
    pub is_exec: bool,
    pub pct_holdings_change: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterResult {
    pub window_start: String,
    pub window_end: String,
    pub total_dollars: f64,
    pub execs_involved: bool,
    pub max_pct_holdings_change: Option<f64>,
    pub unique_insiders: i64,
    pub cluster_id: String,
    pub member_indexes: Vec<usize>,
}

fn parse_date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("trade_date must be an ISO date")
}

fn member_string(c: &Candidate) -> String {
    format!("{}|{}|{}", c.issuer_cik, c.owner_key, c.accession_number)
}

fn cluster_id(ticker: &str, side: Side, window_start: &str, window_end: &str, member_strings: &BTreeSet<String>) -> String {
    let joined = member_strings.iter().cloned().collect::<Vec<_>>().join(",");
    let short_hash = &sha256_hex(&joined)[..12];
    format!("clu|{ticker}|{}|{window_start}|{window_end}|{short_hash}", side.as_str())
}

/// Sweep candidates (assumed already sorted ascending by `trade_date`) into clusters.
///
/// Mirrors the reference left-to-right sweep: for each unassigned candidate, collect
/// every later unassigned candidate within 14 calendar days; if at least two distinct
/// accessions fall in that window, form one cluster and mark all of them assigned;
/// otherwise advance to the next candidate and retry. The outer index always advances
/// by one regardless of whether a cluster formed.
pub fn sweep_clusters(ticker: &str, side: Side, candidates: &[Candidate]) -> Vec<ClusterResult> {
    if candidates.len() < MIN_FILINGS {
        return Vec::new();
    }

    let dates: Vec<NaiveDate> = candidates.iter().map(|c| parse_date(&c.trade_date)).collect();
    let mut assigned = vec![false; candidates.len()];
    let mut results = Vec::new();

    for i in 0..candidates.len() {
        if assigned[i] {
            continue;
        }
        let anchor_date = dates[i];
        let window_end_date = anchor_date + chrono::Duration::days(WINDOW_DAYS);

        let idxs: Vec<usize> = (i..candidates.len())
            .filter(|&j| !assigned[j] && dates[j] <= window_end_date)
            .collect();

        let distinct_accessions: BTreeSet<&str> =
            idxs.iter().map(|&j| candidates[j].accession_number.as_str()).collect();

        if distinct_accessions.len() < MIN_FILINGS {
            continue;
        }

        let window_start = candidates[i].trade_date.clone();
        let window_end = idxs.iter().map(|&j| candidates[j].trade_date.clone()).max().unwrap();

        let mut dollars_by_accession: std::collections::BTreeMap<&str, f64> = std::collections::BTreeMap::new();
        for &j in &idxs {
            let entry = dollars_by_accession.entry(candidates[j].accession_number.as_str()).or_insert(0.0);
            if candidates[j].dollars > *entry {
                *entry = candidates[j].dollars;
            }
        }
        let total_dollars: f64 = dollars_by_accession.values().sum();

        let execs_involved = idxs.iter().any(|&j| candidates[j].is_exec);
        let max_pct_holdings_change =
            idxs.iter().filter_map(|&j| candidates[j].pct_holdings_change).fold(None, |acc: Option<f64>, v| {
                Some(acc.map_or(v, |a| a.max(v)))
            });

        let member_strings: BTreeSet<String> = idxs.iter().map(|&j| member_string(&candidates[j])).collect();
        let id = cluster_id(ticker, side, &window_start, &window_end, &member_strings);

        results.push(ClusterResult {
            window_start,
            window_end,
            total_dollars,
            execs_involved,
            max_pct_holdings_change,
            unique_insiders: distinct_accessions.len() as i64,
            cluster_id: id,
            member_indexes: idxs.clone(),
        });

        for j in idxs {
            assigned[j] = true;
        }
    }

    results
}

pub async fn compute_clusters_for_ticker(pool: &PgPool, cluster_version: &str, ticker: &str) -> PipelineResult<()> {
    for side in [Side::Buy, Side::Sell] {
        compute_clusters_for_side(pool, cluster_version, ticker, side).await?;
    }
    let now = utcnow_iso();
    sqlx::query("UPDATE insider_events SET cluster_computed_at = $1 WHERE ticker = $2")
        .bind(&now)
        .bind(ticker)
        .execute(pool)
        .await?;
    Ok(())
}

async fn compute_clusters_for_side(pool: &PgPool, cluster_version: &str, ticker: &str, side: Side) -> PipelineResult<()> {
    let side_col = side.as_str();
    let reset_query = format!(
        "UPDATE insider_events SET cluster_flag_{side_col} = 0, cluster_id_{side_col} = NULL WHERE ticker = $1"
    );
    sqlx::query(&reset_query).bind(ticker).execute(pool).await?;

    sqlx::query("DELETE FROM cluster_members WHERE cluster_id IN (SELECT cluster_id FROM clusters WHERE ticker = $1 AND side = $2)")
        .bind(ticker)
        .bind(side_col)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM clusters WHERE ticker = $1 AND side = $2").bind(ticker).bind(side_col).execute(pool).await?;

    let query = format!(
        r#"
        SELECT issuer_cik, owner_key, accession_number, {side_col}_trade_date,
               COALESCE({side_col}_dollars_total, 0), (COALESCE(is_officer, 0) <> 0 OR COALESCE(is_director, 0) <> 0),
               {side_col}_pct_holdings_change
        FROM insider_events
        WHERE ticker = $1 AND has_{side_col} <> 0 AND {side_col}_trade_date IS NOT NULL
        ORDER BY {side_col}_trade_date ASC
        "#
    );
    let rows: Vec<(String, String, String, String, f64, bool, Option<f64>)> =
        sqlx::query_as(&query).bind(ticker).fetch_all(pool).await?;

    let candidates: Vec<Candidate> = rows
        .into_iter()
        .map(|(issuer_cik, owner_key, accession_number, trade_date, dollars, is_exec, pct_holdings_change)| Candidate {
            issuer_cik,
            owner_key,
            accession_number,
            trade_date,
            dollars,
            is_exec,
            pct_holdings_change,
        })
        .collect();

    if candidates.len() < MIN_FILINGS {
        return Ok(());
    }

    let clusters = sweep_clusters(ticker, side, &candidates);
    let now = utcnow_iso();

    for cluster in &clusters {
        let issuer_cik = candidates[cluster.member_indexes[0]].issuer_cik.clone();
        sqlx::query(
            r#"
            INSERT INTO clusters (
                cluster_id, ticker, issuer_cik, side, window_start_date, window_end_date,
                unique_insiders, total_dollars, execs_involved, max_pct_holdings_change,
                cluster_version, computed_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
            "#,
        )
        .bind(&cluster.cluster_id)
        .bind(ticker)
        .bind(&issuer_cik)
        .bind(side_col)
        .bind(&cluster.window_start)
        .bind(&cluster.window_end)
        .bind(cluster.unique_insiders as i32)
        .bind(cluster.total_dollars)
        .bind(cluster.execs_involved as i32)
        .bind(cluster.max_pct_holdings_change)
        .bind(cluster_version)
        .bind(&now)
        .execute(pool)
        .await?;

        for &idx in &cluster.member_indexes {
            let member = &candidates[idx];
            sqlx::query(
                r#"
                INSERT INTO cluster_members (cluster_id, issuer_cik, owner_key, accession_number, side, trade_date, dollars_contributed, pct_holdings_change)
                VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
                "#,
            )
            .bind(&cluster.cluster_id)
            .bind(&member.issuer_cik)
            .bind(&member.owner_key)
            .bind(&member.accession_number)
            .bind(side_col)
            .bind(&member.trade_date)
            .bind(member.dollars)
            .bind(member.pct_holdings_change)
            .execute(pool)
            .await?;

            let update_query = format!(
                "UPDATE insider_events SET cluster_flag_{side_col} = 1, cluster_id_{side_col} = $1 WHERE issuer_cik = $2 AND owner_key = $3 AND accession_number = $4"
            );
            sqlx::query(&update_query)
                .bind(&cluster.cluster_id)
                .bind(&member.issuer_cik)
                .bind(&member.owner_key)
                .bind(&member.accession_number)
                .execute(pool)
                .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(accession: &str, date: &str, dollars: f64, is_exec: bool) -> Candidate {
        Candidate {
            issuer_cik: "0000000001".to_string(),
            owner_key: format!("owner-{accession}"),
            accession_number: accession.to_string(),
            trade_date: date.to_string(),
            dollars,
            is_exec,
            pct_holdings_change: None,
        }
    }

    #[test]
    fn fewer_than_two_candidates_never_cluster() {
        let candidates = vec![candidate("a", "2024-01-01", 1000.0, false)];
        assert!(sweep_clusters("ACME", Side::Buy, &candidates).is_empty());
    }

    #[test]
    fn two_filings_within_window_form_one_cluster() {
        let candidates = vec![
            candidate("a", "2024-01-01", 1000.0, false),
            candidate("b", "2024-01-10", 2000.0, true),
        ];
        let clusters = sweep_clusters("ACME", Side::Buy, &candidates);
        assert_eq!(clusters.len(), 1);
        let c = &clusters[0];
        assert_eq!(c.unique_insiders, 2);
        assert_eq!(c.total_dollars, 3000.0);
        assert!(c.execs_involved);
        assert_eq!(c.window_start, "2024-01-01");
        assert_eq!(c.window_end, "2024-01-10");
    }

    #[test]
    fn filings_outside_window_do_not_cluster() {
        let candidates = vec![
            candidate("a", "2024-01-01", 1000.0, false),
            candidate("b", "2024-02-01", 2000.0, false),
        ];
        assert!(sweep_clusters("ACME", Side::Buy, &candidates).is_empty());
    }

    #[test]
    fn third_candidate_inside_window_advances_without_skipping() {
        let candidates = vec![
            candidate("a", "2024-01-01", 1000.0, false),
            candidate("b", "2024-01-20", 1000.0, false),
            candidate("c", "2024-01-25", 1000.0, false),
        ];
        let clusters = sweep_clusters("ACME", Side::Buy, &candidates);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].unique_insiders, 2);
        assert_eq!(clusters[0].window_start, "2024-01-20");
    }

    #[test]
    fn same_accession_dollars_are_deduped_by_max_not_summed() {
        let mut candidates = vec![
            candidate("a", "2024-01-01", 1000.0, false),
            candidate("a", "2024-01-02", 5000.0, false),
            candidate("b", "2024-01-03", 2000.0, false),
        ];
        candidates.sort_by(|a, b| a.trade_date.cmp(&b.trade_date));
        let clusters = sweep_clusters("ACME", Side::Buy, &candidates);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].total_dollars, 7000.0);
        assert_eq!(clusters[0].unique_insiders, 2);
    }

    #[test]
    fn cluster_id_is_deterministic_and_side_scoped() {
        let candidates = vec![
            candidate("a", "2024-01-01", 1000.0, false),
            candidate("b", "2024-01-10", 2000.0, false),
        ];
        let buy = sweep_clusters("ACME", Side::Buy, &candidates);
        let sell = sweep_clusters("ACME", Side::Sell, &candidates);
        assert_ne!(buy[0].cluster_id, sell[0].cluster_id);
        assert!(buy[0].cluster_id.starts_with("clu|ACME|buy|"));
    }
}
