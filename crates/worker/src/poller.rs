//! Optional Form 4 poller: periodically scrapes EDGAR's "current Form 4" Atom feed
//! and enqueues a fetch job for every new accession belonging to a tracked issuer
//! (one already present in `issuer_master` with a current ticker) that hasn't been
//! ingested yet. Only this path ever sets `ai_requested=true` — backfill and reparse
//! chains deliberately do not, to avoid flooding the AI adapter on bulk historical
//! loads.

use crate::runtime::WorkerContext;
use insider_core::time::utcnow_iso;
use job_queue::EnqueueRequest;
use serde_json::json;
use sqlx::PgPool;
use std::collections::HashSet;
use std::time::Duration;

/// Pulls `accession-number=...` and the owning CIK out of each Atom `<entry>` in the
/// "current Form 4" feed. The feed embeds both in the entry id/link rather than as
/// distinct structured fields, so this is a small tolerant scan rather than a real
/// XML parse — matching how the SEC gateway already treats HTML/TXT filing wrappers.
fn extract_feed_entries(atom_text: &str) -> Vec<(String, Option<String>)> {
    let mut out = Vec::new();
    for entry_block in atom_text.split("<entry>").skip(1) {
        let entry_block = entry_block.split("</entry>").next().unwrap_or(entry_block);
        let Some(acc) = extract_between(entry_block, "accession-number=", |c| !(c.is_ascii_digit() || c == '-')) else {
            continue;
        };
        let cik = extract_between(entry_block, "/data/", |c| !c.is_ascii_digit());
        out.push((acc, cik));
    }
    out
}

fn extract_between(text: &str, marker: &str, is_terminator: impl Fn(char) -> bool) -> Option<String> {
    let start = text.find(marker)? + marker.len();
    let rest = &text[start..];
    let end = rest.find(is_terminator).unwrap_or(rest.len());
    let candidate = &rest[..end];
    if candidate.is_empty() {
        None
    } else {
        Some(candidate.to_string())
    }
}

pub async fn run_poller_loop(ctx: WorkerContext) {
    let interval = Duration::from_secs(ctx.cfg.form4_poller_interval_seconds.max(1));
    let mut seen: HashSet<String> = HashSet::new();

    loop {
        match tick(&ctx, &mut seen).await {
            Ok(n) if n > 0 => tracing::info!(new_accessions = n, "poller tick enqueued new filings"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "poller tick failed"),
        }
        tokio::time::sleep(interval).await;
    }
}

/// Tracked issuers are those present in `issuer_master` with a non-empty
/// `current_ticker` — this keeps the poller scoped to the operator's tracked
/// universe instead of every filer on EDGAR.
async fn tracked_issuer_ciks(pool: &PgPool) -> anyhow::Result<HashSet<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT issuer_cik FROM issuer_master WHERE current_ticker IS NOT NULL AND current_ticker <> ''")
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(cik,)| cik).collect())
}

async fn filing_already_ingested(pool: &PgPool, accession_number: &str) -> anyhow::Result<bool> {
    let row: Option<(i32,)> =
        sqlx::query_as("SELECT 1 FROM filings WHERE accession_number = $1 LIMIT 1").bind(accession_number).fetch_optional(pool).await?;
    Ok(row.is_some())
}

async fn tick(ctx: &WorkerContext, seen: &mut HashSet<String>) -> anyhow::Result<usize> {
    let body = ctx.sec.fetch_raw_text(&ctx.cfg.form4_poller_feed_url).await?;
    let entries = extract_feed_entries(&body);

    let tracked = tracked_issuer_ciks(&ctx.pool).await?;
    let mut enqueued = 0;

    if !tracked.is_empty() {
        for (accession_number, issuer_cik) in entries {
            if !seen.insert(accession_number.clone()) {
                continue;
            }
            let Some(issuer_cik) = issuer_cik.as_deref().and_then(owner_identity::normalize_cik) else { continue };
            if !tracked.contains(&issuer_cik) {
                continue;
            }
            if filing_already_ingested(&ctx.pool, &accession_number).await? {
                continue;
            }

            ctx.queue
                .enqueue(
                    EnqueueRequest::new(
                        "FETCH_ACCESSION_DOCS",
                        format!("FETCH|{accession_number}"),
                        json!({
                            "accession_number": accession_number,
                            "issuer_cik": issuer_cik,
                            "ai_requested": true,
                        }),
                    )
                    .priority(120),
                )
                .await?;
            enqueued += 1;
        }
    }

    insider_core::app_config::upsert(&ctx.pool, "form4_poller_last_run_utc", &utcnow_iso()).await?;
    Ok(enqueued)
}
