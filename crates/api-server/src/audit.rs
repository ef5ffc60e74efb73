//! Tamper-evident audit log: every admin enqueue action is recorded with a SHA-256
//! hash chaining each entry to the one before it, so a tampered or deleted row is
//! detectable by replaying the chain.

use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::sync::LazyLock;
use tokio::sync::Mutex;

/// Serializes audit writes so two concurrent admin actions can't race on the hash chain.
static AUDIT_WRITE_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

pub async fn log_audit(
    pool: &PgPool,
    event_type: &str,
    ticker: Option<&str>,
    action: Option<&str>,
    details: Option<&str>,
    user_id: &str,
) {
    let _guard = AUDIT_WRITE_LOCK.lock().await;

    let result: Result<(), sqlx::Error> = async {
        let mut tx = pool.begin().await?;

        let prev: Option<(String,)> =
            sqlx::query_as("SELECT entry_hash FROM audit_log ORDER BY sequence_number DESC LIMIT 1")
                .fetch_optional(&mut *tx)
                .await?;
        let prev_hash = prev.map(|(h,)| h).unwrap_or_default();

        let timestamp = insider_core::time::utcnow_iso();
        let entry_hash =
            compute_entry_hash(&prev_hash, event_type, ticker.unwrap_or(""), action.unwrap_or(""), details.unwrap_or(""), &timestamp);

        sqlx::query(
            r#"
            INSERT INTO audit_log (event_type, ticker, action, details, user_id, prev_hash, entry_hash, created_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            "#,
        )
        .bind(event_type)
        .bind(ticker)
        .bind(action)
        .bind(details)
        .bind(user_id)
        .bind(&prev_hash)
        .bind(&entry_hash)
        .bind(&timestamp)
        .execute(&mut *tx)
        .await?;

        tx.commit().await
    }
    .await;

    if let Err(e) = result {
        tracing::warn!(error = %e, event_type, "failed to write audit log entry");
    }
}

fn compute_entry_hash(prev_hash: &str, event_type: &str, ticker: &str, action: &str, details: &str, timestamp: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [prev_hash, event_type, ticker, action, details, timestamp] {
        hasher.update(part.as_bytes());
        hasher.update(b"|");
    }
    hex::encode(hasher.finalize())
}

#[derive(sqlx::FromRow)]
struct AuditChainEntry {
    sequence_number: i64,
    event_type: String,
    #[sqlx(default)]
    ticker: String,
    #[sqlx(default)]
    action: String,
    #[sqlx(default)]
    details: String,
    created_at: String,
    prev_hash: String,
    entry_hash: String,
}

#[derive(serde::Serialize)]
pub struct AuditChainVerification {
    pub is_valid: bool,
    pub total_entries: i64,
    pub first_broken_sequence: Option<i64>,
    pub message: String,
}

/// Walks the chain in sequence order and recomputes every hash, used by an operator
/// to confirm the audit log hasn't been tampered with or had rows deleted.
pub async fn verify_audit_chain(pool: &PgPool) -> Result<AuditChainVerification, sqlx::Error> {
    let entries: Vec<AuditChainEntry> = sqlx::query_as(
        "SELECT sequence_number, event_type, ticker, action, details, created_at, prev_hash, entry_hash FROM audit_log ORDER BY sequence_number ASC",
    )
    .fetch_all(pool)
    .await?;

    if entries.is_empty() {
        return Ok(AuditChainVerification {
            is_valid: true,
            total_entries: 0,
            first_broken_sequence: None,
            message: "no audit entries yet".to_string(),
        });
    }

    let mut expected_prev = String::new();
    for entry in &entries {
        if entry.prev_hash != expected_prev {
            return Ok(AuditChainVerification {
                is_valid: false,
                total_entries: entries.len() as i64,
                first_broken_sequence: Some(entry.sequence_number),
                message: format!("chain broken at sequence {}", entry.sequence_number),
            });
        }

        let recomputed = compute_entry_hash(&entry.prev_hash, &entry.event_type, &entry.ticker, &entry.action, &entry.details, &entry.created_at);
        if recomputed != entry.entry_hash {
            return Ok(AuditChainVerification {
                is_valid: false,
                total_entries: entries.len() as i64,
                first_broken_sequence: Some(entry.sequence_number),
                message: format!("hash mismatch at sequence {}", entry.sequence_number),
            });
        }

        expected_prev = entry.entry_hash.clone();
    }

    Ok(AuditChainVerification { is_valid: true, total_entries: entries.len() as i64, first_broken_sequence: None, message: "chain verified".to_string() })
}
