//! Shared worker context and the poll/claim/execute/record loop.

use crate::dispatch::{self, JobOutcome};
use crate::WorkerRole;
use ai_adapter::GeminiClient;
use insider_core::Config;
use job_queue::JobQueue;
use market_data_gateway::EodhdClient;
use sec_gateway::SecGateway;
use sqlx::PgPool;
use std::time::Duration;

/// Everything a job handler needs: the DB pool, the queue it runs on, config, and
/// one client per external collaborator. Cheap to clone — every field is itself a
/// cheap handle (`PgPool`, `reqwest::Client`) wrapped in `Arc` internally.
#[derive(Clone)]
pub struct WorkerContext {
    pub pool: PgPool,
    pub cfg: Config,
    pub queue: JobQueue,
    pub sec: SecGateway,
    pub eodhd: EodhdClient,
    pub gemini: GeminiClient,
}

impl WorkerContext {
    pub fn new(pool: PgPool, cfg: Config) -> Self {
        let queue = JobQueue::new(pool.clone());
        let sec = SecGateway::new(cfg.sec_user_agent.clone(), cfg.sec_min_interval_seconds);
        let eodhd = EodhdClient::new(cfg.eodhd_base_url.clone(), cfg.eodhd_api_key.clone().unwrap_or_default());
        let gemini = GeminiClient::new(
            cfg.gemini_base_url.clone(),
            cfg.gemini_model.clone(),
            cfg.gemini_api_key.clone().unwrap_or_default(),
            cfg.ai_max_tokens,
        );
        Self { pool, cfg, queue, sec, eodhd, gemini }
    }
}

/// Default backoff applied to a transient error when a handler doesn't specify one.
const DEFAULT_ERROR_RETRY_SECONDS: i64 = 60;
/// Default delay applied to a dependency-not-ready deferral.
const DEFAULT_DEFER_RETRY_SECONDS: i64 = 15;

pub async fn run_loop(ctx: WorkerContext, role: WorkerRole) -> anyhow::Result<()> {
    let allowed = dispatch::allowed_job_types_for_role(role);
    let poll_interval = Duration::from_secs_f64(ctx.cfg.worker_poll_seconds.max(0.01));

    loop {
        let claimed = match ctx.queue.claim_next(Some(&allowed)).await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "claim_next failed");
                tokio::time::sleep(poll_interval).await;
                continue;
            }
        };

        let Some(job) = claimed else {
            tokio::time::sleep(poll_interval).await;
            continue;
        };

        tracing::info!(job_id = job.job_id, job_type = %job.job_type, dedupe_key = %job.dedupe_key, "claimed job");

        let outcome = dispatch::dispatch(&ctx, &job).await;

        let result = match outcome {
            JobOutcome::Success => ctx.queue.mark_success(job.job_id).await,
            JobOutcome::Deferred { reason, retry_after_seconds } => {
                tracing::info!(job_id = job.job_id, reason = %reason, "job deferred");
                ctx.queue
                    .mark_deferred(job.job_id, &reason, retry_after_seconds.unwrap_or(DEFAULT_DEFER_RETRY_SECONDS))
                    .await
            }
            JobOutcome::Error { message, retry_after_seconds } => {
                tracing::warn!(job_id = job.job_id, error = %message, "job error");
                ctx.queue
                    .mark_error(job.job_id, &message, retry_after_seconds.unwrap_or(DEFAULT_ERROR_RETRY_SECONDS))
                    .await
            }
        };

        if let Err(e) = result {
            tracing::error!(job_id = job.job_id, error = %e, "failed to record job outcome");
        }
    }
}
