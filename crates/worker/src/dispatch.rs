//! Maps a claimed job's `job_type` onto its handler and normalizes the handler's
//! result into the three queue-facing outcomes: success, deferred, or error.

use crate::handlers;
use crate::runtime::WorkerContext;
use crate::WorkerRole;
use insider_core::PipelineError;
use job_queue::models::ClaimedJob;

pub enum JobOutcome {
    Success,
    Deferred { reason: String, retry_after_seconds: Option<i64> },
    Error { message: String, retry_after_seconds: Option<i64> },
}

impl JobOutcome {
    fn from_pipeline_result(result: Result<(), PipelineError>) -> Self {
        match result {
            Ok(()) => JobOutcome::Success,
            Err(PipelineError::Deferred(reason)) => JobOutcome::Deferred { reason, retry_after_seconds: None },
            Err(e) => JobOutcome::Error { message: e.to_string(), retry_after_seconds: None },
        }
    }
}

/// I/O-bound job types: everything that makes an outbound network call, plus
/// backfill discovery/batching (which is mostly bookkeeping but paced by how fast
/// the SEC gateway can be polled).
const IO_JOB_TYPES: &[&str] = &[
    "FETCH_ACCESSION_DOCS",
    "INGEST_ACCESSION",
    "FETCH_EOD_PRICES_FOR_ISSUER",
    "FETCH_MARKET_CAP_FOR_TICKER",
    "FETCH_NEWS_FOR_TICKER",
    "FETCH_BENCHMARK_PRICES",
    "BACKFILL_DISCOVER_ISSUER",
    "BACKFILL_ENQUEUE_BATCH",
];

/// CPU/DB-bound job types: parsing, aggregation, every quant engine, and the AI
/// adapter (the LLM call blocks the worker thread but does no SEC/vendor polling).
const COMPUTE_JOB_TYPES: &[&str] = &[
    "PARSE_ACCESSION_DOCS",
    "AGGREGATE_ACCESSION",
    "COMPUTE_TREND_FOR_EVENT",
    "COMPUTE_OUTCOMES_FOR_EVENT",
    "COMPUTE_STATS_FOR_OWNER_ISSUER",
    "COMPUTE_CLUSTERS_FOR_TICKER",
    "RUN_AI_FOR_EVENT",
    "REPARSE_TICKER",
];

pub fn allowed_job_types_for_role(role: WorkerRole) -> Vec<&'static str> {
    match role {
        WorkerRole::Io => IO_JOB_TYPES.to_vec(),
        WorkerRole::Compute => COMPUTE_JOB_TYPES.to_vec(),
    }
}

pub async fn dispatch(ctx: &WorkerContext, job: &ClaimedJob) -> JobOutcome {
    let result = match job.job_type.as_str() {
        // INGEST_ACCESSION is an older operator-facing alias for the same fetch job.
        "FETCH_ACCESSION_DOCS" | "INGEST_ACCESSION" => handlers::fetch::handle(ctx, &job.payload).await,
        "PARSE_ACCESSION_DOCS" => handlers::parse::handle(ctx, &job.payload).await,
        "AGGREGATE_ACCESSION" => handlers::aggregate::handle(ctx, &job.payload).await,
        "FETCH_EOD_PRICES_FOR_ISSUER" => handlers::market::handle_fetch_prices(ctx, &job.payload).await,
        "FETCH_MARKET_CAP_FOR_TICKER" => handlers::market::handle_fetch_market_cap(ctx, &job.payload).await,
        "FETCH_NEWS_FOR_TICKER" => handlers::market::handle_fetch_news(ctx, &job.payload).await,
        "FETCH_BENCHMARK_PRICES" => handlers::market::handle_fetch_benchmark(ctx, &job.payload).await,
        "COMPUTE_TREND_FOR_EVENT" => handlers::compute::handle_trend(ctx, &job.payload).await,
        "COMPUTE_OUTCOMES_FOR_EVENT" => handlers::compute::handle_outcomes(ctx, &job.payload).await,
        "COMPUTE_STATS_FOR_OWNER_ISSUER" => handlers::compute::handle_stats(ctx, &job.payload).await,
        "COMPUTE_CLUSTERS_FOR_TICKER" => handlers::compute::handle_clusters(ctx, &job.payload).await,
        "RUN_AI_FOR_EVENT" => return handlers::compute::handle_ai(ctx, &job.payload).await,
        "BACKFILL_DISCOVER_ISSUER" => crate::backfill::handle_discover(ctx, &job.payload).await,
        "BACKFILL_ENQUEUE_BATCH" => crate::backfill::handle_enqueue_batch(ctx, &job.payload).await,
        "REPARSE_TICKER" => handlers::reparse::handle(ctx, &job.payload).await,
        other => Err(PipelineError::UnknownJobType(other.to_string())),
    };

    JobOutcome::from_pipeline_result(result)
}
