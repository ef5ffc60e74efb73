//! Worker process entry point.
//!
//! A single binary plays either the I/O role or the compute role, selected by the
//! `WORKER_ROLE` environment variable (`io` | `compute`, default `io`) or the first
//! CLI argument. Both roles share the same queue and claim protocol; only the set of
//! allowed job types differs (see `dispatch::allowed_job_types_for_role`).

mod backfill;
mod dispatch;
mod handlers;
mod poller;
mod runtime;

use insider_core::Config;
use runtime::WorkerContext;
use sqlx::postgres::PgPoolOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRole {
    Io,
    Compute,
}

impl WorkerRole {
    fn from_env_or_args() -> Self {
        let arg = std::env::args().nth(1);
        let env = std::env::var("WORKER_ROLE").ok();
        match arg.or(env).as_deref() {
            Some("compute") => WorkerRole::Compute,
            _ => WorkerRole::Io,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).json().init();

    let cfg = Config::from_env();
    let role = WorkerRole::from_env_or_args();
    tracing::info!(?role, "starting worker");

    let pool = PgPoolOptions::new().max_connections(10).connect(&cfg.db_dsn).await?;
    insider_core::schema::bootstrap(&pool).await?;

    let ctx = WorkerContext::new(pool, cfg.clone());

    if role == WorkerRole::Io && cfg.enable_form4_poller {
        let poller_ctx = ctx.clone();
        tokio::spawn(async move {
            poller::run_poller_loop(poller_ctx).await;
        });
    }

    runtime::run_loop(ctx, role).await
}
