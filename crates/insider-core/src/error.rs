use thiserror::Error;

/// Shared error type for the compute pipeline (aggregator, trend/outcomes/stats/cluster
/// engines, job queue callers). Job handlers map this onto queue error/defer semantics;
/// it is not used for HTTP-facing errors (see `api-server::AppError`).
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("dependency not ready: {0}")]
    Deferred(String),

    #[error("missing event: {0}")]
    MissingEvent(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("external request failed: {0}")]
    Request(String),

    #[error("unknown job type: {0}")]
    UnknownJobType(String),

    #[error("{0}")]
    Other(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
