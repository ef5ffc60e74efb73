use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("job not found: {0}")]
    NotFound(i64),
}

pub type QueueResult<T> = Result<T, QueueError>;
