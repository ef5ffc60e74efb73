use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Error => "error",
        }
    }
}

/// A claimed job, as handed to a worker.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClaimedJobRow {
    pub job_id: i64,
    pub job_type: String,
    pub priority: i32,
    pub dedupe_key: String,
    pub payload_json: String,
    pub attempts: i32,
    pub max_attempts: i32,
}

#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job_id: i64,
    pub job_type: String,
    pub priority: i32,
    pub dedupe_key: String,
    pub payload: Value,
    pub attempts: i32,
    pub max_attempts: i32,
}

impl From<ClaimedJobRow> for ClaimedJob {
    fn from(row: ClaimedJobRow) -> Self {
        let payload = serde_json::from_str(&row.payload_json).unwrap_or(Value::Null);
        ClaimedJob {
            job_id: row.job_id,
            job_type: row.job_type,
            priority: row.priority,
            dedupe_key: row.dedupe_key,
            payload,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
        }
    }
}

/// Parameters accepted by `enqueue`. Mirrors the original platform's `enqueue_job`
/// keyword contract so job producers read the same way across engines.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub job_type: String,
    pub dedupe_key: String,
    pub payload: Value,
    pub priority: i32,
    pub max_attempts: i32,
    pub run_after: Option<String>,
    pub requeue_if_exists: bool,
}

impl EnqueueRequest {
    pub fn new(job_type: impl Into<String>, dedupe_key: impl Into<String>, payload: Value) -> Self {
        Self {
            job_type: job_type.into(),
            dedupe_key: dedupe_key.into(),
            payload,
            priority: 100,
            max_attempts: 3,
            run_after: None,
            requeue_if_exists: false,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn run_after(mut self, run_after: impl Into<String>) -> Self {
        self.run_after = Some(run_after.into());
        self
    }

    pub fn requeue_if_exists(mut self, requeue: bool) -> Self {
        self.requeue_if_exists = requeue;
        self
    }
}
