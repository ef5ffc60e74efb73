use thiserror::Error;

#[derive(Error, Debug)]
pub enum AiAdapterError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Gemini request failed with HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Gemini response had no candidates")]
    NoCandidates,

    #[error("Gemini response candidate had no text part")]
    NoTextPart,

    #[error("model output could not be parsed as JSON: {0}")]
    Parse(String),

    #[error("model output failed validation: {0}")]
    Validation(#[from] ai_validation::AiValidationError),

    #[error(transparent)]
    Pipeline(#[from] insider_core::PipelineError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type AiAdapterResult<T> = Result<T, AiAdapterError>;
