use thiserror::Error;

/// Errors raised by the pipeline components.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Insufficient history for {symbol}: required {required}, available {available}")]
    InsufficientHistory {
        symbol: String,
        required: usize,
        available: usize,
    },

    #[error("No production model registered for {model_name}")]
    StaleModel { model_name: String },

    #[error("Model {model_name} version {model_version} is already registered")]
    DuplicateVersion {
        model_name: String,
        model_version: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid prediction: {0}")]
    InvalidPrediction(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Malformed data: {0}")]
    MalformedData(String),

    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Decimal error: {0}")]
    Decimal(#[from] rust_decimal::Error),

    #[error("Timestamp parse error: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl PipelineError {
    /// Transient failures are retried by the orchestrator with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::Ingestion(_) | PipelineError::Database(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
