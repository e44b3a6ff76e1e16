//! Error types for Care Assist.

use std::time::Duration;

/// Top-level error type for the assistant.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Assessment error: {0}")]
    Assessment(#[from] AssessmentError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Version conflict on {entity} {id}: expected {expected}, found {found}")]
    VersionConflict {
        entity: String,
        id: String,
        expected: i64,
        found: i64,
    },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Crisis / condition classification errors.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Classifier unavailable: {0}")]
    Unavailable(String),

    #[error("Classifier timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unparseable classifier output: {0}")]
    Parse(String),

    #[error("Empty input text")]
    EmptyInput,

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Questionnaire / assessment session errors.
#[derive(Debug, thiserror::Error)]
pub enum AssessmentError {
    #[error("Unknown questionnaire: {0}")]
    UnknownQuestionnaire(String),

    #[error("Cannot transition assessment from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Assessment is {status}; no further answers are accepted")]
    Closed { status: String },

    #[error("Invalid answer for question {question}: {reason}")]
    InvalidAnswer { question: usize, reason: String },

    #[error("Could not tell whether you want to take the assessment: {0}")]
    InvalidConsent(String),

    #[error("Assessment is not complete ({answered}/{required} answered)")]
    Incomplete { answered: usize, required: usize },
}

/// Knowledge retrieval errors.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Retrieval backend unavailable: {0}")]
    Unavailable(String),

    #[error("Retrieval timed out after {0:?}")]
    Timeout(Duration),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Recommendation synthesis errors.
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Generation returned no usable text")]
    EmptyOutput,

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Empty message text")]
    EmptyInput,

    #[error("Invalid turn stage transition: {from} -> {to}")]
    InvalidStage { from: String, to: String },

    #[error("Session store error: {0}")]
    Session(#[from] DatabaseError),

    #[error("Assessment error: {0}")]
    Assessment(#[from] AssessmentError),
}

/// Result type alias for the assistant.
pub type Result<T> = std::result::Result<T, Error>;
