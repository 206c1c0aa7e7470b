//! Error types for the tabular query orchestrator

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Unsafe expression rejected: {0}")]
    UnsafeExpression(String),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Failures raised while parsing or evaluating a generated expression.
///
/// Messages are shown to the end user verbatim, so they name the offending
/// token rather than internal state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("name '{0}' is not defined")]
    UnknownName(String),

    #[error("field '{field}' does not exist (available: {available})")]
    UnknownField { field: String, available: String },

    #[error("'{target}' has no attribute '{name}'")]
    UnknownAttribute { target: String, name: String },

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("index {0} is out of range")]
    IndexOutOfRange(String),

    #[error("{function}() expects {expected}")]
    Arity { function: String, expected: String },
}
