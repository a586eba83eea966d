//! Error types for the stock & news assistant

use thiserror::Error;

/// Result type alias for assistant operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Specialist Errors
    // =============================

    #[error("Malformed query: {0}")]
    MalformedQuery(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Classification ambiguous: {0}")]
    ClassificationAmbiguous(String),

    // =============================
    // Turn Errors
    // =============================

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Turn cancelled")]
    Cancelled,

    #[error("State error: {0}")]
    StateError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestrationError {
    /// Map a driver error onto the collaborator taxonomy.
    ///
    /// Pool and socket failures are transient and eligible for one retry;
    /// everything else is reported as the store being unavailable.
    pub fn from_store(context: &str, error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Tls(_) => {
                OrchestrationError::ConnectionError(format!("{}: {}", context, error))
            }
            sqlx::Error::RowNotFound => OrchestrationError::NotFound(context.to_string()),
            other => OrchestrationError::ServiceUnavailable(format!("{}: {}", context, other)),
        }
    }

    /// Whether the error is a transient connectivity failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, OrchestrationError::ConnectionError(_))
    }
}
