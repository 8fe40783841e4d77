//! Error types for qail-etl.

use thiserror::Error;

/// The main error type for compilation and execution.
#[derive(Debug, Error)]
pub enum EtlError {
    /// The request is malformed (missing table or join, bad operand, ...).
    #[error("Validation error: {0}")]
    Validation(String),

    /// No authenticated principal.
    #[error("unauthorized")]
    Unauthorized,

    /// Unknown connection, table or column metadata.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network or authentication failure against the target engine.
    /// The message is generic so topology never leaks to callers.
    #[error("Connection error: {0}")]
    Connection(String),

    /// An operation did not settle before its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The specification cannot be turned into SQL (unresolved alias, alias
    /// collision, invalid constant).
    #[error("Compilation error: {0}")]
    Compilation(String),

    /// The engine rejected the generated SQL, including cast failures.
    #[error("Execution error: {0}")]
    Execution(String),

    /// A preview pipeline step failed.
    #[error("Step '{step}' failed: {cause}")]
    PipelineStep { step: String, cause: String },

    /// The consumer cancelled a batch sequence.
    #[error("Cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EtlError {
    /// Create a pipeline step error.
    pub fn step(step: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::PipelineStep {
            step: step.into(),
            cause: cause.into(),
        }
    }

    /// Status code used at the request boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Compilation(_) => 400,
            Self::Unauthorized => 401,
            Self::NotFound(_) => 404,
            Self::Cancelled => 499,
            Self::Timeout(_) => 504,
            Self::Connection(_)
            | Self::Execution(_)
            | Self::PipelineStep { .. }
            | Self::Config(_)
            | Self::Io(_) => 500,
        }
    }

    /// Message safe to hand back to a caller.
    pub fn public_message(&self) -> String {
        match self {
            Self::Connection(_) => "database unreachable or timed out".to_string(),
            Self::Io(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for EtlError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Configuration(_) => EtlError::Connection(e.to_string()),
            other => EtlError::Execution(other.to_string()),
        }
    }
}

/// Result type alias for qail-etl operations.
pub type EtlResult<T> = Result<T, EtlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EtlError::step("cast:amount", "invalid date 'x'");
        assert_eq!(err.to_string(), "Step 'cast:amount' failed: invalid date 'x'");
        assert_eq!(EtlError::Unauthorized.to_string(), "unauthorized");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(EtlError::Validation("x".into()).status_code(), 400);
        assert_eq!(EtlError::Unauthorized.status_code(), 401);
        assert_eq!(EtlError::NotFound("t".into()).status_code(), 404);
        assert_eq!(EtlError::Execution("e".into()).status_code(), 500);
        assert_eq!(EtlError::Timeout("t".into()).status_code(), 504);
    }

    #[test]
    fn test_connection_message_is_generic() {
        let err = EtlError::Connection("10.0.0.4:5432 refused".into());
        assert_eq!(err.public_message(), "database unreachable or timed out");
    }
}
