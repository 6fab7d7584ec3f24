/// Unified error type for the query service
/// Provides structured error handling with categories for different failure modes
use crate::guard::GuardError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    /// Request body was not valid JSON
    #[error("invalid JSON body: {detail}")]
    BadJson { detail: String },

    /// Request body had no usable question
    #[error("missing question")]
    MissingQuestion,

    /// Service key missing or mismatched on a non-same-origin request
    #[error("unauthorized")]
    Unauthorized,

    /// Candidate SQL rejected by the guard; the offending statement is attached
    #[error("guard rejected statement: {source}")]
    GuardRejection {
        #[source]
        source: GuardError,
        sql: String,
    },

    /// Database could not be reached or the liveness probe failed
    #[error("database unavailable: {message}")]
    DatabaseUnavailable { message: String },

    /// Declared schema does not match the live database at startup
    #[error("schema mismatch: {detail}")]
    SchemaMismatch { detail: String },

    /// An LLM call failed at the given pipeline stage
    #[error("LLM failure during {stage}: {message}")]
    LlmFailure { stage: &'static str, message: String },

    /// The model reply could not be parsed into a plan
    #[error("could not parse planner reply")]
    PlannerParse { raw: String },

    /// Statement execution failed with an unrecoverable driver error
    #[error("execution error: {message}")]
    Execution { message: String, sql: String },

    /// The single planner retry also failed to execute
    #[error("retry exhausted: {message}")]
    RetryExhausted { message: String, sql: String },

    /// The per-request deadline expired
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// Internal errors: should never happen, indicates bug
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ServiceError {
    pub fn database_unavailable(message: impl Into<String>) -> Self {
        Self::DatabaseUnavailable {
            message: message.into(),
        }
    }

    pub fn schema_mismatch(detail: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            detail: detail.into(),
        }
    }

    pub fn llm_failure(stage: &'static str, message: impl Into<String>) -> Self {
        Self::LlmFailure {
            stage,
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            sql: sql.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Short stable identifier for response bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadJson { .. } => "bad_json",
            Self::MissingQuestion => "missing_question",
            Self::Unauthorized => "unauthorized",
            Self::GuardRejection { .. } => "guard_rejection",
            Self::DatabaseUnavailable { .. } => "database_unavailable",
            Self::SchemaMismatch { .. } => "schema_mismatch",
            Self::LlmFailure { .. } => "llm_failure",
            Self::PlannerParse { .. } => "planner_parse_error",
            Self::Execution { .. } => "execution_error",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::DeadlineExceeded => "request_deadline_exceeded",
            Self::Internal { .. } => "internal",
        }
    }

    /// HTTP status the web layer should answer with
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadJson { .. } | Self::MissingQuestion | Self::GuardRejection { .. } => 400,
            Self::Unauthorized => 401,
            Self::DeadlineExceeded => 504,
            _ => 500,
        }
    }

    /// Candidate SQL attached to the failure, if any
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::GuardRejection { sql, .. }
            | Self::Execution { sql, .. }
            | Self::RetryExhausted { sql, .. } => Some(sql),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ServiceError::MissingQuestion.http_status(), 400);
        assert_eq!(ServiceError::Unauthorized.http_status(), 401);
        assert_eq!(ServiceError::DeadlineExceeded.http_status(), 504);
        assert_eq!(
            ServiceError::database_unavailable("refused").http_status(),
            500
        );
        assert_eq!(
            ServiceError::GuardRejection {
                source: GuardError::MultiStatement,
                sql: "SELECT 1; SELECT 2".to_string(),
            }
            .http_status(),
            400
        );
    }

    #[test]
    fn test_sql_attachment() {
        let err = ServiceError::execution("boom", "SELECT 1");
        assert_eq!(err.sql(), Some("SELECT 1"));
        assert_eq!(ServiceError::MissingQuestion.sql(), None);
    }
}
