//! Fault types for the parameter mapping service
//!
//! Every failure that leaves the crate is a [`MappingError`]. Each variant carries an
//! explicit classification (retryable, breaker-relevant, sentinel) so the resilience
//! layer dispatches on variants instead of inspecting messages, and a [`FaultKind`]
//! with a fixed HTTP status class for whatever API layer sits in front of the service.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for mapping operations
pub type Result<T> = std::result::Result<T, MappingError>;

/// Classified faults raised by the mapping service and its resilience layer
#[derive(Error, Debug)]
pub enum MappingError {
    /// Caller supplied invalid input
    #[error("Invalid input: {0}")]
    Validation(String),

    /// The requested mapping does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Key-value backend failed in a way that may succeed on retry
    #[error("Backend error: {0}")]
    Backend(String),

    /// Backend call did not complete in time
    #[error("Backend timed out: {0}")]
    Timeout(String),

    /// The circuit breaker rejected the call without invoking it
    #[error("Circuit breaker is open for {operation}, try again later")]
    BreakerOpen { operation: String },

    /// A transient fault survived every retry attempt
    #[error("Operation {operation} failed after {attempts} attempt(s) in {duration:?}: {source}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        duration: Duration,
        #[source]
        source: Box<MappingError>,
    },

    /// A stored payload could not be decoded
    #[error("Corrupt payload at '{key}': {reason}")]
    Corruption { key: String, reason: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Anything else that is our fault rather than the caller's or the backend's
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Machine-distinguishable fault kind exposed to API layers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Validation,
    NotFound,
    TransientBackend,
    BreakerOpen,
    RetryExhausted,
    Corruption,
    Internal,
}

impl FaultKind {
    /// HTTP status class an API layer must use for this kind
    pub fn status_code(&self) -> u16 {
        match self {
            FaultKind::Validation => 400,
            FaultKind::NotFound => 404,
            FaultKind::TransientBackend | FaultKind::BreakerOpen | FaultKind::RetryExhausted => {
                503
            }
            FaultKind::Corruption | FaultKind::Internal => 500,
        }
    }

    /// Stable identifier used in logs and API bodies
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::Validation => "validation",
            FaultKind::NotFound => "not_found",
            FaultKind::TransientBackend => "transient_backend",
            FaultKind::BreakerOpen => "breaker_open",
            FaultKind::RetryExhausted => "retry_exhausted",
            FaultKind::Corruption => "corruption",
            FaultKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Expected outcome of caller behaviour
    Info,
    /// Degraded but recoverable
    Warning,
    /// Needs attention
    Error,
}

impl MappingError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a transient backend error
    pub fn backend<S: Into<String>>(msg: S) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a breaker-open rejection
    pub fn breaker_open<S: Into<String>>(operation: S) -> Self {
        Self::BreakerOpen {
            operation: operation.into(),
        }
    }

    /// Create a corruption error for the payload stored under `key`
    pub fn corruption<K: Into<String>, R: Into<String>>(key: K, reason: R) -> Self {
        Self::Corruption {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Outward fault kind
    pub fn kind(&self) -> FaultKind {
        match self {
            MappingError::Validation(_) => FaultKind::Validation,
            MappingError::NotFound(_) => FaultKind::NotFound,
            MappingError::Backend(_) | MappingError::Timeout(_) => FaultKind::TransientBackend,
            MappingError::BreakerOpen { .. } => FaultKind::BreakerOpen,
            MappingError::RetryExhausted { .. } => FaultKind::RetryExhausted,
            MappingError::Corruption { .. } => FaultKind::Corruption,
            MappingError::Config(_) | MappingError::Internal(_) => FaultKind::Internal,
        }
    }

    /// HTTP status class for this fault
    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    /// Check if the retrier may attempt the operation again
    pub fn is_retryable(&self) -> bool {
        matches!(self, MappingError::Backend(_) | MappingError::Timeout(_))
    }

    /// Check if this fault counts toward circuit breaker accounting
    pub fn is_breaker_failure(&self) -> bool {
        matches!(self, MappingError::Backend(_) | MappingError::Timeout(_))
    }

    /// Check if this fault was produced by the resilience layer itself
    pub fn is_sentinel(&self) -> bool {
        matches!(
            self,
            MappingError::BreakerOpen { .. } | MappingError::RetryExhausted { .. }
        )
    }

    /// Check if the caller, not the system, is responsible
    pub fn is_caller_fault(&self) -> bool {
        matches!(self, MappingError::Validation(_) | MappingError::NotFound(_))
    }

    /// Innermost fault for wrapped errors
    pub fn root_cause(&self) -> &MappingError {
        match self {
            MappingError::RetryExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self.kind() {
            FaultKind::Validation | FaultKind::NotFound => ErrorSeverity::Info,
            FaultKind::TransientBackend | FaultKind::BreakerOpen | FaultKind::RetryExhausted => {
                ErrorSeverity::Warning
            }
            FaultKind::Corruption | FaultKind::Internal => ErrorSeverity::Error,
        }
    }

    /// Message safe to hand to an external caller
    ///
    /// 500-class faults collapse to a generic message unless `expose_internal` is set.
    pub fn public_message(&self, expose_internal: bool) -> String {
        match self.kind() {
            FaultKind::Corruption | FaultKind::Internal if !expose_internal => {
                "An unexpected internal server error occurred.".to_string()
            }
            FaultKind::BreakerOpen | FaultKind::RetryExhausted if !expose_internal => {
                "Service temporarily unavailable.".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Create a structured error for logging and API responses
    pub fn to_structured_error(&self, operation: Option<&str>) -> StructuredError {
        let kind = self.kind();
        let (attempts, duration_ms) = match self {
            MappingError::RetryExhausted {
                attempts, duration, ..
            } => (Some(*attempts), Some(duration.as_millis() as u64)),
            _ => (None, None),
        };

        StructuredError {
            kind,
            status_code: kind.status_code(),
            message: self.to_string(),
            is_retryable: self.is_retryable(),
            severity: self.severity(),
            operation: operation.map(str::to_string),
            attempts,
            duration_ms,
            root_cause: self.root_cause().to_string(),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Enhanced error representation for production logging and monitoring
#[derive(Debug, Clone, Serialize)]
pub struct StructuredError {
    /// Outward fault kind
    pub kind: FaultKind,
    /// HTTP status class
    pub status_code: u16,
    /// Full error message
    pub message: String,
    /// Whether this error is retryable
    pub is_retryable: bool,
    /// Error severity level
    pub severity: ErrorSeverity,
    /// Operation that was being performed
    pub operation: Option<String>,
    /// Attempts made before giving up
    pub attempts: Option<u32>,
    /// Time spent before giving up
    pub duration_ms: Option<u64>,
    /// Innermost cause
    pub root_cause: String,
    /// Timestamp when error occurred
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Error logging and reporting utilities
pub struct ErrorReporter;

impl ErrorReporter {
    /// Log a structured error with appropriate severity
    pub fn log_error(error: &MappingError, operation: Option<&str>) {
        let structured = error.to_structured_error(operation);

        match structured.severity {
            ErrorSeverity::Error => {
                tracing::error!(
                    kind = %structured.kind,
                    status_code = structured.status_code,
                    operation = structured.operation,
                    root_cause = %structured.root_cause,
                    "Error occurred: {}",
                    structured.message
                );
            }
            ErrorSeverity::Warning => {
                tracing::warn!(
                    kind = %structured.kind,
                    status_code = structured.status_code,
                    operation = structured.operation,
                    attempts = structured.attempts,
                    duration_ms = structured.duration_ms,
                    "Warning: {}",
                    structured.message
                );
            }
            ErrorSeverity::Info => {
                tracing::info!(
                    kind = %structured.kind,
                    status_code = structured.status_code,
                    operation = structured.operation,
                    "Request rejected: {}",
                    structured.message
                );
            }
        }
    }

    /// Format error for API responses
    pub fn format_api_error(error: &MappingError, production: bool) -> serde_json::Value {
        let status_code = error.status_code();

        let mut response = serde_json::json!({
            "status": "error",
            "statusCode": status_code,
            "kind": error.kind(),
            "message": error.public_message(!production),
        });

        if !production {
            response["rootCause"] = serde_json::Value::String(error.root_cause().to_string());
        }

        response
    }
}

impl From<serde_json::Error> for MappingError {
    fn from(err: serde_json::Error) -> Self {
        MappingError::Internal(format!("JSON error: {err}"))
    }
}

impl From<::config::ConfigError> for MappingError {
    fn from(err: ::config::ConfigError) -> Self {
        MappingError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(MappingError::validation("x").status_code(), 400);
        assert_eq!(MappingError::not_found("x").status_code(), 404);
        assert_eq!(MappingError::breaker_open("op").status_code(), 503);
        assert_eq!(MappingError::backend("down").status_code(), 503);
        assert_eq!(MappingError::corruption("ptk:a", "bad").status_code(), 500);
        assert_eq!(MappingError::internal("boom").status_code(), 500);
        assert_eq!(MappingError::config("bad").status_code(), 500);

        let exhausted = MappingError::RetryExhausted {
            operation: "op".into(),
            attempts: 4,
            duration: Duration::from_millis(20),
            source: Box::new(MappingError::backend("down")),
        };
        assert_eq!(exhausted.status_code(), 503);
        assert_eq!(exhausted.kind(), FaultKind::RetryExhausted);
    }

    #[test]
    fn test_classification_flags() {
        assert!(MappingError::backend("x").is_retryable());
        assert!(MappingError::timeout("x").is_breaker_failure());

        for fault in [
            MappingError::validation("x"),
            MappingError::not_found("x"),
            MappingError::corruption("k", "r"),
        ] {
            assert!(!fault.is_retryable(), "{fault} must not be retried");
            assert!(!fault.is_breaker_failure(), "{fault} must not trip the breaker");
        }

        assert!(MappingError::breaker_open("op").is_sentinel());
        assert!(!MappingError::breaker_open("op").is_breaker_failure());
    }

    #[test]
    fn test_root_cause_unwraps_retry_exhausted() {
        let err = MappingError::RetryExhausted {
            operation: "get".into(),
            attempts: 2,
            duration: Duration::from_millis(5),
            source: Box::new(MappingError::timeout("slow")),
        };
        assert!(matches!(err.root_cause(), MappingError::Timeout(_)));

        let structured = err.to_structured_error(Some("get"));
        assert_eq!(structured.attempts, Some(2));
        assert_eq!(structured.duration_ms, Some(5));
    }

    #[test]
    fn test_api_error_hides_internal_detail_in_production() {
        let err = MappingError::corruption("ptk:abc", "expected value at line 1");
        let body = ErrorReporter::format_api_error(&err, true);

        assert_eq!(body["statusCode"], 500);
        assert_eq!(body["kind"], "corruption");
        assert!(!body["message"].as_str().unwrap().contains("ptk:abc"));
        assert!(body.get("rootCause").is_none());

        let dev_body = ErrorReporter::format_api_error(&err, false);
        assert!(dev_body["message"].as_str().unwrap().contains("ptk:abc"));
    }
}
