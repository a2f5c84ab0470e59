//! Error taxonomy for interception, component wiring and the HTTP surface
//!
//! This module provides:
//! - `WeaverError`, the typed failures raised by the registries and services
//! - `ErrorCode`, a stable code per failure with a metrics category
//! - Classification helpers for errors that arrive as `anyhow::Error`
//!
//! Library operations return `WeaverError` wrapped in `anyhow::Error` when
//! they sit on a path that also carries arbitrary advice/body failures.
//! Callers recover the typed error with `downcast_ref::<WeaverError>()`.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Boxed failure carried as the source of wrapping errors
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// =============================================================================
// ERROR CODES
// =============================================================================

/// Stable error codes, one per `WeaverError` variant plus a catch-all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// A pointcut rule was empty or did not parse
    InvalidRule,
    /// No factory for a component had a matching condition
    UnsatisfiedCondition,
    /// Retry advice ran out of attempts
    RetryExhausted,
    /// No factory registered under the requested name
    ComponentNotFound,
    /// A component was realized but is not of the requested type
    ComponentTypeMismatch,
    /// A component depends on itself through its factories
    CircularDependency,
    /// The current principal lacks a required role
    AccessDenied,
    /// Request payload failed validation
    Validation,
    /// A requested resource does not exist
    NotFound,
    /// The request conflicts with existing state
    Conflict,
    /// Anything else
    Internal,
}

impl ErrorCode {
    /// Get the error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRule | ErrorCode::Validation => "validation_error",
            ErrorCode::UnsatisfiedCondition
            | ErrorCode::ComponentNotFound
            | ErrorCode::ComponentTypeMismatch
            | ErrorCode::CircularDependency => "wiring_error",
            ErrorCode::RetryExhausted => "retry_exhausted",
            ErrorCode::AccessDenied => "access_denied",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Conflict => "conflict",
            ErrorCode::Internal => "server_error",
        }
    }

    /// HTTP status used when the error escapes through the server
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidRule | ErrorCode::Validation => StatusCode::BAD_REQUEST,
            ErrorCode::AccessDenied => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::RetryExhausted => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::UnsatisfiedCondition
            | ErrorCode::ComponentNotFound
            | ErrorCode::ComponentTypeMismatch
            | ErrorCode::CircularDependency
            | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// =============================================================================
// WEAVER ERROR
// =============================================================================

/// A single field that failed validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Typed failures raised by the registries, aspects and services
#[derive(Debug, Error)]
pub enum WeaverError {
    /// Rule string is empty or malformed
    #[error("invalid rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },

    /// No factory for the component had a matching condition
    #[error("no factory for component '{name}' matched: {}", reasons.join("; "))]
    UnsatisfiedCondition { name: String, reasons: Vec<String> },

    /// All retry attempts failed; `source` is the last failure
    #[error("operation '{operation}' failed after {attempts} attempts")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: BoxError,
    },

    /// No factory registered under the name
    #[error("component not found: {name}")]
    ComponentNotFound { name: String },

    /// Component exists but has another type
    #[error("component '{name}' is not a {expected}")]
    ComponentTypeMismatch { name: String, expected: &'static str },

    /// Resolution chain loops back on itself
    #[error("circular dependency detected: {}", chain.join(" -> "))]
    CircularDependency { chain: Vec<String> },

    /// Principal does not hold any of the required roles
    #[error("access denied to '{operation}'; required roles: {}", required.join(", "))]
    AccessDenied {
        operation: String,
        required: Vec<String>,
    },

    /// Payload failed validation
    #[error("validation failed: {}", describe_fields(fields))]
    Validation { fields: Vec<FieldError> },

    /// Resource lookup failed
    #[error("{resource} not found with {field}: {value}")]
    NotFound {
        resource: String,
        field: String,
        value: String,
    },

    /// Request conflicts with current state
    #[error("{message}")]
    Conflict { message: String },
}

fn describe_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{} {}", f.field, f.message))
        .collect::<Vec<_>>()
        .join(", ")
}

impl WeaverError {
    pub fn invalid_rule(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRule {
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    pub fn retry_exhausted(
        operation: impl Into<String>,
        attempts: u32,
        last: anyhow::Error,
    ) -> Self {
        Self::RetryExhausted {
            operation: operation.into(),
            attempts,
            source: last.into(),
        }
    }

    pub fn component_not_found(name: impl Into<String>) -> Self {
        Self::ComponentNotFound { name: name.into() }
    }

    pub fn not_found(
        resource: impl Into<String>,
        field: impl Into<String>,
        value: impl fmt::Display,
    ) -> Self {
        Self::NotFound {
            resource: resource.into(),
            field: field.into(),
            value: value.to_string(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            fields: vec![FieldError {
                field: field.into(),
                message: message.into(),
            }],
        }
    }

    /// The stable code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            WeaverError::InvalidRule { .. } => ErrorCode::InvalidRule,
            WeaverError::UnsatisfiedCondition { .. } => ErrorCode::UnsatisfiedCondition,
            WeaverError::RetryExhausted { .. } => ErrorCode::RetryExhausted,
            WeaverError::ComponentNotFound { .. } => ErrorCode::ComponentNotFound,
            WeaverError::ComponentTypeMismatch { .. } => ErrorCode::ComponentTypeMismatch,
            WeaverError::CircularDependency { .. } => ErrorCode::CircularDependency,
            WeaverError::AccessDenied { .. } => ErrorCode::AccessDenied,
            WeaverError::Validation { .. } => ErrorCode::Validation,
            WeaverError::NotFound { .. } => ErrorCode::NotFound,
            WeaverError::Conflict { .. } => ErrorCode::Conflict,
        }
    }

    /// Field errors carried by validation failures
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            WeaverError::Validation { fields } => fields,
            _ => &[],
        }
    }
}

/// Result type for registry operations
pub type WeaverResult<T> = std::result::Result<T, WeaverError>;

// =============================================================================
// CLASSIFICATION
// =============================================================================

/// Error code for an arbitrary `anyhow::Error`, looking through its chain
pub fn error_code(error: &anyhow::Error) -> ErrorCode {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<WeaverError>())
        .map(WeaverError::code)
        .unwrap_or(ErrorCode::Internal)
}

/// Classify error type for metrics labels
///
/// Typed errors use their category; anything else falls back to message
/// heuristics so demo failures still land in a useful bucket.
pub fn classify_error(error: &anyhow::Error) -> &'static str {
    let code = error_code(error);
    if code != ErrorCode::Internal {
        return code.category();
    }

    let error_str = error.to_string().to_lowercase();
    if error_str.contains("not found") {
        "not_found"
    } else if error_str.contains("timeout") || error_str.contains("timed out") {
        "timeout"
    } else if error_str.contains("permission") || error_str.contains("denied") {
        "permission_denied"
    } else if error_str.contains("invalid") || error_str.contains("illegal") {
        "invalid_input"
    } else {
        "unknown"
    }
}
