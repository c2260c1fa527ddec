//! Error types for the auditor.

use thiserror::Error;

/// Result alias used across the auditor crates.
pub type AuditorResult<T> = Result<T, AuditorError>;

/// Errors raised by the registry, ledger, and aggregation layers.
#[derive(Debug, Clone, Error)]
pub enum AuditorError {
    /// Malformed or inconsistent input
    #[error("Validation error: {message}")]
    Validation {
        /// Human-readable description
        message: String,
        /// Offending field, if known
        field: Option<String>,
    },

    /// Bad credentials, or an unknown or inactive virtual key
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Authenticated but not allowed to touch the resource
    #[error("Not authorized: {0}")]
    Forbidden(String),

    /// Unknown identifier
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Resource kind (e.g. "Virtual key")
        resource: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// A proposed charge would breach the key's monthly cap
    #[error(
        "Monthly budget cap of ${cap:.2} exceeded: spent ${current_spend:.4}, projected ${projected_cost:.4}"
    )]
    BudgetExceeded {
        /// Virtual key the charge was attempted against
        virtual_key_id: i64,
        /// Month-to-date spend plus outstanding reservations
        current_spend: f64,
        /// Cost of the proposed call
        projected_cost: f64,
        /// Configured monthly cap
        cap: f64,
    },

    /// Unique constraint violated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Persistence layer failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuditorError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Validation {
            message: message.into(),
            field: field.map(String::from),
        }
    }

    /// Create an authentication error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Create a forbidden error
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    /// Create a not-found error
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable machine-readable code for API responses
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::Auth(_) => "authentication_error",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound { .. } => "not_found",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::Conflict(_) => "conflict",
            Self::Storage(_) => "storage_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether the caller caused this error
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Storage(_) | Self::Internal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuditorError::not_found("Virtual key", 42);
        assert_eq!(err.to_string(), "Virtual key not found: 42");

        let err = AuditorError::validation("name must not be empty", Some("name"));
        assert!(err.to_string().contains("name must not be empty"));
    }

    #[test]
    fn test_budget_exceeded_message() {
        let err = AuditorError::BudgetExceeded {
            virtual_key_id: 1,
            current_spend: 9.5,
            projected_cost: 1.0,
            cap: 10.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("$10.00"));
        assert!(msg.contains("9.5000"));
        assert_eq!(err.error_code(), "budget_exceeded");
    }

    #[test]
    fn test_client_error_classification() {
        assert!(AuditorError::auth("bad key").is_client_error());
        assert!(AuditorError::forbidden("nope").is_client_error());
        assert!(!AuditorError::storage("disk full").is_client_error());
        assert!(!AuditorError::internal("bug").is_client_error());
    }
}
