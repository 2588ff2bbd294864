//! Core error types for sqlcraft.
//!
//! This module provides [`QueryError`], the single error enum shared by the
//! query builder and the SQL compiler. Variants are grouped by the stage that
//! raises them (see [`ErrorCategory`]): builder-time errors leave the
//! descriptor they were raised from intact and usable, compile-time errors
//! abort a compilation without returning partial SQL.
//!
//! An impossible predicate ("no rows") is not an error and therefore has no
//! variant here; the compiler reports it as a distinct outcome.

use thiserror::Error;

/// The stage of the pipeline that raised a [`QueryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Raised while refining a query descriptor.
    Builder,
    /// Raised while rendering SQL.
    Compile,
    /// Raised while loading or validating configuration.
    Configuration,
}

/// The primary error type for sqlcraft.
///
/// All failures are deterministic functions of the descriptor's content, so
/// none of them are transient and nothing in the engine retries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    // ── Builder-time ─────────────────────────────────────────────────

    /// A projection alias collides with an existing projection alias.
    #[error("Ambiguous alias: '{0}' is already used by another projection")]
    AmbiguousAlias(String),

    /// A path segment does not name a relationship on the current entity.
    #[error("Unknown relationship '{relation}' on '{model}'")]
    UnknownRelationship {
        /// The entity the segment was looked up on.
        model: String,
        /// The segment that failed to resolve.
        relation: String,
    },

    /// A field name cannot be resolved on the current entity.
    #[error("Cannot resolve keyword '{field}' into field on '{model}'")]
    FieldError {
        /// The entity the field was looked up on.
        model: String,
        /// The name that failed to resolve.
        field: String,
    },

    /// A limit or offset was negative.
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// The operation is valid in general but not for this descriptor or dialect.
    #[error("Not supported: {0}")]
    NotSupported(String),

    // ── Compile-time ─────────────────────────────────────────────────

    /// Combined queries or subqueries do not produce compatible columns.
    #[error("Incompatible shape: {0}")]
    IncompatibleShape(String),

    /// HAVING was requested on a query that neither groups nor aggregates.
    #[error("Misplaced HAVING: {0}")]
    MisplacedHaving(String),

    // ── Configuration ────────────────────────────────────────────────

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl QueryError {
    /// Creates an [`UnknownRelationship`](Self::UnknownRelationship) error.
    pub fn unknown_relationship(model: impl Into<String>, relation: impl Into<String>) -> Self {
        Self::UnknownRelationship {
            model: model.into(),
            relation: relation.into(),
        }
    }

    /// Creates a [`FieldError`](Self::FieldError) error.
    pub fn field_error(model: impl Into<String>, field: impl Into<String>) -> Self {
        Self::FieldError {
            model: model.into(),
            field: field.into(),
        }
    }

    /// Returns the pipeline stage this error belongs to.
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::AmbiguousAlias(_)
            | Self::UnknownRelationship { .. }
            | Self::FieldError { .. }
            | Self::InvalidRange(_)
            | Self::NotSupported(_) => ErrorCategory::Builder,
            Self::IncompatibleShape(_) | Self::MisplacedHaving(_) => ErrorCategory::Compile,
            Self::ConfigurationError(_) => ErrorCategory::Configuration,
        }
    }
}

/// A convenience type alias for `Result<T, QueryError>`.
pub type QueryResult<T> = Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QueryError::unknown_relationship("order", "vendor");
        assert_eq!(err.to_string(), "Unknown relationship 'vendor' on 'order'");

        let err = QueryError::AmbiguousAlias("total".into());
        assert!(err.to_string().contains("'total'"));
    }

    #[test]
    fn test_field_error_display() {
        let err = QueryError::field_error("customer", "nickname");
        assert_eq!(
            err.to_string(),
            "Cannot resolve keyword 'nickname' into field on 'customer'"
        );
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            QueryError::AmbiguousAlias("a".into()).category(),
            ErrorCategory::Builder
        );
        assert_eq!(
            QueryError::InvalidRange("x".into()).category(),
            ErrorCategory::Builder
        );
        assert_eq!(
            QueryError::unknown_relationship("a", "b").category(),
            ErrorCategory::Builder
        );
        assert_eq!(
            QueryError::IncompatibleShape("x".into()).category(),
            ErrorCategory::Compile
        );
        assert_eq!(
            QueryError::MisplacedHaving("x".into()).category(),
            ErrorCategory::Compile
        );
        assert_eq!(
            QueryError::ConfigurationError("x".into()).category(),
            ErrorCategory::Configuration
        );
    }

    #[test]
    fn test_errors_compare_by_value() {
        assert_eq!(
            QueryError::InvalidRange("limit".into()),
            QueryError::InvalidRange("limit".into())
        );
        assert_ne!(
            QueryError::InvalidRange("limit".into()),
            QueryError::InvalidRange("offset".into())
        );
    }
}
