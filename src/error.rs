#![forbid(unsafe_code)]

//! Error type shared by the query builder, metadata and translators.

use std::fmt;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, QueryError>;

/// Structured errors emitted by the builder and the translators.
///
/// Schema resolution failures are fatal configuration mistakes; construction
/// errors are raised before a query reaches any translator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Entity type is absent from the metadata provider.
    #[error("unknown model '{model}'")]
    UnknownModel {
        /// Requested entity type.
        model: String,
    },
    /// Attribute or relationship segment is absent from the model.
    #[error("unknown property '{prop}' on model '{model}'")]
    UnknownProperty {
        /// Model the segment was resolved against.
        model: String,
        /// Offending segment.
        prop: String,
    },
    /// Named projection is not declared for the model.
    #[error("projection '{projection}' not found on model '{model}'")]
    ProjectionNotFound {
        /// Model the projection was looked up on.
        model: String,
        /// Requested projection name.
        projection: String,
    },
    /// A non-terminal path segment does not point at a relationship that can
    /// be traversed.
    #[error("property '{prop}' on model '{model}' is not a traversable relationship")]
    NotARelationship {
        /// Model owning the segment.
        model: String,
        /// Offending segment.
        prop: String,
    },
    /// Builder or predicate received arguments it cannot interpret.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    /// Complex predicates need at least two children.
    #[error("complex predicate requires at least two children (got {count})")]
    TooFewPredicates {
        /// Number of children supplied.
        count: usize,
    },
    /// `order_by` was called with nothing to order by.
    #[error("order clause must name at least one attribute")]
    EmptyOrderBy,
    /// Direction token in an order clause was not recognized.
    #[error("order direction '{direction}' for '{path}' must be 'asc' or 'desc'")]
    InvalidOrderDirection {
        /// Attribute path the direction was attached to.
        path: String,
        /// Unrecognized token.
        direction: String,
    },
    /// Value supplied to a date predicate is not a valid instant.
    #[error("'{value}' is not a valid date")]
    InvalidDate {
        /// Rendered offending value.
        value: String,
    },
    /// Attribute path is empty or contains an empty segment.
    #[error("attribute path '{path}' is empty or malformed")]
    EmptyPath {
        /// Offending path.
        path: String,
    },
    /// Predicate variant cannot be compiled by the chosen translator.
    #[error("{translator} translator does not support {kind} predicates")]
    UnsupportedPredicate {
        /// Translator name.
        translator: &'static str,
        /// Predicate kind.
        kind: &'static str,
    },
    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),
    /// Local store failed to serve a request.
    #[error("local store error: {0}")]
    Store(String),
}

impl QueryError {
    /// Builds an [`QueryError::UnknownProperty`] for a model/segment pair.
    pub fn unknown_property(model: impl Into<String>, prop: impl Into<String>) -> Self {
        QueryError::UnknownProperty {
            model: model.into(),
            prop: prop.into(),
        }
    }

    /// Builds an [`QueryError::UnknownModel`].
    pub fn unknown_model(model: impl Into<String>) -> Self {
        QueryError::UnknownModel {
            model: model.into(),
        }
    }

    /// Builds an [`QueryError::InvalidArguments`].
    pub fn invalid(message: impl Into<String>) -> Self {
        QueryError::InvalidArguments(message.into())
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::UnknownModel { .. } => "UnknownModel",
            QueryError::UnknownProperty { .. } => "UnknownProperty",
            QueryError::ProjectionNotFound { .. } => "ProjectionNotFound",
            QueryError::NotARelationship { .. } => "NotARelationship",
            QueryError::InvalidArguments(_) => "InvalidArguments",
            QueryError::TooFewPredicates { .. } => "TooFewPredicates",
            QueryError::EmptyOrderBy => "EmptyOrderBy",
            QueryError::InvalidOrderDirection { .. } => "InvalidOrderDirection",
            QueryError::InvalidDate { .. } => "InvalidDate",
            QueryError::EmptyPath { .. } => "EmptyPath",
            QueryError::UnsupportedPredicate { .. } => "UnsupportedPredicate",
            QueryError::Config(_) => "Config",
            QueryError::Store(_) => "Store",
        }
    }

    /// True for errors caused by a schema/metadata mismatch. These are never
    /// transient and must not be retried.
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self,
            QueryError::UnknownModel { .. }
                | QueryError::UnknownProperty { .. }
                | QueryError::ProjectionNotFound { .. }
                | QueryError::NotARelationship { .. }
        )
    }

    /// True for errors raised while constructing a predicate or builder call.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            QueryError::InvalidArguments(_)
                | QueryError::TooFewPredicates { .. }
                | QueryError::EmptyOrderBy
                | QueryError::InvalidOrderDirection { .. }
                | QueryError::InvalidDate { .. }
                | QueryError::EmptyPath { .. }
        )
    }
}

/// Convenience wrapper that formats errors with their codes.
pub struct QueryErrorWithCode<'a>(pub &'a QueryError);

impl fmt::Display for QueryErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_prefixed_in_display_wrapper() {
        let err = QueryError::unknown_property("employee", "salary");
        assert_eq!(
            QueryErrorWithCode(&err).to_string(),
            "[UnknownProperty] unknown property 'salary' on model 'employee'"
        );
        assert!(err.is_schema_error());
        assert!(!err.is_construction_error());
    }

    #[test]
    fn construction_errors_are_classified() {
        assert!(QueryError::EmptyOrderBy.is_construction_error());
        assert!(QueryError::TooFewPredicates { count: 1 }.is_construction_error());
        assert!(!QueryError::Config("x".into()).is_schema_error());
    }
}
