//! # Model Errors

use thiserror::Error;

use crate::Variant;

/// Result type for query model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while editing or decoding a [`crate::QueryModel`].
///
/// These indicate a caller bug (an edit aimed at the wrong field) or a
/// corrupt persisted model, never a runtime failure of a query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// The edit targets a field the active variant does not have.
    #[error("field '{field}' does not exist on a {variant} query")]
    InvalidField { field: String, variant: Variant },

    /// The edit carries a value of the wrong shape for the field.
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// An element path points past the end of its list.
    #[error("index {index} out of range for '{field}' (len {len})")]
    IndexOutOfRange {
        field: String,
        index: usize,
        len: usize,
    },

    /// Persisted JSON mixes structured fields with a free-form `query`.
    #[error("query carries both structured fields ({structured}) and free-form text")]
    AmbiguousVariant { structured: String },

    /// Unknown sort direction code or name.
    #[error("unknown sort direction: {0}")]
    InvalidDirection(String),
}

impl ModelError {
    pub(crate) fn invalid_value(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
