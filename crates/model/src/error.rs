//! Unmarshalling errors for persisted entities.
//!
//! Raised whenever a stored row does not match the shape its entity expects.
//! These always indicate store corruption or schema drift and are surfaced to
//! callers unchanged.

use thiserror::Error;

/// A stored value could not be converted into its typed field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnmarshalError {
    /// A required field is absent from the row.
    #[error("{table}.{field}: field is missing")]
    MissingField { table: String, field: String },

    /// The field holds a value of the wrong store type.
    #[error("{table}.{field}: expected {expected}, found {found}")]
    InvalidType {
        table: String,
        field: String,
        expected: String,
        found: String,
    },

    /// The field has the right type but an unconvertible value.
    #[error("{table}.{field}: invalid value '{value}': {reason}")]
    InvalidValue {
        table: String,
        field: String,
        value: String,
        reason: String,
    },
}

impl UnmarshalError {
    /// Create a missing field error.
    pub fn missing_field(table: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField {
            table: table.into(),
            field: field.into(),
        }
    }

    /// Create an invalid type error.
    pub fn invalid_type(
        table: impl Into<String>,
        field: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::InvalidType {
            table: table.into(),
            field: field.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create an invalid value error.
    pub fn invalid_value(
        table: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            table: table.into(),
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Attach the table and field to an error raised while parsing a bare value.
    ///
    /// Parsers such as `ClusterStatus::from_str` do not know where the value
    /// came from; the row reader rewrites the location once it does.
    #[must_use]
    pub fn located(self, table: &str, field: &str) -> Self {
        match self {
            Self::MissingField { .. } => Self::missing_field(table, field),
            Self::InvalidType {
                expected, found, ..
            } => Self::invalid_type(table, field, expected, found),
            Self::InvalidValue { value, reason, .. } => {
                Self::invalid_value(table, field, value, reason)
            }
        }
    }
}
