//! Entity store contract.
//!
//! Every persisted entity converts to and from a [`Row`], a JSON object that
//! is the native representation of both store backends. Conversions that are
//! not plain JSON live here:
//!
//! - enum-like fields are stored as strings and parsed into closed enums,
//! - timestamps are stored as integer microseconds since the Unix epoch,
//! - identifiers are stored as strings and parsed into their newtypes.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::UnmarshalError;
use crate::timestamp;

/// Stored representation of one entity.
pub type Row = Map<String, Value>;

/// Contract between typed entities and the repositories that persist them.
pub trait DatabaseEntity: Sized + Send + Sync {
    /// Table the entity is stored in.
    const TABLE: &'static str;

    /// Fresh zero value.
    fn new_entity() -> Self;

    /// Convert into the stored representation.
    fn marshal(&self) -> Row;

    /// Convert from the stored representation.
    ///
    /// # Errors
    ///
    /// Returns [`UnmarshalError`] if a field is missing, has the wrong type
    /// or holds a value that cannot be converted.
    fn unmarshal(row: &Row) -> Result<Self, UnmarshalError>;

    /// Semantic equality over business-relevant fields.
    ///
    /// Surrogate ids and bookkeeping timestamps are not compared, so an
    /// entity equals its reloaded copy and an idempotent upsert can be
    /// detected.
    fn equal(&self, other: &Self) -> bool;

    /// Table name of this instance.
    fn table(&self) -> &'static str {
        Self::TABLE
    }
}

/// Builder producing a [`Row`].
#[derive(Debug, Default)]
pub struct RowWriter {
    row: Row,
}

impl RowWriter {
    /// Start an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a string field.
    #[must_use]
    pub fn string(mut self, field: &str, value: impl Into<String>) -> Self {
        self.row.insert(field.to_string(), Value::String(value.into()));
        self
    }

    /// Store an optional string field; `None` leaves the field out.
    #[must_use]
    pub fn opt_string(self, field: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.string(field, v),
            None => self,
        }
    }

    /// Store an integer field.
    #[must_use]
    pub fn int(mut self, field: &str, value: i64) -> Self {
        self.row.insert(field.to_string(), Value::from(value));
        self
    }

    /// Store a boolean field.
    #[must_use]
    pub fn bool(mut self, field: &str, value: bool) -> Self {
        self.row.insert(field.to_string(), Value::Bool(value));
        self
    }

    /// Store a timestamp as microseconds.
    #[must_use]
    pub fn timestamp(self, field: &str, value: DateTime<Utc>) -> Self {
        self.int(field, timestamp::to_micros(value))
    }

    /// Store an optional timestamp; `None` leaves the field out.
    #[must_use]
    pub fn opt_timestamp(self, field: &str, value: Option<DateTime<Utc>>) -> Self {
        match value {
            Some(v) => self.timestamp(field, v),
            None => self,
        }
    }

    /// Store a structured value as nested JSON.
    #[must_use]
    pub fn json(mut self, field: &str, value: Value) -> Self {
        self.row.insert(field.to_string(), value);
        self
    }

    /// Finish the row.
    pub fn build(self) -> Row {
        self.row
    }
}

/// Typed accessors over a stored row.
#[derive(Debug, Clone, Copy)]
pub struct RowReader<'a> {
    table: &'static str,
    row: &'a Row,
}

impl<'a> RowReader<'a> {
    /// Read fields of `row` belonging to `table`.
    pub const fn new(table: &'static str, row: &'a Row) -> Self {
        Self { table, row }
    }

    fn present(&self, field: &str) -> Option<&'a Value> {
        self.row.get(field).filter(|v| !v.is_null())
    }

    fn required(&self, field: &str) -> Result<&'a Value, UnmarshalError> {
        self.present(field)
            .ok_or_else(|| UnmarshalError::missing_field(self.table, field))
    }

    fn type_error(&self, field: &str, expected: &str, found: &Value) -> UnmarshalError {
        UnmarshalError::invalid_type(self.table, field, expected, json_type(found))
    }

    /// Read a string field.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is missing or not a string.
    pub fn string(&self, field: &str) -> Result<String, UnmarshalError> {
        let value = self.required(field)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.type_error(field, "string", value))
    }

    /// Read an optional string field.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is present but not a string.
    pub fn opt_string(&self, field: &str) -> Result<Option<String>, UnmarshalError> {
        self.present(field)
            .map(|value| {
                value
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| self.type_error(field, "string", value))
            })
            .transpose()
    }

    /// Read an integer field.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is missing or not an integer.
    pub fn int(&self, field: &str) -> Result<i64, UnmarshalError> {
        let value = self.required(field)?;
        value
            .as_i64()
            .ok_or_else(|| self.type_error(field, "integer", value))
    }

    /// Read a boolean field.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is missing or not a boolean.
    pub fn bool(&self, field: &str) -> Result<bool, UnmarshalError> {
        let value = self.required(field)?;
        value
            .as_bool()
            .ok_or_else(|| self.type_error(field, "boolean", value))
    }

    /// Read a timestamp stored as microseconds.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is missing, not an integer or out of range.
    pub fn timestamp(&self, field: &str) -> Result<DateTime<Utc>, UnmarshalError> {
        let micros = self.int(field)?;
        self.convert_timestamp(field, micros)
    }

    /// Read an optional timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is present but not a valid timestamp.
    pub fn opt_timestamp(&self, field: &str) -> Result<Option<DateTime<Utc>>, UnmarshalError> {
        match self.present(field) {
            Some(_) => self.timestamp(field).map(Some),
            None => Ok(None),
        }
    }

    /// Read a string field and parse it into `T`.
    ///
    /// This is the conversion used for enum-like fields and identifiers.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is missing, not a string or rejected by
    /// the parser.
    pub fn parse<T>(&self, field: &str) -> Result<T, UnmarshalError>
    where
        T: FromStr<Err = UnmarshalError>,
    {
        let raw = self.string(field)?;
        raw.parse::<T>().map_err(|e| e.located(self.table, field))
    }

    /// Read a nested JSON field into `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is missing or does not deserialize.
    pub fn json<T: DeserializeOwned>(&self, field: &str) -> Result<T, UnmarshalError> {
        let value = self.required(field)?;
        T::deserialize(value).map_err(|e| {
            UnmarshalError::invalid_value(self.table, field, value.to_string(), e.to_string())
        })
    }

    fn convert_timestamp(&self, field: &str, micros: i64) -> Result<DateTime<Utc>, UnmarshalError> {
        timestamp::from_micros(micros).ok_or_else(|| {
            UnmarshalError::invalid_value(
                self.table,
                field,
                micros.to_string(),
                "timestamp out of range",
            )
        })
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
