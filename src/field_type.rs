use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::AppError;

/// Custom field value kinds in the new schema, in remote ordinal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    String,
    Color,
    Date,
    Month,
    Year,
    MonthYear,
    Timestamp,
    MonthDay,
}

impl FieldType {
    /// Indexed by the remote `type` ordinal.
    pub const ALL: [FieldType; 8] = [
        FieldType::String,
        FieldType::Color,
        FieldType::Date,
        FieldType::Month,
        FieldType::Year,
        FieldType::MonthYear,
        FieldType::Timestamp,
        FieldType::MonthDay,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            FieldType::String => "String",
            FieldType::Color => "Color",
            FieldType::Date => "Date",
            FieldType::Month => "Month",
            FieldType::Year => "Year",
            FieldType::MonthYear => "MonthYear",
            FieldType::Timestamp => "Timestamp",
            FieldType::MonthDay => "MonthDay",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldTypeError {
    #[error("field type ordinal {0} is outside 0..=7")]
    OutOfRange(i64),
    #[error("field type is not an integer ordinal")]
    NotAnOrdinal,
    #[error("unknown field type name {0:?}")]
    UnknownName(String),
}

impl From<FieldTypeError> for AppError {
    fn from(error: FieldTypeError) -> Self {
        match &error {
            FieldTypeError::OutOfRange(ordinal) => {
                AppError::new("FIELD/OUT_OF_RANGE_TYPE", error.to_string())
                    .with_context("ordinal", ordinal.to_string())
            }
            FieldTypeError::NotAnOrdinal => AppError::new("FIELD/INVALID_TYPE", error.to_string()),
            FieldTypeError::UnknownName(name) => {
                AppError::new("FIELD/UNKNOWN_TYPE", error.to_string())
                    .with_context("name", name.clone())
            }
        }
    }
}

/// Maps a remote type ordinal onto the new schema's field type.
pub fn normalize_type(ordinal: i64) -> Result<FieldType, FieldTypeError> {
    // Negative ordinals fail the conversion and land in the same error.
    usize::try_from(ordinal)
        .ok()
        .and_then(|idx| FieldType::ALL.get(idx).copied())
        .ok_or(FieldTypeError::OutOfRange(ordinal))
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = FieldTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| FieldTypeError::UnknownName(s.to_string()))
    }
}
