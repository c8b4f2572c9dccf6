//! Column types and inference.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::value::Value;
use crate::error::SchemaError;

/// Logical type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Text,
    /// Values of incompatible types.
    Mixed,
    /// Every value is null.
    Null,
}

impl ColumnType {
    /// Type of a single value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ColumnType::Null,
            Value::Bool(_) => ColumnType::Boolean,
            Value::Int(_) => ColumnType::Integer,
            Value::Float(_) => ColumnType::Float,
            Value::Text(_) => ColumnType::Text,
        }
    }

    /// Combine two observed types into the narrowest type holding both.
    pub fn merge(self, other: Self) -> Self {
        use ColumnType::*;
        match (self, other) {
            (Null, t) | (t, Null) => t,
            (a, b) if a == b => a,
            (Integer, Float) | (Float, Integer) => Float,
            _ => Mixed,
        }
    }

    /// Whether a value may be stored in a column declared with this type.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (ColumnType::Text | ColumnType::Mixed, _) => true,
            (ColumnType::Integer, Value::Int(_)) => true,
            (ColumnType::Float, Value::Int(_) | Value::Float(_)) => true,
            (ColumnType::Boolean, Value::Bool(_)) => true,
            _ => false,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Text => "text",
            ColumnType::Mixed => "mixed",
            ColumnType::Null => "null",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lenient parsing of declared type names, including the names used by
/// project definitions (`numeric`, `categorical`, `date`).
impl FromStr for ColumnType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" | "bigint" => Ok(ColumnType::Integer),
            "float" | "numeric" | "number" | "real" | "double" => Ok(ColumnType::Float),
            "bool" | "boolean" => Ok(ColumnType::Boolean),
            "string" | "text" | "date" | "datetime" | "categorical" | "category" => {
                Ok(ColumnType::Text)
            }
            "mixed" => Ok(ColumnType::Mixed),
            "null" => Ok(ColumnType::Null),
            other => Err(SchemaError::UnknownType(other.to_string())),
        }
    }
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Infer the type of every column from row-major values.
pub(crate) fn infer_types(width: usize, rows: &[Vec<Value>]) -> Vec<ColumnType> {
    let mut types = vec![ColumnType::Null; width];
    for row in rows {
        for (ty, value) in types.iter_mut().zip(row) {
            *ty = ty.merge(ColumnType::of(value));
        }
    }
    types
}
