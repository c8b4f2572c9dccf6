//! Dataset ingestion from JSON.
//!
//! Two shapes are accepted: a bare array of row objects, or the payload a
//! project-generation service returns, where rows sit under `data` and an
//! optional `definition.schema` declares column types.

use std::path::Path;

use serde::Deserialize;

use super::{Column, ColumnType, Dataset, Record};
use crate::error::{Result, SchemaError};

/// Response of the project-generation service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeneratedProject {
    #[serde(default)]
    pub definition: Option<ProjectDefinition>,
    #[serde(default)]
    pub data: Vec<Record>,
}

/// Scenario metadata describing the generated dataset.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectDefinition {
    pub title: String,
    pub description: String,
    pub tasks: Vec<String>,
    pub schema: Vec<ColumnSpec>,
}

/// One declared column of a generated project.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub ty: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl ProjectDefinition {
    /// Declared columns in record order, if the declaration matches the
    /// record's key set and every type name is understood.
    fn declared_columns(&self, first: &Record) -> Option<Vec<Column>> {
        if self.schema.len() != first.len() {
            return None;
        }
        first
            .keys()
            .map(|key| {
                let spec = self.schema.iter().find(|s| s.name == key)?;
                let ty = spec.ty.parse::<ColumnType>().ok()?;
                Some(Column::new(key, ty))
            })
            .collect()
    }
}

impl GeneratedProject {
    /// Build the dataset, honouring the declared schema when it fits the data.
    ///
    /// Generated data routinely violates its own declaration (rogue strings in
    /// numeric columns), so a type mismatch falls back to inference.
    pub fn into_dataset(self) -> std::result::Result<Dataset, SchemaError> {
        let declared = match (&self.definition, self.data.first()) {
            (Some(def), Some(first)) => def.declared_columns(first),
            _ => None,
        };

        let Some(declared) = declared else {
            return Dataset::load(self.data);
        };

        match Dataset::load_with_schema(self.data.clone(), declared) {
            Err(SchemaError::TypeMismatch {
                row,
                column,
                expected,
                found,
            }) => {
                tracing::warn!(
                    row,
                    column = %column,
                    expected = %expected,
                    found = %found,
                    "Declared schema does not fit the data, inferring types instead"
                );
                Dataset::load(self.data)
            }
            other => other,
        }
    }
}

impl Dataset {
    /// Parse a JSON array of row objects or a generated-project payload.
    ///
    /// Rows are deserialized straight from the text so column order follows
    /// the document.
    pub fn from_json(text: &str) -> std::result::Result<Self, SchemaError> {
        let payload_error = |e: serde_json::Error| SchemaError::Payload(e.to_string());

        match text.trim_start().chars().next() {
            Some('[') => {
                let rows: Vec<Record> = serde_json::from_str(text).map_err(payload_error)?;
                Dataset::load(rows)
            }
            Some('{') => {
                let project: GeneratedProject = serde_json::from_str(text).map_err(payload_error)?;
                project.into_dataset()
            }
            _ => {
                let raw: serde_json::Value = serde_json::from_str(text).map_err(payload_error)?;
                Err(SchemaError::Payload(format!(
                    "expected an array of rows or a project object, found {}",
                    json_kind(&raw)
                )))
            }
        }
    }

    /// Read and parse a JSON dataset file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&text)?)
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => "a container",
    }
}
