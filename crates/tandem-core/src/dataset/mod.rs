//! The working table shared by both engines.
//!
//! A [`Dataset`] is validated and normalized once at load time and is
//! immutable afterwards. Replacing it means loading a new one, which gets a
//! fresh [`DatasetVersion`]; engines bound to an older version must rebuild.

mod payload;
mod schema;
mod value;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub use payload::{ColumnSpec, GeneratedProject, ProjectDefinition};
pub use schema::{Column, ColumnType};
pub use value::{Record, Value};

use crate::error::SchemaError;
use schema::infer_types;

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

/// Identifier of one loaded dataset snapshot. Unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DatasetVersion(u64);

impl DatasetVersion {
    fn next() -> Self {
        Self(NEXT_VERSION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DatasetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Immutable in-memory table with an ordered schema.
///
/// Rows are stored row-major, already reordered to schema order. Schema and
/// rows sit behind `Arc`s so engine-side views can share them.
#[derive(Debug)]
pub struct Dataset {
    version: DatasetVersion,
    columns: Arc<Vec<Column>>,
    rows: Arc<Vec<Vec<Value>>>,
}

impl Dataset {
    /// Load rows, taking column order from the first record and inferring
    /// types over all rows.
    ///
    /// # Errors
    /// [`SchemaError::Empty`] when there are no rows (or the first record has
    /// no fields), [`SchemaError::InconsistentKeys`] when any record's key set
    /// differs from the first one's.
    pub fn load(rows: Vec<Record>) -> Result<Self, SchemaError> {
        let names: Vec<String> = match rows.first() {
            Some(first) if !first.is_empty() => first.keys().map(str::to_string).collect(),
            _ => return Err(SchemaError::Empty),
        };

        let values = normalize(rows, &names)?;
        let types = infer_types(names.len(), &values);
        let columns = names
            .into_iter()
            .zip(types)
            .map(|(name, ty)| Column::new(name, ty))
            .collect();

        Ok(Self::assemble(columns, values))
    }

    /// Load rows against a declared schema.
    ///
    /// Column order and types come from `declared`; every record must carry
    /// exactly the declared names and every value must fit its column type.
    pub fn load_with_schema(rows: Vec<Record>, declared: Vec<Column>) -> Result<Self, SchemaError> {
        if rows.is_empty() || declared.is_empty() {
            return Err(SchemaError::Empty);
        }
        for (i, column) in declared.iter().enumerate() {
            if declared[..i].iter().any(|c| c.name == column.name) {
                return Err(SchemaError::DuplicateColumn(column.name.clone()));
            }
        }

        let names: Vec<String> = declared.iter().map(|c| c.name.clone()).collect();
        let values = normalize(rows, &names)?;

        for (row_idx, row) in values.iter().enumerate() {
            for (column, value) in declared.iter().zip(row) {
                if !column.ty.accepts(value) {
                    return Err(SchemaError::TypeMismatch {
                        row: row_idx,
                        column: column.name.clone(),
                        expected: column.ty.to_string(),
                        found: value.type_name().to_string(),
                    });
                }
            }
        }

        Ok(Self::assemble(declared, values))
    }

    fn assemble(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Self {
        let dataset = Self {
            version: DatasetVersion::next(),
            columns: Arc::new(columns),
            rows: Arc::new(rows),
        };
        tracing::debug!(
            version = %dataset.version,
            columns = dataset.columns.len(),
            rows = dataset.rows.len(),
            "Dataset loaded"
        );
        dataset
    }

    /// Ordered `(name, type)` pairs.
    pub fn schema(&self) -> &[Column] {
        &self.columns
    }

    pub fn version(&self) -> DatasetVersion {
        self.version
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Always false for a loaded dataset; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Row-major values in schema order.
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub(crate) fn shared_schema(&self) -> Arc<Vec<Column>> {
        Arc::clone(&self.columns)
    }

    pub(crate) fn shared_rows(&self) -> Arc<Vec<Vec<Value>>> {
        Arc::clone(&self.rows)
    }

    /// All values of one column, top to bottom.
    pub fn column_values(&self, index: usize) -> impl Iterator<Item = &Value> {
        self.rows.iter().filter_map(move |row| row.get(index))
    }
}

/// Reorder every record into `names` order, rejecting key-set mismatches.
fn normalize(rows: Vec<Record>, names: &[String]) -> Result<Vec<Vec<Value>>, SchemaError> {
    let mut out = Vec::with_capacity(rows.len());

    for (row_idx, mut record) in rows.into_iter().enumerate() {
        let consistent =
            record.len() == names.len() && names.iter().all(|n| record.get(n).is_some());
        if !consistent {
            return Err(SchemaError::InconsistentKeys {
                row: row_idx,
                expected: names.join(", "),
                found: record.keys().collect::<Vec<_>>().join(", "),
            });
        }

        out.push(
            names
                .iter()
                .map(|n| record.take(n).unwrap_or(Value::Null))
                .collect(),
        );
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Record> {
        vec![
            Record::new().with("id", 1).with("name", "a"),
            Record::new().with("id", 2).with("name", "b"),
        ]
    }

    #[test]
    fn test_load_infers_schema_in_first_seen_order() {
        let ds = Dataset::load(sample()).unwrap();
        assert_eq!(
            ds.schema(),
            &[
                Column::new("id", ColumnType::Integer),
                Column::new("name", ColumnType::Text)
            ]
        );
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.width(), 2);
    }

    #[test]
    fn test_load_normalizes_key_order() {
        let rows = vec![
            Record::new().with("id", 1).with("name", "a"),
            Record::new().with("name", "b").with("id", 2),
        ];
        let ds = Dataset::load(rows).unwrap();
        assert_eq!(ds.rows()[1], vec![Value::Int(2), Value::Text("b".into())]);
    }

    #[test]
    fn test_load_empty_fails() {
        assert_eq!(Dataset::load(vec![]).unwrap_err(), SchemaError::Empty);
        assert_eq!(
            Dataset::load(vec![Record::new()]).unwrap_err(),
            SchemaError::Empty
        );
    }

    #[test]
    fn test_load_inconsistent_keys_fails() {
        let rows = vec![
            Record::new().with("id", 1).with("name", "a"),
            Record::new().with("id", 2),
        ];
        match Dataset::load(rows).unwrap_err() {
            SchemaError::InconsistentKeys { row, .. } => assert_eq!(row, 1),
            other => panic!("unexpected error: {other:?}"),
        }

        let rows = vec![
            Record::new().with("id", 1),
            Record::new().with("id", 2).with("extra", true),
        ];
        assert!(matches!(
            Dataset::load(rows),
            Err(SchemaError::InconsistentKeys { row: 1, .. })
        ));
    }

    #[test]
    fn test_versions_are_unique() {
        let a = Dataset::load(sample()).unwrap();
        let b = Dataset::load(sample()).unwrap();
        assert_ne!(a.version(), b.version());
        assert!(b.version() > a.version());
    }

    #[test]
    fn test_load_with_schema_uses_declared_order_and_types() {
        let declared = vec![
            Column::new("name", ColumnType::Text),
            Column::new("id", ColumnType::Float),
        ];
        let ds = Dataset::load_with_schema(sample(), declared).unwrap();
        assert_eq!(ds.column_names().collect::<Vec<_>>(), vec!["name", "id"]);
        assert_eq!(ds.schema()[1].ty, ColumnType::Float);
        assert_eq!(ds.rows()[0], vec![Value::Text("a".into()), Value::Int(1)]);
    }

    #[test]
    fn test_load_with_schema_rejects_type_mismatch() {
        let declared = vec![
            Column::new("id", ColumnType::Boolean),
            Column::new("name", ColumnType::Text),
        ];
        assert!(matches!(
            Dataset::load_with_schema(sample(), declared),
            Err(SchemaError::TypeMismatch { row: 0, .. })
        ));
    }

    #[test]
    fn test_load_with_schema_rejects_duplicates() {
        let declared = vec![
            Column::new("id", ColumnType::Integer),
            Column::new("id", ColumnType::Integer),
        ];
        assert_eq!(
            Dataset::load_with_schema(sample(), declared).unwrap_err(),
            SchemaError::DuplicateColumn("id".into())
        );
    }

    #[test]
    fn test_column_values() {
        let ds = Dataset::load(sample()).unwrap();
        let idx = ds.column_index("name").unwrap();
        let names: Vec<_> = ds.column_values(idx).map(|v| v.to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(ds.column_index("missing"), None);
    }
}
