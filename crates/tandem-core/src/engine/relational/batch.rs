//! Dataset to Arrow conversion.
//!
//! Values travel column-wise through typed builders, so no row content is
//! ever spliced into SQL text.

use std::sync::Arc;

use datafusion::arrow::array::{
    ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder,
};
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use datafusion::arrow::error::ArrowError;
use datafusion::arrow::record_batch::RecordBatch;

use crate::dataset::{ColumnType, Dataset, Value};

/// Arrow type a column is stored as. Anything without a native mapping is text.
pub fn arrow_type(ty: ColumnType) -> DataType {
    match ty {
        ColumnType::Integer => DataType::Int64,
        ColumnType::Float => DataType::Float64,
        ColumnType::Boolean => DataType::Boolean,
        ColumnType::Text | ColumnType::Mixed | ColumnType::Null => DataType::Utf8,
    }
}

pub fn arrow_schema(dataset: &Dataset) -> SchemaRef {
    let fields: Vec<Field> = dataset
        .schema()
        .iter()
        .map(|c| Field::new(c.name.as_str(), arrow_type(c.ty), true))
        .collect();
    Arc::new(Schema::new(fields))
}

/// Materialize the whole dataset as one record batch.
pub fn to_record_batch(dataset: &Dataset) -> Result<RecordBatch, ArrowError> {
    let schema = arrow_schema(dataset);
    let arrays = dataset
        .schema()
        .iter()
        .enumerate()
        .map(|(i, column)| build_array(column.ty, dataset.column_values(i), dataset.len()))
        .collect();
    RecordBatch::try_new(schema, arrays)
}

fn build_array<'a>(
    ty: ColumnType,
    values: impl Iterator<Item = &'a Value>,
    len: usize,
) -> ArrayRef {
    match ty {
        ColumnType::Integer => {
            let mut builder = Int64Builder::with_capacity(len);
            for value in values {
                match value {
                    Value::Int(i) => builder.append_value(*i),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        ColumnType::Float => {
            let mut builder = Float64Builder::with_capacity(len);
            for value in values {
                builder.append_option(value.as_f64());
            }
            Arc::new(builder.finish())
        }
        ColumnType::Boolean => {
            let mut builder = BooleanBuilder::with_capacity(len);
            for value in values {
                match value {
                    Value::Bool(b) => builder.append_value(*b),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        ColumnType::Text | ColumnType::Mixed | ColumnType::Null => {
            let mut builder = StringBuilder::new();
            for value in values {
                match value {
                    Value::Null => builder.append_null(),
                    Value::Text(s) => builder.append_value(s),
                    other => builder.append_value(other.to_string()),
                }
            }
            Arc::new(builder.finish())
        }
    }
}

#[cfg(test)]
mod tests {
    use datafusion::arrow::array::{Array, Float64Array, Int64Array, StringArray};

    use super::*;
    use crate::dataset::Record;

    #[test]
    fn test_types_and_nulls() {
        let ds = Dataset::load(vec![
            Record::new()
                .with("id", 1)
                .with("score", 2)
                .with("tag", "x")
                .with("blank", Value::Null),
            Record::new()
                .with("id", Value::Null)
                .with("score", 2.5)
                .with("tag", 7)
                .with("blank", Value::Null),
        ])
        .unwrap();

        let batch = to_record_batch(&ds).unwrap();
        assert_eq!(batch.num_rows(), 2);

        let schema = batch.schema();
        let types: Vec<&DataType> = schema.fields().iter().map(|f| f.data_type()).collect();
        assert_eq!(
            types,
            vec![&DataType::Int64, &DataType::Float64, &DataType::Utf8, &DataType::Utf8]
        );

        let ids = batch.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(ids.value(0), 1);
        assert!(ids.is_null(1));

        let scores = batch.column(1).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(scores.value(0), 2.0);

        // Mixed column falls back to text.
        let tags = batch.column(2).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(tags.value(1), "7");
        assert_eq!(batch.column(3).null_count(), 2);
    }

    #[test]
    fn test_delimiters_survive_untouched() {
        let tricky = "it's; DROP TABLE \"x\" | y";
        let ds = Dataset::load(vec![Record::new().with("s", tricky)]).unwrap();
        let batch = to_record_batch(&ds).unwrap();
        let s = batch.column(0).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(s.value(0), "it's; DROP TABLE \"x\" | y");
    }
}
