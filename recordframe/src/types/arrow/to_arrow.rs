//! to_arrow module provides the convert functions from record schemas and
//! columnar tables to arrow.

use std::collections::HashMap;
use std::sync::Arc;

use arrow_array::{
    ArrayRef, BinaryArray, BooleanArray, Date32Array, Decimal128Array,
    DurationMicrosecondArray, FixedSizeBinaryArray, Float32Array, Float64Array, Int32Array,
    Int64Array, NullArray, RecordBatch, RecordBatchOptions, StringArray,
    Time64MicrosecondArray, TimestampMicrosecondArray,
};
use arrow_buffer::{NullBuffer, ScalarBuffer};
use arrow_schema::{DataType, Field as ArrowField, Schema as ArrowSchema, TimeUnit};

use crate::column::{Column, ColumnValues};
use crate::config::BindConfig;
use crate::table::ColumnarTable;
use crate::types::RecordSchema;
use crate::validator::expected_storage_type;
use crate::{Error, ErrorKind, Result};

/// The key of the index level marker in the metadata of arrow field.
pub const INDEX_LEVEL_META_KEY: &str = "recordframe.index_level";

fn index_metadata() -> HashMap<String, String> {
    HashMap::from([(INDEX_LEVEL_META_KEY.to_string(), "true".to_string())])
}

impl RecordSchema {
    /// Convert to the arrow schema of a conforming table under `config`.
    ///
    /// Index fields come first, in level order, marked by
    /// [`INDEX_LEVEL_META_KEY`] metadata.
    pub fn to_arrow_schema(&self, config: &BindConfig) -> ArrowSchema {
        let fields = self
            .index_fields()
            .chain(self.column_fields())
            .map(|field| {
                let storage = expected_storage_type(field, config);
                let arrow_field = ArrowField::new(&field.name, storage.data_type, storage.nullable);
                if field.is_index {
                    arrow_field.with_metadata(index_metadata())
                } else {
                    arrow_field
                }
            })
            .collect::<Vec<_>>();
        ArrowSchema::new(fields)
    }
}

impl ColumnarTable {
    /// Export the table as an arrow record batch, index levels first.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let mut fields = Vec::with_capacity(self.index_levels().len() + self.columns().len());
        let mut arrays = Vec::with_capacity(fields.capacity());
        for (name, column) in self.index_levels() {
            fields.push(
                ArrowField::new(name, column.data_type().clone(), column.storage().nullable)
                    .with_metadata(index_metadata()),
            );
            arrays.push(column.to_array()?);
        }
        for (name, column) in self.columns() {
            fields.push(ArrowField::new(
                name,
                column.data_type().clone(),
                column.storage().nullable,
            ));
            arrays.push(column.to_array()?);
        }

        let options = RecordBatchOptions::new().with_row_count(Some(self.num_rows()));
        Ok(RecordBatch::try_new_with_options(
            Arc::new(ArrowSchema::new(fields)),
            arrays,
            &options,
        )?)
    }
}

impl Column {
    /// Convert to an arrow array of the column's data type.
    pub fn to_array(&self) -> Result<ArrayRef> {
        let nulls = self
            .validity()
            .map(|bits| NullBuffer::from(bits.iter().by_vals().collect::<Vec<bool>>()));

        let array: ArrayRef = match (self.values(), self.data_type()) {
            (ColumnValues::Null(len), DataType::Null) => Arc::new(NullArray::new(*len)),
            (ColumnValues::Boolean(_), DataType::Boolean) => Arc::new(
                (0..self.len())
                    .map(|row| match self.get(row) {
                        Some(crate::column::Scalar::Boolean(v)) => Some(v),
                        _ => None,
                    })
                    .collect::<BooleanArray>(),
            ),
            (ColumnValues::Int32(v), DataType::Int32) => {
                Arc::new(Int32Array::new(ScalarBuffer::from(v.clone()), nulls))
            }
            (ColumnValues::Int32(v), DataType::Date32) => {
                Arc::new(Date32Array::new(ScalarBuffer::from(v.clone()), nulls))
            }
            (ColumnValues::Int64(v), DataType::Int64) => {
                Arc::new(Int64Array::new(ScalarBuffer::from(v.clone()), nulls))
            }
            (ColumnValues::Int64(v), DataType::Time64(TimeUnit::Microsecond)) => Arc::new(
                Time64MicrosecondArray::new(ScalarBuffer::from(v.clone()), nulls),
            ),
            (ColumnValues::Int64(v), DataType::Timestamp(TimeUnit::Microsecond, tz)) => Arc::new(
                TimestampMicrosecondArray::new(ScalarBuffer::from(v.clone()), nulls)
                    .with_timezone_opt(tz.clone()),
            ),
            (ColumnValues::Int64(v), DataType::Duration(TimeUnit::Microsecond)) => Arc::new(
                DurationMicrosecondArray::new(ScalarBuffer::from(v.clone()), nulls),
            ),
            (ColumnValues::Float32(v), DataType::Float32) => {
                Arc::new(Float32Array::new(ScalarBuffer::from(v.clone()), nulls))
            }
            (ColumnValues::Float64(v), DataType::Float64) => {
                Arc::new(Float64Array::new(ScalarBuffer::from(v.clone()), nulls))
            }
            (ColumnValues::Decimal128(v), DataType::Decimal128(precision, scale)) => Arc::new(
                Decimal128Array::new(ScalarBuffer::from(v.clone()), nulls)
                    .with_precision_and_scale(*precision, *scale)?,
            ),
            (ColumnValues::Utf8(v), DataType::Utf8) => Arc::new(
                v.iter()
                    .enumerate()
                    .map(|(row, s)| self.is_valid(row).then_some(s.as_str()))
                    .collect::<StringArray>(),
            ),
            (ColumnValues::Binary(v), DataType::Binary) => Arc::new(
                v.iter()
                    .enumerate()
                    .map(|(row, b)| self.is_valid(row).then_some(b.as_slice()))
                    .collect::<BinaryArray>(),
            ),
            (ColumnValues::Binary(v), DataType::FixedSizeBinary(width)) => {
                Arc::new(FixedSizeBinaryArray::try_from_sparse_iter_with_size(
                    v.iter()
                        .enumerate()
                        .map(|(row, b)| self.is_valid(row).then_some(b.as_slice())),
                    *width,
                )?)
            }
            (_, data_type) => {
                return Err(Error::new(
                    ErrorKind::Unexpected,
                    format!("column values don't match data type {data_type}"),
                ))
            }
        };
        Ok(array)
    }
}

#[cfg(test)]
mod tests {
    use arrow_array::Array;

    use super::*;
    use crate::column::Scalar;
    use crate::types::{FieldSpec, SemanticType, StorageType, Value};

    #[test]
    fn test_schema_to_arrow() {
        let schema = RecordSchema::new(
            "Reading",
            vec![
                FieldSpec::optional("value", SemanticType::Double),
                FieldSpec::required("sensor", SemanticType::Uuid).with_index(),
            ],
        );
        let arrow_schema = schema.to_arrow_schema(&BindConfig::default());
        assert_eq!(arrow_schema.fields().len(), 2);
        assert_eq!(arrow_schema.field(0).name(), "sensor");
        assert_eq!(arrow_schema.field(0).data_type(), &DataType::FixedSizeBinary(16));
        assert_eq!(
            arrow_schema.field(0).metadata().get(INDEX_LEVEL_META_KEY),
            Some(&"true".to_string())
        );
        assert!(arrow_schema.field(1).is_nullable());
    }

    #[test]
    fn test_column_to_array_keeps_nulls() {
        let column = Column::from_cells(
            StorageType::nullable(DataType::Timestamp(
                TimeUnit::Microsecond,
                Some("+01:00".into()),
            )),
            [Some(Scalar::Int64(5)), None],
        )
        .unwrap();
        let array = column.to_array().unwrap();
        assert_eq!(array.len(), 2);
        assert_eq!(array.null_count(), 1);
        assert_eq!(
            array.data_type(),
            &DataType::Timestamp(TimeUnit::Microsecond, Some("+01:00".into()))
        );
    }

    #[test]
    fn test_table_to_record_batch() {
        let mut table = ColumnarTable::from_rows(
            &["id", "name"],
            vec![
                vec![Some(Value::Long(1)), Some(Value::String("a".to_string()))],
                vec![Some(Value::Long(2)), None],
            ],
        )
        .unwrap();
        table.set_index(&["id"]).unwrap();

        let batch = table.to_record_batch().unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.schema().field(0).name(), "id");
        assert!(!batch.schema().field(0).is_nullable());
        assert_eq!(batch.column(1).null_count(), 1);
    }

    #[test]
    fn test_empty_table_to_record_batch() {
        let table = ColumnarTable::new(vec![]).unwrap();
        let batch = table.to_record_batch().unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 0);
    }
}
