//! from_arrow module provides the convert functions from arrow record
//! batches to columnar tables.

use arrow_array::cast::AsArray;
use arrow_array::types::{
    Date32Type, Decimal128Type, DurationMicrosecondType, Float32Type, Float64Type, Int32Type,
    Int64Type, Time64MicrosecondType, TimestampMicrosecondType,
};
use arrow_array::{Array, ArrayRef, RecordBatch};
use arrow_schema::{DataType, TimeUnit};
use ordered_float::OrderedFloat;

use super::to_arrow::INDEX_LEVEL_META_KEY;
use crate::column::{Column, Scalar};
use crate::table::ColumnarTable;
use crate::types::StorageType;
use crate::{Error, ErrorKind, Result};

impl TryFrom<&RecordBatch> for ColumnarTable {
    type Error = Error;

    /// Import a record batch. Fields marked with the index level metadata
    /// become index levels, every other field an ordinary column.
    fn try_from(batch: &RecordBatch) -> Result<Self> {
        let schema = batch.schema();
        let mut columns = vec![];
        let mut levels = vec![];
        for (field, array) in schema.fields().iter().zip(batch.columns()) {
            let column = column_from_array(array, field.is_nullable())
                .map_err(|e| e.with_context("column", field.name().as_str()))?;
            if field.metadata().get(INDEX_LEVEL_META_KEY).map(String::as_str) == Some("true") {
                levels.push((field.name().clone(), column));
            } else {
                columns.push((field.name().clone(), column));
            }
        }
        let table = if columns.is_empty() && levels.is_empty() {
            ColumnarTable::new(vec![])?
        } else {
            ColumnarTable::new(columns)?.with_index(levels)?
        };
        Ok(table)
    }
}

/// The storage data type an arrow data type is imported as, `None` when
/// it is unsupported.
fn storage_data_type(data_type: &DataType) -> Option<DataType> {
    let normalized = match data_type {
        DataType::Int8 | DataType::Int16 | DataType::UInt8 | DataType::UInt16 => DataType::Int32,
        DataType::UInt32 => DataType::Int64,
        DataType::LargeUtf8 => DataType::Utf8,
        DataType::LargeBinary => DataType::Binary,
        DataType::Time32(_) | DataType::Time64(_) => DataType::Time64(TimeUnit::Microsecond),
        DataType::Timestamp(_, tz) => DataType::Timestamp(TimeUnit::Microsecond, tz.clone()),
        DataType::Duration(_) => DataType::Duration(TimeUnit::Microsecond),
        DataType::Null
        | DataType::Boolean
        | DataType::Int32
        | DataType::Int64
        | DataType::Float32
        | DataType::Float64
        | DataType::Date32
        | DataType::Utf8
        | DataType::Binary
        | DataType::FixedSizeBinary(_) => data_type.clone(),
        DataType::Decimal128(_, scale) if *scale >= 0 => data_type.clone(),
        _ => return None,
    };
    Some(normalized)
}

/// Cast `array` to `data_type`, failing if any value changes on the way.
fn cast_exact(array: &ArrayRef, data_type: &DataType) -> Result<ArrayRef> {
    let cast = arrow_cast::cast(array, data_type)?;
    let back = arrow_cast::cast(&cast, array.data_type())?;
    if back.as_ref() != array.as_ref() {
        return Err(Error::new(
            ErrorKind::ArrowError,
            format!(
                "{} can't be converted to {data_type} without loss",
                array.data_type()
            ),
        ));
    }
    Ok(cast)
}

fn downcast_failed(data_type: &DataType) -> Error {
    Error::new(
        ErrorKind::Unexpected,
        format!("array doesn't match its data type {data_type}"),
    )
}

/// Convert an arrow array into a column.
pub(crate) fn column_from_array(array: &ArrayRef, nullable: bool) -> Result<Column> {
    let data_type = storage_data_type(array.data_type()).ok_or_else(|| {
        Error::new(
            ErrorKind::ArrowError,
            format!("arrow data type {} is not supported", array.data_type()),
        )
    })?;
    let array = if &data_type == array.data_type() {
        array.clone()
    } else {
        cast_exact(array, &data_type)?
    };

    if data_type == DataType::Null {
        return Column::nulls(StorageType::untyped(), array.len());
    }
    let nullable = nullable || array.null_count() > 0;

    macro_rules! primitive_cells {
        ($ty:ty, $scalar:expr) => {
            array
                .as_primitive_opt::<$ty>()
                .ok_or_else(|| downcast_failed(&data_type))?
                .iter()
                .map(|v| v.map($scalar))
                .collect::<Vec<_>>()
        };
    }

    let cells = match &data_type {
        DataType::Boolean => array
            .as_boolean_opt()
            .ok_or_else(|| downcast_failed(&data_type))?
            .iter()
            .map(|v| v.map(Scalar::Boolean))
            .collect(),
        DataType::Int32 => primitive_cells!(Int32Type, Scalar::Int32),
        DataType::Date32 => primitive_cells!(Date32Type, Scalar::Int32),
        DataType::Int64 => primitive_cells!(Int64Type, Scalar::Int64),
        DataType::Time64(_) => primitive_cells!(Time64MicrosecondType, Scalar::Int64),
        DataType::Timestamp(_, _) => primitive_cells!(TimestampMicrosecondType, Scalar::Int64),
        DataType::Duration(_) => primitive_cells!(DurationMicrosecondType, Scalar::Int64),
        DataType::Float32 => primitive_cells!(Float32Type, |v| Scalar::Float32(OrderedFloat(v))),
        DataType::Float64 => primitive_cells!(Float64Type, |v| Scalar::Float64(OrderedFloat(v))),
        DataType::Decimal128(_, _) => primitive_cells!(Decimal128Type, Scalar::Decimal128),
        DataType::Utf8 => array
            .as_string_opt::<i32>()
            .ok_or_else(|| downcast_failed(&data_type))?
            .iter()
            .map(|v| v.map(|s| Scalar::Utf8(s.to_string())))
            .collect(),
        DataType::Binary => array
            .as_binary_opt::<i32>()
            .ok_or_else(|| downcast_failed(&data_type))?
            .iter()
            .map(|v| v.map(|b| Scalar::Binary(b.to_vec())))
            .collect(),
        DataType::FixedSizeBinary(_) => array
            .as_fixed_size_binary_opt()
            .ok_or_else(|| downcast_failed(&data_type))?
            .iter()
            .map(|v| v.map(|b| Scalar::Binary(b.to_vec())))
            .collect(),
        _ => return Err(downcast_failed(&data_type)),
    };
    Column::from_cells(StorageType::new(data_type, nullable), cells)
}
