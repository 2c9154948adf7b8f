//! Typed column storage.
//!
//! A [`Column`] keeps its values in one typed vector plus an optional
//! validity bitmap, following the arrow array layout: a set bit marks a
//! valid cell, and a column whose storage type isn't nullable has no bitmap
//! at all. Null cells keep a placeholder default in the value vector.

use std::fmt::{Display, Formatter};

use arrow_schema::{DataType, TimeUnit};
use bitvec::vec::BitVec;
use ordered_float::OrderedFloat;

use crate::types::StorageType;
use crate::{Error, ErrorKind, Result};

/// A physical cell value.
///
/// Logical types share physical representations: `Date32` cells are
/// `Int32`, microsecond times, timestamps and durations are `Int64`, and
/// uuids are 16 byte `Binary`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scalar {
    /// Boolean cell.
    Boolean(bool),
    /// 32-bit integer cell.
    Int32(i32),
    /// 64-bit integer cell.
    Int64(i64),
    /// 32-bit float cell.
    Float32(OrderedFloat<f32>),
    /// 64-bit float cell.
    Float64(OrderedFloat<f64>),
    /// Unscaled decimal cell, the scale lives in the storage type.
    Decimal128(i128),
    /// Utf8 cell.
    Utf8(String),
    /// Binary cell.
    Binary(Vec<u8>),
}

impl Display for Scalar {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Boolean(v) => write!(f, "{v}"),
            Scalar::Int32(v) => write!(f, "{v}"),
            Scalar::Int64(v) => write!(f, "{v}"),
            Scalar::Float32(v) => write!(f, "{v}"),
            Scalar::Float64(v) => write!(f, "{v}"),
            Scalar::Decimal128(v) => write!(f, "{v}"),
            Scalar::Utf8(v) => write!(f, "{v:?}"),
            Scalar::Binary(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

/// Typed value vector of a column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    /// Untyped column, only holds its length.
    Null(usize),
    /// Boolean values.
    Boolean(BitVec),
    /// 32-bit integers, also dates as days since epoch.
    Int32(Vec<i32>),
    /// 64-bit integers, also times, timestamps and durations in microseconds.
    Int64(Vec<i64>),
    /// 32-bit floats.
    Float32(Vec<f32>),
    /// 64-bit floats.
    Float64(Vec<f64>),
    /// Unscaled 128-bit decimals.
    Decimal128(Vec<i128>),
    /// Strings.
    Utf8(Vec<String>),
    /// Byte strings, also 16 byte uuids.
    Binary(Vec<Vec<u8>>),
}

impl ColumnValues {
    fn empty(data_type: &DataType) -> Result<Self> {
        let values = match data_type {
            DataType::Null => ColumnValues::Null(0),
            DataType::Boolean => ColumnValues::Boolean(BitVec::new()),
            DataType::Int32 | DataType::Date32 => ColumnValues::Int32(vec![]),
            DataType::Int64
            | DataType::Time64(TimeUnit::Microsecond)
            | DataType::Timestamp(TimeUnit::Microsecond, _)
            | DataType::Duration(TimeUnit::Microsecond) => ColumnValues::Int64(vec![]),
            DataType::Float32 => ColumnValues::Float32(vec![]),
            DataType::Float64 => ColumnValues::Float64(vec![]),
            DataType::Decimal128(_, scale) if *scale >= 0 => ColumnValues::Decimal128(vec![]),
            DataType::Utf8 => ColumnValues::Utf8(vec![]),
            DataType::Binary | DataType::FixedSizeBinary(_) => ColumnValues::Binary(vec![]),
            _ => {
                return Err(Error::new(
                    ErrorKind::ArrowError,
                    format!("data type {data_type} is not supported as column storage"),
                ))
            }
        };
        Ok(values)
    }

    fn len(&self) -> usize {
        match self {
            ColumnValues::Null(len) => *len,
            ColumnValues::Boolean(v) => v.len(),
            ColumnValues::Int32(v) => v.len(),
            ColumnValues::Int64(v) => v.len(),
            ColumnValues::Float32(v) => v.len(),
            ColumnValues::Float64(v) => v.len(),
            ColumnValues::Decimal128(v) => v.len(),
            ColumnValues::Utf8(v) => v.len(),
            ColumnValues::Binary(v) => v.len(),
        }
    }

    fn get(&self, row: usize) -> Option<Scalar> {
        match self {
            ColumnValues::Null(_) => None,
            ColumnValues::Boolean(v) => v.get(row).map(|b| Scalar::Boolean(*b)),
            ColumnValues::Int32(v) => v.get(row).map(|x| Scalar::Int32(*x)),
            ColumnValues::Int64(v) => v.get(row).map(|x| Scalar::Int64(*x)),
            ColumnValues::Float32(v) => v.get(row).map(|x| Scalar::Float32(OrderedFloat(*x))),
            ColumnValues::Float64(v) => v.get(row).map(|x| Scalar::Float64(OrderedFloat(*x))),
            ColumnValues::Decimal128(v) => v.get(row).map(|x| Scalar::Decimal128(*x)),
            ColumnValues::Utf8(v) => v.get(row).map(|x| Scalar::Utf8(x.clone())),
            ColumnValues::Binary(v) => v.get(row).map(|x| Scalar::Binary(x.clone())),
        }
    }

    /// Store `value` at `row`, `row` must be in range.
    fn set(&mut self, row: usize, value: Scalar) -> std::result::Result<(), Scalar> {
        match (self, value) {
            (ColumnValues::Boolean(v), Scalar::Boolean(x)) => v.set(row, x),
            (ColumnValues::Int32(v), Scalar::Int32(x)) => v[row] = x,
            (ColumnValues::Int64(v), Scalar::Int64(x)) => v[row] = x,
            (ColumnValues::Float32(v), Scalar::Float32(x)) => v[row] = x.into_inner(),
            (ColumnValues::Float64(v), Scalar::Float64(x)) => v[row] = x.into_inner(),
            (ColumnValues::Decimal128(v), Scalar::Decimal128(x)) => v[row] = x,
            (ColumnValues::Utf8(v), Scalar::Utf8(x)) => v[row] = x,
            (ColumnValues::Binary(v), Scalar::Binary(x)) => v[row] = x,
            (_, value) => return Err(value),
        }
        Ok(())
    }

    fn push(&mut self, value: Option<Scalar>) -> std::result::Result<(), Scalar> {
        match (self, value) {
            (ColumnValues::Null(len), None) => *len += 1,
            (ColumnValues::Boolean(v), x) => match x {
                Some(Scalar::Boolean(x)) => v.push(x),
                None => v.push(false),
                Some(other) => return Err(other),
            },
            (ColumnValues::Int32(v), x) => match x {
                Some(Scalar::Int32(x)) => v.push(x),
                None => v.push(0),
                Some(other) => return Err(other),
            },
            (ColumnValues::Int64(v), x) => match x {
                Some(Scalar::Int64(x)) => v.push(x),
                None => v.push(0),
                Some(other) => return Err(other),
            },
            (ColumnValues::Float32(v), x) => match x {
                Some(Scalar::Float32(x)) => v.push(x.into_inner()),
                None => v.push(0.0),
                Some(other) => return Err(other),
            },
            (ColumnValues::Float64(v), x) => match x {
                Some(Scalar::Float64(x)) => v.push(x.into_inner()),
                None => v.push(0.0),
                Some(other) => return Err(other),
            },
            (ColumnValues::Decimal128(v), x) => match x {
                Some(Scalar::Decimal128(x)) => v.push(x),
                None => v.push(0),
                Some(other) => return Err(other),
            },
            (ColumnValues::Utf8(v), x) => match x {
                Some(Scalar::Utf8(x)) => v.push(x),
                None => v.push(String::new()),
                Some(other) => return Err(other),
            },
            (ColumnValues::Binary(v), x) => match x {
                Some(Scalar::Binary(x)) => v.push(x),
                None => v.push(vec![]),
                Some(other) => return Err(other),
            },
            (ColumnValues::Null(_), Some(other)) => return Err(other),
        }
        Ok(())
    }

    fn remove(&mut self, row: usize) {
        match self {
            ColumnValues::Null(len) => *len -= 1,
            ColumnValues::Boolean(v) => {
                v.remove(row);
            }
            ColumnValues::Int32(v) => {
                v.remove(row);
            }
            ColumnValues::Int64(v) => {
                v.remove(row);
            }
            ColumnValues::Float32(v) => {
                v.remove(row);
            }
            ColumnValues::Float64(v) => {
                v.remove(row);
            }
            ColumnValues::Decimal128(v) => {
                v.remove(row);
            }
            ColumnValues::Utf8(v) => {
                v.remove(row);
            }
            ColumnValues::Binary(v) => {
                v.remove(row);
            }
        }
    }
}

/// A typed column: storage type, values and validity bitmap.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    storage: StorageType,
    values: ColumnValues,
    /// Present iff the storage type is nullable and typed.
    validity: Option<BitVec>,
}

impl Column {
    /// Create an empty column of the given storage type.
    pub fn new_empty(storage: StorageType) -> Result<Self> {
        let values = ColumnValues::empty(&storage.data_type)?;
        // The untyped column is always nullable and carries no bitmap.
        let storage = if storage.is_untyped() {
            StorageType::untyped()
        } else {
            storage
        };
        let validity = (storage.nullable && !storage.is_untyped()).then(BitVec::new);
        Ok(Self {
            storage,
            values,
            validity,
        })
    }

    /// Create a column of `len` null cells.
    pub fn nulls(storage: StorageType, len: usize) -> Result<Self> {
        let mut column = Self::new_empty(storage)?;
        for _ in 0..len {
            column.push(None)?;
        }
        Ok(column)
    }

    /// Create a column from its cells, `None` is the null marker.
    pub fn from_cells(
        storage: StorageType,
        cells: impl IntoIterator<Item = Option<Scalar>>,
    ) -> Result<Self> {
        let mut column = Self::new_empty(storage)?;
        for cell in cells {
            column.push(cell)?;
        }
        Ok(column)
    }

    /// Return the storage type.
    pub fn storage(&self) -> &StorageType {
        &self.storage
    }

    /// Return the arrow data type of the values.
    pub fn data_type(&self) -> &DataType {
        &self.storage.data_type
    }

    /// Return the typed values.
    pub fn values(&self) -> &ColumnValues {
        &self.values
    }

    /// Return the validity bitmap, `None` when the column has no null marker.
    pub fn validity(&self) -> Option<&BitVec> {
        self.validity.as_ref()
    }

    /// Return the number of cells.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the column has no cell.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the number of null cells.
    pub fn null_count(&self) -> usize {
        match (&self.values, &self.validity) {
            (ColumnValues::Null(len), _) => *len,
            (_, Some(validity)) => validity.count_zeros(),
            (_, None) => 0,
        }
    }

    /// Check if the cell at `row` holds a value.
    pub fn is_valid(&self, row: usize) -> bool {
        match (&self.values, &self.validity) {
            (ColumnValues::Null(_), _) => false,
            (_, Some(validity)) => validity.get(row).map(|b| *b).unwrap_or(false),
            (_, None) => row < self.len(),
        }
    }

    /// Get the cell at `row`, `None` for null cells and out of range rows.
    pub fn get(&self, row: usize) -> Option<Scalar> {
        if !self.is_valid(row) {
            return None;
        }
        self.values.get(row)
    }

    /// Iterate over the cells.
    pub fn iter(&self) -> impl Iterator<Item = Option<Scalar>> + '_ {
        (0..self.len()).map(|row| self.get(row))
    }

    /// Overwrite the cell at `row` in place.
    ///
    /// Writing `None` into a column without null marker fails, the caller
    /// has to promote the column first.
    pub fn set(&mut self, row: usize, value: Option<Scalar>) -> Result<()> {
        if row >= self.len() {
            return Err(Error::new(
                ErrorKind::RowNotFound,
                format!("row {row} is out of range of column with {} rows", self.len()),
            ));
        }
        match value {
            None => match &mut self.validity {
                Some(validity) => {
                    validity.set(row, false);
                    Ok(())
                }
                None if matches!(self.values, ColumnValues::Null(_)) => Ok(()),
                None => Err(Error::new(
                    ErrorKind::ValueInvalid,
                    format!("column of type {} has no null marker", self.storage),
                )),
            },
            Some(value) => {
                self.check_width(&value)?;
                self.values
                    .set(row, value)
                    .map_err(|value| self.mismatch(&value))?;
                if let Some(validity) = &mut self.validity {
                    validity.set(row, true);
                }
                Ok(())
            }
        }
    }

    /// Append one cell.
    pub fn push(&mut self, value: Option<Scalar>) -> Result<()> {
        if value.is_none() && !self.storage.nullable {
            return Err(Error::new(
                ErrorKind::ValueInvalid,
                format!("column of type {} has no null marker", self.storage),
            ));
        }
        if let Some(value) = &value {
            self.check_width(value)?;
        }
        let valid = value.is_some();
        self.values
            .push(value)
            .map_err(|value| self.mismatch(&value))?;
        if let Some(validity) = &mut self.validity {
            validity.push(valid);
        }
        Ok(())
    }

    /// Remove the cell at `row`, `row` must be in range.
    pub(crate) fn remove(&mut self, row: usize) {
        self.values.remove(row);
        if let Some(validity) = &mut self.validity {
            validity.remove(row);
        }
    }

    /// Give the column a null marker with every cell valid. Values are
    /// untouched.
    pub(crate) fn promote_to_nullable(&mut self) {
        if self.validity.is_none() && !self.storage.is_untyped() {
            self.validity = Some(BitVec::repeat(true, self.len()));
        }
        self.storage.nullable = true;
    }

    /// Drop the null marker of a column that holds no null.
    ///
    /// Returns false and leaves the column untouched if it has null cells.
    pub(crate) fn release_null_marker(&mut self) -> bool {
        if self.storage.is_untyped() || self.null_count() > 0 {
            return false;
        }
        self.validity = None;
        self.storage.nullable = false;
        true
    }

    /// Convert the column to `target` if every valid value is exactly
    /// representable in it.
    ///
    /// Only widening conversions are attempted: int32 to int64, float32 to
    /// float64, int32 to float64, int64 to float64 and decimal rescaling.
    /// The null marker is carried over unchanged.
    pub(crate) fn cast_exact(&self, target: &DataType) -> Option<Column> {
        let values = match (&self.values, self.data_type(), target) {
            (ColumnValues::Int32(v), DataType::Int32, DataType::Int64) => {
                ColumnValues::Int64(v.iter().map(|x| i64::from(*x)).collect())
            }
            (ColumnValues::Float32(v), DataType::Float32, DataType::Float64) => {
                ColumnValues::Float64(v.iter().map(|x| f64::from(*x)).collect())
            }
            (ColumnValues::Int32(v), DataType::Int32, DataType::Float64) => {
                ColumnValues::Float64(v.iter().map(|x| f64::from(*x)).collect())
            }
            (ColumnValues::Int64(v), DataType::Int64, DataType::Float64) => {
                let mut out = Vec::with_capacity(v.len());
                for x in v {
                    out.push(long_to_double_exact(*x)?);
                }
                ColumnValues::Float64(out)
            }
            (
                ColumnValues::Decimal128(v),
                DataType::Decimal128(_, from_scale),
                DataType::Decimal128(precision, scale),
            ) => {
                let mut out = Vec::with_capacity(v.len());
                for x in v {
                    out.push(rescale_decimal(*x, *from_scale, *scale, *precision)?);
                }
                ColumnValues::Decimal128(out)
            }
            _ => return None,
        };
        Some(Column {
            storage: StorageType::new(target.clone(), self.storage.nullable),
            values,
            validity: self.validity.clone(),
        })
    }

    fn check_width(&self, value: &Scalar) -> Result<()> {
        if let (DataType::FixedSizeBinary(width), Scalar::Binary(bytes)) = (self.data_type(), value)
        {
            if bytes.len() != *width as usize {
                return Err(Error::new(
                    ErrorKind::ValueInvalid,
                    format!(
                        "expected {width} bytes for {}, got {}",
                        self.storage,
                        bytes.len()
                    ),
                ));
            }
        }
        Ok(())
    }

    fn mismatch(&self, value: &Scalar) -> Error {
        Error::new(
            ErrorKind::ValueInvalid,
            format!("cell {value:?} doesn't fit column of type {}", self.storage),
        )
    }
}

/// Convert a long to a double, `None` if the double can't hold it exactly.
pub(crate) fn long_to_double_exact(v: i64) -> Option<f64> {
    let f = v as f64;
    (f as i128 == i128::from(v)).then_some(f)
}

/// Rescale an unscaled decimal, `None` if the result isn't exact or
/// doesn't fit `precision` digits.
pub(crate) fn rescale_decimal(
    v: i128,
    from_scale: i8,
    to_scale: i8,
    precision: u8,
) -> Option<i128> {
    if from_scale < 0 || to_scale < 0 {
        return None;
    }
    let rescaled = if to_scale >= from_scale {
        v.checked_mul(10i128.checked_pow((to_scale - from_scale) as u32)?)?
    } else {
        let factor = 10i128.checked_pow((from_scale - to_scale) as u32)?;
        if v % factor != 0 {
            return None;
        }
        v / factor
    };
    let bound = 10u128.checked_pow(u32::from(precision))?;
    (rescaled.unsigned_abs() < bound).then_some(rescaled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_column_has_no_validity() {
        let column = Column::from_cells(
            StorageType::required(DataType::Int64),
            [Some(Scalar::Int64(1)), Some(Scalar::Int64(2))],
        )
        .unwrap();
        assert!(column.validity().is_none());
        assert_eq!(column.null_count(), 0);
        assert_eq!(column.get(1), Some(Scalar::Int64(2)));
        assert_eq!(column.get(2), None);
    }

    #[test]
    fn test_null_into_required_column() {
        let mut column = Column::from_cells(
            StorageType::required(DataType::Int64),
            [Some(Scalar::Int64(1))],
        )
        .unwrap();
        let err = column.set(0, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueInvalid);
        assert_eq!(column.get(0), Some(Scalar::Int64(1)));

        column.promote_to_nullable();
        column.set(0, None).unwrap();
        assert_eq!(column.get(0), None);
        assert_eq!(column.null_count(), 1);
        assert!(column.storage().nullable);
    }

    #[test]
    fn test_promote_keeps_values() {
        let mut column = Column::from_cells(
            StorageType::required(DataType::Int64),
            (1..=3).map(|v| Some(Scalar::Int64(v))),
        )
        .unwrap();
        column.promote_to_nullable();
        assert_eq!(
            column.iter().collect::<Vec<_>>(),
            vec![
                Some(Scalar::Int64(1)),
                Some(Scalar::Int64(2)),
                Some(Scalar::Int64(3))
            ]
        );
        assert_eq!(column.validity().map(|v| v.count_ones()), Some(3));
    }

    #[test]
    fn test_release_null_marker() {
        let mut column = Column::from_cells(
            StorageType::nullable(DataType::Utf8),
            [Some(Scalar::Utf8("a".to_string())), None],
        )
        .unwrap();
        assert!(!column.release_null_marker());

        column.set(1, Some(Scalar::Utf8("b".to_string()))).unwrap();
        assert!(column.release_null_marker());
        assert_eq!(column.storage(), &StorageType::required(DataType::Utf8));
    }

    #[test]
    fn test_mismatched_cell() {
        let mut column = Column::new_empty(StorageType::nullable(DataType::Int32)).unwrap();
        let err = column.push(Some(Scalar::Utf8("x".to_string()))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueInvalid);
        assert!(column.is_empty());
    }

    #[test]
    fn test_fixed_size_binary_width() {
        let mut column =
            Column::new_empty(StorageType::required(DataType::FixedSizeBinary(16))).unwrap();
        assert!(column.push(Some(Scalar::Binary(vec![0; 15]))).is_err());
        column.push(Some(Scalar::Binary(vec![0; 16]))).unwrap();
        assert_eq!(column.len(), 1);
    }

    #[test]
    fn test_untyped_column() {
        let mut column = Column::nulls(StorageType::untyped(), 2).unwrap();
        assert_eq!(column.null_count(), 2);
        column.set(0, None).unwrap();
        assert!(column.set(0, Some(Scalar::Int32(1))).is_err());
        assert!(column.storage().nullable);
    }

    #[test]
    fn test_cast_exact() {
        let ints = Column::from_cells(
            StorageType::nullable(DataType::Int32),
            [Some(Scalar::Int32(7)), None],
        )
        .unwrap();
        let longs = ints.cast_exact(&DataType::Int64).unwrap();
        assert_eq!(longs.get(0), Some(Scalar::Int64(7)));
        assert_eq!(longs.get(1), None);

        let big = Column::from_cells(
            StorageType::required(DataType::Int64),
            [Some(Scalar::Int64(i64::MAX))],
        )
        .unwrap();
        assert!(big.cast_exact(&DataType::Float64).is_none());
        assert!(ints.cast_exact(&DataType::Utf8).is_none());
    }

    #[test]
    fn test_rescale_decimal() {
        assert_eq!(rescale_decimal(125, 2, 4, 10), Some(12500));
        assert_eq!(rescale_decimal(12500, 4, 2, 10), Some(125));
        assert_eq!(rescale_decimal(12501, 4, 2, 10), None);
        assert_eq!(rescale_decimal(12500, 2, 2, 4), None);
    }

    #[test]
    fn test_remove() {
        let mut column = Column::from_cells(
            StorageType::nullable(DataType::Boolean),
            [Some(Scalar::Boolean(true)), None, Some(Scalar::Boolean(false))],
        )
        .unwrap();
        column.remove(0);
        assert_eq!(column.iter().collect::<Vec<_>>(), vec![None, Some(Scalar::Boolean(false))]);
    }
}
