//! The columnar table a record type binds to.

use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::mem::discriminant;

use itertools::Itertools;

use crate::codec::Codec;
use crate::column::{Column, Scalar};
use crate::config::BindConfig;
use crate::types::{FieldSpec, SemanticType, StorageType, Value};
use crate::validator::{expected_storage_type, Violation};
use crate::{Error, ErrorKind, Result};

/// The index values identifying one row, one entry per index level.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexKey(pub Vec<Option<Scalar>>);

impl Display for IndexKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({})",
            self.0
                .iter()
                .map(|v| match v {
                    Some(v) => v.to_string(),
                    None => "null".to_string(),
                })
                .join(", ")
        )
    }
}

/// Addresses exactly one row of a table at the time it was captured.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RowLocator {
    /// Row position, valid while the table generation is unchanged.
    Position {
        /// Row number.
        row: usize,
        /// Table generation the position was taken at.
        generation: u64,
    },
    /// Index key, valid while a row with this key exists.
    Key(IndexKey),
}

/// Where a field's cells live in a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Ordinary column at this position.
    Column(usize),
    /// Index level at this position.
    IndexLevel(usize),
}

/// Ordered named columns plus zero or more index levels, all of the same
/// length.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnarTable {
    columns: Vec<(String, Column)>,
    index: Vec<(String, Column)>,
    num_rows: usize,
    /// Bumped on every change of row positions.
    generation: u64,
    key_lookup: HashMap<IndexKey, usize>,
}

impl ColumnarTable {
    /// Create a table without index levels.
    pub fn new(columns: Vec<(String, Column)>) -> Result<Self> {
        let num_rows = columns.first().map(|(_, c)| c.len()).unwrap_or(0);
        let table = Self {
            columns,
            index: vec![],
            num_rows,
            generation: 0,
            key_lookup: HashMap::new(),
        };
        table.check_shape()?;
        Ok(table)
    }

    /// Attach index levels to the table.
    pub fn with_index(mut self, levels: Vec<(String, Column)>) -> Result<Self> {
        if self.columns.is_empty() {
            self.num_rows = levels.first().map(|(_, c)| c.len()).unwrap_or(0);
        }
        self.index = levels;
        self.check_shape()?;
        self.rebuild_keys();
        Ok(self)
    }

    /// Build a table from row tuples and column names, inferring every
    /// column's storage type from its values.
    ///
    /// A column without any value, because the table is empty or the
    /// column is all null, gets the untyped storage.
    pub fn from_rows<S: AsRef<str>>(names: &[S], rows: Vec<Vec<Option<Value>>>) -> Result<Self> {
        let mut cells: Vec<Vec<Option<Value>>> = vec![Vec::with_capacity(rows.len()); names.len()];
        for (pos, row) in rows.into_iter().enumerate() {
            if row.len() != names.len() {
                return Err(Error::new(
                    ErrorKind::ValueInvalid,
                    format!(
                        "row {pos} has {} values, expected {}",
                        row.len(),
                        names.len()
                    ),
                ));
            }
            for (column, value) in cells.iter_mut().zip(row) {
                column.push(value);
            }
        }

        let columns = names
            .iter()
            .zip(cells)
            .map(|(name, values)| {
                let name = name.as_ref();
                infer_column(name, values)
                    .map(|column| (name.to_string(), column))
                    .map_err(|e| e.with_context("column", name))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(columns)
    }

    fn check_shape(&self) -> Result<()> {
        let mut names = HashSet::new();
        for (name, column) in self.columns.iter().chain(self.index.iter()) {
            if !names.insert(name.as_str()) {
                return Err(Error::new(
                    ErrorKind::ValueInvalid,
                    format!("name {name} appears more than once in the table"),
                ));
            }
            if column.len() != self.num_rows {
                return Err(Error::new(
                    ErrorKind::ValueInvalid,
                    format!(
                        "{name} has {} rows, expected {}",
                        column.len(),
                        self.num_rows
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Return the number of rows.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Return the generation, bumped whenever row positions change.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Return the ordinary columns in order.
    pub fn columns(&self) -> &[(String, Column)] {
        &self.columns
    }

    /// Return the index levels in order.
    pub fn index_levels(&self) -> &[(String, Column)] {
        &self.index
    }

    /// Return the names of the ordinary columns.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Return the names of the index levels.
    pub fn index_names(&self) -> Vec<&str> {
        self.index.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Lookup an ordinary column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    /// Lookup an index level by name.
    pub fn index_level(&self, name: &str) -> Option<&Column> {
        self.index.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    /// Find where the cells of `name` live.
    pub fn slot_of(&self, name: &str) -> Option<Slot> {
        if let Some(pos) = self.columns.iter().position(|(n, _)| n == name) {
            return Some(Slot::Column(pos));
        }
        self.index
            .iter()
            .position(|(n, _)| n == name)
            .map(Slot::IndexLevel)
    }

    pub(crate) fn slot(&self, slot: Slot) -> Option<&Column> {
        match slot {
            Slot::Column(pos) => self.columns.get(pos).map(|(_, c)| c),
            Slot::IndexLevel(pos) => self.index.get(pos).map(|(_, c)| c),
        }
    }

    /// Mutable access to the column at `slot`.
    ///
    /// Callers must not change the values of index levels, those only
    /// change through [`ColumnarTable::replace`] so that keys stay
    /// consistent.
    pub(crate) fn slot_mut(&mut self, slot: Slot) -> Option<&mut Column> {
        match slot {
            Slot::Column(pos) => self.columns.get_mut(pos).map(|(_, c)| c),
            Slot::IndexLevel(pos) => self.index.get_mut(pos).map(|(_, c)| c),
        }
    }

    /// Replace the column at `slot`, the new column must have the same
    /// length.
    pub(crate) fn replace(&mut self, slot: Slot, column: Column) {
        debug_assert_eq!(column.len(), self.num_rows);
        match slot {
            Slot::Column(pos) => self.columns[pos].1 = column,
            Slot::IndexLevel(pos) => {
                self.index[pos].1 = column;
                self.rebuild_keys();
            }
        }
    }

    /// Move the named columns into the index levels, in the given order.
    ///
    /// The table must have no index levels yet and every name must be a
    /// column.
    pub(crate) fn set_index(&mut self, names: &[&str]) -> Result<()> {
        if !self.index.is_empty() {
            return Err(Error::new(
                ErrorKind::Unexpected,
                "table already has index levels",
            ));
        }
        if let Some(missing) = names.iter().find(|n| self.column(n).is_none()) {
            return Err(Error::new(
                ErrorKind::MissingIndexField,
                format!("{missing} is not a column of the table"),
            ));
        }
        for name in names {
            if let Some(pos) = self.columns.iter().position(|(n, _)| n == name) {
                let level = self.columns.remove(pos);
                self.index.push(level);
            }
        }
        self.rebuild_keys();
        Ok(())
    }

    /// Reorder the ordinary columns, `names` must be a permutation of the
    /// column names.
    pub(crate) fn reorder_columns(&mut self, names: &[&str]) {
        debug_assert_eq!(names.len(), self.columns.len());
        self.columns.sort_by_key(|(n, _)| {
            names
                .iter()
                .position(|m| *m == n.as_str())
                .unwrap_or(usize::MAX)
        });
    }

    /// Return the index key of `row`, `None` if the row doesn't exist or
    /// the table has no index levels.
    pub fn key_at(&self, row: usize) -> Option<IndexKey> {
        if self.index.is_empty() || row >= self.num_rows {
            return None;
        }
        Some(IndexKey(self.index.iter().map(|(_, c)| c.get(row)).collect()))
    }

    /// Capture a positional locator for `row`.
    pub fn locator_at(&self, row: usize) -> Option<RowLocator> {
        (row < self.num_rows).then_some(RowLocator::Position {
            row,
            generation: self.generation,
        })
    }

    /// Resolve a locator to the row position it addresses now.
    pub fn resolve(&self, locator: &RowLocator) -> Result<usize> {
        match locator {
            RowLocator::Position { row, generation } => {
                if *generation != self.generation {
                    return Err(Error::new(
                        ErrorKind::StaleLocator,
                        format!(
                            "locator of row {row} was taken at generation {generation}, \
                             table is at {}",
                            self.generation
                        ),
                    ));
                }
                if *row >= self.num_rows {
                    return Err(Error::new(
                        ErrorKind::RowNotFound,
                        format!("row {row} is out of range of {} rows", self.num_rows),
                    ));
                }
                Ok(*row)
            }
            RowLocator::Key(key) => self.key_lookup.get(key).copied().ok_or_else(|| {
                Error::new(ErrorKind::RowNotFound, format!("no row has index key {key}"))
            }),
        }
    }

    /// Return every index key held by more than one row.
    pub fn duplicate_keys(&self) -> Vec<IndexKey> {
        if self.index.is_empty() {
            return vec![];
        }
        (0..self.num_rows)
            .filter_map(|row| self.key_at(row))
            .duplicates()
            .collect()
    }

    /// Append one row. `columns` and `levels` hold one cell per column and
    /// per index level, in table order.
    ///
    /// The row is rejected as a whole: on error the table is unchanged.
    pub(crate) fn push_row(
        &mut self,
        columns: Vec<Option<Scalar>>,
        levels: Vec<Option<Scalar>>,
    ) -> Result<usize> {
        if columns.len() != self.columns.len() || levels.len() != self.index.len() {
            return Err(Error::new(
                ErrorKind::Unexpected,
                "row shape doesn't match the table",
            ));
        }
        if !self.index.is_empty() {
            let key = IndexKey(levels.clone());
            if self.key_lookup.contains_key(&key) {
                return Err(Error::schema(vec![Violation::new(
                    self.index_names().join(", "),
                    None,
                    None,
                    format!("index key {key} already exists"),
                )]));
            }
        }

        let row = self.num_rows;
        let targets = self.columns.iter_mut().chain(self.index.iter_mut());
        let mut pushed = 0;
        let mut result = Ok(());
        for ((name, column), cell) in targets.zip(columns.into_iter().chain(levels)) {
            if let Err(e) = column.push(cell) {
                result = Err(e.with_context("column", name.as_str()));
                break;
            }
            pushed += 1;
        }
        if let Err(e) = result {
            for (_, column) in self
                .columns
                .iter_mut()
                .chain(self.index.iter_mut())
                .take(pushed)
            {
                column.remove(row);
            }
            return Err(e);
        }

        self.num_rows += 1;
        self.generation += 1;
        if let Some(key) = self.key_at(row) {
            self.key_lookup.entry(key).or_insert(row);
        }
        Ok(row)
    }

    /// Remove one row, shifting later rows up.
    pub(crate) fn remove_row(&mut self, row: usize) -> Result<()> {
        if row >= self.num_rows {
            return Err(Error::new(
                ErrorKind::RowNotFound,
                format!("row {row} is out of range of {} rows", self.num_rows),
            ));
        }
        for (_, column) in self.columns.iter_mut().chain(self.index.iter_mut()) {
            column.remove(row);
        }
        self.num_rows -= 1;
        self.generation += 1;
        self.rebuild_keys();
        Ok(())
    }

    fn rebuild_keys(&mut self) {
        let mut lookup = HashMap::with_capacity(self.num_rows);
        for row in 0..self.num_rows {
            if let Some(key) = self.key_at(row) {
                lookup.entry(key).or_insert(row);
            }
        }
        self.key_lookup = lookup;
    }
}

/// Infer a column from its values.
fn infer_column(name: &str, values: Vec<Option<Value>>) -> Result<Column> {
    let nullable = values.iter().any(Option::is_none);
    let Some(semantic) = infer_semantic_type(&values)? else {
        return Column::nulls(StorageType::untyped(), values.len());
    };
    let field = FieldSpec {
        name: name.to_string(),
        semantic_type: semantic.clone(),
        nullable,
        is_index: false,
    };
    let storage = expected_storage_type(&field, &BindConfig::default());
    let codec = Codec::new(semantic, storage.data_type.clone());
    let cells = values
        .iter()
        .map(|v| v.as_ref().map(|v| codec.encode(v)).transpose())
        .collect::<Result<Vec<_>>>()?;
    Column::from_cells(storage, cells)
}

fn natural_semantic_type(value: &Value) -> SemanticType {
    match value {
        Value::Boolean(_) => SemanticType::Boolean,
        Value::Int(_) => SemanticType::Int,
        Value::Long(_) => SemanticType::Long,
        Value::Float(_) => SemanticType::Float,
        Value::Double(_) => SemanticType::Double,
        Value::Decimal(v) => SemanticType::Decimal {
            precision: crate::types::MAX_DECIMAL_PRECISION,
            scale: v.scale() as u8,
        },
        Value::Date(_) => SemanticType::Date,
        Value::Time(_) => SemanticType::Time,
        Value::Timestamp(_) => SemanticType::Timestamp { tz: None },
        Value::Timestampz(v) => SemanticType::Timestamp {
            tz: Some(*v.offset()),
        },
        Value::Duration(_) => SemanticType::Duration,
        Value::String(_) => SemanticType::String,
        Value::Uuid(_) => SemanticType::Uuid,
        Value::Opaque(_) => SemanticType::Opaque,
    }
}

fn infer_semantic_type(values: &[Option<Value>]) -> Result<Option<SemanticType>> {
    let mut inferred: Option<SemanticType> = None;
    for value in values.iter().flatten() {
        let semantic = natural_semantic_type(value);
        inferred = match inferred {
            None => Some(semantic),
            Some(current) if discriminant(&current) != discriminant(&semantic) => {
                return Err(Error::new(
                    ErrorKind::ValueInvalid,
                    format!("mixed value types {current} and {semantic}"),
                ))
            }
            Some(SemanticType::Decimal { precision, scale }) => match semantic {
                SemanticType::Decimal { scale: other, .. } => Some(SemanticType::Decimal {
                    precision,
                    scale: scale.max(other),
                }),
                _ => Some(SemanticType::Decimal { precision, scale }),
            },
            Some(current) => Some(current),
        };
    }
    Ok(inferred)
}

#[cfg(test)]
mod tests {
    use arrow_schema::DataType;
    use rust_decimal::Decimal;

    use super::*;

    fn people() -> ColumnarTable {
        ColumnarTable::from_rows(
            &["id", "name"],
            vec![
                vec![Some(Value::Long(1)), Some(Value::String("a".to_string()))],
                vec![Some(Value::Long(2)), None],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_from_rows_infers_storage() {
        let table = people();
        assert_eq!(table.num_rows(), 2);
        assert_eq!(
            table.column("id").unwrap().storage(),
            &StorageType::required(DataType::Int64)
        );
        assert_eq!(
            table.column("name").unwrap().storage(),
            &StorageType::nullable(DataType::Utf8)
        );
    }

    #[test]
    fn test_from_rows_untyped_columns() {
        let table = ColumnarTable::from_rows(&["a"], vec![vec![None], vec![None]]).unwrap();
        assert!(table.column("a").unwrap().storage().is_untyped());
        assert_eq!(table.column("a").unwrap().len(), 2);

        let table = ColumnarTable::from_rows(&["a", "b"], vec![]).unwrap();
        assert_eq!(table.num_rows(), 0);
        assert!(table.column("b").unwrap().storage().is_untyped());
    }

    #[test]
    fn test_from_rows_decimal_scale() {
        let table = ColumnarTable::from_rows(
            &["price"],
            vec![
                vec![Some(Value::Decimal(Decimal::new(15, 1)))],
                vec![Some(Value::Decimal(Decimal::new(125, 2)))],
            ],
        )
        .unwrap();
        let column = table.column("price").unwrap();
        assert_eq!(column.data_type(), &DataType::Decimal128(38, 2));
        assert_eq!(column.get(0), Some(Scalar::Decimal128(150)));
    }

    #[test]
    fn test_from_rows_rejects_mixed_types() {
        let err = ColumnarTable::from_rows(
            &["a"],
            vec![vec![Some(Value::Long(1))], vec![Some(Value::Boolean(true))]],
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueInvalid);

        let err = ColumnarTable::from_rows(&["a", "b"], vec![vec![None]]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueInvalid);
    }

    #[test]
    fn test_set_index_and_resolve_keys() {
        let mut table = people();
        table.set_index(&["id"]).unwrap();
        assert_eq!(table.index_names(), vec!["id"]);
        assert_eq!(table.column_names(), vec!["name"]);

        let key = table.key_at(1).unwrap();
        assert_eq!(key, IndexKey(vec![Some(Scalar::Int64(2))]));
        assert_eq!(table.resolve(&RowLocator::Key(key)).unwrap(), 1);

        let err = table
            .resolve(&RowLocator::Key(IndexKey(vec![Some(Scalar::Int64(3))])))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RowNotFound);
    }

    #[test]
    fn test_set_index_missing_column() {
        let mut table = people();
        let err = table.set_index(&["id", "email"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingIndexField);
        assert_eq!(table, people());
    }

    #[test]
    fn test_remove_row_makes_positions_stale() {
        let mut table = people();
        let first = table.locator_at(0).unwrap();
        table.remove_row(0).unwrap();
        assert_eq!(table.num_rows(), 1);
        assert_eq!(
            table.resolve(&first).unwrap_err().kind(),
            ErrorKind::StaleLocator
        );
        let fresh = table.locator_at(0).unwrap();
        assert_eq!(table.resolve(&fresh).unwrap(), 0);
        assert_eq!(
            table
                .resolve(&RowLocator::Position {
                    row: 5,
                    generation: table.generation()
                })
                .unwrap_err()
                .kind(),
            ErrorKind::RowNotFound
        );
    }

    #[test]
    fn test_push_row_rejects_duplicate_key() {
        let mut table = people();
        table.set_index(&["id"]).unwrap();
        let err = table
            .push_row(vec![None], vec![Some(Scalar::Int64(1))])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
        assert_eq!(table.num_rows(), 2);

        let row = table
            .push_row(
                vec![Some(Scalar::Utf8("c".to_string()))],
                vec![Some(Scalar::Int64(3))],
            )
            .unwrap();
        assert_eq!(row, 2);
        assert!(table.duplicate_keys().is_empty());
    }

    #[test]
    fn test_push_row_is_atomic() {
        let mut table = people();
        let err = table
            .push_row(
                vec![
                    Some(Scalar::Int64(3)),
                    Some(Scalar::Boolean(true)),
                ],
                vec![],
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueInvalid);
        assert_eq!(table, people());
    }

    #[test]
    fn test_duplicate_keys() {
        let mut table = ColumnarTable::from_rows(
            &["id"],
            vec![
                vec![Some(Value::Int(1))],
                vec![Some(Value::Int(1))],
                vec![Some(Value::Int(2))],
            ],
        )
        .unwrap();
        table.set_index(&["id"]).unwrap();
        assert_eq!(
            table.duplicate_keys(),
            vec![IndexKey(vec![Some(Scalar::Int32(1))])]
        );
    }

    #[test]
    fn test_mismatched_lengths() {
        let a = Column::nulls(StorageType::untyped(), 1).unwrap();
        let b = Column::nulls(StorageType::untyped(), 2).unwrap();
        let err = ColumnarTable::new(vec![("a".to_string(), a), ("b".to_string(), b)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueInvalid);
    }
}
