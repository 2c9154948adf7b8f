//! Record tables: a columnar table bound to a record type, and the record
//! views it produces.

use std::borrow::Borrow;
use std::cell::RefCell;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;

use arrow_array::RecordBatch;

use crate::binding::{AccessorTable, BackingAdapter};
use crate::codec::Codec;
use crate::column::Column;
use crate::config::{BindConfig, SetIndex};
use crate::index::{IndexBinder, IndexPlacement};
use crate::schema::{register, Record};
use crate::table::{ColumnarTable, IndexKey, RowLocator, Slot};
use crate::types::{FieldValue, RecordSchema, StorageType, Value};
use crate::validator::{expected_storage_type, Validator};
use crate::{Error, ErrorKind, Result};

/// A columnar table bound to the record type `R`.
///
/// Reading or writing a field through a [`RecordView`] reads or writes the
/// table cell in place. The table lives in a [`RefCell`], so a record table
/// can't be shared across threads.
pub struct RecordTable<R: Record> {
    schema: Arc<RecordSchema>,
    /// The schema the table is validated against, differs from `schema`
    /// when the table is bound without index.
    bound: Arc<RecordSchema>,
    config: BindConfig,
    accessors: AccessorTable,
    table: RefCell<ColumnarTable>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> RecordTable<R> {
    /// Bind an existing table with the record type's configuration.
    pub fn try_new(table: ColumnarTable) -> Result<Self> {
        Self::with_config(table, R::config())
    }

    /// Bind an existing table with an explicit configuration.
    ///
    /// Places the index fields, then validates the table, promoting it in
    /// place where needed.
    pub fn with_config(table: ColumnarTable, config: BindConfig) -> Result<Self> {
        let schema = register::<R>()?;
        let mode = config.set_index;
        Self::bind(schema, config, table, mode)
    }

    /// Build a table from row tuples and column names.
    pub fn from_rows<S: AsRef<str>>(names: &[S], rows: Vec<Vec<Option<Value>>>) -> Result<Self> {
        Self::try_new(ColumnarTable::from_rows(names, rows)?)
    }

    /// Bind a table imported from an arrow record batch.
    pub fn from_record_batch(batch: &RecordBatch) -> Result<Self> {
        Self::try_new(ColumnarTable::try_from(batch)?)
    }

    /// Build a table from record instances.
    ///
    /// Values are copied once: the records stay disconnected from the
    /// table. Index fields are placed in the index levels whatever the
    /// `set_index` mode.
    pub fn from_records<I>(records: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Borrow<R>,
    {
        let schema = register::<R>()?;
        let config = R::config();

        let mut cells: Vec<Vec<Option<Value>>> = vec![vec![]; schema.len()];
        for record in records {
            let values = record_values(&schema, record.borrow())?;
            for (column, value) in cells.iter_mut().zip(values) {
                column.push(value);
            }
        }

        let mut columns = vec![];
        let mut levels = vec![];
        for (field, values) in schema.fields().iter().zip(cells) {
            let storage = expected_storage_type(field, &config);
            let codec = Codec::new(
                field.semantic_type.clone(),
                storage.data_type.clone(),
            );
            let column = Column::from_cells(
                storage,
                values
                    .iter()
                    .map(|v| v.as_ref().map(|v| codec.encode(v)).transpose())
                    .collect::<Result<Vec<_>>>()
                    .map_err(|e| e.with_context("field", field.name.as_str()))?,
            )
            .map_err(|e| e.with_context("field", field.name.as_str()))?;
            if field.is_index {
                levels.push((field.name.clone(), column));
            } else {
                columns.push((field.name.clone(), column));
            }
        }

        let table = if levels.is_empty() {
            ColumnarTable::new(columns)?
        } else {
            ColumnarTable::new(columns)?.with_index(levels)?
        };
        Self::bind(schema, config, table, SetIndex::False)
    }

    fn bind(
        schema: Arc<RecordSchema>,
        config: BindConfig,
        mut table: ColumnarTable,
        mode: SetIndex,
    ) -> Result<Self> {
        let bound = match IndexBinder::new(&schema, mode).bind(&mut table)? {
            IndexPlacement::Indexed => schema.clone(),
            IndexPlacement::Unindexed => Arc::new(schema.unindexed(&table.column_names())),
        };
        Validator::new(&bound, &config).validate(&mut table)?;
        let accessors = AccessorTable::build(&bound, &config, &table)?;
        log::debug!(
            "bound {} rows to record type {}",
            table.num_rows(),
            schema.name()
        );
        Ok(Self {
            schema,
            bound,
            config,
            accessors,
            table: RefCell::new(table),
            _record: PhantomData,
        })
    }

    /// Validate the table against the schema again.
    ///
    /// A no-op on a table that already conforms.
    pub fn validate(&self) -> Result<()> {
        let mut table = self.borrow_mut()?;
        Validator::new(&self.bound, &self.config).validate(&mut table)
    }

    /// Return the record schema.
    pub fn schema(&self) -> &Arc<RecordSchema> {
        &self.schema
    }

    /// Check if every field of the record is bound to the table.
    ///
    /// A table bound with `set_index = auto` that lacks some index field
    /// keeps no index, and the missing fields aren't bound.
    pub fn is_complete(&self) -> bool {
        self.accessors.len() == self.schema.len()
    }

    /// Return the binding configuration.
    pub fn config(&self) -> &BindConfig {
        &self.config
    }

    /// Return the number of rows.
    pub fn len(&self) -> usize {
        self.table.borrow().num_rows()
    }

    /// Check if the table has no row.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over the rows, yielding one fresh view per row.
    pub fn iter(&self) -> RecordViews<'_, R> {
        RecordViews {
            owner: self,
            next: 0,
        }
    }

    /// Create a view of the row at `locator`.
    pub fn view(&self, locator: RowLocator) -> Result<RecordView<'_, R>> {
        self.table.borrow().resolve(&locator)?;
        Ok(self.view_unchecked(locator))
    }

    fn view_unchecked(&self, locator: RowLocator) -> RecordView<'_, R> {
        RecordView {
            table: &self.table,
            schema: &self.schema,
            accessors: &self.accessors,
            locator,
            _record: PhantomData,
        }
    }

    /// Create a view of the row at position `row`.
    pub fn row(&self, row: usize) -> Result<RecordView<'_, R>> {
        let locator = self.table.borrow().locator_at(row).ok_or_else(|| {
            Error::new(
                ErrorKind::RowNotFound,
                format!("row {row} is out of range of {} rows", self.len()),
            )
        })?;
        Ok(self.view_unchecked(locator))
    }

    /// Create a view of the row whose index fields hold `key`, one value
    /// per index field in declaration order.
    pub fn locate(&self, key: &[Value]) -> Result<RecordView<'_, R>> {
        self.view(RowLocator::Key(self.index_key(key)?))
    }

    fn index_key(&self, key: &[Value]) -> Result<IndexKey> {
        let index = self
            .accessors
            .iter()
            .filter(|a| a.spec().is_index)
            .collect::<Vec<_>>();
        if index.len() != key.len() {
            return Err(Error::new(
                ErrorKind::ValueInvalid,
                format!(
                    "{} has {} index field(s), got {} key value(s)",
                    self.schema.name(),
                    index.len(),
                    key.len()
                ),
            ));
        }
        index
            .iter()
            .zip(key)
            .map(|(accessor, value)| accessor.codec().encode(value).map(Some))
            .collect::<Result<Vec<_>>>()
            .map(IndexKey)
    }

    /// Read one cell.
    pub fn cell(&self, locator: &RowLocator, field: &str) -> Result<Option<Value>> {
        BackingAdapter::new(&self.table, &self.accessors, locator).read(field)
    }

    /// Write one cell in place.
    pub fn set_cell(&self, locator: &RowLocator, field: &str, value: Option<Value>) -> Result<()> {
        BackingAdapter::new(&self.table, &self.accessors, locator).write(field, value)
    }

    /// Append a copy of `record` as the last row.
    ///
    /// The append is atomic: a rejected record, e.g. one with a duplicate
    /// key, leaves the table unchanged. Returns a key locator when the
    /// record type has index fields, a positional one otherwise.
    pub fn append(&self, record: &R) -> Result<RowLocator> {
        if !self.is_complete() {
            return Err(unbound_fields(&self.schema, &self.accessors));
        }
        let values = record_values(&self.schema, record)?;
        let mut table = self.borrow_mut()?;

        let mut columns = vec![None; table.columns().len()];
        let mut levels = vec![None; table.index_levels().len()];
        for (accessor, value) in self.accessors.iter().zip(values) {
            let spec = accessor.spec();
            let cell = match value {
                Some(value) => Some(
                    accessor
                        .codec()
                        .encode(&value)
                        .map_err(|e| e.with_context("field", spec.name.as_str()))?,
                ),
                None if spec.nullable => None,
                None => {
                    return Err(Error::new(
                        ErrorKind::ValueInvalid,
                        format!("{} isn't nullable", spec.name),
                    ))
                }
            };
            match accessor.slot() {
                Slot::Column(pos) => columns[pos] = cell,
                Slot::IndexLevel(pos) => levels[pos] = cell,
            }
        }

        // Every nullable field has a null marker since binding.
        let row = table.push_row(columns, levels)?;
        Ok(match table.key_at(row) {
            Some(key) => RowLocator::Key(key),
            None => RowLocator::Position {
                row,
                generation: table.generation(),
            },
        })
    }

    /// Remove the row at `locator`.
    ///
    /// Positional locators taken before the removal become stale.
    pub fn remove(&self, locator: &RowLocator) -> Result<()> {
        let mut table = self.borrow_mut()?;
        let row = table.resolve(locator)?;
        table.remove_row(row)
    }

    /// Copy every row into a detached record instance.
    pub fn to_records(&self) -> Result<Vec<R>> {
        self.iter().map(|view| view.to_record()).collect()
    }

    /// Return the storage type a field currently has in the table.
    pub fn storage_type(&self, field: &str) -> Result<StorageType> {
        let accessor = self.accessors.get(field)?;
        self.table
            .borrow()
            .slot(accessor.slot())
            .map(|c| c.storage().clone())
            .ok_or_else(|| Error::new(ErrorKind::Unexpected, "field slot is out of the table"))
    }

    /// Run `f` with read access to the underlying table.
    pub fn with_table<T>(&self, f: impl FnOnce(&ColumnarTable) -> T) -> Result<T> {
        let table = self.table.try_borrow().map_err(|e| {
            Error::new(ErrorKind::Unexpected, "table is being modified").set_source(e)
        })?;
        Ok(f(&table))
    }

    /// Unbind the table.
    pub fn into_inner(self) -> ColumnarTable {
        self.table.into_inner()
    }

    /// Export the table as an arrow record batch, index levels first.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        self.with_table(|table| table.to_record_batch())?
    }

    fn borrow_mut(&self) -> Result<std::cell::RefMut<'_, ColumnarTable>> {
        self.table.try_borrow_mut().map_err(|e| {
            Error::new(ErrorKind::Unexpected, "table is borrowed").set_source(e)
        })
    }
}

impl<R: Record> Debug for RecordTable<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordTable")
            .field("schema", &self.schema.name())
            .field("config", &self.config)
            .field("table", &self.table)
            .finish()
    }
}

fn record_values<R: Record>(schema: &RecordSchema, record: &R) -> Result<Vec<Option<Value>>> {
    let values = record.to_values();
    if values.len() != schema.len() {
        return Err(Error::new(
            ErrorKind::ValueInvalid,
            format!(
                "{} has {} fields, record produced {} values",
                schema.name(),
                schema.len(),
                values.len()
            ),
        ));
    }
    Ok(values)
}

fn unbound_fields(schema: &RecordSchema, accessors: &AccessorTable) -> Error {
    let missing = schema
        .fields()
        .iter()
        .filter(|f| accessors.get(&f.name).is_err())
        .map(|f| f.name.as_str())
        .collect::<Vec<_>>();
    Error::new(
        ErrorKind::FieldNotFound,
        format!("fields {missing:?} of {} aren't bound to the table", schema.name()),
    )
}

/// A typed view of one row of a [`RecordTable`].
///
/// The view holds no field value: reads and writes go to the table cells.
pub struct RecordView<'a, R: Record> {
    table: &'a RefCell<ColumnarTable>,
    schema: &'a RecordSchema,
    accessors: &'a AccessorTable,
    locator: RowLocator,
    _record: PhantomData<fn() -> R>,
}

impl<'a, R: Record> RecordView<'a, R> {
    fn adapter(&self) -> BackingAdapter<'_> {
        BackingAdapter::new(self.table, self.accessors, &self.locator)
    }

    /// Return the locator of the row.
    pub fn locator(&self) -> &RowLocator {
        &self.locator
    }

    /// Read a field.
    pub fn get(&self, field: &str) -> Result<Option<Value>> {
        self.adapter().read(field)
    }

    /// Read a field as its rust type.
    pub fn get_as<T: FieldValue>(&self, field: &str) -> Result<T> {
        T::from_value(self.get(field)?).map_err(|e| e.with_context("field", field))
    }

    /// Write a field from its rust type.
    pub fn set<T: FieldValue>(&self, field: &str, value: T) -> Result<()> {
        self.set_value(field, value.into_value())
    }

    /// Write a field, `None` writes the null marker.
    pub fn set_value(&self, field: &str, value: Option<Value>) -> Result<()> {
        self.adapter().write(field, value)
    }

    /// Read every field in declaration order.
    pub fn values(&self) -> Result<Vec<Option<Value>>> {
        self.adapter().read_all()
    }

    /// Copy the row into a detached record instance.
    ///
    /// Fails if some field of the record isn't bound to the table.
    pub fn to_record(&self) -> Result<R> {
        if self.accessors.len() != self.schema.len() {
            return Err(unbound_fields(self.schema, self.accessors));
        }
        R::from_values(self.values()?)
    }
}

impl<'a, R: Record> Clone for RecordView<'a, R> {
    fn clone(&self) -> Self {
        Self {
            table: self.table,
            schema: self.schema,
            accessors: self.accessors,
            locator: self.locator.clone(),
            _record: PhantomData,
        }
    }
}

impl<'a, R: Record> Debug for RecordView<'a, R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordView")
            .field("locator", &self.locator)
            .finish()
    }
}

/// Iterator over the rows of a [`RecordTable`].
pub struct RecordViews<'a, R: Record> {
    owner: &'a RecordTable<R>,
    next: usize,
}

impl<'a, R: Record> Iterator for RecordViews<'a, R> {
    type Item = RecordView<'a, R>;

    fn next(&mut self) -> Option<Self::Item> {
        let locator = self.owner.table.borrow().locator_at(self.next)?;
        self.next += 1;
        Some(self.owner.view_unchecked(locator))
    }
}

impl<'a, R: Record> IntoIterator for &'a RecordTable<R> {
    type Item = RecordView<'a, R>;
    type IntoIter = RecordViews<'a, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
