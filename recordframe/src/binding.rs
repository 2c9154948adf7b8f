//! Field accessors and the backing adapter bridging one row of a table and
//! one record view.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::codec::Codec;
use crate::config::BindConfig;
use crate::table::{ColumnarTable, RowLocator, Slot};
use crate::types::{FieldSpec, RecordSchema, StorageType, Value};
use crate::validator::{expected_storage_type, promote_in_place};
use crate::{Error, ErrorKind, Result};

/// Everything needed to read and write one field of a bound table.
#[derive(Debug, Clone)]
pub struct FieldAccessor {
    spec: FieldSpec,
    slot: Slot,
    codec: Codec,
}

impl FieldAccessor {
    /// The field served by this accessor.
    pub fn spec(&self) -> &FieldSpec {
        &self.spec
    }

    /// Where the field's cells live.
    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// The codec between field values and cells.
    pub fn codec(&self) -> &Codec {
        &self.codec
    }
}

/// Per-field accessors generated from a schema, in declaration order.
#[derive(Debug, Clone)]
pub struct AccessorTable {
    accessors: Vec<FieldAccessor>,
    lookup: HashMap<String, usize>,
}

impl AccessorTable {
    /// Build the accessors of `schema` over `table`.
    ///
    /// Every field must already have a slot in the table.
    pub fn build(
        schema: &RecordSchema,
        config: &BindConfig,
        table: &ColumnarTable,
    ) -> Result<Self> {
        let accessors = schema
            .fields()
            .iter()
            .map(|spec| {
                let slot = table.slot_of(&spec.name).ok_or_else(|| {
                    Error::new(
                        ErrorKind::Unexpected,
                        format!("field {} has no slot in the table", spec.name),
                    )
                })?;
                let StorageType { data_type, .. } = expected_storage_type(spec, config);
                Ok(FieldAccessor {
                    spec: spec.clone(),
                    slot,
                    codec: Codec::new(spec.semantic_type.clone(), data_type),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let lookup = accessors
            .iter()
            .enumerate()
            .map(|(pos, a)| (a.spec.name.clone(), pos))
            .collect();
        Ok(Self { accessors, lookup })
    }

    /// Lookup the accessor of a field.
    pub fn get(&self, field: &str) -> Result<&FieldAccessor> {
        self.lookup
            .get(field)
            .map(|pos| &self.accessors[*pos])
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::FieldNotFound,
                    format!("record has no field {field}"),
                )
            })
    }

    /// Iterate over the accessors in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &FieldAccessor> {
        self.accessors.iter()
    }

    /// Return the number of fields.
    pub fn len(&self) -> usize {
        self.accessors.len()
    }

    /// Check if there is no accessor.
    pub fn is_empty(&self) -> bool {
        self.accessors.is_empty()
    }
}

/// Reads and writes the cells of one row on behalf of a record view.
///
/// The adapter holds no value: every read goes to the table, every write
/// lands in the table in place.
pub struct BackingAdapter<'a> {
    table: &'a RefCell<ColumnarTable>,
    accessors: &'a AccessorTable,
    locator: &'a RowLocator,
}

impl<'a> BackingAdapter<'a> {
    /// Create an adapter addressing the row at `locator`.
    pub fn new(
        table: &'a RefCell<ColumnarTable>,
        accessors: &'a AccessorTable,
        locator: &'a RowLocator,
    ) -> Self {
        Self {
            table,
            accessors,
            locator,
        }
    }

    /// Read a field, `None` is the null marker.
    pub fn read(&self, field: &str) -> Result<Option<Value>> {
        let accessor = self.accessors.get(field)?;
        let table = self.table.try_borrow().map_err(|e| {
            Error::new(ErrorKind::Unexpected, "table is being modified").set_source(e)
        })?;
        self.read_with(&table, accessor)
    }

    /// Read every field in declaration order.
    pub fn read_all(&self) -> Result<Vec<Option<Value>>> {
        let table = self.table.try_borrow().map_err(|e| {
            Error::new(ErrorKind::Unexpected, "table is being modified").set_source(e)
        })?;
        self.accessors
            .iter()
            .map(|accessor| self.read_with(&table, accessor))
            .collect()
    }

    fn read_with(&self, table: &ColumnarTable, accessor: &FieldAccessor) -> Result<Option<Value>> {
        let row = table.resolve(self.locator)?;
        let column = table.slot(accessor.slot).ok_or_else(|| {
            Error::new(ErrorKind::Unexpected, "field slot is out of the table")
        })?;
        column
            .get(row)
            .map(|cell| accessor.codec.decode(cell))
            .transpose()
            .map_err(|e| e.with_context("field", accessor.spec.name.as_str()))
    }

    /// Write a field in place, `None` writes the null marker.
    ///
    /// Index fields are immutable. A null written to a nullable field whose
    /// column has no null marker yet promotes the column first.
    pub fn write(&self, field: &str, value: Option<Value>) -> Result<()> {
        let accessor = self.accessors.get(field)?;
        let spec = &accessor.spec;
        if spec.is_index {
            return Err(Error::new(
                ErrorKind::IndexFieldImmutable,
                format!("{} is an index field and can't be written", spec.name),
            ));
        }
        let cell = match &value {
            Some(value) => Some(
                accessor
                    .codec
                    .encode(value)
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

        let mut table = self.table.try_borrow_mut().map_err(|e| {
            Error::new(ErrorKind::Unexpected, "table is borrowed").set_source(e)
        })?;
        let row = table.resolve(self.locator)?;
        let column = table.slot_mut(accessor.slot).ok_or_else(|| {
            Error::new(ErrorKind::Unexpected, "field slot is out of the table")
        })?;
        if cell.is_none() && !column.storage().nullable {
            promote_in_place(&spec.name, column);
        }
        column.set(row, cell)
    }
}
