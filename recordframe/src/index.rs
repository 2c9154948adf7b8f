//! IndexBinder places a record's index fields in the table's index levels.

use crate::config::SetIndex;
use crate::table::ColumnarTable;
use crate::types::RecordSchema;
use crate::{Error, ErrorKind, Result};

/// Where the index fields ended up after binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPlacement {
    /// The table's index levels are the index fields.
    Indexed,
    /// The table has no index. Index fields found as columns are bound as
    /// ordinary fields, the others aren't bound at all.
    Unindexed,
}

/// Decides which fields live in the row identity.
pub struct IndexBinder<'a> {
    schema: &'a RecordSchema,
    mode: SetIndex,
}

impl<'a> IndexBinder<'a> {
    /// Create a binder for `schema` with the given placement mode.
    pub fn new(schema: &'a RecordSchema, mode: SetIndex) -> Self {
        Self { schema, mode }
    }

    /// Bring the table's index levels in line with the schema's index
    /// fields.
    ///
    /// The table is only modified when binding succeeds.
    pub fn bind(&self, table: &mut ColumnarTable) -> Result<IndexPlacement> {
        let wanted = self.schema.index_names();
        match self.mode {
            SetIndex::False => self.check_index_set(table, &wanted)?,
            SetIndex::True => self.move_into_index(table, &wanted)?,
            SetIndex::Auto if wanted.is_empty() || !table.index_levels().is_empty() => {
                log::debug!(
                    "trusting existing index {:?} of table bound to {}",
                    table.index_names(),
                    self.schema.name()
                );
            }
            SetIndex::Auto => {
                if wanted.iter().all(|n| table.column(n).is_some()) {
                    self.move_into_index(table, &wanted)?;
                } else {
                    log::debug!(
                        "binding {} without index, index fields {wanted:?} aren't all columns",
                        self.schema.name()
                    );
                    return Ok(IndexPlacement::Unindexed);
                }
            }
        }
        Ok(IndexPlacement::Indexed)
    }

    fn check_index_set(&self, table: &ColumnarTable, wanted: &[&str]) -> Result<()> {
        let levels = table.index_names();
        if levels != wanted {
            return Err(Error::new(
                ErrorKind::IndexNotSet,
                format!(
                    "{} expects index levels {wanted:?}, table has {levels:?}",
                    self.schema.name()
                ),
            ));
        }
        if let Some(name) = wanted.iter().find(|n| table.column(n).is_some()) {
            return Err(Error::new(
                ErrorKind::IndexNotSet,
                format!("index field {name} is also an ordinary column"),
            ));
        }
        Ok(())
    }

    fn move_into_index(&self, table: &mut ColumnarTable, wanted: &[&str]) -> Result<()> {
        if wanted.is_empty() {
            return Ok(());
        }
        if !table.index_levels().is_empty() {
            return Err(Error::new(
                ErrorKind::MissingIndexField,
                format!(
                    "table already has index levels {:?}, expected index fields {wanted:?} \
                     as columns",
                    table.index_names()
                ),
            ));
        }
        let missing = wanted
            .iter()
            .filter(|n| table.column(n).is_none())
            .copied()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(Error::new(
                ErrorKind::MissingIndexField,
                format!(
                    "index fields {missing:?} of {} are not columns of the table",
                    self.schema.name()
                ),
            ));
        }
        log::debug!("moving {wanted:?} into the index of table bound to {}", self.schema.name());
        table.set_index(wanted)
    }
}

#[cfg(test)]
mod tests {
    use ordered_float::OrderedFloat;

    use super::*;
    use crate::types::{FieldSpec, SemanticType, Value};

    fn schema() -> RecordSchema {
        RecordSchema::new(
            "Reading",
            vec![
                FieldSpec::required("sensor", SemanticType::String).with_index(),
                FieldSpec::required("seq", SemanticType::Long).with_index(),
                FieldSpec::required("value", SemanticType::Double),
            ],
        )
    }

    fn table() -> ColumnarTable {
        ColumnarTable::from_rows(
            &["value", "seq", "sensor"],
            vec![vec![
                Some(Value::Double(OrderedFloat(1.5))),
                Some(Value::Long(1)),
                Some(Value::String("a".to_string())),
            ]],
        )
        .unwrap()
    }

    #[test]
    fn test_set_index_true_builds_composite_index() {
        let schema = schema();
        let mut table = table();
        IndexBinder::new(&schema, SetIndex::True)
            .bind(&mut table)
            .unwrap();
        assert_eq!(table.index_names(), vec!["sensor", "seq"]);
        assert_eq!(table.column_names(), vec!["value"]);

        let err = IndexBinder::new(&schema, SetIndex::True)
            .bind(&mut table)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingIndexField);
    }

    #[test]
    fn test_set_index_true_missing_column() {
        let schema = schema();
        let mut table = ColumnarTable::from_rows(
            &["value", "seq"],
            vec![vec![Some(Value::Double(OrderedFloat(1.5))), Some(Value::Long(1))]],
        )
        .unwrap();
        let before = table.clone();
        let err = IndexBinder::new(&schema, SetIndex::True)
            .bind(&mut table)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingIndexField);
        assert_eq!(table, before);
    }

    #[test]
    fn test_set_index_false_requires_index() {
        let schema = schema();
        let mut table = table();
        let err = IndexBinder::new(&schema, SetIndex::False)
            .bind(&mut table)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexNotSet);

        IndexBinder::new(&schema, SetIndex::True)
            .bind(&mut table)
            .unwrap();
        IndexBinder::new(&schema, SetIndex::False)
            .bind(&mut table)
            .unwrap();
    }

    #[test]
    fn test_set_index_auto() {
        let schema = schema();
        let mut table = table();
        IndexBinder::new(&schema, SetIndex::Auto)
            .bind(&mut table)
            .unwrap();
        assert_eq!(table.index_names(), vec!["sensor", "seq"]);

        // Already indexed: trusted as is.
        let placement = IndexBinder::new(&schema, SetIndex::Auto)
            .bind(&mut table)
            .unwrap();
        assert_eq!(placement, IndexPlacement::Indexed);
        assert_eq!(table.index_names(), vec!["sensor", "seq"]);
    }

    #[test]
    fn test_set_index_auto_without_all_index_fields() {
        let schema = schema();
        let mut table = ColumnarTable::from_rows(
            &["value", "sensor"],
            vec![vec![
                Some(Value::Double(OrderedFloat(1.5))),
                Some(Value::String("a".to_string())),
            ]],
        )
        .unwrap();
        let before = table.clone();
        let placement = IndexBinder::new(&schema, SetIndex::Auto)
            .bind(&mut table)
            .unwrap();
        assert_eq!(placement, IndexPlacement::Unindexed);
        assert_eq!(table, before);
    }
}
