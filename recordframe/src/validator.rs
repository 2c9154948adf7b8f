//! Validator reconciles a table's column storage types with a record
//! schema.

use std::fmt::{Display, Formatter};

use arrow_schema::{DataType, TimeUnit};

use crate::codec::Codec;
use crate::column::Column;
use crate::config::{BindConfig, EnumStorage};
use crate::table::{ColumnarTable, Slot};
use crate::types::{FieldSpec, RecordSchema, SemanticType, StorageType};
use crate::{Error, Result};

/// One reason a table doesn't conform to a record schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Offending field, or column name for unexpected columns.
    pub field: String,
    /// Storage type the field requires.
    pub expected: Option<StorageType>,
    /// Storage type found in the table.
    pub actual: Option<StorageType>,
    /// Human readable reason.
    pub reason: String,
}

impl Violation {
    /// Create a violation.
    pub fn new(
        field: impl Into<String>,
        expected: Option<StorageType>,
        actual: Option<StorageType>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            expected,
            actual,
            reason: reason.into(),
        }
    }
}

impl Display for Violation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: ", self.field)?;
        if let Some(expected) = &self.expected {
            write!(f, "expected {expected}, ")?;
        }
        if let Some(actual) = &self.actual {
            write!(f, "found {actual}, ")?;
        }
        write!(f, "{}", self.reason)
    }
}

/// Storage type a field must have under `config`.
///
/// Total over every field, and never the untyped storage.
pub fn expected_storage_type(field: &FieldSpec, config: &BindConfig) -> StorageType {
    let data_type = match &field.semantic_type {
        SemanticType::Int | SemanticType::Long
            if field.nullable && config.store_nullable_ints_as_floats =>
        {
            DataType::Float64
        }
        SemanticType::Boolean => DataType::Boolean,
        SemanticType::Int => DataType::Int32,
        SemanticType::Long => DataType::Int64,
        SemanticType::Float => DataType::Float32,
        SemanticType::Double => DataType::Float64,
        SemanticType::Decimal { precision, scale } => {
            DataType::Decimal128(*precision, *scale as i8)
        }
        SemanticType::Date if config.store_dates_as_timestamps => {
            DataType::Timestamp(TimeUnit::Microsecond, None)
        }
        SemanticType::Date => DataType::Date32,
        SemanticType::Time => DataType::Time64(TimeUnit::Microsecond),
        SemanticType::Timestamp { tz } => DataType::Timestamp(
            TimeUnit::Microsecond,
            tz.map(|tz| tz.to_string().into()),
        ),
        SemanticType::Duration => DataType::Duration(TimeUnit::Microsecond),
        SemanticType::String => DataType::Utf8,
        SemanticType::Uuid => DataType::FixedSizeBinary(16),
        SemanticType::Enumeration(_) => match config.store_enum_members_as {
            EnumStorage::Names => DataType::Utf8,
            EnumStorage::Ordinals => DataType::Int32,
        },
        SemanticType::Opaque => DataType::Binary,
    };
    StorageType::new(data_type, field.nullable)
}

/// Give a column a null marker in place, logging the promotion.
pub(crate) fn promote_in_place(name: &str, column: &mut Column) {
    log::info!(
        "promoting {name} from {} to nullable storage",
        column.storage()
    );
    column.promote_to_nullable();
}

enum Action {
    /// Add a null marker, values untouched.
    Promote,
    /// Drop a null marker from a column without null.
    Release,
    /// Swap in a converted or retyped column.
    Replace(Column),
}

/// The changes that bring a table into conformance.
struct Plan {
    actions: Vec<(String, Slot, Action)>,
    column_order: Vec<String>,
}

/// Validator checks a table against a record schema and promotes it in
/// place where that is safe.
pub struct Validator<'a> {
    schema: &'a RecordSchema,
    config: &'a BindConfig,
}

impl<'a> Validator<'a> {
    /// Create a validator.
    pub fn new(schema: &'a RecordSchema, config: &'a BindConfig) -> Self {
        Self { schema, config }
    }

    /// Return every violation of `table`, without modifying it.
    pub fn violations(&self, table: &ColumnarTable) -> Vec<Violation> {
        match self.plan(table) {
            Ok(_) => vec![],
            Err(violations) => violations,
        }
    }

    /// Make every column's storage type match the schema.
    ///
    /// Either the table conforms afterwards, or it is left untouched and a
    /// [`crate::ErrorKind::Schema`] error lists every violation. Running
    /// it on a conforming table changes nothing.
    pub fn validate(&self, table: &mut ColumnarTable) -> Result<()> {
        let plan = self.plan(table).map_err(Error::schema)?;

        for field in self.schema.fields() {
            if self.config.store_nullable_ints_as_floats
                && field.nullable
                && matches!(field.semantic_type, SemanticType::Int | SemanticType::Long)
            {
                log::warn!(
                    "{}.{} is a nullable integer stored as double",
                    self.schema.name(),
                    field.name
                );
            }
        }

        for (name, slot, action) in plan.actions {
            match action {
                Action::Promote => {
                    if let Some(column) = table.slot_mut(slot) {
                        promote_in_place(&name, column);
                    }
                }
                Action::Release => {
                    if let Some(column) = table.slot_mut(slot) {
                        column.release_null_marker();
                    }
                }
                Action::Replace(column) => {
                    log::info!("converting {name} to {}", column.storage());
                    table.replace(slot, column);
                }
            }
        }

        let order = plan.column_order.iter().map(String::as_str).collect::<Vec<_>>();
        if table.column_names() != order {
            log::debug!("reordering columns of {} to {order:?}", self.schema.name());
            table.reorder_columns(&order);
        }
        Ok(())
    }

    fn plan(&self, table: &ColumnarTable) -> std::result::Result<Plan, Vec<Violation>> {
        let mut violations = vec![];
        let mut actions = vec![];

        for field in self.schema.fields() {
            let expected = expected_storage_type(field, self.config);
            let slot = match (table.slot_of(&field.name), field.is_index) {
                (None, _) => {
                    violations.push(Violation::new(
                        &field.name,
                        Some(expected),
                        None,
                        "missing from the table",
                    ));
                    continue;
                }
                (Some(Slot::Column(_)), true) => {
                    violations.push(Violation::new(
                        &field.name,
                        Some(expected),
                        None,
                        "index field found as an ordinary column",
                    ));
                    continue;
                }
                (Some(Slot::IndexLevel(_)), false) => {
                    violations.push(Violation::new(
                        &field.name,
                        Some(expected),
                        None,
                        "field found as an index level",
                    ));
                    continue;
                }
                (Some(slot), _) => slot,
            };
            let Some(column) = table.slot(slot) else {
                continue;
            };

            match self.reconcile(field, column, &expected) {
                Ok(action) => {
                    let checked = match &action {
                        Some(Action::Replace(column)) => column,
                        _ => column,
                    };
                    if let Some(violation) = self.check_values(field, checked, &expected) {
                        violations.push(violation);
                    } else if let Some(action) = action {
                        actions.push((field.name.clone(), slot, action));
                    }
                }
                Err(violation) => violations.push(violation),
            }
        }

        for (name, column) in table.columns().iter().chain(table.index_levels()) {
            if self.schema.field(name).is_none() {
                violations.push(Violation::new(
                    name,
                    None,
                    Some(column.storage().clone()),
                    format!("not a field of {}", self.schema.name()),
                ));
            }
        }

        let index_fields = self.schema.index_names();
        for key in table.duplicate_keys() {
            violations.push(Violation::new(
                index_fields.join(", "),
                None,
                None,
                format!("index key {key} appears more than once"),
            ));
        }

        if !violations.is_empty() {
            return Err(violations);
        }
        Ok(Plan {
            actions,
            column_order: self
                .schema
                .column_names()
                .into_iter()
                .map(String::from)
                .collect(),
        })
    }

    /// Decide how a column of the table becomes the expected storage.
    fn reconcile(
        &self,
        field: &FieldSpec,
        column: &Column,
        expected: &StorageType,
    ) -> std::result::Result<Option<Action>, Violation> {
        let actual = column.storage();
        let violation = |reason: String| {
            Violation::new(
                &field.name,
                Some(expected.clone()),
                Some(actual.clone()),
                reason,
            )
        };

        if actual.data_type == expected.data_type {
            return match (actual.nullable, expected.nullable) {
                (false, true) => Ok(Some(Action::Promote)),
                (true, false) if column.null_count() > 0 => Err(violation(format!(
                    "holds {} null(s) but the field isn't nullable",
                    column.null_count()
                ))),
                (true, false) => Ok(Some(Action::Release)),
                _ => Ok(None),
            };
        }

        // The data says nothing about its type, take the expected one.
        if column.is_empty() || column.null_count() == column.len() {
            if !column.is_empty() && !expected.nullable {
                return Err(violation(format!(
                    "holds {} null(s) but the field isn't nullable",
                    column.null_count()
                )));
            }
            return Column::nulls(expected.clone(), column.len())
                .map(|c| Some(Action::Replace(c)))
                .map_err(|e| violation(e.to_string()));
        }

        let Some(mut cast) = column.cast_exact(&expected.data_type) else {
            return Err(violation(
                "storage can't be converted without loss".to_string(),
            ));
        };
        match (cast.storage().nullable, expected.nullable) {
            (false, true) => cast.promote_to_nullable(),
            (true, false) => {
                if !cast.release_null_marker() {
                    return Err(violation(format!(
                        "holds {} null(s) but the field isn't nullable",
                        cast.null_count()
                    )));
                }
            }
            _ => {}
        }
        Ok(Some(Action::Replace(cast)))
    }

    /// Check that every stored value reads back as the field's semantic
    /// type, e.g. enumeration members or dates stored as timestamps.
    fn check_values(
        &self,
        field: &FieldSpec,
        column: &Column,
        expected: &StorageType,
    ) -> Option<Violation> {
        if column.data_type() != &expected.data_type {
            return None;
        }
        let codec = Codec::new(field.semantic_type.clone(), expected.data_type.clone());
        column.iter().enumerate().find_map(|(row, cell)| {
            let cell = cell?;
            codec.decode(cell).err().map(|e| {
                Violation::new(
                    &field.name,
                    Some(expected.clone()),
                    Some(column.storage().clone()),
                    format!("row {row}: {}", e.message()),
                )
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, NaiveDate};

    use super::*;
    use crate::column::Scalar;
    use crate::types::Value;
    use crate::ErrorKind;

    fn schema(fields: Vec<FieldSpec>) -> RecordSchema {
        RecordSchema::new("Account", fields)
    }

    fn longs(name: &str, values: &[Option<i64>]) -> ColumnarTable {
        ColumnarTable::from_rows(
            &[name],
            values.iter().map(|v| vec![v.map(Value::Long)]).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_expected_storage_type_options() {
        let field = FieldSpec::optional("points", SemanticType::Long);
        let config = BindConfig::default();
        assert_eq!(
            expected_storage_type(&field, &config),
            StorageType::nullable(DataType::Int64)
        );
        let config = BindConfig {
            store_nullable_ints_as_floats: true,
            store_dates_as_timestamps: true,
            store_enum_members_as: EnumStorage::Ordinals,
            ..Default::default()
        };
        assert_eq!(
            expected_storage_type(&field, &config),
            StorageType::nullable(DataType::Float64)
        );
        assert_eq!(
            expected_storage_type(&FieldSpec::required("points", SemanticType::Long), &config),
            StorageType::required(DataType::Int64)
        );
        assert_eq!(
            expected_storage_type(&FieldSpec::required("d", SemanticType::Date), &config)
                .data_type,
            DataType::Timestamp(TimeUnit::Microsecond, None)
        );
        assert_eq!(
            expected_storage_type(
                &FieldSpec::required("tier", SemanticType::enumeration(["a", "b"])),
                &config
            )
            .data_type,
            DataType::Int32
        );
        assert_eq!(
            expected_storage_type(
                &FieldSpec::required(
                    "at",
                    SemanticType::Timestamp {
                        tz: FixedOffset::east_opt(3600)
                    }
                ),
                &config
            )
            .data_type,
            DataType::Timestamp(TimeUnit::Microsecond, Some("+01:00".into()))
        );
    }

    #[test]
    fn test_promotion_keeps_values() {
        let schema = schema(vec![FieldSpec::optional("points", SemanticType::Long)]);
        let config = BindConfig::default();
        let mut table = longs("points", &[Some(1), Some(2), Some(3)]);

        Validator::new(&schema, &config).validate(&mut table).unwrap();

        let column = table.column("points").unwrap();
        assert_eq!(column.storage(), &StorageType::nullable(DataType::Int64));
        assert_eq!(
            column.iter().collect::<Vec<_>>(),
            vec![
                Some(Scalar::Int64(1)),
                Some(Scalar::Int64(2)),
                Some(Scalar::Int64(3))
            ]
        );
    }

    #[test]
    fn test_validate_is_idempotent() {
        let schema = schema(vec![FieldSpec::optional("points", SemanticType::Long)]);
        let config = BindConfig::default();
        let validator = Validator::new(&schema, &config);
        let mut table = longs("points", &[Some(1), None]);

        validator.validate(&mut table).unwrap();
        let once = table.clone();
        validator.validate(&mut table).unwrap();
        assert_eq!(table, once);
    }

    #[test]
    fn test_empty_table_is_retyped() {
        let schema = schema(vec![
            FieldSpec::required("id", SemanticType::Long),
            FieldSpec::optional("name", SemanticType::String),
        ]);
        let config = BindConfig::default();
        let mut table = ColumnarTable::from_rows(&["id", "name"], vec![]).unwrap();

        Validator::new(&schema, &config).validate(&mut table).unwrap();

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
    fn test_all_null_column() {
        let config = BindConfig::default();
        let mut table = longs("points", &[None, None]);
        let nullable = schema(vec![FieldSpec::optional("points", SemanticType::Long)]);
        let required = schema(vec![FieldSpec::required("points", SemanticType::Long)]);

        let err = Validator::new(&required, &config)
            .validate(&mut table)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
        assert!(table.column("points").unwrap().storage().is_untyped());

        Validator::new(&nullable, &config)
            .validate(&mut table)
            .unwrap();
        let column = table.column("points").unwrap();
        assert_eq!(column.storage(), &StorageType::nullable(DataType::Int64));
        assert_eq!(column.null_count(), 2);
    }

    #[test]
    fn test_widening_and_narrowing() {
        let config = BindConfig::default();
        let mut table =
            ColumnarTable::from_rows(&["n"], vec![vec![Some(Value::Int(4))]]).unwrap();
        let long = schema(vec![FieldSpec::required("n", SemanticType::Long)]);
        Validator::new(&long, &config).validate(&mut table).unwrap();
        assert_eq!(table.column("n").unwrap().get(0), Some(Scalar::Int64(4)));

        let int = schema(vec![FieldSpec::required("n", SemanticType::Int)]);
        let violations = Validator::new(&int, &config).violations(&table);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "n");
        assert_eq!(
            violations[0].actual,
            Some(StorageType::required(DataType::Int64))
        );
    }

    #[test]
    fn test_every_violation_is_listed_and_table_untouched() {
        let schema = schema(vec![
            FieldSpec::required("id", SemanticType::Long),
            FieldSpec::required("name", SemanticType::String),
            FieldSpec::optional("points", SemanticType::Long),
        ]);
        let config = BindConfig::default();
        let mut table = ColumnarTable::from_rows(
            &["points", "id", "extra"],
            vec![vec![
                Some(Value::Long(1)),
                Some(Value::String("x".to_string())),
                Some(Value::Boolean(true)),
            ]],
        )
        .unwrap();
        let before = table.clone();

        let err = Validator::new(&schema, &config)
            .validate(&mut table)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
        let fields = err
            .violations()
            .iter()
            .map(|v| v.field.as_str())
            .collect::<Vec<_>>();
        assert_eq!(fields, vec!["id", "name", "extra"]);
        assert_eq!(table, before);
    }

    #[test]
    fn test_columns_reordered_to_declaration_order() {
        let schema = schema(vec![
            FieldSpec::required("id", SemanticType::Long),
            FieldSpec::required("name", SemanticType::String),
        ]);
        let config = BindConfig::default();
        let mut table = ColumnarTable::from_rows(
            &["name", "id"],
            vec![vec![
                Some(Value::String("x".to_string())),
                Some(Value::Long(1)),
            ]],
        )
        .unwrap();
        Validator::new(&schema, &config).validate(&mut table).unwrap();
        assert_eq!(table.column_names(), vec!["id", "name"]);
    }

    #[test]
    fn test_enumeration_values_checked() {
        let schema = schema(vec![FieldSpec::required(
            "tier",
            SemanticType::enumeration(["Bronze", "Gold"]),
        )]);
        let config = BindConfig::default();
        let mut table = ColumnarTable::from_rows(
            &["tier"],
            vec![
                vec![Some(Value::String("Gold".to_string()))],
                vec![Some(Value::String("Platinum".to_string()))],
            ],
        )
        .unwrap();
        let err = Validator::new(&schema, &config)
            .validate(&mut table)
            .unwrap_err();
        assert_eq!(err.violations().len(), 1);
        assert!(err.violations()[0].reason.starts_with("row 1:"));
    }

    #[test]
    fn test_dates_stored_as_timestamps_must_be_midnight() {
        let schema = schema(vec![FieldSpec::required("day", SemanticType::Date)]);
        let config = BindConfig {
            store_dates_as_timestamps: true,
            ..Default::default()
        };
        let midnight = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let mut table = ColumnarTable::from_rows(
            &["day"],
            vec![vec![Some(Value::Timestamp(midnight))]],
        )
        .unwrap();
        Validator::new(&schema, &config).validate(&mut table).unwrap();

        let noon = midnight + chrono::Duration::hours(12);
        let mut table =
            ColumnarTable::from_rows(&["day"], vec![vec![Some(Value::Timestamp(noon))]]).unwrap();
        assert!(Validator::new(&schema, &config)
            .validate(&mut table)
            .is_err());
    }

    #[test]
    fn test_zone_mismatch_is_a_violation() {
        let tz = FixedOffset::east_opt(3600).unwrap();
        let other = FixedOffset::east_opt(7200).unwrap();
        let schema = schema(vec![FieldSpec::required(
            "at",
            SemanticType::Timestamp { tz: Some(tz) },
        )]);
        let config = BindConfig::default();
        let at = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
            .and_local_timezone(other)
            .unwrap();
        let mut table =
            ColumnarTable::from_rows(&["at"], vec![vec![Some(Value::Timestampz(at))]]).unwrap();
        let err = Validator::new(&schema, &config)
            .validate(&mut table)
            .unwrap_err();
        assert_eq!(err.violations()[0].field, "at");
    }
}
