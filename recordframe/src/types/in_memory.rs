//! in_memory module provides the definition of record semantic types,
//! values and schemas.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use arrow_schema::DataType;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use itertools::Itertools;
use ordered_float::OrderedFloat;
use rust_decimal::Decimal;
use uuid::Uuid;

pub(crate) const MAX_DECIMAL_PRECISION: u8 = 38;
/// Largest scale a `rust_decimal::Decimal` can carry.
pub(crate) const MAX_DECIMAL_SCALE: u8 = 28;

/// Semantic types a record field can declare.
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub enum SemanticType {
    /// True or False
    Boolean,
    /// 32-bit signed integer, Can promote to long
    Int,
    /// 64-bit signed integer
    Long,
    /// 32-bit IEEE 754 floating bit, Can promote to double
    Float,
    /// 64-bit IEEE 754 floating bit.
    Double,
    /// Fixed point decimal
    ///
    /// - Precision must be 38 or less.
    /// - Scale can't exceed precision, nor 28.
    Decimal {
        /// The number of digits in the number.
        precision: u8,
        /// The number of digits to the right of the decimal point.
        scale: u8,
    },
    /// Calendar date without timezone or time
    Date,
    /// Time of day without date or timezone, microsecond precision.
    Time,
    /// Timestamp with microsecond precision.
    ///
    /// Without a zone the timestamp is a wall-clock date and time. With a
    /// zone it is a point in time, stored as UTC and read back in the zone.
    Timestamp {
        /// Zone of the timestamp, `None` for naive timestamps.
        tz: Option<FixedOffset>,
    },
    /// Signed elapsed time with microsecond precision.
    Duration,
    /// Arbitrary-length character sequences, Encoded with UTF-8
    String,
    /// Universally Unique Identifiers
    Uuid,
    /// One of a closed set of named members.
    Enumeration(Arc<[String]>),
    /// Arbitrary byte payload with no ordering or hashing contract.
    Opaque,
}

impl SemanticType {
    /// Create an enumeration type from its member names, in declaration order.
    pub fn enumeration(members: impl IntoIterator<Item = impl Into<String>>) -> Self {
        SemanticType::Enumeration(members.into_iter().map(Into::into).collect())
    }

    /// Whether values of this type can identify rows.
    ///
    /// Index fields need a total ordering and hashing contract, which
    /// floating point numbers and opaque payloads don't provide.
    pub fn is_indexable(&self) -> bool {
        !matches!(
            self,
            SemanticType::Float | SemanticType::Double | SemanticType::Opaque
        )
    }
}

impl Display for SemanticType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SemanticType::Boolean => write!(f, "boolean"),
            SemanticType::Int => write!(f, "int"),
            SemanticType::Long => write!(f, "long"),
            SemanticType::Float => write!(f, "float"),
            SemanticType::Double => write!(f, "double"),
            SemanticType::Decimal { precision, scale } => {
                write!(f, "decimal({precision}, {scale})")
            }
            SemanticType::Date => write!(f, "date"),
            SemanticType::Time => write!(f, "time"),
            SemanticType::Timestamp { tz: None } => write!(f, "timestamp"),
            SemanticType::Timestamp { tz: Some(tz) } => write!(f, "timestamp[{tz}]"),
            SemanticType::Duration => write!(f, "duration"),
            SemanticType::String => write!(f, "string"),
            SemanticType::Uuid => write!(f, "uuid"),
            SemanticType::Enumeration(members) => {
                write!(f, "enum({})", members.iter().join(", "))
            }
            SemanticType::Opaque => write!(f, "opaque"),
        }
    }
}

/// Values exchanged with record fields.
///
/// Enumeration members are exchanged as [`Value::String`] holding the
/// member name.
#[derive(Debug, PartialEq, Clone, Eq, Hash)]
pub enum Value {
    /// True or False
    Boolean(bool),
    /// 32-bit signed integer
    Int(i32),
    /// 64-bit signed integer
    Long(i64),
    /// 32-bit IEEE 754 floating bit
    Float(OrderedFloat<f32>),
    /// 64-bit IEEE 754 floating bit.
    Double(OrderedFloat<f64>),
    /// Fixed point decimal
    Decimal(Decimal),
    /// Calendar date without timezone or time
    Date(NaiveDate),
    /// Time of day without date or timezone.
    Time(NaiveTime),
    /// Timestamp without timezone
    Timestamp(NaiveDateTime),
    /// Timestamp carrying its zone
    Timestampz(DateTime<FixedOffset>),
    /// Signed elapsed time
    Duration(Duration),
    /// Arbitrary-length character sequences
    String(String),
    /// Universally Unique Identifiers
    Uuid(Uuid),
    /// Arbitrary byte payload
    Opaque(Vec<u8>),
}

impl Value {
    /// Name of the value's variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "boolean",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Decimal(_) => "decimal",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Timestamp(_) => "timestamp",
            Value::Timestampz(_) => "timestamptz",
            Value::Duration(_) => "duration",
            Value::String(_) => "string",
            Value::Uuid(_) => "uuid",
            Value::Opaque(_) => "opaque",
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Decimal(v) => write!(f, "{v}"),
            Value::Date(v) => write!(f, "{v}"),
            Value::Time(v) => write!(f, "{v}"),
            Value::Timestamp(v) => write!(f, "{v}"),
            Value::Timestampz(v) => write!(f, "{v}"),
            Value::Duration(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v:?}"),
            Value::Uuid(v) => write!(f, "{v}"),
            Value::Opaque(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

/// Storage type of a column: an arrow data type plus whether the column
/// carries a null marker.
///
/// A non-nullable storage type has no validity bitmap at all.
/// [`DataType::Null`] is the untyped fallback a column gets when its data
/// says nothing about its type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageType {
    /// Arrow data type of the column.
    pub data_type: DataType,
    /// Whether the column supports a null marker.
    pub nullable: bool,
}

impl StorageType {
    /// Create a storage type.
    pub fn new(data_type: DataType, nullable: bool) -> Self {
        Self {
            data_type,
            nullable,
        }
    }

    /// Create a nullable storage type.
    pub fn nullable(data_type: DataType) -> Self {
        Self::new(data_type, true)
    }

    /// Create a storage type without null marker.
    pub fn required(data_type: DataType) -> Self {
        Self::new(data_type, false)
    }

    /// The untyped fallback storage.
    pub fn untyped() -> Self {
        Self::nullable(DataType::Null)
    }

    /// Whether this is the untyped fallback storage.
    pub fn is_untyped(&self) -> bool {
        self.data_type == DataType::Null
    }
}

impl Display for StorageType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.nullable {
            write!(f, "{}?", self.data_type)
        } else {
            write!(f, "{}", self.data_type)
        }
    }
}

/// A field of a record type.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct FieldSpec {
    /// Field name, unique in the schema.
    pub name: String,
    /// Semantic type of the field.
    pub semantic_type: SemanticType,
    /// Whether the field accepts absent values.
    pub nullable: bool,
    /// Whether the field is one of the table's index levels.
    pub is_index: bool,
}

impl FieldSpec {
    /// Create a required, non-index field.
    pub fn required(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            semantic_type,
            nullable: false,
            is_index: false,
        }
    }

    /// Create an optional, non-index field.
    pub fn optional(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self {
            nullable: true,
            ..Self::required(name, semantic_type)
        }
    }

    /// Mark the field as index-bound.
    pub fn with_index(mut self) -> Self {
        self.is_index = true;
        self
    }
}

/// A record schema is the ordered list of a record type's fields.
///
/// Non-index fields keep declaration order as column order, index fields
/// keep declaration order as index level order.
#[derive(Debug, PartialEq, Clone)]
pub struct RecordSchema {
    /// Name of the record type.
    name: String,
    fields: Vec<FieldSpec>,
    /// Map field name to position
    name_lookup: HashMap<String, usize>,
}

impl RecordSchema {
    /// Create a schema, fields must have unique names.
    pub(crate) fn new(name: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        let name_lookup = fields
            .iter()
            .enumerate()
            .map(|(pos, field)| (field.name.clone(), pos))
            .collect();
        Self {
            name: name.into(),
            fields,
            name_lookup,
        }
    }

    /// Name of the record type.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the fields in declaration order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Return the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the schema is empty.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Lookup field by field name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.name_lookup.get(name).map(|pos| &self.fields[*pos])
    }

    /// Position of a field in declaration order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.name_lookup.get(name).copied()
    }

    /// Fields stored in the index levels, in level order.
    pub fn index_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|field| field.is_index)
    }

    /// Fields stored as ordinary columns, in column order.
    pub fn column_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|field| !field.is_index)
    }

    /// Names of the index fields, in level order.
    pub fn index_names(&self) -> Vec<&str> {
        self.index_fields().map(|f| f.name.as_str()).collect()
    }

    /// Names of the column fields, in column order.
    pub fn column_names(&self) -> Vec<&str> {
        self.column_fields().map(|f| f.name.as_str()).collect()
    }

    /// The schema a table without index is bound with: index fields found
    /// among `columns` become ordinary fields, other index fields are left
    /// out.
    pub(crate) fn unindexed(&self, columns: &[&str]) -> RecordSchema {
        let fields = self
            .fields
            .iter()
            .filter(|f| !f.is_index || columns.contains(&f.name.as_str()))
            .map(|f| FieldSpec {
                is_index: false,
                ..f.clone()
            })
            .collect();
        RecordSchema::new(self.name.clone(), fields)
    }
}
