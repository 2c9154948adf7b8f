//! Mapping between rust field types and record values.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use ordered_float::OrderedFloat;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::types::{SemanticType, Value};
use crate::{Error, ErrorKind, Result};

/// A rust type that can be the type of a record field.
///
/// `Option<T>` makes a field nullable.
pub trait FieldValue: Sized {
    /// The semantic type inferred from the rust type.
    ///
    /// Returns `None` when the rust type alone doesn't determine the
    /// semantic type, e.g. decimals need a precision and zone-aware
    /// timestamps need a zone. Such fields must be declared explicitly.
    fn semantic_type() -> Option<SemanticType>;

    /// Whether the rust type admits absent values.
    fn nullable() -> bool {
        false
    }

    /// Convert into a record value, `None` is the absent value.
    fn into_value(self) -> Option<Value>;

    /// Convert from a record value.
    fn from_value(value: Option<Value>) -> Result<Self>;
}

pub(crate) fn unexpected_value(expected: &str, value: Option<&Value>) -> Error {
    match value {
        Some(v) => Error::new(
            ErrorKind::ValueInvalid,
            format!("expected {expected} value, got {} {v}", v.type_name()),
        ),
        None => Error::new(
            ErrorKind::ValueInvalid,
            format!("expected {expected} value, got absent value"),
        ),
    }
}

macro_rules! impl_field_value {
    ($ty:ty, $semantic:expr, $variant:ident, $expected:literal) => {
        impl FieldValue for $ty {
            fn semantic_type() -> Option<SemanticType> {
                $semantic
            }

            fn into_value(self) -> Option<Value> {
                Some(Value::$variant(self.into()))
            }

            fn from_value(value: Option<Value>) -> Result<Self> {
                match value {
                    Some(Value::$variant(v)) => Ok(v.into()),
                    other => Err(unexpected_value($expected, other.as_ref())),
                }
            }
        }
    };
}

impl_field_value!(bool, Some(SemanticType::Boolean), Boolean, "boolean");
impl_field_value!(i32, Some(SemanticType::Int), Int, "int");
impl_field_value!(i64, Some(SemanticType::Long), Long, "long");
impl_field_value!(f32, Some(SemanticType::Float), Float, "float");
impl_field_value!(f64, Some(SemanticType::Double), Double, "double");
impl_field_value!(Decimal, None, Decimal, "decimal");
impl_field_value!(NaiveDate, Some(SemanticType::Date), Date, "date");
impl_field_value!(NaiveTime, Some(SemanticType::Time), Time, "time");
impl_field_value!(
    NaiveDateTime,
    Some(SemanticType::Timestamp { tz: None }),
    Timestamp,
    "timestamp"
);
impl_field_value!(DateTime<FixedOffset>, None, Timestampz, "timestamptz");
impl_field_value!(Duration, Some(SemanticType::Duration), Duration, "duration");
impl_field_value!(String, Some(SemanticType::String), String, "string");
impl_field_value!(Uuid, Some(SemanticType::Uuid), Uuid, "uuid");
impl_field_value!(Vec<u8>, Some(SemanticType::Opaque), Opaque, "opaque");

impl FieldValue for OrderedFloat<f64> {
    fn semantic_type() -> Option<SemanticType> {
        Some(SemanticType::Double)
    }

    fn into_value(self) -> Option<Value> {
        Some(Value::Double(self))
    }

    fn from_value(value: Option<Value>) -> Result<Self> {
        match value {
            Some(Value::Double(v)) => Ok(v),
            other => Err(unexpected_value("double", other.as_ref())),
        }
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    fn semantic_type() -> Option<SemanticType> {
        T::semantic_type()
    }

    fn nullable() -> bool {
        true
    }

    fn into_value(self) -> Option<Value> {
        self.and_then(T::into_value)
    }

    fn from_value(value: Option<Value>) -> Result<Self> {
        match value {
            None => Ok(None),
            v => T::from_value(v).map(Some),
        }
    }
}

/// Implement [`FieldValue`] for a fieldless rust enum, making it an
/// enumeration field whose members are the variant names in declaration
/// order.
///
/// ```
/// use recordframe::impl_record_enum;
///
/// #[derive(Debug, Clone, Copy, PartialEq)]
/// enum Tier {
///     Bronze,
///     Silver,
///     Gold,
/// }
///
/// impl_record_enum!(Tier { Bronze, Silver, Gold });
/// ```
#[macro_export]
macro_rules! impl_record_enum {
    ($ty:ident { $($variant:ident),+ $(,)? }) => {
        impl $crate::types::FieldValue for $ty {
            fn semantic_type() -> ::std::option::Option<$crate::types::SemanticType> {
                ::std::option::Option::Some($crate::types::SemanticType::enumeration([
                    $(stringify!($variant)),+
                ]))
            }

            fn into_value(self) -> ::std::option::Option<$crate::types::Value> {
                let name = match self {
                    $($ty::$variant => stringify!($variant)),+
                };
                ::std::option::Option::Some($crate::types::Value::String(name.to_string()))
            }

            fn from_value(
                value: ::std::option::Option<$crate::types::Value>,
            ) -> $crate::Result<Self> {
                match value {
                    $(::std::option::Option::Some($crate::types::Value::String(name))
                        if name == stringify!($variant) =>
                    {
                        ::std::result::Result::Ok($ty::$variant)
                    })+
                    other => ::std::result::Result::Err($crate::Error::new(
                        $crate::ErrorKind::ValueInvalid,
                        format!("{:?} is not a member of {}", other, stringify!($ty)),
                    )),
                }
            }
        }
    };
}

/// Reads the values of a record in declaration order.
///
/// Used by [`crate::Record::from_values`] implementations.
pub struct ValueReader {
    values: std::vec::IntoIter<Option<Value>>,
    position: usize,
}

impl ValueReader {
    /// Create a reader over the values of one record.
    pub fn new(values: Vec<Option<Value>>) -> Self {
        Self {
            values: values.into_iter(),
            position: 0,
        }
    }

    /// Read the next field value.
    pub fn read<T: FieldValue>(&mut self) -> Result<T> {
        let value = self.values.next().ok_or_else(|| {
            Error::new(
                ErrorKind::ValueInvalid,
                format!("record has no value at position {}", self.position),
            )
        })?;
        let position = self.position;
        self.position += 1;
        T::from_value(value).map_err(|e| e.with_context("position", position.to_string()))
    }
}
