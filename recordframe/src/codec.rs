//! Conversion between record values and stored cells.

use arrow_schema::{DataType, TimeUnit};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use ordered_float::OrderedFloat;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::column::{long_to_double_exact, rescale_decimal, Scalar};
use crate::types::{SemanticType, Value};
use crate::{Error, ErrorKind, Result};

const MICROS_PER_SECOND: i64 = 1_000_000;

/// Converts values of one semantic type from and to cells of one storage
/// data type.
///
/// Every conversion is exact: a value the storage can't hold without loss
/// is rejected instead of rounded.
#[derive(Debug, Clone, PartialEq)]
pub struct Codec {
    semantic: SemanticType,
    data_type: DataType,
}

impl Codec {
    /// Create a codec.
    pub fn new(semantic: SemanticType, data_type: DataType) -> Self {
        Self {
            semantic,
            data_type,
        }
    }

    /// Return the semantic type of decoded values.
    pub fn semantic_type(&self) -> &SemanticType {
        &self.semantic
    }

    /// Return the data type of encoded cells.
    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    /// Encode a value into a cell.
    pub fn encode(&self, value: &Value) -> Result<Scalar> {
        let scalar = match (&self.semantic, value, &self.data_type) {
            (SemanticType::Boolean, Value::Boolean(v), DataType::Boolean) => Scalar::Boolean(*v),

            (SemanticType::Int, Value::Int(v), DataType::Int32) => Scalar::Int32(*v),
            (SemanticType::Int, Value::Int(v), DataType::Int64) => Scalar::Int64(i64::from(*v)),
            (SemanticType::Int, Value::Int(v), DataType::Float64) => {
                Scalar::Float64(OrderedFloat(f64::from(*v)))
            }
            (SemanticType::Long, Value::Long(v), DataType::Int64) => Scalar::Int64(*v),
            (SemanticType::Long, Value::Long(v), DataType::Float64) => {
                let f = long_to_double_exact(*v)
                    .ok_or_else(|| self.inexact(value, "double can't represent it exactly"))?;
                Scalar::Float64(OrderedFloat(f))
            }
            (SemanticType::Float, Value::Float(v), DataType::Float32) => Scalar::Float32(*v),
            (SemanticType::Float, Value::Float(v), DataType::Float64) => {
                Scalar::Float64(OrderedFloat(f64::from(v.into_inner())))
            }
            (SemanticType::Double, Value::Double(v), DataType::Float64) => Scalar::Float64(*v),

            (
                SemanticType::Decimal { precision, scale },
                Value::Decimal(v),
                DataType::Decimal128(stored_precision, stored_scale),
            ) => {
                let from_scale = v.scale() as i8;
                // Declared precision and scale bound the value, the stored
                // type may be wider.
                rescale_decimal(v.mantissa(), from_scale, *scale as i8, *precision).ok_or_else(
                    || self.inexact(value, "value doesn't fit the declared precision and scale"),
                )?;
                let unscaled = rescale_decimal(
                    v.mantissa(),
                    from_scale,
                    *stored_scale,
                    *stored_precision,
                )
                .ok_or_else(|| self.inexact(value, "value doesn't fit the storage"))?;
                Scalar::Decimal128(unscaled)
            }

            (SemanticType::Date, Value::Date(v), DataType::Date32) => {
                let days = v.signed_duration_since(NaiveDate::default()).num_days();
                Scalar::Int32(
                    i32::try_from(days).map_err(|_| self.inexact(value, "date out of range"))?,
                )
            }
            (
                SemanticType::Date,
                Value::Date(v),
                DataType::Timestamp(TimeUnit::Microsecond, None),
            ) => Scalar::Int64(self.naive_micros(&v.and_time(NaiveTime::MIN), value)?),
            (SemanticType::Time, Value::Time(v), DataType::Time64(TimeUnit::Microsecond)) => {
                if v.nanosecond() % 1_000 != 0 {
                    return Err(self.inexact(value, "sub-microsecond precision"));
                }
                Scalar::Int64(
                    i64::from(v.num_seconds_from_midnight()) * MICROS_PER_SECOND
                        + i64::from(v.nanosecond() / 1_000),
                )
            }
            (
                SemanticType::Timestamp { tz: None },
                Value::Timestamp(v),
                DataType::Timestamp(TimeUnit::Microsecond, None),
            ) => Scalar::Int64(self.naive_micros(v, value)?),
            (
                SemanticType::Timestamp { tz: Some(_) },
                Value::Timestampz(v),
                DataType::Timestamp(TimeUnit::Microsecond, Some(_)),
            ) => Scalar::Int64(self.naive_micros(&v.naive_utc(), value)?),
            (
                SemanticType::Duration,
                Value::Duration(v),
                DataType::Duration(TimeUnit::Microsecond),
            ) => {
                let micros = v
                    .num_microseconds()
                    .ok_or_else(|| self.inexact(value, "duration out of range"))?;
                if Duration::microseconds(micros) != *v {
                    return Err(self.inexact(value, "sub-microsecond precision"));
                }
                Scalar::Int64(micros)
            }

            (SemanticType::String, Value::String(v), DataType::Utf8) => Scalar::Utf8(v.clone()),
            (SemanticType::Uuid, Value::Uuid(v), DataType::FixedSizeBinary(16)) => {
                Scalar::Binary(v.as_bytes().to_vec())
            }
            (SemanticType::Enumeration(members), Value::String(v), data_type) => {
                let ordinal = members.iter().position(|m| m == v).ok_or_else(|| {
                    Error::new(
                        ErrorKind::ValueInvalid,
                        format!("{v:?} is not a member of {}", self.semantic),
                    )
                })?;
                match data_type {
                    DataType::Utf8 => Scalar::Utf8(v.clone()),
                    DataType::Int32 => Scalar::Int32(ordinal as i32),
                    _ => return Err(self.mismatch(value)),
                }
            }
            (SemanticType::Opaque, Value::Opaque(v), DataType::Binary) => Scalar::Binary(v.clone()),
            _ => return Err(self.mismatch(value)),
        };
        Ok(scalar)
    }

    /// Decode a cell into a value.
    pub fn decode(&self, scalar: Scalar) -> Result<Value> {
        let value = match (&self.semantic, scalar, &self.data_type) {
            (SemanticType::Boolean, Scalar::Boolean(v), _) => Value::Boolean(v),

            (SemanticType::Int, Scalar::Int32(v), _) => Value::Int(v),
            (SemanticType::Int, Scalar::Int64(v), _) => Value::Int(
                i32::try_from(v).map_err(|_| self.unreadable(&Scalar::Int64(v)))?,
            ),
            (SemanticType::Int, Scalar::Float64(v), _) => {
                let v = double_to_long_exact(v.into_inner())
                    .and_then(|v| i32::try_from(v).ok())
                    .ok_or_else(|| self.unreadable(&Scalar::Float64(v)))?;
                Value::Int(v)
            }
            (SemanticType::Long, Scalar::Int64(v), _) => Value::Long(v),
            (SemanticType::Long, Scalar::Int32(v), _) => Value::Long(i64::from(v)),
            (SemanticType::Long, Scalar::Float64(v), _) => Value::Long(
                double_to_long_exact(v.into_inner())
                    .ok_or_else(|| self.unreadable(&Scalar::Float64(v)))?,
            ),
            (SemanticType::Float, Scalar::Float32(v), _) => Value::Float(v),
            (SemanticType::Float, Scalar::Float64(v), _) => {
                let narrowed = v.into_inner() as f32;
                if f64::from(narrowed) != v.into_inner() && !v.is_nan() {
                    return Err(self.unreadable(&Scalar::Float64(v)));
                }
                Value::Float(OrderedFloat(narrowed))
            }
            (SemanticType::Double, Scalar::Float64(v), _) => Value::Double(v),

            (
                SemanticType::Decimal { precision, scale },
                Scalar::Decimal128(v),
                DataType::Decimal128(_, stored_scale),
            ) => {
                let unscaled = rescale_decimal(v, *stored_scale, *scale as i8, *precision)
                    .ok_or_else(|| self.unreadable(&Scalar::Decimal128(v)))?;
                Value::Decimal(
                    Decimal::try_from_i128_with_scale(unscaled, u32::from(*scale)).map_err(
                        |e| self.unreadable(&Scalar::Decimal128(v)).set_source(e),
                    )?,
                )
            }

            (SemanticType::Date, Scalar::Int32(v), DataType::Date32) => Value::Date(
                NaiveDate::default()
                    .checked_add_signed(Duration::days(i64::from(v)))
                    .ok_or_else(|| self.unreadable(&Scalar::Int32(v)))?,
            ),
            (SemanticType::Date, Scalar::Int64(v), DataType::Timestamp(_, None)) => {
                let ts = from_micros(v).ok_or_else(|| self.unreadable(&Scalar::Int64(v)))?;
                if ts.time() != NaiveTime::MIN {
                    return Err(self
                        .unreadable(&Scalar::Int64(v))
                        .with_context("reason", "timestamp isn't at midnight"));
                }
                Value::Date(ts.date())
            }
            (SemanticType::Time, Scalar::Int64(v), _) => {
                let secs = u32::try_from(v.div_euclid(MICROS_PER_SECOND)).ok();
                let nanos = (v.rem_euclid(MICROS_PER_SECOND) * 1_000) as u32;
                Value::Time(
                    secs.and_then(|secs| NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos))
                        .ok_or_else(|| self.unreadable(&Scalar::Int64(v)))?,
                )
            }
            (SemanticType::Timestamp { tz: None }, Scalar::Int64(v), _) => Value::Timestamp(
                from_micros(v).ok_or_else(|| self.unreadable(&Scalar::Int64(v)))?,
            ),
            (SemanticType::Timestamp { tz: Some(tz) }, Scalar::Int64(v), _) => Value::Timestampz(
                DateTime::from_timestamp_micros(v)
                    .ok_or_else(|| self.unreadable(&Scalar::Int64(v)))?
                    .with_timezone(tz),
            ),
            (SemanticType::Duration, Scalar::Int64(v), _) => {
                Value::Duration(Duration::microseconds(v))
            }

            (SemanticType::String, Scalar::Utf8(v), _) => Value::String(v),
            (SemanticType::Uuid, Scalar::Binary(v), _) => Value::Uuid(
                Uuid::from_slice(&v)
                    .map_err(|e| self.unreadable(&Scalar::Binary(v.clone())).set_source(e))?,
            ),
            (SemanticType::Enumeration(members), Scalar::Utf8(v), _) => {
                if !members.contains(&v) {
                    return Err(self.unreadable(&Scalar::Utf8(v)));
                }
                Value::String(v)
            }
            (SemanticType::Enumeration(members), Scalar::Int32(v), _) => {
                let member = usize::try_from(v)
                    .ok()
                    .and_then(|pos| members.get(pos))
                    .ok_or_else(|| self.unreadable(&Scalar::Int32(v)))?;
                Value::String(member.clone())
            }
            (SemanticType::Opaque, Scalar::Binary(v), _) => Value::Opaque(v),
            (_, scalar, _) => return Err(self.unreadable(&scalar)),
        };
        Ok(value)
    }

    fn naive_micros(&self, ts: &NaiveDateTime, value: &Value) -> Result<i64> {
        if ts.nanosecond() % 1_000 != 0 {
            return Err(self.inexact(value, "sub-microsecond precision"));
        }
        Ok(ts.and_utc().timestamp_micros())
    }

    fn mismatch(&self, value: &Value) -> Error {
        Error::new(
            ErrorKind::ValueInvalid,
            format!(
                "expected {} value, got {} {value}",
                self.semantic,
                value.type_name()
            ),
        )
    }

    fn inexact(&self, value: &Value, reason: &str) -> Error {
        Error::new(
            ErrorKind::ValueInvalid,
            format!(
                "{value} can't be stored as {} in {}: {reason}",
                self.semantic, self.data_type
            ),
        )
    }

    fn unreadable(&self, scalar: &Scalar) -> Error {
        Error::new(
            ErrorKind::ValueInvalid,
            format!(
                "cell {scalar} of {} can't be read as {}",
                self.data_type, self.semantic
            ),
        )
    }
}

fn from_micros(v: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_micros(v).map(|dt| dt.naive_utc())
}

fn double_to_long_exact(v: f64) -> Option<i64> {
    // 2^63 is the first double above i64::MAX.
    const BOUND: f64 = 9.223_372_036_854_775_808e18;
    if v.fract() != 0.0 || !(-BOUND..BOUND).contains(&v) {
        return None;
    }
    Some(v as i64)
}

#[cfg(test)]
mod tests {
    use chrono::FixedOffset;

    use super::*;

    fn round_trip(codec: &Codec, value: Value) -> Value {
        codec.decode(codec.encode(&value).unwrap()).unwrap()
    }

    #[test]
    fn test_nullable_int_stored_as_double() {
        let codec = Codec::new(SemanticType::Long, DataType::Float64);
        assert_eq!(
            codec.encode(&Value::Long(3)).unwrap(),
            Scalar::Float64(OrderedFloat(3.0))
        );
        assert_eq!(round_trip(&codec, Value::Long(-42)), Value::Long(-42));
        assert_eq!(
            codec.encode(&Value::Long(i64::MAX)).unwrap_err().kind(),
            ErrorKind::ValueInvalid
        );
        assert!(codec.decode(Scalar::Float64(OrderedFloat(1.5))).is_err());
    }

    #[test]
    fn test_date_stored_as_timestamp() {
        let codec = Codec::new(
            SemanticType::Date,
            DataType::Timestamp(TimeUnit::Microsecond, None),
        );
        let date = NaiveDate::from_ymd_opt(2023, 5, 17).unwrap();
        assert_eq!(round_trip(&codec, Value::Date(date)), Value::Date(date));

        let err = codec.decode(Scalar::Int64(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueInvalid);
    }

    #[test]
    fn test_date32() {
        let codec = Codec::new(SemanticType::Date, DataType::Date32);
        let date = NaiveDate::from_ymd_opt(1970, 1, 2).unwrap();
        assert_eq!(codec.encode(&Value::Date(date)).unwrap(), Scalar::Int32(1));
        assert_eq!(round_trip(&codec, Value::Date(date)), Value::Date(date));
    }

    #[test]
    fn test_timestamp_read_in_declared_zone() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let codec = Codec::new(
            SemanticType::Timestamp { tz: Some(tz) },
            DataType::Timestamp(TimeUnit::Microsecond, Some(tz.to_string().into())),
        );
        let utc = DateTime::from_timestamp_micros(1_700_000_000_000_000).unwrap();
        let value = codec
            .decode(codec.encode(&Value::Timestampz(utc.fixed_offset())).unwrap())
            .unwrap();
        match value {
            Value::Timestampz(v) => {
                assert_eq!(v, utc);
                assert_eq!(v.offset(), &tz);
            }
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn test_time_rejects_nanoseconds() {
        let codec = Codec::new(SemanticType::Time, DataType::Time64(TimeUnit::Microsecond));
        let time = NaiveTime::from_hms_micro_opt(13, 5, 7, 42).unwrap();
        assert_eq!(round_trip(&codec, Value::Time(time)), Value::Time(time));

        let time = NaiveTime::from_hms_nano_opt(13, 5, 7, 42).unwrap();
        assert!(codec.encode(&Value::Time(time)).is_err());
    }

    #[test]
    fn test_decimal() {
        let codec = Codec::new(
            SemanticType::Decimal {
                precision: 5,
                scale: 2,
            },
            DataType::Decimal128(5, 2),
        );
        let value = Value::Decimal(Decimal::new(1234, 1));
        assert_eq!(codec.encode(&value).unwrap(), Scalar::Decimal128(12340));
        assert_eq!(
            codec.decode(Scalar::Decimal128(12340)).unwrap(),
            Value::Decimal(Decimal::new(12340, 2))
        );
        assert!(codec.encode(&Value::Decimal(Decimal::new(1234, 3))).is_err());
        assert!(codec
            .encode(&Value::Decimal(Decimal::new(123456, 0)))
            .is_err());
    }

    #[test]
    fn test_enumeration_storage() {
        let semantic = SemanticType::enumeration(["Bronze", "Silver", "Gold"]);
        let ordinals = Codec::new(semantic.clone(), DataType::Int32);
        assert_eq!(
            ordinals
                .encode(&Value::String("Gold".to_string()))
                .unwrap(),
            Scalar::Int32(2)
        );
        assert_eq!(
            ordinals.decode(Scalar::Int32(1)).unwrap(),
            Value::String("Silver".to_string())
        );
        assert!(ordinals.decode(Scalar::Int32(3)).is_err());

        let names = Codec::new(semantic, DataType::Utf8);
        assert!(names.encode(&Value::String("Platinum".to_string())).is_err());
        assert!(names.decode(Scalar::Utf8("Platinum".to_string())).is_err());
    }

    #[test]
    fn test_uuid() {
        let codec = Codec::new(SemanticType::Uuid, DataType::FixedSizeBinary(16));
        let id = Uuid::from_u128(0x1234);
        assert_eq!(round_trip(&codec, Value::Uuid(id)), Value::Uuid(id));
    }

    #[test]
    fn test_mismatched_value() {
        let codec = Codec::new(SemanticType::Int, DataType::Int32);
        let err = codec.encode(&Value::String("1".to_string())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueInvalid);
    }
}
