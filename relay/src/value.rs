//! SQLite value type conversions

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rusqlite::types::ValueRef;

use crate::error::{Error, Result};

/// One column or parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// INTEGER storage class
    Integer(i64),
    /// REAL storage class
    Real(f64),
    /// TEXT storage class
    ///
    /// Only valid UTF-8 is read back as text. Engine TEXT holding other bytes arrives as [`Value::Blob`].
    Text(String),
    /// BLOB storage class
    Blob(Vec<u8>),
    /// NULL
    Null,
}

/// Storage class of a [`Value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Integer,
    Real,
    Text,
    Blob,
    Null,
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueType::Integer => "INTEGER",
            ValueType::Real => "REAL",
            ValueType::Text => "TEXT",
            ValueType::Blob => "BLOB",
            ValueType::Null => "NULL",
        };
        f.write_str(name)
    }
}

/// Text layouts accepted when reading a timestamp out of a TEXT value
const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"];

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Integer(_) => ValueType::Integer,
            Value::Real(_) => ValueType::Real,
            Value::Text(_) => ValueType::Text,
            Value::Blob(_) => ValueType::Blob,
            Value::Null => ValueType::Null,
        }
    }

    pub fn is_null(&self) -> bool { matches!(self, Value::Null) }

    /// Copy engine TEXT bytes, keeping them as a blob when they are not UTF-8
    pub(crate) fn from_text_bytes(bytes: &[u8]) -> Value {
        match std::str::from_utf8(bytes) {
            Ok(text) => Value::Text(text.to_owned()),
            Err(_) => Value::Blob(bytes.to_vec()),
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Real(f) if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Booleans are stored as integer 1 or 0; anything else is not a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Integer(1) => Some(true),
            Value::Integer(0) => Some(false),
            _ => None,
        }
    }

    /// Epoch seconds (INTEGER or REAL) or a recognized TEXT timestamp
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Integer(secs) => Utc.timestamp_opt(*secs, 0).single(),
            Value::Real(secs) if !secs.is_finite() => None,
            Value::Real(secs) => {
                let whole = secs.floor();
                let nanos = ((secs - whole) * 1_000_000_000.0).round() as u32;
                Utc.timestamp_opt(whole as i64, nanos.min(999_999_999)).single()
            }
            Value::Text(text) => parse_timestamp(text),
            _ => None,
        }
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in TIMESTAMP_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok().and_then(|d| d.and_hms_opt(0, 0, 0)).map(|n| n.and_utc())
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{:?}", r),
            Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Blob(b) => {
                f.write_str("x'")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                f.write_str("'")
            }
            Value::Null => f.write_str("NULL"),
        }
    }
}

macro_rules! integer_value {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self { Value::Integer(v as i64) }
            }

            impl FromValue for $t {
                fn from_value(value: &Value) -> Result<Self> {
                    value
                        .as_integer()
                        .and_then(|i| <$t>::try_from(i).ok())
                        .ok_or(Error::Conversion { expected: stringify!($t), found: value.value_type() })
                }
            }
        )*
    };
}

integer_value!(i8, i16, i32, i64, u8, u16, u32);

impl From<f64> for Value {
    fn from(v: f64) -> Self { Value::Real(v) }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self { Value::Real(v as f64) }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Value::Integer(if v { 1 } else { 0 }) }
}

impl From<String> for Value {
    fn from(v: String) -> Self { Value::Text(v) }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self { Value::Text(v.to_string()) }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self { Value::Blob(v) }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self { Value::Blob(v.to_vec()) }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self { Value::Real(v.timestamp() as f64 + v.timestamp_subsec_nanos() as f64 / 1_000_000_000.0) }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// Conversion out of a [`Value`] following the coercion rules of the storage classes
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> { Ok(value.clone()) }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> { value.as_real().ok_or(Error::Conversion { expected: "f64", found: value.value_type() }) }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> { value.as_bool().ok_or(Error::Conversion { expected: "bool", found: value.value_type() }) }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_text().map(str::to_string).ok_or(Error::Conversion { expected: "String", found: value.value_type() })
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_blob().map(<[u8]>::to_vec).ok_or(Error::Conversion { expected: "Vec<u8>", found: value.value_type() })
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_timestamp().ok_or(Error::Conversion { expected: "DateTime<Utc>", found: value.value_type() })
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// Convert rusqlite Value to our Value
impl From<rusqlite::types::Value> for Value {
    fn from(value: rusqlite::types::Value) -> Self {
        match value {
            rusqlite::types::Value::Null => Value::Null,
            rusqlite::types::Value::Integer(i) => Value::Integer(i),
            rusqlite::types::Value::Real(f) => Value::Real(f),
            rusqlite::types::Value::Text(s) => Value::Text(s),
            rusqlite::types::Value::Blob(b) => Value::Blob(b),
        }
    }
}

/// Copies out of engine-owned memory; the borrow does not survive the next step
impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) => Value::from_text_bytes(t),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

impl From<Value> for rusqlite::types::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Integer(i) => rusqlite::types::Value::Integer(i),
            Value::Real(f) => rusqlite::types::Value::Real(f),
            Value::Text(s) => rusqlite::types::Value::Text(s),
            Value::Blob(b) => rusqlite::types::Value::Blob(b),
            Value::Null => rusqlite::types::Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_is_integer_one_or_zero_only() {
        assert_eq!(Value::from(true), Value::Integer(1));
        assert_eq!(bool::from_value(&Value::Integer(0)).unwrap(), false);
        assert_eq!(bool::from_value(&Value::Integer(1)).unwrap(), true);
        assert!(bool::from_value(&Value::Integer(2)).is_err());
        assert!(bool::from_value(&Value::Text("true".into())).is_err());
    }

    #[test]
    fn test_integer_coercions() {
        assert_eq!(i64::from_value(&Value::Real(3.0)).unwrap(), 3);
        assert!(i64::from_value(&Value::Real(3.5)).is_err());
        assert!(u8::from_value(&Value::Integer(300)).is_err());
        assert_eq!(f64::from_value(&Value::Integer(2)).unwrap(), 2.0);
        match i32::from_value(&Value::Text("1".into())) {
            Err(Error::Conversion { expected, found }) => {
                assert_eq!(expected, "i32");
                assert_eq!(found, ValueType::Text);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_timestamps() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(Value::Text("2024-03-01 12:30:00".into()).as_timestamp(), Some(expected));
        assert_eq!(Value::Text("2024-03-01T12:30:00Z".into()).as_timestamp(), Some(expected));
        assert_eq!(Value::Integer(expected.timestamp()).as_timestamp(), Some(expected));
        assert_eq!(Value::from(expected).as_timestamp(), Some(expected));
        assert_eq!(Value::Text("2024-03-01".into()).as_timestamp(), Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));
        assert_eq!(Value::Text("yesterday".into()).as_timestamp(), None);
        assert_eq!(Value::Real(f64::NAN).as_timestamp(), None);
        assert_eq!(Value::Real(f64::INFINITY).as_timestamp(), None);
        assert_eq!(Value::Real(1.5).as_timestamp(), Utc.timestamp_opt(1, 500_000_000).single());
    }

    #[test]
    fn test_option_maps_null() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Option::<String>::from_value(&Value::Null).unwrap(), None);
        assert_eq!(Option::<String>::from_value(&Value::Text("x".into())).unwrap(), Some("x".to_string()));
    }

    #[test]
    fn test_non_utf8_text_is_kept_as_blob() {
        assert_eq!(Value::from_text_bytes("héllo".as_bytes()), Value::Text("héllo".into()));
        assert_eq!(Value::from_text_bytes(&[0xff, 0x41]), Value::Blob(vec![0xff, 0x41]));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Text("it's".into()).to_string(), "'it''s'");
        assert_eq!(Value::Blob(vec![0xde, 0xad]).to_string(), "x'dead'");
        assert_eq!(Value::Null.to_string(), "NULL");
    }
}
