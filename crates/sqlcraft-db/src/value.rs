//! Backend-agnostic scalar values.
//!
//! The [`Value`] enum is what ends up in the parameter list of a compiled
//! query. Every literal operand given to the builder is converted into a
//! `Value` and travels separately from the SQL text, so user-supplied data is
//! never interpolated into a statement.

use std::fmt;

/// A backend-agnostic representation of a database value.
///
/// # Examples
///
/// ```
/// use sqlcraft_db::value::Value;
///
/// let v = Value::from(42_i64);
/// assert_eq!(v, Value::Int(42));
///
/// let v = Value::from("paid");
/// assert_eq!(v, Value::String("paid".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// SQL NULL.
    Null,
    /// A boolean value.
    Bool(bool),
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit floating-point number.
    Float(f64),
    /// A UTF-8 string.
    String(String),
    /// Raw binary data.
    Bytes(Vec<u8>),
    /// A date without time.
    Date(chrono::NaiveDate),
    /// A date and time without timezone.
    DateTime(chrono::NaiveDateTime),
    /// A date and time with UTC timezone.
    DateTimeTz(chrono::DateTime<chrono::Utc>),
    /// A time without date.
    Time(chrono::NaiveTime),
    /// A UUID value.
    Uuid(uuid::Uuid),
    /// A JSON document.
    Json(serde_json::Value),
    /// A list of values, bound as a single array parameter.
    List(Vec<Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Self::Date(d) => write!(f, "{d}"),
            Self::DateTime(dt) => write!(f, "{dt}"),
            Self::DateTimeTz(dt) => write!(f, "{dt}"),
            Self::Time(t) => write!(f, "{t}"),
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Json(j) => write!(f, "{j}"),
            Self::List(vals) => {
                write!(f, "[")?;
                for (i, v) in vals.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

macro_rules! value_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for Value {
                fn from(v: $source) -> Self {
                    Self::$variant(v.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i32 => Int,
    i64 => Int,
    u32 => Int,
    f64 => Float,
    String => String,
    &str => String,
    Vec<u8> => Bytes,
    chrono::NaiveDate => Date,
    chrono::NaiveDateTime => DateTime,
    chrono::DateTime<chrono::Utc> => DateTimeTz,
    chrono::NaiveTime => Time,
    uuid::Uuid => Uuid,
    serde_json::Value => Json,
    Vec<Value> => List,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl Value {
    /// Returns `true` if this value is `Null`.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns a short name for the value's kind, used in diagnostics.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Date(_) => "date",
            Self::DateTime(_) => "datetime",
            Self::DateTimeTz(_) => "datetimetz",
            Self::Time(_) => "time",
            Self::Uuid(_) => "uuid",
            Self::Json(_) => "json",
            Self::List(_) => "list",
        }
    }

    /// Attempts to extract a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Attempts to extract an integer value.
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_scalars() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(7_i32), Value::Int(7));
        assert_eq!(Value::from(7_u32), Value::Int(7));
        assert_eq!(Value::from(2.5_f64), Value::Float(2.5));
        assert_eq!(Value::from("US"), Value::String("US".to_string()));
    }

    #[test]
    fn test_from_option() {
        assert_eq!(Value::from(Some(100_i64)), Value::Int(100));
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }

    #[test]
    fn test_from_chrono_date() {
        let d = chrono::NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(Value::from(d), Value::Date(d));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Bytes(vec![1, 2, 3]).to_string(), "<3 bytes>");
        let list = Value::List(vec![Value::Int(1), Value::from("a")]);
        assert_eq!(list.to_string(), "[1, a]");
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Null.type_name(), "null");
        assert_eq!(Value::from(1).type_name(), "int");
        assert_eq!(Value::from("x").type_name(), "string");
        assert_eq!(Value::Uuid(uuid::Uuid::nil()).type_name(), "uuid");
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::from("paid").as_str(), Some("paid"));
        assert_eq!(Value::from(1).as_str(), None);
        assert_eq!(Value::from(9).as_int(), Some(9));
        assert!(Value::Null.is_null());
    }

    #[test]
    fn test_serde_tagged() {
        let json = serde_json::to_value(Value::Int(3)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "Int", "value": 3}));
        let back: Value = serde_json::from_value(json).unwrap();
        assert_eq!(back, Value::Int(3));
    }
}
