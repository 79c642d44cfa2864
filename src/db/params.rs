//! Bind-side parameter values.
//!
//! [`SqlParam`] is the positional parameter type accepted by the statement
//! builder and by `Client::run`. Parameters are bound strictly in order, one
//! per `?` placeholder.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::MySql;
use sqlx::mysql::MySqlArguments;
use sqlx::types::Json;
use std::fmt;

/// A parameter value for parameterized statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    Json(JsonValue),
}

impl SqlParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::DateTime(_) => "datetime",
            Self::Date(_) => "date",
            Self::Json(_) => "json",
        }
    }
}

/// Renders the value as a MySQL literal. Diagnostic output only; never sent
/// to the server.
impl fmt::Display for SqlParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(v) => f.write_str(if *v { "TRUE" } else { "FALSE" }),
            Self::Int(v) => write!(f, "{}", v),
            Self::UInt(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(v) => write!(f, "'{}'", v.replace('\\', "\\\\").replace('\'', "''")),
            Self::Bytes(v) => {
                f.write_str("X'")?;
                for byte in v {
                    write!(f, "{:02X}", byte)?;
                }
                f.write_str("'")
            }
            Self::DateTime(v) => write!(f, "'{}'", v.format("%Y-%m-%d %H:%M:%S%.f")),
            Self::Date(v) => write!(f, "'{}'", v.format("%Y-%m-%d")),
            Self::Json(v) => write!(f, "'{}'", v.to_string().replace('\'', "''")),
        }
    }
}

macro_rules! impl_from_for_param {
    ($($ty:ty => $variant:ident as $target:ty),+ $(,)?) => {
        $(
            impl From<$ty> for SqlParam {
                fn from(v: $ty) -> Self {
                    SqlParam::$variant(<$target>::from(v))
                }
            }
        )+
    };
}

impl_from_for_param!(
    bool => Bool as bool,
    i8 => Int as i64,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int as i64,
    u8 => UInt as u64,
    u16 => UInt as u64,
    u32 => UInt as u64,
    u64 => UInt as u64,
    f32 => Float as f64,
    f64 => Float as f64,
    String => Text as String,
    &str => Text as String,
    Vec<u8> => Bytes as Vec<u8>,
    NaiveDateTime => DateTime as NaiveDateTime,
    NaiveDate => Date as NaiveDate,
    JsonValue => Json as JsonValue,
);

impl From<&String> for SqlParam {
    fn from(v: &String) -> Self {
        SqlParam::Text(v.clone())
    }
}

impl From<&[u8]> for SqlParam {
    fn from(v: &[u8]) -> Self {
        SqlParam::Bytes(v.to_vec())
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlParam::Null)
    }
}

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q SqlParam,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        SqlParam::Null => query.bind(None::<String>),
        SqlParam::Bool(v) => query.bind(*v),
        SqlParam::Int(v) => query.bind(*v),
        SqlParam::UInt(v) => query.bind(*v),
        SqlParam::Float(v) => query.bind(*v),
        SqlParam::Text(v) => query.bind(v.as_str()),
        SqlParam::Bytes(v) => query.bind(v.as_slice()),
        SqlParam::DateTime(v) => query.bind(*v),
        SqlParam::Date(v) => query.bind(*v),
        SqlParam::Json(v) => query.bind(Json(v)),
    }
}
