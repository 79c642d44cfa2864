//! Read-side value mappings.
//!
//! # Architecture
//!
//! Column decoding uses a two-phase approach:
//! 1. `TypeCategory` classifies the driver's column type name
//! 2. A per-category decoder extracts the value into [`SqlValue`]
//!
//! Rows are [`Row`] maps keyed by column name in result-metadata order. A
//! column name that repeats within one row overwrites the earlier value in
//! place; queries that need both should alias them.

use crate::error::{DbError, DbResult};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::{Column, Decode, Row as _, Type, TypeInfo};

/// One result row: column name to value, in result-metadata order.
pub type Row = IndexMap<String, SqlValue>;

/// A value read from a result column.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    /// Exact DECIMAL text as sent by the server.
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
    Json(JsonValue),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer view; unsigned values that fit, integral decimals (`SUM`
    /// results) and BIT(1) booleans convert.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::UInt(v) => i64::try_from(*v).ok(),
            Self::Decimal(v) => v.parse().ok(),
            Self::Bool(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) | Self::Decimal(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            Self::Int(v) => Some(*v != 0),
            Self::UInt(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Self::DateTime(v) => Some(*v),
            Self::Date(v) => v.and_hms_opt(0, 0, 0),
            _ => None,
        }
    }

    /// Variant name, used in type-mismatch errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Decimal(_) => "decimal",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::DateTime(_) => "datetime",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::Json(_) => "json",
        }
    }

    /// JSON view of the value. Binary data is base64 encoded and temporal
    /// values use ISO-8601 text, which chrono's serde impls accept back.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(v) => JsonValue::Bool(*v),
            Self::Int(v) => JsonValue::Number((*v).into()),
            Self::UInt(v) => JsonValue::Number((*v).into()),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(v.to_string())),
            Self::Decimal(v) | Self::Text(v) => JsonValue::String(v.clone()),
            Self::Bytes(v) => JsonValue::String(STANDARD.encode(v)),
            Self::DateTime(v) => JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            Self::Date(v) => JsonValue::String(v.format("%Y-%m-%d").to_string()),
            Self::Time(v) => JsonValue::String(v.format("%H:%M:%S%.f").to_string()),
            Self::Json(v) => v.clone(),
        }
    }
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Convert a row into a JSON object, preserving column order.
pub fn row_to_json(row: &Row) -> serde_json::Map<String, JsonValue> {
    row.iter()
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect()
}

/// Map a row onto a typed value by matching field names to column names.
///
/// The correspondence is whatever the target's `Deserialize` impl declares,
/// so renames live on the struct (`#[serde(rename = "isBlind")]`).
pub fn from_row<T: DeserializeOwned>(row: &Row) -> DbResult<T> {
    let object = JsonValue::Object(row_to_json(row));
    Ok(serde_json::from_value(object)?)
}

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for MySQL column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Unsigned,
    Float,
    Decimal,
    Boolean,
    Bit,
    Text,
    Binary,
    Json,
    Date,
    Time,
    DateTime,
    Unknown,
}

/// Classify a MySQL type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal first, "numeric" must not fall through to anything else
    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }

    // TINYINT(1) is reported as BOOLEAN
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower == "bit" {
        return TypeCategory::Bit;
    }

    if lower.contains("int") || lower == "year" {
        if lower.contains("unsigned") {
            return TypeCategory::Unsigned;
        }
        return TypeCategory::Integer;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" {
        return TypeCategory::Json;
    }

    if lower == "datetime" || lower == "timestamp" {
        return TypeCategory::DateTime;
    }

    if lower == "date" {
        return TypeCategory::Date;
    }

    if lower == "time" {
        return TypeCategory::Time;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "geometry" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || lower == "enum" || lower == "set" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Row Decoding
// =============================================================================

/// Decode every column of a driver row into a [`Row`].
///
/// A column the driver cannot decode into its category fails the whole row
/// with [`DbError::Decode`] naming the column.
pub fn decode_row(row: &MySqlRow) -> DbResult<Row> {
    let mut out = Row::with_capacity(row.columns().len());
    for (idx, col) in row.columns().iter().enumerate() {
        let type_name = col.type_info().name();
        let value = decode_column(row, idx, categorize_type(type_name))
            .map_err(|e| column_decode_error(col.name(), type_name, e))?;
        // insert keeps the first position of a repeated name
        out.insert(col.name().to_string(), value);
    }
    Ok(out)
}

fn column_decode_error(column: &str, type_name: &str, err: impl std::fmt::Display) -> DbError {
    tracing::error!(column, type_name, error = %err, "Failed to decode column");
    DbError::decode(format!("Cannot decode column '{column}' of type {type_name}: {err}"))
}

type Decoded = Result<SqlValue, sqlx::Error>;

fn nullable<T>(value: Option<T>, wrap: impl FnOnce(T) -> SqlValue) -> SqlValue {
    value.map(wrap).unwrap_or(SqlValue::Null)
}

fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> Decoded {
    match category {
        TypeCategory::Decimal => decode_decimal(row, idx),
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Unsigned => decode_unsigned(row, idx),
        TypeCategory::Boolean | TypeCategory::Bit => decode_boolean(row, idx),
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Binary => decode_binary(row, idx),
        TypeCategory::Json => decode_json(row, idx),
        TypeCategory::DateTime => decode_datetime(row, idx),
        TypeCategory::Date => decode_date(row, idx),
        TypeCategory::Time => decode_time(row, idx),
        TypeCategory::Text | TypeCategory::Unknown => decode_text(row, idx),
    }
}

fn decode_decimal(row: &MySqlRow, idx: usize) -> Decoded {
    let value = row.try_get::<Option<RawDecimal>, _>(idx)?;
    Ok(nullable(value, |v| SqlValue::Decimal(v.0)))
}

fn decode_integer(row: &MySqlRow, idx: usize) -> Decoded {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return Ok(nullable(v, SqlValue::Int));
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return Ok(nullable(v, |v| SqlValue::Int(v.into())));
    }
    if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
        return Ok(nullable(v, |v| SqlValue::Int(v.into())));
    }
    if let Ok(v) = row.try_get::<Option<i8>, _>(idx) {
        return Ok(nullable(v, |v| SqlValue::Int(v.into())));
    }
    // YEAR and friends come through unsigned
    decode_unsigned(row, idx)
}

fn decode_unsigned(row: &MySqlRow, idx: usize) -> Decoded {
    if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
        return Ok(nullable(v, SqlValue::UInt));
    }
    if let Ok(v) = row.try_get::<Option<u32>, _>(idx) {
        return Ok(nullable(v, |v| SqlValue::UInt(v.into())));
    }
    if let Ok(v) = row.try_get::<Option<u16>, _>(idx) {
        return Ok(nullable(v, |v| SqlValue::UInt(v.into())));
    }
    let v = row.try_get::<Option<u8>, _>(idx)?;
    Ok(nullable(v, |v| SqlValue::UInt(v.into())))
}

fn decode_boolean(row: &MySqlRow, idx: usize) -> Decoded {
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return Ok(nullable(v, SqlValue::Bool));
    }
    // BIT(n) arrives as big-endian bytes
    let bits = match row.try_get::<Option<u64>, _>(idx) {
        Ok(v) => v,
        Err(_) => row
            .try_get::<Option<Vec<u8>>, _>(idx)?
            .map(|b| b.iter().fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))),
    };
    Ok(match bits {
        Some(v @ (0 | 1)) => SqlValue::Bool(v == 1),
        Some(v) => SqlValue::UInt(v),
        None => SqlValue::Null,
    })
}

fn decode_float(row: &MySqlRow, idx: usize) -> Decoded {
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return Ok(nullable(v, SqlValue::Float));
    }
    let v = row.try_get::<Option<f32>, _>(idx)?;
    Ok(nullable(v, |v| SqlValue::Float(v.into())))
}

fn decode_binary(row: &MySqlRow, idx: usize) -> Decoded {
    Ok(nullable(row.try_get::<Option<Vec<u8>>, _>(idx)?, SqlValue::Bytes))
}

fn decode_json(row: &MySqlRow, idx: usize) -> Decoded {
    Ok(nullable(row.try_get::<Option<JsonValue>, _>(idx)?, SqlValue::Json))
}

fn decode_datetime(row: &MySqlRow, idx: usize) -> Decoded {
    Ok(nullable(
        row.try_get::<Option<NaiveDateTime>, _>(idx)?,
        SqlValue::DateTime,
    ))
}

fn decode_date(row: &MySqlRow, idx: usize) -> Decoded {
    Ok(nullable(row.try_get::<Option<NaiveDate>, _>(idx)?, SqlValue::Date))
}

fn decode_time(row: &MySqlRow, idx: usize) -> Decoded {
    Ok(nullable(row.try_get::<Option<NaiveTime>, _>(idx)?, SqlValue::Time))
}

fn decode_text(row: &MySqlRow, idx: usize) -> Decoded {
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return Ok(nullable(v, SqlValue::Text));
    }
    // Text columns with a binary collation
    let bytes = row.try_get::<Option<Vec<u8>>, _>(idx)?;
    Ok(nullable(bytes, |bytes| match String::from_utf8(bytes) {
        Ok(s) => SqlValue::Text(s),
        Err(e) => SqlValue::Bytes(e.into_bytes()),
    }))
}
