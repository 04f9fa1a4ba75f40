// used for persistence
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

// used to serialize resolved tables
use serde::{Deserialize, Serialize};

// used to print out readable forms of a data type
use std::fmt;

use crate::error::{CcdbError, Result};

/// Scalar type of a type-table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    UInt,
    Long,
    ULong,
    Double,
    Bool,
    String,
}

impl ColumnType {
    pub const ALL: [ColumnType; 7] = [
        ColumnType::Int,
        ColumnType::UInt,
        ColumnType::Long,
        ColumnType::ULong,
        ColumnType::Double,
        ColumnType::Bool,
        ColumnType::String,
    ];
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Int => "int",
            ColumnType::UInt => "uint",
            ColumnType::Long => "long",
            ColumnType::ULong => "ulong",
            ColumnType::Double => "double",
            ColumnType::Bool => "bool",
            ColumnType::String => "string",
        }
    }
    /// Unknown (or empty) type names fall back to `double`, so `("px", "")`
    /// describes a double column.
    pub fn from_name(name: &str) -> Self {
        let name = name.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.name() == name)
            .unwrap_or(ColumnType::Double)
    }
    pub fn parse(&self, token: &str) -> Result<Value> {
        let value = match self {
            ColumnType::Int => i32::parse_token(token).map(Value::Int),
            ColumnType::UInt => u32::parse_token(token).map(Value::UInt),
            ColumnType::Long => i64::parse_token(token).map(Value::Long),
            ColumnType::ULong => u64::parse_token(token).map(Value::ULong),
            ColumnType::Double => f64::parse_token(token).map(Value::Double),
            ColumnType::Bool => bool::parse_token(token).map(Value::Bool),
            ColumnType::String => String::parse_token(token).map(Value::String),
        };
        value.ok_or_else(|| CcdbError::Parse {
            message: format!("'{}' is not a valid {}", token, self.name()),
            position: None,
        })
    }
}
impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
impl ToSql for ColumnType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.name()))
    }
}
impl FromSql for ColumnType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str().map(ColumnType::from_name)
    }
}

/// A Rust type a cell can be read as.
pub trait CellType: Sized {
    const COLUMN_TYPE: ColumnType;
    fn parse_token(token: &str) -> Option<Self>;
    fn column_type(&self) -> ColumnType {
        Self::COLUMN_TYPE
    }
}

// ------------- Cell Types --------------
impl CellType for i32 {
    const COLUMN_TYPE: ColumnType = ColumnType::Int;
    fn parse_token(token: &str) -> Option<Self> {
        token.trim().parse().ok()
    }
}
impl CellType for u32 {
    const COLUMN_TYPE: ColumnType = ColumnType::UInt;
    fn parse_token(token: &str) -> Option<Self> {
        token.trim().parse().ok()
    }
}
impl CellType for i64 {
    const COLUMN_TYPE: ColumnType = ColumnType::Long;
    fn parse_token(token: &str) -> Option<Self> {
        token.trim().parse().ok()
    }
}
impl CellType for u64 {
    const COLUMN_TYPE: ColumnType = ColumnType::ULong;
    fn parse_token(token: &str) -> Option<Self> {
        token.trim().parse().ok()
    }
}
impl CellType for f64 {
    const COLUMN_TYPE: ColumnType = ColumnType::Double;
    fn parse_token(token: &str) -> Option<Self> {
        token.trim().parse().ok()
    }
}
impl CellType for bool {
    const COLUMN_TYPE: ColumnType = ColumnType::Bool;
    fn parse_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        }
    }
}
impl CellType for String {
    const COLUMN_TYPE: ColumnType = ColumnType::String;
    fn parse_token(token: &str) -> Option<Self> {
        Some(token.to_string())
    }
}

/// A typed cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i32),
    UInt(u32),
    Long(i64),
    ULong(u64),
    Double(f64),
    Bool(bool),
    String(String),
}
impl Value {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Int(_) => ColumnType::Int,
            Value::UInt(_) => ColumnType::UInt,
            Value::Long(_) => ColumnType::Long,
            Value::ULong(_) => ColumnType::ULong,
            Value::Double(_) => ColumnType::Double,
            Value::Bool(_) => ColumnType::Bool,
            Value::String(_) => ColumnType::String,
        }
    }
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            Value::Long(v) => Some(*v as f64),
            Value::ULong(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            Value::Bool(_) | Value::String(_) => None,
        }
    }
}
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::UInt(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::ULong(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
        }
    }
}
