//! Wire type table: OIDs, per-column format codes, and the decoded bind
//! value shape.
//!
//! Covers the full set of OIDs the binder and serializer need, rather
//! than a small fixed enum.

use std::fmt;

/// A PostgreSQL type OID. `0` is `UNSPECIFIED` (client declared no type).
pub type Oid = i32;

pub const OID_UNSPECIFIED: Oid = 0;
pub const OID_BOOL: Oid = 16;
pub const OID_BYTEA: Oid = 17;
pub const OID_CHAR: Oid = 18;
pub const OID_INT8: Oid = 20;
pub const OID_INT2: Oid = 21;
pub const OID_INT4: Oid = 23;
pub const OID_TEXT: Oid = 25;
pub const OID_FLOAT4: Oid = 700;
pub const OID_FLOAT8: Oid = 701;
pub const OID_UNKNOWN: Oid = 705;
pub const OID_DATE: Oid = 1082;
pub const OID_TIMESTAMP: Oid = 1114;
pub const OID_TIMESTAMPTZ: Oid = 1184;
pub const OID_UUID: Oid = 2950;
pub const OID_VOID: Oid = 2278;
pub const OID_VARCHAR: Oid = 1043;

/// Microseconds between the Unix epoch (1970-01-01) and the PostgreSQL
/// binary epoch (2000-01-01). Binary DATE/TIMESTAMP/TIMESTAMPTZ values on
/// the wire are relative to the PG epoch; this engine's native clock is
/// 1970-based, so every binary decode/encode adds/subtracts this constant.
pub const JULIAN_EPOCH_OFFSET_USEC: i64 = 946_684_800_000_000;

/// The engine-native column type, independent of wire representation.
/// `Binary` is the engine's own opaque-blob column type (always forced to
/// wire format code 1) and is distinct from `Bytea`'s OID mapping only in
/// that columns declared `Binary` never have a text encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Bool,
    Date,
    Timestamp,
    TimestampTz,
    Char,
    Uuid,
    Bytea,
    Text,
    Binary,
}

impl ColumnType {
    /// The OID this engine type is reported as in ROW_DESCRIPTION /
    /// PARAMETER_DESCRIPTION.
    pub fn oid(self) -> Oid {
        match self {
            ColumnType::Int2 => OID_INT2,
            ColumnType::Int4 => OID_INT4,
            ColumnType::Int8 => OID_INT8,
            ColumnType::Float4 => OID_FLOAT4,
            ColumnType::Float8 => OID_FLOAT8,
            ColumnType::Bool => OID_BOOL,
            ColumnType::Date => OID_DATE,
            ColumnType::Timestamp => OID_TIMESTAMP,
            ColumnType::TimestampTz => OID_TIMESTAMPTZ,
            ColumnType::Char => OID_CHAR,
            ColumnType::Uuid => OID_UUID,
            ColumnType::Bytea => OID_BYTEA,
            ColumnType::Text => OID_TEXT,
            ColumnType::Binary => OID_BYTEA,
        }
    }

    /// The fixed wire size for ROW_DESCRIPTION's `type size` field, negative
    /// for variable-length types.
    pub fn wire_size(self) -> i16 {
        match self {
            ColumnType::Int2 => 2,
            ColumnType::Int4 => 4,
            ColumnType::Int8 => 8,
            ColumnType::Float4 => 4,
            ColumnType::Float8 => 8,
            ColumnType::Bool => 1,
            ColumnType::Date => 4,
            ColumnType::Timestamp => 8,
            ColumnType::TimestampTz => 8,
            ColumnType::Char => 1,
            ColumnType::Uuid => 16,
            ColumnType::Bytea | ColumnType::Binary | ColumnType::Text => -1,
        }
    }

    /// Resolve a compiler-inferred OID back to the engine's own type table,
    /// falling back to `None` for OIDs this engine doesn't recognize.
    pub fn from_oid(oid: Oid) -> Option<ColumnType> {
        Some(match oid {
            OID_INT2 => ColumnType::Int2,
            OID_INT4 => ColumnType::Int4,
            OID_INT8 => ColumnType::Int8,
            OID_FLOAT4 => ColumnType::Float4,
            OID_FLOAT8 => ColumnType::Float8,
            OID_BOOL => ColumnType::Bool,
            OID_DATE => ColumnType::Date,
            OID_TIMESTAMP => ColumnType::Timestamp,
            OID_TIMESTAMPTZ => ColumnType::TimestampTz,
            OID_CHAR => ColumnType::Char,
            OID_UUID => ColumnType::Uuid,
            OID_BYTEA => ColumnType::Bytea,
            OID_TEXT | OID_VARCHAR | OID_UNKNOWN => ColumnType::Text,
            _ => return None,
        })
    }
}

/// Per-parameter or per-column wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Binary,
}

impl From<i16> for Format {
    fn from(code: i16) -> Self {
        if code == 0 {
            Format::Text
        } else {
            Format::Binary
        }
    }
}

impl From<Format> for i16 {
    fn from(f: Format) -> i16 {
        match f {
            Format::Text => 0,
            Format::Binary => 1,
        }
    }
}

/// A decoded bind-variable value. Text-typed string values borrow directly
/// from the network receive buffer when the target column is itself
/// variable-length UTF-8 text; every other variant is a small owned
/// scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue<'a> {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    /// Microseconds since the Unix epoch.
    Date(i64),
    Timestamp(i64),
    TimestampTz(i64),
    Char(char),
    Uuid(u64, u64),
    Bytes(&'a [u8]),
    Text(&'a str),
    OwnedText(String),
}

impl<'a> BindValue<'a> {
    pub fn is_null(&self) -> bool {
        matches!(self, BindValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            BindValue::Text(s) => Some(s),
            BindValue::OwnedText(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for BindValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindValue::Null => write!(f, "NULL"),
            BindValue::Bool(b) => write!(f, "{b}"),
            BindValue::Int2(v) => write!(f, "{v}"),
            BindValue::Int4(v) => write!(f, "{v}"),
            BindValue::Int8(v) => write!(f, "{v}"),
            BindValue::Float4(v) => write!(f, "{v}"),
            BindValue::Float8(v) => write!(f, "{v}"),
            BindValue::Date(v) | BindValue::Timestamp(v) | BindValue::TimestampTz(v) => {
                write!(f, "{v}")
            }
            BindValue::Char(c) => write!(f, "{c}"),
            BindValue::Uuid(hi, lo) => write!(f, "{hi:016x}{lo:016x}"),
            BindValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            BindValue::Text(s) => write!(f, "{s}"),
            BindValue::OwnedText(s) => write!(f, "{s}"),
        }
    }
}
