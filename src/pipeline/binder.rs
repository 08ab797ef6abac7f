//! Bind-variable binder: decodes one raw BIND value into a typed
//! [`BindValue`], dispatching by resolved OID and format code.
//!
//! Binary float/double bit-casts and the UUID 16-byte split use
//! `zerocopy`; `chrono` supplies the PG-epoch/Unix-epoch conversion for
//! DATE/TIMESTAMP/TIMESTAMPTZ.

use zerocopy::byteorder::big_endian::{F32, F64};
use zerocopy::FromBytes;

use crate::errors::{BindError, Error};
use crate::pipeline::arena::{ArenaSlot, ParameterArena};
use crate::wire::types::{JULIAN_EPOCH_OFFSET_USEC, OID_UNSPECIFIED};
use crate::wire::{BindValue, ColumnType, Format, Oid};

/// Decode every bind slot for one EXECUTE, resolving each value's format
/// code (single code broadcasts; per-index code used positionally; none
/// defaults to text — same positional rule as `serializer::column_format`)
/// and its engine column type from the reconciled OID list.
pub fn decode_params<'a>(
    slots: &[Option<ArenaSlot>],
    arena: &'a ParameterArena,
    format_codes: &[i16],
    oids: &[Oid],
) -> Result<Vec<BindValue<'a>>, Error> {
    let mut out = Vec::with_capacity(slots.len());
    for (i, slot) in slots.iter().enumerate() {
        let format = resolve_format(format_codes, i);
        let oid = oids.get(i).copied().unwrap_or(OID_UNSPECIFIED);
        let column_type = ColumnType::from_oid(oid).unwrap_or(ColumnType::Text);
        let raw = (*slot).map(|s| arena.get(s));
        out.push(decode(i, raw, format, column_type, oid)?);
    }
    Ok(out)
}

fn resolve_format(format_codes: &[i16], index: usize) -> Format {
    match format_codes.len() {
        0 => Format::Text,
        1 => Format::from(format_codes[0]),
        _ => Format::from(*format_codes.get(index).unwrap_or(&0)),
    }
}

/// Decode one bind value. `raw` is `None` for a SQL NULL (wire length −1).
pub fn decode<'a>(
    variable_index: usize,
    raw: Option<&'a [u8]>,
    format: Format,
    column_type: ColumnType,
    oid: Oid,
) -> Result<BindValue<'a>, Error> {
    let Some(bytes) = raw else {
        return Ok(BindValue::Null);
    };
    match format {
        Format::Binary => decode_binary(variable_index, bytes, column_type),
        Format::Text => decode_text(variable_index, bytes, column_type, oid),
    }
}

fn need(variable_index: usize, bytes: &[u8], required: usize) -> Result<(), Error> {
    if bytes.len() != required {
        return Err(BindError::LengthMismatch {
            variable_index,
            size_required: required,
            size_actual: bytes.len(),
        }
        .into());
    }
    Ok(())
}

fn decode_binary<'a>(
    variable_index: usize,
    bytes: &'a [u8],
    column_type: ColumnType,
) -> Result<BindValue<'a>, Error> {
    match column_type {
        ColumnType::Int4 | ColumnType::Date => {
            need(variable_index, bytes, 4)?;
            let v = i32::from_be_bytes(bytes.try_into().unwrap());
            if column_type == ColumnType::Date {
                Ok(BindValue::Date(v as i64 * 86_400_000_000 + JULIAN_EPOCH_OFFSET_USEC))
            } else {
                Ok(BindValue::Int4(v))
            }
        }
        ColumnType::Int8 => {
            need(variable_index, bytes, 8)?;
            Ok(BindValue::Int8(i64::from_be_bytes(bytes.try_into().unwrap())))
        }
        ColumnType::Int2 => {
            need(variable_index, bytes, 2)?;
            Ok(BindValue::Int2(i16::from_be_bytes(bytes.try_into().unwrap())))
        }
        ColumnType::Float4 => {
            need(variable_index, bytes, 4)?;
            let v = F32::read_from_bytes(bytes).map_err(|_| BindError::LengthMismatch {
                variable_index,
                size_required: 4,
                size_actual: bytes.len(),
            })?;
            Ok(BindValue::Float4(v.get()))
        }
        ColumnType::Float8 => {
            need(variable_index, bytes, 8)?;
            let v = F64::read_from_bytes(bytes).map_err(|_| BindError::LengthMismatch {
                variable_index,
                size_required: 8,
                size_actual: bytes.len(),
            })?;
            Ok(BindValue::Float8(v.get()))
        }
        ColumnType::Bool => match bytes.len() {
            4 => Ok(BindValue::Bool(true)),
            5 => Ok(BindValue::Bool(false)),
            n => Err(BindError::LengthMismatch {
                variable_index,
                size_required: 4,
                size_actual: n,
            }
            .into()),
        },
        ColumnType::Timestamp | ColumnType::TimestampTz => {
            need(variable_index, bytes, 8)?;
            let v = i64::from_be_bytes(bytes.try_into().unwrap());
            let unix_usec = v + JULIAN_EPOCH_OFFSET_USEC;
            if column_type == ColumnType::Timestamp {
                Ok(BindValue::Timestamp(unix_usec))
            } else {
                Ok(BindValue::TimestampTz(unix_usec))
            }
        }
        ColumnType::Char => {
            let s = std::str::from_utf8(bytes).map_err(|_| BindError::InvalidUtf8 { variable_index })?;
            let c = s.chars().next().ok_or(BindError::LengthMismatch {
                variable_index,
                size_required: 1,
                size_actual: 0,
            })?;
            Ok(BindValue::Char(c))
        }
        ColumnType::Uuid => {
            need(variable_index, bytes, 16)?;
            let hi = u64::from_be_bytes(bytes[0..8].try_into().unwrap());
            let lo = u64::from_be_bytes(bytes[8..16].try_into().unwrap());
            Ok(BindValue::Uuid(hi, lo))
        }
        ColumnType::Bytea | ColumnType::Binary => Ok(BindValue::Bytes(bytes)),
        ColumnType::Text => Ok(BindValue::Text(
            std::str::from_utf8(bytes).map_err(|_| BindError::InvalidUtf8 { variable_index })?,
        )),
    }
}

fn decode_text<'a>(
    variable_index: usize,
    bytes: &'a [u8],
    column_type: ColumnType,
    oid: Oid,
) -> Result<BindValue<'a>, Error> {
    let text = std::str::from_utf8(bytes).map_err(|_| BindError::InvalidUtf8 { variable_index })?;

    let parse_err = || BindError::UnsupportedOid { variable_index, oid };

    match column_type {
        ColumnType::Int2 => Ok(BindValue::Int2(text.parse().map_err(|_| parse_err())?)),
        ColumnType::Int4 => Ok(BindValue::Int4(text.parse().map_err(|_| parse_err())?)),
        ColumnType::Int8 => Ok(BindValue::Int8(text.parse().map_err(|_| parse_err())?)),
        ColumnType::Float4 => Ok(BindValue::Float4(text.parse().map_err(|_| parse_err())?)),
        ColumnType::Float8 => Ok(BindValue::Float8(text.parse().map_err(|_| parse_err())?)),
        ColumnType::Bool => match text {
            "t" | "true" | "TRUE" | "1" => Ok(BindValue::Bool(true)),
            "f" | "false" | "FALSE" | "0" => Ok(BindValue::Bool(false)),
            _ => Err(parse_err().into()),
        },
        ColumnType::Date => {
            let naive = chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| parse_err())?;
            let midnight = naive.and_hms_opt(0, 0, 0).ok_or_else(parse_err)?;
            Ok(BindValue::Date(midnight.and_utc().timestamp_micros()))
        }
        ColumnType::Timestamp | ColumnType::TimestampTz => {
            let dt = chrono::DateTime::parse_from_rfc3339(text)
                .map(|dt| dt.timestamp_micros())
                .or_else(|_| {
                    chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                        .map(|dt| dt.and_utc().timestamp_micros())
                })
                .map_err(|_| parse_err())?;
            if column_type == ColumnType::Timestamp {
                Ok(BindValue::Timestamp(dt))
            } else {
                Ok(BindValue::TimestampTz(dt))
            }
        }
        ColumnType::Char => text.chars().next().map(BindValue::Char).ok_or_else(parse_err),
        ColumnType::Uuid => decode_uuid_text(variable_index, text, oid),
        ColumnType::Bytea | ColumnType::Binary => Ok(BindValue::Bytes(bytes)),
        ColumnType::Text => Ok(BindValue::Text(text)),
    }
}

#[cfg(feature = "uuid")]
fn decode_uuid_text(variable_index: usize, text: &str, oid: Oid) -> Result<BindValue<'static>, Error> {
    let u = uuid::Uuid::parse_str(text).map_err(|_| BindError::UnsupportedOid { variable_index, oid })?;
    let bytes = u.as_bytes();
    let hi = u64::from_be_bytes(bytes[0..8].try_into().unwrap());
    let lo = u64::from_be_bytes(bytes[8..16].try_into().unwrap());
    Ok(BindValue::Uuid(hi, lo))
}

#[cfg(not(feature = "uuid"))]
fn decode_uuid_text<'a>(variable_index: usize, _text: &str, oid: Oid) -> Result<BindValue<'a>, Error> {
    Err(BindError::UnsupportedOid { variable_index, oid }.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_int4_roundtrip() {
        let v = decode(0, Some(&42i32.to_be_bytes()), Format::Binary, ColumnType::Int4, 23).unwrap();
        assert_eq!(v, BindValue::Int4(42));
    }

    #[test]
    fn text_int4_roundtrip() {
        let v = decode(0, Some(b"42"), Format::Text, ColumnType::Int4, 23).unwrap();
        assert_eq!(v, BindValue::Int4(42));
    }

    #[test]
    fn null_value_short_circuits() {
        let v = decode(0, None, Format::Binary, ColumnType::Int4, 23).unwrap();
        assert_eq!(v, BindValue::Null);
    }

    #[test]
    fn binary_bool_uses_length_convention() {
        assert_eq!(
            decode(0, Some(&[1, 2, 3, 4]), Format::Binary, ColumnType::Bool, 16).unwrap(),
            BindValue::Bool(true)
        );
        assert_eq!(
            decode(0, Some(&[1, 2, 3, 4, 5]), Format::Binary, ColumnType::Bool, 16).unwrap(),
            BindValue::Bool(false)
        );
    }

    #[test]
    fn length_mismatch_is_bind_error() {
        let err = decode(3, Some(&[1, 2]), Format::Binary, ColumnType::Int4, 23).unwrap_err();
        assert!(matches!(
            err,
            Error::Bind(BindError::LengthMismatch { variable_index: 3, .. })
        ));
    }

    #[test]
    fn text_bytea_is_zero_copy() {
        let input = b"raw-bytes";
        let v = decode(0, Some(input), Format::Text, ColumnType::Bytea, 17).unwrap();
        assert_eq!(v, BindValue::Bytes(input));
    }
}
