//! Result serializer: row-description headers, per-value text/binary
//! encoding, and the fixed marker messages (NO_DATA/EMPTY_QUERY/etc).
//!
//! Same tag + length-prefix + body idiom as the rest of the wire codec,
//! extended to the full OID table plus per-column binary encoding.

use zerocopy::byteorder::big_endian::{F32, F64};
use zerocopy::IntoBytes;

use crate::engine::{ColumnMeta, ResultMetadata, RowValue};
use crate::errors::{Error, WireError};
use crate::wire::messages::ColumnDescription;
use crate::wire::types::JULIAN_EPOCH_OFFSET_USEC;
use crate::wire::{ColumnType, Format};

/// Resolve the per-column output format:
/// - `BINARY`-typed columns are always binary.
/// - a single client-declared format code broadcasts to every column.
/// - per-column codes are used positionally when the client sent one per
///   column.
/// - with none declared, default to text.
pub fn column_format(column_type: ColumnType, index: usize, result_formats: &[i16]) -> Format {
    if column_type == ColumnType::Binary {
        return Format::Binary;
    }
    match result_formats.len() {
        0 => Format::Text,
        1 => Format::from(result_formats[0]),
        _ => Format::from(*result_formats.get(index).unwrap_or(&0)),
    }
}

pub fn build_row_description<'a>(
    metadata: &'a ResultMetadata,
    result_formats: &[i16],
) -> Vec<ColumnDescription<'a>> {
    metadata
        .columns
        .iter()
        .enumerate()
        .map(|(i, col): (usize, &'a ColumnMeta)| ColumnDescription {
            name: &col.name,
            column_index: (i + 1) as i16,
            type_oid: col.column_type.oid(),
            type_size: col.column_type.wire_size(),
            format_code: column_format(col.column_type, i, result_formats).into(),
        })
        .collect()
}

/// Encode one column value, `None` for SQL NULL (wire length −1).
/// `max_blob_size` bounds binary blobs (BYTEA/BINARY); exceeding it aborts
/// the row.
pub fn encode_value(value: &RowValue, format: Format, max_blob_size: usize) -> Result<Option<Vec<u8>>, Error> {
    if let RowValue::Null = value {
        return Ok(None);
    }
    let bytes = match (value, format) {
        (RowValue::Bool(b), Format::Text) => (if *b { "t" } else { "f" }).as_bytes().to_vec(),
        (RowValue::Bool(b), Format::Binary) => vec![u8::from(*b)],
        (RowValue::Int2(v), Format::Text) => v.to_string().into_bytes(),
        (RowValue::Int2(v), Format::Binary) => v.to_be_bytes().to_vec(),
        (RowValue::Int4(v), Format::Text) => v.to_string().into_bytes(),
        (RowValue::Int4(v), Format::Binary) => v.to_be_bytes().to_vec(),
        (RowValue::Int8(v), Format::Text) => v.to_string().into_bytes(),
        (RowValue::Int8(v), Format::Binary) => v.to_be_bytes().to_vec(),
        (RowValue::Float4(v), Format::Text) => v.to_string().into_bytes(),
        (RowValue::Float4(v), Format::Binary) => F32::new(*v).as_bytes().to_vec(),
        (RowValue::Float8(v), Format::Text) => v.to_string().into_bytes(),
        (RowValue::Float8(v), Format::Binary) => F64::new(*v).as_bytes().to_vec(),
        (RowValue::Date(usec), Format::Text) => format_date_text(*usec).into_bytes(),
        (RowValue::Date(usec), Format::Binary) => {
            let days = (*usec - JULIAN_EPOCH_OFFSET_USEC) / 86_400_000_000;
            (days as i32).to_be_bytes().to_vec()
        }
        (RowValue::Timestamp(usec), Format::Text) | (RowValue::TimestampTz(usec), Format::Text) => {
            format_timestamp_text(*usec).into_bytes()
        }
        (RowValue::Timestamp(usec), Format::Binary) | (RowValue::TimestampTz(usec), Format::Binary) => {
            (*usec - JULIAN_EPOCH_OFFSET_USEC).to_be_bytes().to_vec()
        }
        (RowValue::Char(c), _) => c.to_string().into_bytes(),
        (RowValue::Uuid(hi, lo), Format::Binary) => {
            let mut v = Vec::with_capacity(16);
            v.extend_from_slice(&hi.to_be_bytes());
            v.extend_from_slice(&lo.to_be_bytes());
            v
        }
        (RowValue::Uuid(hi, lo), Format::Text) => format_uuid_text(*hi, *lo).into_bytes(),
        (RowValue::Bytes(b), _) => b.clone(),
        (RowValue::Text(s), _) => s.clone().into_bytes(),
        (RowValue::Null, _) => unreachable!("handled above"),
    };

    if bytes.len() > max_blob_size {
        return Err(WireError::BlobTooLarge {
            actual: bytes.len(),
            max: max_blob_size,
        }
        .into());
    }
    Ok(Some(bytes))
}

fn format_date_text(usec: i64) -> String {
    match chrono::DateTime::from_timestamp(usec.div_euclid(1_000_000), 0) {
        Some(dt) => dt.format("%Y-%m-%d").to_string(),
        None => usec.to_string(),
    }
}

fn format_timestamp_text(usec: i64) -> String {
    let secs = usec.div_euclid(1_000_000);
    let nanos = (usec.rem_euclid(1_000_000) * 1000) as u32;
    match chrono::DateTime::from_timestamp(secs, nanos) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        None => usec.to_string(),
    }
}

fn format_uuid_text(hi: u64, lo: u64) -> String {
    format!("{:016x}{:016x}", hi, lo)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_encodes_to_none() {
        assert_eq!(encode_value(&RowValue::Null, Format::Text, 1024).unwrap(), None);
    }

    #[test]
    fn int4_text_and_binary() {
        let text = encode_value(&RowValue::Int4(42), Format::Text, 1024).unwrap().unwrap();
        assert_eq!(text, b"42");
        let bin = encode_value(&RowValue::Int4(42), Format::Binary, 1024).unwrap().unwrap();
        assert_eq!(bin, 42i32.to_be_bytes().to_vec());
    }

    #[test]
    fn blob_over_limit_errors() {
        let err = encode_value(&RowValue::Bytes(vec![0u8; 10]), Format::Binary, 4).unwrap_err();
        assert!(matches!(err, Error::Wire(WireError::BlobTooLarge { actual: 10, max: 4 })));
    }

    #[test]
    fn binary_column_forces_binary_format() {
        assert_eq!(column_format(ColumnType::Binary, 0, &[]), Format::Binary);
    }

    #[test]
    fn single_format_code_broadcasts() {
        assert_eq!(column_format(ColumnType::Int4, 3, &[1]), Format::Binary);
    }
}
