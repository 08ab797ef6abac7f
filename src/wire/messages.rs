//! Frontend message parsing and backend message construction.
//!
//! Parsers consume a [`MessageReader`] over one message's body and borrow
//! from it where possible. Builders append directly to a [`FrameWriter`]
//! via `write_message`, one per-message builder function per backend
//! message type.

use crate::errors::{Error, ProtocolError};
use crate::wire::codec::{FrameWriter, MessageReader};

pub const TAG_PARSE: u8 = b'P';
pub const TAG_BIND: u8 = b'B';
pub const TAG_DESCRIBE: u8 = b'D';
pub const TAG_EXECUTE: u8 = b'E';
pub const TAG_SYNC: u8 = b'S';
pub const TAG_CLOSE: u8 = b'C';
pub const TAG_QUERY: u8 = b'Q';

pub const TAG_PARSE_COMPLETE: u8 = b'1';
pub const TAG_BIND_COMPLETE: u8 = b'2';
pub const TAG_CLOSE_COMPLETE: u8 = b'3';
pub const TAG_PARAMETER_DESCRIPTION: u8 = b't';
pub const TAG_ROW_DESCRIPTION: u8 = b'T';
pub const TAG_NO_DATA: u8 = b'n';
pub const TAG_DATA_ROW: u8 = b'D';
pub const TAG_COMMAND_COMPLETE: u8 = b'C';
pub const TAG_PORTAL_SUSPENDED: u8 = b's';
pub const TAG_EMPTY_QUERY: u8 = b'I';
pub const TAG_ERROR_RESPONSE: u8 = b'E';
pub const TAG_READY_FOR_QUERY: u8 = b'Z';

/// `describe`/`close` target a prepared statement or a portal; the wire tag
/// byte (`S`/`P`) that precedes the name distinguishes which.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Statement,
    Portal,
}

impl Target {
    fn from_byte(b: u8) -> Result<Self, Error> {
        match b {
            b'S' => Ok(Target::Statement),
            b'P' => Ok(Target::Portal),
            other => Err(ProtocolError::BadTargetByte(other).into()),
        }
    }
}

/// Decoded PARSE input: `name | sql_text | n_param_types | {oid}×n`.
#[derive(Debug)]
pub struct ParseMessage<'a> {
    pub statement_name: &'a str,
    pub sql_text: &'a str,
    pub param_type_oids: Vec<i32>,
}

pub fn parse_parse(body: &[u8]) -> Result<ParseMessage<'_>, Error> {
    let mut r = MessageReader::new(body);
    let statement_name = r.get_cstr()?;
    let sql_text = r.get_cstr()?;
    let n = r.get_i16()? as usize;
    let mut param_type_oids = Vec::with_capacity(n);
    for _ in 0..n {
        param_type_oids.push(r.get_i32()?);
    }
    Ok(ParseMessage {
        statement_name,
        sql_text,
        param_type_oids,
    })
}

/// One raw bind parameter value: `None` for SQL NULL (wire length −1).
pub type RawValue<'a> = Option<&'a [u8]>;

/// Decoded BIND input: `portal | statement | n_fmt {fmt} | n_values {len
/// value} | n_result_fmt {fmt}`. Format and value lists may legitimately
/// have different lengths than the parameter count (reconciled by a
/// three-way merge downstream).
#[derive(Debug)]
pub struct BindMessage<'a> {
    pub portal_name: &'a str,
    pub statement_name: &'a str,
    pub param_formats: Vec<i16>,
    pub values: Vec<RawValue<'a>>,
    pub result_formats: Vec<i16>,
}

pub fn parse_bind(body: &[u8]) -> Result<BindMessage<'_>, Error> {
    let mut r = MessageReader::new(body);
    let portal_name = r.get_cstr()?;
    let statement_name = r.get_cstr()?;

    let n_fmt = r.get_i16()? as usize;
    let mut param_formats = Vec::with_capacity(n_fmt);
    for _ in 0..n_fmt {
        param_formats.push(r.get_i16()?);
    }

    let n_values = r.get_i16()? as usize;
    let mut values = Vec::with_capacity(n_values);
    for _ in 0..n_values {
        let len = r.get_i32()?;
        if len < 0 {
            values.push(None);
        } else {
            values.push(Some(r.get_bytes(len as usize)?));
        }
    }

    let n_result_fmt = r.get_i16()? as usize;
    let mut result_formats = Vec::with_capacity(n_result_fmt);
    for _ in 0..n_result_fmt {
        result_formats.push(r.get_i16()?);
    }

    Ok(BindMessage {
        portal_name,
        statement_name,
        param_formats,
        values,
        result_formats,
    })
}

/// Decoded DESCRIBE/CLOSE input: target kind plus name.
#[derive(Debug)]
pub struct NamedTarget<'a> {
    pub target: Target,
    pub name: &'a str,
}

pub fn parse_describe(body: &[u8]) -> Result<NamedTarget<'_>, Error> {
    parse_named_target(body)
}

pub fn parse_close(body: &[u8]) -> Result<NamedTarget<'_>, Error> {
    parse_named_target(body)
}

fn parse_named_target(body: &[u8]) -> Result<NamedTarget<'_>, Error> {
    let mut r = MessageReader::new(body);
    let kind = r.get_u8()?;
    let target = Target::from_byte(kind)?;
    let name = r.get_cstr()?;
    Ok(NamedTarget { target, name })
}

/// Decoded EXECUTE input: `portal (C-string) | max_rows (int32)`. A
/// `max_rows` of 0 means "no limit" per the wire protocol.
#[derive(Debug)]
pub struct ExecuteMessage<'a> {
    pub portal_name: &'a str,
    pub max_rows: i32,
}

pub fn parse_execute(body: &[u8]) -> Result<ExecuteMessage<'_>, Error> {
    let mut r = MessageReader::new(body);
    let portal_name = r.get_cstr()?;
    let max_rows = r.get_i32()?;
    Ok(ExecuteMessage {
        portal_name,
        max_rows,
    })
}

/// Decoded simple QUERY input: one C-string holding the whole command.
pub fn parse_query(body: &[u8]) -> Result<&str, Error> {
    let mut r = MessageReader::new(body);
    r.get_cstr()
}

// --- Backend message builders -------------------------------------------

pub fn write_parse_complete(w: &mut FrameWriter) {
    w.write_message(TAG_PARSE_COMPLETE, |_| {});
}

pub fn write_bind_complete(w: &mut FrameWriter) {
    w.write_message(TAG_BIND_COMPLETE, |_| {});
}

pub fn write_close_complete(w: &mut FrameWriter) {
    w.write_message(TAG_CLOSE_COMPLETE, |_| {});
}

pub fn write_no_data(w: &mut FrameWriter) {
    w.write_message(TAG_NO_DATA, |_| {});
}

pub fn write_empty_query(w: &mut FrameWriter) {
    w.write_message(TAG_EMPTY_QUERY, |_| {});
}

pub fn write_portal_suspended(w: &mut FrameWriter) {
    w.write_message(TAG_PORTAL_SUSPENDED, |_| {});
}

/// One parameter's resolved OID for PARAMETER_DESCRIPTION.
pub fn write_parameter_description(w: &mut FrameWriter, oids: &[i32]) {
    w.write_message(TAG_PARAMETER_DESCRIPTION, |buf| {
        use bytes::BufMut;
        buf.put_i16(oids.len() as i16);
        for oid in oids {
            buf.put_i32(*oid);
        }
    });
}

/// One column's description for ROW_DESCRIPTION: name, table OID
/// (always 0, we don't emulate catalog tables), column index (1-based),
/// type OID, type size, atttypmod (always −1), format code.
pub struct ColumnDescription<'a> {
    pub name: &'a str,
    pub column_index: i16,
    pub type_oid: i32,
    pub type_size: i16,
    pub format_code: i16,
}

pub fn write_row_description(w: &mut FrameWriter, columns: &[ColumnDescription<'_>]) {
    w.write_message(TAG_ROW_DESCRIPTION, |buf| {
        use bytes::BufMut;
        buf.put_i16(columns.len() as i16);
        for col in columns {
            buf.put_slice(col.name.as_bytes());
            buf.put_u8(0);
            buf.put_i32(0); // table OID
            buf.put_i16(col.column_index);
            buf.put_i32(col.type_oid);
            buf.put_i16(col.type_size);
            buf.put_i32(-1); // atttypmod
            buf.put_i16(col.format_code);
        }
    });
}

/// DATA_ROW: one column per `(len, bytes)`, `None` for a SQL NULL (wire
/// length −1). Written via `write_message` directly rather than
/// `FrameWriter::bookmark`/`reset_to_bookmark` so the bookmark discipline
/// stays the cursor streamer's responsibility, not the encoder's.
pub fn write_data_row(w: &mut FrameWriter, values: &[Option<&[u8]>]) {
    w.write_message(TAG_DATA_ROW, |buf| {
        use bytes::BufMut;
        buf.put_i16(values.len() as i16);
        for v in values {
            match v {
                None => buf.put_i32(-1),
                Some(bytes) => {
                    buf.put_i32(bytes.len() as i32);
                    buf.put_slice(bytes);
                }
            }
        }
    });
}

pub fn write_command_complete(w: &mut FrameWriter, tag: &str) {
    w.write_message(TAG_COMMAND_COMPLETE, |buf| {
        buf.put_slice(tag.as_bytes());
        buf.put_u8(0);
    });
}

/// Connection transaction status reported in READY_FOR_QUERY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Idle,
    InTransaction,
    Error,
}

impl TransactionStatus {
    fn byte(self) -> u8 {
        match self {
            TransactionStatus::Idle => b'I',
            TransactionStatus::InTransaction => b'T',
            TransactionStatus::Error => b'E',
        }
    }
}

pub fn write_ready_for_query(w: &mut FrameWriter, status: TransactionStatus) {
    w.write_message(TAG_READY_FOR_QUERY, |buf| {
        buf.put_u8(status.byte());
    });
}

/// ERROR_RESPONSE: a series of `(field_code, value)` C-strings terminated
/// by a NUL byte. Field codes follow the protocol's fixed letters: `S`
/// severity, `C` SQLSTATE code, `M` message, `P` position.
pub fn write_error_response(w: &mut FrameWriter, resp: &crate::errors::WireErrorResponse) {
    w.write_message(TAG_ERROR_RESPONSE, |buf| {
        use bytes::BufMut;
        buf.put_u8(b'S');
        buf.put_slice(b"ERROR");
        buf.put_u8(0);
        buf.put_u8(b'C');
        buf.put_slice(resp.sqlstate.as_bytes());
        buf.put_u8(0);
        buf.put_u8(b'M');
        buf.put_slice(resp.message.as_bytes());
        buf.put_u8(0);
        if let Some(pos) = resp.position {
            buf.put_u8(b'P');
            buf.put_slice(pos.to_string().as_bytes());
            buf.put_u8(0);
        }
        if let Some(routine) = resp.routine {
            buf.put_u8(b'R');
            buf.put_slice(routine.as_bytes());
            buf.put_u8(0);
        }
        buf.put_u8(0); // terminator
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrip() {
        let mut body = Vec::new();
        body.extend_from_slice(b"stmt1\0");
        body.extend_from_slice(b"select 1\0");
        body.extend_from_slice(&1i16.to_be_bytes());
        body.extend_from_slice(&23i32.to_be_bytes());
        let msg = parse_parse(&body).unwrap();
        assert_eq!(msg.statement_name, "stmt1");
        assert_eq!(msg.sql_text, "select 1");
        assert_eq!(msg.param_type_oids, vec![23]);
    }

    #[test]
    fn bind_with_null_value() {
        let mut body = Vec::new();
        body.extend_from_slice(b"\0"); // portal
        body.extend_from_slice(b"stmt1\0"); // statement
        body.extend_from_slice(&0i16.to_be_bytes()); // n_fmt
        body.extend_from_slice(&1i16.to_be_bytes()); // n_values
        body.extend_from_slice(&(-1i32).to_be_bytes()); // NULL
        body.extend_from_slice(&0i16.to_be_bytes()); // n_result_fmt
        let msg = parse_bind(&body).unwrap();
        assert_eq!(msg.portal_name, "");
        assert_eq!(msg.values, vec![None]);
    }

    #[test]
    fn execute_and_row_description_roundtrip() {
        let mut body = Vec::new();
        body.extend_from_slice(b"\0");
        body.extend_from_slice(&100i32.to_be_bytes());
        let msg = parse_execute(&body).unwrap();
        assert_eq!(msg.max_rows, 100);

        let mut w = FrameWriter::new(1 << 20);
        write_row_description(
            &mut w,
            &[ColumnDescription {
                name: "n",
                column_index: 1,
                type_oid: 23,
                type_size: 4,
                format_code: 0,
            }],
        );
        assert_eq!(w.bytes()[0], TAG_ROW_DESCRIPTION);
    }

    #[test]
    fn truncated_parse_is_under_read() {
        let body = b"stmt1\0select 1\0";
        let err = parse_parse(body).unwrap_err();
        assert!(matches!(err, Error::Wire(crate::errors::WireError::UnderRead { .. })));
    }
}
