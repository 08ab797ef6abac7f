//! The wire protocol layer: framing primitives, message parsing/building,
//! and the OID/format type table.

pub mod codec;
pub mod messages;
pub mod types;

pub use codec::{try_read_frame, FrameWriter, MessageReader};
pub use messages::{
    parse_bind, parse_close, parse_describe, parse_execute, parse_parse, parse_query,
    write_bind_complete, write_close_complete, write_command_complete, write_data_row,
    write_empty_query, write_error_response, write_no_data, write_parameter_description,
    write_parse_complete, write_portal_suspended, write_ready_for_query, write_row_description,
    BindMessage, ColumnDescription, ExecuteMessage, NamedTarget, ParseMessage, Target,
    TransactionStatus,
};
pub use types::{BindValue, ColumnType, Format, Oid};
