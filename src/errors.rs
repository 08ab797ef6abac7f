//! Errors.
//!
//! One top-level `Error` that every call site propagates with `?`,
//! wrapping area-specific enums via `#[from]` so each area can grow its
//! own variants without polluting the others.

use std::fmt;

/// Top-level error type threaded through the wire codec, the pipeline
/// components, and the connection driver.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("socket error: {0}")]
    Socket(String),
    #[error("config error: {0}")]
    Config(String),
}

/// Framing and bounds violations in the wire codec.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("message body ended after {read} bytes, needed at least {needed}")]
    UnderRead { read: usize, needed: usize },
    #[error("message length {0} is smaller than the 4-byte length field itself")]
    LengthTooSmall(i32),
    #[error("message length {declared} would read past the {available}-byte buffer")]
    LengthOverflow { declared: usize, available: usize },
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
    #[error("string field is missing its NUL terminator")]
    UnterminatedCString,
    #[error("output buffer cannot fit a single atomic write of {0} bytes")]
    BufferOverflow(usize),
    #[error("column value of {actual} bytes exceeds the configured maximum of {max} bytes")]
    BlobTooLarge { actual: usize, max: usize },
}

/// Bind-time coercion failures.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("parameter {variable_index} needs {size_required} bytes but only {size_actual} were supplied")]
    LengthMismatch {
        variable_index: usize,
        size_required: usize,
        size_actual: usize,
    },
    #[error("parameter {variable_index} is not valid UTF-8")]
    InvalidUtf8 { variable_index: usize },
    #[error("parameter {variable_index} has no decoder for OID {oid}")]
    UnsupportedOid { variable_index: usize, oid: i32 },
    #[error("BIND payload for parameter {variable_index} is incomplete, need {needed} more bytes")]
    Incomplete { variable_index: usize, needed: usize },
}

/// Errors surfaced by the narrow engine interfaces — this crate only needs
/// to report, not implement, these.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{message}")]
    Sql {
        message: String,
        position: Option<i32>,
    },
    #[error("cached plan is stale: column set changed since compilation")]
    StalePlan,
    #[error("cursor data is not yet available (cold storage fetch in flight)")]
    DataUnavailable { wakeup_event: u64 },
    #[error("circuit breaker tripped: query exceeded its time budget")]
    Timeout,
}

/// Pipeline-level protocol sequencing errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown prepared statement {0:?}")]
    UnknownStatement(String),
    #[error("unknown portal {0:?}")]
    UnknownPortal(String),
    #[error("DEALLOCATE via EXECUTE is not supported; use the CLOSE message")]
    DeallocateViaExecuteUnsupported,
    #[error("DESCRIBE/CLOSE target byte {0:?} is neither 'S' nor 'P'")]
    BadTargetByte(u8),
    #[error("unrecognized frontend message tag {0:?}")]
    UnrecognizedMessageTag(u8),
}

/// A SQLSTATE + human message pair, the shape ERROR_RESPONSE actually puts
/// on the wire. Kept separate from `Error`'s `Display` because operator-facing
/// diagnostics and client-facing SQLSTATEs are not the same text.
#[derive(Debug, Clone)]
pub struct WireErrorResponse {
    pub sqlstate: &'static str,
    pub routine: Option<&'static str>,
    pub message: String,
    pub position: Option<i32>,
}

impl WireErrorResponse {
    pub fn stale_plan(message: impl Into<String>) -> Self {
        WireErrorResponse {
            sqlstate: "0A000",
            routine: Some("RevalidateCachedQuery"),
            message: message.into(),
            position: None,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        WireErrorResponse {
            sqlstate: "08P01",
            routine: None,
            message: message.into(),
            position: None,
        }
    }

    pub fn sql(message: impl Into<String>, position: Option<i32>) -> Self {
        WireErrorResponse {
            sqlstate: "58030",
            routine: None,
            message: message.into(),
            position,
        }
    }
}

impl fmt::Display for WireErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.sqlstate, self.message)
    }
}

/// Classify an [`Error`] into the wire-facing SQLSTATE shape.
pub fn classify(err: &Error) -> WireErrorResponse {
    match err {
        Error::Engine(EngineError::StalePlan) => {
            WireErrorResponse::stale_plan("cached plan is stale, please re-prepare")
        }
        Error::Engine(EngineError::Sql { message, position }) => {
            WireErrorResponse::sql(message.clone(), *position)
        }
        Error::Protocol(ProtocolError::DeallocateViaExecuteUnsupported) => {
            WireErrorResponse::protocol(err.to_string())
        }
        _ => WireErrorResponse::protocol(err.to_string()),
    }
}
