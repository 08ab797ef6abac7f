//! Narrow interfaces this crate consumes from the SQL compiler, cursor
//! factory, storage engine, and writer source — only what the pipeline
//! entry calls, not how those systems work.
//!
//! [`memory`] provides a minimal in-memory implementation sufficient to
//! drive the scenario tests without a real columnar backend.

pub mod memory;

use crate::errors::EngineError;
use crate::wire::{BindValue, ColumnType};

/// One column of a SELECT's result set. `geo_hash_bit_flag` pairs a column
/// type with a geo-hash flag; this engine has no geo-hash columns, so it
/// is always `false`, but the field is kept so the reconciler's length
/// invariant (`2 × column_count`) has something to pair.
#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub name: String,
    pub column_type: ColumnType,
    pub geo_hash_bit_flag: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ResultMetadata {
    pub columns: Vec<ColumnMeta>,
}

/// A fully decoded output row, owned (not borrowed from the network
/// buffer) since it originates from the engine, not the client.
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Date(i64),
    Timestamp(i64),
    TimestampTz(i64),
    Char(char),
    Uuid(u64, u64),
    Bytes(Vec<u8>),
    Text(String),
}

/// What happened on one `Cursor::advance` call.
pub enum CursorStep {
    Row,
    Exhausted,
    /// Cold-storage fetch in flight; carries the id the scheduler waits on.
    Paused { wakeup_event: u64 },
}

/// An open, resumable result-set iterator. One `Cursor` belongs to exactly
/// one `PipelineEntry`; it is never shared across connections.
pub trait Cursor {
    /// Advance to the next row, or report exhaustion/pause. On `Row`,
    /// `current_row()` returns the freshly advanced-to row.
    fn advance(&mut self) -> Result<CursorStep, EngineError>;

    fn current_row(&self) -> &[RowValue];
}

/// Compiled SELECT/EXPLAIN/PSEUDO-SELECT artifact. `open` binds parameters
/// and produces a fresh cursor; `recompile` re-resolves metadata against
/// current schema for stale-plan detection.
pub trait CursorFactory {
    fn metadata(&self) -> &ResultMetadata;

    fn open(&self, params: &[BindValue<'_>]) -> Result<Box<dyn Cursor>, EngineError>;

    /// Recompile against current schema, returning a factory whose metadata
    /// may have drifted from `self`'s.
    fn recompile(&self) -> Result<Box<dyn CursorFactory>, EngineError>;
}

/// A table's write handle, held in the connection's `pending_writers` map
/// between an in-transaction INSERT and the eventual COMMIT/ROLLBACK.
pub trait Writer {
    fn commit(&mut self) -> Result<(), EngineError>;
    fn rollback(&mut self) -> Result<(), EngineError>;
}

/// Produces a `Writer` for a target table, keyed the way `pending_writers`
/// is keyed (by table token).
pub trait WriterSource {
    fn writer_for(&self, table_token: &str) -> Result<Box<dyn Writer>, EngineError>;
}

/// A compiled INSERT artifact. `execute` appends one row to the writer's
/// in-flight batch and reports affected rows (always 1 per call; the
/// `INSERT 0 <n>` tag accumulates `n` in the dispatcher).
pub trait InsertOp {
    fn execute(&self, writer: &mut dyn Writer, params: &[BindValue<'_>]) -> Result<u64, EngineError>;
}

/// A compiled UPDATE/DDL/ALTER artifact, executed synchronously.
pub trait DdlOrUpdate {
    fn execute(&self, params: &[BindValue<'_>]) -> Result<u64, EngineError>;
}

/// What the (out-of-scope) SQL compiler classifies a statement as. The
/// dispatcher switches on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlClass {
    Select,
    Insert,
    Update,
    Ddl,
    Ctas,
    Begin,
    Commit,
    Rollback,
    Deallocate,
    EmptyQuery,
}

/// One compiled statement, as produced by the (out-of-scope) SQL compiler
/// at PARSE time. Exactly one of `factory`/`insert_op`/`ddl_or_update` is
/// set, matching the `PipelineEntry` invariant.
pub struct CompiledStatement {
    pub class: SqlClass,
    pub tag: &'static str,
    pub param_oids: Vec<crate::wire::Oid>,
    pub factory: Option<Box<dyn CursorFactory>>,
    pub insert_op: Option<Box<dyn InsertOp>>,
    pub ddl_or_update: Option<Box<dyn DdlOrUpdate>>,
    /// Table token the INSERT/UPDATE targets, for `pending_writers` keying.
    pub table_token: Option<String>,
    /// True for DDL auto-executed at PARSE time.
    pub parse_executed: bool,
}

/// The (out-of-scope) SQL compiler entry point: turn SQL text plus
/// client-declared parameter OIDs into a `CompiledStatement`.
pub trait Compiler {
    fn compile(&self, sql_text: &str, declared_oids: &[crate::wire::Oid]) -> Result<CompiledStatement, EngineError>;
}
