//! The pipeline entry data model: one compiled SQL's lifecycle across
//! PARSE/BIND/DESCRIBE/EXECUTE/SYNC/CLOSE, reusable as a named prepared
//! statement or portal.

use std::rc::{Rc, Weak};

use crate::engine::{CursorFactory, DdlOrUpdate, InsertOp, ResultMetadata, SqlClass};
use crate::pipeline::arena::{ArenaSlot, ParameterArena};
use crate::wire::Oid;

/// `state_desc` distinguishes whether PARAMETER_DESCRIPTION precedes
/// ROW_DESCRIPTION (named statement) or is skipped (portal). `Portal` and
/// `PortalAlt` are kept as distinct variants only because the upstream
/// protocol table enumerates them as 1 and 2 without further meaning here;
/// both describe a portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescribeState {
    None,
    Portal,
    PortalAlt,
    NamedStatement,
}

/// The `sync` controller's progress marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateSync {
    Start,
    ParseDone,
    BindDone,
    Described,
    Streaming,
    Complete,
    CursorExhausted,
    PortalSuspended,
}

/// Exactly one of `factory` / `insert_op` / `ddl_or_update` is set,
/// enforced by construction rather than at every call site. All three are
/// `Rc`-shared so a portal bound from a prepared statement can hold its
/// own handle to the same compiled artifact.
pub enum SqlPayload {
    Select(Rc<dyn CursorFactory>),
    Insert(Rc<dyn InsertOp>),
    DdlOrUpdate(Rc<dyn DdlOrUpdate>),
    /// BEGIN/COMMIT/ROLLBACK/DEALLOCATE/empty query carry no engine artifact.
    None,
}

impl Clone for SqlPayload {
    fn clone(&self) -> Self {
        match self {
            SqlPayload::Select(f) => SqlPayload::Select(f.clone()),
            SqlPayload::Insert(i) => SqlPayload::Insert(i.clone()),
            SqlPayload::DdlOrUpdate(d) => SqlPayload::DdlOrUpdate(d.clone()),
            SqlPayload::None => SqlPayload::None,
        }
    }
}

pub struct PipelineEntry {
    // Identity
    pub statement_name: Option<String>,
    pub portal_name: Option<String>,
    pub is_prepared: bool,
    pub is_portal: bool,
    pub parent_prepared: Option<Weak<std::cell::RefCell<PipelineEntry>>>,

    // SQL payload
    pub sql_text: String,
    pub sql_tag: &'static str,
    pub sql_class: SqlClass,
    pub text_has_secret: bool,
    pub payload: SqlPayload,
    pub table_token: Option<String>,

    // Parse-time descriptor
    pub parse_parameter_oids: Vec<Oid>,
    pub out_parameter_oids: Vec<Oid>,

    // Result-set descriptor
    pub result_metadata: Option<ResultMetadata>,

    // Bind-time state
    pub param_value_count: usize,
    pub param_format_codes: Vec<i16>,
    pub select_format_codes: Vec<i16>,
    pub arena: ParameterArena,
    pub arena_slots: Vec<Option<ArenaSlot>>,

    // Cursor state (SELECT only)
    pub cursor: Option<Box<dyn crate::engine::Cursor>>,
    pub resend_cursor_record: bool,
    pub return_row_count: u64,
    pub return_row_count_to_be_sent: Option<u64>,
    pub return_row_count_limit: i32,

    // Execution bookkeeping
    pub affected_row_count: u64,
    pub parse_executed: bool,

    // Stage flags
    pub state_parse: bool,
    pub state_bind: bool,
    pub state_desc: DescribeState,
    pub state_exec: bool,
    pub state_closed: bool,
    pub state_sync: StateSync,

    // Error state
    pub error: bool,
    pub error_message: String,
    pub error_position: Option<i32>,
    pub stale_plan_error: bool,
    /// Set instead of `stale_plan_error` when the failure is a protocol
    /// sequencing error (e.g. DEALLOCATE via EXECUTE) rather than a SQL
    /// error, so it keeps its own SQLSTATE.
    pub protocol_error: bool,
}

impl PipelineEntry {
    /// Construct a fresh, anonymous entry right after PARSE.
    pub fn from_parse(
        sql_text: String,
        sql_tag: &'static str,
        sql_class: SqlClass,
        payload: SqlPayload,
        parse_parameter_oids: Vec<Oid>,
        out_parameter_oids: Vec<Oid>,
        result_metadata: Option<ResultMetadata>,
        table_token: Option<String>,
        parse_executed: bool,
    ) -> Self {
        PipelineEntry {
            statement_name: None,
            portal_name: None,
            is_prepared: false,
            is_portal: false,
            parent_prepared: None,
            sql_text,
            sql_tag,
            sql_class,
            text_has_secret: false,
            payload,
            table_token,
            parse_parameter_oids,
            out_parameter_oids,
            result_metadata,
            param_value_count: 0,
            param_format_codes: Vec::new(),
            select_format_codes: Vec::new(),
            arena: ParameterArena::new(),
            arena_slots: Vec::new(),
            cursor: None,
            resend_cursor_record: false,
            return_row_count: 0,
            return_row_count_to_be_sent: None,
            return_row_count_limit: 0,
            affected_row_count: 0,
            parse_executed,
            state_parse: true,
            state_bind: false,
            state_desc: DescribeState::None,
            state_exec: false,
            state_closed: false,
            state_sync: StateSync::Start,
            error: false,
            error_message: String::new(),
            error_position: None,
            stale_plan_error: false,
            protocol_error: false,
        }
    }

    pub fn has_factory(&self) -> bool {
        matches!(self.payload, SqlPayload::Select(_))
    }

    pub fn is_empty_query(&self) -> bool {
        matches!(self.sql_class, SqlClass::EmptyQuery)
    }

    /// Record an execution-time SQL failure; subsequent `sync` calls emit
    /// only ERROR_RESPONSE until the client re-syncs.
    pub fn set_error(&mut self, message: String, position: Option<i32>, stale_plan: bool) {
        self.error = true;
        self.error_message = message;
        self.error_position = position;
        self.stale_plan_error = stale_plan;
        self.protocol_error = false;
    }

    /// Record a protocol sequencing failure (e.g. DEALLOCATE via EXECUTE),
    /// kept distinct from `set_error` so it reports its own SQLSTATE rather
    /// than a generic SQL-error one.
    pub fn set_protocol_error(&mut self, message: String) {
        self.error = true;
        self.error_message = message;
        self.error_position = None;
        self.stale_plan_error = false;
        self.protocol_error = true;
    }

    /// Clear the transient per-cycle flags after a successful `sync`,
    /// keeping identity and cached SQL payload.
    pub fn reset_transient_flags(&mut self) {
        self.state_parse = false;
        self.state_bind = false;
        self.state_desc = DescribeState::None;
        self.state_exec = false;
        self.state_closed = false;
        self.error = false;
        self.stale_plan_error = false;
        self.protocol_error = false;
        self.error_message.clear();
        self.error_position = None;
        self.state_sync = StateSync::Start;
    }

    /// Promote this anonymous entry to a named prepared statement,
    /// internalising `sql_text` — already owned, so this only flips the
    /// identity flags.
    pub fn promote_to_statement(&mut self, name: String) {
        self.statement_name = Some(name);
        self.is_prepared = true;
    }

    pub fn promote_to_portal(&mut self, name: String) {
        self.portal_name = Some(name);
        self.is_portal = true;
    }

    /// A shallow clone sharing only the immutable, parse-time descriptor
    /// fields (OID lists, SQL text, tag); bind/cursor/error state start
    /// fresh. This is the only sharing permitted between a still-streaming
    /// entry and a reused prepared statement.
    pub fn clone_parse_state(&self) -> PipelineEntry {
        PipelineEntry {
            statement_name: self.statement_name.clone(),
            portal_name: None,
            is_prepared: self.is_prepared,
            is_portal: false,
            parent_prepared: None,
            sql_text: self.sql_text.clone(),
            sql_tag: self.sql_tag,
            sql_class: self.sql_class,
            text_has_secret: self.text_has_secret,
            payload: self.payload.clone(),
            table_token: self.table_token.clone(),
            parse_parameter_oids: self.parse_parameter_oids.clone(),
            out_parameter_oids: self.out_parameter_oids.clone(),
            result_metadata: self.result_metadata.clone(),
            param_value_count: 0,
            param_format_codes: Vec::new(),
            select_format_codes: Vec::new(),
            arena: ParameterArena::new(),
            arena_slots: Vec::new(),
            cursor: None,
            resend_cursor_record: false,
            return_row_count: 0,
            return_row_count_to_be_sent: None,
            return_row_count_limit: 0,
            affected_row_count: 0,
            parse_executed: false,
            // PARSE_COMPLETE belongs to the statement's own sync pass, not
            // the portal's; a named statement still owes it if BIND landed
            // before the client's next SYNC.
            state_parse: false,
            state_bind: false,
            state_desc: DescribeState::None,
            state_exec: false,
            state_closed: false,
            state_sync: StateSync::Start,
            error: false,
            error_message: String::new(),
            error_position: None,
            stale_plan_error: false,
            protocol_error: false,
        }
    }
}
