//! The per-connection driver: owns the prepared-statement and portal name
//! tables, `pending_writers`, transaction state, and the output buffer,
//! and routes each incoming frontend message to the right
//! [`PipelineEntry`].
//!
//! One connection, one cooperative task, no cross-task sharing of entries.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use quanta::Clock;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::engine::{Compiler, Writer, WriterSource};
use crate::errors::{Error, ProtocolError};
use crate::pipeline::dispatcher::DispatchContext;
use crate::pipeline::entry::{DescribeState, PipelineEntry, SqlPayload};
use crate::pipeline::{run_sync, SyncPassContext, SyncSignal};
use crate::wire::messages::{BindMessage, ExecuteMessage, NamedTarget, ParseMessage, Target, TransactionStatus};
use crate::wire::{self, FrameWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    InTransaction,
    ErrorTransaction,
}

impl TransactionState {
    pub fn wire_status(self) -> TransactionStatus {
        match self {
            TransactionState::Idle => TransactionStatus::Idle,
            TransactionState::InTransaction => TransactionStatus::InTransaction,
            TransactionState::ErrorTransaction => TransactionStatus::Error,
        }
    }
}

/// Which name table a `sync`-active entry was pulled from, so a closed
/// entry can be removed from the right one once its pass completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameTable {
    Statement,
    Portal,
}

/// One TCP connection's state: which server is this client bound to, and
/// is this connection's transaction poisoned.
pub struct ConnectionState {
    statements: HashMap<String, Rc<RefCell<PipelineEntry>>>,
    portals: HashMap<String, Rc<RefCell<PipelineEntry>>>,
    pending_writers: HashMap<String, Box<dyn Writer>>,
    transaction: TransactionState,
    output: FrameWriter,
    compiler: Box<dyn Compiler>,
    writer_source: Box<dyn WriterSource>,
    config: PipelineConfig,
    clock: Clock,
}

impl ConnectionState {
    pub fn new(compiler: Box<dyn Compiler>, writer_source: Box<dyn WriterSource>, config: PipelineConfig) -> Self {
        let watermark = config.output_buffer_high_watermark.as_bytes() as usize;
        ConnectionState {
            statements: HashMap::new(),
            portals: HashMap::new(),
            pending_writers: HashMap::new(),
            transaction: TransactionState::Idle,
            output: FrameWriter::new(watermark),
            compiler,
            writer_source,
            config,
            clock: Clock::new(),
        }
    }

    pub fn output_mut(&mut self) -> &mut FrameWriter {
        &mut self.output
    }

    /// PARSE: compile the statement and register it (anonymous if `name`
    /// is empty) in the statement table.
    pub fn handle_parse(&mut self, msg: ParseMessage<'_>) -> Result<(), Error> {
        let compiled = self.compiler.compile(msg.sql_text, &msg.param_type_oids)?;
        let payload = match (compiled.factory, compiled.insert_op, compiled.ddl_or_update) {
            (Some(f), None, None) => SqlPayload::Select(Rc::from(f)),
            (None, Some(i), None) => SqlPayload::Insert(Rc::from(i)),
            (None, None, Some(d)) => SqlPayload::DdlOrUpdate(Rc::from(d)),
            _ => SqlPayload::None,
        };

        let mut entry = PipelineEntry::from_parse(
            msg.sql_text.to_string(),
            compiled.tag,
            compiled.class,
            payload,
            compiled.param_oids,
            msg.param_type_oids.clone(),
            None,
            compiled.table_token,
            compiled.parse_executed,
        );
        if let SqlPayload::Select(factory) = &entry.payload {
            entry.result_metadata = Some(factory.metadata().clone());
        }

        if !msg.statement_name.is_empty() {
            entry.promote_to_statement(msg.statement_name.to_string());
        }
        self.statements.insert(msg.statement_name.to_string(), Rc::new(RefCell::new(entry)));
        Ok(())
    }

    /// BIND: look up the statement, create (or refresh) a portal sharing
    /// its compiled artifact, and ingest the raw parameter bytes into the
    /// portal's own arena.
    pub fn handle_bind(&mut self, msg: BindMessage<'_>) -> Result<(), Error> {
        let statement = self
            .statements
            .get(msg.statement_name)
            .ok_or_else(|| ProtocolError::UnknownStatement(msg.statement_name.to_string()))?
            .clone();

        let mut portal = statement.borrow().clone_parse_state();
        portal.state_bind = true;
        portal.param_value_count = msg.values.len();
        portal.param_format_codes = msg.param_formats;
        portal.select_format_codes = msg.result_formats;
        portal.arena_slots = portal.arena.ingest(&msg.values);
        if !msg.portal_name.is_empty() {
            portal.promote_to_portal(msg.portal_name.to_string());
        }

        self.portals.insert(msg.portal_name.to_string(), Rc::new(RefCell::new(portal)));
        Ok(())
    }

    pub fn handle_describe(&mut self, msg: NamedTarget<'_>) -> Result<(), Error> {
        let entry = self.lookup(msg.target, msg.name)?;
        let mut entry = entry.borrow_mut();
        entry.state_desc = match msg.target {
            Target::Statement => DescribeState::NamedStatement,
            Target::Portal => DescribeState::Portal,
        };
        Ok(())
    }

    pub fn handle_execute(&mut self, msg: ExecuteMessage<'_>) -> Result<(), Error> {
        let entry = self
            .portals
            .get(msg.portal_name)
            .ok_or_else(|| ProtocolError::UnknownPortal(msg.portal_name.to_string()))?
            .clone();
        let mut entry = entry.borrow_mut();
        entry.state_exec = true;
        entry.return_row_count_limit = msg.max_rows;
        Ok(())
    }

    /// CLOSE only marks the entry; it stays in its name table until the
    /// next SYNC drives CLOSE_COMPLETE and removes it, so a pipelined
    /// CLOSE;SYNC still gets its response message.
    pub fn handle_close(&mut self, msg: NamedTarget<'_>) -> Result<(), Error> {
        let entry = self.lookup(msg.target, msg.name)?;
        entry.borrow_mut().state_closed = true;
        Ok(())
    }

    fn lookup(&self, target: Target, name: &str) -> Result<Rc<RefCell<PipelineEntry>>, Error> {
        let table = match target {
            Target::Statement => &self.statements,
            Target::Portal => &self.portals,
        };
        table
            .get(name)
            .cloned()
            .ok_or_else(|| match target {
                Target::Statement => ProtocolError::UnknownStatement(name.to_string()).into(),
                Target::Portal => ProtocolError::UnknownPortal(name.to_string()).into(),
            })
    }

    /// SYNC: drive every entry with outstanding work through `run_sync`,
    /// then emit READY_FOR_QUERY. Returns `Ok(false)` if a pause/flush
    /// interrupted the pass and the caller must flush and re-invoke.
    ///
    /// Scans both name tables: a named statement DESCRIBEd (or just
    /// PARSEd) without an intervening BIND owes its own response messages,
    /// not just bound portals.
    pub fn handle_sync(&mut self) -> Result<bool, Error> {
        fn has_pending(e: &PipelineEntry) -> bool {
            e.state_parse || e.state_bind || e.state_desc != DescribeState::None || e.state_exec || e.state_closed
        }

        let active: Vec<(NameTable, String, Rc<RefCell<PipelineEntry>>)> = self
            .statements
            .iter()
            .filter(|(_, e)| has_pending(&e.borrow()))
            .map(|(name, e)| (NameTable::Statement, name.clone(), e.clone()))
            .chain(
                self.portals
                    .iter()
                    .filter(|(_, e)| has_pending(&e.borrow()))
                    .map(|(name, e)| (NameTable::Portal, name.clone(), e.clone())),
            )
            .collect();

        for (table, name, entry_rc) in active {
            let mut entry = entry_rc.borrow_mut();
            let was_closed = entry.state_closed;
            let mut in_tx = self.transaction != TransactionState::Idle;
            let mut errored = self.transaction == TransactionState::ErrorTransaction;

            let mut ctx = SyncPassContext {
                dispatch: DispatchContext {
                    writer_source: self.writer_source.as_ref(),
                    pending_writers: &mut self.pending_writers,
                    in_transaction: in_tx,
                    max_recompile_attempts: self.config.max_recompile_attempts,
                    clock: &self.clock,
                },
                config: &self.config,
                in_transaction: &mut in_tx,
                transaction_errored: &mut errored,
            };

            let signal = run_sync(&mut entry, &mut self.output, &mut ctx)?;
            drop(entry);

            if was_closed {
                match table {
                    NameTable::Statement => self.statements.remove(&name),
                    NameTable::Portal => self.portals.remove(&name),
                };
            }

            match signal {
                SyncSignal::Done => {}
                SyncSignal::FlushAndRetry => return Ok(false),
                SyncSignal::Paused { wakeup_event } => {
                    debug!(wakeup_event, "connection parked on cold-storage fetch");
                    return Ok(false);
                }
            }

            self.transaction = if errored {
                TransactionState::ErrorTransaction
            } else if in_tx {
                TransactionState::InTransaction
            } else {
                TransactionState::Idle
            };
        }

        wire::write_ready_for_query(&mut self.output, self.transaction.wire_status());
        info!(transaction = ?self.transaction, "sync complete");
        Ok(true)
    }

    /// Simple QUERY: compile, execute, and stream to completion in one
    /// shot, bypassing PARSE_COMPLETE/BIND_COMPLETE (those are extended-
    /// protocol only) but reusing the same `sync` machinery for row
    /// emission and COMMAND_COMPLETE. Multi-statement splitting is out of
    /// scope; `sql_text` is treated as one statement.
    pub fn handle_query(&mut self, sql_text: &str) -> Result<(), Error> {
        let compiled = self.compiler.compile(sql_text, &[])?;
        let payload = match (compiled.factory, compiled.insert_op, compiled.ddl_or_update) {
            (Some(f), None, None) => SqlPayload::Select(Rc::from(f)),
            (None, Some(i), None) => SqlPayload::Insert(Rc::from(i)),
            (None, None, Some(d)) => SqlPayload::DdlOrUpdate(Rc::from(d)),
            _ => SqlPayload::None,
        };
        let mut entry = PipelineEntry::from_parse(
            sql_text.to_string(),
            compiled.tag,
            compiled.class,
            payload,
            compiled.param_oids,
            Vec::new(),
            None,
            compiled.table_token,
            compiled.parse_executed,
        );
        if let SqlPayload::Select(factory) = &entry.payload {
            entry.result_metadata = Some(factory.metadata().clone());
        }
        entry.state_parse = false;
        entry.state_bind = false;
        entry.state_desc = DescribeState::Portal;
        entry.state_exec = true;

        self.portals.insert(String::new(), Rc::new(RefCell::new(entry)));
        self.handle_sync().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemoryEngine;
    use crate::wire::messages::{parse_bind, parse_parse};

    struct NoopWriterSource;
    impl WriterSource for NoopWriterSource {
        fn writer_for(&self, _table_token: &str) -> Result<Box<dyn Writer>, crate::errors::EngineError> {
            struct W;
            impl Writer for W {
                fn commit(&mut self) -> Result<(), crate::errors::EngineError> {
                    Ok(())
                }
                fn rollback(&mut self) -> Result<(), crate::errors::EngineError> {
                    Ok(())
                }
            }
            Ok(Box::new(W))
        }
    }

    fn connection() -> ConnectionState {
        ConnectionState::new(Box::new(MemoryEngine::new()), Box::new(NoopWriterSource), PipelineConfig::default())
    }

    #[test]
    fn cast_int_scenario() {
        let mut conn = connection();

        let mut parse_body = Vec::new();
        parse_body.extend_from_slice(b"\0");
        parse_body.extend_from_slice(b"SELECT $1::int\0");
        parse_body.extend_from_slice(&1i16.to_be_bytes());
        parse_body.extend_from_slice(&0i32.to_be_bytes());
        conn.handle_parse(parse_parse(&parse_body).unwrap()).unwrap();

        let mut bind_body = Vec::new();
        bind_body.extend_from_slice(b"\0\0");
        bind_body.extend_from_slice(&1i16.to_be_bytes());
        bind_body.extend_from_slice(&1i16.to_be_bytes()); // binary
        bind_body.extend_from_slice(&1i16.to_be_bytes());
        bind_body.extend_from_slice(&4i32.to_be_bytes());
        bind_body.extend_from_slice(&42i32.to_be_bytes());
        bind_body.extend_from_slice(&0i16.to_be_bytes());
        conn.handle_bind(parse_bind(&bind_body).unwrap()).unwrap();

        conn.handle_execute(ExecuteMessage {
            portal_name: "",
            max_rows: 0,
        })
        .unwrap();

        let ready = conn.handle_sync().unwrap();
        assert!(ready);
        assert!(!conn.output_mut().is_empty());
    }
}
