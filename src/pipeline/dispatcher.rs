//! Execution dispatcher: routes a compiled statement's EXECUTE to the
//! right engine call, tracks pending writers for in-transaction INSERTs,
//! and retries on stale-plan.
//!
//! The circuit-breaker timer uses `quanta` for low-overhead monotonic
//! timing, reset at the top of every SELECT and consulted by the cursor
//! streamer on each row.

use std::collections::HashMap;

use quanta::Clock;
use tracing::{debug, warn};

use crate::engine::{CursorFactory, DdlOrUpdate, InsertOp, SqlClass, Writer, WriterSource};
use crate::errors::{EngineError, Error, ProtocolError};
use crate::pipeline::binder;
use crate::pipeline::entry::{PipelineEntry, SqlPayload, StateSync};
use crate::pipeline::oid;

/// What the dispatcher did with one EXECUTE; `sync` turns this into the
/// right response messages.
pub enum DispatchOutcome {
    /// A cursor is now open on `entry`; hand off to the cursor streamer.
    CursorOpened,
    /// Non-SELECT execution completed; `tag` is the COMMAND_COMPLETE text.
    Complete { tag: String },
    Begin,
    Commit,
    Rollback,
    /// PARSE-time auto-execution already ran; EXECUTE is a no-op.
    NoopParseExecuted,
}

pub struct DispatchContext<'a> {
    pub writer_source: &'a dyn WriterSource,
    pub pending_writers: &'a mut HashMap<String, Box<dyn Writer>>,
    pub in_transaction: bool,
    pub max_recompile_attempts: u32,
    pub clock: &'a Clock,
}

pub fn dispatch(entry: &mut PipelineEntry, ctx: &mut DispatchContext<'_>) -> Result<DispatchOutcome, Error> {
    if entry.parse_executed {
        entry.parse_executed = false;
        return Ok(DispatchOutcome::NoopParseExecuted);
    }

    match entry.sql_class {
        SqlClass::Select => dispatch_select(entry, ctx),
        SqlClass::Insert => dispatch_insert(entry, ctx),
        SqlClass::Update => dispatch_update_or_ddl(entry, ctx),
        SqlClass::Ddl => dispatch_update_or_ddl(entry, ctx),
        SqlClass::Ctas => dispatch_update_or_ddl(entry, ctx),
        SqlClass::Begin => Ok(DispatchOutcome::Begin),
        SqlClass::Commit => Ok(DispatchOutcome::Commit),
        SqlClass::Rollback => Ok(DispatchOutcome::Rollback),
        // DEALLOCATE prepared via simple/extended EXECUTE has no prepared-
        // statement name attached to unprepare; point the client at CLOSE.
        SqlClass::Deallocate => Err(ProtocolError::DeallocateViaExecuteUnsupported.into()),
        SqlClass::EmptyQuery => Ok(DispatchOutcome::Complete { tag: String::new() }),
    }
}

fn decode(entry: &PipelineEntry) -> Result<Vec<crate::wire::BindValue<'_>>, Error> {
    let oids = oid::reconcile(&entry.parse_parameter_oids, &entry.out_parameter_oids);
    binder::decode_params(&entry.arena_slots, &entry.arena, &entry.param_format_codes, &oids)
}

fn dispatch_select(entry: &mut PipelineEntry, ctx: &mut DispatchContext<'_>) -> Result<DispatchOutcome, Error> {
    let start = ctx.clock.now();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let params = decode(entry)?;
        let factory: &dyn CursorFactory = match &entry.payload {
            SqlPayload::Select(f) => f.as_ref(),
            _ => return Err(EngineError::Sql {
                message: "SELECT entry missing its cursor factory".to_string(),
                position: None,
            }
            .into()),
        };
        match factory.open(&params) {
            Ok(cursor) => {
                entry.cursor = Some(cursor);
                entry.resend_cursor_record = false;
                entry.return_row_count = 0;
                entry.return_row_count_to_be_sent = if entry.return_row_count_limit > 0 {
                    Some(entry.return_row_count_limit as u64)
                } else {
                    None
                };
                debug!(elapsed_us = ctx.clock.now().duration_since(start).as_micros(), "cursor opened");
                return Ok(DispatchOutcome::CursorOpened);
            }
            Err(EngineError::StalePlan) if attempt <= ctx.max_recompile_attempts => {
                warn!(attempt, "select plan stale, recompiling");
                let recompiled = factory.recompile()?;
                let drifted = entry
                    .result_metadata
                    .as_ref()
                    .map(|old| columns_differ(old, recompiled.metadata()))
                    .unwrap_or(false);
                entry.result_metadata = Some(recompiled.metadata().clone());
                entry.payload = SqlPayload::Select(std::rc::Rc::from(recompiled));
                if drifted && entry.is_prepared {
                    entry.set_error("cached plan is stale, please re-prepare".to_string(), None, true);
                    return Err(EngineError::StalePlan.into());
                }
                continue;
            }
            Err(other) => return Err(other.into()),
        }
    }
}

fn columns_differ(old: &crate::engine::ResultMetadata, new: &crate::engine::ResultMetadata) -> bool {
    if old.columns.len() != new.columns.len() {
        return true;
    }
    old.columns
        .iter()
        .zip(new.columns.iter())
        .any(|(a, b)| a.name != b.name || a.column_type != b.column_type)
}

fn dispatch_insert(entry: &mut PipelineEntry, ctx: &mut DispatchContext<'_>) -> Result<DispatchOutcome, Error> {
    let table_token = entry
        .table_token
        .clone()
        .ok_or_else(|| EngineError::Sql {
            message: "INSERT entry missing its table token".to_string(),
            position: None,
        })?;

    for attempt in 1..=ctx.max_recompile_attempts.max(1) {
        let params = decode(entry)?;
        let insert_op = match &entry.payload {
            SqlPayload::Insert(op) => op.clone(),
            _ => {
                return Err(EngineError::Sql {
                    message: "INSERT entry missing its insert operation".to_string(),
                    position: None,
                }
                .into())
            }
        };

        let result = if ctx.in_transaction {
            if !ctx.pending_writers.contains_key(&table_token) {
                let writer = ctx.writer_source.writer_for(&table_token)?;
                ctx.pending_writers.insert(table_token.clone(), writer);
            }
            let writer = ctx.pending_writers.get_mut(&table_token).expect("just inserted");
            insert_op.execute(writer.as_mut(), &params)
        } else {
            let mut writer = ctx.writer_source.writer_for(&table_token)?;
            let r = insert_op.execute(writer.as_mut(), &params);
            if r.is_ok() {
                writer.commit()?;
            }
            r
        };

        match result {
            Ok(affected) => {
                entry.affected_row_count = affected;
                return Ok(DispatchOutcome::Complete {
                    tag: format!("INSERT 0 {affected}"),
                });
            }
            Err(EngineError::StalePlan) if attempt < ctx.max_recompile_attempts.max(1) => {
                warn!(attempt, "insert plan stale, retrying");
                ctx.pending_writers.remove(&table_token);
                continue;
            }
            Err(other) => return Err(other.into()),
        }
    }
    unreachable!("loop always returns or errors")
}

fn dispatch_update_or_ddl(entry: &mut PipelineEntry, ctx: &mut DispatchContext<'_>) -> Result<DispatchOutcome, Error> {
    if entry.sql_class == SqlClass::Update {
        if let Some(token) = entry.table_token.clone() {
            if let Some(mut writer) = ctx.pending_writers.remove(&token) {
                writer.commit()?;
            }
        }
    }

    for attempt in 1..=ctx.max_recompile_attempts.max(1) {
        let params = decode(entry)?;
        let handle: &dyn DdlOrUpdate = match &entry.payload {
            SqlPayload::DdlOrUpdate(h) => h.as_ref(),
            _ => {
                return Err(EngineError::Sql {
                    message: "entry missing its DDL/UPDATE handle".to_string(),
                    position: None,
                }
                .into())
            }
        };
        match handle.execute(&params) {
            Ok(affected) => {
                entry.affected_row_count = affected;
                let tag = if matches!(entry.sql_class, SqlClass::Update | SqlClass::Ctas) {
                    format!("{} {}", entry.sql_tag, affected)
                } else {
                    entry.sql_tag.to_string()
                };
                return Ok(DispatchOutcome::Complete { tag });
            }
            Err(EngineError::StalePlan) if attempt < ctx.max_recompile_attempts.max(1) => {
                warn!(attempt, "update/ddl plan stale, retrying");
                continue;
            }
            Err(other) => return Err(other.into()),
        }
    }
    unreachable!("loop always returns or errors")
}

/// Commit or roll back every pending writer, clearing the map either way.
pub fn flush_pending_writers(pending: &mut HashMap<String, Box<dyn Writer>>, commit: bool) -> Result<(), Error> {
    let mut first_err = None;
    for (_, mut writer) in pending.drain() {
        let result = if commit { writer.commit() } else { writer.rollback() };
        if let Err(e) = result {
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
