//! Pipeline state machine: the `sync` controller that sequences every
//! response message for one entry across PARSE/BIND/DESCRIBE/EXECUTE/
//! CLOSE.
//!
//! Each stage block advances `state_sync` unconditionally and only gates
//! the message it would emit on its own stage flag, so a skipped step
//! still synthesizes the message a client downstream of it expects, in
//! the right position.

use tracing::{debug, error};

use crate::config::PipelineConfig;
use crate::errors::{classify, Error};
use crate::pipeline::cursor::{self, StreamOutcome};
use crate::pipeline::dispatcher::{self, DispatchContext, DispatchOutcome};
use crate::pipeline::entry::{DescribeState, PipelineEntry, StateSync};
use crate::pipeline::oid;
use crate::pipeline::serializer;
use crate::wire::messages::{
    write_bind_complete, write_close_complete, write_command_complete, write_empty_query,
    write_error_response, write_no_data, write_parameter_description, write_parse_complete,
    write_portal_suspended, write_row_description,
};
use crate::wire::FrameWriter;

/// What the caller (the connection driver) should do after one `run_sync`
/// call.
pub enum SyncSignal {
    /// Everything that could be emitted this turn was emitted.
    Done,
    /// The output buffer needs flushing before `run_sync` is called again.
    FlushAndRetry,
    /// A cursor paused on a cold-storage fetch; park until it fires.
    Paused { wakeup_event: u64 },
}

/// Drive `entry` through the `state_sync` table once, writing every
/// response message into `out`. Returns without clearing transient flags if
/// a flush or pause interrupts it midway, so a later call resumes exactly
/// where this one left off.
pub fn run_sync(
    entry: &mut PipelineEntry,
    out: &mut FrameWriter,
    ctx: &mut SyncPassContext<'_>,
) -> Result<SyncSignal, Error> {
    if entry.error {
        emit_error_and_maybe_close(entry, out);
        return Ok(SyncSignal::Done);
    }

    if entry.state_sync == StateSync::Start {
        if entry.state_parse {
            write_parse_complete(out);
        }
        entry.state_sync = StateSync::ParseDone;
    }

    if entry.state_sync == StateSync::ParseDone {
        if entry.state_bind {
            write_bind_complete(out);
        }
        entry.state_sync = StateSync::BindDone;
    }

    if entry.state_sync == StateSync::BindDone {
        if entry.state_desc == DescribeState::NamedStatement {
            let oids = oid::reconcile(&entry.parse_parameter_oids, &entry.out_parameter_oids);
            write_parameter_description(out, &oids);
        }
        if entry.state_desc != DescribeState::None {
            if entry.has_factory() {
                let formats = entry.select_format_codes.clone();
                match &entry.result_metadata {
                    Some(metadata) => {
                        let columns = serializer::build_row_description(metadata, &formats);
                        write_row_description(out, &columns);
                    }
                    None => write_no_data(out),
                }
            } else {
                write_no_data(out);
            }
        }
        entry.state_sync = StateSync::Described;
    }

    if entry.state_sync == StateSync::Described {
        if entry.state_exec && entry.is_empty_query() {
            write_empty_query(out);
            entry.state_sync = StateSync::Complete;
        } else if entry.state_exec {
            if let Some(signal) = run_execute(entry, out, ctx)? {
                return Ok(signal);
            }
        } else {
            entry.state_sync = StateSync::Complete;
        }
    }

    if entry.state_sync == StateSync::CursorExhausted {
        let total = cursor::finish(entry, false);
        write_command_complete(out, &format!("{} {}", entry.sql_tag, total));
        entry.state_sync = StateSync::Complete;
    }

    if entry.state_sync == StateSync::PortalSuspended {
        write_portal_suspended(out);
        cursor::finish(entry, true);
        entry.state_sync = StateSync::Complete;
    }

    if entry.state_closed {
        write_close_complete(out);
    }

    if entry.error {
        emit_error_and_maybe_close(entry, out);
    } else {
        entry.reset_transient_flags();
    }

    Ok(SyncSignal::Done)
}

pub struct SyncPassContext<'a> {
    pub dispatch: DispatchContext<'a>,
    pub config: &'a PipelineConfig,
    pub in_transaction: &'a mut bool,
    pub transaction_errored: &'a mut bool,
}

fn run_execute(
    entry: &mut PipelineEntry,
    out: &mut FrameWriter,
    ctx: &mut SyncPassContext<'_>,
) -> Result<Option<SyncSignal>, Error> {
    if *ctx.transaction_errored {
        // Skip EXECUTE entirely inside a poisoned transaction.
        entry.state_sync = StateSync::Complete;
        return Ok(None);
    }

    if entry.cursor.is_none() && !entry.has_factory() {
        match dispatcher::dispatch(entry, &mut ctx.dispatch) {
            Ok(DispatchOutcome::CursorOpened) => {}
            Ok(DispatchOutcome::Complete { tag }) => {
                write_command_complete(out, &tag);
                entry.state_sync = StateSync::Complete;
                return Ok(None);
            }
            Ok(DispatchOutcome::Begin) => {
                *ctx.in_transaction = true;
                write_command_complete(out, "BEGIN");
                entry.state_sync = StateSync::Complete;
                return Ok(None);
            }
            Ok(DispatchOutcome::Commit) => {
                dispatcher::flush_pending_writers(ctx.dispatch.pending_writers, true)?;
                *ctx.in_transaction = false;
                *ctx.transaction_errored = false;
                write_command_complete(out, "COMMIT");
                entry.state_sync = StateSync::Complete;
                return Ok(None);
            }
            Ok(DispatchOutcome::Rollback) => {
                dispatcher::flush_pending_writers(ctx.dispatch.pending_writers, false)?;
                *ctx.in_transaction = false;
                *ctx.transaction_errored = false;
                write_command_complete(out, "ROLLBACK");
                entry.state_sync = StateSync::Complete;
                return Ok(None);
            }
            Ok(DispatchOutcome::NoopParseExecuted) => {
                entry.state_sync = StateSync::Complete;
                return Ok(None);
            }
            Err(e) => {
                debug!(error = %e, "execute failed");
                if *ctx.in_transaction {
                    *ctx.transaction_errored = true;
                    dispatcher::flush_pending_writers(ctx.dispatch.pending_writers, false).ok();
                }
                if matches!(&e, Error::Protocol(_)) {
                    entry.set_protocol_error(e.to_string());
                } else {
                    let stale = matches!(&e, Error::Engine(crate::errors::EngineError::StalePlan));
                    entry.set_error(e.to_string(), None, stale);
                }
                return Ok(None);
            }
        }
    }

    match cursor::stream(entry, out, ctx.config.max_blob_size.as_bytes() as usize) {
        Ok(StreamOutcome::BatchLimitReached) => Ok(None),
        Ok(StreamOutcome::CursorExhausted) => Ok(None),
        Ok(StreamOutcome::NeedsFlush) => Ok(Some(SyncSignal::FlushAndRetry)),
        Ok(StreamOutcome::Paused { wakeup_event }) => Ok(Some(SyncSignal::Paused { wakeup_event })),
        Err(e) => {
            if *ctx.in_transaction {
                *ctx.transaction_errored = true;
            }
            entry.set_error(e.to_string(), None, false);
            Ok(None)
        }
    }
}

fn emit_error_and_maybe_close(entry: &mut PipelineEntry, out: &mut FrameWriter) {
    let wire_err = if entry.stale_plan_error {
        crate::errors::WireErrorResponse::stale_plan(entry.error_message.clone())
    } else if entry.protocol_error {
        crate::errors::WireErrorResponse::protocol(entry.error_message.clone())
    } else {
        classify(&Error::Engine(crate::errors::EngineError::Sql {
            message: entry.error_message.clone(),
            position: entry.error_position,
        }))
    };
    error!(sqlstate = wire_err.sqlstate, message = %wire_err.message, "entry aborted with error");
    write_error_response(out, &wire_err);
    if entry.state_closed {
        write_close_complete(out);
    }
    entry.reset_transient_flags();
}
