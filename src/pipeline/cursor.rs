//! Cursor streamer: resumable row emission with bookmarking,
//! pause-for-cold-data, buffer-overflow restart, and portal-suspend at the
//! batch limit.

use tracing::{debug, trace, warn};

use crate::engine::CursorStep;
use crate::errors::Error;
use crate::pipeline::entry::{PipelineEntry, StateSync};
use crate::pipeline::serializer;
use crate::wire::messages::write_data_row;
use crate::wire::FrameWriter;

/// What happened when we tried to drain as much of the current batch as
/// would fit in `out`.
pub enum StreamOutcome {
    /// `rows_sent == batch_limit`: batch exhausted, portal may resume.
    BatchLimitReached,
    /// Cursor returned `Exhausted`: no more rows, ever.
    CursorExhausted,
    /// Output buffer couldn't fit the row even after a caller-side flush;
    /// caller should flush `out` and call `stream` again.
    NeedsFlush,
    /// Cold-storage fetch in flight; caller parks the connection until
    /// `wakeup_event` fires.
    Paused { wakeup_event: u64 },
}

/// Drain rows from `entry.cursor` into `out` until the batch limit, cursor
/// exhaustion, a pause, or an overflow. Mutates `entry`'s cursor bookkeeping
/// in place so a subsequent call resumes exactly where this one left off.
pub fn stream(entry: &mut PipelineEntry, out: &mut FrameWriter, max_blob_size: usize) -> Result<StreamOutcome, Error> {
    entry.state_sync = StateSync::Streaming;

    loop {
        let limit_reached = match entry.return_row_count_to_be_sent {
            Some(ceiling) => entry.return_row_count >= ceiling,
            None => false,
        };
        if limit_reached {
            entry.state_sync = StateSync::PortalSuspended;
            return Ok(StreamOutcome::BatchLimitReached);
        }

        let mark = out.bookmark();

        if !entry.resend_cursor_record {
            let cursor = entry.cursor.as_deref_mut().expect("stream called without an open cursor");
            match cursor.advance()? {
                CursorStep::Exhausted => {
                    entry.state_sync = StateSync::CursorExhausted;
                    return Ok(StreamOutcome::CursorExhausted);
                }
                CursorStep::Paused { wakeup_event } => {
                    out.reset_to_bookmark(mark);
                    debug!(wakeup_event, "cursor paused on cold-storage fetch");
                    return Ok(StreamOutcome::Paused { wakeup_event });
                }
                CursorStep::Row => {}
            }
        }

        let row_result_formats = entry.select_format_codes.clone();
        let metadata = entry
            .result_metadata
            .as_ref()
            .expect("select entries always carry result metadata");
        let cursor = entry.cursor.as_deref().expect("checked above");
        let row = cursor.current_row();

        let mut encoded: Vec<Option<Vec<u8>>> = Vec::with_capacity(row.len());
        let mut overflowed = false;
        for (i, (value, col)) in row.iter().zip(metadata.columns.iter()).enumerate() {
            let format = serializer::column_format(col.column_type, i, &row_result_formats);
            match serializer::encode_value(value, format, max_blob_size) {
                Ok(v) => encoded.push(v),
                Err(_) => {
                    overflowed = true;
                    break;
                }
            }
        }

        if overflowed {
            out.reset_to_bookmark(mark);
            entry.resend_cursor_record = true;
            return Ok(StreamOutcome::NeedsFlush);
        }

        let borrowed: Vec<Option<&[u8]>> = encoded.iter().map(|v| v.as_deref()).collect();
        let row_bytes: usize = borrowed.iter().map(|v| v.map_or(4, |b| 4 + b.len())).sum::<usize>() + 6;
        if out.would_overflow(row_bytes) {
            out.reset_to_bookmark(mark);
            entry.resend_cursor_record = true;
            return Ok(StreamOutcome::NeedsFlush);
        }

        write_data_row(out, &borrowed);
        entry.resend_cursor_record = false;
        entry.return_row_count += 1;
        trace!(rows_sent = entry.return_row_count, "emitted data row");
    }
}

/// Close the cursor (unless it's a still-open named portal being
/// suspended) and return the accumulated row count for COMMAND_COMPLETE.
pub fn finish(entry: &mut PipelineEntry, suspended: bool) -> u64 {
    let keep_open = suspended && entry.portal_name.is_some();
    if !keep_open {
        entry.cursor = None;
        if suspended {
            warn!(portal = ?entry.portal_name, "closing unnamed portal instead of suspending it");
        }
    }
    entry.return_row_count
}
