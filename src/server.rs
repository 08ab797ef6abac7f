//! The TCP accept loop and per-connection task spawn: the one piece of the
//! receive/send loop this crate still owns end to end.
//!
//! One task per client, current-thread-local: a `PipelineEntry` holds
//! `Rc`s, so its connection must run on a `tokio::task::LocalSet` via
//! `spawn_local` rather than a plain `spawn`.

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::connection::ConnectionState;
use crate::engine::{Compiler, WriterSource};
use crate::errors::{classify, Error};
use crate::wire::messages::{
    self, parse_bind, parse_close, parse_describe, parse_execute, parse_parse, parse_query,
};
use crate::wire::{try_read_frame, write_error_response, write_ready_for_query, TransactionStatus};

/// Bind `config.listen_addr` and drive accepted connections until the
/// process is asked to stop. `engine` is cloned once per accepted
/// connection (both as a `Compiler` and as a `WriterSource`); for
/// [`crate::engine::memory::MemoryEngine`] this shares one table set
/// across every connection, the way a real storage engine would.
pub async fn run<E>(config: PipelineConfig, engine: E) -> io::Result<()>
where
    E: Compiler + WriterSource + Clone + 'static,
{
    let listener = TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "listening");
    serve(listener, config, engine).await
}

/// Drive accepted connections off an already-bound `listener`, split out
/// from [`run`] so tests can bind an ephemeral port and learn its address
/// via `TcpListener::local_addr` before connecting.
pub async fn serve<E>(listener: TcpListener, config: PipelineConfig, engine: E) -> io::Result<()>
where
    E: Compiler + WriterSource + Clone + 'static,
{
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            loop {
                let (socket, peer) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let config = config.clone();
                let engine = engine.clone();
                tokio::task::spawn_local(async move {
                    debug!(%peer, "connection accepted");
                    if let Err(e) = drive_connection(socket, config, engine).await {
                        debug!(%peer, error = %e, "connection closed");
                    }
                });
            }
        })
        .await;

    Ok(())
}

/// Read frontend messages off `socket`, dispatch each to `conn`, and flush
/// the output buffer at the points `ConnectionState` demands it (after a
/// full SYNC pass, and whenever a pass signals `FlushAndRetry`/`Paused`).
///
/// A partial frame (including a BIND payload split across two reads)
/// simply makes `try_read_frame` return `None`; the loop reads more bytes
/// and tries again, so no explicit resumption state is needed at this
/// layer.
async fn drive_connection<E>(mut socket: TcpStream, config: PipelineConfig, engine: E) -> Result<(), Error>
where
    E: Compiler + WriterSource + Clone + 'static,
{
    socket.set_nodelay(true).ok();

    let mut conn = ConnectionState::new(Box::new(engine.clone()), Box::new(engine), config);
    let mut inbuf = BytesMut::with_capacity(8 * 1024);

    loop {
        let (tag, body_start, body_len) = loop {
            if let Some(frame) = try_read_frame(&inbuf)? {
                break frame;
            }
            let mut chunk = [0u8; 8 * 1024];
            let n = socket.read(&mut chunk).await.map_err(|e| Error::Socket(e.to_string()))?;
            if n == 0 {
                return Ok(());
            }
            inbuf.extend_from_slice(&chunk[..n]);
        };

        let body = inbuf.split_to(body_start + body_len).split_off(body_start);

        if tag == messages::TAG_SYNC {
            run_sync_to_completion(&mut socket, &mut conn).await?;
        } else if let Err(e) = dispatch_message(&mut conn, tag, &body) {
            emit_connection_error(&mut conn, &e);
        }

        flush_output(&mut socket, &mut conn).await?;
    }
}

fn dispatch_message(conn: &mut ConnectionState, tag: u8, body: &[u8]) -> Result<(), Error> {
    match tag {
        messages::TAG_PARSE => conn.handle_parse(parse_parse(body)?),
        messages::TAG_BIND => conn.handle_bind(parse_bind(body)?),
        messages::TAG_DESCRIBE => conn.handle_describe(parse_describe(body)?),
        messages::TAG_EXECUTE => conn.handle_execute(parse_execute(body)?),
        messages::TAG_CLOSE => conn.handle_close(parse_close(body)?),
        messages::TAG_QUERY => conn.handle_query(parse_query(body)?),
        other => {
            warn!(tag = other, "unrecognized frontend message tag");
            Err(crate::errors::ProtocolError::UnrecognizedMessageTag(other).into())
        }
    }
}

/// `handle_sync` returns `Ok(false)` when a pass needs the output buffer
/// flushed (high watermark hit mid row-stream) or a cursor paused on a
/// cold-storage fetch before it can continue. This reference engine's
/// cursors never actually pause (`CursorStep::Paused` is unreachable from
/// [`crate::engine::memory::MemoryEngine`]), so both cases are handled the
/// same way: flush what's buffered and call `handle_sync` again.
async fn run_sync_to_completion(socket: &mut TcpStream, conn: &mut ConnectionState) -> Result<(), Error> {
    loop {
        let done = conn.handle_sync()?;
        flush_output(socket, conn).await?;
        if done {
            return Ok(());
        }
    }
}

async fn flush_output(socket: &mut TcpStream, conn: &mut ConnectionState) -> Result<(), Error> {
    if conn.output_mut().is_empty() {
        return Ok(());
    }
    let bytes = conn.output_mut().take();
    socket.write_all(&bytes).await.map_err(|e| Error::Socket(e.to_string()))
}

/// A parse/protocol error outside of any pipeline entry's own error state
/// (bad message framing, unknown statement/portal) still owes the client
/// an ERROR_RESPONSE plus a re-baselining READY_FOR_QUERY, same as an
/// entry-scoped failure does.
fn emit_connection_error(conn: &mut ConnectionState, err: &Error) {
    let wire_err = classify(err);
    error!(sqlstate = wire_err.sqlstate, message = %wire_err.message, "message dispatch failed");
    write_error_response(conn.output_mut(), &wire_err);
    write_ready_for_query(conn.output_mut(), TransactionStatus::Idle);
}
