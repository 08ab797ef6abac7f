//! End-to-end coverage over a real TCP socket, hand-encoding frontend
//! messages the way `connection.rs`'s own unit test does, but driving the
//! whole `server::serve` accept loop instead of a bare `ConnectionState`.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use tsqlwire::config::PipelineConfig;
use tsqlwire::engine::memory::MemoryEngine;
use tsqlwire::engine::{ColumnMeta, RowValue};
use tsqlwire::wire::messages::{
    TAG_BIND, TAG_CLOSE, TAG_COMMAND_COMPLETE, TAG_DATA_ROW, TAG_DESCRIBE, TAG_EMPTY_QUERY,
    TAG_ERROR_RESPONSE, TAG_EXECUTE, TAG_PARAMETER_DESCRIPTION, TAG_PARSE, TAG_PARSE_COMPLETE,
    TAG_PORTAL_SUSPENDED, TAG_READY_FOR_QUERY, TAG_ROW_DESCRIPTION, TAG_SYNC,
};
use tsqlwire::wire::ColumnType;

fn frame(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + body.len());
    out.push(tag);
    out.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

async fn read_message(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut header = [0u8; 5];
    stream.read_exact(&mut header).await.unwrap();
    let tag = header[0];
    let len = i32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    let mut body = vec![0u8; len - 4];
    stream.read_exact(&mut body).await.unwrap();
    (tag, body)
}

/// Binds an ephemeral port synchronously (so the caller learns the real
/// address immediately) and runs the accept loop on its own OS thread with
/// a dedicated current-thread runtime, since `server::serve`'s future holds
/// a `LocalSet` across an await point and is therefore not `Send`.
fn spawn_server(engine: MemoryEngine) -> SocketAddr {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    std_listener.set_nonblocking(true).unwrap();
    let addr = std_listener.local_addr().unwrap();
    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            tsqlwire::server::serve(listener, PipelineConfig::default(), engine)
                .await
                .unwrap();
        });
    });
    addr
}

async fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).await.unwrap();
    stream.set_nodelay(true).ok();
    stream
}

#[tokio::test]
async fn scenario_1_cast_int() {
    let addr = spawn_server(MemoryEngine::new());
    let mut stream = connect(addr).await;

    let mut parse_body = Vec::new();
    parse_body.extend_from_slice(b"\0");
    parse_body.extend_from_slice(b"SELECT $1::int\0");
    parse_body.extend_from_slice(&1i16.to_be_bytes());
    parse_body.extend_from_slice(&0i32.to_be_bytes());
    stream.write_all(&frame(TAG_PARSE, &parse_body)).await.unwrap();

    let mut describe_body = Vec::new();
    describe_body.push(b'S');
    describe_body.extend_from_slice(b"\0");
    stream.write_all(&frame(TAG_DESCRIBE, &describe_body)).await.unwrap();

    let mut bind_body = Vec::new();
    bind_body.extend_from_slice(b"\0\0");
    bind_body.extend_from_slice(&1i16.to_be_bytes());
    bind_body.extend_from_slice(&1i16.to_be_bytes()); // binary format
    bind_body.extend_from_slice(&1i16.to_be_bytes());
    bind_body.extend_from_slice(&4i32.to_be_bytes());
    bind_body.extend_from_slice(&0x2Ai32.to_be_bytes());
    bind_body.extend_from_slice(&0i16.to_be_bytes());
    stream.write_all(&frame(TAG_BIND, &bind_body)).await.unwrap();

    let mut exec_body = Vec::new();
    exec_body.extend_from_slice(b"\0");
    exec_body.extend_from_slice(&0i32.to_be_bytes());
    stream.write_all(&frame(TAG_EXECUTE, &exec_body)).await.unwrap();

    stream.write_all(&frame(TAG_SYNC, &[])).await.unwrap();

    assert_eq!(read_message(&mut stream).await.0, TAG_PARSE_COMPLETE);
    let (tag, body) = read_message(&mut stream).await;
    assert_eq!(tag, TAG_PARAMETER_DESCRIPTION);
    assert_eq!(&body[0..2], &1i16.to_be_bytes());

    let (tag, body) = read_message(&mut stream).await;
    assert_eq!(tag, TAG_ROW_DESCRIPTION);
    assert_eq!(&body[0..2], &1i16.to_be_bytes());

    let (tag, _) = read_message(&mut stream).await;
    assert_eq!(tag, tsqlwire::wire::messages::TAG_BIND_COMPLETE);

    let (tag, body) = read_message(&mut stream).await;
    assert_eq!(tag, TAG_DATA_ROW);
    assert_eq!(&body[0..2], &1i16.to_be_bytes());
    let len = i32::from_be_bytes(body[2..6].try_into().unwrap());
    assert_eq!(&body[6..6 + len as usize], b"42");

    let (tag, body) = read_message(&mut stream).await;
    assert_eq!(tag, TAG_COMMAND_COMPLETE);
    assert_eq!(&body[..body.len() - 1], b"SELECT 1");

    let (tag, _) = read_message(&mut stream).await;
    assert_eq!(tag, TAG_READY_FOR_QUERY);
}

#[tokio::test]
async fn scenario_2_empty_query() {
    let addr = spawn_server(MemoryEngine::new());
    let mut stream = connect(addr).await;

    stream.write_all(&frame(TAG_PARSE, b"\0\0\0\0")).await.unwrap();

    let mut bind_body = Vec::new();
    bind_body.extend_from_slice(b"\0\0");
    bind_body.extend_from_slice(&0i16.to_be_bytes());
    bind_body.extend_from_slice(&0i16.to_be_bytes());
    bind_body.extend_from_slice(&0i16.to_be_bytes());
    stream.write_all(&frame(TAG_BIND, &bind_body)).await.unwrap();

    let mut exec_body = Vec::new();
    exec_body.extend_from_slice(b"\0");
    exec_body.extend_from_slice(&0i32.to_be_bytes());
    stream.write_all(&frame(TAG_EXECUTE, &exec_body)).await.unwrap();

    stream.write_all(&frame(TAG_SYNC, &[])).await.unwrap();

    assert_eq!(read_message(&mut stream).await.0, TAG_PARSE_COMPLETE);
    assert_eq!(read_message(&mut stream).await.0, tsqlwire::wire::messages::TAG_BIND_COMPLETE);
    assert_eq!(read_message(&mut stream).await.0, TAG_EMPTY_QUERY);
    assert_eq!(read_message(&mut stream).await.0, TAG_READY_FOR_QUERY);
}

#[tokio::test]
async fn scenario_3_insert_outside_transaction() {
    let engine = MemoryEngine::new();
    engine.seed_table(
        "t",
        vec![
            ColumnMeta { name: "a".into(), column_type: ColumnType::Int4, geo_hash_bit_flag: false },
            ColumnMeta { name: "b".into(), column_type: ColumnType::Int4, geo_hash_bit_flag: false },
        ],
        vec![],
    );
    let addr = spawn_server(engine);
    let mut stream = connect(addr).await;

    let mut parse_body = Vec::new();
    parse_body.extend_from_slice(b"\0");
    parse_body.extend_from_slice(b"INSERT INTO t VALUES ($1,$2)\0");
    parse_body.extend_from_slice(&0i16.to_be_bytes());
    stream.write_all(&frame(TAG_PARSE, &parse_body)).await.unwrap();

    let mut bind_body = Vec::new();
    bind_body.extend_from_slice(b"\0\0");
    bind_body.extend_from_slice(&0i16.to_be_bytes());
    bind_body.extend_from_slice(&2i16.to_be_bytes());
    bind_body.extend_from_slice(&4i32.to_be_bytes());
    bind_body.extend_from_slice(&1i32.to_be_bytes());
    bind_body.extend_from_slice(&4i32.to_be_bytes());
    bind_body.extend_from_slice(&2i32.to_be_bytes());
    bind_body.extend_from_slice(&0i16.to_be_bytes());
    stream.write_all(&frame(TAG_BIND, &bind_body)).await.unwrap();

    let mut exec_body = Vec::new();
    exec_body.extend_from_slice(b"\0");
    exec_body.extend_from_slice(&0i32.to_be_bytes());
    stream.write_all(&frame(TAG_EXECUTE, &exec_body)).await.unwrap();

    stream.write_all(&frame(TAG_SYNC, &[])).await.unwrap();

    assert_eq!(read_message(&mut stream).await.0, TAG_PARSE_COMPLETE);
    assert_eq!(read_message(&mut stream).await.0, tsqlwire::wire::messages::TAG_BIND_COMPLETE);
    let (tag, body) = read_message(&mut stream).await;
    assert_eq!(tag, TAG_COMMAND_COMPLETE);
    assert_eq!(&body[..body.len() - 1], b"INSERT 0 1");
    assert_eq!(read_message(&mut stream).await.0, TAG_READY_FOR_QUERY);
}

#[tokio::test]
async fn scenario_4_stale_plan_on_schema_drift() {
    let engine = MemoryEngine::new();
    engine.seed_table(
        "t",
        vec![ColumnMeta { name: "a".into(), column_type: ColumnType::Int4, geo_hash_bit_flag: false }],
        vec![vec![RowValue::Int4(1)]],
    );
    let addr = spawn_server(engine.clone());
    let mut stream = connect(addr).await;

    let mut parse_body = Vec::new();
    parse_body.extend_from_slice(b"plan\0");
    parse_body.extend_from_slice(b"SELECT * FROM t\0");
    parse_body.extend_from_slice(&0i16.to_be_bytes());
    stream.write_all(&frame(TAG_PARSE, &parse_body)).await.unwrap();
    stream.write_all(&frame(TAG_SYNC, &[])).await.unwrap();
    assert_eq!(read_message(&mut stream).await.0, TAG_PARSE_COMPLETE);
    assert_eq!(read_message(&mut stream).await.0, TAG_READY_FOR_QUERY);

    let mut bind_body = Vec::new();
    bind_body.extend_from_slice(b"\0plan\0");
    bind_body.extend_from_slice(&0i16.to_be_bytes());
    bind_body.extend_from_slice(&0i16.to_be_bytes());
    bind_body.extend_from_slice(&0i16.to_be_bytes());
    stream.write_all(&frame(TAG_BIND, &bind_body)).await.unwrap();
    let mut describe_body = Vec::new();
    describe_body.push(b'P');
    describe_body.extend_from_slice(b"\0");
    stream.write_all(&frame(TAG_DESCRIBE, &describe_body)).await.unwrap();
    let mut exec_body = Vec::new();
    exec_body.extend_from_slice(b"\0");
    exec_body.extend_from_slice(&0i32.to_be_bytes());
    stream.write_all(&frame(TAG_EXECUTE, &exec_body)).await.unwrap();
    stream.write_all(&frame(TAG_SYNC, &[])).await.unwrap();

    assert_eq!(read_message(&mut stream).await.0, tsqlwire::wire::messages::TAG_BIND_COMPLETE);
    let (tag, _) = read_message(&mut stream).await;
    assert_eq!(tag, TAG_ROW_DESCRIPTION);
    let (tag, _) = read_message(&mut stream).await;
    assert_eq!(tag, TAG_DATA_ROW);
    let (tag, body) = read_message(&mut stream).await;
    assert_eq!(tag, TAG_COMMAND_COMPLETE);
    assert_eq!(&body[..body.len() - 1], b"SELECT 1");
    assert_eq!(read_message(&mut stream).await.0, TAG_READY_FOR_QUERY);

    // Schema drift: add a column to `t` between executions of the same
    // prepared statement.
    engine.seed_table(
        "t",
        vec![
            ColumnMeta { name: "a".into(), column_type: ColumnType::Int4, geo_hash_bit_flag: false },
            ColumnMeta { name: "b".into(), column_type: ColumnType::Int4, geo_hash_bit_flag: false },
        ],
        vec![vec![RowValue::Int4(1), RowValue::Int4(2)]],
    );

    stream.write_all(&frame(TAG_BIND, &bind_body)).await.unwrap();
    stream.write_all(&frame(TAG_EXECUTE, &exec_body)).await.unwrap();
    stream.write_all(&frame(TAG_SYNC, &[])).await.unwrap();

    assert_eq!(read_message(&mut stream).await.0, tsqlwire::wire::messages::TAG_BIND_COMPLETE);
    let (tag, body) = read_message(&mut stream).await;
    assert_eq!(tag, TAG_ERROR_RESPONSE);
    assert!(body.windows(6).any(|w| w == b"0A000\0"));
    assert_eq!(read_message(&mut stream).await.0, TAG_READY_FOR_QUERY);
}

#[tokio::test]
async fn scenario_5_portal_batching() {
    let engine = MemoryEngine::new();
    let rows: Vec<Vec<RowValue>> = (0..1000).map(|i| vec![RowValue::Int4(i)]).collect();
    engine.seed_table(
        "wide",
        vec![ColumnMeta { name: "n".into(), column_type: ColumnType::Int4, geo_hash_bit_flag: false }],
        rows,
    );
    let addr = spawn_server(engine);
    let mut stream = connect(addr).await;

    let mut parse_body = Vec::new();
    parse_body.extend_from_slice(b"\0");
    parse_body.extend_from_slice(b"SELECT * FROM wide\0");
    parse_body.extend_from_slice(&0i16.to_be_bytes());
    stream.write_all(&frame(TAG_PARSE, &parse_body)).await.unwrap();

    let mut bind_body = Vec::new();
    bind_body.extend_from_slice(b"cur\0\0");
    bind_body.extend_from_slice(&0i16.to_be_bytes());
    bind_body.extend_from_slice(&0i16.to_be_bytes());
    bind_body.extend_from_slice(&0i16.to_be_bytes());
    stream.write_all(&frame(TAG_BIND, &bind_body)).await.unwrap();
    stream.write_all(&frame(TAG_SYNC, &[])).await.unwrap();
    assert_eq!(read_message(&mut stream).await.0, TAG_PARSE_COMPLETE);
    assert_eq!(read_message(&mut stream).await.0, tsqlwire::wire::messages::TAG_BIND_COMPLETE);
    assert_eq!(read_message(&mut stream).await.0, TAG_READY_FOR_QUERY);

    let mut exec_body = Vec::new();
    exec_body.extend_from_slice(b"cur\0");
    exec_body.extend_from_slice(&100i32.to_be_bytes());

    for batch in 0..10 {
        stream.write_all(&frame(TAG_EXECUTE, &exec_body)).await.unwrap();
        stream.write_all(&frame(TAG_SYNC, &[])).await.unwrap();

        for _ in 0..100 {
            assert_eq!(read_message(&mut stream).await.0, TAG_DATA_ROW);
        }
        let (tag, _) = read_message(&mut stream).await;
        if batch < 9 {
            assert_eq!(tag, TAG_PORTAL_SUSPENDED);
        } else {
            assert_eq!(tag, TAG_COMMAND_COMPLETE);
        }
        assert_eq!(read_message(&mut stream).await.0, TAG_READY_FOR_QUERY);
    }
}

#[tokio::test]
async fn scenario_6_bind_split_across_reads() {
    let addr = spawn_server(MemoryEngine::new());
    let mut stream = connect(addr).await;

    let mut parse_body = Vec::new();
    parse_body.extend_from_slice(b"\0");
    parse_body.extend_from_slice(b"SELECT $1::int\0");
    parse_body.extend_from_slice(&1i16.to_be_bytes());
    parse_body.extend_from_slice(&0i32.to_be_bytes());
    stream.write_all(&frame(TAG_PARSE, &parse_body)).await.unwrap();
    stream.write_all(&frame(TAG_SYNC, &[])).await.unwrap();
    assert_eq!(read_message(&mut stream).await.0, TAG_PARSE_COMPLETE);
    assert_eq!(read_message(&mut stream).await.0, TAG_READY_FOR_QUERY);

    let mut bind_body = Vec::new();
    bind_body.extend_from_slice(b"\0\0");
    bind_body.extend_from_slice(&1i16.to_be_bytes());
    bind_body.extend_from_slice(&1i16.to_be_bytes());
    bind_body.extend_from_slice(&1i16.to_be_bytes());
    bind_body.extend_from_slice(&4i32.to_be_bytes());
    bind_body.extend_from_slice(&7i32.to_be_bytes());
    bind_body.extend_from_slice(&0i16.to_be_bytes());
    let bind_frame = frame(TAG_BIND, &bind_body);

    // Split the BIND frame in the middle of its body, across two writes
    // with a delay between them, so the server's first read sees an
    // incomplete frame.
    let midpoint = bind_frame.len() / 2;
    stream.write_all(&bind_frame[..midpoint]).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    stream.write_all(&bind_frame[midpoint..]).await.unwrap();

    let mut exec_body = Vec::new();
    exec_body.extend_from_slice(b"\0");
    exec_body.extend_from_slice(&0i32.to_be_bytes());
    stream.write_all(&frame(TAG_EXECUTE, &exec_body)).await.unwrap();
    stream.write_all(&frame(TAG_SYNC, &[])).await.unwrap();

    let (tag, _) = read_message(&mut stream).await;
    assert_eq!(tag, tsqlwire::wire::messages::TAG_BIND_COMPLETE);
    let (tag, body) = read_message(&mut stream).await;
    assert_eq!(tag, TAG_DATA_ROW);
    let len = i32::from_be_bytes(body[2..6].try_into().unwrap());
    assert_eq!(&body[6..6 + len as usize], b"7");
    assert_eq!(read_message(&mut stream).await.0, TAG_COMMAND_COMPLETE);
    assert_eq!(read_message(&mut stream).await.0, TAG_READY_FOR_QUERY);
}

#[tokio::test]
async fn close_then_sync_emits_close_complete() {
    let addr = spawn_server(MemoryEngine::new());
    let mut stream = connect(addr).await;

    stream.write_all(&frame(TAG_PARSE, b"stmt\0\0\0\0")).await.unwrap();
    stream.write_all(&frame(TAG_SYNC, &[])).await.unwrap();
    assert_eq!(read_message(&mut stream).await.0, TAG_PARSE_COMPLETE);
    assert_eq!(read_message(&mut stream).await.0, TAG_READY_FOR_QUERY);

    let mut close_body = Vec::new();
    close_body.push(b'S');
    close_body.extend_from_slice(b"stmt\0");
    stream.write_all(&frame(TAG_CLOSE, &close_body)).await.unwrap();
    stream.write_all(&frame(TAG_SYNC, &[])).await.unwrap();

    let (tag, _) = read_message(&mut stream).await;
    assert_eq!(tag, tsqlwire::wire::messages::TAG_CLOSE_COMPLETE);
    assert_eq!(read_message(&mut stream).await.0, TAG_READY_FOR_QUERY);
}
