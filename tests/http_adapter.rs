//! End-to-end tests: Thrift calls over real HTTP connections.

use std::sync::Arc;
use std::time::Duration;

use thrift::protocol::{TInputProtocol, TOutputProtocol};
use thrift::server::TProcessor;
use thrift::ApplicationErrorKind;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use thrift_http::config::AdapterConfig;
use thrift_http::ping::{self, PingProcessor};
use thrift_http::ProtocolKind;

mod common;

/// Strict binary `ping()` call with sequence number 1.
const PING_CALL: &[u8] = &[
    0x80, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x04, b'p', b'i', b'n', b'g', 0x00, 0x00, 0x00, 0x01,
    0x00,
];

#[tokio::test]
async fn ping_returns_pong() {
    let server = common::start_ping_server().await;

    let res = common::client()
        .post(server.url())
        .header("content-type", "application/x-thrift")
        .body(PING_CALL.to_vec())
        .send()
        .await
        .expect("server unreachable");

    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["content-type"], "application/x-thrift");
    assert_eq!(res.headers()["content-length"], "28");

    let body = res.bytes().await.unwrap();
    let reply = ping::decode_reply(ProtocolKind::Binary, &body).unwrap();
    assert_eq!(reply.method, "ping");
    assert_eq!(reply.sequence_number, 1);
    assert_eq!(reply.value, b"pong");
}

#[tokio::test]
async fn content_length_matches_processor_output() {
    let server = common::start_ping_server().await;
    let client = common::client();

    for (seq, size) in [0usize, 1, 977, 200_000].into_iter().enumerate() {
        let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        let call = ping::encode_echo_call(ProtocolKind::Binary, seq as i32, &payload).unwrap();

        let res = client.post(server.url()).body(call).send().await.unwrap();
        assert_eq!(res.status(), 200);
        let declared: usize = res.headers()["content-length"]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        let body = res.bytes().await.unwrap();
        assert_eq!(declared, body.len());

        let reply = ping::decode_reply(ProtocolKind::Binary, &body).unwrap();
        assert_eq!(reply.sequence_number, seq as i32);
        assert_eq!(reply.value, payload);
    }
}

#[tokio::test]
async fn keep_alive_serves_independent_requests() {
    let server = common::start_ping_server().await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    let first =
        ping::encode_echo_call(ProtocolKind::Binary, 1, b"a much longer first payload").unwrap();
    let res = common::post_raw(&mut stream, &first, &[]).await;
    assert_eq!(res.status, 200);
    assert_eq!(res.header("connection"), None);
    let reply = ping::decode_reply(ProtocolKind::Binary, &res.body).unwrap();
    assert_eq!(reply.value, b"a much longer first payload");

    let second = ping::encode_echo_call(ProtocolKind::Binary, 2, b"short").unwrap();
    let res = common::post_raw(&mut stream, &second, &[]).await;
    assert_eq!(res.status, 200);
    assert_eq!(res.content_length(), res.body.len());
    let reply = ping::decode_reply(ProtocolKind::Binary, &res.body).unwrap();
    assert_eq!(reply.sequence_number, 2);
    assert_eq!(reply.value, b"short");
}

#[tokio::test]
async fn connection_close_is_honored() {
    let server = common::start_ping_server().await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    let res = common::post_raw(&mut stream, PING_CALL, &[("Connection", "close")]).await;
    assert_eq!(res.status, 200);
    assert_eq!(res.header("connection"), Some("close"));
    assert_eq!(
        ping::decode_reply(ProtocolKind::Binary, &res.body).unwrap().value,
        b"pong"
    );

    assert!(common::is_closed(&mut stream).await);
}

#[tokio::test]
async fn malformed_message_reports_diagnostic_and_keeps_connection() {
    let server = common::start_ping_server().await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    let res = common::post_raw(&mut stream, &PING_CALL[..9], &[]).await;
    assert_eq!(res.status, 200);
    assert!(res.header("content-type").unwrap().starts_with("text/plain"));
    assert!(!res.body.is_empty());
    assert_eq!(res.content_length(), res.body.len());
    assert!(String::from_utf8_lossy(&res.body).starts_with("decode error"));

    let res = common::post_raw(&mut stream, PING_CALL, &[]).await;
    assert_eq!(res.status, 200);
    assert_eq!(
        ping::decode_reply(ProtocolKind::Binary, &res.body).unwrap().value,
        b"pong"
    );
}

#[tokio::test]
async fn unknown_method_returns_application_exception() {
    let server = common::start_ping_server().await;
    let mut call = PING_CALL.to_vec();
    // "ping" -> "pong"
    call[9] = b'o';

    let res = common::client()
        .post(server.url())
        .body(call)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["content-type"], "application/x-thrift");

    let body = res.bytes().await.unwrap();
    match ping::decode_reply(ProtocolKind::Binary, &body) {
        Err(thrift::Error::Application(e)) => {
            assert_eq!(e.kind, ApplicationErrorKind::UnknownMethod);
            assert_eq!(e.message, "unknown method pong");
        }
        other => panic!("expected an exception, got {other:?}"),
    }
}

#[tokio::test]
async fn negative_length_prefix_is_a_decode_error() {
    let server = common::start_ping_server().await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    let res = common::post_raw(
        &mut stream,
        &[0x80, 0x01, 0x00, 0x01, 0xff, 0xff, 0xff, 0xff],
        &[],
    )
    .await;
    assert_eq!(res.status, 200);
    assert!(String::from_utf8_lossy(&res.body).starts_with("decode error"));

    // the connection survives
    let res = common::post_raw(&mut stream, PING_CALL, &[]).await;
    assert_eq!(
        ping::decode_reply(ProtocolKind::Binary, &res.body).unwrap().value,
        b"pong"
    );
}

#[tokio::test]
async fn concurrent_connections_are_isolated() {
    let server = common::start_ping_server().await;

    let tasks: Vec<_> = (0..8)
        .map(|n| {
            let addr = server.addr;
            tokio::spawn(async move {
                let mut stream = TcpStream::connect(addr).await.unwrap();
                let mut results = Vec::new();
                for round in 0..3 {
                    let payload = format!("connection {n} round {round}").repeat(n + 1);
                    let call =
                        ping::encode_echo_call(ProtocolKind::Binary, round, payload.as_bytes())
                            .unwrap();
                    let res = common::post_raw(&mut stream, &call, &[]).await;
                    let reply = ping::decode_reply(ProtocolKind::Binary, &res.body).unwrap();
                    results.push((payload.into_bytes(), reply.value));
                }
                results
            })
        })
        .collect();

    for task in tasks {
        for (sent, received) in task.await.unwrap() {
            assert_eq!(sent, received);
        }
    }
}

#[tokio::test]
async fn chunked_body_is_reassembled_in_order() {
    let server = common::start_ping_server().await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    let call = ping::encode_echo_call(ProtocolKind::Binary, 4, b"split across chunks").unwrap();
    let (a, b) = call.split_at(call.len() / 2);

    stream
        .write_all(b"POST / HTTP/1.1\r\nHost: localhost\r\nTransfer-Encoding: chunked\r\n\r\n")
        .await
        .unwrap();
    for part in [a, b] {
        stream
            .write_all(format!("{:x}\r\n", part.len()).as_bytes())
            .await
            .unwrap();
        stream.write_all(part).await.unwrap();
        stream.write_all(b"\r\n").await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    stream.write_all(b"0\r\n\r\n").await.unwrap();

    let res = common::read_response(&mut stream).await;
    assert_eq!(res.status, 200);
    let reply = ping::decode_reply(ProtocolKind::Binary, &res.body).unwrap();
    assert_eq!(reply.value, b"split across chunks");
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let mut config = AdapterConfig::default();
    config.limits.max_body_size = 16;
    let server = common::start_server(config, Arc::new(PingProcessor::new())).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    let res = common::post_raw(&mut stream, &[0u8; 64], &[]).await;
    assert_eq!(res.status, 413);
    assert_eq!(res.header("connection"), Some("close"));
    assert!(common::is_closed(&mut stream).await);
}

#[tokio::test]
async fn compact_protocol_round_trip() {
    let mut config = AdapterConfig::default();
    config.protocol.input = ProtocolKind::Compact;
    config.protocol.output = ProtocolKind::Compact;
    let server = common::start_server(config, Arc::new(PingProcessor::new())).await;

    let call = ping::encode_echo_call(ProtocolKind::Compact, 11, b"compact").unwrap();
    let res = common::client().post(server.url()).body(call).send().await.unwrap();
    assert_eq!(res.status(), 200);

    let body = res.bytes().await.unwrap();
    let reply = ping::decode_reply(ProtocolKind::Compact, &body).unwrap();
    assert_eq!(reply.sequence_number, 11);
    assert_eq!(reply.value, b"compact");
}

/// Sleeps past any reasonable deadline before answering.
struct StalledProcessor;

impl TProcessor for StalledProcessor {
    fn process(
        &self,
        i: &mut dyn TInputProtocol,
        o: &mut dyn TOutputProtocol,
    ) -> thrift::Result<()> {
        std::thread::sleep(Duration::from_millis(500));
        PingProcessor::new().process(i, o)
    }
}

#[tokio::test]
async fn stalled_processor_times_out() {
    let mut config = AdapterConfig::default();
    config.timeouts.processing_ms = 50;
    let server = common::start_server(config, Arc::new(StalledProcessor)).await;

    let res = common::client()
        .post(server.url())
        .body(PING_CALL.to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body = res.text().await.unwrap();
    assert!(body.starts_with("processing timed out"), "{body}");
}

#[tokio::test]
async fn shutdown_stops_accept_loop() {
    let mut config = AdapterConfig::default();
    config.timeouts.shutdown_secs = 1;
    let server = common::start_server(config, Arc::new(PingProcessor::new())).await;

    let res = common::client()
        .post(server.url())
        .body(PING_CALL.to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.bytes().await.unwrap().len(), 28);

    server.shutdown.trigger();
    let result = tokio::time::timeout(Duration::from_secs(5), server.handle)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok());
}
