//! Client behaviour against scripted and fake gaze servers.

use std::io;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;

use gazeshim_core::ipc::protocol::{self, ProtocolError, response_kind};
use gazeshim_core::ipc::{
    ConnectError, EyeRecord, GazesResponse, GetGazesRequest, HandshakeRequest, HandshakeResult,
    Request, Response, RetryPolicy, SocketConnector, TransportClient, TransportError,
};
use gazeshim_test_utils::{
    ConnectOutcome, FakeGazeServer, ScriptStep, ScriptedConnector, ServerBehavior,
};

fn policy(connect_attempts: u32, read_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        connect_attempts,
        connect_wait: Duration::from_millis(1),
        connect_timeout: Duration::from_millis(100),
        read_attempts,
        read_wait: Duration::from_millis(1000),
        write_timeout: Duration::from_millis(500),
    }
}

fn scripted_client(connector: &ScriptedConnector, policy: RetryPolicy) -> TransportClient {
    TransportClient::new(connector.boxed(), policy, protocol::PROTOCOL_VERSION)
}

fn socket_client(server: &FakeGazeServer) -> TransportClient {
    TransportClient::new(
        Box::new(SocketConnector::new("127.0.0.1", server.port())),
        policy(1, 10),
        protocol::PROTOCOL_VERSION,
    )
}

fn sample_gazes() -> GazesResponse {
    GazesResponse {
        left: EyeRecord::tracking([0.1, 0.0, -0.99]),
        right: EyeRecord {
            direction: [-0.1, 0.0, -0.99],
            gaze_valid: true,
            blink_valid: true,
            blink: true,
        },
    }
}

/// A gaze response delivered in three writes: all but six bytes, then
/// three, then the last three.
fn trickled_gazes(response: GazesResponse) -> Vec<ScriptStep> {
    let frame = response.encode();
    let split = frame.len() - 6;
    let pause = Duration::from_millis(20);
    vec![
        ScriptStep::Expect(GetGazesRequest::SIZE),
        ScriptStep::Send(frame[..split].to_vec()),
        ScriptStep::Pause(pause),
        ScriptStep::Send(frame[split..split + 3].to_vec()),
        ScriptStep::Pause(pause),
        ScriptStep::Send(frame[split + 3..].to_vec()),
    ]
}

#[tokio::test]
async fn test_handshake_and_gazes_over_socket() {
    let server = FakeGazeServer::accepting().await;
    server.set_gazes(sample_gazes());
    let mut client = socket_client(&server);

    client.connect().await.unwrap();
    assert!(client.is_connected());
    assert_eq!(client.connection_id(), Some(1));
    assert_eq!(
        server.handshakes(),
        vec![HandshakeRequest {
            protocol_version: protocol::PROTOCOL_VERSION,
            process_id: std::process::id(),
        }]
    );

    let gazes = client.get_gazes().await.unwrap();
    assert_eq!(gazes, sample_gazes());
    assert_eq!(server.gaze_requests(), 1);

    // Connecting again while connected reuses the stream.
    client.connect().await.unwrap();
    assert_eq!(server.connections(), 1);
    assert_eq!(server.handshakes().len(), 1);
    assert_eq!(client.connection_id(), Some(1));
}

#[tokio::test]
async fn test_request_without_connection() {
    let connector = ScriptedConnector::default();
    let mut client = scripted_client(&connector, policy(1, 3));
    assert!(matches!(
        client.get_gazes().await,
        Err(TransportError::NotConnected)
    ));
    assert_eq!(connector.attempts(), 0);
}

#[tokio::test]
async fn test_partial_reads_within_budget() {
    let mut script = ScriptStep::handshake_ok();
    script.extend(trickled_gazes(sample_gazes()));
    let connector = ScriptedConnector::new([ConnectOutcome::Accept(script)]);
    let mut client = scripted_client(&connector, policy(1, 3));

    client.connect().await.unwrap();
    assert_eq!(client.get_gazes().await.unwrap(), sample_gazes());
    assert!(client.is_connected());
}

#[test_log::test(tokio::test)]
async fn test_partial_reads_exhaust_budget() {
    let mut script = ScriptStep::handshake_ok();
    script.extend(trickled_gazes(sample_gazes()));
    let connector = ScriptedConnector::new([ConnectOutcome::Accept(script)]);
    let mut client = scripted_client(&connector, policy(1, 2));

    client.connect().await.unwrap();
    match client.get_gazes().await {
        Err(TransportError::RetryBudgetExhausted {
            attempts,
            received,
            expected,
        }) => {
            assert_eq!(attempts, 2);
            assert_eq!(received, GazesResponse::SIZE - 3);
            assert_eq!(expected, GazesResponse::SIZE);
        }
        other => panic!("expected exhausted read budget, got {other:?}"),
    }
    // The stream position is unknown now, so the connection is dropped.
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_error_frame_in_place_of_handshake() {
    let mut script = vec![ScriptStep::Expect(HandshakeRequest::SIZE)];
    script.push(ScriptStep::Send(protocol::error_frame(
        gazeshim_core::ipc::HandshakeResponse::SIZE,
    )));
    let connector = ScriptedConnector::new([ConnectOutcome::Accept(script)]);
    let mut client = scripted_client(&connector, policy(1, 3));

    match client.connect().await {
        Err(ConnectError::Handshake(TransportError::Protocol(ProtocolError::KindMismatch {
            expected,
            actual,
        }))) => {
            assert_eq!(expected, response_kind::HANDSHAKE_OK);
            assert_eq!(actual, response_kind::ERROR);
        }
        other => panic!("expected handshake kind mismatch, got {other:?}"),
    }
    assert!(!client.is_connected());
    assert_eq!(connector.received().len(), 1);

    // The server side sees end of stream.
    tokio::time::timeout(Duration::from_secs(2), async {
        while connector.client_closes() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("client never closed the stream");
}

#[tokio::test]
async fn test_error_handshake_closes_stream() {
    let server = FakeGazeServer::start(ServerBehavior::ErrorHandshake).await;
    let mut client = socket_client(&server);

    assert!(matches!(
        client.connect().await,
        Err(ConnectError::Handshake(_))
    ));
    assert!(!client.is_connected());

    // A later attempt opens a fresh stream.
    server.set_behavior(ServerBehavior::Accept);
    client.connect().await.unwrap();
    assert_eq!(server.connections(), 2);
    assert_eq!(client.connection_id(), Some(2));
}

#[tokio::test]
async fn test_rejected_handshake() {
    let server =
        FakeGazeServer::start(ServerBehavior::RejectHandshake(HandshakeResult::VersionMismatch))
            .await;
    let mut client = socket_client(&server);

    assert!(matches!(
        client.connect().await,
        Err(ConnectError::Rejected(HandshakeResult::VersionMismatch))
    ));
    assert!(!client.is_connected());
}

#[test_log::test(tokio::test)]
async fn test_busy_server_within_connect_budget() {
    let connector = ScriptedConnector::new([
        ConnectOutcome::Refuse(io::ErrorKind::ConnectionRefused),
        ConnectOutcome::Refuse(io::ErrorKind::WouldBlock),
        ConnectOutcome::Accept(ScriptStep::handshake_ok()),
    ]);
    let mut client = scripted_client(&connector, policy(3, 3));

    client.connect().await.unwrap();
    assert_eq!(connector.attempts(), 3);
}

#[tokio::test]
async fn test_connect_budget_exhausted() {
    let connector = ScriptedConnector::new([
        ConnectOutcome::Refuse(io::ErrorKind::ConnectionRefused),
        ConnectOutcome::Refuse(io::ErrorKind::ConnectionRefused),
        ConnectOutcome::Accept(ScriptStep::handshake_ok()),
    ]);
    let mut client = scripted_client(&connector, policy(2, 3));

    assert!(matches!(
        client.connect().await,
        Err(ConnectError::RetryBudgetExhausted { attempts: 2 })
    ));
    assert_eq!(connector.attempts(), 2);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_stalled_connect_is_bounded_and_retried() {
    let connector = ScriptedConnector::new([
        ConnectOutcome::Stall,
        ConnectOutcome::Stall,
        ConnectOutcome::Accept(ScriptStep::handshake_ok()),
    ]);
    let mut client = scripted_client(&connector, policy(3, 3));

    let started = Instant::now();
    client.connect().await.unwrap();
    assert_eq!(connector.attempts(), 3);
    assert!(client.is_connected());
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_stalled_connects_exhaust_budget() {
    let connector = ScriptedConnector::new([ConnectOutcome::Stall, ConnectOutcome::Stall]);
    let mut client = scripted_client(&connector, policy(2, 3));

    let started = Instant::now();
    assert!(matches!(
        client.connect().await,
        Err(ConnectError::RetryBudgetExhausted { attempts: 2 })
    ));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_listener_that_never_accepts() {
    // The kernel completes the TCP handshake from the backlog, but nobody
    // ever reads the request or answers it.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let mut client = TransportClient::new(
        Box::new(SocketConnector::new("127.0.0.1", port)),
        RetryPolicy {
            read_wait: Duration::from_millis(5),
            ..policy(1, 3)
        },
        protocol::PROTOCOL_VERSION,
    );

    let started = Instant::now();
    let result = tokio::time::timeout(Duration::from_secs(5), client.connect())
        .await
        .expect("connect never returned");
    assert!(matches!(
        result,
        Err(ConnectError::Handshake(TransportError::RetryBudgetExhausted {
            attempts: 3,
            received: 0,
            ..
        }))
    ));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!client.is_connected());
    drop(listener);
}

#[tokio::test]
async fn test_hard_connect_error_is_not_retried() {
    let connector = ScriptedConnector::new([
        ConnectOutcome::Refuse(io::ErrorKind::PermissionDenied),
        ConnectOutcome::Accept(ScriptStep::handshake_ok()),
    ]);
    let mut client = scripted_client(&connector, policy(5, 3));

    assert!(matches!(
        client.connect().await,
        Err(ConnectError::Unavailable(_))
    ));
    assert_eq!(connector.attempts(), 1);
}

#[test_log::test(tokio::test)]
async fn test_server_hangs_up_mid_session() {
    let server = FakeGazeServer::accepting().await;
    let mut client = socket_client(&server);
    client.connect().await.unwrap();
    client.get_gazes().await.unwrap();

    server.set_behavior(ServerBehavior::HangUp);
    assert!(matches!(
        client.get_gazes().await,
        Err(TransportError::ConnectionClosed { received: 0, .. })
    ));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_error_frame_keeps_connection() {
    let server = FakeGazeServer::start(ServerBehavior::ErrorOnGazes).await;
    let mut client = socket_client(&server);
    client.connect().await.unwrap();

    assert!(matches!(
        client.get_gazes().await,
        Err(TransportError::Protocol(ProtocolError::KindMismatch { .. }))
    ));
    // The whole frame was consumed, so the stream is still aligned.
    assert!(client.is_connected());

    server.set_behavior(ServerBehavior::Accept);
    server.set_gazes(sample_gazes());
    assert_eq!(client.get_gazes().await.unwrap(), sample_gazes());
}

#[tokio::test]
async fn test_silent_server_exhausts_read_budget() {
    let server = FakeGazeServer::start(ServerBehavior::Silent).await;
    let mut client = TransportClient::new(
        Box::new(SocketConnector::new("127.0.0.1", server.port())),
        RetryPolicy {
            read_wait: Duration::from_millis(5),
            ..policy(1, 3)
        },
        protocol::PROTOCOL_VERSION,
    );
    client.connect().await.unwrap();

    assert!(matches!(
        client.get_gazes().await,
        Err(TransportError::RetryBudgetExhausted {
            attempts: 3,
            received: 0,
            ..
        })
    ));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let server = FakeGazeServer::accepting().await;
    let mut client = socket_client(&server);
    client.connect().await.unwrap();

    client.disconnect().await;
    client.disconnect().await;
    assert!(!client.is_connected());
    assert!(matches!(
        client.get_gazes().await,
        Err(TransportError::NotConnected)
    ));
}
