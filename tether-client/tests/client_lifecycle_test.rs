//! Client lifecycle integration tests
//!
//! Connection policies, the handshake and closing, against a real socket.

mod common;

use common::{eventually, MockWsServer, Reply};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether_client::{
    ClientBuilder, ClientConfig, ConnectPolicy, ConnectionState, Connector, Event, EventName,
    EventSink, TetherClient, Transport,
};
use tether_core::{Error, Result};

fn record_states(builder: ClientBuilder) -> (ClientBuilder, Arc<Mutex<Vec<ConnectionState>>>) {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    let builder = builder.on(EventName::ConnectionStatus, move |event| {
        if let Event::ConnectionStatus(state) = event {
            sink.lock().unwrap().push(*state);
        }
    });
    (builder, states)
}

#[tokio::test]
async fn test_immediate_connect_sequence() {
    let server = MockWsServer::new().await;
    let (builder, states) = record_states(
        ClientBuilder::new(server.url()).connect_policy(ConnectPolicy::Immediate),
    );
    let client = builder.build().unwrap();

    tokio::time::timeout(
        Duration::from_secs(5),
        client.wait_for_status(ConnectionState::Connected),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(
        *states.lock().unwrap(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Setup,
            ConnectionState::Connected
        ]
    );
    assert_eq!(server.connections(), 1);

    client.close();
    server.shutdown().await;
}

#[tokio::test]
async fn test_session_request_carries_context() {
    let server = MockWsServer::new().await;
    let client = TetherClient::new(
        ClientConfig::new(server.url())
            .with_connect_policy(ConnectPolicy::Immediate)
            .with_session_request(json!({"test": 123})),
    )
    .unwrap();

    let frame = server.next_frame_tagged("session_request").await.unwrap();
    assert_eq!(frame, json!(["session_request", {"test": 123}]));

    client.wait_for_status(ConnectionState::Connected).await.unwrap();
    client.close();
    server.shutdown().await;
}

#[tokio::test]
async fn test_server_replaces_session_context() {
    let server = MockWsServer::with_handler(|frame| match frame[0].as_str() {
        Some("session_request") => vec![Reply::Frame(common::session_accepted(Some(
            json!({"token": "renewed"}),
        )))],
        _ => Vec::new(),
    })
    .await;
    let client = ClientBuilder::new(server.url())
        .connect_policy(ConnectPolicy::Immediate)
        .session_request(json!({"token": "initial"}))
        .build()
        .unwrap();

    client.wait_for_status(ConnectionState::Connected).await.unwrap();
    assert_eq!(client.session_context(), Some(json!({"token": "renewed"})));

    client.close();
    server.shutdown().await;
}

#[tokio::test]
async fn test_manual_policy_waits_for_connect() {
    let server = MockWsServer::new().await;
    let client = ClientBuilder::new(server.url())
        .connect_policy(ConnectPolicy::Manual)
        .build()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.connection_status(), ConnectionState::Offline);
    assert_eq!(server.connections(), 0);

    client.connect().unwrap();
    client.wait_for_status(ConnectionState::Connected).await.unwrap();
    assert_eq!(server.connections(), 1);

    client.close();
    server.shutdown().await;
}

#[tokio::test]
async fn test_close_goes_offline() {
    let server = MockWsServer::new().await;
    let (builder, states) = record_states(
        ClientBuilder::new(server.url()).connect_policy(ConnectPolicy::Immediate),
    );
    let client = builder.build().unwrap();
    client.wait_for_status(ConnectionState::Connected).await.unwrap();

    client.close();
    client.wait_for_status(ConnectionState::Offline).await.unwrap();

    // Stays offline: no reconnect after a deliberate close
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.connection_status(), ConnectionState::Offline);
    assert_eq!(server.connections(), 1);
    assert_eq!(states.lock().unwrap().last(), Some(&ConnectionState::Offline));

    server.shutdown().await;
}

struct NoTransport;

impl Connector for NoTransport {
    fn open(&self, _url: &str, _events: EventSink) -> Result<Box<dyn Transport>> {
        Err(Error::NoTransportSupport("WebSocket is not available".to_string()))
    }
}

#[tokio::test]
async fn test_missing_transport_enters_error() {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    let client = ClientBuilder::new("ws://127.0.0.1:9/live")
        .connect_policy(ConnectPolicy::Immediate)
        .with_connector(NoTransport)
        .on(EventName::Error, move |event| {
            if let Event::Error(error) = event {
                sink.lock().unwrap().push(error.code().to_string());
            }
        })
        .build()
        .unwrap();

    client.wait_for_status(ConnectionState::Error).await.unwrap();
    assert_eq!(client.error().unwrap().code(), "no_websocket_support");
    assert_eq!(*errors.lock().unwrap(), vec!["no_websocket_support"]);
}

#[tokio::test]
async fn test_fail_fast_on_refused_connection() {
    // Bind then drop a listener so the port is very likely closed
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = ClientBuilder::new(format!("ws://{}", addr))
        .connect_policy(ConnectPolicy::Immediate)
        .fail_fast(true)
        .build()
        .unwrap();

    tokio::time::timeout(
        Duration::from_secs(5),
        client.wait_for_status(ConnectionState::Error),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(client.error().unwrap().code(), "transport_error");

    let error = client.run("add", json!({"a": 1, "b": 2})).await.unwrap_err();
    assert_eq!(error.code(), "client_error_state");
}

#[tokio::test]
async fn test_dropping_every_handle_closes_socket() {
    let server = MockWsServer::new().await;
    let client = ClientBuilder::new(server.url())
        .connect_policy(ConnectPolicy::Immediate)
        .build()
        .unwrap();
    client.wait_for_status(ConnectionState::Connected).await.unwrap();

    drop(client);

    // The socket is closed by the session task and nothing reconnects
    assert!(eventually(|| server.closed() == 1).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.connections(), 1);
    server.shutdown().await;
}
