//! Transport seam between the session driver and the network
//!
//! The driver never touches a socket directly. It asks a [`Connector`] to
//! open a [`Transport`] for a URL and receives everything that happens on
//! that transport as [`TransportEvent`]s through an [`EventSink`].
//!
//! Every transport is opened with a sink stamped with the driver's current
//! epoch. When the driver discards a transport it bumps the epoch, so any
//! event still in flight from the old transport is recognised as stale and
//! dropped.
//!
//! [`WsConnector`] is the production implementation on top of
//! `tokio-tungstenite`.

use futures::{SinkExt, StreamExt};
use tether_core::close::{CLOSE_ABNORMAL, CLOSE_NORMAL};
use tether_core::{Error, Result};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Close code reported when a close frame carried no status
const CLOSE_NO_STATUS: u16 = 1005;

/// Something that happened on a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The transport is ready to send
    Open,
    /// A text message arrived
    Message(String),
    /// A message arrived that cannot be read as text
    Undecodable(String),
    /// The transport failed before it opened
    Error(String),
    /// The transport closed after it opened
    Close { code: u16, reason: String },
}

/// Where a transport reports its events
#[derive(Debug, Clone)]
pub struct EventSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl EventSink {
    pub(crate) fn new(epoch: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { epoch, tx }
    }

    /// Report an event; returns `false` once the session driver is gone
    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx.send((self.epoch, event)).is_ok()
    }
}

/// An open (or opening) transport
pub trait Transport: Send {
    /// Queue a text message
    fn send(&mut self, text: String) -> Result<()>;

    /// Close the transport; no further events are expected after this
    fn close(&mut self, code: Option<u16>);
}

/// Factory for transports
pub trait Connector: Send + Sync {
    /// Start opening a transport to `url`
    ///
    /// Returns `Error::NoTransportSupport` when no transport can be created
    /// for this URL at all. Failures while connecting are reported later as
    /// `TransportEvent::Error`.
    fn open(&self, url: &str, events: EventSink) -> Result<Box<dyn Transport>>;
}

enum Outgoing {
    Text(String),
    Close(Option<u16>),
}

/// WebSocket connector backed by `tokio-tungstenite`
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(&self, url: &str, events: EventSink) -> Result<Box<dyn Transport>> {
        let request = url
            .into_client_request()
            .map_err(|e| Error::NoTransportSupport(format!("{}: {}", url, e)))?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::NoTransportSupport(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        runtime.spawn(run_socket(request, rx, events));

        Ok(Box::new(WsTransport { outgoing: tx }))
    }
}

struct WsTransport {
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

impl Transport for WsTransport {
    fn send(&mut self, text: String) -> Result<()> {
        self.outgoing
            .send(Outgoing::Text(text))
            .map_err(|_| Error::Transport("WebSocket task has stopped".to_string()))
    }

    fn close(&mut self, code: Option<u16>) {
        let _ = self.outgoing.send(Outgoing::Close(code));
    }
}

/// Owns one WebSocket from connect to close
async fn run_socket(
    request: Request,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    events: EventSink,
) {
    let connect = connect_async(request);
    tokio::pin!(connect);

    let stream = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok((stream, _)) => break stream,
                Err(e) => {
                    tracing::debug!(error = %e, "WebSocket connect failed");
                    events.send(TransportEvent::Error(e.to_string()));
                    return;
                }
            },
            command = outgoing.recv() => match command {
                Some(Outgoing::Text(_)) => {
                    tracing::warn!("Dropping message queued before the WebSocket opened");
                }
                // Closed or discarded before the handshake finished
                Some(Outgoing::Close(_)) | None => return,
            },
        }
    };

    if !events.send(TransportEvent::Open) {
        return;
    }
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    events.send(TransportEvent::Message(text));
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        events.send(TransportEvent::Message(text));
                    }
                    Err(e) => {
                        tracing::debug!(len = e.as_bytes().len(), "Binary message is not UTF-8");
                        events.send(TransportEvent::Undecodable(format!(
                            "binary message is not valid UTF-8: {}",
                            e.utf8_error()
                        )));
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                        None => (CLOSE_NO_STATUS, String::new()),
                    };
                    events.send(TransportEvent::Close { code, reason });
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    events.send(TransportEvent::Close { code: CLOSE_ABNORMAL, reason: e.to_string() });
                    return;
                }
                None => {
                    events.send(TransportEvent::Close {
                        code: CLOSE_ABNORMAL,
                        reason: "connection lost".to_string(),
                    });
                    return;
                }
            },
            command = outgoing.recv() => match command {
                Some(Outgoing::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        events.send(TransportEvent::Close { code: CLOSE_ABNORMAL, reason: e.to_string() });
                        return;
                    }
                }
                Some(Outgoing::Close(code)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code.unwrap_or(CLOSE_NORMAL)),
                        reason: "".into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    return;
                }
                None => {
                    let _ = write.close().await;
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory connector driven by the test

    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Script {
        sinks: Vec<EventSink>,
        urls: Vec<String>,
        sent: Vec<String>,
        closes: Vec<Option<u16>>,
        unavailable: bool,
    }

    /// Connector that records what the driver does and lets the test play
    /// the transport's side
    #[derive(Clone, Default)]
    pub(crate) struct ScriptedConnector {
        script: Arc<Mutex<Script>>,
    }

    impl ScriptedConnector {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every subsequent `open` fail with `NoTransportSupport`
        pub fn set_unavailable(&self, unavailable: bool) {
            self.script.lock().unwrap().unavailable = unavailable;
        }

        /// Deliver an event from the most recently opened transport
        pub fn emit(&self, event: TransportEvent) {
            let sink = self.script.lock().unwrap().sinks.last().cloned();
            sink.expect("no transport has been opened").send(event);
        }

        /// Deliver an event from the transport opened `index`-th
        pub fn emit_from(&self, index: usize, event: TransportEvent) {
            let sink = self.script.lock().unwrap().sinks[index].clone();
            sink.send(event);
        }

        pub fn open_count(&self) -> usize {
            self.script.lock().unwrap().sinks.len()
        }

        pub fn urls(&self) -> Vec<String> {
            self.script.lock().unwrap().urls.clone()
        }

        /// Every frame sent so far, parsed
        pub fn sent(&self) -> Vec<serde_json::Value> {
            self.script
                .lock()
                .unwrap()
                .sent
                .iter()
                .map(|text| serde_json::from_str(text).unwrap())
                .collect()
        }

        pub fn closes(&self) -> Vec<Option<u16>> {
            self.script.lock().unwrap().closes.clone()
        }
    }

    impl Connector for ScriptedConnector {
        fn open(&self, url: &str, events: EventSink) -> Result<Box<dyn Transport>> {
            let mut script = self.script.lock().unwrap();
            if script.unavailable {
                return Err(Error::NoTransportSupport("scripted".to_string()));
            }
            script.sinks.push(events);
            script.urls.push(url.to_string());
            Ok(Box::new(ScriptedTransport {
                script: self.script.clone(),
            }))
        }
    }

    struct ScriptedTransport {
        script: Arc<Mutex<Script>>,
    }

    impl Transport for ScriptedTransport {
        fn send(&mut self, text: String) -> Result<()> {
            self.script.lock().unwrap().sent.push(text);
            Ok(())
        }

        fn close(&mut self, code: Option<u16>) {
            self.script.lock().unwrap().closes.push(code);
        }
    }
}
