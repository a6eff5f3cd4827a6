//! Event dispatch for client lifecycle and server events
//!
//! Listeners are keyed by [`EventName`]. Each registration is either
//! persistent (`on`) or one-shot (`once`), and a wildcard registration
//! ([`EventName::Any`]) observes every event.
//!
//! # Dispatch Rules
//!
//! - Listeners for one name run in registration order.
//! - Name-specific listeners run before wildcard listeners.
//! - The listener set is snapshotted before any listener runs, so a listener
//!   added during a dispatch is not invoked by that dispatch, and a one-shot
//!   listener is removed before it runs.
//!
//! # Examples
//!
//! ```rust
//! use tether_client::{Event, EventDispatcher, EventName};
//!
//! let mut dispatcher = EventDispatcher::new();
//! dispatcher.on(EventName::user("tick"), |event| {
//!     if let Event::User { data, .. } = event {
//!         println!("tick: {}", data);
//!     }
//! });
//! ```

use crate::connection_state::ConnectionState;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tether_core::{EndConnection, Error, Frame, RpcResponse};

/// Name under which an event is dispatched
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventName {
    /// The connection state changed
    ConnectionStatus,
    /// The client entered the error state
    Error,
    /// A frame could not be decoded or was not allowed in the current state
    ProtocolError,
    /// A retry has been scheduled
    Reconnecting,
    /// A frame was received
    IncomingMessage,
    /// A frame was sent
    OutgoingMessage,
    /// An RPC response was received, matched or not
    RpcResponse,
    /// The server announced it is ending the connection
    EndConnection,
    /// A server `user_event` with this name
    User(String),
    /// Every event
    Any,
}

impl EventName {
    /// Name of a server-defined event
    pub fn user(name: impl Into<String>) -> Self {
        EventName::User(name.into())
    }

    /// Wire-style name of this event
    pub fn as_str(&self) -> &str {
        match self {
            EventName::ConnectionStatus => "connection_status",
            EventName::Error => "error",
            EventName::ProtocolError => "protocol_error",
            EventName::Reconnecting => "reconnecting",
            EventName::IncomingMessage => "incoming_message",
            EventName::OutgoingMessage => "outgoing_message",
            EventName::RpcResponse => "rpc_response",
            EventName::EndConnection => "end_connection",
            EventName::User(name) => name,
            EventName::Any => "*",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Built-in names map to their variants; anything else is a user event.
impl From<&str> for EventName {
    fn from(name: &str) -> Self {
        match name {
            "connection_status" => EventName::ConnectionStatus,
            "error" => EventName::Error,
            "protocol_error" => EventName::ProtocolError,
            "reconnecting" => EventName::Reconnecting,
            "incoming_message" => EventName::IncomingMessage,
            "outgoing_message" => EventName::OutgoingMessage,
            "rpc_response" => EventName::RpcResponse,
            "end_connection" => EventName::EndConnection,
            "*" => EventName::Any,
            other => EventName::User(other.to_string()),
        }
    }
}

/// Event delivered to listeners
#[derive(Debug, Clone)]
pub enum Event {
    /// New connection state
    ConnectionStatus(ConnectionState),
    /// Failure that moved the client into the error state
    Error(Error),
    /// Decode failure or out-of-place frame
    ProtocolError(Error),
    /// Delay before the next connection attempt
    Reconnecting { delay: Duration },
    /// Decoded inbound frame
    IncomingMessage(Frame),
    /// Encoded outbound frame
    OutgoingMessage(Frame),
    /// Raw RPC response, delivered whether or not a call was waiting for it
    RpcResponse(RpcResponse),
    /// Server-announced end of connection
    EndConnection(EndConnection),
    /// Server `user_event`
    User { name: String, data: Value },
}

impl Event {
    /// Name this event is dispatched under
    pub fn name(&self) -> EventName {
        match self {
            Event::ConnectionStatus(_) => EventName::ConnectionStatus,
            Event::Error(_) => EventName::Error,
            Event::ProtocolError(_) => EventName::ProtocolError,
            Event::Reconnecting { .. } => EventName::Reconnecting,
            Event::IncomingMessage(_) => EventName::IncomingMessage,
            Event::OutgoingMessage(_) => EventName::OutgoingMessage,
            Event::RpcResponse(_) => EventName::RpcResponse,
            Event::EndConnection(_) => EventName::EndConnection,
            Event::User { name, .. } => EventName::User(name.clone()),
        }
    }
}

/// Listener callback
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle returned by `on` and `once`, used to remove the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    callback: Listener,
    once: bool,
}

/// Listener table keyed by event name
#[derive(Default)]
pub struct EventDispatcher {
    listeners: HashMap<EventName, Vec<Registration>>,
    next_id: u64,
}

impl EventDispatcher {
    /// Create an empty dispatcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener invoked on every matching event
    pub fn on<F>(&mut self, name: EventName, callback: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.insert(name, Arc::new(callback), false)
    }

    /// Register a listener invoked on the next matching event only
    pub fn once<F>(&mut self, name: EventName, callback: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.insert(name, Arc::new(callback), true)
    }

    pub(crate) fn insert(&mut self, name: EventName, callback: Listener, once: bool) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners
            .entry(name)
            .or_default()
            .push(Registration { id, callback, once });
        id
    }

    /// Remove one listener; returns whether it was registered
    pub fn off(&mut self, id: ListenerId) -> bool {
        let mut removed = false;
        self.listeners.retain(|_, registrations| {
            let before = registrations.len();
            registrations.retain(|r| r.id != id);
            removed |= registrations.len() != before;
            !registrations.is_empty()
        });
        removed
    }

    /// Remove every listener for `name`, or every listener when `None`
    pub fn remove_all(&mut self, name: Option<&EventName>) {
        match name {
            Some(name) => {
                self.listeners.remove(name);
            }
            None => self.listeners.clear(),
        }
    }

    /// Number of listeners registered under `name`
    pub fn listener_count(&self, name: &EventName) -> usize {
        self.listeners.get(name).map_or(0, Vec::len)
    }

    /// Collect the listeners to run for `event`, dropping one-shot entries
    /// from the table as they are collected
    pub fn snapshot(&mut self, event: &Event) -> Vec<Listener> {
        let mut selected = Vec::new();
        for name in [event.name(), EventName::Any] {
            if let Some(registrations) = self.listeners.get_mut(&name) {
                selected.extend(registrations.iter().map(|r| r.callback.clone()));
                registrations.retain(|r| !r.once);
                if registrations.is_empty() {
                    self.listeners.remove(&name);
                }
            }
        }
        selected
    }

    /// Dispatch an event to the current listeners
    pub fn emit(&mut self, event: &Event) {
        for listener in self.snapshot(event) {
            invoke(&listener, event);
        }
    }
}

/// Dispatcher shared between client handles and the session driver
///
/// The lock is only held while the table is read or modified, never while a
/// listener runs, so listeners may register or remove listeners themselves.
#[derive(Clone, Default)]
pub(crate) struct SharedDispatcher {
    inner: Arc<Mutex<EventDispatcher>>,
}

impl SharedDispatcher {
    pub(crate) fn new(dispatcher: EventDispatcher) -> Self {
        Self {
            inner: Arc::new(Mutex::new(dispatcher)),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, EventDispatcher> {
        // A panicking listener never holds the lock, so the table stays consistent
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn emit(&self, event: Event) {
        let listeners = self.lock().snapshot(&event);
        for listener in listeners {
            invoke(&listener, &event);
        }
    }
}

fn invoke(listener: &Listener, event: &Event) {
    if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
        tracing::error!(event = %event.name(), "Event listener panicked");
    }
}
