//! Connection state machine
//!
//! The lifecycle of a client is a small closed set of states driven by
//! triggers coming from callers and from the transport:
//!
//! ```text
//!            connect()               open               session ok
//! offline ─────────────→ connecting ─────→ setup ───────────────→ connected
//!    ↑                     │   ↺ retry      │                         │
//!    │                     │                │ rejected / violation    │ retry_later close
//!    │                     │                │ / any other close       │
//!    │                     ↓                ↓                         ↓
//!    │                   error ←────────────┴──────────────── connecting
//!    │                     │
//!    └──── close() ────────┘ (close() is accepted from every state)
//! ```
//!
//! [`transition`] is a pure function of `(state, trigger)`. Everything the
//! client does on entering a state (opening transports, flushing the outbox,
//! aborting calls) is performed by the session driver, keyed by the state
//! being entered.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tether_core::CloseClass;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport and no attempt in progress
    Offline,
    /// Opening a transport, or waiting to retry
    Connecting,
    /// Transport open, session handshake in flight
    Setup,
    /// Session established; calls are sent immediately
    Connected,
    /// Terminal failure; `connect()` is required to leave it
    Error,
}

impl ConnectionState {
    /// Stable string form
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Offline => "offline",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Setup => "setup",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        }
    }

    /// Whether a transport handle may exist in this state
    pub fn has_transport(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Setup | ConnectionState::Connected
        )
    }

    /// Numeric value reported by the connection state gauge
    pub(crate) fn metric_value(&self) -> i64 {
        match self {
            ConnectionState::Offline => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Setup => 2,
            ConnectionState::Connected => 3,
            ConnectionState::Error => 4,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Caller asked to connect, or a call was issued under the auto policy
    Connect,
    /// The transport reported it is open
    TransportOpened,
    /// A transport could not be constructed at all
    TransportUnavailable,
    /// The transport failed before opening
    ///
    /// `retry` is the delay before the next attempt, or `None` when retries
    /// are disabled or exhausted.
    TransportFailed { retry: Option<Duration> },
    /// The server accepted the session
    SessionAccepted,
    /// The server refused the session
    SessionRejected,
    /// A malformed, unknown or out-of-place frame arrived
    ProtocolViolation,
    /// An open transport was closed
    ///
    /// `retry` only matters for recoverable close classes.
    TransportClosed {
        class: CloseClass,
        retry: Option<Duration>,
    },
    /// Caller asked to close
    Close,
}

/// Compute the successor state
///
/// Returns `None` when the trigger does not apply to the current state, in
/// which case it is ignored.
pub fn transition(state: ConnectionState, trigger: &Trigger) -> Option<ConnectionState> {
    use ConnectionState::*;

    match (state, trigger) {
        (_, Trigger::Close) if state != Offline => Some(Offline),

        (Offline | Error, Trigger::Connect) => Some(Connecting),

        (Connecting, Trigger::TransportOpened) => Some(Setup),
        (Connecting, Trigger::TransportUnavailable) => Some(Error),
        (Connecting, Trigger::TransportFailed { retry: Some(_) }) => Some(Connecting),
        (Connecting, Trigger::TransportFailed { retry: None }) => Some(Error),

        (Setup, Trigger::SessionAccepted) => Some(Connected),
        (Setup, Trigger::SessionRejected) => Some(Error),

        (Setup | Connected, Trigger::ProtocolViolation) => Some(Error),
        (Setup | Connected, Trigger::TransportClosed { class, retry }) => match class {
            CloseClass::RetryLater if retry.is_some() => Some(Connecting),
            // Only an established session may be ended cleanly by the server
            CloseClass::CloseNormal if state == Connected => Some(Offline),
            _ => Some(Error),
        },

        _ => None,
    }
}
