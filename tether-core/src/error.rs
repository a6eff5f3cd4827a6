//! Error types for tether
//!
//! This module defines the single error type surfaced by every tether
//! operation, plus the wire-format error object carried inside
//! `rpc_response` and `session_response` frames.
//!
//! # Error Categories
//!
//! - **Usage errors**: raised synchronously for malformed call arguments or
//!   configuration. They never touch the network and are never retried.
//!   (`InvalidFunctionName`, `InvalidConfig`)
//! - **Transport errors**: the transport could not be constructed, failed to
//!   connect, or was closed by the peer. (`NoTransportSupport`, `Transport`,
//!   `ConnectionTerminated`)
//! - **Protocol errors**: malformed or unexpected frames; always terminal for
//!   the current session. (`Protocol`, `SessionRejected`, `EndConnection`)
//! - **Remote errors**: structured errors returned by the server for a single
//!   RPC. They never affect the connection. (`Remote`)
//! - **Local outcomes**: synthesized by the client for in-flight calls.
//!   (`ConnectionDropped`, `ErrorState`, `Timeout`, `ClientClosed`)
//!
//! Every variant maps to a stable classification string through
//! [`Error::code`], which is what callers should match on when they only need
//! to know the kind of failure.
//!
//! # Examples
//!
//! ```rust
//! use tether_core::{Error, RemoteError};
//!
//! let dropped = Error::ConnectionDropped;
//! assert_eq!(dropped.code(), "connection_dropped");
//!
//! let remote = Error::Remote(RemoteError::new("no go, buddy").with_code("bad_call"));
//! assert_eq!(remote.code(), "bad_call");
//! ```

use crate::close::CloseClass;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Result type for tether operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for tether operations
///
/// The type is `Clone` so that a single failure can be delivered to every
/// pending call that it aborts and still be recorded as the client's last
/// error.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Structured error returned by the server for one RPC
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Function name is empty or longer than the allowed bound
    #[error("Invalid function name: {0}")]
    InvalidFunctionName(String),

    /// Configuration value is missing or malformed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A transport could not be constructed at all
    ///
    /// Raised when the URL cannot be turned into a connection request or no
    /// async runtime is available to drive the socket.
    #[error("No WebSocket support: {0}")]
    NoTransportSupport(String),

    /// The transport failed while connecting
    #[error("Transport error: {0}")]
    Transport(String),

    /// The peer closed an established transport
    #[error("Connection terminated ({class}): {message}")]
    ConnectionTerminated {
        /// Classification of the close code
        class: CloseClass,
        /// Close reason, or the message announced by `end_connection`
        message: String,
        /// Server hint in milliseconds, 0 when absent
        retry_after: u64,
    },

    /// Malformed, unrecognized or out-of-place frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server refused the session during the handshake
    #[error("Session rejected: {0}")]
    SessionRejected(RemoteError),

    /// The server announced it is ending the connection
    #[error("Connection ended by server: {message}")]
    EndConnection {
        /// Reason given by the server
        message: String,
        /// Server hint in milliseconds, 0 when absent
        retry_after: u64,
    },

    /// The session was lost before a response arrived
    #[error("Connection dropped before a response was received")]
    ConnectionDropped,

    /// `run()` was called while the client sits in the `error` state
    #[error("run() cannot be called while the client is in an error state")]
    ErrorState,

    /// A value could not be converted to or from JSON
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The caller-supplied per-call timeout elapsed
    #[error("Request timeout")]
    Timeout,

    /// The client's event loop is no longer running
    #[error("Client closed")]
    ClientClosed,
}

impl Error {
    /// Stable classification string for this error
    ///
    /// Remote errors report the server-supplied code when there is one.
    pub fn code(&self) -> &str {
        match self {
            Error::Remote(e) => e.code.as_deref().unwrap_or("remote_error"),
            Error::InvalidFunctionName(_) => "invalid_function_name",
            Error::InvalidConfig(_) => "invalid_config",
            Error::NoTransportSupport(_) => "no_websocket_support",
            Error::Transport(_) => "transport_error",
            Error::ConnectionTerminated { class, .. } => class.as_str(),
            Error::Protocol(_) => "protocol_error",
            Error::SessionRejected(_) => "session_rejected",
            Error::EndConnection { .. } => "end_connection",
            Error::ConnectionDropped => "connection_dropped",
            Error::ErrorState => "client_error_state",
            Error::Serialization(_) => "serialization",
            Error::Timeout => "timeout",
            Error::ClientClosed => "client_closed",
        }
    }

    /// Server-provided retry hint in milliseconds, if any
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Error::ConnectionTerminated { retry_after, .. }
            | Error::EndConnection { retry_after, .. }
                if *retry_after > 0 =>
            {
                Some(*retry_after)
            }
            _ => None,
        }
    }

    /// Whether this is a usage error raised before any network activity
    pub fn is_usage(&self) -> bool {
        matches!(self, Error::InvalidFunctionName(_) | Error::InvalidConfig(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Error object carried on the wire
///
/// Appears as the `error` field of `rpc_response` and `session_response`
/// frames. The server is free to use string or numeric codes; both are kept
/// as strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Human-readable description
    #[serde(default)]
    pub message: String,

    /// Application-defined error code
    #[serde(
        default,
        deserialize_with = "code_as_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub code: Option<String>,

    /// Additional error details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RemoteError {
    /// Create a remote error with only a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            data: None,
        }
    }

    /// Attach an application error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach additional error details
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl std::fmt::Display for RemoteError {
    /// Formats as "[code] message", or just the message without a code
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

fn code_as_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}
