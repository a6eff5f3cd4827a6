//! Wire frames for the tether session protocol
//!
//! Every frame travels as a JSON array whose first element is a string tag
//! and whose second element is the payload:
//!
//! ```text
//! ["session_request",  ctx | null]                               client → server
//! ["session_response", {"ok": bool, "result"?: any, "error"?: {..}}]  server → client
//! ["rpc_request",      {"requestId": int, "function": str, "arguments": any}]
//! ["rpc_response",     {"requestId": int, "result"?: any, "error"?: {..}}]
//! ["user_event",       {"name": str, "data": any}]                server → client
//! ["end_connection",   {"message"?: str, "retryAfter"?: int}]     server → client
//! ```
//!
//! A frame is modelled as the [`Frame`] enum; conversion to and from the
//! tagged-array form lives in [`Frame::to_value`] and [`Frame::from_value`].
//! String-level encoding is in [`crate::codec`].

use crate::error::{Error, RemoteError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tag of the handshake frame sent by the client
pub const SESSION_REQUEST: &str = "session_request";
/// Tag of the handshake reply sent by the server
pub const SESSION_RESPONSE: &str = "session_response";
/// Tag of an outgoing remote call
pub const RPC_REQUEST: &str = "rpc_request";
/// Tag of the reply to a remote call
pub const RPC_RESPONSE: &str = "rpc_response";
/// Tag of an unsolicited server event
pub const USER_EVENT: &str = "user_event";
/// Tag announcing that the server is ending the connection
pub const END_CONNECTION: &str = "end_connection";

/// Payload of a `session_response` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResponse {
    /// Explicit success flag; absent means "success unless `error` is set"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,

    /// Replacement session context supplied by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Reason the session was refused
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

impl SessionResponse {
    /// Successful handshake
    pub fn accepted(result: Option<Value>) -> Self {
        Self {
            ok: Some(true),
            result,
            error: None,
        }
    }

    /// Refused handshake
    pub fn rejected(error: RemoteError) -> Self {
        Self {
            ok: Some(false),
            result: None,
            error: Some(error),
        }
    }

    /// Whether the server accepted the session
    pub fn is_ok(&self) -> bool {
        self.ok.unwrap_or(self.error.is_none())
    }
}

/// Payload of an `rpc_request` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Correlation id, unique for the lifetime of the client
    #[serde(rename = "requestId")]
    pub request_id: u64,

    /// Server-side handler function to run
    pub function: String,

    /// Argument passed to the handler; omitted on the wire when null
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub arguments: Value,
}

impl RpcRequest {
    /// Create a new request payload
    pub fn new(request_id: u64, function: impl Into<String>, arguments: Value) -> Self {
        Self {
            request_id,
            function: function.into(),
            arguments,
        }
    }
}

/// Payload of an `rpc_response` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Id of the request this answers
    #[serde(rename = "requestId")]
    pub request_id: u64,

    /// Handler result, when the call succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Handler error, when the call failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

impl RpcResponse {
    /// Successful response
    pub fn success(request_id: u64, result: Value) -> Self {
        Self {
            request_id,
            result: Some(result),
            error: None,
        }
    }

    /// Failed response
    pub fn failure(request_id: u64, error: RemoteError) -> Self {
        Self {
            request_id,
            result: None,
            error: Some(error),
        }
    }

    /// Convert into the outcome delivered to the caller
    ///
    /// An error field wins over a result field; a response with neither
    /// resolves to `null`.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(error) => Err(Error::Remote(error)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Payload of a `user_event` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEvent {
    /// Event name chosen by the server
    pub name: String,

    /// Event data, relayed verbatim
    #[serde(default)]
    pub data: Value,
}

/// Payload of an `end_connection` frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndConnection {
    /// Reason for ending the connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Suggested delay in milliseconds before reconnecting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// A decoded protocol frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Handshake carrying the caller's session context
    SessionRequest(Option<Value>),
    /// Handshake outcome
    SessionResponse(SessionResponse),
    /// Remote call
    RpcRequest(RpcRequest),
    /// Remote call outcome
    RpcResponse(RpcResponse),
    /// Unsolicited server event
    UserEvent(UserEvent),
    /// Server is terminating the connection
    EndConnection(EndConnection),
}

impl Frame {
    /// The wire tag of this frame
    pub fn tag(&self) -> &'static str {
        match self {
            Frame::SessionRequest(_) => SESSION_REQUEST,
            Frame::SessionResponse(_) => SESSION_RESPONSE,
            Frame::RpcRequest(_) => RPC_REQUEST,
            Frame::RpcResponse(_) => RPC_RESPONSE,
            Frame::UserEvent(_) => USER_EVENT,
            Frame::EndConnection(_) => END_CONNECTION,
        }
    }

    /// Build the tagged-array representation
    pub fn to_value(&self) -> Result<Value> {
        let payload = match self {
            Frame::SessionRequest(ctx) => ctx.clone().unwrap_or(Value::Null),
            Frame::SessionResponse(p) => serde_json::to_value(p)?,
            Frame::RpcRequest(p) => serde_json::to_value(p)?,
            Frame::RpcResponse(p) => serde_json::to_value(p)?,
            Frame::UserEvent(p) => serde_json::to_value(p)?,
            Frame::EndConnection(p) => serde_json::to_value(p)?,
        };
        Ok(Value::Array(vec![Value::String(self.tag().to_string()), payload]))
    }

    /// Parse the tagged-array representation
    ///
    /// Anything that is not an array starting with a known string tag, or
    /// whose payload does not match the tag, is a protocol error.
    pub fn from_value(value: Value) -> Result<Self> {
        let mut items = match value {
            Value::Array(items) => items.into_iter(),
            other => {
                return Err(Error::Protocol(format!(
                    "frame must be a tagged array, got {}",
                    json_kind(&other)
                )))
            }
        };

        let tag = match items.next() {
            Some(Value::String(tag)) => tag,
            Some(other) => {
                return Err(Error::Protocol(format!(
                    "frame tag must be a string, got {}",
                    json_kind(&other)
                )))
            }
            None => return Err(Error::Protocol("empty frame".to_string())),
        };
        let payload = items.next().unwrap_or(Value::Null);

        let frame = match tag.as_str() {
            SESSION_REQUEST => Frame::SessionRequest(match payload {
                Value::Null => None,
                ctx => Some(ctx),
            }),
            SESSION_RESPONSE => Frame::SessionResponse(payload_as(&tag, payload)?),
            RPC_REQUEST => Frame::RpcRequest(payload_as(&tag, payload)?),
            RPC_RESPONSE => Frame::RpcResponse(payload_as(&tag, payload)?),
            USER_EVENT => Frame::UserEvent(payload_as(&tag, payload)?),
            END_CONNECTION => Frame::EndConnection(match payload {
                Value::Null => EndConnection::default(),
                p => payload_as(&tag, p)?,
            }),
            unknown => {
                return Err(Error::Protocol(format!("unknown command: {}", unknown)));
            }
        };

        Ok(frame)
    }
}

fn payload_as<T: serde::de::DeserializeOwned>(tag: &str, payload: Value) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|e| Error::Protocol(format!("malformed {} payload: {}", tag, e)))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
