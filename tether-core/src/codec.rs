//! Codec for tether frame serialization and deserialization
//!
//! This module turns [`Frame`] values into the JSON text carried by the
//! transport and back again.
//!
//! # Error Handling
//!
//! Decoding never panics and never lets a serde error escape as-is:
//! - Text that is not JSON → `Error::Protocol("invalid JSON ...")`
//! - JSON that is not a tagged array, or has an unknown tag or a payload that
//!   does not fit the tag → `Error::Protocol(...)`
//!
//! Callers treat every decode failure the same way as an unrecognized tag:
//! it is a protocol violation for the current session.
//!
//! # Examples
//!
//! ```rust
//! use tether_core::{codec, Frame, RpcRequest};
//! use serde_json::json;
//!
//! let frame = Frame::RpcRequest(RpcRequest::new(1, "add", json!({"a": 5, "b": 3})));
//! let text = codec::encode(&frame).unwrap();
//!
//! let decoded = codec::decode(&text).unwrap();
//! assert_eq!(decoded, frame);
//! ```

use crate::error::{Error, Result};
use crate::frame::Frame;
use serde::Serialize;

/// Encode a frame to its JSON text form
///
/// # Errors
///
/// Returns `Error::Serialization` if a payload value cannot be represented
/// as JSON.
pub fn encode(frame: &Frame) -> Result<String> {
    let value = frame.to_value()?;
    encode_value(&value)
}

/// Encode any serializable value to JSON text
pub fn encode_value<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode JSON text into a frame
///
/// # Errors
///
/// Returns `Error::Protocol` for text that is not JSON or JSON that is not a
/// well-formed frame.
pub fn decode(data: &str) -> Result<Frame> {
    let value = decode_value(data)?;
    Frame::from_value(value)
}

/// Decode JSON text into a raw value without interpreting it as a frame
pub fn decode_value(data: &str) -> Result<serde_json::Value> {
    serde_json::from_str(data).map_err(|e| Error::Protocol(format!("invalid JSON: {}", e)))
}
