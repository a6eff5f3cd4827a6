//! Core wire types and codec for tether
//!
//! This crate holds everything about the tether session protocol that does
//! not depend on a live connection:
//!
//! - **Frames**: the tagged-array messages exchanged with the server
//! - **Codec**: text encoding and decoding of frames
//! - **Close codes**: classification of transport close codes
//! - **Error handling**: the error type shared by every tether crate
//! - **Observability**: tracing subscriber and OpenTelemetry bootstrap
//!
//! # Architecture
//!
//! The crate is transport-agnostic. `tether-client` builds the connection
//! state machine and the WebSocket transport on top of it.
//!
//! # Example
//!
//! ```rust
//! use tether_core::{codec, Frame, RpcRequest};
//!
//! let request = Frame::RpcRequest(RpcRequest::new(1, "add", serde_json::json!({"a": 5, "b": 3})));
//! let text = codec::encode(&request).unwrap();
//!
//! let decoded = codec::decode(&text).unwrap();
//! assert_eq!(decoded.tag(), "rpc_request");
//! ```

pub mod close;
pub mod codec;
pub mod error;
pub mod frame;
pub mod observability;

pub use close::CloseClass;
pub use error::{Error, RemoteError, Result};
pub use frame::{EndConnection, Frame, RpcRequest, RpcResponse, SessionResponse, UserEvent};
pub use observability::{init_observability, shutdown_observability, ObservabilityConfig};
