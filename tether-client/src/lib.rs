//! Session-oriented RPC client over WebSocket
//!
//! This crate provides a client that keeps a logical session with a tether
//! server alive across transport failures. Callers connect once and run
//! remote functions; the client buffers calls until a session exists,
//! correlates responses, and reconnects with backoff when the connection is
//! lost for a recoverable reason.
//!
//! # Core Features
//!
//! - **Connection state machine**: `offline`, `connecting`, `setup`,
//!   `connected` and `error`, observable through events and `wait_for_status`
//! - **Remote calls**: `run()` with request ids and exactly-once completion
//! - **Outbox**: calls made before a session exists are sent in order once
//!   it is established
//! - **Reconnection**: exponential backoff with jitter by default
//! - **Events**: status changes, errors, raw frames and server user events
//! - **Observability**: OpenTelemetry integration for traces and metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tether_client::{ClientConfig, TetherClient};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = TetherClient::new(
//!         ClientConfig::new("https://example.com/live")
//!             .with_session_request(json!({"token": "abc"})),
//!     )?;
//!
//!     // Server events
//!     client.on("price_update", |event| {
//!         println!("Event: {:?}", event);
//!     });
//!
//!     // The first call opens the connection under the default policy
//!     let sum = client.run("add", json!({"a": 5, "b": 3})).await?;
//!     println!("Result: {}", sum);
//!
//!     client.close();
//!     Ok(())
//! }
//! ```
//!
//! # With Reconnection Tuning
//!
//! ```rust,no_run
//! use tether_client::{ClientBuilder, ConnectPolicy, ExponentialBackoff};
//! use std::time::Duration;
//!
//! # async fn example() -> tether_core::Result<()> {
//! let client = ClientBuilder::new("wss://example.com/live")
//!     .connect_policy(ConnectPolicy::Manual)
//!     .with_reconnect(Box::new(
//!         ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(30))
//!             .with_max_attempts(10),
//!     ))
//!     .build()?;
//! client.connect()?;
//! # Ok(())
//! # }
//! ```

mod client;
mod client_builder;
mod config;
mod connection_state;
mod events;
mod metrics;
mod outbox;
mod reconnect;
mod request;
mod session;
mod transport;

pub use client::TetherClient;
pub use client_builder::ClientBuilder;
pub use config::{rewrite_url, ClientConfig, ConfigParameter, ConnectPolicy};
pub use connection_state::{transition, ConnectionState, Trigger};
pub use events::{Event, EventDispatcher, EventName, Listener, ListenerId};
pub use metrics::ClientMetrics;
pub use reconnect::{next_interval, ExponentialBackoff, FixedDelay, ReconnectionStrategy};
pub use request::{validate_function_name, MAX_FUNCTION_NAME_LEN};
pub use transport::{Connector, EventSink, Transport, TransportEvent, WsConnector};
