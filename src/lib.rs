//! Tether - session-oriented RPC over WebSocket
//!
//! This is the main convenience crate that re-exports the tether sub-crates.
//! Use this crate if you want a single dependency that provides the client
//! together with the wire types it speaks.
//!
//! # Architecture
//!
//! Tether is organized into modular crates:
//!
//! - **tether-core**: Frames, codec, close classification, error handling,
//!   observability
//! - **tether-client**: Session client with outbox, events and reconnection
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tether::{ClientConfig, TetherClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = TetherClient::new(ClientConfig::new("https://example.com/live"))?;
//!
//!     let result = client.run("add", serde_json::json!({"a": 5, "b": 3})).await?;
//!     println!("Result: {}", result);
//!
//!     Ok(())
//! }
//! ```

// Re-export the sub-crates so everything is reachable through `tether::`
pub use tether_client as client;
pub use tether_core as core;

// Convenience re-exports of the most commonly used types
pub use tether_client::{ClientBuilder, ClientConfig, ConnectPolicy, ConnectionState, TetherClient};
pub use tether_core::{Error, Result};
