//! Client builder for configuring reconnection and other options
//!
//! The `ClientBuilder` provides a fluent API for configuring client behavior
//! before the session task starts. It allows you to:
//! - Choose the connect policy, fail-fast mode and session context
//! - Replace the reconnection strategy or the transport
//! - Register listeners that are guaranteed to see the very first event
//! - Configure observability (OpenTelemetry)
//!
//! # Examples
//!
//! ```rust,no_run
//! use tether_client::{ClientBuilder, ConnectPolicy, ExponentialBackoff};
//! use std::time::Duration;
//!
//! # async fn example() -> tether_core::Result<()> {
//! let client = ClientBuilder::new("https://example.com/live")
//!     .connect_policy(ConnectPolicy::Immediate)
//!     .with_reconnect(Box::new(ExponentialBackoff::new(
//!         Duration::from_millis(500),
//!         Duration::from_secs(30),
//!     )))
//!     .on("connection_status", |event| println!("{:?}", event))
//!     .build()?;
//!
//! // With observability
//! let traced = ClientBuilder::new("wss://example.com/live")
//!     .with_default_observability()
//!     .service_name("my-client")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::client::TetherClient;
use crate::config::{ClientConfig, ConnectPolicy};
use crate::events::{Event, EventDispatcher, EventName, SharedDispatcher};
use crate::metrics::ClientMetrics;
use crate::reconnect::{ExponentialBackoff, ReconnectionStrategy};
use crate::session::{Command, SessionDriver, StartGate};
use crate::transport::{Connector, WsConnector};
use serde_json::Value;
use std::sync::Arc;
use tether_core::{Error, ObservabilityConfig, Result};
use tokio::sync::mpsc;
use tracing::Instrument;

/// Builder for configuring and creating a TetherClient
pub struct ClientBuilder {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    reconnect_strategy: Option<Box<dyn ReconnectionStrategy>>,
    listeners: EventDispatcher,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
}

impl ClientBuilder {
    /// Create a new client builder
    pub fn new(server_url: impl Into<String>) -> Self {
        Self::from_config(ClientConfig::new(server_url))
    }

    /// Start from a complete configuration
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            connector: Arc::new(WsConnector),
            reconnect_strategy: None,
            listeners: EventDispatcher::new(),
            observability_config: None,
            service_name: None,
        }
    }

    pub fn connect_policy(mut self, policy: ConnectPolicy) -> Self {
        self.config.connect_policy = policy;
        self
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.config.fail_fast = fail_fast;
        self
    }

    /// Session context sent in every `session_request`
    pub fn session_request(mut self, session_request: Value) -> Self {
        self.config = self.config.with_session_request(session_request);
        self
    }

    /// Use a custom transport
    pub fn with_connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Use a custom reconnection strategy (default: exponential backoff
    /// between 1 and 300 seconds)
    pub fn with_reconnect(mut self, strategy: Box<dyn ReconnectionStrategy>) -> Self {
        self.reconnect_strategy = Some(strategy);
        self
    }

    /// Register a listener before the session task starts
    ///
    /// These are in place before the session task exists. Listeners added
    /// with [`TetherClient::on`] right after `build()` see the first
    /// `connection_status` event too, because the session task waits for
    /// the handle to be used before it starts.
    pub fn on<F>(mut self, name: impl Into<EventName>, listener: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.listeners.on(name.into(), listener);
        self
    }

    /// Enable OpenTelemetry observability with custom configuration
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self
    }

    /// Enable OpenTelemetry observability with default configuration
    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(ObservabilityConfig::default());
        self
    }

    /// Set service name for observability (used if observability is enabled)
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Validate the configuration and start the session task
    ///
    /// Must be called from within a Tokio runtime. Nothing touches the
    /// network unless the connect policy is `immediate`.
    pub fn build(self) -> Result<TetherClient> {
        self.config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            Error::InvalidConfig(format!("a Tokio runtime is required: {}", e))
        })?;

        // Initialize observability if configured
        let metrics = if let Some(mut config) = self.observability_config {
            if let Some(name) = self.service_name {
                config.service_name = name;
            }

            tether_core::init_observability(config.clone()).map_err(|e| {
                Error::InvalidConfig(format!("failed to initialize observability: {}", e))
            })?;

            Some(Arc::new(ClientMetrics::new(config.service_name)))
        } else {
            None
        };

        let strategy = self
            .reconnect_strategy
            .unwrap_or_else(|| Box::new(ExponentialBackoff::default()));
        let dispatcher = SharedDispatcher::new(self.listeners);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let policy = self.config.connect_policy;
        let span = tracing::info_span!("tether_session", server_url = %self.config.server_url);

        let (driver, status) = SessionDriver::new(
            self.config,
            self.connector,
            strategy,
            commands_rx,
            dispatcher.clone(),
            metrics,
        );
        let gate = Arc::new(StartGate::new());
        runtime.spawn(driver.run(gate.clone()).instrument(span));

        let client = TetherClient {
            commands: commands_tx,
            status,
            dispatcher,
            gate,
        };

        if policy == ConnectPolicy::Immediate {
            // Queued behind the gate; applied once the handle is first used
            client.send(Command::Connect)?;
        } else {
            client.gate.open();
        }
        tracing::debug!(connect_policy = %policy, "Client created");

        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_state::ConnectionState;
    use crate::reconnect::FixedDelay;
    use crate::transport::testing::ScriptedConnector;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn test_builder_defaults() {
        let builder = ClientBuilder::new("ws://localhost:8080");

        assert_eq!(builder.config.server_url, "ws://localhost:8080");
        assert_eq!(builder.config.connect_policy, ConnectPolicy::Auto);
        assert!(!builder.config.fail_fast);
        assert!(builder.reconnect_strategy.is_none());
        assert!(builder.observability_config.is_none());
        assert!(builder.service_name.is_none());
    }

    #[test]
    fn test_builder_chaining() {
        let builder = ClientBuilder::new("ws://localhost:8080")
            .connect_policy(ConnectPolicy::Manual)
            .fail_fast(true)
            .session_request(json!({"token": "abc"}))
            .with_reconnect(Box::new(FixedDelay::new(Duration::from_millis(500)).with_max_attempts(10)))
            .service_name("test-service")
            .with_default_observability();

        assert_eq!(builder.config.connect_policy, ConnectPolicy::Manual);
        assert!(builder.config.fail_fast);
        assert_eq!(builder.config.session_request, Some(json!({"token": "abc"})));
        assert!(builder.reconnect_strategy.is_some());
        assert!(builder.observability_config.is_some());
        assert_eq!(builder.service_name, Some("test-service".to_string()));
    }

    #[test]
    fn test_builder_observability_config() {
        let config = ObservabilityConfig::new("test-client")
            .with_endpoint("http://localhost:4317")
            .with_log_level("debug");

        let builder = ClientBuilder::new("ws://localhost:8080").with_observability(config);

        let obs_config = builder.observability_config.unwrap();
        assert_eq!(obs_config.service_name, "test-client");
        assert_eq!(obs_config.log_level, "debug");
    }

    #[test]
    fn test_builder_listeners_are_kept() {
        let builder = ClientBuilder::new("ws://localhost:8080")
            .on(EventName::ConnectionStatus, |_| {})
            .on("tick", |_| {});

        assert_eq!(builder.listeners.listener_count(&EventName::ConnectionStatus), 1);
        assert_eq!(builder.listeners.listener_count(&EventName::user("tick")), 1);
    }

    #[test]
    fn test_build_rejects_bad_url() {
        let error = ClientBuilder::new("ftp://localhost").build().err().unwrap();
        assert_eq!(error.code(), "invalid_config");
    }

    #[test]
    fn test_build_requires_runtime() {
        let error = ClientBuilder::new("ws://localhost:8080").build().err().unwrap();
        assert_eq!(error.code(), "invalid_config");
    }

    #[tokio::test]
    async fn test_immediate_policy_connects_on_build() {
        let connector = ScriptedConnector::new();
        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = states.clone();

        let client = ClientBuilder::new("http://localhost:8080/live")
            .connect_policy(ConnectPolicy::Immediate)
            .with_connector(connector.clone())
            .on(EventName::ConnectionStatus, move |event| {
                if let Event::ConnectionStatus(state) = event {
                    sink.lock().unwrap().push(*state);
                }
            })
            .build()
            .unwrap();

        client
            .wait_for_status(ConnectionState::Connecting)
            .await
            .unwrap();
        assert_eq!(*states.lock().unwrap(), vec![ConnectionState::Connecting]);
        assert_eq!(connector.urls(), vec!["ws://localhost:8080/live"]);
    }

    #[tokio::test]
    async fn test_manual_policy_stays_offline() {
        let connector = ScriptedConnector::new();
        let client = ClientBuilder::new("ws://localhost:8080")
            .connect_policy(ConnectPolicy::Manual)
            .with_connector(connector.clone())
            .build()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(client.connection_status(), ConnectionState::Offline);
        assert_eq!(connector.open_count(), 0);
    }
}
