//! Session-oriented RPC client
//!
//! This module provides the main `TetherClient` type: a connect-once,
//! call-many handle over a session that survives transport churn.
//!
//! # Client Lifecycle
//!
//! 1. **Build**: `TetherClient::new(config)` or `ClientBuilder`
//! 2. **Connect**: explicitly with `connect()`, on the first `run()` under the
//!    `auto` policy, or at build time under the `immediate` policy. The
//!    session task only starts once the handle is first used (or after a
//!    short grace period), so listeners attached right after construction
//!    see every transition.
//! 3. **Call**: `run()` buffers calls until a session exists, then sends them
//! 4. **Reconnect**: recoverable closes are retried with backoff
//! 5. **Close**: `close()` goes offline; dropping every handle shuts down
//!
//! # Cloning
//!
//! `TetherClient` is cheaply cloneable. All clones drive the same session, so
//! the client can be shared across tasks without extra synchronization.

use crate::client_builder::ClientBuilder;
use crate::config::{ClientConfig, ConfigParameter};
use crate::connection_state::ConnectionState;
use crate::events::{Event, EventName, ListenerId, SharedDispatcher};
use crate::request::validate_function_name;
use crate::session::{Command, StartGate, Status};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{Error, Result};
use tokio::sync::{mpsc, oneshot, watch};

/// Session-oriented RPC client over a persistent transport
#[derive(Clone)]
pub struct TetherClient {
    pub(crate) commands: mpsc::UnboundedSender<Command>,
    pub(crate) status: watch::Receiver<Status>,
    pub(crate) dispatcher: SharedDispatcher,
    pub(crate) gate: Arc<StartGate>,
}

impl TetherClient {
    /// Create a client over WebSocket with default reconnection
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Self> {
        ClientBuilder::from_config(config).build()
    }

    /// Start configuring a client for `server_url`
    pub fn builder(server_url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(server_url)
    }

    pub(crate) fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::ClientClosed)
    }

    /// Let the session task start; every public method ends up here
    fn started(&self) {
        self.gate.open();
    }

    /// Start connecting
    ///
    /// Accepted from `offline` and from `error`; ignored while a connection
    /// is already being established or is up. The transition happens on
    /// the session task, after this call returns.
    pub fn connect(&self) -> Result<()> {
        tracing::debug!("Connect requested");
        let sent = self.send(Command::Connect);
        self.started();
        sent
    }

    /// Close the session and go offline
    ///
    /// Outstanding and buffered calls fail with `ConnectionDropped`. Closing
    /// an offline client has no effect.
    pub fn close(&self) {
        tracing::debug!("Close requested");
        let _ = self.send(Command::Close);
        self.started();
    }

    /// Run a remote function and wait for its result
    ///
    /// The name is checked before anything is queued. In the `error` state
    /// the call fails with `ErrorState`; before a session exists it is
    /// buffered and sent once the session is established.
    #[tracing::instrument(skip(self, function, arguments), fields(function))]
    pub async fn run(&self, function: impl Into<String>, arguments: Value) -> Result<Value> {
        let function = function.into();
        tracing::Span::current().record("function", function.as_str());
        self.started();
        validate_function_name(&function)?;

        let (tx, rx) = oneshot::channel();
        self.send(Command::Run {
            function,
            arguments,
            tx,
        })?;

        match rx.await {
            Ok(outcome) => outcome,
            // The call was discarded without an answer
            Err(_) => Err(Error::ConnectionDropped),
        }
    }

    /// Like [`run`](Self::run), giving up with `Error::Timeout` after
    /// `timeout`
    ///
    /// A timeout only affects this call; the connection is left alone and a
    /// late response is dropped.
    pub async fn run_with_timeout(
        &self,
        function: impl Into<String>,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value> {
        tokio::time::timeout(timeout, self.run(function, arguments))
            .await
            .map_err(|_| Error::Timeout)?
    }

    /// Typed variant of [`run`](Self::run)
    pub async fn call<P, R>(&self, function: impl Into<String>, params: P) -> Result<R>
    where
        P: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let arguments = serde_json::to_value(params)?;
        let result = self.run(function, arguments).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Current connection state
    pub fn connection_status(&self) -> ConnectionState {
        self.started();
        self.status.borrow().state
    }

    /// Failure recorded on the most recent entry into `error`
    ///
    /// Cleared when a session is next established.
    pub fn error(&self) -> Option<Error> {
        self.started();
        self.status.borrow().error.clone()
    }

    /// Session context sent with the next `session_request`
    ///
    /// The server may replace it in a successful `session_response`.
    pub fn session_context(&self) -> Option<Value> {
        self.started();
        self.status.borrow().session_context.clone()
    }

    /// Wait until the client reaches `state`
    ///
    /// Returns immediately if it is already there. Short-lived states can be
    /// missed; use a `connection_status` listener to observe every change.
    pub async fn wait_for_status(&self, state: ConnectionState) -> Result<()> {
        self.started();
        let mut status = self.status.clone();
        let reached = status.wait_for(|current| current.state == state).await.is_ok();
        if reached {
            Ok(())
        } else {
            Err(Error::ClientClosed)
        }
    }

    /// Change an option for future connection attempts and calls
    pub fn set_config_parameter(&self, parameter: ConfigParameter) -> Result<()> {
        self.started();
        // Validate here so the caller sees usage errors synchronously
        ClientConfig::new("ws://placeholder").apply(parameter.clone())?;
        self.send(Command::SetConfig(parameter))
    }

    /// String-keyed form of [`set_config_parameter`](Self::set_config_parameter)
    pub fn set_config_value(&self, name: &str, value: Value) -> Result<()> {
        self.set_config_parameter(ConfigParameter::from_name_value(name, value)?)
    }

    /// Replace the session context sent on every (re)connection
    pub fn set_session_request(&self, session_request: Option<Value>) -> Result<()> {
        self.set_config_parameter(ConfigParameter::SessionRequest(session_request))
    }

    /// Register a listener for every event named `name`
    pub fn on<F>(&self, name: impl Into<EventName>, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.dispatcher.lock().on(name.into(), listener);
        self.started();
        id
    }

    /// Register a listener for the next event named `name`
    pub fn once<F>(&self, name: impl Into<EventName>, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.dispatcher.lock().once(name.into(), listener);
        self.started();
        id
    }

    /// Remove a listener; returns whether it was registered
    pub fn off(&self, id: ListenerId) -> bool {
        let removed = self.dispatcher.lock().off(id);
        self.started();
        removed
    }

    /// Remove every listener for `name`, or every listener when `None`
    pub fn remove_all(&self, name: Option<EventName>) {
        self.dispatcher.lock().remove_all(name.as_ref());
        self.started();
    }
}
