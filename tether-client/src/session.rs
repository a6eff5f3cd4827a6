//! Session driver
//!
//! One task per client owns everything mutable about the connection: the
//! current state, the transport, in-flight calls, the outbox, the
//! reconnection strategy and the retry timer. Client handles talk to it
//! through a command channel; transports talk to it through an
//! epoch-stamped event channel.
//!
//! # Loop
//!
//! Each iteration first applies the triggers queued during the previous
//! iteration, then waits for one of:
//!
//! - a command from a client handle
//! - an event from the current transport (older epochs are dropped)
//! - the retry timer
//!
//! Triggers are never applied inside the code that produced them, so a
//! transition always starts from a settled state and the `connection_status`
//! event for one state is delivered before anything caused by entering it.
//!
//! # Start
//!
//! The loop does not begin until the [`StartGate`] is opened. Client handles
//! open it on their first use, after any listener passed to that use is
//! registered, so a listener attached right after construction sees the
//! very first transition. A handle that is never used opens it implicitly
//! after [`START_GRACE`].

use crate::config::{ClientConfig, ConfigParameter, ConnectPolicy};
use crate::connection_state::{transition, ConnectionState, Trigger};
use crate::events::{Event, SharedDispatcher};
use crate::metrics::ClientMetrics;
use crate::outbox::Outbox;
use crate::reconnect::ReconnectionStrategy;
use crate::request::{ReplyTx, RequestManager};
use crate::transport::{Connector, EventSink, Transport, TransportEvent};
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tether_core::close::CLOSE_NORMAL;
use tether_core::{codec, CloseClass, Error, Frame, RemoteError, RpcRequest, RpcResponse};
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Sleep;

/// How long the driver waits for a handle to be used before starting anyway
pub(crate) const START_GRACE: Duration = Duration::from_millis(50);

/// One-shot latch holding the driver back until the client is first used
#[derive(Debug, Default)]
pub(crate) struct StartGate {
    opened: AtomicBool,
    notify: Notify,
}

impl StartGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn open(&self) {
        if !self.opened.swap(true, Ordering::AcqRel) {
            // Stores a permit when the driver is not waiting yet
            self.notify.notify_one();
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    async fn wait(&self, grace: Duration) {
        if self.is_open() {
            return;
        }
        if tokio::time::timeout(grace, self.notify.notified()).await.is_err() {
            tracing::trace!("Client not used yet, starting session anyway");
            self.opened.store(true, Ordering::Release);
        }
    }
}

/// Request from a client handle
pub(crate) enum Command {
    Connect,
    Close,
    Run {
        function: String,
        arguments: Value,
        tx: ReplyTx,
    },
    SetConfig(ConfigParameter),
}

/// Snapshot published after every change
#[derive(Debug, Clone)]
pub(crate) struct Status {
    pub state: ConnectionState,
    pub error: Option<Error>,
    pub session_context: Option<Value>,
}

struct Step {
    trigger: Trigger,
    detail: Option<Error>,
}

pub(crate) struct SessionDriver {
    config: ClientConfig,
    state: ConnectionState,
    connector: Arc<dyn Connector>,
    strategy: Box<dyn ReconnectionStrategy>,
    requests: RequestManager,
    outbox: Outbox,
    transport: Option<Box<dyn Transport>>,
    epoch: u64,
    events_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    events_rx: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
    commands: mpsc::UnboundedReceiver<Command>,
    deferred: VecDeque<Step>,
    retry_timer: Option<Pin<Box<Sleep>>>,
    failures: u32,
    retrying: bool,
    attempt_started: Option<Instant>,
    last_error: Option<Error>,
    status: watch::Sender<Status>,
    dispatcher: SharedDispatcher,
    metrics: Option<Arc<ClientMetrics>>,
}

impl SessionDriver {
    pub(crate) fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        strategy: Box<dyn ReconnectionStrategy>,
        commands: mpsc::UnboundedReceiver<Command>,
        dispatcher: SharedDispatcher,
        metrics: Option<Arc<ClientMetrics>>,
    ) -> (Self, watch::Receiver<Status>) {
        let (status, status_rx) = watch::channel(Status {
            state: ConnectionState::Offline,
            error: None,
            session_context: config.session_request.clone(),
        });
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let driver = Self {
            config,
            state: ConnectionState::Offline,
            connector,
            strategy,
            requests: RequestManager::new(),
            outbox: Outbox::new(),
            transport: None,
            epoch: 0,
            events_tx,
            events_rx,
            commands,
            deferred: VecDeque::new(),
            retry_timer: None,
            failures: 0,
            retrying: false,
            attempt_started: None,
            last_error: None,
            status,
            dispatcher,
            metrics,
        };
        (driver, status_rx)
    }

    /// Run until every client handle has been dropped
    pub(crate) async fn run(mut self, gate: Arc<StartGate>) {
        gate.wait(START_GRACE).await;

        loop {
            while let Some(step) = self.deferred.pop_front() {
                self.apply(step);
            }

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some((epoch, event)) = self.events_rx.recv() => {
                    self.handle_transport_event(epoch, event);
                }
                _ = retry_elapsed(&mut self.retry_timer) => {
                    self.retry_timer = None;
                    if self.state == ConnectionState::Connecting {
                        self.open_transport();
                    }
                }
            }
        }

        tracing::debug!("All client handles dropped, shutting down session");
        self.retry_timer = None;
        self.discard_transport(Some(CLOSE_NORMAL));
        self.requests.fail_all(Error::ClientClosed);
        self.outbox.abort(Error::ClientClosed);
    }

    fn fire(&mut self, trigger: Trigger, detail: Option<Error>) {
        self.deferred.push_back(Step { trigger, detail });
    }

    fn apply(&mut self, step: Step) {
        let Step { trigger, detail } = step;
        let previous = self.state;
        let Some(next) = transition(previous, &trigger) else {
            tracing::debug!(state = %previous, trigger = ?trigger, "Trigger ignored");
            return;
        };

        self.state = next;
        // A retry inside `connecting` re-runs the entry effects without a new status
        let changed = next != previous;
        if changed {
            tracing::info!(from = %previous, to = %next, "Connection state changed");
        }

        match next {
            ConnectionState::Error => {
                let error = detail
                    .unwrap_or_else(|| Error::Transport("connection failed".to_string()));
                self.last_error = Some(error.clone());
                self.publish_status();
                self.enter_error(error);
            }
            ConnectionState::Connected => {
                self.last_error = None;
                self.publish_status();
                self.enter_connected();
            }
            ConnectionState::Connecting => {
                if changed {
                    self.publish_status();
                }
                self.enter_connecting(previous, &trigger, detail);
            }
            ConnectionState::Setup => {
                self.publish_status();
                self.enter_setup();
            }
            ConnectionState::Offline => {
                self.publish_status();
                self.enter_offline();
            }
        }
    }

    fn publish_status(&mut self) {
        self.status.send_replace(Status {
            state: self.state,
            error: self.last_error.clone(),
            session_context: self.config.session_request.clone(),
        });
        if let Some(ref m) = self.metrics {
            m.update_connection_state(self.state);
        }
        self.dispatcher.emit(Event::ConnectionStatus(self.state));
    }

    fn enter_connecting(&mut self, previous: ConnectionState, trigger: &Trigger, detail: Option<Error>) {
        let retry = match trigger {
            Trigger::TransportFailed { retry } | Trigger::TransportClosed { retry, .. } => *retry,
            _ => None,
        };

        match retry {
            Some(delay) => {
                // Lost or failed transport: wait before the next attempt
                self.discard_transport(None);
                if previous == ConnectionState::Connected {
                    let dropped = self.requests.fail_all(Error::ConnectionDropped);
                    if dropped > 0 {
                        tracing::warn!(dropped, "Session lost with calls in flight");
                    }
                }
                if let Some(error) = detail {
                    tracing::warn!(error = %error, "Transport lost, will retry");
                }
                self.schedule_retry(delay);
            }
            None => {
                // Fresh attempt from offline or error
                self.strategy.reset();
                self.failures = 0;
                self.retrying = false;
                self.open_transport();
            }
        }
    }

    fn schedule_retry(&mut self, delay: Duration) {
        tracing::info!(delay_ms = delay.as_millis() as u64, attempt = self.failures, "Reconnecting");
        self.retrying = true;
        self.retry_timer = Some(Box::pin(tokio::time::sleep(delay)));
        if let Some(ref m) = self.metrics {
            m.record_reconnection_attempt();
        }
        self.dispatcher.emit(Event::Reconnecting { delay });
    }

    fn open_transport(&mut self) {
        self.discard_transport(None);
        self.attempt_started = Some(Instant::now());

        let url = self.config.transport_url();
        tracing::debug!(url = %url, epoch = self.epoch, "Opening transport");
        let sink = EventSink::new(self.epoch, self.events_tx.clone());
        match self.connector.open(&url, sink) {
            Ok(transport) => self.transport = Some(transport),
            Err(error) => {
                tracing::error!(url = %url, error = %error, "Cannot create transport");
                self.fire(Trigger::TransportUnavailable, Some(error));
            }
        }
    }

    /// Close and forget the current transport; its pending events go stale
    fn discard_transport(&mut self, code: Option<u16>) {
        if let Some(mut transport) = self.transport.take() {
            transport.close(code);
        }
        self.epoch += 1;
    }

    fn enter_setup(&mut self) {
        let frame = Frame::SessionRequest(self.config.session_request.clone());
        if let Err(error) = self.send_frame(frame) {
            tracing::warn!(error = %error, "Failed to send session request");
        }
    }

    fn enter_connected(&mut self) {
        self.strategy.reset();
        self.failures = 0;

        let elapsed_ms = self
            .attempt_started
            .map(|started| started.elapsed().as_millis() as u64)
            .unwrap_or(0);
        tracing::info!(elapsed_ms, "Session established");

        if let Some(ref m) = self.metrics {
            if self.retrying {
                m.record_reconnection_success();
            }
            m.record_outbox_flush(self.outbox.len() as u64);
        }
        self.retrying = false;

        let entries = self.outbox.drain();
        if !entries.is_empty() {
            tracing::debug!(count = entries.len(), "Flushing outbox");
        }
        for entry in entries {
            self.submit(entry.function, entry.arguments, entry.tx);
        }
    }

    fn enter_error(&mut self, error: Error) {
        self.retry_timer = None;
        self.discard_transport(None);
        self.abort_all();
        self.strategy.reset();
        self.failures = 0;
        self.retrying = false;

        tracing::error!(code = error.code(), error = %error, "Client entered error state");
        if let Some(ref m) = self.metrics {
            m.record_error(error.code());
        }
        self.dispatcher.emit(Event::Error(error));
    }

    fn enter_offline(&mut self) {
        self.retry_timer = None;
        self.discard_transport(Some(CLOSE_NORMAL));
        self.abort_all();
        self.strategy.reset();
        self.failures = 0;
        self.retrying = false;
    }

    fn abort_all(&mut self) {
        let pending = self.requests.fail_all(Error::ConnectionDropped);
        let buffered = self.outbox.abort(Error::ConnectionDropped);
        if pending + buffered > 0 {
            tracing::warn!(pending, buffered, "Aborted outstanding calls");
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.fire(Trigger::Connect, None),
            Command::Close => self.fire(Trigger::Close, None),
            Command::Run {
                function,
                arguments,
                tx,
            } => self.run_call(function, arguments, tx),
            Command::SetConfig(parameter) => {
                let name = parameter.name();
                match self.config.apply(parameter) {
                    Ok(()) => {
                        tracing::debug!(parameter = name, "Configuration updated");
                        if name == "sessionRequest" {
                            let context = self.config.session_request.clone();
                            self.status.send_modify(|status| status.session_context = context);
                        }
                    }
                    Err(error) => {
                        tracing::warn!(parameter = name, error = %error, "Rejected configuration change")
                    }
                }
            }
        }
    }

    fn run_call(&mut self, function: String, arguments: Value, tx: ReplyTx) {
        match self.state {
            ConnectionState::Error => {
                let _ = tx.send(Err(Error::ErrorState));
            }
            ConnectionState::Connected => self.submit(function, arguments, tx),
            state => {
                tracing::debug!(function = %function, state = %state, "Buffering call until connected");
                self.outbox.push(function, arguments, tx);
                if state == ConnectionState::Offline && self.config.connect_policy == ConnectPolicy::Auto {
                    self.fire(Trigger::Connect, None);
                }
            }
        }
    }

    fn submit(&mut self, function: String, arguments: Value, tx: ReplyTx) {
        let abandoned = self.requests.prune_abandoned();
        if abandoned > 0 {
            tracing::debug!(abandoned, "Dropped calls nobody is waiting for");
        }
        let id = self.requests.next_id();
        let frame = Frame::RpcRequest(RpcRequest::new(id, function.clone(), arguments));
        self.requests.register(id, function, tx);
        if let Err(error) = self.send_frame(frame) {
            tracing::warn!(request_id = id, error = %error, "Failed to send request");
            self.requests.fail(id, error);
        }
    }

    fn send_frame(&mut self, frame: Frame) -> tether_core::Result<()> {
        let text = codec::encode(&frame)?;
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| Error::Transport("no open transport".to_string()))?;
        transport.send(text)?;
        tracing::debug!(tag = frame.tag(), "Frame sent");
        self.dispatcher.emit(Event::OutgoingMessage(frame));
        Ok(())
    }

    /// Delay before the next attempt, or `None` when retrying is not allowed
    fn next_retry(&mut self) -> Option<Duration> {
        if self.config.fail_fast {
            return None;
        }
        let delay = self.strategy.next_delay(self.failures);
        self.failures += 1;
        delay
    }

    fn handle_transport_event(&mut self, epoch: u64, event: TransportEvent) {
        if epoch != self.epoch || !self.state.has_transport() {
            tracing::trace!(epoch, current = self.epoch, "Dropping stale transport event");
            return;
        }

        match event {
            TransportEvent::Open => {
                tracing::debug!("Transport open");
                self.fire(Trigger::TransportOpened, None);
            }
            TransportEvent::Error(message) => {
                if self.state == ConnectionState::Connecting {
                    tracing::warn!(error = %message, "Transport failed to connect");
                    let retry = self.next_retry();
                    self.fire(Trigger::TransportFailed { retry }, Some(Error::Transport(message)));
                } else {
                    tracing::debug!(error = %message, "Transport error after open");
                }
            }
            TransportEvent::Close { code, reason } => {
                if self.state == ConnectionState::Connecting {
                    let retry = self.next_retry();
                    let detail = Error::Transport(format!("closed before open ({}): {}", code, reason));
                    self.fire(Trigger::TransportFailed { retry }, Some(detail));
                    return;
                }

                let class = CloseClass::from_code(code);
                tracing::info!(code, class = %class, reason = %reason, "Transport closed");
                let retry = if class.is_recoverable() { self.next_retry() } else { None };
                let detail = Error::ConnectionTerminated {
                    class,
                    message: reason,
                    retry_after: 0,
                };
                self.fire(Trigger::TransportClosed { class, retry }, Some(detail));
            }
            TransportEvent::Message(text) => self.handle_message(&text),
            TransportEvent::Undecodable(reason) => self.protocol_violation(Error::Protocol(reason)),
        }
    }

    fn handle_message(&mut self, text: &str) {
        let frame = match codec::decode(text) {
            Ok(frame) => frame,
            Err(error) => {
                self.protocol_violation(error);
                return;
            }
        };
        tracing::debug!(tag = frame.tag(), "Frame received");
        self.dispatcher.emit(Event::IncomingMessage(frame.clone()));

        match (self.state, frame) {
            (ConnectionState::Setup, Frame::SessionResponse(response)) => {
                if response.is_ok() {
                    if let Some(context) = response.result.filter(|v| !v.is_null()) {
                        self.config.session_request = Some(context);
                    }
                    self.fire(Trigger::SessionAccepted, None);
                } else {
                    let error = response
                        .error
                        .unwrap_or_else(|| RemoteError::new("session refused by server"));
                    self.fire(Trigger::SessionRejected, Some(Error::SessionRejected(error)));
                }
            }
            (ConnectionState::Setup | ConnectionState::Connected, Frame::UserEvent(event)) => {
                if let Some(ref m) = self.metrics {
                    m.record_user_event(&event.name);
                }
                self.dispatcher.emit(Event::User {
                    name: event.name,
                    data: event.data,
                });
            }
            (ConnectionState::Connected, Frame::RpcResponse(response)) => {
                self.resolve(response);
            }
            (_, Frame::EndConnection(end)) => {
                self.dispatcher.emit(Event::EndConnection(end.clone()));
                self.protocol_violation(Error::EndConnection {
                    message: end.message.unwrap_or_default(),
                    retry_after: end.retry_after.unwrap_or(0),
                });
            }
            (state, other) => {
                self.protocol_violation(Error::Protocol(format!(
                    "unexpected {} frame while {}",
                    other.tag(),
                    state
                )));
            }
        }
    }

    fn resolve(&mut self, response: RpcResponse) {
        let request_id = response.request_id;
        self.dispatcher.emit(Event::RpcResponse(response.clone()));

        match self.requests.complete(response) {
            Some(completed) => {
                let status = if completed.success { "success" } else { "error" };
                tracing::debug!(
                    request_id,
                    function = %completed.function,
                    status,
                    duration_secs = completed.elapsed.as_secs_f64(),
                    "Call completed"
                );
                if let Some(ref m) = self.metrics {
                    m.record_rpc(&completed.function, status, completed.elapsed.as_secs_f64());
                }
            }
            None => tracing::warn!(request_id, "Response for unknown request id"),
        }
    }

    fn protocol_violation(&mut self, error: Error) {
        tracing::warn!(state = %self.state, error = %error, "Protocol violation");
        if let Some(ref m) = self.metrics {
            m.record_error(error.code());
        }
        self.dispatcher.emit(Event::ProtocolError(error.clone()));
        self.fire(Trigger::ProtocolViolation, Some(error));
    }
}

async fn retry_elapsed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gate_opened_before_wait() {
        let gate = StartGate::new();
        gate.open();
        gate.open();
        tokio::time::timeout(Duration::from_millis(100), gate.wait(Duration::from_secs(60)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_gate_releases_waiting_driver() {
        let gate = Arc::new(StartGate::new());
        let waiter = gate.clone();
        let started = tokio::spawn(async move { waiter.wait(Duration::from_secs(60)).await });

        tokio::task::yield_now().await;
        assert!(!started.is_finished());
        gate.open();
        tokio::time::timeout(Duration::from_millis(100), started)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_gate_opens_itself_after_grace() {
        let gate = StartGate::new();
        gate.wait(START_GRACE).await;
        assert!(gate.is_open());
    }
}
