//! Request tracking for remote calls
//!
//! This module correlates outgoing `rpc_request` frames with their
//! `rpc_response` frames.
//!
//! # Request Lifecycle
//!
//! 1. **Allocate**: take the next id (ids start at 1 and are never reused)
//! 2. **Register**: keep the caller's oneshot sender under that id
//! 3. **Send**: the session driver writes the frame to the transport
//! 4. **Complete**: the matching response removes the entry and answers the
//!    caller, or the session is lost and every entry is failed at once
//!
//! Removing an entry is the only way to answer it, so each caller is
//! answered exactly once. A sender that is dropped without answering is seen
//! by the caller as `Error::ConnectionDropped`.

use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tether_core::{Error, Result, RpcResponse};
use tokio::sync::oneshot;

/// Longest accepted function name, in characters
pub const MAX_FUNCTION_NAME_LEN: usize = 256;

/// Channel half that answers one caller
pub(crate) type ReplyTx = oneshot::Sender<Result<Value>>;

/// Check a function name before anything is queued or sent
pub fn validate_function_name(function: &str) -> Result<()> {
    if function.is_empty() {
        return Err(Error::InvalidFunctionName(
            "function name must not be empty".to_string(),
        ));
    }
    let len = function.chars().count();
    if len > MAX_FUNCTION_NAME_LEN {
        return Err(Error::InvalidFunctionName(format!(
            "function name is {} characters long, the limit is {}",
            len, MAX_FUNCTION_NAME_LEN
        )));
    }
    Ok(())
}

struct PendingRpc {
    tx: ReplyTx,
    function: String,
    started: Instant,
}

/// Outcome of a completed call, for logging and metrics
#[derive(Debug)]
pub(crate) struct Completed {
    pub function: String,
    pub elapsed: Duration,
    pub success: bool,
}

/// Tracks in-flight calls by request id
#[derive(Default)]
pub(crate) struct RequestManager {
    pending: HashMap<u64, PendingRpc>,
    last_id: u64,
}

impl RequestManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next request id
    pub fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    /// Register an in-flight call
    pub fn register(&mut self, id: u64, function: impl Into<String>, tx: ReplyTx) {
        self.pending.insert(
            id,
            PendingRpc {
                tx,
                function: function.into(),
                started: Instant::now(),
            },
        );
    }

    /// Answer the call matching `response`
    ///
    /// Returns `None` when no call is waiting for this id.
    pub fn complete(&mut self, response: RpcResponse) -> Option<Completed> {
        let pending = self.pending.remove(&response.request_id)?;
        let outcome = response.into_result();
        let success = outcome.is_ok();

        // The caller may have given up (timeout or dropped future)
        let _ = pending.tx.send(outcome);

        Some(Completed {
            function: pending.function,
            elapsed: pending.started.elapsed(),
            success,
        })
    }

    /// Fail one in-flight call
    pub fn fail(&mut self, id: u64, error: Error) -> bool {
        match self.pending.remove(&id) {
            Some(pending) => {
                let _ = pending.tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Fail every in-flight call with `error` and forget them
    ///
    /// Returns how many calls were failed.
    pub fn fail_all(&mut self, error: Error) -> usize {
        let count = self.pending.len();
        for (_, pending) in self.pending.drain() {
            let _ = pending.tx.send(Err(error.clone()));
        }
        count
    }

    /// Forget calls whose caller stopped waiting (timed out or dropped)
    ///
    /// Their responses, if any ever arrive, are then treated as unknown.
    pub fn prune_abandoned(&mut self) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, pending| !pending.tx.is_closed());
        before - self.pending.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
