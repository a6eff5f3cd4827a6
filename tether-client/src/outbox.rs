//! Buffer for calls issued before a session exists
//!
//! Entries are kept in submission order and are turned into real requests
//! when the session becomes usable. Request ids are not allocated until then.

use crate::request::ReplyTx;
use serde_json::Value;
use std::collections::VecDeque;
use tether_core::Error;

/// A call waiting for a connected session
pub(crate) struct OutboxEntry {
    pub function: String,
    pub arguments: Value,
    pub tx: ReplyTx,
}

/// FIFO of deferred calls
#[derive(Default)]
pub(crate) struct Outbox {
    entries: VecDeque<OutboxEntry>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, function: String, arguments: Value, tx: ReplyTx) {
        self.entries.push_back(OutboxEntry {
            function,
            arguments,
            tx,
        });
    }

    /// Remove every entry, oldest first
    pub fn drain(&mut self) -> Vec<OutboxEntry> {
        self.entries.drain(..).collect()
    }

    /// Fail every entry with `error`; returns how many were failed
    pub fn abort(&mut self, error: Error) -> usize {
        let count = self.entries.len();
        for entry in self.entries.drain(..) {
            let _ = entry.tx.send(Err(error.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
