//! Per-type RPC waiter queues.
//!
//! The protocol has no request id: a reply is matched to the oldest waiter
//! registered for its message type. Replies of one type must therefore
//! arrive in the order their requests were sent.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::Result;
use crate::protocol::{Frame, MessageType};

/// A one-shot reply callback.
pub type Waiter = Box<dyn FnOnce(&Frame) -> Result<()> + Send>;

/// FIFO queues of one-shot waiters, keyed by reply type.
#[derive(Default)]
pub struct PendingRpcs {
    queues: Mutex<HashMap<MessageType, VecDeque<Waiter>>>,
}

impl PendingRpcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a waiter for the next unmatched reply of `message_type`.
    pub fn push<F>(&self, message_type: MessageType, waiter: F)
    where
        F: FnOnce(&Frame) -> Result<()> + Send + 'static,
    {
        self.queues
            .lock()
            .entry(message_type)
            .or_default()
            .push_back(Box::new(waiter));
    }

    /// Queue a waiter that forwards the reply frame through a channel.
    ///
    /// The receiver errors if the waiter is discarded on disconnect.
    pub fn expect(&self, message_type: MessageType) -> oneshot::Receiver<Frame> {
        let (tx, rx) = oneshot::channel();
        self.push(message_type, move |frame| {
            let _ = tx.send(frame.clone());
            Ok(())
        });
        rx
    }

    /// Remove the oldest waiter for a type.
    pub fn pop(&self, message_type: MessageType) -> Option<Waiter> {
        self.queues
            .lock()
            .get_mut(&message_type)
            .and_then(VecDeque::pop_front)
    }

    /// Invoke the oldest waiter for the frame's type, if any.
    ///
    /// Returns `Ok(false)` when nobody was waiting.
    pub fn complete(&self, frame: &Frame) -> Result<bool> {
        // Popped outside the call so the waiter may queue more waiters.
        match self.pop(frame.message_type) {
            Some(waiter) => waiter(frame).map(|_| true),
            None => Ok(false),
        }
    }

    /// Number of waiters queued for a type.
    pub fn len(&self, message_type: MessageType) -> usize {
        self.queues
            .lock()
            .get(&message_type)
            .map_or(0, VecDeque::len)
    }

    /// Total number of queued waiters.
    pub fn total(&self) -> usize {
        self.queues.lock().values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Discard every waiter without invoking it. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let drained: Vec<VecDeque<Waiter>> = self.queues.lock().drain().map(|(_, q)| q).collect();
        // Dropped after the lock is released.
        drained.iter().map(VecDeque::len).sum()
    }
}

impl std::fmt::Debug for PendingRpcs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRpcs")
            .field("total", &self.total())
            .finish()
    }
}
