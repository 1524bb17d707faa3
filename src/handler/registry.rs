//! Broadcast handler registry.
//!
//! Maps each message type to an ordered list of persistent handlers. Every
//! inbound frame of that type is passed to every handler, in registration
//! order.
//!
//! Dispatch iterates over a snapshot taken under the read lock, so a handler
//! may register further handlers without deadlocking; those take effect from
//! the next frame.
//!
//! # Example
//!
//! ```
//! use clipwire::handler::HandlerRegistry;
//! use clipwire::protocol::{Frame, MessageType};
//!
//! let registry = HandlerRegistry::new();
//! registry.register(MessageType::Ping, |frame| {
//!     println!("ping with token {}", frame.get_i64("token")?);
//!     Ok(())
//! });
//!
//! assert_eq!(registry.handler_count(MessageType::Ping), 1);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::protocol::{Frame, MessageType};

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// A persistent frame handler.
pub type Handler = Arc<dyn Fn(&Frame) -> HandlerResult + Send + Sync>;

/// Registry mapping message types to broadcast handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<MessageType, Vec<Handler>>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for every frame of `message_type`.
    pub fn register<F>(&self, message_type: MessageType, handler: F)
    where
        F: Fn(&Frame) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(message_type)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Handlers for a type, in registration order.
    pub fn snapshot(&self, message_type: MessageType) -> Vec<Handler> {
        self.handlers
            .read()
            .get(&message_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of handlers registered for a type.
    pub fn handler_count(&self, message_type: MessageType) -> usize {
        self.handlers
            .read()
            .get(&message_type)
            .map_or(0, Vec::len)
    }

    /// Check if any handler is registered for a type.
    pub fn has_handlers(&self, message_type: MessageType) -> bool {
        self.handler_count(message_type) > 0
    }

    /// Invoke every handler for the frame's type.
    ///
    /// All handlers run even if one fails; the first error is returned.
    pub fn dispatch(&self, frame: &Frame) -> HandlerResult {
        let mut first_error = None;
        for handler in self.snapshot(frame.message_type) {
            if let Err(e) = handler(frame) {
                tracing::warn!("Handler for {} failed: {}", frame.message_type, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        let mut counts: Vec<_> = handlers.iter().map(|(ty, list)| (*ty, list.len())).collect();
        counts.sort();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &counts)
            .finish()
    }
}
