//! Inbound frame dispatch.
//!
//! For each frame: every broadcast handler for its type runs first, in
//! order, then at most one pending RPC waiter for that type is consumed.

use std::sync::Arc;

use super::{HandlerRegistry, PendingRpcs};
use crate::error::Result;
use crate::protocol::Frame;

/// Broadcast handlers plus RPC waiters.
///
/// Clones share both. A session keeps one dispatcher for its handlers and
/// [`fork`](Self::fork)s it per connection, so each connection has its own
/// waiter queues.
#[derive(Debug, Default, Clone)]
pub struct Dispatcher {
    handlers: Arc<HandlerRegistry>,
    pending: Arc<PendingRpcs>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatcher sharing these broadcast handlers, with fresh, empty
    /// waiter queues.
    pub fn fork(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
            pending: Arc::default(),
        }
    }

    /// Broadcast handler registry.
    #[inline]
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// RPC waiter queues.
    #[inline]
    pub fn pending(&self) -> &PendingRpcs {
        &self.pending
    }

    /// Deliver one frame.
    ///
    /// The waiter is consumed even if a broadcast handler failed; the first
    /// error encountered is returned.
    pub fn dispatch(&self, frame: &Frame) -> Result<()> {
        tracing::trace!("Dispatching {}", frame.message_type);
        let broadcast = self.handlers.dispatch(frame);
        let waiter = self.pending.complete(frame);

        match waiter {
            Ok(false) if !self.handlers.has_handlers(frame.message_type) => {
                tracing::debug!("No handler or waiter for {}, dropped", frame.message_type);
            }
            _ => {}
        }

        broadcast.and(waiter.map(|_| ()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::protocol::MessageType;
    use parking_lot::Mutex;

    #[test]
    fn test_broadcast_runs_before_waiter() {
        let dispatcher = Dispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        dispatcher.pending().push(MessageType::SyncResponse, move |_| {
            o.lock().push("waiter");
            Ok(())
        });
        let o = order.clone();
        dispatcher
            .handlers()
            .register(MessageType::SyncResponse, move |_| {
                o.lock().push("handler");
                Ok(())
            });

        dispatcher
            .dispatch(&Frame::new(MessageType::SyncResponse))
            .unwrap();
        assert_eq!(*order.lock(), vec!["handler", "waiter"]);
    }

    #[test]
    fn test_one_waiter_per_frame() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .pending()
            .push(MessageType::AuthenticateResponse, |_| Ok(()));
        dispatcher
            .pending()
            .push(MessageType::AuthenticateResponse, |_| Ok(()));

        dispatcher
            .dispatch(&Frame::new(MessageType::AuthenticateResponse))
            .unwrap();
        assert_eq!(dispatcher.pending().len(MessageType::AuthenticateResponse), 1);
    }

    #[test]
    fn test_waiter_consumed_despite_handler_error() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .handlers()
            .register(MessageType::Ping, |_| Err(Error::MissingField("token")));
        dispatcher.pending().push(MessageType::Ping, |_| Ok(()));

        let result = dispatcher.dispatch(&Frame::new(MessageType::Ping));
        assert!(matches!(result, Err(Error::MissingField("token"))));
        assert!(dispatcher.pending().is_empty());
    }

    #[test]
    fn test_unclaimed_frame_is_ok() {
        let dispatcher = Dispatcher::new();
        assert!(dispatcher.dispatch(&Frame::new(MessageType::Header)).is_ok());
    }

    #[test]
    fn test_fork_shares_handlers_not_waiters() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(0));
        let counter = seen.clone();
        dispatcher.handlers().register(MessageType::Ping, move |_| {
            *counter.lock() += 1;
            Ok(())
        });

        let first = dispatcher.fork();
        let second = dispatcher.fork();
        first.pending().push(MessageType::Ping, |_| Ok(()));
        second.pending().push(MessageType::Ping, |_| Ok(()));

        assert_eq!(first.pending().clear(), 1);
        assert_eq!(second.pending().len(MessageType::Ping), 1);

        second.dispatch(&Frame::new(MessageType::Ping)).unwrap();
        assert_eq!(*seen.lock(), 1);
        assert!(second.pending().is_empty());
    }
}
