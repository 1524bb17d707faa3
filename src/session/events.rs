//! Session events and their publication.
//!
//! Observers can either register callbacks (run inline on the task that
//! publishes, in registration order) or subscribe to a broadcast channel of
//! [`SessionEvent`]s.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::error::Error;
use crate::protocol::{IndexEntry, NotifyAvailable};

/// A content item the peer says it can provide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentNotification {
    pub content_id: i64,
    pub content_types: Vec<String>,
    pub description: String,
}

impl From<NotifyAvailable> for ContentNotification {
    fn from(notify: NotifyAvailable) -> Self {
        Self {
            content_id: notify.content_id,
            content_types: notify.content_type,
            description: notify.description,
        }
    }
}

impl From<IndexEntry> for ContentNotification {
    fn from(entry: IndexEntry) -> Self {
        Self {
            content_id: entry.id,
            content_types: entry.content_type,
            description: entry.description,
        }
    }
}

/// A dropped connection.
#[derive(Debug, Clone)]
pub struct Disconnect {
    /// First failure recorded for the connection, or
    /// [`Error::ConnectionClosed`] for a local close.
    pub reason: Arc<Error>,
    /// Whether this side closed the connection.
    pub local: bool,
}

/// Events published by a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ContentAvailable(ContentNotification),
    Disconnected(Disconnect),
}

type ContentObserver = Arc<dyn Fn(&ContentNotification) + Send + Sync>;
type DisconnectObserver = Arc<dyn Fn(&Disconnect) + Send + Sync>;

pub(crate) struct EventBus {
    content: RwLock<Vec<ContentObserver>>,
    disconnect: RwLock<Vec<DisconnectObserver>>,
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            content: RwLock::new(Vec::new()),
            disconnect: RwLock::new(Vec::new()),
            tx,
        }
    }

    pub(crate) fn on_content_available<F>(&self, observer: F)
    where
        F: Fn(&ContentNotification) + Send + Sync + 'static,
    {
        self.content.write().push(Arc::new(observer));
    }

    pub(crate) fn on_disconnect<F>(&self, observer: F)
    where
        F: Fn(&Disconnect) + Send + Sync + 'static,
    {
        self.disconnect.write().push(Arc::new(observer));
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn publish_content(&self, notification: ContentNotification) {
        let observers = self.content.read().clone();
        for observer in observers {
            observer(&notification);
        }
        // No subscribers is not an error.
        let _ = self.tx.send(SessionEvent::ContentAvailable(notification));
    }

    pub(crate) fn publish_disconnect(&self, disconnect: Disconnect) {
        let observers = self.disconnect.read().clone();
        for observer in observers {
            observer(&disconnect);
        }
        let _ = self.tx.send(SessionEvent::Disconnected(disconnect));
    }
}
