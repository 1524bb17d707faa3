//! Handlers the session installs on its own dispatcher.
//!
//! Content announcements are republished as session events. Sync requests
//! are answered from the content cache by a worker job; the receive loop
//! only queues it.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{ContentNotification, SessionInner};
use crate::error::{Error, Result};
use crate::protocol::{
    Message, MessageType, NotifyAvailable, SyncRequest, SyncResponse, SYNC_FOUND, SYNC_NOT_FOUND,
};

pub(super) fn install(inner: &Arc<SessionInner>) {
    let handlers = inner.dispatcher.handlers();

    let weak = Arc::downgrade(inner);
    handlers.register(MessageType::NotifyAvailable, move |frame| {
        let notify: NotifyAvailable = frame.parse()?;
        if let Some(inner) = weak.upgrade() {
            inner.events.publish_content(ContentNotification::from(notify));
        }
        Ok(())
    });

    let weak = Arc::downgrade(inner);
    handlers.register(MessageType::SyncRequest, move |frame| {
        let request: SyncRequest = frame.parse()?;
        let Some(inner) = weak.upgrade() else {
            return Ok(());
        };

        let responder = inner.clone();
        let content_id = request.content_id;
        inner
            .worker
            .submit(move || async move { responder.respond_sync(content_id).await })
            .on_complete(move |task| {
                if let Some(Err(e)) = task.try_get() {
                    warn!("Sync response for {} not sent: {}", content_id, e);
                }
            });
        Ok(())
    });
}

impl SessionInner {
    /// Answer a sync request for `content_id` from the cache.
    async fn respond_sync(&self, content_id: i64) -> Result<()> {
        let connection = self.connection().ok_or(Error::NotConnected)?;
        let cached = self
            .cache
            .get(content_id)
            .and_then(|payload| u32::try_from(payload.len()).ok().map(|size| (payload, size)));

        let frame = match cached {
            Some((payload, content_size)) => {
                debug!("Serving {} ({} bytes)", content_id, content_size);
                self.sync_response(content_id, content_size, SYNC_FOUND)
                    .to_frame()?
                    .with_payload(payload)
            }
            None => {
                debug!("No cached content for {}", content_id);
                self.sync_response(content_id, 0, SYNC_NOT_FOUND).to_frame()?
            }
        };

        connection.send(&frame).await
    }

    fn sync_response(&self, content_id: i64, content_size: u32, message: i64) -> SyncResponse {
        SyncResponse {
            token: self.token(),
            dataset_id: self.dataset(),
            content_id,
            content_size,
            message,
        }
    }
}
