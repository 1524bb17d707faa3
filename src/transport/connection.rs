//! A live connection and its teardown signal.
//!
//! A [`Connection`] owns the writer task for one socket. The read half is
//! handed to the receive loop. Both tasks watch the same [`ShutdownSignal`]:
//! whichever side fails first records the reason and cancels the signal,
//! and the other side stops on the next poll. Local closes go through the
//! same signal, so the socket is never closed just to unblock a read.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::protocol::Frame;
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Default)]
struct SignalInner {
    token: CancellationToken,
    reason: Mutex<Option<(Arc<Error>, bool)>>,
}

/// One-shot teardown signal carrying the first reported reason.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<SignalInner>,
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn fire(&self, reason: Error, local: bool) -> bool {
        {
            let mut slot = self.inner.reason.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some((Arc::new(reason), local));
        }
        self.inner.token.cancel();
        true
    }

    /// Report a failure. Only the first report (failure or local close) is kept.
    pub fn trigger(&self, reason: Error) -> bool {
        self.fire(reason, false)
    }

    /// Close on request of this side.
    pub fn close_locally(&self) -> bool {
        self.fire(Error::ConnectionClosed, true)
    }

    /// Wait until the signal fires.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// First reason, and whether it was a local close.
    pub fn reason(&self) -> Option<(Arc<Error>, bool)> {
        self.inner.reason.lock().clone()
    }
}

/// One connected socket: its writer and teardown signal.
#[derive(Debug, Clone)]
pub struct Connection {
    id: u64,
    peer: SocketAddr,
    writer: WriterHandle,
    signal: ShutdownSignal,
}

impl Connection {
    /// Split `stream`, spawn its writer task, and return the read half for
    /// the receive loop.
    pub fn open(stream: TcpStream, config: WriterConfig) -> Result<(Self, OwnedReadHalf)> {
        let peer = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();
        let signal = ShutdownSignal::new();
        let (writer, _task) = spawn_writer_task(write_half, config, signal.clone());

        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Connection {} opened to {}", id, peer);

        Ok((
            Self {
                id,
                peer,
                writer,
                signal,
            },
            read_half,
        ))
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Teardown signal shared with the receive loop.
    #[inline]
    pub fn signal(&self) -> &ShutdownSignal {
        &self.signal
    }

    /// Send a frame and wait until it has been written.
    pub async fn send(&self, frame: &Frame) -> Result<()> {
        if self.signal.is_triggered() {
            return Err(Error::ConnectionClosed);
        }
        self.writer.send(frame).await
    }

    /// Send a frame encoded ahead of time, so encoding failures can be
    /// handled before anything else is committed.
    pub async fn send_encoded(&self, frame: OutboundFrame) -> Result<()> {
        if self.signal.is_triggered() {
            return Err(Error::ConnectionClosed);
        }
        self.writer.send_encoded(frame).await
    }

    /// Tear down because of `reason`.
    pub fn abort(&self, reason: Error) -> bool {
        self.signal.trigger(reason)
    }

    /// Tear down on request of this side.
    pub fn close(&self) -> bool {
        self.signal.close_locally()
    }

    pub fn is_closed(&self) -> bool {
        self.signal.is_triggered()
    }
}
