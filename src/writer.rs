//! Dedicated writer task for frame sending.
//!
//! Each connection owns one writer task that receives encoded frames via an
//! mpsc channel and writes them to the socket's write half. Frames that are
//! queued together are batched into a single vectored write.
//!
//! # Architecture
//!
//! ```text
//! worker job ────┐
//! sync responder ┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► TcpStream
//! heartbeat ─────┘
//! ```
//!
//! Every frame carries an acknowledgement channel, so [`WriterHandle::send`]
//! returns only once the bytes were handed to the socket (or failed). A write
//! failure triggers the connection's [`ShutdownSignal`], which also stops the
//! receive loop.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::protocol::{encode_parts, Frame, LENGTH_HEADER_SIZE};
use crate::transport::ShutdownSignal;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the socket.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Length header (2 bytes, big-endian).
    pub header: [u8; LENGTH_HEADER_SIZE],
    /// Encoded JSON body.
    pub body: Bytes,
    /// Raw bytes sent unframed after the body (usually empty).
    pub payload: Bytes,
    ack: Option<oneshot::Sender<Result<()>>>,
}

impl OutboundFrame {
    /// Encode a frame. Fails with [`Error::FrameTooLarge`] before anything
    /// is queued.
    pub fn encode(frame: &Frame) -> Result<Self> {
        let (header, body) = encode_parts(frame)?;
        Ok(Self {
            header,
            body,
            payload: frame.payload.clone().unwrap_or_default(),
            ack: None,
        })
    }

    /// Total size of this frame on the wire.
    #[inline]
    pub fn size(&self) -> usize {
        LENGTH_HEADER_SIZE + self.body.len() + self.payload.len()
    }

    fn acknowledge(&mut self, result: Result<()>) {
        if let Some(ack) = self.ack.take() {
            let _ = ack.send(result);
        }
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for the frame queue; senders wait when it is full.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// This is cheaply cloneable and shared by everything that sends on the
/// connection.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    pending: Arc<AtomicUsize>,
}

impl std::fmt::Debug for WriterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterHandle")
            .field("pending", &self.pending_count())
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl WriterHandle {
    /// Encode and send a frame, waiting until it has been written.
    pub async fn send(&self, frame: &Frame) -> Result<()> {
        let outbound = OutboundFrame::encode(frame)?;
        self.send_encoded(outbound).await
    }

    /// Send an already-encoded frame, waiting until it has been written.
    pub async fn send_encoded(&self, mut frame: OutboundFrame) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        frame.ack = Some(ack_tx);

        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(frame).await.is_err() {
            self.pending.fetch_sub(1, Ordering::Release);
            return Err(Error::ConnectionClosed);
        }

        // A dropped ack means the writer stopped before reaching this frame.
        ack_rx.await.unwrap_or(Err(Error::ConnectionClosed))
    }

    /// Get current pending frame count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Whether the writer task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task ends when `signal` fires, when every handle is dropped, or on
/// the first write error (which it reports through `signal`).
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
    signal: ShutdownSignal,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
    };

    let task = tokio::spawn(writer_loop(rx, writer, pending, signal));

    (handle, task)
}

/// Main writer loop - receives frames and writes them to the socket.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
    signal: ShutdownSignal,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = tokio::select! {
            biased;
            _ = signal.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(f) => f,
                None => break,
            },
        };

        // Collect additional ready frames (non-blocking)
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        let result = write_batch(&mut writer, &batch).await;
        pending.fetch_sub(batch_size, Ordering::Release);

        match result {
            Ok(()) => {
                for frame in &mut batch {
                    frame.acknowledge(Ok(()));
                }
            }
            Err(e) => {
                tracing::warn!("Write failed, closing connection: {}", e);
                for frame in &mut batch {
                    frame.acknowledge(Err(duplicate_io_error(&e)));
                }
                signal.trigger(e);
                return Err(Error::ConnectionClosed);
            }
        }
    }

    rx.close();
    let _ = writer.shutdown().await;
    tracing::debug!("Writer stopped");
    Ok(())
}

fn duplicate_io_error(error: &Error) -> Error {
    match error {
        Error::Io(e) => Error::Io(std::io::Error::new(e.kind(), e.to_string())),
        _ => Error::ConnectionClosed,
    }
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        if slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data after the first `skip_bytes`.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 3);
    let mut offset = 0;

    for frame in batch {
        for part in [&frame.header[..], &frame.body[..], &frame.payload[..]] {
            if part.is_empty() {
                continue;
            }
            let end = offset + part.len();
            if skip_bytes < end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&part[start..]));
            }
            offset = end;
        }
    }

    slices
}
