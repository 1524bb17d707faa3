//! Per-connection receive loop.
//!
//! Reads frames from the socket's read half and hands each to the
//! [`Dispatcher`]. The read is raced against the connection's
//! [`ShutdownSignal`], so a local close stops the loop without waiting on
//! the socket.
//!
//! Transport errors and oversized sync payloads always end the loop. What
//! happens to a body that cannot be parsed or dispatched depends on
//! [`MalformedFramePolicy`]. On exit every RPC waiter queued on this loop's
//! dispatcher is discarded, which wakes anyone awaiting a reply. Each
//! connection gets its own waiter queues (see [`Dispatcher::fork`]), so a
//! loop winding down never touches a newer connection's waiters.

use std::sync::Arc;

use tokio::io::AsyncRead;

use crate::config::MalformedFramePolicy;
use crate::error::{Error, Result};
use crate::handler::Dispatcher;
use crate::protocol::read_frame_limited;
use crate::transport::ShutdownSignal;

/// Why a receive loop stopped.
#[derive(Debug, Clone)]
pub struct LoopExit {
    /// First reported reason.
    pub reason: Arc<Error>,
    /// Whether this side asked for the close.
    pub local: bool,
}

/// Run until the signal fires or a fatal error occurs.
///
/// The loop reports its own failures through `signal`, so the returned
/// [`LoopExit`] always reflects the first reason recorded for the connection.
pub async fn receive_loop<R>(
    mut reader: R,
    dispatcher: Dispatcher,
    signal: ShutdownSignal,
    policy: MalformedFramePolicy,
    max_payload: usize,
) -> LoopExit
where
    R: AsyncRead + Unpin,
{
    let mut received = 0u64;

    loop {
        let result = tokio::select! {
            biased;
            _ = signal.cancelled() => break,
            result = read_frame_limited(&mut reader, max_payload) => result,
        };

        let outcome: Result<()> = result.and_then(|frame| {
            received += 1;
            dispatcher.dispatch(&frame)
        });

        match outcome {
            Ok(()) => {}
            Err(e) if !e.desyncs_stream() && policy == MalformedFramePolicy::Skip => {
                tracing::warn!("Dropping malformed frame: {}", e);
            }
            Err(e) => {
                if e.is_transport() {
                    tracing::debug!("Receive loop read failed: {}", e);
                } else {
                    tracing::warn!("Malformed frame, closing connection: {}", e);
                }
                signal.trigger(e);
                break;
            }
        }
    }

    let dropped = dispatcher.pending().clear();
    let (reason, local) = signal
        .reason()
        .unwrap_or_else(|| (Arc::new(Error::ConnectionClosed), true));

    tracing::debug!(
        "Receive loop stopped after {} frames ({} waiters discarded): {}",
        received,
        dropped,
        reason
    );

    LoopExit { reason, local }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{write_frame, Frame, MessageType, DEFAULT_MAX_PAYLOAD_SIZE};
    use parking_lot::Mutex;
    use tokio::io::{duplex, AsyncWriteExt};

    fn spawn_loop(
        reader: tokio::io::DuplexStream,
        dispatcher: Dispatcher,
        policy: MalformedFramePolicy,
    ) -> (ShutdownSignal, tokio::task::JoinHandle<LoopExit>) {
        let signal = ShutdownSignal::new();
        let task = tokio::spawn(receive_loop(
            reader,
            dispatcher,
            signal.clone(),
            policy,
            DEFAULT_MAX_PAYLOAD_SIZE,
        ));
        (signal, task)
    }

    async fn write_raw_body(writer: &mut tokio::io::DuplexStream, body: &[u8]) {
        writer
            .write_all(&(body.len() as u16).to_be_bytes())
            .await
            .unwrap();
        writer.write_all(body).await.unwrap();
    }

    #[tokio::test]
    async fn test_frames_reach_handlers_in_order() {
        let (mut peer, reader) = duplex(4096);
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        dispatcher
            .handlers()
            .register(MessageType::NotifyAvailable, move |frame| {
                log.lock().push(frame.get_i64("content_id")?);
                Ok(())
            });

        let (_signal, task) = spawn_loop(reader, dispatcher, MalformedFramePolicy::Disconnect);

        for id in [1, 2, 3] {
            let frame = Frame::new(MessageType::NotifyAvailable).with_field("content_id", id);
            write_frame(&mut peer, &frame).await.unwrap();
        }
        drop(peer);

        let exit = task.await.unwrap();
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
        assert!(matches!(*exit.reason, Error::ConnectionClosed));
        assert!(!exit.local);
    }

    #[tokio::test]
    async fn test_local_close_stops_loop() {
        let (_peer, reader) = duplex(4096);
        let (signal, task) = spawn_loop(reader, Dispatcher::new(), MalformedFramePolicy::Disconnect);

        signal.close_locally();
        let exit = task.await.unwrap();
        assert!(exit.local);
    }

    #[tokio::test]
    async fn test_malformed_body_disconnects_by_default() {
        let (mut peer, reader) = duplex(4096);
        let (signal, task) = spawn_loop(reader, Dispatcher::new(), MalformedFramePolicy::Disconnect);

        write_raw_body(&mut peer, b"{not json").await;

        let exit = task.await.unwrap();
        assert!(matches!(*exit.reason, Error::Json(_)));
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_skip_policy_keeps_loop_alive() {
        let (mut peer, reader) = duplex(4096);
        let dispatcher = Dispatcher::new();
        let pings = Arc::new(Mutex::new(0));
        let counter = pings.clone();
        dispatcher.handlers().register(MessageType::Ping, move |_| {
            *counter.lock() += 1;
            Ok(())
        });

        let (_signal, task) = spawn_loop(reader, dispatcher, MalformedFramePolicy::Skip);

        write_raw_body(&mut peer, b"{not json").await;
        write_raw_body(&mut peer, br#"{"message_id":99}"#).await;
        write_frame(&mut peer, &Frame::new(MessageType::Ping).with_field("token", 1))
            .await
            .unwrap();
        drop(peer);

        let exit = task.await.unwrap();
        assert_eq!(*pings.lock(), 1);
        assert!(matches!(*exit.reason, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_exit_discards_pending_waiters() {
        let (peer, reader) = duplex(4096);
        let dispatcher = Dispatcher::new();
        let reply = dispatcher.pending().expect(MessageType::AuthenticateResponse);

        let (_signal, task) = spawn_loop(reader, dispatcher.clone(), MalformedFramePolicy::Disconnect);
        drop(peer);

        task.await.unwrap();
        assert!(reply.await.is_err());
        assert!(dispatcher.pending().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_payload_disconnects_even_when_skipping() {
        let (mut peer, reader) = duplex(4096);
        let signal = ShutdownSignal::new();
        let task = tokio::spawn(receive_loop(
            reader,
            Dispatcher::new(),
            signal.clone(),
            MalformedFramePolicy::Skip,
            16,
        ));

        let announced = Frame::new(MessageType::SyncResponse)
            .with_field("content_id", 1)
            .with_field("content_size", 1_000_000)
            .with_field("message", 1);
        write_frame(&mut peer, &announced).await.unwrap();

        let exit = task.await.unwrap();
        assert!(matches!(
            *exit.reason,
            Error::PayloadTooLarge { size: 1_000_000, max: 16 }
        ));
        assert!(!exit.local);
    }

    #[tokio::test]
    async fn test_exit_leaves_other_connections_waiters() {
        let shared = Dispatcher::new();
        let old = shared.fork();
        let current = shared.fork();

        let (old_peer, old_reader) = duplex(4096);
        let (mut current_peer, current_reader) = duplex(4096);
        let (_old_signal, old_task) =
            spawn_loop(old_reader, old, MalformedFramePolicy::Disconnect);
        let (_current_signal, _current_task) =
            spawn_loop(current_reader, current.clone(), MalformedFramePolicy::Disconnect);

        let reply = current.pending().expect(MessageType::AuthenticateResponse);
        drop(old_peer);
        old_task.await.unwrap();

        assert_eq!(current.pending().len(MessageType::AuthenticateResponse), 1);
        let frame = Frame::new(MessageType::AuthenticateResponse).with_field("token", 9);
        write_frame(&mut current_peer, &frame).await.unwrap();
        assert_eq!(reply.await.unwrap().get_i64("token").unwrap(), 9);
    }
}
