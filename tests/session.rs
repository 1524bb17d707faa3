//! Session behavior against a scripted peer on a local socket.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use clipwire::protocol::{
    read_frame, write_frame, AuthenticateRequest, AuthenticateResponse, IndexEntry, Message,
    NotifyAvailable, Ping, RefreshIndexRequest, RefreshIndexResponse, SyncRequest, SyncResponse,
};
use clipwire::{
    Credentials, Endpoint, Error, MalformedFramePolicy, MessageType, Session, SessionBuilder,
    SessionEvent, SessionState,
};

async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

async fn listen() -> (TcpListener, Endpoint) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::from(listener.local_addr().unwrap());
    (listener, endpoint)
}

fn builder(endpoint: Endpoint) -> SessionBuilder {
    Session::builder().endpoint(endpoint).auto_reconnect(false)
}

/// Connect `builder`'s session to a fresh peer.
async fn connected(
    configure: impl FnOnce(SessionBuilder) -> SessionBuilder,
) -> (Session, TcpStream, TcpListener) {
    let (listener, endpoint) = listen().await;
    let session = configure(builder(endpoint)).build().unwrap();
    let connecting = session.connect();
    let (stream, _) = within(listener.accept()).await.unwrap();
    assert!(within(connecting.get()).await.unwrap());
    (session, stream, listener)
}

async fn write_raw_body(stream: &mut TcpStream, body: &[u8]) {
    stream
        .write_all(&(body.len() as u16).to_be_bytes())
        .await
        .unwrap();
    stream.write_all(body).await.unwrap();
}

/// Count pings from the session until `window` has passed.
async fn pings_within(peer: &mut TcpStream, window: Duration) -> usize {
    let deadline = tokio::time::Instant::now() + window;
    let mut count = 0;
    while let Ok(frame) = tokio::time::timeout_at(deadline, read_frame(&mut *peer)).await {
        assert_eq!(frame.unwrap().message_type, MessageType::Ping);
        count += 1;
    }
    count
}

async fn next_event(rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> SessionEvent {
    within(rx.recv()).await.unwrap()
}

#[tokio::test]
async fn test_authenticate_stores_token() {
    let (listener, endpoint) = listen().await;
    let session = builder(endpoint).build().unwrap();

    let started = session.start(Credentials::new(1, 2, 3));
    let (mut peer, _) = within(listener.accept()).await.unwrap();

    let request = within(read_frame(&mut peer)).await.unwrap();
    assert_eq!(request.message_type, MessageType::AuthenticateRequest);
    assert_eq!(
        request.parse::<AuthenticateRequest>().unwrap(),
        AuthenticateRequest {
            user_id: 1,
            device_id: 2,
            secret: 3
        }
    );

    let reply = AuthenticateResponse { token: 7 }.to_frame().unwrap();
    write_frame(&mut peer, &reply).await.unwrap();

    assert!(within(started.get()).await.unwrap());
    assert_eq!(session.token(), 7);
    assert_eq!(session.state(), SessionState::Authenticated);
}

#[tokio::test]
async fn test_zero_token_is_rejection() {
    let (session, mut peer, _listener) = connected(|b| b).await;

    let auth = session.authenticate(Credentials::new(1, 2, 3));
    within(read_frame(&mut peer)).await.unwrap();
    let reply = AuthenticateResponse { token: 0 }.to_frame().unwrap();
    write_frame(&mut peer, &reply).await.unwrap();

    assert!(!within(auth.get()).await.unwrap());
    assert_eq!(session.token(), 0);
    assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_authenticate_waits_until_connection_drops() {
    let (session, mut peer, _listener) = connected(|b| b).await;

    let auth = session.authenticate(Credentials::new(1, 2, 3));
    within(read_frame(&mut peer)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!auth.is_done());

    drop(peer);
    match within(auth.get()).await {
        Err(Error::TaskFailed(e)) => assert!(matches!(*e, Error::ConnectionClosed)),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_auth_timeout_closes_connection() {
    let (session, mut peer, _listener) =
        connected(|b| b.auth_timeout(Some(Duration::from_secs(1)))).await;
    let mut events = session.subscribe();

    let auth = session.authenticate(Credentials::new(1, 2, 3));
    within(read_frame(&mut peer)).await.unwrap();

    match within(auth.get()).await {
        Err(Error::TaskFailed(e)) => assert!(matches!(*e, Error::AuthTimeout)),
        other => panic!("unexpected outcome: {:?}", other),
    }

    match next_event(&mut events).await {
        SessionEvent::Disconnected(d) => {
            assert!(!d.local);
            assert!(matches!(*d.reason, Error::AuthTimeout));
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(within(read_frame(&mut peer)).await.is_err());
}

#[tokio::test]
async fn test_authenticate_without_connection() {
    let (_listener, endpoint) = listen().await;
    let session = builder(endpoint).build().unwrap();

    match within(session.authenticate(Credentials::new(1, 2, 3)).get()).await {
        Err(Error::TaskFailed(e)) => assert!(matches!(*e, Error::NotConnected)),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_sync_responder_serves_cached_content() {
    let (session, mut peer, _listener) = connected(|b| b).await;

    let announced = session.notify_available(42, vec!["text/plain".into()], "hello");
    assert!(within(announced.get()).await.unwrap());

    let notify: NotifyAvailable = within(read_frame(&mut peer))
        .await
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(notify.content_id, 42);
    assert_eq!(notify.dataset_id, 1);
    assert_eq!(notify.content_type, vec!["text/plain".to_string()]);
    assert_eq!(notify.description, "hello");

    let ask = SyncRequest {
        token: 0,
        dataset_id: 1,
        content_id: 42,
    };
    write_frame(&mut peer, &ask.to_frame().unwrap()).await.unwrap();

    let reply = within(read_frame(&mut peer)).await.unwrap();
    let response: SyncResponse = reply.parse().unwrap();
    assert_eq!(response.content_id, 42);
    assert_eq!(response.message, 1);
    assert_eq!(response.content_size, 5);
    assert_eq!(reply.payload(), b"hello");
}

#[tokio::test]
async fn test_sync_responder_reports_missing_content() {
    let (_session, mut peer, _listener) = connected(|b| b).await;

    let ask = SyncRequest {
        token: 0,
        dataset_id: 1,
        content_id: 99,
    };
    write_frame(&mut peer, &ask.to_frame().unwrap()).await.unwrap();

    let reply = within(read_frame(&mut peer)).await.unwrap();
    let response: SyncResponse = reply.parse().unwrap();
    assert_eq!(response.content_id, 99);
    assert_eq!(response.message, 0);
    assert_eq!(response.content_size, 0);
    assert!(reply.payload().is_empty());
}

#[tokio::test]
async fn test_announce_with_separate_payload() {
    let (session, mut peer, _listener) = connected(|b| b).await;

    let announced = session.notify_available_with_payload(
        5,
        vec!["image/png".into()],
        "screenshot",
        Bytes::from_static(&[0x89, 0x50, 0x4e, 0x47]),
    );
    assert!(within(announced.get()).await.unwrap());
    within(read_frame(&mut peer)).await.unwrap();

    let ask = SyncRequest {
        token: 0,
        dataset_id: 1,
        content_id: 5,
    };
    write_frame(&mut peer, &ask.to_frame().unwrap()).await.unwrap();

    let reply = within(read_frame(&mut peer)).await.unwrap();
    assert_eq!(reply.get_i64("content_size").unwrap(), 4);
    assert_eq!(reply.payload(), &[0x89, 0x50, 0x4e, 0x47]);
}

#[tokio::test]
async fn test_announce_without_connection_still_caches() {
    let (_listener, endpoint) = listen().await;
    let session = builder(endpoint).build().unwrap();

    let announced = session.notify_available(3, vec![], "offline");
    assert!(!within(announced.get()).await.unwrap());
    assert_eq!(
        session.content_cache().get(3).unwrap(),
        Bytes::from_static(b"offline")
    );
}

#[tokio::test]
async fn test_request_sync_found_and_missing() {
    let (session, mut peer, _listener) = connected(|b| b).await;

    let found = session.request_sync(5);
    let ask: SyncRequest = within(read_frame(&mut peer))
        .await
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(ask.content_id, 5);

    let reply = SyncResponse {
        token: 0,
        dataset_id: 1,
        content_id: 5,
        content_size: 3,
        message: 1,
    }
    .to_frame()
    .unwrap()
    .with_payload(Bytes::from_static(b"abc"));
    write_frame(&mut peer, &reply).await.unwrap();
    assert_eq!(
        within(found.get()).await.unwrap(),
        Some(Bytes::from_static(b"abc"))
    );

    let missing = session.request_sync(6);
    within(read_frame(&mut peer)).await.unwrap();
    let reply = SyncResponse {
        token: 0,
        dataset_id: 1,
        content_id: 6,
        content_size: 0,
        message: 0,
    }
    .to_frame()
    .unwrap();
    write_frame(&mut peer, &reply).await.unwrap();
    assert_eq!(within(missing.get()).await.unwrap(), None);
}

#[tokio::test]
async fn test_refresh_index() {
    let (session, mut peer, _listener) = connected(|b| b).await;

    let refresh = session.refresh_index();
    let ask: RefreshIndexRequest = within(read_frame(&mut peer))
        .await
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(ask.dataset_id, 1);

    let reply = RefreshIndexResponse {
        message: 1,
        contents: vec![
            IndexEntry {
                id: 1,
                content_type: vec!["text/plain".into()],
                description: "first".into(),
            },
            IndexEntry {
                id: 2,
                content_type: vec![],
                description: "second".into(),
            },
        ],
    }
    .to_frame()
    .unwrap();
    write_frame(&mut peer, &reply).await.unwrap();

    let items = within(refresh.get()).await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].content_id, 1);
    assert_eq!(items[0].description, "first");
    assert_eq!(items[1].content_id, 2);
}

#[tokio::test]
async fn test_peer_announcement_published() {
    let (session, mut peer, _listener) = connected(|b| b).await;
    let mut events = session.subscribe();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    session.on_content_available(move |item| log.lock().push(item.content_id));

    let notify = NotifyAvailable {
        token: 0,
        dataset_id: 1,
        content_id: 11,
        content_type: vec!["text/plain".into()],
        description: "from peer".into(),
    };
    write_frame(&mut peer, &notify.to_frame().unwrap())
        .await
        .unwrap();

    match next_event(&mut events).await {
        SessionEvent::ContentAvailable(item) => {
            assert_eq!(item.content_id, 11);
            assert_eq!(item.description, "from peer");
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(*seen.lock(), vec![11]);
}

#[tokio::test]
async fn test_malformed_frame_disconnects_by_default() {
    let (session, mut peer, _listener) = connected(|b| b).await;
    let mut events = session.subscribe();

    write_raw_body(&mut peer, b"not json").await;

    match next_event(&mut events).await {
        SessionEvent::Disconnected(d) => assert!(!d.local),
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!session.is_connected());
}

#[tokio::test]
async fn test_malformed_frame_skipped_when_configured() {
    let (session, mut peer, _listener) =
        connected(|b| b.malformed_frames(MalformedFramePolicy::Skip)).await;
    let mut events = session.subscribe();

    write_raw_body(&mut peer, b"not json").await;
    write_raw_body(&mut peer, br#"{"message_id":999}"#).await;
    let notify = NotifyAvailable {
        token: 0,
        dataset_id: 1,
        content_id: 12,
        content_type: vec![],
        description: String::new(),
    };
    write_frame(&mut peer, &notify.to_frame().unwrap())
        .await
        .unwrap();

    match next_event(&mut events).await {
        SessionEvent::ContentAvailable(item) => assert_eq!(item.content_id, 12),
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(session.is_connected());
}

#[tokio::test]
async fn test_explicit_disconnect_is_local_and_final() {
    let (listener, endpoint) = listen().await;
    let session = Session::builder()
        .endpoint(endpoint)
        .reconnect_delay(Duration::from_secs(1))
        .build()
        .unwrap();
    let connecting = session.connect();
    let (mut peer, _) = within(listener.accept()).await.unwrap();
    assert!(within(connecting.get()).await.unwrap());

    let mut events = session.subscribe();
    assert!(session.disconnect());

    match next_event(&mut events).await {
        SessionEvent::Disconnected(d) => {
            assert!(d.local);
            assert!(matches!(*d.reason, Error::ConnectionClosed));
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(within(read_frame(&mut peer)).await.is_err());
    assert!(!session.is_reconnecting());
    assert_eq!(session.state(), SessionState::Disconnected);

    // Nothing should dial back in.
    let redial = tokio::time::timeout(Duration::from_secs(2), listener.accept()).await;
    assert!(redial.is_err());
}

#[tokio::test]
async fn test_failed_connect_reported() {
    let (listener, endpoint) = listen().await;
    drop(listener);
    let session = builder(endpoint).build().unwrap();
    let mut events = session.subscribe();

    assert!(!within(session.connect().get()).await.unwrap());
    match next_event(&mut events).await {
        SessionEvent::Disconnected(d) => assert!(!d.local),
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_reconnect_after_drop_reauthenticates() {
    let (listener, endpoint) = listen().await;
    let session = Session::builder()
        .endpoint(endpoint)
        .reconnect_delay(Duration::from_secs(1))
        .build()
        .unwrap();

    let started = session.start(Credentials::new(1, 2, 3));
    let (mut first, _) = within(listener.accept()).await.unwrap();
    within(read_frame(&mut first)).await.unwrap();
    let reply = AuthenticateResponse { token: 7 }.to_frame().unwrap();
    write_frame(&mut first, &reply).await.unwrap();
    assert!(within(started.get()).await.unwrap());

    let mut events = session.subscribe();
    drop(first);
    match next_event(&mut events).await {
        SessionEvent::Disconnected(d) => assert!(!d.local),
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(session.is_reconnecting());

    let (mut second, _) = within(listener.accept()).await.unwrap();
    let request: AuthenticateRequest = within(read_frame(&mut second))
        .await
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(request.user_id, 1);
    let reply = AuthenticateResponse { token: 9 }.to_frame().unwrap();
    write_frame(&mut second, &reply).await.unwrap();

    let mut state = session.watch_state();
    within(state.wait_for(|s| *s == SessionState::Authenticated))
        .await
        .unwrap();
    assert_eq!(session.token(), 9);
}

#[tokio::test]
async fn test_heartbeat_sends_ping_with_token() {
    let (session, mut peer, _listener) = connected(|b| b).await;

    let auth = session.authenticate(Credentials::new(1, 2, 3));
    within(read_frame(&mut peer)).await.unwrap();
    let reply = AuthenticateResponse { token: 21 }.to_frame().unwrap();
    write_frame(&mut peer, &reply).await.unwrap();
    assert!(within(auth.get()).await.unwrap());

    session.heartbeat(Duration::from_millis(10), Duration::from_millis(50));
    for _ in 0..2 {
        let ping: Ping = within(read_frame(&mut peer))
            .await
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(ping.token, 21);
    }
    session.sleep();
}

#[tokio::test]
async fn test_dispose_rejects_later_operations() {
    let (session, _peer, _listener) = connected(|b| b).await;

    session.dispose();
    assert!(!session.is_connected());
    assert!(matches!(
        within(session.connect().get()).await,
        Err(Error::Cancelled)
    ));
}

#[tokio::test]
async fn test_heartbeat_replaces_previous_schedule() {
    let (session, mut peer, _listener) = connected(|b| b).await;

    session.heartbeat(Duration::from_millis(300), Duration::from_millis(300));
    session.heartbeat(Duration::from_millis(100), Duration::from_secs(60));

    let first = within(read_frame(&mut peer)).await.unwrap();
    assert_eq!(first.message_type, MessageType::Ping);
    // The replaced schedule would have pinged at 300 ms and 600 ms.
    assert_eq!(pings_within(&mut peer, Duration::from_millis(800)).await, 0);
    session.sleep();
}

#[tokio::test]
async fn test_wake_twice_keeps_one_ping_stream() {
    let (session, mut peer, _listener) =
        connected(|b| b.heartbeat(Duration::from_secs(1), Duration::from_secs(1))).await;

    session.wake();
    session.wake();

    assert_eq!(pings_within(&mut peer, Duration::from_millis(2500)).await, 2);
    session.sleep();
}

#[tokio::test]
async fn test_sleep_stops_pings() {
    let (session, mut peer, _listener) = connected(|b| b).await;

    session.heartbeat(Duration::from_millis(10), Duration::from_millis(100));
    within(read_frame(&mut peer)).await.unwrap();
    session.sleep();

    // A tick queued just before sleep may still go out.
    assert!(pings_within(&mut peer, Duration::from_millis(600)).await <= 1);
    assert!(session.is_connected());
}

#[tokio::test]
async fn test_two_drops_schedule_one_reconnect() {
    let (listener, endpoint) = listen().await;
    let session = Session::builder()
        .endpoint(endpoint)
        .reconnect_delay(Duration::from_secs(1))
        .build()
        .unwrap();
    let mut events = session.subscribe();

    let connecting = session.connect();
    let (first, _) = within(listener.accept()).await.unwrap();
    assert!(within(connecting.get()).await.unwrap());
    drop(first);
    match next_event(&mut events).await {
        SessionEvent::Disconnected(d) => assert!(!d.local),
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(session.is_reconnecting());

    // A second connection drops while the attempt is still pending.
    let connecting = session.connect();
    let (second, _) = within(listener.accept()).await.unwrap();
    assert!(within(connecting.get()).await.unwrap());
    drop(second);
    match next_event(&mut events).await {
        SessionEvent::Disconnected(d) => assert!(!d.local),
        other => panic!("unexpected event: {:?}", other),
    }

    let (_third, _) = within(listener.accept()).await.unwrap();
    let mut state = session.watch_state();
    within(state.wait_for(|s| s.is_connected())).await.unwrap();
    within(async {
        while session.is_reconnecting() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    let redial = tokio::time::timeout(Duration::from_secs(2), listener.accept()).await;
    assert!(redial.is_err());
    session.dispose();
}

#[tokio::test]
async fn test_disconnect_abandons_queued_connect() {
    let (listener, endpoint) = listen().await;
    let session = builder(endpoint).build().unwrap();

    let (release, gate) = tokio::sync::oneshot::channel::<()>();
    let busy = session.worker().submit(move || async move {
        let _ = gate.await;
        Ok(())
    });
    let connecting = session.connect();

    assert!(!session.disconnect());
    release.send(()).unwrap();
    within(busy.get()).await.unwrap();

    match within(connecting.get()).await {
        Err(Error::TaskFailed(e)) => assert!(matches!(*e, Error::Cancelled)),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(!session.is_connected());
    let dialed = tokio::time::timeout(Duration::from_millis(500), listener.accept()).await;
    assert!(dialed.is_err());
}

#[tokio::test]
async fn test_dispose_during_connect_discards_connection() {
    let (listener, endpoint) = listen().await;
    let session = builder(endpoint).build().unwrap();
    let mut state = session.watch_state();

    let connecting = session.connect();
    within(state.wait_for(|s| *s == SessionState::Connecting))
        .await
        .unwrap();
    session.dispose();

    match within(connecting.get()).await {
        Err(Error::TaskFailed(e)) => assert!(matches!(*e, Error::Cancelled)),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(!session.is_connected());
    assert_eq!(session.state(), SessionState::Disconnected);

    // The socket opened underneath is closed rather than kept.
    let (mut peer, _) = within(listener.accept()).await.unwrap();
    assert!(within(read_frame(&mut peer)).await.is_err());
}
