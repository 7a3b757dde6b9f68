
use std::sync::atomic::Ordering;
use std::time::Duration;

use harness::{dead_backend, Behavior, RecordingBackend, RelayHandle};
use race_relay::ListenerConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

#[tokio::test]
async fn echo_is_byte_exact() {
    let backend = RecordingBackend::spawn(Behavior::Echo).await.unwrap();
    let relay = RelayHandle::spawn(vec![backend.backend_addr()]).await.unwrap();

    let payload: Vec<u8> = (0..100_000u32).map(|i| (i * 7 % 256) as u8).collect();
    let stream = relay.connect().await.unwrap();
    let (mut rd, mut wr) = stream.into_split();

    let write = async {
        wr.write_all(&payload).await.unwrap();
        wr.shutdown().await.unwrap();
    };
    let read = async {
        let mut echoed = Vec::new();
        rd.read_to_end(&mut echoed).await.unwrap();
        echoed
    };

    let (_, echoed) = timeout(Duration::from_secs(5), async { tokio::join!(write, read) })
        .await
        .expect("echo should complete");
    assert_eq!(echoed, payload);
    assert_eq!(backend.bytes_received(), payload.len() as u64);
}

#[tokio::test]
async fn refused_backend_closes_client_without_relay() {
    let dead = dead_backend().await;
    let relay = RelayHandle::spawn(vec![dead]).await.unwrap();

    let mut stream = relay.connect().await.unwrap();
    let mut buf = Vec::new();
    let n = timeout(Duration::from_secs(3), stream.read_to_end(&mut buf))
        .await
        .expect("client should be closed promptly")
        .unwrap_or(0);
    assert_eq!(n, 0);

    let stats = relay.listener.stats();
    assert!(
        relay
            .wait_until(Duration::from_secs(1), |r| r
                .listener
                .stats()
                .backend_unavailable
                .load(Ordering::SeqCst)
                == 1)
            .await
    );
    assert_eq!(stats.backend_connected.load(Ordering::SeqCst), 0);
    assert_eq!(stats.bytes_to_backend.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn live_backend_wins_over_dead_one() {
    let dead = dead_backend().await;
    let live = RecordingBackend::spawn(Behavior::Echo).await.unwrap();
    let relay = RelayHandle::spawn(vec![dead, live.backend_addr()])
        .await
        .unwrap();

    let mut stream = relay.connect().await.unwrap();
    stream.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"hello");
    assert_eq!(live.connection_count(), 1);
}

#[tokio::test]
async fn ping_pong_session_stays_open() {
    let backend = RecordingBackend::spawn(Behavior::PingPong).await.unwrap();
    let relay = RelayHandle::spawn(vec![backend.backend_addr()]).await.unwrap();

    let mut stream = relay.connect().await.unwrap();
    stream.write_all(b"PING\n").await.unwrap();

    let mut reply = [0u8; 5];
    timeout(Duration::from_secs(2), stream.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&reply, b"PONG\n");
    assert_eq!(backend.bytes_received(), 5);

    // Neither side closes, so the session must stay up.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(relay.active_sessions(), 1);

    drop(stream);
    assert!(
        relay
            .wait_until(Duration::from_secs(2), |r| r.active_sessions() == 0)
            .await,
        "session should end once both sides close"
    );
}

#[tokio::test]
async fn client_half_close_still_receives_response() {
    let backend = RecordingBackend::spawn(Behavior::CountThenReply)
        .await
        .unwrap();
    let relay = RelayHandle::spawn(vec![backend.backend_addr()]).await.unwrap();

    let mut stream = relay.connect().await.unwrap();
    stream.write_all(b"0123456789").await.unwrap();
    stream.shutdown().await.unwrap();

    let mut response = String::new();
    timeout(Duration::from_secs(2), stream.read_to_string(&mut response))
        .await
        .expect("response should arrive after half-close")
        .unwrap();
    assert_eq!(response, "received 10\n");

    assert!(
        relay
            .wait_until(Duration::from_secs(2), |r| r.active_sessions() == 0)
            .await
    );
    let stats = relay.listener.stats();
    assert_eq!(stats.bytes_to_backend.load(Ordering::SeqCst), 10);
    assert_eq!(stats.bytes_from_backend.load(Ordering::SeqCst), 12);
}

#[tokio::test]
async fn losing_connection_is_closed_unused() {
    let first = RecordingBackend::spawn(Behavior::Echo).await.unwrap();
    let second = RecordingBackend::spawn(Behavior::Echo).await.unwrap();
    let relay = RelayHandle::spawn(vec![first.backend_addr(), second.backend_addr()])
        .await
        .unwrap();

    let mut stream = relay.connect().await.unwrap();
    stream.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"ping");

    // Both backends were dialed; the loser saw EOF without any bytes.
    let closed = relay
        .wait_until(Duration::from_secs(2), |_| {
            first.silent_close_count() + second.silent_close_count() == 1
        })
        .await;
    assert!(closed, "losing connection should be closed");
    assert_eq!(first.connection_count() + second.connection_count(), 2);
    assert_eq!(first.bytes_received() + second.bytes_received(), 4);

    let race_stats = &relay.listener.context().race_stats;
    assert_eq!(race_stats.dials_attempted.load(Ordering::SeqCst), 2);
    assert_eq!(race_stats.losers_closed.load(Ordering::SeqCst), 1);

    drop(stream);
    assert!(
        relay
            .wait_until(Duration::from_secs(2), |r| r.active_sessions() == 0)
            .await
    );
}

#[tokio::test]
async fn sessions_are_independent() {
    let backend = RecordingBackend::spawn(Behavior::Echo).await.unwrap();
    let relay = RelayHandle::spawn(vec![backend.backend_addr()]).await.unwrap();

    let mut clients = Vec::new();
    for i in 0..8u8 {
        let addr = relay.listen_addr;
        clients.push(tokio::spawn(async move {
            let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
            let msg = [i; 16];
            stream.write_all(&msg).await.unwrap();
            let mut buf = [0u8; 16];
            stream.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, msg);
        }));
    }

    for client in clients {
        timeout(Duration::from_secs(3), client)
            .await
            .unwrap()
            .unwrap();
    }
    assert_eq!(backend.connection_count(), 8);
}

#[tokio::test]
async fn connection_over_limit_is_closed() {
    let backend = RecordingBackend::spawn(Behavior::PingPong).await.unwrap();
    let mut config = ListenerConfig::new("127.0.0.1:0".parse().unwrap());
    config.max_connections = 1;
    let relay = RelayHandle::spawn_with(vec![backend.backend_addr()], config)
        .await
        .unwrap();

    // Hold the only slot with a live session.
    let mut first = relay.connect().await.unwrap();
    first.write_all(b"PING\n").await.unwrap();
    let mut reply = [0u8; 5];
    timeout(Duration::from_secs(2), first.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&reply, b"PONG\n");

    let mut second = relay.connect().await.unwrap();
    let mut buf = Vec::new();
    let n = timeout(Duration::from_secs(2), second.read_to_end(&mut buf))
        .await
        .expect("over-limit connection should be closed")
        .unwrap_or(0);
    assert_eq!(n, 0);

    let stats = relay.listener.stats();
    assert_eq!(stats.connections_rejected.load(Ordering::SeqCst), 1);
    assert_eq!(stats.connections_accepted.load(Ordering::SeqCst), 1);
    assert_eq!(backend.connection_count(), 1);

    // The first session is unaffected.
    first.write_all(b"PING\n").await.unwrap();
    timeout(Duration::from_secs(2), first.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&reply, b"PONG\n");

    // Once the slot frees up, new connections are served again.
    drop(first);
    assert!(
        relay
            .wait_until(Duration::from_secs(2), |r| r.active_sessions() == 0)
            .await
    );
    let mut third = relay.connect().await.unwrap();
    third.write_all(b"PING\n").await.unwrap();
    timeout(Duration::from_secs(2), third.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&reply, b"PONG\n");
}
