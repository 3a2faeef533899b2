use std::collections::HashMap;
use std::time::Duration;

use rigging_core::{Protocol, SocketAddress};
use rigging_socket::{Framing, InterceptListener, InterceptSpec, SocketController, SocketError, Wait};
use tempfile::TempDir;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{UnixDatagram, UnixListener};

const WINDOW: Duration = Duration::from_secs(5);

fn local_stream(dir: &TempDir, name: &str) -> SocketAddress {
    SocketAddress::local(dir.path().join(name), Protocol::Stream)
}

#[tokio::test]
async fn observe_mode_queues_every_unit_from_a_stream_client() {
    let dir = TempDir::new().unwrap();
    let address = local_stream(&dir, "queue");
    let mut listener = InterceptListener::new(InterceptSpec::observe(address.clone()));
    let mut observer = listener.observer().expect("first observer");
    assert!(listener.observer().is_none(), "observer is handed out once");

    listener.start().await.unwrap();
    assert!(address.path().unwrap().exists(), "node bound before start returns");

    let mut client = SocketController::new(address.clone(), Framing::LengthPrefixedLe);
    client.connect().await.unwrap();
    client.send(b"1:syscheck:event one").await.unwrap();
    client.send(b"1:syscheck:event two").await.unwrap();

    let items = observer.collect(2, Wait::Within(WINDOW)).await.unwrap();
    assert_eq!(items[0].text(), "1:syscheck:event one");
    assert_eq!(items[1].text(), "1:syscheck:event two");

    client.close().await;
    listener.shutdown().await.unwrap();
    assert!(!address.path().unwrap().exists(), "node removed on shutdown");
}

#[tokio::test]
async fn concurrent_senders_keep_per_sender_order() {
    let dir = TempDir::new().unwrap();
    let address = local_stream(&dir, "fifo");
    let mut listener =
        InterceptListener::new(InterceptSpec::observe(address.clone()).with_framing(Framing::Newline));
    let mut observer = listener.observer().unwrap();
    listener.start().await.unwrap();

    const SENDERS: usize = 4;
    const PER_SENDER: usize = 25;

    let mut tasks = Vec::new();
    for sender in 0..SENDERS {
        let address = address.clone();
        tasks.push(tokio::spawn(async move {
            let mut client = SocketController::new(address, Framing::Newline);
            client.connect().await.unwrap();
            for seq in 0..PER_SENDER {
                client.send(format!("{sender}:{seq}").as_bytes()).await.unwrap();
            }
            client.close().await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let items = observer
        .collect(SENDERS * PER_SENDER, Wait::Within(WINDOW))
        .await
        .unwrap();
    let mut last_seen: HashMap<String, i64> = HashMap::new();
    for item in &items {
        let text = item.text();
        let (sender, seq) = text.split_once(':').expect("sender:seq");
        let seq: i64 = seq.parse().unwrap();
        let previous = last_seen.insert(sender.to_string(), seq).unwrap_or(-1);
        assert_eq!(seq, previous + 1, "sender {sender} out of order");
    }
    assert_eq!(last_seen.len(), SENDERS);
    assert!(observer.try_next().is_none());

    listener.shutdown().await.unwrap();
}

#[tokio::test]
async fn second_listener_on_live_address_is_a_bind_conflict() {
    let dir = TempDir::new().unwrap();
    let address = local_stream(&dir, "owned");
    let mut first = InterceptListener::new(InterceptSpec::observe(address.clone()));
    first.start().await.unwrap();

    let mut second = InterceptListener::new(InterceptSpec::observe(address.clone()));
    let err = second.start().await.unwrap_err();
    assert!(matches!(err, SocketError::BindConflict { .. }), "got: {err}");
    assert!(address.path().unwrap().exists(), "loser must not remove the live node");

    first.shutdown().await.unwrap();
}

#[tokio::test]
async fn stale_node_is_replaced() {
    let dir = TempDir::new().unwrap();
    let address = local_stream(&dir, "stale");
    {
        let _orphan = std::os::unix::net::UnixListener::bind(address.path().unwrap()).unwrap();
    }
    assert!(address.path().unwrap().exists());

    let mut listener = InterceptListener::new(InterceptSpec::observe(address));
    listener.start().await.unwrap();
    listener.shutdown().await.unwrap();
}

#[tokio::test]
async fn forwarding_relays_units_and_replies() {
    let dir = TempDir::new().unwrap();
    let real = local_stream(&dir, "wdb-real");
    let upstream = UnixListener::bind(real.path().unwrap()).unwrap();
    let upstream_task = tokio::spawn(async move {
        let (stream, _) = upstream.accept().await.unwrap();
        let mut stream = BufReader::new(stream);
        let mut seen = Vec::new();
        while let Some(frame) = Framing::LengthPrefixedLe
            .read_frame(&mut stream, "upstream")
            .await
            .unwrap()
        {
            let reply = Framing::LengthPrefixedLe.encode(b"ok").unwrap();
            stream.get_mut().write_all(&reply).await.unwrap();
            seen.push(frame);
        }
        seen
    });

    let fake = local_stream(&dir, "wdb");
    let mut spec = InterceptSpec::observe(fake.clone()).forwarding_to(real);
    spec.reply_timeout_ms = Some(2_000);
    let mut listener = InterceptListener::new(spec);
    let mut observer = listener.observer().unwrap();
    listener.start().await.unwrap();

    let mut client = SocketController::new(fake, Framing::LengthPrefixedLe);
    client.connect().await.unwrap();
    let reply = client.request(b"agent 000 sql SELECT 1", WINDOW).await.unwrap();
    assert_eq!(reply, b"ok");

    let item = observer.poll(Wait::Within(WINDOW)).await.unwrap();
    assert_eq!(item.text(), "agent 000 sql SELECT 1");

    client.close().await;
    let seen = upstream_task.await.unwrap();
    assert_eq!(seen, vec![b"agent 000 sql SELECT 1".to_vec()]);

    listener.shutdown().await.unwrap();
}

#[tokio::test]
async fn tcp_listener_reports_ephemeral_port() {
    let spec = InterceptSpec::observe(SocketAddress::network("127.0.0.1:0", Protocol::Stream))
        .with_framing(Framing::LengthPrefixedBe);
    let mut listener = InterceptListener::new(spec);
    let mut observer = listener.observer().unwrap();
    listener.start().await.unwrap();

    let bound = listener.address().clone();
    assert_ne!(bound.location(), "127.0.0.1:0");

    let mut client = SocketController::new(bound, Framing::LengthPrefixedBe);
    client.connect().await.unwrap();
    client.send(b"#!-agent startup").await.unwrap();
    assert_eq!(
        observer.poll(Wait::Within(WINDOW)).await.unwrap().text(),
        "#!-agent startup"
    );

    client.close().await;
    listener.shutdown().await.unwrap();
}

#[tokio::test]
async fn datagram_listener_queues_each_message() {
    let dir = TempDir::new().unwrap();
    let address = SocketAddress::local(dir.path().join("queue"), Protocol::Datagram);
    let mut listener = InterceptListener::new(InterceptSpec::observe(address.clone()));
    let mut observer = listener.observer().unwrap();
    listener.start().await.unwrap();

    let sender = UnixDatagram::unbound().unwrap();
    sender.send_to(b"1:ossec:first", address.location()).await.unwrap();
    sender.send_to(b"1:ossec:second", address.location()).await.unwrap();

    let items = observer.collect(2, Wait::Within(WINDOW)).await.unwrap();
    assert_eq!(items[0].text(), "1:ossec:first");
    assert_eq!(items[1].text(), "1:ossec:second");

    listener.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_is_idempotent_and_closes_the_queue() {
    let dir = TempDir::new().unwrap();
    let address = local_stream(&dir, "once");
    let mut listener = InterceptListener::new(InterceptSpec::observe(address.clone()));
    let mut observer = listener.observer().unwrap();
    listener.start().await.unwrap();

    let mut client = SocketController::new(address, Framing::LengthPrefixedLe);
    client.connect().await.unwrap();

    listener.shutdown().await.unwrap();
    listener.shutdown().await.unwrap();

    assert!(matches!(
        observer.poll(Wait::Within(WINDOW)).await,
        Err(SocketError::QueueClosed(_))
    ));

    client.close().await;
    client.close().await;

    let restart = listener.start().await.unwrap_err();
    assert!(matches!(restart, SocketError::Protocol(_)));
}

#[tokio::test]
async fn units_are_queued_while_the_relay_target_is_down() {
    let dir = TempDir::new().unwrap();
    let address = local_stream(&dir, "wdb");
    let spec = InterceptSpec::observe(address.clone()).forwarding_to(local_stream(&dir, "wdb-not-running"));
    let mut listener = InterceptListener::new(spec);
    let mut observer = listener.observer().unwrap();
    listener.start().await.unwrap();

    let mut client = SocketController::new(address, Framing::LengthPrefixedLe);
    client.connect().await.unwrap();
    client.send(b"agent 001 syscheck save").await.unwrap();
    client.send(b"agent 001 syscheck load").await.unwrap();

    let items = observer.collect(2, Wait::Within(WINDOW)).await.unwrap();
    assert_eq!(items[0].text(), "agent 001 syscheck save");
    assert_eq!(items[1].text(), "agent 001 syscheck load");

    client.close().await;
    listener.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_completes_while_a_full_queue_is_unread() {
    let dir = TempDir::new().unwrap();
    let address = SocketAddress::local(dir.path().join("queue"), Protocol::Datagram);
    let mut spec = InterceptSpec::observe(address.clone());
    spec.capacity = Some(1);
    let mut listener = InterceptListener::new(spec);
    let _observer = listener.observer().unwrap();
    listener.start().await.unwrap();

    let sender = UnixDatagram::unbound().unwrap();
    for message in ["1:a", "1:b", "1:c"] {
        sender.send_to(message.as_bytes(), address.location()).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    tokio::time::timeout(Duration::from_secs(3), listener.shutdown())
        .await
        .expect("shutdown must not wait on the queue")
        .unwrap();
    assert!(!address.path().unwrap().exists());
}

#[tokio::test]
async fn regular_file_at_the_address_is_left_alone() {
    let dir = TempDir::new().unwrap();
    let address = local_stream(&dir, "not-a-socket");
    std::fs::write(address.path().unwrap(), "keep me").unwrap();

    let mut listener = InterceptListener::new(InterceptSpec::observe(address.clone()));
    let err = listener.start().await.unwrap_err();
    assert!(matches!(err, SocketError::Io { .. }), "got: {err}");
    assert_eq!(std::fs::read_to_string(address.path().unwrap()).unwrap(), "keep me");
}

#[tokio::test]
async fn large_datagram_is_queued_whole() {
    let dir = TempDir::new().unwrap();
    let address = SocketAddress::local(dir.path().join("queue"), Protocol::Datagram);
    let mut listener = InterceptListener::new(InterceptSpec::observe(address.clone()));
    let mut observer = listener.observer().unwrap();
    listener.start().await.unwrap();

    let payload: Vec<u8> = (0..100_000u32).map(|i| b'a' + (i % 26) as u8).collect();
    let sender = UnixDatagram::unbound().unwrap();
    sender.send_to(&payload, address.location()).await.unwrap();

    let item = observer.poll(Wait::Within(WINDOW)).await.unwrap();
    assert_eq!(item.payload.len(), 100_000);
    assert_eq!(item.payload, payload);

    listener.shutdown().await.unwrap();
}

#[tokio::test]
async fn take_over_displaces_a_live_node_and_puts_it_back() {
    let dir = TempDir::new().unwrap();
    let address = local_stream(&dir, "remote");
    let aside = local_stream(&dir, "remote.real");
    let daemon = UnixListener::bind(address.path().unwrap()).unwrap();
    // Liveness checks connect and hang up without sending anything.
    let daemon_task = tokio::spawn(async move {
        loop {
            let (stream, _) = daemon.accept().await.unwrap();
            let mut stream = BufReader::new(stream);
            if let Ok(Some(frame)) = Framing::LengthPrefixedLe.read_frame(&mut stream, "daemon").await {
                return frame;
            }
        }
    });

    let mut plain = InterceptListener::new(InterceptSpec::observe(address.clone()));
    assert!(matches!(plain.start().await, Err(SocketError::BindConflict { .. })));

    let spec = InterceptSpec::observe(address.clone())
        .forwarding_to(aside.clone())
        .taking_over();
    let mut listener = InterceptListener::new(spec);
    let mut observer = listener.observer().unwrap();
    listener.start().await.unwrap();
    assert!(aside.path().unwrap().exists(), "daemon node moved to the relay target");

    let mut client = SocketController::new(address.clone(), Framing::LengthPrefixedLe);
    client.connect().await.unwrap();
    client.send(b"#!-agent startup").await.unwrap();
    assert_eq!(observer.poll(Wait::Within(WINDOW)).await.unwrap().text(), "#!-agent startup");
    let forwarded = tokio::time::timeout(WINDOW, daemon_task).await.unwrap().unwrap();
    assert_eq!(forwarded, b"#!-agent startup".to_vec());

    client.close().await;
    listener.shutdown().await.unwrap();
    assert!(address.path().unwrap().exists(), "daemon node restored");
    assert!(!aside.path().unwrap().exists());
}
