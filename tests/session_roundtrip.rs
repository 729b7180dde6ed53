//! End-to-end session behavior against a scripted peer on an in-memory
//! pipe: hello negotiation, reply correlation, timeouts, notifications,
//! lock retry, and teardown.

use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use netconf::error::NetconfError;
use netconf::frame::FrameMode;
use netconf::manager::Manager;
use netconf::session::{Session, Transport};

const PEER_HELLO_11: &str = concat!(
    r#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><capabilities>"#,
    "<capability>urn:ietf:params:netconf:base:1.0</capability>",
    "<capability>urn:ietf:params:netconf:base:1.1</capability>",
    "</capabilities><session-id>7</session-id></hello>"
);

const PEER_HELLO_10: &str = concat!(
    r#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><capabilities>"#,
    "<capability>urn:ietf:params:netconf:base:1.0</capability>",
    "</capabilities><session-id>3</session-id></hello>"
);

fn eom(payload: &str) -> Vec<u8> {
    format!("{payload}]]>]]>").into_bytes()
}

fn chunk(payload: &str) -> Vec<u8> {
    format!("\n#{}\n{payload}\n##\n", payload.len()).into_bytes()
}

fn ok_reply(id: u64) -> String {
    format!(
        r#"<rpc-reply message-id="{id}" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><ok/></rpc-reply>"#
    )
}

fn data_reply(id: u64, data: &str) -> String {
    format!(
        r#"<rpc-reply message-id="{id}" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><data>{data}</data></rpc-reply>"#
    )
}

fn lock_denied_reply(id: u64) -> String {
    format!(
        concat!(
            r#"<rpc-reply message-id="{}" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">"#,
            "<rpc-error><error-type>protocol</error-type>",
            "<error-tag>lock-denied</error-tag>",
            "<error-severity>error</error-severity>",
            "<error-message>Lock is already held</error-message>",
            "<error-info><session-id>99</session-id></error-info>",
            "</rpc-error></rpc-reply>"
        ),
        id
    )
}

/// Reads until `needle` appears in the accumulated bytes; `None` on
/// end of stream.
async fn read_until(stream: &mut DuplexStream, needle: &[u8]) -> Option<Vec<u8>> {
    let mut collected = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        collected.extend_from_slice(&buf[..n]);
        if collected.windows(needle.len()).any(|w| w == needle) {
            return Some(collected);
        }
    }
}

fn message_id_of(raw: &[u8]) -> u64 {
    let text = String::from_utf8_lossy(raw);
    let start = text.find("message-id=\"").expect("request carries a message-id") + 12;
    let end = text[start..].find('"').expect("closing quote") + start;
    text[start..end].parse().expect("numeric message-id")
}

/// Establishes a session against a peer that sends `peer_hello` and
/// consumes the local hello, then hands the peer side back.
async fn start_session(peer_hello: &str) -> (Session, DuplexStream) {
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    let hello = eom(peer_hello);

    let (session, server) = tokio::join!(Session::establish(Transport::from_stream(client)), async {
        server.write_all(&hello).await.expect("peer hello write");
        read_until(&mut server, b"]]>]]>")
            .await
            .expect("local hello arrives");
        server
    });
    (session.expect("session establishes"), server)
}

#[tokio::test]
async fn hello_negotiates_chunked_framing() {
    let (session, _server) = start_session(PEER_HELLO_11).await;
    assert_eq!(session.session_id(), 7);
    assert_eq!(session.mode(), FrameMode::Chunked);
    assert!(
        session
            .server_capabilities()
            .iter()
            .any(|cap| cap == "urn:ietf:params:netconf:base:1.1")
    );
    assert!(
        session
            .client_capabilities()
            .iter()
            .any(|cap| cap == "urn:ietf:params:netconf:base:1.0")
    );
}

#[tokio::test]
async fn hello_without_base_11_stays_on_eom_framing() {
    let (session, mut server) = start_session(PEER_HELLO_10).await;
    assert_eq!(session.session_id(), 3);
    assert_eq!(session.mode(), FrameMode::Eom);

    // Requests on this session go out EOM-framed.
    let pending = session.send_rpc("<get/>").await.expect("send");
    let req = read_until(&mut server, b"]]>]]>").await.expect("request");
    assert!(req.ends_with(b"]]>]]>"));

    let reply = eom(&ok_reply(pending.message_id()));
    server.write_all(&reply).await.expect("reply write");
    let raw = pending.wait_timeout(Duration::from_secs(1)).await.expect("reply");
    assert!(raw.contains("<ok/>"));
}

#[tokio::test]
async fn hello_without_session_id_is_a_protocol_error() {
    let bad_hello = concat!(
        r#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><capabilities>"#,
        "<capability>urn:ietf:params:netconf:base:1.0</capability>",
        "</capabilities></hello>"
    );
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    let hello = eom(bad_hello);

    let (outcome, _) = tokio::join!(Session::establish(Transport::from_stream(client)), async {
        server.write_all(&hello).await.expect("peer hello write");
        read_until(&mut server, b"]]>]]>").await;
    });
    let err = outcome.expect_err("missing session-id rejected");
    assert!(matches!(err, NetconfError::Protocol(_)));
}

#[tokio::test]
async fn concurrent_rpcs_resolve_to_their_own_callers() {
    let (session, mut server) = start_session(PEER_HELLO_11).await;

    let first = session.send_rpc("<get/>").await.expect("first send");
    let second = session.send_rpc("<get-config/>").await.expect("second send");
    assert_ne!(first.message_id(), second.message_id());

    let req_a = read_until(&mut server, b"\n##\n").await.expect("first request");
    let id_a = message_id_of(&req_a);
    let req_b = read_until(&mut server, b"\n##\n").await.expect("second request");
    let id_b = message_id_of(&req_b);

    // Replies arrive in reverse order of the requests.
    let reply_b = chunk(&data_reply(id_b, "second"));
    let reply_a = chunk(&data_reply(id_a, "first"));
    server.write_all(&reply_b).await.expect("reply write");
    server.write_all(&reply_a).await.expect("reply write");

    let raw_first = first.wait_timeout(Duration::from_secs(1)).await.expect("first reply");
    let raw_second = second.wait_timeout(Duration::from_secs(1)).await.expect("second reply");
    assert!(raw_first.contains("<data>first</data>"));
    assert!(raw_second.contains("<data>second</data>"));
}

#[tokio::test]
async fn rpc_error_reply_fails_only_that_call() {
    let (session, mut server) = start_session(PEER_HELLO_11).await;

    let pending = session.send_rpc("<lock><target><running/></target></lock>").await.expect("send");
    let req = read_until(&mut server, b"\n##\n").await.expect("request");
    let denied = chunk(&lock_denied_reply(message_id_of(&req)));
    server.write_all(&denied).await.expect("reply write");

    let err = pending
        .wait_timeout(Duration::from_secs(1))
        .await
        .expect_err("rpc-error surfaces");
    let NetconfError::Rpc(detail) = err else {
        panic!("expected an rpc error, got {err}");
    };
    assert!(detail.is_lock_contention());
    assert_eq!(detail.severity.as_deref(), Some("error"));
    assert!(detail.reply_raw.contains("<rpc-error>"));
    assert!(detail.info.as_deref().unwrap().contains("<session-id>99</session-id>"));

    // The session is still usable afterwards.
    let pending = session.send_rpc("<get/>").await.expect("send after error");
    let req = read_until(&mut server, b"\n##\n").await.expect("request");
    let reply = chunk(&ok_reply(message_id_of(&req)));
    server.write_all(&reply).await.expect("reply write");
    pending.wait_timeout(Duration::from_secs(1)).await.expect("reply");
}

#[tokio::test]
async fn late_reply_after_timeout_is_discarded() {
    let (session, mut server) = start_session(PEER_HELLO_11).await;

    let pending = session.send_rpc("<get/>").await.expect("send");
    let req = read_until(&mut server, b"\n##\n").await.expect("request");
    let abandoned_id = message_id_of(&req);

    let err = pending
        .wait_timeout(Duration::from_millis(50))
        .await
        .expect_err("no reply yet");
    assert!(matches!(err, NetconfError::Timeout(_)));

    // The reply arrives after the caller gave up; it must not leak into
    // any other request.
    let late = chunk(&ok_reply(abandoned_id));
    server.write_all(&late).await.expect("late reply write");

    let pending = session.send_rpc("<get-config/>").await.expect("second send");
    let req = read_until(&mut server, b"\n##\n").await.expect("second request");
    let id = message_id_of(&req);
    assert_ne!(id, abandoned_id);
    let reply = chunk(&data_reply(id, "fresh"));
    server.write_all(&reply).await.expect("reply write");

    let raw = pending.wait_timeout(Duration::from_secs(1)).await.expect("reply");
    assert!(raw.contains("<data>fresh</data>"));
}

#[tokio::test]
async fn unmatched_reply_is_dropped_without_breaking_the_session() {
    let (session, mut server) = start_session(PEER_HELLO_11).await;

    let stray = chunk(&ok_reply(4242));
    server.write_all(&stray).await.expect("stray reply write");

    let pending = session.send_rpc("<get/>").await.expect("send");
    let req = read_until(&mut server, b"\n##\n").await.expect("request");
    let reply = chunk(&ok_reply(message_id_of(&req)));
    server.write_all(&reply).await.expect("reply write");
    pending.wait_timeout(Duration::from_secs(1)).await.expect("reply");
}

#[tokio::test]
async fn close_fails_pending_and_poisons_future_sends() {
    let (session, mut server) = start_session(PEER_HELLO_11).await;

    let pending = session.send_rpc("<get/>").await.expect("send");
    read_until(&mut server, b"\n##\n").await.expect("request");

    session.close();
    assert!(session.is_closed());

    let err = pending.wait().await.expect_err("pending fails on close");
    assert!(matches!(err, NetconfError::SessionClosed));

    let err = session.send_msg(b"<rpc/>").await.expect_err("send after close");
    assert!(matches!(err, NetconfError::SessionClosed));

    let err = session.send_rpc("<get/>").await.expect_err("rpc after close");
    assert!(matches!(err, NetconfError::SessionClosed));
}

#[tokio::test]
async fn peer_disconnect_fails_pending_requests() {
    let (session, mut server) = start_session(PEER_HELLO_11).await;

    let pending = session.send_rpc("<get/>").await.expect("send");
    read_until(&mut server, b"\n##\n").await.expect("request");
    drop(server);

    let err = pending
        .wait_timeout(Duration::from_secs(1))
        .await
        .expect_err("disconnect fails the wait");
    assert!(matches!(err, NetconfError::SessionClosed));
}

#[tokio::test]
async fn framing_corruption_is_fatal() {
    let (session, mut server) = start_session(PEER_HELLO_11).await;

    let pending = session.send_rpc("<get/>").await.expect("send");
    read_until(&mut server, b"\n##\n").await.expect("request");

    // A zero-length chunk header is not valid chunked framing.
    server.write_all(b"\n#0\n").await.expect("corrupt write");

    let err = pending
        .wait_timeout(Duration::from_secs(1))
        .await
        .expect_err("framing error fails the wait");
    assert!(matches!(err, NetconfError::Protocol(_)));
}

#[tokio::test]
async fn framing_corruption_stops_the_transport() {
    let (session, mut server) = start_session(PEER_HELLO_11).await;

    let pending = session.send_rpc("<get/>").await.expect("send");
    read_until(&mut server, b"\n##\n").await.expect("request");
    server.write_all(b"\n#0\n").await.expect("corrupt write");
    pending
        .wait_timeout(Duration::from_secs(1))
        .await
        .expect_err("framing error fails the wait");

    // The dispatch loop must shut the transport down itself: with the
    // session already marked closed, a later close() is a no-op, so
    // nothing else would release the connection.
    let eof = tokio::time::timeout(
        Duration::from_secs(2),
        read_until(&mut server, b"unreachable"),
    )
    .await
    .expect("transport closes promptly");
    assert!(eof.is_none(), "peer still sees an open stream");
    assert!(session.is_closed());
}

#[tokio::test]
async fn unclassifiable_message_surfaces_on_the_next_send() {
    let (session, mut server) = start_session(PEER_HELLO_11).await;

    let garbage = chunk("this is not xml <<<");
    server.write_all(&garbage).await.expect("garbage write");

    // The dispatch loop records the problem; the next send reports it.
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        match session.send_msg(b"<rpc/>").await {
            Err(NetconfError::Protocol(_)) => break,
            Ok(()) => {
                assert!(Instant::now() < deadline, "protocol error never surfaced");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
}

#[tokio::test]
async fn notifications_queue_until_taken() {
    let (session, mut server) = start_session(PEER_HELLO_11).await;

    let notif = |event: &str| {
        format!(
            r#"<notification xmlns="urn:ietf:params:xml:ns:netconf:notification:1.0"><eventTime>2026-01-01T00:00:00Z</eventTime>{event}</notification>"#
        )
    };
    let first = chunk(&notif("<link-up/>"));
    let second = chunk(&notif("<link-down/>"));
    server.write_all(&first).await.expect("notification write");
    server.write_all(&second).await.expect("notification write");

    let got = session
        .take_notification(Some(Duration::from_secs(1)))
        .await
        .expect("first notification");
    assert!(got.contains("<link-up/>"));
    let got = session
        .take_notification(Some(Duration::from_secs(1)))
        .await
        .expect("second notification");
    assert!(got.contains("<link-down/>"));

    assert!(
        session
            .take_notification(Some(Duration::from_millis(50)))
            .await
            .is_none()
    );
}

#[tokio::test]
async fn manager_get_config_extracts_the_data_subtree() {
    let (session, mut server) = start_session(PEER_HELLO_11).await;
    let manager = Manager::with_timeout(session, Duration::from_secs(2));

    let peer = tokio::spawn(async move {
        let req = read_until(&mut server, b"\n##\n").await.expect("request");
        let text = String::from_utf8_lossy(&req).into_owned();
        assert!(text.contains("<get-config"));
        assert!(text.contains("<running/>"));
        let reply = chunk(&data_reply(message_id_of(&req), "<interfaces/>"));
        server.write_all(&reply).await.expect("reply write");
        server
    });

    let reply = manager
        .get_config("running", None, None)
        .await
        .expect("get-config");
    assert_eq!(reply.data.as_deref(), Some("<data><interfaces/></data>"));
    peer.await.expect("peer task");
}

#[tokio::test]
async fn manager_lock_retries_through_contention() {
    let (session, mut server) = start_session(PEER_HELLO_11).await;
    let manager = Manager::with_timeout(session, Duration::from_secs(5));

    let peer = tokio::spawn(async move {
        for attempt in 0..3u32 {
            let req = read_until(&mut server, b"\n##\n").await.expect("lock request");
            assert!(String::from_utf8_lossy(&req).contains("<lock>"));
            let id = message_id_of(&req);
            let reply = if attempt < 2 {
                chunk(&lock_denied_reply(id))
            } else {
                chunk(&ok_reply(id))
            };
            server.write_all(&reply).await.expect("reply write");
        }
        server
    });

    let started = Instant::now();
    manager.lock("running").await.expect("lock eventually succeeds");
    // Two contended attempts means at least two retry pauses.
    assert!(started.elapsed() >= Duration::from_millis(400));
    peer.await.expect("peer task");
}

#[tokio::test]
async fn manager_lock_times_out_at_the_deadline() {
    let (session, mut server) = start_session(PEER_HELLO_11).await;
    let manager = Manager::new(session);

    let peer = tokio::spawn(async move {
        while let Some(req) = read_until(&mut server, b"\n##\n").await {
            let reply = chunk(&lock_denied_reply(message_id_of(&req)));
            if server.write_all(&reply).await.is_err() {
                break;
            }
        }
    });

    let started = Instant::now();
    let err = manager
        .lock_deadline("running", Duration::from_millis(600))
        .await
        .expect_err("deadline expires");
    assert!(matches!(err, NetconfError::Timeout(_)));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_secs(3));

    drop(manager);
    peer.await.expect("peer task");
}

#[tokio::test]
async fn manager_close_session_tears_the_session_down() {
    let (session, mut server) = start_session(PEER_HELLO_11).await;
    let manager = Manager::with_timeout(session, Duration::from_secs(2));

    let peer = tokio::spawn(async move {
        let req = read_until(&mut server, b"\n##\n").await.expect("request");
        assert!(String::from_utf8_lossy(&req).contains("<close-session/>"));
        let reply = chunk(&ok_reply(message_id_of(&req)));
        server.write_all(&reply).await.expect("reply write");
        server
    });

    manager.close_session().await.expect("close-session");
    assert!(manager.session().is_closed());
    peer.await.expect("peer task");
}
