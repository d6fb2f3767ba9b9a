//! End-to-end async/sync publish scenarios against the in-process fake bus.

mod support;

use std::thread;
use std::time::Duration;

use corestream::connection::Connection;
use corestream::jetstream::{self, PublishOptions};
use corestream::ErrorKind;
use support::mock_connection::MockConnection;

fn init_logging() {
    use once_cell::sync::Lazy;
    static INIT: Lazy<()> = Lazy::new(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
    Lazy::force(&INIT);
}

#[test]
fn happy_publish_returns_the_servers_ack() {
    init_logging();
    let conn = MockConnection::new();
    conn.on_request("ORDERS.new", |_req| {
        corestream::Message::new("_reply", br#"{"stream":"ORDERS","seq":42,"duplicate":false}"#.to_vec())
    });
    let ctx = jetstream::new(conn).unwrap();

    let ack = ctx.publish("ORDERS.new", b"x".to_vec(), None).unwrap();
    assert_eq!(ack.stream, "ORDERS");
    assert_eq!(ack.seq, 42);
    assert!(!ack.duplicate);
}

#[test]
fn publish_surfaces_no_responders() {
    let conn = MockConnection::new();
    let ctx = jetstream::new(conn).unwrap();
    let err = ctx.publish("NOBODY.home", b"x".to_vec(), None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoResponders);
}

#[test]
fn publish_headers_carry_expected_last_sequence() {
    let conn = MockConnection::new();
    conn.on_request("ORDERS.new", |req| {
        assert_eq!(req.header(corestream::headers::NATS_EXPECTED_LAST_SEQUENCE), Some("7"));
        corestream::Message::new("_reply", br#"{"stream":"ORDERS","seq":8,"duplicate":false}"#.to_vec())
    });
    let ctx = jetstream::new(conn).unwrap();
    let opts = PublishOptions {
        expect_last_seq: Some(7),
        ..Default::default()
    };
    ctx.publish("ORDERS.new", b"x".to_vec(), Some(opts)).unwrap();
}

/// Scenario 2: MaxPending=2, StallWait=50ms. A third publish stalls and
/// times out while two remain outstanding; releasing their acks unblocks a
/// subsequent publish.
#[test]
fn async_publish_stalls_past_max_pending_then_recovers() {
    let conn = MockConnection::new();
    let ctx = jetstream::new_with_options(
        conn.clone(),
        jetstream::ContextOptions {
            publish_async: jetstream::PublishAsyncOptions {
                max_pending: 2,
                stall_wait: Some(Duration::from_millis(50)),
                ..Default::default()
            },
            ..Default::default()
        },
    )
    .unwrap();

    ctx.publish_msg_async(corestream::Message::new("ORDERS.new", b"1".to_vec()), None).unwrap();
    ctx.publish_msg_async(corestream::Message::new("ORDERS.new", b"2".to_vec()), None).unwrap();
    assert_eq!(ctx.pending_async_publishes(), 2);

    let err = ctx
        .publish_msg_async(corestream::Message::new("ORDERS.new", b"3".to_vec()), None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(ctx.pending_async_publishes(), 2);

    // Simulate the server acking both outstanding publishes.
    let published = conn.published();
    let replies: Vec<String> = published.iter().filter_map(|m| m.reply.clone()).collect();
    assert_eq!(replies.len(), 2);
    for reply in replies {
        conn.publish(corestream::Message::new(reply, br#"{"stream":"ORDERS","seq":1,"duplicate":false}"#.to_vec()))
            .unwrap();
    }

    // The background dispatch thread needs a beat to process the acks.
    for _ in 0..50 {
        if ctx.pending_async_publishes() == 0 {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(ctx.pending_async_publishes(), 0);

    ctx.publish_msg_async(corestream::Message::new("ORDERS.new", b"4".to_vec()), None).unwrap();
}

#[test]
fn publish_async_complete_waits_for_outstanding_acks() {
    let conn = MockConnection::new();
    let ctx = jetstream::new(conn.clone()).unwrap();

    ctx.publish_msg_async(corestream::Message::new("ORDERS.new", b"1".to_vec()), None).unwrap();

    let ctx2 = ctx.clone();
    let handle = thread::spawn(move || ctx2.publish_async_complete(Some(Duration::from_secs(2))));

    thread::sleep(Duration::from_millis(20));
    let reply = conn.published()[0].reply.clone().unwrap();
    conn.publish(corestream::Message::new(reply, br#"{"stream":"ORDERS","seq":1,"duplicate":false}"#.to_vec()))
        .unwrap();

    assert!(handle.join().unwrap().is_ok());
}

#[test]
fn pending_async_publishes_can_be_drained() {
    let conn = MockConnection::new();
    let ctx = jetstream::new(conn).unwrap();
    ctx.publish_msg_async(corestream::Message::new("ORDERS.new", b"1".to_vec()), None).unwrap();
    ctx.publish_msg_async(corestream::Message::new("ORDERS.new", b"2".to_vec()), None).unwrap();

    let pending = ctx.publish_async_get_pending_list().unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(ctx.pending_async_publishes(), 0);
}
