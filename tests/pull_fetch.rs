//! Scenario 3: pull-mode fetch with the no-wait -> 404 -> long-poll retry.

mod support;

use std::sync::Arc;
use std::time::Duration;

use corestream::connection::Connection;
use corestream::jetstream::{self, SubscribeOptions};
use support::mock_connection::MockConnection;

fn consumer_info_json(stream: &str, consumer: &str) -> Vec<u8> {
    serde_json::json!({
        "type": "io.nats.jetstream.api.v1.consumer_info_response",
        "stream_name": stream,
        "name": consumer,
        "created": "2023-01-01T00:00:00Z",
        "config": { "durable_name": consumer, "ack_policy": "explicit" },
        "delivered": { "consumer_seq": 0, "stream_seq": 0 },
        "ack_floor": { "consumer_seq": 0, "stream_seq": 0 },
        "num_ack_pending": 0,
        "num_redelivered": 0,
        "num_waiting": 0,
        "num_pending": 0,
        "push_bound": false
    })
    .to_string()
    .into_bytes()
}

#[test]
fn fetch_retries_a_no_wait_404_as_a_long_poll() {
    let conn = MockConnection::new();
    conn.on_request("$JS.API.STREAM.NAMES", |_req| {
        corestream::Message::new("_reply", serde_json::json!({ "streams": ["ORDERS"] }).to_string().into_bytes())
    });
    conn.on_request("$JS.API.CONSUMER.INFO.ORDERS.workers", |_req| {
        corestream::Message::new("_reply", consumer_info_json("ORDERS", "workers"))
    });

    let ctx = jetstream::new(conn.clone()).unwrap();
    let sub = ctx
        .pull_subscribe("ORDERS.new", "workers", SubscribeOptions::default())
        .unwrap();

    // The client's pull request is a fire-and-forget publish on the
    // consumer's next-message subject, with `reply` set to its own delivery
    // inbox. A background thread plays the JetStream server: first request
    // gets a 404 (no_wait), the retry gets three messages then a 408.
    let next_subject = "$JS.API.CONSUMER.MSG.NEXT.ORDERS.workers".to_string();
    let server_sub = conn.subscribe(&next_subject).unwrap();
    let conn_for_server = conn.clone();
    std::thread::spawn(move || {
        let mut round = 0u32;
        while let Some(req) = server_sub.next() {
            round += 1;
            let reply_to = req.reply.clone().unwrap();
            match round {
                1 => {
                    let mut m = corestream::Message::new(reply_to, Vec::new());
                    m.set_header("Status", "404");
                    m.set_header("Description", "No Messages");
                    let _ = conn_for_server.publish(m);
                }
                2 => {
                    for i in 0..3u32 {
                        let ack_reply = format!("$JS.ACK.ORDERS.workers.1.{}.1.1700000000000000000.0", i + 1);
                        let _ = conn_for_server
                            .publish(corestream::Message::new(reply_to.clone(), format!("msg-{}", i).into_bytes()).with_reply(ack_reply));
                    }
                    let mut m = corestream::Message::new(reply_to, Vec::new());
                    m.set_header("Status", "408");
                    m.set_header("Description", "Request Timeout");
                    let _ = conn_for_server.publish(m);
                }
                _ => break,
            }
        }
    });

    let msgs = sub.fetch(5, Duration::from_secs(2)).unwrap();
    assert_eq!(msgs.len(), 3);
    assert_eq!(msgs[0].data(), b"msg-0");
}
