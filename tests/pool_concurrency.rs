//! §5: "Parallelism across keys is free" — a slow response on one key
//! must not delay a request against a different key sharing the same pool.

mod support;

use std::time::{Duration, Instant};

use mhttp::{Outcome, Request, RequestOptions};

#[tokio::test]
async fn two_different_keys_are_served_concurrently_not_serially() {
    let slow_addr = support::spawn_delayed_stub(
        Duration::from_millis(300),
        b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nS".to_vec(),
    )
    .await;
    let fast_addr = support::spawn_delayed_stub(
        Duration::from_millis(300),
        b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nF".to_vec(),
    )
    .await;

    let opts = || RequestOptions { pool: "concurrency".to_string(), ..Default::default() };

    let start = Instant::now();
    let (slow, fast) = tokio::join!(
        mhttp::send_request(Request::get(&format!("http://{}/a", slow_addr)), opts()),
        mhttp::send_request(Request::get(&format!("http://{}/a", fast_addr)), opts()),
    );
    let elapsed = start.elapsed();

    match slow.unwrap() {
        Outcome::Normal(response) => assert_eq!(response.body, b"S"),
        Outcome::Upgraded(..) => panic!("did not expect an upgrade"),
    }
    match fast.unwrap() {
        Outcome::Normal(response) => assert_eq!(response.body, b"F"),
        Outcome::Upgraded(..) => panic!("did not expect an upgrade"),
    }

    // Serialized through one pool task, these two 300ms round trips would
    // take ~600ms; run concurrently they complete in ~300ms. Generous
    // margin to absorb scheduler jitter without ever matching a serial run.
    assert!(
        elapsed < Duration::from_millis(500),
        "expected concurrent dispatch, took {:?}",
        elapsed
    );

    mhttp::stop("concurrency").await.unwrap();
}

/// §5: a key capped at one connection can still have more than one request
/// queued behind that single connect. Every one of them must eventually
/// complete off the single connection once it lands, not just the first.
#[tokio::test]
async fn a_burst_on_one_key_all_complete_not_just_the_first_waiter() {
    let addr = support::spawn_single_connection_stub(vec![
        b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\n1".to_vec(),
        b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\n2".to_vec(),
        b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\n3".to_vec(),
    ])
    .await;

    let opts = || RequestOptions { pool: "burst".to_string(), ..Default::default() };
    let url = format!("http://{}/a", addr);

    let (a, b, c) = tokio::join!(
        mhttp::send_request(Request::get(&url), opts()),
        mhttp::send_request(Request::get(&url), opts()),
        mhttp::send_request(Request::get(&url), opts()),
    );

    for outcome in [a, b, c] {
        match outcome.unwrap() {
            Outcome::Normal(response) => assert_eq!(response.body.len(), 1),
            Outcome::Upgraded(..) => panic!("did not expect an upgrade"),
        }
    }

    mhttp::stop("burst").await.unwrap();
}
