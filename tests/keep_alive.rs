//! S2 (keep-alive reuse): two sequential GETs against a stub that only
//! ever accepts one TCP connection. If the pool mistakenly opened a
//! second client for the second request, that connect would never
//! complete (nothing is listening for it) and the request would fail
//! with a connect timeout instead of succeeding.

mod support;

use mhttp::{Outcome, Request, RequestOptions};

#[tokio::test]
async fn second_request_reuses_the_first_connection() {
    let addr = support::spawn_single_connection_stub(vec![
        b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\none".to_vec(),
        b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\ntwo".to_vec(),
    ])
    .await;

    let pool = "s2-keep-alive";
    let options = || RequestOptions { pool: pool.to_string(), ..Default::default() };

    let first = mhttp::send_request(Request::get(&format!("http://{}/", addr)), options())
        .await
        .unwrap();
    assert_eq!(body_of(first), b"one");

    let second = mhttp::send_request(Request::get(&format!("http://{}/", addr)), options())
        .await
        .unwrap();
    assert_eq!(body_of(second), b"two");

    mhttp::stop(pool).await.unwrap();
}

fn body_of(outcome: Outcome) -> Vec<u8> {
    match outcome {
        Outcome::Normal(response) => response.body,
        Outcome::Upgraded(..) => panic!("did not expect an upgrade"),
    }
}
