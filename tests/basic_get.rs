//! S1 (basic GET): a single request against a stub that closes the
//! connection after one response.

mod support;

use mhttp::{Outcome, Request, RequestOptions};

#[tokio::test]
async fn basic_get_returns_body_and_status() {
    let addr = support::spawn_single_connection_stub(vec![
        b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello".to_vec(),
    ])
    .await;

    let request = Request::get(&format!("http://{}/", addr));
    let options = RequestOptions { pool: "s1-basic-get".to_string(), ..Default::default() };

    let outcome = mhttp::send_request(request, options).await.unwrap();
    match outcome {
        Outcome::Normal(response) => {
            assert_eq!(response.status, 200);
            assert_eq!(response.body, b"hello");
        }
        Outcome::Upgraded(..) => panic!("did not expect an upgrade"),
    }

    mhttp::stop("s1-basic-get").await.unwrap();
}
