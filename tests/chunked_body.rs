//! S6 (chunked body): a chunked response decodes to its concatenated
//! chunk data.

mod support;

use mhttp::{Outcome, Request, RequestOptions};

#[tokio::test]
async fn chunked_response_decodes_to_concatenated_body() {
    let addr = support::spawn_single_connection_stub(vec![
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n5\r\nhello\r\n0\r\n\r\n"
            .to_vec(),
    ])
    .await;

    let request = Request::get(&format!("http://{}/", addr));
    let options = RequestOptions { pool: "s6-chunked".to_string(), ..Default::default() };

    let outcome = mhttp::send_request(request, options).await.unwrap();
    match outcome {
        Outcome::Normal(response) => assert_eq!(response.body, b"hello"),
        Outcome::Upgraded(..) => panic!("did not expect an upgrade"),
    }

    mhttp::stop("s6-chunked").await.unwrap();
}
