//! Loopback stub server shared by the integration tests. Scripted to
//! emit literal byte sequences rather than parse and answer requests
//! properly — these tests drive the public API end to end (§8 S1-S6),
//! they don't re-test the wire codec (that's `codec.rs`'s own unit
//! tests).

use std::net::SocketAddr;
use std::time::Duration;

use base64::Engine;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Accept a single TCP connection and reply with each entry of `scripts`
/// in turn, reading (and discarding) one request off the wire before
/// each reply. A second send on a fresh connection that this stub never
/// accepts will simply time out client-side — which is how the
/// keep-alive test proves reuse without reaching into pool internals.
pub async fn spawn_single_connection_stub(scripts: Vec<Vec<u8>>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            for script in scripts {
                let mut buf = [0u8; 4096];
                let _ = tokio::time::timeout(Duration::from_secs(5), socket.read(&mut buf)).await;
                if socket.write_all(&script).await.is_err() {
                    break;
                }
            }
        }
    });
    addr
}

/// Like [`spawn_single_connection_stub`], but sleeps `delay` after reading
/// the request and before writing `script` — used to prove that a slow key
/// doesn't hold up an unrelated one sharing the same pool.
pub async fn spawn_delayed_stub(delay: Duration, script: Vec<u8>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let _ = tokio::time::timeout(Duration::from_secs(5), socket.read(&mut buf)).await;
            tokio::time::sleep(delay).await;
            let _ = socket.write_all(&script).await;
        }
    });
    addr
}

/// Computes the RFC 6455 `Sec-WebSocket-Accept` value for `key`,
/// independently of the crate under test (mirrors `websocket::compute_accept`,
/// kept private to the crate).
pub fn compute_accept(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Pull the value of a header named `name` out of a raw request, by
/// naive line scanning — good enough for a stub that only needs one
/// header's value back out.
pub fn find_header_value(raw_request: &str, name: &str) -> Option<String> {
    let prefix = format!("{}:", name);
    raw_request.lines().find_map(|line| {
        if line.len() >= prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(&prefix) {
            Some(line[prefix.len()..].trim().to_string())
        } else {
            None
        }
    })
}

/// Accept one connection, read the request, and reply with a 101
/// handshake whose `Sec-WebSocket-Accept` is computed from the request's
/// own `Sec-WebSocket-Key` (so it always validates, whatever nonce the
/// client used).
pub async fn spawn_websocket_stub() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            if let Ok(Ok(n)) =
                tokio::time::timeout(Duration::from_secs(5), socket.read(&mut buf)).await
            {
                let raw = String::from_utf8_lossy(&buf[..n]).to_string();
                if let Some(key) = find_header_value(&raw, "Sec-WebSocket-Key") {
                    let accept = compute_accept(&key);
                    let response = format!(
                        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
                        accept
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                }
            }
            // Hold the socket open briefly so the client's hand-off has
            // something live to return before the test function exits.
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    });
    addr
}
