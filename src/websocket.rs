//! `WebSocketHandshake` (§4.5): request mutation and response validation
//! for the RFC 6455 upgrade. The accept-key computation mirrors this
//! crate's own server-side `get_handshake` (same GUID, same
//! base64(sha1(...)) recipe), run in the client direction instead.

use base64::Engine;
use rand::RngCore;
use sha1::{Digest, Sha1};

use crate::error::WebSocketError;
use crate::request::Request;
use crate::response::Response;

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Protocol options a caller passes via `request_options.protocol_options`
/// when upgrading to WebSocket.
#[derive(Clone)]
pub struct HandshakeOptions {
    pub nonce: [u8; 16],
    pub subprotocols: Vec<String>,
}

impl HandshakeOptions {
    /// A fresh handshake with a randomly generated 16-byte nonce.
    pub fn new() -> HandshakeOptions {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        HandshakeOptions { nonce, subprotocols: Vec::new() }
    }

    pub fn with_subprotocols(mut self, subprotocols: Vec<String>) -> HandshakeOptions {
        self.subprotocols = subprotocols;
        self
    }

    fn key(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.nonce)
    }

    fn expected_accept(&self) -> String {
        compute_accept(&self.key())
    }
}

impl Default for HandshakeOptions {
    fn default() -> Self {
        HandshakeOptions::new()
    }
}

fn compute_accept(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Request transformation (§4.5): method forced to `GET`, then the
/// upgrade headers appended in the specified order.
pub fn prepare_request(req: &mut Request, opts: &HandshakeOptions) {
    req.method = "GET".to_string();
    req.header.append("Connection", "Upgrade");
    req.header.append("Upgrade", "websocket");
    req.header.append("Sec-WebSocket-Version", "13");
    req.header.append("Sec-WebSocket-Key", opts.key());
    if !opts.subprotocols.is_empty() {
        req.header.append("Sec-WebSocket-Protocol", opts.subprotocols.join(" "));
    }
}

/// Response validation (§4.5). Call only once `response.status == 101`.
pub fn validate_response(
    response: &Response,
    opts: &HandshakeOptions,
) -> Result<(), WebSocketError> {
    let accept = response
        .header
        .find("Sec-WebSocket-Accept")
        .ok_or(WebSocketError::MissingAccept)?;
    if accept != opts.expected_accept() {
        return Err(WebSocketError::AcceptMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::HeaderSet;
    use crate::response::{ResponseInternal, Version};

    fn response_with_accept(accept: &str) -> Response {
        let mut header = HeaderSet::new();
        header.append("Sec-WebSocket-Accept", accept);
        Response {
            version: Version::Http11,
            status: 101,
            reason: "Switching Protocols".to_string(),
            header,
            body: Vec::new(),
            internal: ResponseInternal::default(),
        }
    }

    #[test]
    fn known_rfc6455_example_vector() {
        // The canonical example from RFC 6455 §1.3.
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        assert_eq!(compute_accept(key), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn request_forces_get_and_appends_headers_in_order() {
        let mut req = Request::new("POST", "ws://host/chat");
        let opts = HandshakeOptions::new();
        prepare_request(&mut req, &opts);
        assert_eq!(req.method, "GET");
        let names: Vec<_> = req.header.iter().map(|(n, _)| n.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "Connection",
                "Upgrade",
                "Sec-WebSocket-Version",
                "Sec-WebSocket-Key",
            ]
        );
    }

    #[test]
    fn validation_succeeds_on_matching_accept() {
        let opts = HandshakeOptions::new();
        let resp = response_with_accept(&opts.expected_accept());
        assert!(validate_response(&resp, &opts).is_ok());
    }

    #[test]
    fn validation_fails_on_mismatch() {
        let opts = HandshakeOptions::new();
        let resp = response_with_accept("not-the-right-value=");
        assert!(matches!(
            validate_response(&resp, &opts),
            Err(WebSocketError::AcceptMismatch)
        ));
    }

    #[test]
    fn validation_fails_on_missing_header() {
        let opts = HandshakeOptions::new();
        let resp = Response {
            version: Version::Http11,
            status: 101,
            reason: "Switching Protocols".to_string(),
            header: HeaderSet::new(),
            body: Vec::new(),
            internal: ResponseInternal::default(),
        };
        assert!(matches!(
            validate_response(&resp, &opts),
            Err(WebSocketError::MissingAccept)
        ));
    }
}
