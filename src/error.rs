//! The crate's stable error taxonomy (§7).
//!
//! Every fallible public operation returns one of the enums below instead
//! of a boxed `dyn Error`, so callers can match on cause without pulling in
//! `tokio`/`rustls` types themselves.

use std::io;
use std::net::AddrParseError;

use crate::header::FramingError;
use quick_error::quick_error;

quick_error! {
    /// Failures opening a fresh client connection.
    #[derive(Debug)]
    pub enum OpenError {
        Connect(err: io::Error) {
            display("connect failed: {}", err)
            from()
        }
        ConnectTimeout {
            display("connect timed out")
        }
        Tls(err: io::Error) {
            display("TLS handshake failed: {}", err)
        }
        InvalidAddress(err: AddrParseError) {
            display("invalid host/port: {}", err)
            from()
        }
    }
}

quick_error! {
    /// Failures of a single request/response exchange on an open client.
    #[derive(Debug)]
    pub enum SendError {
        ConnectionClosed {
            display("connection closed by peer")
        }
        ReadTimeout {
            display("read timed out")
        }
        WriteTimeout {
            display("write timed out")
        }
        InvalidData(err: crate::codec::ParseError) {
            display("invalid response data: {}", err)
            from()
        }
        Send(err: io::Error) {
            display("send failed: {}", err)
        }
        Recv(err: io::Error) {
            display("recv failed: {}", err)
        }
        Framing(err: FramingError) {
            display("{}", err)
            from()
        }
        UnexpectedInboundData {
            display("peer sent data while client was idle")
        }
        WebSocket(err: WebSocketError) {
            display("{}", err)
            from()
        }
    }
}

quick_error! {
    /// Failures surfaced by the pool around `Client`/redirection/upgrade.
    #[derive(Debug)]
    pub enum PoolError {
        InvalidTarget {
            display("request target has no resolvable scheme/host")
        }
        TooManyRedirections {
            display("exceeded max_nb_redirections")
        }
        ClientError(err: SendError) {
            display("client error: {}", err)
            from()
        }
        Open(message: String) {
            display("connect failed: {}", message)
        }
        WebSocket(err: WebSocketError) {
            display("{}", err)
            from()
        }
        PoolStopped {
            display("pool is no longer running")
        }
        PoolMisconfigured {
            display("max_connections_per_key must be at least 1")
        }
    }
}

quick_error! {
    /// Failures specific to the RFC 6455 upgrade handshake.
    #[derive(Debug)]
    pub enum WebSocketError {
        MissingAccept {
            display("101 response is missing Sec-WebSocket-Accept")
        }
        AcceptMismatch {
            display("Sec-WebSocket-Accept does not match the computed value")
        }
        InvalidScheme {
            display("request scheme is not ws/wss")
        }
        StartFailed(err: io::Error) {
            display("failed to start websocket endpoint: {}", err)
        }
    }
}
