//! A connection-oriented HTTP/1.1 client and pool for the tokio stack.
//!
//! `Pool` keys connections by `(host, port, transport)`, follows
//! redirections, and hands a connection off to a WebSocket endpoint on a
//! successful 101 upgrade. See `SPEC_FULL.md` for the full design.

pub mod client;
pub mod codec;
pub mod error;
pub mod finalize;
pub mod header;
pub mod logger;
pub mod netrc;
pub mod pool;
pub mod registry;
pub mod request;
pub mod response;
pub mod transport;
pub mod uri;
pub mod websocket;

pub use client::{ClientId, ClientOptions, Credentials};
pub use error::{OpenError, PoolError, SendError, WebSocketError};
pub use header::HeaderSet;
pub use pool::{Outcome, PoolOptions, RequestOptions};
pub use request::{Request, Target};
pub use response::{Response, Version};
pub use transport::Transport;
pub use websocket::HandshakeOptions;

/// Send `request` through the pool named in `request_options.pool`
/// (default `"default"`), lazily starting that pool with default
/// options on first use — mirroring the registry's own "the default is
/// `default`" convention (§6) rather than requiring every caller to
/// `start` it explicitly.
pub async fn send_request(
    request: Request,
    request_options: RequestOptions,
) -> Result<Outcome, PoolError> {
    let handle = registry::get(&request_options.pool)
        .unwrap_or_else(|| registry::start(&request_options.pool, PoolOptions::default()));
    handle.send_request(request, request_options).await
}

/// Start a pool under `id`. See `registry::start`.
pub fn start(id: &str, options: PoolOptions) -> pool::PoolHandle {
    registry::start(id, options)
}

/// Stop the pool registered under `id`, if any.
pub async fn stop(id: &str) -> Result<(), PoolError> {
    registry::stop(id).await
}
