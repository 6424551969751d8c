//! URI canonicalization and the client-key derivation rules of §4.4
//! steps 1 and 4.

use url::Url;

use crate::error::PoolError;
use crate::request::Target;
use crate::transport::Transport;

/// Resolve `target` to an absolute URI, optionally against `base` (used
/// when following a redirection — the `Location` header is resolved
/// against the *canonical* request URI, not the on-wire path-only form;
/// see the Design Notes in SPEC_FULL.md).
pub fn canonicalize(target: &Target, base: Option<&Url>) -> Result<Url, PoolError> {
    match target {
        Target::Absolute(url) => Ok(url.clone()),
        Target::Origin(raw) => match base {
            Some(base) => base.join(raw).map_err(|_| PoolError::InvalidTarget),
            None => Url::parse(raw).map_err(|_| PoolError::InvalidTarget),
        },
    }
}

/// Transport implied by a URI scheme. `ws`/`wss` share `http`/`https`'s
/// transport (§4.4 step 4).
pub fn transport_for_scheme(scheme: &str) -> Result<Transport, PoolError> {
    match scheme {
        "http" | "ws" => Ok(Transport::Tcp),
        "https" | "wss" => Ok(Transport::Tls),
        _ => Err(PoolError::InvalidTarget),
    }
}

/// Port precedence: explicit URI port > credential-store override >
/// transport default.
pub fn effective_port(url: &Url, credential_port: Option<u16>, transport: Transport) -> u16 {
    url.port()
        .or(credential_port)
        .unwrap_or_else(|| transport.default_port())
}

pub fn host_of(url: &Url) -> Result<String, PoolError> {
    url.host_str().map(|h| h.to_string()).ok_or(PoolError::InvalidTarget)
}
