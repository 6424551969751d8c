//! The `Response` value (§3).

use crate::header::HeaderSet;

/// Out-of-band metadata the parser attaches to a response.
///
/// Currently just the body size observed on the wire before any
/// content-decoding is applied by a caller; the parser itself never
/// decompresses (§ Non-goals — decompression, if any, is layered by the
/// caller, not this core).
#[derive(Debug, Clone, Default)]
pub struct ResponseInternal {
    pub original_body_size: Option<u64>,
}

/// A response as produced by `Client::send_request`. Read-only from the
/// caller's perspective.
#[derive(Debug, Clone)]
pub struct Response {
    pub version: Version,
    pub status: u16,
    pub reason: String,
    pub header: HeaderSet,
    pub body: Vec<u8>,
    pub internal: ResponseInternal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Response {
    /// Body size for logging (§4.6): `original_body_size` if the parser
    /// recorded one, else the length of the body actually returned.
    pub fn logged_body_size(&self) -> u64 {
        self.internal
            .original_body_size
            .unwrap_or(self.body.len() as u64)
    }

    pub fn is_redirection(&self) -> bool {
        (300..400).contains(&self.status)
    }

    pub fn is_upgrade(&self) -> bool {
        self.status == 101
    }
}
