//! The `Request` value (§3) and the request-target it carries.

use std::fmt;

use url::Url;

use crate::header::HeaderSet;

/// A URI reference that may be absolute (scheme + host [+ port]) or
/// origin-form (path [+ query]).
#[derive(Debug, Clone)]
pub enum Target {
    /// A fully qualified URI, e.g. `http://example.invalid/a?b`.
    Absolute(Url),
    /// Path and optional query, e.g. `/a?b`, relative to whatever
    /// connection the caller already has open.
    Origin(String),
}

impl Target {
    pub fn parse(raw: &str) -> Target {
        match Url::parse(raw) {
            Ok(url) => Target::Absolute(url),
            Err(_) => Target::Origin(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Target::Absolute(url) => url.as_str(),
            Target::Origin(s) => s.as_str(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A request as constructed by the caller.
///
/// Constructed by the caller, mutated only by `finalize` (§4.2) before
/// send, frozen thereafter.
#[derive(Debug, Clone)]
pub struct Request {
    /// Verb, stored uppercase.
    pub method: String,
    pub target: Target,
    pub header: HeaderSet,
    /// `body.is_empty()` means "no body".
    pub body: Vec<u8>,
}

impl Request {
    pub fn new<M: Into<String>>(method: M, target: &str) -> Request {
        Request {
            method: method.into().to_ascii_uppercase(),
            target: Target::parse(target),
            header: HeaderSet::new(),
            body: Vec::new(),
        }
    }

    pub fn get(target: &str) -> Request {
        Request::new("GET", target)
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Request {
        self.body = body;
        self
    }
}
