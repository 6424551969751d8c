//! Case-insensitive, order-preserving HTTP header storage.
//!
//! Mirrors the header-scanning conventions used throughout this crate's
//! wire layer (`eq_ignore_ascii_case` comparisons, no normalization of
//! stored names) rather than lower-casing or sorting anything up front.

use std::fmt;
use quick_error::quick_error;

/// A single `(name, value)` pair as stored in a [`HeaderSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
}

/// An ordered multimap of HTTP header fields.
///
/// Order is preserved exactly as fields are appended. Name comparisons are
/// ASCII case-insensitive; multiple fields with the same name are legal and
/// are returned in insertion order by [`HeaderSet::find_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    fields: Vec<HeaderField>,
}

quick_error! {
    #[derive(Debug)]
    pub enum ContentLengthError {
        NotFound {
            display("no Content-Length header present")
        }
        Invalid {
            display("Content-Length value is not a valid non-negative integer")
        }
        Multiple {
            display("more than one Content-Length header present")
        }
    }
}

/// RFC 7230 §3.3.3 body framing, as derived from `Transfer-Encoding` and
/// `Content-Length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// `Transfer-Encoding: ..., chunked` (chunked must be the last coding).
    Chunked,
    /// A valid, single `Content-Length` header.
    Fixed(u64),
    /// Neither header present (or present with an empty `Transfer-Encoding`).
    None,
}

quick_error! {
    #[derive(Debug)]
    pub enum FramingError {
        /// `Transfer-Encoding` lists `chunked` somewhere other than last;
        /// RFC 7230 requires the connection be closed in this case.
        InvalidIntermediaryChunked {
            display("chunked transfer-coding is not the last coding")
        }
        ContentLength(err: ContentLengthError) {
            display("{}", err)
            from()
        }
    }
}

impl HeaderSet {
    pub fn new() -> HeaderSet {
        HeaderSet { fields: Vec::new() }
    }

    /// Append `name: value` after all existing fields (later lookups that
    /// scan from the front still see earlier fields first).
    pub fn append<N, V>(&mut self, name: N, value: V)
    where
        N: Into<String>,
        V: Into<String>,
    {
        self.fields.push(HeaderField {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Insert `name: value` before all existing fields, so that
    /// `find`/`find_all` see it first.
    pub fn add<N, V>(&mut self, name: N, value: V)
    where
        N: Into<String>,
        V: Into<String>,
    {
        self.fields.insert(
            0,
            HeaderField {
                name: name.into(),
                value: value.into(),
            },
        );
    }

    /// Like [`HeaderSet::append`], but a no-op if a field with this name
    /// already exists.
    pub fn add_if_missing<N, V>(&mut self, name: N, value: V)
    where
        N: Into<String>,
        V: Into<String>,
    {
        let name = name.into();
        if !self.contains(&name) {
            self.append(name, value);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// First value for `name`, in storage order.
    pub fn find(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
    }

    /// All values for `name`, in storage order.
    pub fn find_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
            .collect()
    }

    /// All values for `name`, comma-joined in storage order.
    pub fn find_all_concat(&self, name: &str) -> Option<String> {
        let values = self.find_all(name);
        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }

    /// Every value for `name` split on commas, each token trimmed of ASCII
    /// spaces and tabs. Empty tokens (from e.g. a trailing comma) are kept
    /// out, matching how a well-formed token list would never contain one.
    pub fn find_all_split(&self, name: &str) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.name.eq_ignore_ascii_case(name))
            .flat_map(|f| f.value.split(','))
            .map(|tok| tok.trim_matches(|c| c == ' ' || c == '\t').to_string())
            .filter(|tok| !tok.is_empty())
            .collect()
    }

    /// Same as [`HeaderSet::find_all_split`], lower-cased.
    pub fn find_token_list(&self, name: &str) -> Vec<String> {
        self.find_all_split(name)
            .into_iter()
            .map(|tok| tok.to_ascii_lowercase())
            .collect()
    }

    /// Remove every field named `name`.
    pub fn remove(&mut self, name: &str) {
        self.fields.retain(|f| !f.name.eq_ignore_ascii_case(name));
    }

    /// Remove every field whose name appears in `names`.
    pub fn remove_all(&mut self, names: &[&str]) {
        self.fields
            .retain(|f| !names.iter().any(|n| f.name.eq_ignore_ascii_case(n)));
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&str, &str)> {
        self.fields.iter().map(|f| (f.name.as_str(), f.value.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// `Content-Length`, parsed and validated for duplicates.
    pub fn content_length(&self) -> Result<u64, ContentLengthError> {
        let values = self.find_all("content-length");
        match values.len() {
            0 => Err(ContentLengthError::NotFound),
            1 => values[0].trim().parse().map_err(|_| ContentLengthError::Invalid),
            _ => Err(ContentLengthError::Multiple),
        }
    }

    /// `Transfer-Encoding` tokens, lower-cased, in header order.
    pub fn transfer_encoding(&self) -> Vec<String> {
        self.find_token_list("transfer-encoding")
    }

    /// `Content-Encoding` tokens, lower-cased, in header order.
    pub fn content_encoding(&self) -> Vec<String> {
        self.find_token_list("content-encoding")
    }

    /// True iff any `Connection` token equals `close` (case-insensitive).
    pub fn has_connection_close(&self) -> bool {
        self.find_token_list("connection").iter().any(|t| t == "close")
    }

    /// True iff any `Connection` token equals `upgrade` (case-insensitive).
    pub fn has_connection_upgrade(&self) -> bool {
        self.find_token_list("connection").iter().any(|t| t == "upgrade")
    }

    /// RFC 7230 §3.3.3 body framing.
    pub fn body_framing(&self) -> Result<BodyFraming, FramingError> {
        let te = self.transfer_encoding();
        if !te.is_empty() {
            if te.last().map(|s| s.as_str()) == Some("chunked") {
                return Ok(BodyFraming::Chunked);
            }
            if te.iter().any(|t| t == "chunked") {
                return Err(FramingError::InvalidIntermediaryChunked);
            }
        }
        match self.content_length() {
            Ok(len) => Ok(BodyFraming::Fixed(len)),
            Err(ContentLengthError::NotFound) => Ok(BodyFraming::None),
            Err(other) => Err(other.into()),
        }
    }
}

impl fmt::Display for HeaderSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for field in &self.fields {
            writeln!(f, "{}: {}", field.name, field.value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_is_case_insensitive() {
        let mut h = HeaderSet::new();
        h.append("Content-Type", "text/plain");
        assert_eq!(h.find("content-TYPE"), Some("text/plain"));
    }

    #[test]
    fn add_is_seen_first() {
        let mut h = HeaderSet::new();
        h.append("X-Trace", "old");
        h.add("X-Trace", "new");
        assert_eq!(h.find("x-trace"), Some("new"));
    }

    #[test]
    fn remove_deletes_all_matches() {
        let mut h = HeaderSet::new();
        h.append("X-Tag", "a");
        h.append("X-Tag", "b");
        h.remove("x-tag");
        assert!(h.find_all("X-Tag").is_empty());
    }

    #[test]
    fn content_length_duplicate_is_error() {
        let mut h = HeaderSet::new();
        h.append("Content-Length", "5");
        h.append("Content-Length", "5");
        assert!(matches!(h.content_length(), Err(ContentLengthError::Multiple)));
    }

    #[test]
    fn content_length_non_integer_is_invalid() {
        let mut h = HeaderSet::new();
        h.append("Content-Length", "five");
        assert!(matches!(h.content_length(), Err(ContentLengthError::Invalid)));
    }

    #[test]
    fn chunked_must_be_last_coding() {
        let mut h = HeaderSet::new();
        h.append("Transfer-Encoding", "gzip, chunked, identity");
        assert!(matches!(
            h.body_framing(),
            Err(FramingError::InvalidIntermediaryChunked)
        ));
    }

    #[test]
    fn chunked_as_last_coding_is_chunked_framing() {
        let mut h = HeaderSet::new();
        h.append("Transfer-Encoding", "gzip, chunked");
        assert!(matches!(h.body_framing(), Ok(BodyFraming::Chunked)));
    }

    #[test]
    fn transfer_encoding_without_chunked_falls_back_to_content_length() {
        let mut h = HeaderSet::new();
        h.append("Transfer-Encoding", "gzip");
        h.append("Content-Length", "5");
        assert!(matches!(h.body_framing(), Ok(BodyFraming::Fixed(5))));
    }

    #[test]
    fn no_framing_headers_means_no_body() {
        let h = HeaderSet::new();
        assert!(matches!(h.body_framing(), Ok(BodyFraming::None)));
    }

    #[test]
    fn connection_close_token_is_case_insensitive() {
        let mut h = HeaderSet::new();
        h.append("Connection", "Keep-Alive, Close");
        assert!(h.has_connection_close());
    }
}
