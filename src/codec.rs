//! The HTTP/1.1 wire codec.
//!
//! This is the one module in the crate that stands in for an external
//! collaborator the core spec treats as out of scope ("the message
//! grammar"): `Client` only ever calls [`encode_request`] and feeds bytes
//! to a [`ResponseParser`]. Keep this module's surface exactly that small;
//! anything fancier (trailers, chunk extensions, 100-continue) belongs to
//! a real wire-codec crate, not here.

use bytes::{Buf, BytesMut};
use httparse;

use crate::header::{BodyFraming, HeaderSet};
use crate::request::{Request, Target};
use crate::response::{Response, ResponseInternal, Version};
use quick_error::quick_error;

/// Number of headers to allocate on the stack before falling back to a
/// heap-allocated buffer, matching the tiered-allocation trick this
/// crate's lineage uses around `httparse::Response`.
const MIN_HEADERS: usize = 16;
const MAX_HEADERS: usize = 1024;

quick_error! {
    #[derive(Debug)]
    pub enum ParseError {
        Parse(err: httparse::Error) {
            display("malformed response: {}", err)
            from()
        }
        InvalidVersion {
            display("unsupported HTTP version")
        }
        Framing(err: crate::header::FramingError) {
            display("{}", err)
            from()
        }
        InvalidChunkSize {
            display("invalid chunk size line")
        }
        Utf8 {
            display("header value is not valid utf-8")
        }
    }
}

/// Render the send-target (origin-form) for a request: path, defaulted to
/// `/` when absent, plus query and fragment exactly as given.
pub fn send_target(target: &Target) -> String {
    match target {
        Target::Origin(s) => {
            if s.is_empty() {
                "/".to_string()
            } else {
                s.clone()
            }
        }
        Target::Absolute(url) => {
            let mut out = String::new();
            let path = url.path();
            out.push_str(if path.is_empty() { "/" } else { path });
            if let Some(q) = url.query() {
                out.push('?');
                out.push_str(q);
            }
            if let Some(frag) = url.fragment() {
                out.push('#');
                out.push_str(frag);
            }
            out
        }
    }
}

/// Encode `req` as an origin-form HTTP/1.1 request. Absolute-form is
/// never sent on the wire (§6, Wire format).
pub fn encode_request(req: &Request) -> Vec<u8> {
    let mut out = Vec::with_capacity(256 + req.body.len());
    out.extend_from_slice(req.method.as_bytes());
    out.push(b' ');
    out.extend_from_slice(send_target(&req.target).as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");
    for (name, value) in req.header.iter() {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&req.body);
    out
}

#[derive(Debug)]
struct Head {
    version: Version,
    status: u16,
    reason: String,
    header: HeaderSet,
}

#[derive(Debug)]
enum ChunkState {
    /// Waiting for a `<hex-size>[;ext]\r\n` line.
    Size,
    /// Reading `remaining` bytes of chunk data.
    Data(u64),
    /// Consuming the CRLF that follows chunk data.
    DataEnd,
    /// Consuming trailer lines up to the final blank line.
    Trailer,
}

enum BodyState {
    None,
    Fixed { remaining: u64 },
    Chunked { state: ChunkState },
}

enum State {
    Head,
    Body { head: Head, body: Vec<u8>, state: BodyState },
}

/// Result of feeding more bytes to a [`ResponseParser`] (or, internally,
/// to the chunked-body sub-decoder).
pub enum Progress<T> {
    /// A full value was parsed; the parser must not be reused for `T =
    /// Response`.
    Done(T),
    /// Not enough data yet; call `feed` again once more bytes arrive.
    More,
}

/// An incremental, single-response parser.
///
/// Bytes are handed to [`ResponseParser::feed`] as they arrive off the
/// socket; any bytes left in `buf` after `Done` belong to whatever comes
/// next (a pipelined response — not supported here — or, for an upgraded
/// connection, the first bytes of the new protocol).
pub struct ResponseParser {
    state: State,
}

impl ResponseParser {
    pub fn new() -> ResponseParser {
        ResponseParser { state: State::Head }
    }

    pub fn feed(&mut self, buf: &mut BytesMut) -> Result<Progress<Response>, ParseError> {
        loop {
            let done = match &mut self.state {
                State::Head => match parse_head(buf)? {
                    None => return Ok(Progress::More),
                    Some(head) => {
                        let body_state = match head.header.body_framing()? {
                            BodyFraming::None => BodyState::None,
                            BodyFraming::Fixed(n) => BodyState::Fixed { remaining: n },
                            BodyFraming::Chunked => BodyState::Chunked { state: ChunkState::Size },
                        };
                        self.state = State::Body {
                            head,
                            body: Vec::new(),
                            state: body_state,
                        };
                        false
                    }
                },
                State::Body { state: BodyState::None, .. } => true,
                State::Body { state: BodyState::Fixed { remaining }, body, .. } => {
                    let take = (*remaining as usize).min(buf.len());
                    body.extend_from_slice(&buf[..take]);
                    buf.advance(take);
                    *remaining -= take as u64;
                    if *remaining == 0 {
                        true
                    } else {
                        return Ok(Progress::More);
                    }
                }
                State::Body { state: BodyState::Chunked { state }, body, .. } => {
                    match step_chunked(state, body, buf)? {
                        Progress::Done(()) => true,
                        Progress::More => return Ok(Progress::More),
                    }
                }
            };
            if done {
                return Ok(Progress::Done(self.finish()));
            }
        }
    }

    fn finish(&mut self) -> Response {
        let (head, body) = match std::mem::replace(&mut self.state, State::Head) {
            State::Body { head, body, .. } => (head, body),
            State::Head => unreachable!("finish called before headers parsed"),
        };
        let original_body_size = Some(body.len() as u64);
        Response {
            version: head.version,
            status: head.status,
            reason: head.reason,
            header: head.header,
            body,
            internal: ResponseInternal { original_body_size },
        }
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        ResponseParser::new()
    }
}

fn parse_head(buf: &mut BytesMut) -> Result<Option<Head>, ParseError> {
    let mut small = [httparse::EMPTY_HEADER; MIN_HEADERS];
    let mut large;
    let mut raw = httparse::Response::new(&mut small);
    let mut result = raw.parse(buf);
    if matches!(result, Err(httparse::Error::TooManyHeaders)) {
        large = vec![httparse::EMPTY_HEADER; MAX_HEADERS];
        raw = httparse::Response::new(&mut large);
        result = raw.parse(buf);
    }
    match result? {
        httparse::Status::Partial => Ok(None),
        httparse::Status::Complete(consumed) => {
            let version = match raw.version.unwrap() {
                0 => Version::Http10,
                1 => Version::Http11,
                _ => return Err(ParseError::InvalidVersion),
            };
            let mut header = HeaderSet::new();
            for h in raw.headers.iter() {
                let value = std::str::from_utf8(h.value).map_err(|_| ParseError::Utf8)?;
                header.append(h.name.to_string(), value.to_string());
            }
            let head = Head {
                version,
                status: raw.code.unwrap(),
                reason: raw.reason.unwrap_or("").to_string(),
                header,
            };
            buf.advance(consumed);
            Ok(Some(head))
        }
    }
}

fn step_chunked(
    state: &mut ChunkState,
    body: &mut Vec<u8>,
    buf: &mut BytesMut,
) -> Result<Progress<()>, ParseError> {
    loop {
        match state {
            ChunkState::Size => match find_crlf(buf) {
                None => return Ok(Progress::More),
                Some(line_end) => {
                    let line = &buf[..line_end];
                    let size_part = line.split(|&b| b == b';').next().unwrap_or(line);
                    let size_str =
                        std::str::from_utf8(size_part).map_err(|_| ParseError::InvalidChunkSize)?;
                    let size = u64::from_str_radix(size_str.trim(), 16)
                        .map_err(|_| ParseError::InvalidChunkSize)?;
                    buf.advance(line_end + 2);
                    *state = if size == 0 {
                        ChunkState::Trailer
                    } else {
                        ChunkState::Data(size)
                    };
                }
            },
            ChunkState::Data(remaining) => {
                let take = (*remaining as usize).min(buf.len());
                body.extend_from_slice(&buf[..take]);
                buf.advance(take);
                *remaining -= take as u64;
                if *remaining > 0 {
                    return Ok(Progress::More);
                }
                *state = ChunkState::DataEnd;
            }
            ChunkState::DataEnd => {
                if buf.len() < 2 {
                    return Ok(Progress::More);
                }
                buf.advance(2); // trailing CRLF after chunk data
                *state = ChunkState::Size;
            }
            ChunkState::Trailer => match find_crlf(buf) {
                None => return Ok(Progress::More),
                Some(0) => {
                    buf.advance(2);
                    return Ok(Progress::Done(()));
                }
                Some(line_end) => {
                    // Trailer headers are consumed but not surfaced; this
                    // core has no caller-visible use for them.
                    buf.advance(line_end + 2);
                }
            },
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut ResponseParser, data: &[u8]) -> Response {
        let mut buf = BytesMut::from(data);
        loop {
            match parser.feed(&mut buf).unwrap() {
                Progress::Done(resp) => return resp,
                Progress::More => panic!("parser needs more data than provided"),
            }
        }
    }

    #[test]
    fn parses_fixed_length_body() {
        let mut parser = ResponseParser::new();
        let resp = feed_all(
            &mut parser,
            b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        );
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"hello");
    }

    #[test]
    fn parses_chunked_body() {
        let mut parser = ResponseParser::new();
        let resp = feed_all(
            &mut parser,
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
        );
        assert_eq!(resp.body, b"hello");
    }

    #[test]
    fn feeding_in_small_pieces_eventually_completes() {
        let mut parser = ResponseParser::new();
        let whole = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
        let mut buf = BytesMut::new();
        let mut result = None;
        for byte in whole {
            buf.extend_from_slice(&[*byte]);
            match parser.feed(&mut buf).unwrap() {
                Progress::Done(resp) => {
                    result = Some(resp);
                    break;
                }
                Progress::More => continue,
            }
        }
        assert_eq!(result.unwrap().body, b"hello");
    }

    #[test]
    fn no_body_framing_completes_immediately_after_headers() {
        let mut parser = ResponseParser::new();
        let resp = feed_all(&mut parser, b"HTTP/1.1 204 No Content\r\n\r\n");
        assert!(resp.body.is_empty());
    }

    #[test]
    fn encode_uses_origin_form() {
        let req = Request::get("http://example.invalid/a?b=c");
        let bytes = encode_request(&req);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("GET /a?b=c HTTP/1.1\r\n"));
    }
}
