//! `RequestLogger` (§4.6): one structured event per completed request.
//!
//! Structured fields ride on `log`'s `kv` feature rather than being
//! hand-formatted into the message string, so a subscriber that
//! understands key-value pairs (and a human reading plain text output)
//! both get what they need from a single `log::info!` call.

use std::fmt;

use crate::request::Request;
use crate::response::Response;

/// Context available at the point a request/response exchange completes.
pub struct RequestLog<'a> {
    pub pool: &'a str,
    pub method: &'a str,
    pub target: &'a str,
    pub status: u16,
    pub request_time_us: u64,
    pub body_size: u64,
}

impl<'a> RequestLog<'a> {
    pub fn new(pool: &'a str, request: &'a Request, response: &Response, request_time_us: u64) -> Self {
        RequestLog {
            pool,
            method: &request.method,
            target: request.target.as_str(),
            status: response.status,
            request_time_us,
            body_size: response.logged_body_size(),
        }
    }

    pub fn emit(&self) {
        log::info!(
            domain = "mhttp.client",
            event = "mhttp.request.out",
            method = self.method,
            target_string = self.target,
            status = self.status,
            request_time_us = self.request_time_us,
            body_size = self.body_size,
            pool = self.pool;
            "{} {} -> {} in {} ({})",
            self.method,
            self.target,
            self.status,
            HumanTime(self.request_time_us),
            HumanSize(self.body_size),
        );
    }
}

/// Renders a microsecond duration as `Nµs`/`N.Nms`/`N.Ns` by magnitude.
pub struct HumanTime(pub u64);

impl fmt::Display for HumanTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let us = self.0;
        if us < 1_000 {
            write!(f, "{}\u{b5}s", us)
        } else if us < 1_000_000 {
            write!(f, "{:.1}ms", us as f64 / 1_000.0)
        } else {
            write!(f, "{:.1}s", us as f64 / 1_000_000.0)
        }
    }
}

/// Renders a byte count as `B`/`kB`/`MB`/`GB`, decimal (1000-based) units.
pub struct HumanSize(pub u64);

impl fmt::Display for HumanSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        const UNITS: [&str; 4] = ["B", "kB", "MB", "GB"];
        let bytes = self.0 as f64;
        let mut value = bytes;
        let mut unit = 0;
        while value >= 1000.0 && unit < UNITS.len() - 1 {
            value /= 1000.0;
            unit += 1;
        }
        if unit == 0 {
            write!(f, "{}{}", self.0, UNITS[0])
        } else {
            write!(f, "{:.1}{}", value, UNITS[unit])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_under_a_millisecond_is_microseconds() {
        assert_eq!(HumanTime(500).to_string(), "500\u{b5}s");
    }

    #[test]
    fn time_under_a_second_is_milliseconds() {
        assert_eq!(HumanTime(1_500).to_string(), "1.5ms");
    }

    #[test]
    fn time_over_a_second_is_seconds() {
        assert_eq!(HumanTime(2_500_000).to_string(), "2.5s");
    }

    #[test]
    fn size_under_1000_bytes_is_bytes() {
        assert_eq!(HumanSize(500).to_string(), "500B");
    }

    #[test]
    fn size_in_kilobytes() {
        assert_eq!(HumanSize(1_500).to_string(), "1.5kB");
    }

    #[test]
    fn size_in_megabytes() {
        assert_eq!(HumanSize(1_500_000).to_string(), "1.5MB");
    }
}
