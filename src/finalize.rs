//! `RequestFinalizer` (§4.2): the client-level header/host/compression/
//! length fixes applied to every outgoing request, in a fixed order.

use crate::header::HeaderSet;
use crate::request::{Request, Target};
use crate::transport::Transport;

/// The subset of `ClientOptions` the finalizer needs.
pub struct FinalizeContext<'a> {
    pub host: &'a str,
    pub port: u16,
    pub transport: Transport,
    pub default_header: &'a HeaderSet,
    pub compression: bool,
}

/// Apply the four transformations of §4.2, in order. The Host field is
/// injected last among header fields so user-supplied defaults never
/// override it.
pub fn finalize(req: &Request, ctx: &FinalizeContext) -> Request {
    let mut out = req.clone();

    // 1. Compression
    if ctx.compression && !out.header.contains("Accept-Encoding") {
        out.header.append("Accept-Encoding", "gzip");
    }

    // 2. Default header injection, in configured order, each behind the
    // previously-inserted ones so lookup order still matches the caller's
    // own headers first.
    for (name, value) in ctx.default_header.iter().rev() {
        out.header.add(name.to_string(), value.to_string());
    }

    // 3. Host
    let default_port = ctx.transport.default_port();
    let host_value = if ctx.port == default_port {
        ctx.host.to_string()
    } else {
        format!("{}:{}", ctx.host, ctx.port)
    };
    out.header.remove("Host");
    out.header.add("Host", host_value);

    // 4. Content-Length
    if !out.body.is_empty()
        && !out.header.contains("Content-Length")
        && !out.header.contains("Transfer-Encoding")
    {
        out.header.append("Content-Length", out.body.len().to_string());
    }

    out
}

/// Rewrite `target` to carry only path+query+fragment, defaulting the
/// path to `/` when the target is origin-form with an empty path. Used to
/// compute what actually goes on the request line (§6, Wire format).
pub fn origin_form(target: &Target) -> Target {
    Target::Origin(crate::codec::send_target(target))
}
