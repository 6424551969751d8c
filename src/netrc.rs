//! §4.7 (expansion): a minimal `.netrc`-subset reader, standing in for the
//! credential store the core spec names only as `lookup(host) ->
//! Option<(user, password, port_override)>`.
//!
//! Loaded once at pool-start time and read-only afterward, the same way
//! the Registry's CA-bundle path is immutable after init (§5, Shared
//! resources).

use std::fs;
use std::path::Path;
use quick_error::quick_error;

quick_error! {
    #[derive(Debug)]
    pub enum NetrcError {
        Io(err: std::io::Error) {
            display("could not read netrc file: {}", err)
            from()
        }
    }
}

/// A `port` token from a credential entry. Preserves the quirk recorded
/// in SPEC_FULL.md §9: only `"http"`/`"https"` are recognized as named
/// ports; any other non-numeric token is logged and the URI's own port
/// is used instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSpec {
    Number(u16),
    Http,
    Https,
}

impl PortSpec {
    pub fn resolve(self) -> u16 {
        match self {
            PortSpec::Number(n) => n,
            PortSpec::Http => 80,
            PortSpec::Https => 443,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Credential {
    pub user: String,
    pub password: String,
    pub port: Option<PortSpec>,
}

#[derive(Debug, Clone, Default)]
pub struct NetrcStore {
    entries: Vec<(String, Credential)>,
}

impl NetrcStore {
    pub fn empty() -> NetrcStore {
        NetrcStore { entries: Vec::new() }
    }

    pub fn load(path: &Path) -> Result<NetrcStore, NetrcError> {
        let text = fs::read_to_string(path)?;
        Ok(NetrcStore::parse(&text))
    }

    fn parse(text: &str) -> NetrcStore {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let mut entries = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            if tokens[i] == "machine" && i + 1 < tokens.len() {
                let host = tokens[i + 1].to_string();
                let mut user = None;
                let mut password = None;
                let mut port = None;
                let mut j = i + 2;
                while j + 1 < tokens.len() && tokens[j] != "machine" {
                    match tokens[j] {
                        "login" => user = Some(tokens[j + 1].to_string()),
                        "password" => password = Some(tokens[j + 1].to_string()),
                        "port" => port = parse_port_token(tokens[j + 1]),
                        _ => {}
                    }
                    j += 2;
                }
                if let (Some(user), Some(password)) = (user, password) {
                    entries.push((host, Credential { user, password, port }));
                }
                i = j;
            } else {
                i += 1;
            }
        }
        NetrcStore { entries }
    }

    /// First credential entry matching `host` exactly.
    pub fn lookup(&self, host: &str) -> Option<&Credential> {
        self.entries.iter().find(|(h, _)| h == host).map(|(_, c)| c)
    }
}

/// `None` means "log and fall back to the URI's own port" — the quirk
/// preserved verbatim from §9: only `http`/`https` are recognized as
/// named ports, and any other non-numeric token is not an override.
fn parse_port_token(token: &str) -> Option<PortSpec> {
    if let Ok(n) = token.parse::<u16>() {
        return Some(PortSpec::Number(n));
    }
    match token {
        "http" => Some(PortSpec::Http),
        "https" => Some(PortSpec::Https),
        other => {
            log::warn!(port = other; "netrc port token is not numeric or http/https; falling back to URI port");
            None
        }
    }
}
