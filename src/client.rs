//! `Client` (§4.3): one connection, one task, one in-flight request at a
//! time. Talks to its owning `Pool` exclusively through the message pair
//! named in SPEC_FULL.md's design notes — `SendRequest`/`ClientExited` —
//! realized here as a `tokio::spawn`ed task plus `mpsc`/`oneshot`
//! channels, the direct modern analogue of the isolated-task constraint
//! in §5.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use base64::Engine;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use crate::codec::{self, Progress, ResponseParser};
use crate::error::{OpenError, SendError};
use crate::finalize::{self, FinalizeContext};
use crate::header::HeaderSet;
use crate::logger::RequestLog;
use crate::request::Request;
use crate::response::Response;
use crate::transport::{self, Conn, Transport};
use crate::websocket::{self, HandshakeOptions};
use quick_error::quick_error;

/// A unique, process-local identifier for a spawned client, used as the
/// value side of `Pool::clients_by_pid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

impl ClientId {
    fn next() -> ClientId {
        ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone)]
pub enum Credentials {
    Basic(String, String),
}

/// Options recognized by `Client::open` (§4.3).
#[derive(Clone)]
pub struct ClientOptions {
    pub host: String,
    pub port: u16,
    pub transport: Transport,
    pub connection_timeout: Duration,
    pub read_timeout: Duration,
    pub header: HeaderSet,
    pub compression: bool,
    pub log_requests: bool,
    pub pool: String,
    pub credentials: Option<Credentials>,
    pub ca_certificate_bundle_path: Option<PathBuf>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            host: "localhost".to_string(),
            port: 80,
            transport: Transport::Tcp,
            connection_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
            header: HeaderSet::new(),
            compression: false,
            log_requests: true,
            pool: "default".to_string(),
            credentials: None,
            ca_certificate_bundle_path: None,
        }
    }
}

/// An upgrade protocol selection forwarded via `request_options.protocol`.
/// Only WebSocket is named in the spec; a new variant is the extension
/// point for additional protocols.
#[derive(Clone)]
pub enum Protocol {
    WebSocket(HandshakeOptions),
}

/// What the client hands back after a successful 101 upgrade: the raw
/// connection plus whatever tail bytes arrived with the response headers
/// but belong to the new protocol's stream.
#[derive(Debug)]
pub struct UpgradeHandle {
    pub conn: Conn,
    pub tail: Vec<u8>,
}

#[derive(Debug)]
pub enum ClientOutcome {
    Normal(Response),
    Upgraded(Response, UpgradeHandle),
}

enum ClientCommand {
    Send {
        request: Request,
        protocol: Option<Protocol>,
        reply: oneshot::Sender<Result<ClientOutcome, SendError>>,
    },
}

/// A lightweight, cloneable reference to a running client task.
#[derive(Clone)]
pub struct ClientHandle {
    id: ClientId,
    cmd_tx: mpsc::Sender<ClientCommand>,
}

impl PartialEq for ClientHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for ClientHandle {}
impl std::hash::Hash for ClientHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

quick_error! {
    #[derive(Debug)]
    pub enum DispatchError {
        ClientGone {
            display("client task is no longer running")
        }
        Send(err: SendError) {
            display("{}", err)
            from()
        }
    }
}

impl ClientHandle {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Send one request to this client and await the reply. Mirrors
    /// `Client::send_request` (§4.3): at most one call in flight per
    /// handle is meaningful; a second concurrent call simply queues
    /// behind the channel, which is how "one request at a time" is
    /// enforced without a separate lock.
    pub async fn send_request(
        &self,
        request: Request,
        protocol: Option<Protocol>,
    ) -> Result<ClientOutcome, DispatchError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(ClientCommand::Send { request, protocol, reply: reply_tx })
            .await
            .map_err(|_| DispatchError::ClientGone)?;
        reply_rx.await.map_err(|_| DispatchError::ClientGone)?.map_err(Into::into)
    }
}

/// Why a client task stopped running; reported to the owning pool so it
/// can decide whether to log (§4.4, Supervision of clients).
#[derive(Debug)]
pub enum ExitReason {
    /// `Connection: close` on a response, or the peer closed the socket
    /// between requests.
    Normal,
    /// The connection was handed off to an upgrade protocol.
    Upgraded,
    /// `SendError` isn't `Clone` (it wraps `io::Error`), and the error
    /// itself already went out over the reply channel, so only its
    /// rendered message travels here.
    Error(String),
}

pub struct ClientExited {
    pub id: ClientId,
    pub reason: ExitReason,
}

/// Open a connection and spawn its task. `exited_tx` is notified exactly
/// once, when the task stops, regardless of reason.
pub async fn open(
    options: ClientOptions,
    exited_tx: mpsc::UnboundedSender<ClientExited>,
) -> Result<ClientHandle, OpenError> {
    let conn = connect(&options).await?;
    let id = ClientId::next();
    let (cmd_tx, cmd_rx) = mpsc::channel(1);
    tokio::spawn(run(id, options, conn, cmd_rx, exited_tx));
    Ok(ClientHandle { id, cmd_tx })
}

async fn connect(options: &ClientOptions) -> Result<Conn, OpenError> {
    let addr = format!("{}:{}", options.host, options.port);
    let tcp = tokio::time::timeout(options.connection_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| OpenError::ConnectTimeout)??;
    match options.transport {
        Transport::Tcp => Ok(Conn::Plain(tcp)),
        Transport::Tls => {
            let connector =
                transport::build_connector(options.ca_certificate_bundle_path.as_deref())
                    .map_err(OpenError::Tls)?;
            let server_name = rustls::pki_types::ServerName::try_from(options.host.clone())
                .map_err(|_| {
                    OpenError::Tls(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "invalid TLS server name",
                    ))
                })?;
            let tls = connector
                .connect(server_name, tcp)
                .await
                .map_err(OpenError::Tls)?;
            Ok(Conn::Tls(Box::new(tls)))
        }
    }
}

async fn run(
    id: ClientId,
    options: ClientOptions,
    conn: Conn,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
    exited_tx: mpsc::UnboundedSender<ClientExited>,
) {
    let mut conn = Some(conn);
    let mut read_buf = BytesMut::new();
    let reason = loop {
        let mut probe = [0u8; 1];
        tokio::select! {
            biased;
            cmd = cmd_rx.recv() => {
                match cmd {
                    None => break ExitReason::Normal,
                    Some(ClientCommand::Send { request, protocol, reply }) => {
                        let owned_conn = conn.take().expect("connection present while client is idle");
                        match handle_one(&options, owned_conn, &mut read_buf, request, protocol).await {
                            Ok((outcome, Aftermath::Keep(c))) => {
                                conn = Some(c);
                                let _ = reply.send(Ok(outcome));
                            }
                            Ok((outcome, Aftermath::Stop)) => {
                                let upgraded = matches!(outcome, ClientOutcome::Upgraded(..));
                                let _ = reply.send(Ok(outcome));
                                break if upgraded { ExitReason::Upgraded } else { ExitReason::Normal };
                            }
                            Err(err) => {
                                let message = err.to_string();
                                let _ = reply.send(Err(err));
                                break ExitReason::Error(message);
                            }
                        }
                    }
                }
            }
            read_result = conn.as_mut().expect("connection present while client is idle").read(&mut probe) => {
                match read_result {
                    Ok(0) => break ExitReason::Normal,
                    Ok(_) => break ExitReason::Error(SendError::UnexpectedInboundData.to_string()),
                    Err(err) => break ExitReason::Error(SendError::Recv(err).to_string()),
                }
            }
        }
    };
    let _ = exited_tx.send(ClientExited { id, reason });
}

enum Aftermath {
    /// The connection survives for the next request.
    Keep(Conn),
    /// `Connection: close`, the socket was handed off to an upgrade
    /// protocol, or the exchange failed — either way nothing left to read.
    Stop,
}

async fn handle_one(
    options: &ClientOptions,
    mut conn: Conn,
    read_buf: &mut BytesMut,
    request: Request,
    protocol: Option<Protocol>,
) -> Result<(ClientOutcome, Aftermath), SendError> {
    let start = Instant::now();

    let mut request = request;
    let ws_opts = match &protocol {
        Some(Protocol::WebSocket(opts)) => {
            websocket::prepare_request(&mut request, opts);
            Some(opts)
        }
        None => None,
    };

    // Basic auth rides along with the other client-level defaults so
    // `finalize`'s own default-header step (§4.2 step 2) is the single
    // place that merges it into the outgoing request.
    let mut default_header = options.header.clone();
    if let Some(Credentials::Basic(user, pass)) = &options.credentials {
        if !default_header.contains("Authorization") {
            let token = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, pass));
            default_header.add("Authorization", format!("Basic {}", token));
        }
    }

    let ctx = FinalizeContext {
        host: &options.host,
        port: options.port,
        transport: options.transport,
        default_header: &default_header,
        compression: options.compression,
    };
    let finalized = finalize::finalize(&request, &ctx);
    let encoded = codec::encode_request(&finalized);

    write_all_timeout(&mut conn, &encoded, options.read_timeout).await?;

    let (response, tail) = read_response(&mut conn, read_buf, options.read_timeout).await?;

    if options.log_requests {
        let elapsed_us = start.elapsed().as_micros() as u64;
        RequestLog::new(&options.pool, &finalized, &response, elapsed_us).emit();
    }

    let close = response.header.has_connection_close();

    if let (Some(ws_opts), true) = (ws_opts, response.status == 101) {
        websocket::validate_response(&response, ws_opts)?;
        let outcome = ClientOutcome::Upgraded(response, UpgradeHandle { conn, tail });
        return Ok((outcome, Aftermath::Stop));
    }

    let outcome = ClientOutcome::Normal(response);
    if close {
        Ok((outcome, Aftermath::Stop))
    } else {
        Ok((outcome, Aftermath::Keep(conn)))
    }
}

async fn write_all_timeout(conn: &mut Conn, data: &[u8], timeout: Duration) -> Result<(), SendError> {
    tokio::time::timeout(timeout, conn.write_all(data))
        .await
        .map_err(|_| SendError::WriteTimeout)?
        .map_err(SendError::Send)
}

async fn read_response(
    conn: &mut Conn,
    buf: &mut BytesMut,
    timeout: Duration,
) -> Result<(Response, Vec<u8>), SendError> {
    let mut parser = ResponseParser::new();
    loop {
        if !buf.is_empty() {
            if let Progress::Done(response) = parser.feed(buf)? {
                let tail = buf.split().to_vec();
                return Ok((response, tail));
            }
        }
        let mut chunk = [0u8; 8192];
        let n = tokio::time::timeout(timeout, conn.read(&mut chunk))
            .await
            .map_err(|_| SendError::ReadTimeout)?
            .map_err(SendError::Recv)?;
        if n == 0 {
            return Err(SendError::ConnectionClosed);
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Progress::Done(response) = parser.feed(buf)? {
            let tail = buf.split().to_vec();
            return Ok((response, tail));
        }
    }
}
