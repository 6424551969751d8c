//! `Pool` (§4.4): keys connections by `(host, port, transport)`, caps
//! concurrency per key, drives the redirection loop, and surfaces
//! protocol upgrades. Runs as its own `tokio::spawn`ed task, the pool
//! side of the message-passing model in §5 and §9's design notes.
//!
//! The owning task only ever does two things itself: bookkeeping on
//! `clients_by_key`/`clients_by_pid` (§5, Shared resources — these are
//! mutated from nowhere else) and handing out already-open clients.
//! Everything that can block for a while — the redirection loop's
//! request/response round trips, opening a fresh connection — runs in
//! its own spawned task, so one slow key never holds up another (§5,
//! "Parallelism across keys is free").

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use rand::Rng;
use tokio::sync::{mpsc, oneshot};

use crate::client::{self, ClientExited, ClientHandle, ClientId, ClientOptions, Credentials, ExitReason, Protocol};
use crate::error::{PoolError, WebSocketError};
use crate::finalize;
use crate::netrc::NetrcStore;
use crate::request::{Request, Target};
use crate::response::Response;
use crate::transport::Transport;
use crate::uri;

/// `(host, port, transport)` — the deduplication key for a pool's
/// connections (§3, Data Model).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub host: String,
    pub port: u16,
    pub transport: Transport,
}

/// Per-pool configuration (§6, Pool options).
#[derive(Clone)]
pub struct PoolOptions {
    /// Merged into every client the pool creates; `host`/`port`/`transport`
    /// are always overridden per connection.
    pub client_options: ClientOptions,
    pub max_connections_per_key: usize,
    pub use_netrc: bool,
    pub netrc_path: Option<PathBuf>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions {
            client_options: ClientOptions::default(),
            max_connections_per_key: 1,
            use_netrc: false,
            netrc_path: None,
        }
    }
}

/// Per-request configuration (§6, Request options).
pub struct RequestOptions {
    pub pool: String,
    pub follow_redirections: bool,
    pub max_nb_redirections: u32,
    pub protocol: Option<Protocol>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        RequestOptions {
            pool: "default".to_string(),
            follow_redirections: true,
            max_nb_redirections: 5,
            protocol: None,
        }
    }
}

#[derive(Debug)]
pub enum Outcome {
    Normal(Response),
    Upgraded(Response, client::UpgradeHandle),
}

enum PoolCommand {
    Send {
        request: Request,
        options: RequestOptions,
        reply: oneshot::Sender<Result<Outcome, PoolError>>,
    },
    /// Issued by a spawned dispatch task when it needs a client for `key`;
    /// handled entirely on the owning task so the two indexes never see a
    /// concurrent writer.
    Acquire {
        key: ClientKey,
        credentials: Option<Credentials>,
        reply: oneshot::Sender<Result<ClientHandle, PoolError>>,
    },
    /// A spawned connect task's `client::open` succeeded; the caller that
    /// triggered it was already replied to directly, this just folds the
    /// new client into the indexes and wakes any overflow waiters on `key`.
    Registered {
        key: ClientKey,
        handle: ClientHandle,
    },
    /// A spawned connect task's `client::open` failed; the caller that
    /// triggered it was already replied to directly, this just frees the
    /// key's reserved slot.
    ConnectFailed {
        key: ClientKey,
        message: String,
    },
    Stop,
}

#[derive(Clone)]
pub struct PoolHandle {
    cmd_tx: mpsc::Sender<PoolCommand>,
}

impl PoolHandle {
    pub async fn send_request(
        &self,
        request: Request,
        options: RequestOptions,
    ) -> Result<Outcome, PoolError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(PoolCommand::Send { request, options, reply: reply_tx })
            .await
            .map_err(|_| PoolError::PoolStopped)?;
        reply_rx.await.map_err(|_| PoolError::PoolStopped)?
    }

    pub async fn stop(&self) -> Result<(), PoolError> {
        self.cmd_tx.send(PoolCommand::Stop).await.map_err(|_| PoolError::PoolStopped)
    }
}

/// Start a pool task named `name` (used as its logging label, matching
/// `ClientOptions::pool`).
pub fn start(name: String, options: PoolOptions) -> PoolHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    // The task only keeps a *weak* reference to its own command channel.
    // It needs one to hand out to spawned connect/dispatch tasks that must
    // talk back to it, but a strong one held for the task's whole life
    // would mean `cmd_rx.recv()` never sees the channel close, so dropping
    // every `PoolHandle` without an explicit `stop()` would leak the task
    // forever instead of shutting it down.
    tokio::spawn(run(name, options, cmd_tx.downgrade(), cmd_rx));
    PoolHandle { cmd_tx }
}

struct PoolState {
    name: String,
    options: PoolOptions,
    netrc: Arc<NetrcStore>,
    clients_by_key: HashMap<ClientKey, Vec<ClientHandle>>,
    clients_by_pid: HashMap<ClientId, ClientKey>,
    /// In-flight `client::open` calls per key, counted against the cap
    /// alongside `clients_by_key` so concurrent first-time callers for the
    /// same key can't all open `max_connections_per_key` connections each.
    pending: HashMap<ClientKey, usize>,
    /// `Acquire` replies for a key that is already at capacity with no
    /// established client yet (every reserved slot is still connecting).
    /// These didn't spawn their own connect attempt, so once any one
    /// in-flight connect for the key succeeds, all of them are handed a
    /// clone of that handle at once — an established handle isn't
    /// exclusive, so there's no reason to serialize them further.
    waiters: HashMap<ClientKey, VecDeque<oneshot::Sender<Result<ClientHandle, PoolError>>>>,
    /// Clients whose `ClientExited` arrived before their `Registered` —
    /// the client task can detect a dead socket and exit before the
    /// connect task that spawned it gets to report success back to this
    /// task, and `tokio::select!` doesn't order the two channels. Letting
    /// `handle_registered` consult this set means a connection that died
    /// before it was ever registered doesn't get added to the indexes
    /// with no `ClientExited` left to ever clean it back out.
    exited_before_registered: HashSet<ClientId>,
    exited_tx: mpsc::UnboundedSender<ClientExited>,
    cmd_tx: mpsc::WeakSender<PoolCommand>,
}

async fn run(
    name: String,
    options: PoolOptions,
    cmd_tx: mpsc::WeakSender<PoolCommand>,
    mut cmd_rx: mpsc::Receiver<PoolCommand>,
) {
    let netrc = if options.use_netrc {
        match &options.netrc_path {
            Some(path) => match NetrcStore::load(path) {
                Ok(store) => store,
                Err(err) => {
                    log::warn!(pool = name.as_str(), error = err.to_string().as_str(); "failed to load netrc file; credentials disabled for this pool");
                    NetrcStore::empty()
                }
            },
            None => NetrcStore::empty(),
        }
    } else {
        NetrcStore::empty()
    };

    let (exited_tx, mut exited_rx) = mpsc::unbounded_channel();
    let mut state = PoolState {
        name,
        options,
        netrc: Arc::new(netrc),
        clients_by_key: HashMap::new(),
        clients_by_pid: HashMap::new(),
        pending: HashMap::new(),
        waiters: HashMap::new(),
        exited_before_registered: HashSet::new(),
        exited_tx,
        cmd_tx,
    };

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    None | Some(PoolCommand::Stop) => break,
                    Some(PoolCommand::Send { request, options, reply }) => {
                        // Upgrading back to a strong sender always succeeds here:
                        // this message only reached us through a strong sender
                        // that's still alive, blocked awaiting `reply`.
                        match state.cmd_tx.upgrade() {
                            Some(cmd_tx) => {
                                let ctx = DispatchContext {
                                    name: state.name.clone(),
                                    netrc: state.netrc.clone(),
                                    use_netrc: state.options.use_netrc,
                                    cmd_tx,
                                };
                                tokio::spawn(async move {
                                    let result = dispatch(ctx, request, options).await;
                                    let _ = reply.send(result);
                                });
                            }
                            None => {
                                let _ = reply.send(Err(PoolError::PoolStopped));
                            }
                        }
                    }
                    Some(PoolCommand::Acquire { key, credentials, reply }) => {
                        state.handle_acquire(key, credentials, reply);
                    }
                    Some(PoolCommand::Registered { key, handle }) => {
                        state.handle_registered(key, handle);
                    }
                    Some(PoolCommand::ConnectFailed { key, message }) => {
                        state.handle_connect_failed(key, message);
                    }
                }
            }
            Some(exited) = exited_rx.recv() => {
                state.on_client_exited(exited);
            }
        }
    }
}

impl PoolState {
    /// Hand back an open client for `key`, reusing one under the cap and
    /// opening a fresh one (off this task) otherwise. A caller that
    /// triggers a new connect is replied to directly by that connect's own
    /// task, not through `waiters` — `waiters` is only for callers that
    /// arrive once every reserved slot for a not-yet-established key is
    /// already connecting, and so must share whichever one lands first.
    fn handle_acquire(
        &mut self,
        key: ClientKey,
        credentials: Option<Credentials>,
        reply: oneshot::Sender<Result<ClientHandle, PoolError>>,
    ) {
        if self.options.max_connections_per_key == 0 {
            let _ = reply.send(Err(PoolError::PoolMisconfigured));
            return;
        }

        let established = self.clients_by_key.get(&key).map(Vec::len).unwrap_or(0);
        let reserved = self.pending.get(&key).copied().unwrap_or(0);

        if established + reserved < self.options.max_connections_per_key {
            // Upgrading back to a strong sender always succeeds here: this
            // call only reached us through a strong sender (directly, or
            // via a dispatch task's own upgraded clone) still alive and
            // blocked awaiting `reply`.
            let Some(cmd_tx) = self.cmd_tx.upgrade() else {
                let _ = reply.send(Err(PoolError::PoolStopped));
                return;
            };
            *self.pending.entry(key.clone()).or_insert(0) += 1;

            let mut opts = self.options.client_options.clone();
            opts.host = key.host.clone();
            opts.port = key.port;
            opts.transport = key.transport;
            opts.pool = self.name.clone();
            if credentials.is_some() {
                opts.credentials = credentials;
            }
            let exited_tx = self.exited_tx.clone();
            tokio::spawn(async move {
                match client::open(opts, exited_tx).await {
                    Ok(handle) => {
                        let _ = reply.send(Ok(handle.clone()));
                        let _ = cmd_tx.send(PoolCommand::Registered { key, handle }).await;
                    }
                    Err(err) => {
                        let message = err.to_string();
                        let _ = reply.send(Err(PoolError::Open(message.clone())));
                        let _ = cmd_tx.send(PoolCommand::ConnectFailed { key, message }).await;
                    }
                }
            });
        } else if established > 0 {
            let bucket = &self.clients_by_key[&key];
            let idx = rand::thread_rng().gen_range(0..bucket.len());
            let _ = reply.send(Ok(bucket[idx].clone()));
        } else {
            // Every slot this key is allowed is already connecting; ride
            // along with whichever one finishes first.
            self.waiters.entry(key).or_default().push_back(reply);
        }
    }

    /// A spawned connect attempt succeeded; fold it into the indexes and
    /// wake every overflow waiter on this key. Unlike a cap slot, an
    /// established handle isn't exclusive — `handle_acquire`'s
    /// `established > 0` branch already hands the same handle to any
    /// number of concurrent callers — so there's nothing gained by holding
    /// any waiter back once one connection exists to give them.
    fn handle_registered(&mut self, key: ClientKey, handle: ClientHandle) {
        self.free_reservation(&key);

        if self.exited_before_registered.remove(&handle.id()) {
            // Died before we got to register it; don't add a dead handle
            // with no `ClientExited` left to ever clean it back out. Only
            // fail the waiters outright if this was the last attempt in
            // flight for the key — otherwise leave them queued, since
            // another still-pending connect resolving will drain them all
            // for free via the success path below.
            if self.is_last_attempt_for(&key) {
                self.drain_waiters(&key, || Err(PoolError::Open("connection closed before first use".to_string())));
            }
            return;
        }

        self.clients_by_pid.insert(handle.id(), key.clone());
        self.clients_by_key.entry(key.clone()).or_default().push(handle.clone());
        self.drain_waiters(&key, || Ok(handle.clone()));
    }

    /// A spawned connect attempt failed. Its own caller was already told
    /// directly; overflow waiters only get the bad news once this was the
    /// last attempt in flight for a key with no established client, since
    /// another still-pending attempt might yet succeed for them.
    fn handle_connect_failed(&mut self, key: ClientKey, message: String) {
        self.free_reservation(&key);
        log::warn!(pool = self.name.as_str(), error = message.as_str(); "failed to open connection");

        if self.is_last_attempt_for(&key) {
            self.drain_waiters(&key, || Err(PoolError::Open(message.clone())));
        }
    }

    /// Whether `key` has neither an established client nor another connect
    /// still in flight — i.e. no future event will ever drain its waiters
    /// for us, so a caller handling a just-failed/just-died attempt must do
    /// it now instead of leaving them queued.
    fn is_last_attempt_for(&self, key: &ClientKey) -> bool {
        let established = self.clients_by_key.get(key).map(Vec::len).unwrap_or(0);
        let reserved = self.pending.get(key).copied().unwrap_or(0);
        established == 0 && reserved == 0
    }

    /// Satisfy every waiter queued for `key`, each with its own call to
    /// `result` (a thunk rather than a value, so success can hand out a
    /// fresh `handle.clone()` per recipient and failure a fresh owned
    /// message per recipient).
    fn drain_waiters(&mut self, key: &ClientKey, mut result: impl FnMut() -> Result<ClientHandle, PoolError>) {
        if let Some(queue) = self.waiters.remove(key) {
            for waiter in queue {
                let _ = waiter.send(result());
            }
        }
    }

    fn free_reservation(&mut self, key: &ClientKey) {
        if let Some(count) = self.pending.get_mut(key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.pending.remove(key);
            }
        }
    }

    fn on_client_exited(&mut self, exited: ClientExited) {
        if let Some(key) = self.clients_by_pid.remove(&exited.id) {
            if let Some(bucket) = self.clients_by_key.get_mut(&key) {
                bucket.retain(|h| h.id() != exited.id);
                if bucket.is_empty() {
                    self.clients_by_key.remove(&key);
                }
            }
        } else {
            // `select!` doesn't order this task's two inbound channels, so
            // a client that dies immediately after connecting can have its
            // exit notification processed before `Registered` arrives for
            // it. Remember it instead of silently dropping the event, so
            // `handle_registered` knows not to index an already-dead
            // handle with nothing left to ever clean it out again.
            self.exited_before_registered.insert(exited.id);
        }
        match &exited.reason {
            ExitReason::Normal | ExitReason::Upgraded => {
                log::debug!(pool = self.name.as_str(); "client exited");
            }
            ExitReason::Error(message) => {
                log::warn!(pool = self.name.as_str(), error = message.as_str(); "client exited with error");
            }
        }
    }
}

/// Everything a dispatch task needs that doesn't require touching the
/// pool's indexes directly — a snapshot of the pool-wide, read-only bits
/// plus a way to ask the owning task for a client.
struct DispatchContext {
    name: String,
    netrc: Arc<NetrcStore>,
    use_netrc: bool,
    cmd_tx: mpsc::Sender<PoolCommand>,
}

async fn acquire(
    cmd_tx: &mpsc::Sender<PoolCommand>,
    key: ClientKey,
    credentials: Option<Credentials>,
) -> Result<ClientHandle, PoolError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    cmd_tx
        .send(PoolCommand::Acquire { key, credentials, reply: reply_tx })
        .await
        .map_err(|_| PoolError::PoolStopped)?;
    reply_rx.await.map_err(|_| PoolError::PoolStopped)?
}

/// §4.4's per-request algorithm: canonicalize, acquire a client, and loop
/// on redirections until a terminal (non-redirected or upgraded) outcome
/// is reached. Runs in its own task per request, so one in-flight
/// redirection chain never blocks another's (§5, Parallelism across keys).
async fn dispatch(
    ctx: DispatchContext,
    request: Request,
    req_opts: RequestOptions,
) -> Result<Outcome, PoolError> {
    let canonical = uri::canonicalize(&request.target, None)?;
    let mut current_url = canonical;
    let mut current_request = request;
    current_request.target = Target::Absolute(current_url.clone());

    let mut remaining = req_opts.max_nb_redirections;
    let mut previous_origin: Option<(String, String, u16)> = None;

    loop {
        let scheme = current_url.scheme().to_string();
        if matches!(req_opts.protocol, Some(Protocol::WebSocket(_)))
            && scheme != "ws"
            && scheme != "wss"
        {
            return Err(PoolError::WebSocket(WebSocketError::InvalidScheme));
        }
        let transport = uri::transport_for_scheme(&scheme)?;
        let host = uri::host_of(&current_url)?;
        let credential = if ctx.use_netrc { ctx.netrc.lookup(&host).cloned() } else { None };
        let credential_port = credential.as_ref().and_then(|c| c.port).map(|p| p.resolve());
        let port = uri::effective_port(&current_url, credential_port, transport);

        if let Some((prev_scheme, prev_host, prev_port)) = &previous_origin {
            if *prev_scheme != scheme || prev_host != &host || *prev_port != port {
                // Cross-origin hop: an explicit Authorization header the
                // caller set (or a previous hop's Basic-auth default)
                // must not follow to a different origin (§4.4 step 8).
                current_request.header.remove("Authorization");
            }
        }

        let key = ClientKey { host: host.clone(), port, transport };
        let creds = credential.map(|c| Credentials::Basic(c.user, c.password));
        let handle = acquire(&ctx.cmd_tx, key, creds).await?;

        log::debug!(
            pool = ctx.name.as_str(),
            target = finalize::origin_form(&current_request.target).as_str();
            "dispatching request"
        );

        let outcome = handle
            .send_request(current_request.clone(), req_opts.protocol.clone())
            .await
            .map_err(|err| match err {
                client::DispatchError::ClientGone => PoolError::PoolStopped,
                client::DispatchError::Send(crate::error::SendError::WebSocket(cause)) => {
                    PoolError::WebSocket(cause)
                }
                client::DispatchError::Send(cause) => PoolError::ClientError(cause),
            })?;

        let response = match outcome {
            client::ClientOutcome::Upgraded(response, upgrade) => {
                return Ok(Outcome::Upgraded(response, upgrade));
            }
            client::ClientOutcome::Normal(response) => response,
        };

        if req_opts.follow_redirections && response.is_redirection() {
            if let Some(location) = response.header.find("Location").map(|s| s.to_string()) {
                if remaining == 0 {
                    return Err(PoolError::TooManyRedirections);
                }
                remaining -= 1;

                // Resolved against the canonical request URI, not the
                // on-wire path-only send target (§9, Redirection target
                // rewriting).
                let next_url = uri::canonicalize(&Target::parse(&location), Some(&current_url))?;

                if response.status == 303 {
                    current_request.method = "GET".to_string();
                    current_request.body.clear();
                    current_request.header.remove("Content-Length");
                    current_request.header.remove("Transfer-Encoding");
                }

                previous_origin = Some((scheme, host, port));
                current_request.target = Target::Absolute(next_url.clone());
                current_url = next_url;
                continue;
            }
        }

        return Ok(Outcome::Normal(response));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_key_equality_ignores_field_order() {
        let a = ClientKey { host: "example.invalid".into(), port: 80, transport: Transport::Tcp };
        let b = ClientKey { host: "example.invalid".into(), port: 80, transport: Transport::Tcp };
        assert_eq!(a, b);
    }

    #[test]
    fn default_request_options_match_spec() {
        let opts = RequestOptions::default();
        assert_eq!(opts.pool, "default");
        assert!(opts.follow_redirections);
        assert_eq!(opts.max_nb_redirections, 5);
    }

    #[test]
    fn default_pool_options_cap_one_connection_per_key() {
        let opts = PoolOptions::default();
        assert_eq!(opts.max_connections_per_key, 1);
        assert!(!opts.use_netrc);
    }

    #[tokio::test]
    async fn websocket_upgrade_against_a_non_ws_scheme_fails_fast() {
        let handle = start("scheme-check".to_string(), PoolOptions::default());

        let request = Request::get("http://example.invalid/chat");
        let req_opts = RequestOptions {
            protocol: Some(Protocol::WebSocket(crate::websocket::HandshakeOptions::new())),
            ..Default::default()
        };

        let err = handle.send_request(request, req_opts).await.unwrap_err();
        assert!(matches!(
            err,
            PoolError::WebSocket(WebSocketError::InvalidScheme)
        ));

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn zero_capacity_per_key_is_a_clear_config_error_not_a_panic() {
        let mut options = PoolOptions::default();
        options.max_connections_per_key = 0;
        let handle = start("zero-cap".to_string(), options);

        let request = Request::get("http://example.invalid/a");
        let err = handle
            .send_request(request, RequestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::PoolMisconfigured));

        handle.stop().await.unwrap();
    }
}
