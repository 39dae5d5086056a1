//! Accept loop and per-connection driver.
//!
//! `Server` bundles everything a connection needs: the handler registry,
//! the middleware chain, the channel table, and the negotiated codec /
//! compressor registries.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use cats_codec::codec::{CodecRegistry, EncodeInput, Payload};
use cats_codec::compressor::CompressorRegistry;
use cats_core::config::CatsConfig;
use cats_core::handshake::Sha256TimeHandshake;
use cats_core::wire::ActionType;
use cats_core::Headers;
use tokio::net::TcpListener;

use crate::action::{self, Action, ReadLimits};
use crate::channel::ChannelTable;
use crate::connection::ConnectionHandle;
use crate::dispatch::Api;
use crate::init;
use crate::middleware::{self, DefaultErrorHandler, Forward, Middleware};

pub struct Server {
    pub config: CatsConfig,
    pub api: Arc<Api>,
    pub middlewares: Vec<Arc<dyn Middleware>>,
    pub channels: Arc<ChannelTable>,
    pub codecs: Arc<CodecRegistry>,
    pub compressors: Arc<CompressorRegistry>,
    pub handshake: Option<Sha256TimeHandshake>,
}

impl Server {
    pub fn new(config: CatsConfig, api: Api) -> Self {
        Self::with_channels(config, api, Arc::new(ChannelTable::new()))
    }

    /// Build a server sharing someone else's channel table — what
    /// [`crate::runtime::Runtime`] uses to make `broadcast` reach every
    /// connection across every listener it spawns, not just this one.
    pub fn with_channels(config: CatsConfig, api: Api, channels: Arc<ChannelTable>) -> Self {
        let handshake = if config.handshake.enabled {
            Some(
                Sha256TimeHandshake::new(config.handshake.secret.clone().into_bytes())
                    .with_valid_window(config.handshake.valid_window)
                    .with_timeout(config.handshake.timeout_secs),
            )
        } else {
            None
        };

        Self {
            config,
            api: Arc::new(api),
            middlewares: vec![Arc::new(DefaultErrorHandler)],
            channels,
            codecs: Arc::new(CodecRegistry::default()),
            compressors: Arc::new(CompressorRegistry::default()),
            handshake,
        }
    }

    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.network.host, self.config.network.port);
        let listener = TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))?;
        tracing::info!(%addr, "catsd listening");
        self.serve(listener).await
    }

    /// Bind the configured address without serving, so callers (tests, or a
    /// supervisor picking an ephemeral port) can learn the bound address
    /// before traffic starts flowing.
    pub async fn bind(&self) -> anyhow::Result<TcpListener> {
        let addr = format!("{}:{}", self.config.network.host, self.config.network.port);
        TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                    tracing::warn!(%peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }

    async fn handle_connection(&self, mut stream: tokio::net::TcpStream, peer_addr: SocketAddr) -> anyhow::Result<()> {
        let negotiated = init::server_bootstrap(&mut stream, self.handshake.as_ref()).await?;
        tracing::debug!(%peer_addr, api_version = negotiated.api_version, "connection negotiated");

        let (mut read_half, write_half) = stream.into_split();
        let conn = ConnectionHandle::new(
            peer_addr,
            Box::new(write_half),
            self.codecs.clone(),
            self.compressors.clone(),
            self.channels.clone(),
            negotiated.scheme,
            self.config.limits.input_limit,
        );
        conn.set_api_version(negotiated.api_version);

        let idle_timeout = Duration::from_secs(self.config.network.idle_timeout_secs);
        let ping_conn = conn.clone();
        let ping_task = tokio::spawn(async move {
            if idle_timeout.is_zero() {
                return;
            }
            let mut interval = tokio::time::interval(idle_timeout / 2);
            loop {
                interval.tick().await;
                if ping_conn.send_ping().await.is_err() {
                    return;
                }
            }
        });

        // `Identity::is_expired` is a pure check; something has to poll it.
        // A signed-in connection that never refreshes its TTL is
        // auto-signed-out here rather than closed, matching
        // `cats/v2/connection.py`'s `_identity_timer` behavior.
        let identity_conn = conn.clone();
        let identity_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                if identity_conn.identity().map(|i| i.is_expired()).unwrap_or(false) {
                    identity_conn.sign_out();
                }
            }
        });

        let limits =
            ReadLimits { in_memory_cap: self.config.limits.in_memory_cap, max_plain_payload: self.config.limits.max_plain_payload };

        let mut last_ping_echo = Instant::now() - Duration::from_secs(3600);
        let result: anyhow::Result<()> = loop {
            let scheme = conn.scheme();
            let read_result = if idle_timeout.is_zero() {
                action::read_action(&mut read_half, scheme, &limits).await
            } else {
                match tokio::time::timeout(idle_timeout, action::read_action(&mut read_half, scheme, &limits)).await {
                    Ok(r) => r,
                    Err(_) => break Err(cats_core::ConnectionError::Timeout.into()),
                }
            };

            conn.touch(now_millis());

            let parsed = match read_result {
                Ok(a) => a,
                Err(e) => break Err(e.into()),
            };

            match parsed {
                Action::Ping => {
                    // Receiving a Ping is a liveness signal either way; echo
                    // back at most once per cooldown window so a pinger on
                    // each side does not bounce an unbounded ping storm.
                    if last_ping_echo.elapsed() > Duration::from_millis(500) {
                        if conn.send_ping().await.is_err() {
                            break Ok(());
                        }
                        last_ping_echo = Instant::now();
                    }
                }
                Action::DownloadSpeed(speed) => conn.set_download_speed(speed),
                Action::CancelInput(message_id) => {
                    conn.cancel_input(message_id);
                }
                Action::Input(inner) => {
                    let decompressed = match self.compressors.decompress(inner.compressor, &inner.payload, &inner.headers) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            tracing::debug!(message_id = inner.message_id, error = %e, "input reply decompression failed");
                            continue;
                        }
                    };
                    if !conn.fulfil_input(inner.message_id, inner.headers, decompressed) {
                        tracing::debug!(message_id = inner.message_id, "input reply with no pending ask, dropped");
                    }
                }
                Action::Stream(req) | Action::Request(req) => {
                    let handler_id = req.handler_id;
                    let message_id = req.message_id;
                    let data_type = req.data_type;

                    let payload = match action::decode_payload(&req, &self.codecs, &self.compressors, conn.scheme()) {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::debug!(handler_id, error = %e, "payload decode failed");
                            continue;
                        }
                    };

                    let chain = self.build_chain(handler_id, data_type);
                    let conn_for_handler = conn.clone();
                    tokio::spawn(async move {
                        let outcome = chain(conn_for_handler.clone(), req.headers, payload).await;
                        if let Ok(Some(outcome)) = outcome {
                            let _ = conn_for_handler
                                .send_action(
                                    ActionType::Request,
                                    handler_id,
                                    message_id,
                                    now_millis(),
                                    &outcome.payload,
                                    outcome.headers,
                                )
                                .await;
                        }
                    });
                }
            }
        };

        ping_task.abort();
        identity_task.abort();
        self.channels.remove_everywhere(conn.id());
        result
    }

    /// Send `input` as a Request action to every connection currently
    /// attached to `channel`, concurrently. Errors delivering to any one
    /// member (a half-closed socket racing its own teardown) are logged and
    /// otherwise ignored — broadcast is best-effort, not a transaction.
    pub async fn broadcast(
        self: &Arc<Self>,
        channel: &str,
        handler_id: u16,
        input: EncodeInput,
        headers: Headers,
    ) {
        self.broadcast_if(channel, handler_id, input, headers, |_conn| true).await
    }

    /// Like [`Server::broadcast`], but only to members for which `predicate`
    /// returns `true` — e.g. excluding the connection that triggered the
    /// broadcast in the first place.
    pub async fn broadcast_if<F>(
        self: &Arc<Self>,
        channel: &str,
        handler_id: u16,
        input: EncodeInput,
        headers: Headers,
        predicate: F,
    ) where
        F: Fn(&ConnectionHandle) -> bool,
    {
        let members: Vec<ConnectionHandle> = self.channels.members(channel).into_iter().filter(predicate).collect();
        if members.is_empty() {
            return;
        }

        let mut joinset = tokio::task::JoinSet::new();
        for conn in members {
            let input = input.clone();
            let headers = headers.clone();
            joinset.spawn(async move {
                let message_id = conn.next_broadcast_message_id();
                let conn_id = conn.id();
                if let Err(e) =
                    conn.send_action(ActionType::Request, handler_id, message_id, now_millis(), &input, headers).await
                {
                    tracing::debug!(conn_id, handler_id, error = %e, "broadcast delivery failed");
                }
            });
        }
        while joinset.join_next().await.is_some() {}
    }

    /// Build the middleware chain for one request, terminating at the
    /// handler resolved for `handler_id`.
    fn build_chain(&self, handler_id: u16, data_type: u8) -> Forward {
        let api = self.api.clone();
        let terminal: Forward = Arc::new(move |conn: ConnectionHandle, headers: Headers, payload: Payload| {
            let api = api.clone();
            Box::pin(async move {
                let handler = api.resolve(handler_id, conn.api_version())?;
                let model_name = conn.identity().map(|i| i.model_name);
                let data_len = payload_len(&payload);
                handler.guards().check(data_type, data_len, model_name.as_deref())?;
                handler.handle(&conn, headers, payload).await
            })
        });
        middleware::compose(&self.middlewares, terminal)
    }
}

fn payload_len(payload: &Payload) -> usize {
    match payload {
        Payload::Bytes(b) => b.len(),
        Payload::Document(v) => serde_json::to_vec(v).map(|b| b.len()).unwrap_or(0),
        Payload::Files(f) => f.len(),
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
