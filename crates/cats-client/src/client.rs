//! Client connection: the write lock, rate limiter, pending-recv table,
//! and broadcast subscriptions. Mirrors the shape of catsd's
//! `ConnectionHandle`, from the other end of the wire.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cats_codec::codec::{CodecRegistry, EncodeInput, Payload};
use cats_codec::compressor::CompressorRegistry;
use cats_core::wire::CLIENT_MESSAGE_ID_RANGE;
use cats_core::{ConnectionError, Delay, Headers, Scheme};
use dashmap::DashMap;
use rand::Rng;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::action::{self, Action, ReadLimits};
use crate::connect::client_bootstrap;

pub use cats_core::handshake::Sha256TimeHandshake;

/// A question the server asked this client, awaiting `reply`/`cancel`.
pub struct IncomingInput {
    pub message_id: u16,
    pub headers: Headers,
    pub payload: Payload,
}

pub type Subscriber = Arc<dyn Fn(Headers, Payload) + Send + Sync>;

struct Inner {
    write: Mutex<WriteHalf<TcpStream>>,
    delay: Mutex<Delay>,
    codecs: Arc<CodecRegistry>,
    compressors: Arc<CompressorRegistry>,
    scheme: Scheme,
    pending_recv: DashMap<u16, oneshot::Sender<Result<(Headers, Payload), ConnectionError>>>,
    subscriptions: DashMap<u16, Vec<Subscriber>>,
    reserved: DashMap<u16, ()>,
}

#[derive(Clone)]
pub struct CatsClient(Arc<Inner>);

pub struct Config {
    pub api_version: u32,
    pub idle_timeout: Duration,
    pub in_memory_cap: usize,
    pub max_plain_payload: usize,
    pub handshake: Option<Sha256TimeHandshake>,
    /// Document format to propose in the `ClientStatement`. Defaults to
    /// `Scheme::Json`; set `Yaml`/`MsgPack` to negotiate one of the other
    /// formats `scheme::Scheme` already knows how to encode/decode.
    pub scheme: Scheme,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_version: cats_core::wire::PROTOCOL_VERSION,
            idle_timeout: Duration::from_secs(30),
            in_memory_cap: cats_core::wire::DEFAULT_IN_MEMORY_CAP,
            max_plain_payload: cats_core::wire::DEFAULT_IN_MEMORY_CAP,
            handshake: None,
            scheme: Scheme::Json,
        }
    }
}

/// Connect, negotiate, and spawn the read loop. Returns the client handle
/// plus the channel the application drains for server-initiated
/// `InputAction`s.
pub async fn connect(addr: SocketAddr, config: Config) -> Result<(CatsClient, mpsc::UnboundedReceiver<IncomingInput>), ConnectionError> {
    let mut stream = TcpStream::connect(addr).await?;
    let negotiated =
        client_bootstrap(&mut stream, config.api_version, config.scheme, config.handshake.as_ref()).await?;

    let (read_half, write_half) = tokio::io::split(stream);
    let inner = Arc::new(Inner {
        write: Mutex::new(write_half),
        delay: Mutex::new(Delay::new(0)),
        codecs: Arc::new(CodecRegistry::default()),
        compressors: Arc::new(CompressorRegistry::default()),
        scheme: negotiated.scheme,
        pending_recv: DashMap::new(),
        subscriptions: DashMap::new(),
        reserved: DashMap::new(),
    });

    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let client = CatsClient(inner.clone());
    let limits = ReadLimits { in_memory_cap: config.in_memory_cap, max_plain_payload: config.max_plain_payload };
    tokio::spawn(read_loop(inner, read_half, limits, input_tx));

    Ok((client, input_rx))
}

async fn read_loop(
    inner: Arc<Inner>,
    mut read_half: ReadHalf<TcpStream>,
    limits: ReadLimits,
    input_tx: mpsc::UnboundedSender<IncomingInput>,
) {
    loop {
        let parsed = match action::read_action(&mut read_half, inner.scheme, &limits).await {
            Ok(a) => a,
            Err(e) => {
                tracing::debug!(error = %e, "client read loop closing");
                break;
            }
        };

        match parsed {
            Action::Ping => {}
            Action::DownloadSpeed(speed) => {
                inner.delay.lock().await.set_speed(speed as u64);
            }
            Action::Response(resp) | Action::Stream(resp) => {
                let payload = match action::decode_payload(
                    resp.data_type,
                    resp.compressor,
                    &resp.payload,
                    &resp.headers,
                    &inner.codecs,
                    &inner.compressors,
                    inner.scheme,
                ) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::debug!(error = %e, "response payload decode failed");
                        continue;
                    }
                };
                if resp.message_id >= *cats_core::wire::BROADCAST_MESSAGE_ID_RANGE.start() {
                    if let Some(subs) = inner.subscriptions.get(&resp.handler_id) {
                        for sub in subs.iter() {
                            sub(resp.headers.clone(), clone_payload(&payload));
                        }
                        continue;
                    }
                    tracing::debug!(handler_id = resp.handler_id, "broadcast with no subscriber, dropped");
                    continue;
                }
                if let Some((_, tx)) = inner.pending_recv.remove(&resp.message_id) {
                    let _ = tx.send(Ok((resp.headers, payload)));
                } else {
                    tracing::debug!(message_id = resp.message_id, "reply with no pending recv, dropped");
                }
            }
            Action::Input(inner_action) => {
                let payload = match action::decode_payload(
                    inner_action.data_type,
                    inner_action.compressor,
                    &inner_action.payload,
                    &inner_action.headers,
                    &inner.codecs,
                    &inner.compressors,
                    inner.scheme,
                ) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::debug!(error = %e, "input payload decode failed");
                        continue;
                    }
                };
                let _ = input_tx.send(IncomingInput {
                    message_id: inner_action.message_id,
                    headers: inner_action.headers,
                    payload,
                });
            }
        }
    }

    // Connection is gone: fail every outstanding recv rather than leaving
    // callers waiting forever.
    for entry in inner.pending_recv.iter() {
        let _ = entry.value().send(Err(ConnectionError::StreamClosed));
    }
    inner.pending_recv.clear();
}

fn clone_payload(payload: &Payload) -> Payload {
    match payload {
        Payload::Bytes(b) => Payload::Bytes(b.clone()),
        Payload::Document(v) => Payload::Document(v.clone()),
        Payload::Files(_) => Payload::Bytes(Vec::new()),
    }
}

impl CatsClient {
    fn next_message_id(&self) -> u16 {
        loop {
            let candidate =
                rand::thread_rng().gen_range(*CLIENT_MESSAGE_ID_RANGE.start()..=*CLIENT_MESSAGE_ID_RANGE.end());
            if !self.0.reserved.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Send a Request and await its response.
    pub async fn send(
        &self,
        handler_id: u16,
        input: EncodeInput,
        headers: Headers,
        timeout: Option<Duration>,
    ) -> Result<(Headers, Payload), ConnectionError> {
        let message_id = self.next_message_id();
        if self.0.reserved.insert(message_id, ()).is_some() {
            return Err(ConnectionError::protocol("message id collision"));
        }
        let (tx, rx) = oneshot::channel();
        self.0.pending_recv.insert(message_id, tx);

        let result = self.write_request(handler_id, message_id, &input, headers).await;
        if let Err(e) = result {
            self.0.pending_recv.remove(&message_id);
            self.0.reserved.remove(&message_id);
            return Err(e);
        }

        let reply = match timeout {
            Some(d) => match tokio::time::timeout(d, rx).await {
                Ok(r) => r.map_err(|_| ConnectionError::protocol("recv future dropped")),
                Err(_) => {
                    self.0.pending_recv.remove(&message_id);
                    Ok(Err(ConnectionError::Timeout))
                }
            },
            None => rx.await.map_err(|_| ConnectionError::protocol("recv future dropped")),
        };
        self.0.reserved.remove(&message_id);
        reply?
    }

    async fn write_request(
        &self,
        handler_id: u16,
        message_id: u16,
        input: &EncodeInput,
        headers: Headers,
    ) -> Result<(), ConnectionError> {
        let mut write = self.0.write.lock().await;
        let mut delay = self.0.delay.lock().await;
        action::write_request(
            &mut *write,
            handler_id,
            message_id,
            now_millis(),
            input,
            headers,
            &self.0.codecs,
            &self.0.compressors,
            &self.0.scheme,
            &mut delay,
        )
        .await
    }

    /// Reply to a server `InputAction` previously delivered on the
    /// `IncomingInput` channel.
    pub async fn reply_input(&self, message_id: u16, input: EncodeInput, headers: Headers) -> Result<(), ConnectionError> {
        let mut write = self.0.write.lock().await;
        let mut delay = self.0.delay.lock().await;
        action::write_input_reply(
            &mut *write,
            message_id,
            now_millis(),
            &input,
            headers,
            &self.0.codecs,
            &self.0.compressors,
            &self.0.scheme,
            &mut delay,
        )
        .await
    }

    pub async fn cancel_input(&self, message_id: u16) -> Result<(), ConnectionError> {
        let mut write = self.0.write.lock().await;
        action::write_cancel_input(&mut *write, message_id).await
    }

    pub async fn set_download_speed(&self, speed: u32) -> Result<(), ConnectionError> {
        let mut write = self.0.write.lock().await;
        action::write_download_speed(&mut *write, speed).await
    }

    pub async fn ping(&self) -> Result<(), ConnectionError> {
        let mut write = self.0.write.lock().await;
        action::write_ping(&mut *write).await
    }

    /// Register a callback for broadcasts to `handler_id` (message ids
    /// `>= 0x8000`).
    pub fn subscribe(&self, handler_id: u16, callback: Subscriber) {
        self.0.subscriptions.entry(handler_id).or_default().push(callback);
    }

    /// Spawn a background task pinging the server every `idle_timeout / 2`
    /// until the connection closes.
    pub fn spawn_ping_loop(&self, idle_timeout: Duration) {
        if idle_timeout.is_zero() {
            return;
        }
        let client = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(idle_timeout / 2);
            loop {
                interval.tick().await;
                if client.ping().await.is_err() {
                    return;
                }
            }
        });
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
