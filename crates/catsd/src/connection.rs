//! Per-connection state: the write lock, rate limiter, pending-input table,
//! message id reservations, and signed-in identity.
//!
//! `ConnectionHandle` is the cheap-to-clone handle middleware, handlers, and
//! the channel table pass around; the actual socket half and mutable state
//! live behind an `Arc` so every clone observes the same connection.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cats_codec::codec::{CodecRegistry, EncodeInput};
use cats_codec::compressor::CompressorRegistry;
use cats_core::wire::{ActionType, BROADCAST_MESSAGE_ID_RANGE, CLIENT_MESSAGE_ID_RANGE};
use cats_core::{ConnectionError, Delay, Headers, Scheme};
use dashmap::DashMap;
use rand::Rng;
use tokio::io::AsyncWrite;
use tokio::sync::{oneshot, Mutex};

use crate::action;
use crate::channel::ChannelTable;
use crate::identity::Identity;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub struct PendingInput {
    reply: oneshot::Sender<Result<(Headers, Vec<u8>), ConnectionError>>,
    bypass_count: bool,
}

pub struct ConnectionState {
    pub api_version: u32,
    pub scheme: Scheme,
    pub identity: Option<Identity>,
    pub debug: bool,
}

pub struct ConnectionInner {
    id: u64,
    pub peer_addr: SocketAddr,
    write: Mutex<Box<dyn AsyncWrite + Unpin + Send>>,
    delay: Mutex<Delay>,
    pub codecs: Arc<CodecRegistry>,
    pub compressors: Arc<CompressorRegistry>,
    channels: Arc<ChannelTable>,
    state: std::sync::Mutex<ConnectionState>,
    input_limit: usize,
    pending_inputs: DashMap<u16, PendingInput>,
    reserved_message_ids: DashMap<u16, ()>,
    last_activity_millis: AtomicU64,
    next_broadcast_id: AtomicU16,
}

#[derive(Clone)]
pub struct ConnectionHandle(Arc<ConnectionInner>);

impl ConnectionHandle {
    pub fn new(
        peer_addr: SocketAddr,
        write: Box<dyn AsyncWrite + Unpin + Send>,
        codecs: Arc<CodecRegistry>,
        compressors: Arc<CompressorRegistry>,
        channels: Arc<ChannelTable>,
        scheme: Scheme,
        input_limit: usize,
    ) -> Self {
        Self(Arc::new(ConnectionInner {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            peer_addr,
            write: Mutex::new(write),
            delay: Mutex::new(Delay::new(0)),
            codecs,
            compressors,
            channels,
            state: std::sync::Mutex::new(ConnectionState { api_version: 0, scheme, identity: None, debug: false }),
            input_limit,
            pending_inputs: DashMap::new(),
            reserved_message_ids: DashMap::new(),
            last_activity_millis: AtomicU64::new(0),
            next_broadcast_id: AtomicU16::new(*BROADCAST_MESSAGE_ID_RANGE.start()),
        }))
    }

    #[cfg(test)]
    pub fn for_test() -> Self {
        Self::for_test_with_input_limit(10)
    }

    #[cfg(test)]
    pub fn for_test_with_input_limit(input_limit: usize) -> Self {
        Self::new(
            "127.0.0.1:0".parse().unwrap(),
            Box::new(tokio::io::sink()),
            Arc::new(CodecRegistry::default()),
            Arc::new(CompressorRegistry::default()),
            Arc::new(ChannelTable::new()),
            Scheme::Json,
            input_limit,
        )
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn api_version(&self) -> u32 {
        self.0.state.lock().unwrap().api_version
    }

    pub fn set_api_version(&self, version: u32) {
        self.0.state.lock().unwrap().api_version = version;
    }

    pub fn scheme(&self) -> Scheme {
        self.0.state.lock().unwrap().scheme
    }

    pub fn identity(&self) -> Option<Identity> {
        self.0.state.lock().unwrap().identity.clone()
    }

    /// Sign in and auto-attach to `model_{model_name}` and
    /// `model_{model_name}:{id}`, per `Application`'s channel bookkeeping on
    /// sign-in.
    pub fn sign_in(&self, identity: Identity) {
        let channels = ChannelTable::model_channels(&identity.model_name, identity.id.as_str());
        self.0.state.lock().unwrap().identity = Some(identity);
        for channel in channels {
            self.0.channels.attach(&channel, self.clone());
        }
    }

    /// Sign out and detach from the channels `sign_in` attached to.
    pub fn sign_out(&self) -> Option<Identity> {
        let identity = self.0.state.lock().unwrap().identity.take();
        if let Some(identity) = &identity {
            for channel in ChannelTable::model_channels(&identity.model_name, identity.id.as_str()) {
                self.0.channels.detach(&channel, self.id());
            }
        }
        identity
    }

    pub fn touch(&self, now_millis: u64) {
        self.0.last_activity_millis.store(now_millis, Ordering::Relaxed);
    }

    pub fn idle_for(&self, now_millis: u64) -> Duration {
        let last = self.0.last_activity_millis.load(Ordering::Relaxed);
        Duration::from_millis(now_millis.saturating_sub(last))
    }

    pub fn set_download_speed(&self, speed: u32) {
        let mut delay = self.0.delay.try_lock().expect("delay lock should never be contended here");
        delay.set_speed(speed as u64);
    }

    /// Reserve a message id for the duration of one interaction. A
    /// duplicate reservation (the peer reusing an id already in flight) is
    /// a protocol error.
    pub fn reserve_message_id(&self, id: u16) -> Result<(), ConnectionError> {
        if self.0.reserved_message_ids.insert(id, ()).is_some() {
            return Err(ConnectionError::protocol(format!("message id {id:#06x} already reserved")));
        }
        Ok(())
    }

    pub fn release_message_id(&self, id: u16) {
        self.0.reserved_message_ids.remove(&id);
    }

    /// Draw a random, currently-unreserved broadcast message id.
    pub fn next_broadcast_message_id(&self) -> u16 {
        loop {
            let candidate =
                rand::thread_rng().gen_range(*BROADCAST_MESSAGE_ID_RANGE.start()..=*BROADCAST_MESSAGE_ID_RANGE.end());
            if !self.0.reserved_message_ids.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    pub fn next_client_message_id(&self) -> u16 {
        loop {
            let candidate =
                rand::thread_rng().gen_range(*CLIENT_MESSAGE_ID_RANGE.start()..=*CLIENT_MESSAGE_ID_RANGE.end());
            if !self.0.reserved_message_ids.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Send a Request/Response action to the peer, under the write lock and
    /// paced by this connection's rate limiter.
    pub async fn send_action(
        &self,
        action_type: ActionType,
        handler_id: u16,
        message_id: u16,
        send_time: u64,
        input: &EncodeInput,
        headers: Headers,
    ) -> Result<(), ConnectionError> {
        let scheme = self.scheme();
        let mut write = self.0.write.lock().await;
        let mut delay = self.0.delay.lock().await;
        action::write_request_like(
            &mut *write,
            action_type,
            handler_id,
            message_id,
            send_time,
            input,
            headers,
            &self.0.codecs,
            &self.0.compressors,
            &scheme,
            &mut delay,
        )
        .await
    }

    pub async fn send_ping(&self) -> Result<(), ConnectionError> {
        let mut write = self.0.write.lock().await;
        action::write_ping(&mut *write).await
    }

    /// Ask the peer to re-pace its own outbound stream to `speed` bytes/sec
    /// (0 means unthrottled). Symmetric with `set_download_speed`, which
    /// re-paces this connection's outbound stream when the peer asks.
    pub async fn send_download_speed(&self, speed: u32) -> Result<(), ConnectionError> {
        let mut write = self.0.write.lock().await;
        action::write_download_speed(&mut *write, speed).await
    }

    /// Register a pending input keyed by `message_id`, send the Input
    /// action, then await the peer's reply (or cancellation/timeout).
    ///
    /// Unless `bypass_limit`, evicts the oldest pending input (by message
    /// id) once the non-bypass-count pending count exceeds `input_limit`,
    /// failing the evicted caller with `InputCancelled`. `bypass_count`
    /// controls whether this new input itself counts toward that tally for
    /// future calls.
    pub async fn ask(
        &self,
        message_id: u16,
        input: &EncodeInput,
        headers: Headers,
        timeout: Option<Duration>,
        bypass_limit: bool,
        bypass_count: bool,
    ) -> Result<(Headers, Vec<u8>), ConnectionError> {
        self.reserve_message_id(message_id)?;

        if !bypass_limit {
            let counted = self.0.pending_inputs.iter().filter(|e| !e.value().bypass_count).count();
            if counted > self.0.input_limit {
                if let Some(oldest) = self.0.pending_inputs.iter().map(|e| *e.key()).min() {
                    self.cancel_input(oldest);
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.0.pending_inputs.insert(message_id, PendingInput { reply: tx, bypass_count });

        if let Err(e) = self.send_action(ActionType::Input, 0, message_id, 0, input, headers).await {
            self.0.pending_inputs.remove(&message_id);
            self.release_message_id(message_id);
            return Err(e);
        }

        let result = match timeout {
            Some(d) => match tokio::time::timeout(d, rx).await {
                Ok(r) => r.map_err(|_| ConnectionError::protocol("pending input dropped")),
                Err(_) => {
                    self.0.pending_inputs.remove(&message_id);
                    Ok(Err(ConnectionError::Timeout))
                }
            },
            None => rx.await.map_err(|_| ConnectionError::protocol("pending input dropped")),
        };
        self.release_message_id(message_id);
        result?
    }

    /// Deliver an Input reply arriving on the read loop to its matching
    /// pending `ask`, if any.
    pub fn fulfil_input(&self, message_id: u16, headers: Headers, payload: Vec<u8>) -> bool {
        if let Some((_, pending)) = self.0.pending_inputs.remove(&message_id) {
            let _ = pending.reply.send(Ok((headers, payload)));
            true
        } else {
            false
        }
    }

    /// Deliver a `CancelInput` (or an `input_limit` eviction) to its
    /// matching pending `ask`.
    pub fn cancel_input(&self, message_id: u16) -> bool {
        if let Some((_, pending)) = self.0.pending_inputs.remove(&message_id) {
            let _ = pending.reply.send(Err(cats_core::error::InputCancelled.into()));
            true
        } else {
            false
        }
    }

    pub fn outstanding_input_ids(&self) -> HashSet<u16> {
        self.0.pending_inputs.iter().map(|e| *e.key()).collect()
    }
}
