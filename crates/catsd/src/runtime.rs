//! Shared state across every listener a process runs.
//!
//! The reference implementation keeps a process-global list of running
//! `Application` instances so a handler on any one of them can broadcast to
//! a channel regardless of which socket accepted the recipient. A
//! process-global singleton doesn't fit an owned, testable Rust server: this
//! does the same job as an explicit handle threaded into every `Server` that
//! wants to share channel membership, with no global state at all.

use std::sync::Arc;

use cats_core::config::CatsConfig;

use crate::channel::ChannelTable;
use crate::dispatch::Api;
use crate::server::Server;

/// Owns the `ChannelTable` shared by every `Server` it creates. Two servers
/// built from the same `Runtime` (e.g. one bound to a plaintext port and one
/// to a TLS-terminating proxy's loopback port) see each other's channel
/// members, so a `broadcast` from either reaches connections on both.
#[derive(Clone, Default)]
pub struct Runtime {
    channels: Arc<ChannelTable>,
}

impl Runtime {
    pub fn new() -> Self {
        Self { channels: Arc::new(ChannelTable::new()) }
    }

    /// Build a server that shares this runtime's channel table.
    pub fn server(&self, config: CatsConfig, api: Api) -> Arc<Server> {
        Arc::new(Server::with_channels(config, api, self.channels.clone()))
    }

    pub fn channels(&self) -> &Arc<ChannelTable> {
        &self.channels
    }
}
