//! Server-wide channel table: broadcast groups keyed by name.
//!
//! A connection signing in is auto-attached to `model_{model_name}` and
//! `model_{model_name}:{id}`; signing out reverses this. Membership is
//! idempotent and preserves insertion order, mirroring
//! `cats.v2.server.application.Application`'s channel bookkeeping.

use dashmap::DashMap;

use crate::connection::ConnectionHandle;

#[derive(Default)]
pub struct ChannelTable {
    channels: DashMap<String, Vec<ConnectionHandle>>,
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, channel: &str, conn: ConnectionHandle) {
        let mut members = self.channels.entry(channel.to_string()).or_default();
        if !members.iter().any(|c| c.id() == conn.id()) {
            members.push(conn);
        }
    }

    pub fn detach(&self, channel: &str, conn_id: u64) {
        if let Some(mut members) = self.channels.get_mut(channel) {
            members.retain(|c| c.id() != conn_id);
        }
    }

    pub fn clear(&self, channel: &str) {
        self.channels.remove(channel);
    }

    /// Remove a connection from every channel it belongs to (called on
    /// connection close).
    pub fn remove_everywhere(&self, conn_id: u64) {
        for mut entry in self.channels.iter_mut() {
            entry.retain(|c| c.id() != conn_id);
        }
    }

    pub fn members(&self, channel: &str) -> Vec<ConnectionHandle> {
        self.channels.get(channel).map(|m| m.clone()).unwrap_or_default()
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|e| e.key().clone()).collect()
    }

    pub fn model_channels(model_name: &str, identity_id: &str) -> [String; 2] {
        [format!("model_{model_name}"), format!("model_{model_name}:{identity_id}")]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_is_idempotent() {
        let table = ChannelTable::new();
        let conn = ConnectionHandle::for_test();
        table.attach("room", conn.clone());
        table.attach("room", conn.clone());
        assert_eq!(table.members("room").len(), 1);
    }

    #[test]
    fn detach_removes_only_that_connection() {
        let table = ChannelTable::new();
        let a = ConnectionHandle::for_test();
        let b = ConnectionHandle::for_test();
        table.attach("room", a.clone());
        table.attach("room", b.clone());
        table.detach("room", a.id());
        let members = table.members("room");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id(), b.id());
    }

    #[test]
    fn model_channels_follow_naming_convention() {
        let names = ChannelTable::model_channels("cat", "42");
        assert_eq!(names, ["model_cat".to_string(), "model_cat:42".to_string()]);
    }
}
