//! Signed-in identity and its TTL.
//!
//! A connection may sign in as a named model instance (`model_name`, `id`);
//! doing so auto-attaches it to `model_{model_name}` and
//! `model_{model_name}:{id}` channels (see [`crate::channel::ChannelTable`]),
//! and starts a TTL timer that auto-signs-out the connection if it is not
//! refreshed.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Identity {
    pub model_name: String,
    pub id: String,
    signed_in_at: Instant,
    ttl: Option<Duration>,
}

impl Identity {
    pub fn new(model_name: impl Into<String>, id: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self { model_name: model_name.into(), id: id.into(), signed_in_at: Instant::now(), ttl }
    }

    pub fn is_expired(&self) -> bool {
        match self.ttl {
            Some(ttl) => self.signed_in_at.elapsed() >= ttl,
            None => false,
        }
    }

    pub fn refresh(&mut self) {
        self.signed_in_at = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_ttl_never_expires() {
        let identity = Identity::new("cat", "1", None);
        assert!(!identity.is_expired());
    }

    #[test]
    fn zero_ttl_is_immediately_expired() {
        let identity = Identity::new("cat", "1", Some(Duration::from_secs(0)));
        std::thread::sleep(Duration::from_millis(1));
        assert!(identity.is_expired());
    }
}
