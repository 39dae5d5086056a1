//! SHA-256 time handshake — the canonical v2 handshake. Optional: a
//! connection with no handshake configured skips straight to steady state
//! after the statement exchange.
//!
//! Ported directly off `cats.v2.handshake.SHA256TimeHandshake`: candidates
//! are computed over a window of 10-second buckets centered on "now", the
//! sender always writes the centered (zero-offset) candidate, and the
//! receiver accepts any candidate in the window.

use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("handshake digest did not match any candidate")]
    Mismatch,
    #[error("handshake timed out")]
    Timeout,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// `SHA256(secret_key || ascii(ts))` for `ts` rounded to the nearest 10
/// seconds, expanded across `[-valid_window, +valid_window]` buckets.
pub struct Sha256TimeHandshake {
    secret_key: Vec<u8>,
    valid_window: i64,
    pub timeout_secs: f64,
}

impl Sha256TimeHandshake {
    pub fn new(secret_key: impl Into<Vec<u8>>) -> Self {
        Self {
            secret_key: secret_key.into(),
            valid_window: 1,
            timeout_secs: 5.0,
        }
    }

    pub fn with_valid_window(mut self, valid_window: i64) -> Self {
        self.valid_window = valid_window;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: f64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// All acceptable digests for the given unix timestamp (seconds,
    /// fractional allowed). Index `valid_window` (the middle element) is
    /// the one a sender should transmit.
    pub fn candidates(&self, unix_time: f64) -> Vec<[u8; 32]> {
        let ts = (unix_time / 10.0).round() as i64 * 10;
        (-self.valid_window..=self.valid_window)
            .map(|i| self.digest_for(ts + i * 10))
            .collect()
    }

    fn digest_for(&self, ts: i64) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(&self.secret_key);
        hasher.update(ts.to_string().as_bytes());
        hasher.finalize().into()
    }

    /// The digest a connecting side should write: the candidate centered on
    /// `unix_time` with no offset applied.
    pub fn centered_digest(&self, unix_time: f64) -> [u8; 32] {
        self.candidates(unix_time)[self.valid_window as usize]
    }

    /// Accept the digest if it matches any candidate around `unix_time`.
    pub fn validate_digest(&self, unix_time: f64, digest: &[u8; 32]) -> bool {
        self.candidates(unix_time).iter().any(|c| c == digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centered_digest_validates_against_itself() {
        let hs = Sha256TimeHandshake::new(b"secret".to_vec());
        let now = 1_700_000_000.0;
        let digest = hs.centered_digest(now);
        assert!(hs.validate_digest(now, &digest));
    }

    #[test]
    fn nearby_timestamps_within_window_still_validate() {
        let hs = Sha256TimeHandshake::new(b"secret".to_vec());
        let now = 1_700_000_000.0;
        let digest = hs.centered_digest(now);
        assert!(hs.validate_digest(now + 9.0, &digest));
        assert!(hs.validate_digest(now - 9.0, &digest));
    }

    #[test]
    fn far_timestamps_outside_window_do_not_validate() {
        let hs = Sha256TimeHandshake::new(b"secret".to_vec());
        let now = 1_700_000_000.0;
        let digest = hs.centered_digest(now);
        assert!(!hs.validate_digest(now + 100.0, &digest));
    }

    #[test]
    fn different_secrets_produce_different_digests() {
        let a = Sha256TimeHandshake::new(b"secret-a".to_vec());
        let b = Sha256TimeHandshake::new(b"secret-b".to_vec());
        let now = 1_700_000_000.0;
        assert_ne!(a.centered_digest(now), b.centered_digest(now));
    }
}
