//! `.cats` local artifact cache: an optional, explicitly-invoked store for a
//! pre-compiled action's bytes, keyed by name. Mirrors the fixed `Meta`
//! header from `cats/v2/actions/base.py`'s unfinished `Action`/`State`
//! redesign — `version`, `created_at`, `expired_at`, `compressor`,
//! `times_used` — followed by the compiled byte sequence.
//!
//! This is a local cache format, not a protocol feature: nothing in the
//! connection's send/recv path touches it. A handler that wants to skip
//! re-encoding an expensive payload reaches for `ActionCache` directly.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const META_VERSION: u32 = 0;
const META_LEN: usize = 4 + 8 + 8 + 1 + 4;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache entry too short: expected at least {META_LEN} bytes, got {0}")]
    Truncated(usize),
}

/// Fixed 25-byte header stored ahead of a cached action's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Meta {
    pub version: u32,
    pub created_at: u64,
    pub expired_at: u64,
    pub compressor: u8,
    pub times_used: u32,
}

impl Meta {
    fn new(compressor: u8, ttl: Duration) -> Self {
        let created_at = now_millis();
        let expired_at = if ttl.is_zero() { 0 } else { created_at + ttl.as_millis() as u64 };
        Self { version: META_VERSION, created_at, expired_at, compressor, times_used: 0 }
    }

    fn is_expired(&self) -> bool {
        self.expired_at != 0 && now_millis() > self.expired_at
    }

    fn to_bytes(self) -> [u8; META_LEN] {
        let mut buf = [0u8; META_LEN];
        buf[0..4].copy_from_slice(&self.version.to_be_bytes());
        buf[4..12].copy_from_slice(&self.created_at.to_be_bytes());
        buf[12..20].copy_from_slice(&self.expired_at.to_be_bytes());
        buf[20] = self.compressor;
        buf[21..25].copy_from_slice(&self.times_used.to_be_bytes());
        buf
    }

    fn from_bytes(buf: &[u8]) -> Result<Self, CacheError> {
        if buf.len() < META_LEN {
            return Err(CacheError::Truncated(buf.len()));
        }
        Ok(Self {
            version: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            created_at: u64::from_be_bytes(buf[4..12].try_into().unwrap()),
            expired_at: u64::from_be_bytes(buf[12..20].try_into().unwrap()),
            compressor: buf[20],
            times_used: u32::from_be_bytes(buf[21..25].try_into().unwrap()),
        })
    }
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Where `ActionCache` persists entries. The filesystem is the only
/// implementation today; the trait seam exists so a handler can swap in an
/// in-memory or remote store under test without touching `ActionCache`
/// itself.
pub trait CacheStore: Send + Sync {
    fn store(&self, name: &str, bytes: &[u8], compressor: u8, ttl: Duration) -> Result<(), CacheError>;
    fn load(&self, name: &str) -> Result<Option<(Meta, Vec<u8>)>, CacheError>;
}

/// On-disk `.cats` artifact cache rooted at a directory. One file per cache
/// name, named `{name}.cats`.
pub struct ActionCache {
    dir: PathBuf,
}

impl ActionCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.cats"))
    }

    fn load_path(&self, path: &Path) -> Result<Option<(Meta, Vec<u8>)>, CacheError> {
        let mut file = match std::fs::OpenOptions::new().read(true).write(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut head = [0u8; META_LEN];
        file.read_exact(&mut head)?;
        let mut meta = Meta::from_bytes(&head)?;

        if meta.is_expired() {
            drop(file);
            std::fs::remove_file(path)?;
            return Ok(None);
        }

        let mut payload = Vec::new();
        file.read_to_end(&mut payload)?;

        meta.times_used += 1;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&meta.to_bytes())?;

        Ok(Some((meta, payload)))
    }
}

impl CacheStore for ActionCache {
    /// Write `bytes` as the named cache entry, creating the cache directory
    /// if needed. `ttl` of zero means the entry never expires.
    fn store(&self, name: &str, bytes: &[u8], compressor: u8, ttl: Duration) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(name);
        let meta = Meta::new(compressor, ttl);
        let mut file = std::fs::File::create(&path)?;
        file.write_all(&meta.to_bytes())?;
        file.write_all(bytes)?;
        Ok(())
    }

    /// Load the named cache entry, incrementing `times_used` in place.
    /// Returns `Ok(None)` if the entry is missing or has expired (an expired
    /// entry is deleted rather than returned).
    fn load(&self, name: &str) -> Result<Option<(Meta, Vec<u8>)>, CacheError> {
        let path = self.path_for(name);
        self.load_path(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_then_load_round_trips_bytes_and_bumps_times_used() {
        let dir = std::env::temp_dir().join(format!("cats-cache-test-{}", std::process::id()));
        let cache = ActionCache::new(&dir);
        cache.store("greeting", b"hello", 0, Duration::ZERO).unwrap();

        let (meta, bytes) = cache.load("greeting").unwrap().unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(meta.times_used, 1);
        assert_eq!(meta.version, META_VERSION);

        let (meta, _) = cache.load("greeting").unwrap().unwrap();
        assert_eq!(meta.times_used, 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_entry_loads_as_none() {
        let dir = std::env::temp_dir().join(format!("cats-cache-test-missing-{}", std::process::id()));
        let cache = ActionCache::new(&dir);
        assert!(cache.load("nope").unwrap().is_none());
    }

    #[test]
    fn expired_entry_is_deleted_and_loads_as_none() {
        let dir = std::env::temp_dir().join(format!("cats-cache-test-ttl-{}", std::process::id()));
        let cache = ActionCache::new(&dir);
        cache.store("stale", b"data", 0, Duration::from_millis(1)).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        assert!(cache.load("stale").unwrap().is_none());
        assert!(!cache.path_for("stale").exists());

        std::fs::remove_dir_all(&dir).ok();
    }
}
