//! Configuration for CATS endpoints.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CATS_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/cats/config.toml
//!   3. ~/.config/cats/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatsConfig {
    pub network: NetworkConfig,
    pub handshake: HandshakeConfig,
    pub limits: LimitsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind (server) or connect to (client).
    pub host: String,
    pub port: u16,
    /// Idle timeout in seconds. 0 disables the idle timer.
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Enable the SHA-256 time handshake.
    pub enabled: bool,
    /// Shared secret. Read from $CATS_HANDSHAKE_SECRET if empty.
    pub secret: String,
    pub valid_window: i64,
    pub timeout_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// In-memory cap for a single-shot payload, bytes.
    pub in_memory_cap: usize,
    /// Cap on aggregated stream payload size, bytes.
    pub max_plain_payload: usize,
    /// Max concurrently pending (non-bypass) inputs per connection.
    pub input_limit: usize,
    /// Default per-input timeout, seconds. 0 = no timeout.
    pub input_timeout_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, overridden by $RUST_LOG.
    pub filter: String,
}

// ── Defaults ─────────────────────────────────────────────────────────────

impl Default for CatsConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            handshake: HandshakeConfig::default(),
            limits: LimitsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9020,
            idle_timeout_secs: 120,
        }
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            secret: String::new(),
            valid_window: 1,
            timeout_secs: 5.0,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            in_memory_cap: crate::wire::DEFAULT_IN_MEMORY_CAP,
            max_plain_payload: crate::wire::DEFAULT_IN_MEMORY_CAP,
            input_limit: 10,
            input_timeout_secs: 0.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

// ── Path helpers ─────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("cats")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ──────────────────────────────────────────────────────────────

impl CatsConfig {
    /// Load config: file → env var overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            CatsConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn file_path() -> PathBuf {
        std::env::var("CATS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&CatsConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply CATS_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CATS_NETWORK__HOST") {
            self.network.host = v;
        }
        if let Ok(v) = std::env::var("CATS_NETWORK__PORT") {
            if let Ok(p) = v.parse() {
                self.network.port = p;
            }
        }
        if let Ok(v) = std::env::var("CATS_NETWORK__IDLE_TIMEOUT_SECS") {
            if let Ok(p) = v.parse() {
                self.network.idle_timeout_secs = p;
            }
        }
        if let Ok(v) = std::env::var("CATS_HANDSHAKE_SECRET") {
            self.handshake.secret = v;
            self.handshake.enabled = true;
        }
        if let Ok(v) = std::env::var("CATS_LOGGING__FILTER") {
            self.logging.filter = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_network() {
        let config = CatsConfig::default();
        assert_eq!(config.network.port, 9020);
        assert!(!config.handshake.enabled);
    }

    #[test]
    fn limits_default_to_wire_in_memory_cap() {
        let config = CatsConfig::default();
        assert_eq!(config.limits.in_memory_cap, crate::wire::DEFAULT_IN_MEMORY_CAP);
    }

    #[test]
    fn write_default_if_missing_creates_file() {
        let tmp =
            std::env::temp_dir().join(format!("cats-config-test-{}", std::process::id()));
        let config_path = tmp.join("config.toml");
        std::fs::create_dir_all(&tmp).unwrap();

        unsafe {
            std::env::set_var("CATS_CONFIG", config_path.to_str().unwrap());
        }

        let path = CatsConfig::write_default_if_missing().expect("write_default_if_missing failed");
        assert!(path.exists());

        let config = CatsConfig::load().expect("load should succeed");
        assert_eq!(config.network.port, 9020);

        unsafe {
            std::env::remove_var("CATS_CONFIG");
        }
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
