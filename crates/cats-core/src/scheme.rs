//! Document serializer negotiated at connection setup and used both for the
//! headers envelope and for the `scheme` codec's payloads.

use serde::{de::DeserializeOwned, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SchemeError {
    #[error("unknown scheme format: {0}")]
    Unknown(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("msgpack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),
    #[error("msgpack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
}

/// The three document formats a `ClientStatement` may negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Json,
    Yaml,
    MsgPack,
}

impl Scheme {
    pub fn name(self) -> &'static str {
        match self {
            Scheme::Json => "json",
            Scheme::Yaml => "yaml",
            Scheme::MsgPack => "msgpack",
        }
    }

    pub fn parse(name: &str) -> Result<Self, SchemeError> {
        match name {
            "json" => Ok(Scheme::Json),
            "yaml" => Ok(Scheme::Yaml),
            "msgpack" => Ok(Scheme::MsgPack),
            other => Err(SchemeError::Unknown(other.to_string())),
        }
    }

    pub fn dumps<T: Serialize>(self, value: &T) -> Result<Vec<u8>, SchemeError> {
        match self {
            Scheme::Json => Ok(serde_json::to_vec(value)?),
            Scheme::Yaml => Ok(serde_yaml::to_string(value)?.into_bytes()),
            Scheme::MsgPack => Ok(rmp_serde::to_vec(value)?),
        }
    }

    pub fn loads<T: DeserializeOwned>(self, buf: &[u8]) -> Result<T, SchemeError> {
        match self {
            Scheme::Json => Ok(serde_json::from_slice(buf)?),
            Scheme::Yaml => Ok(serde_yaml::from_slice(buf)?),
            Scheme::MsgPack => Ok(rmp_serde::from_slice(buf)?),
        }
    }
}

impl Default for Scheme {
    fn default() -> Self {
        Scheme::Json
    }
}
