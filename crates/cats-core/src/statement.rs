//! Statement — the one-shot control documents exchanged right after the
//! protocol-version handshake. Each is framed with its own 4-byte
//! big-endian length prefix and serialized with the scheme named inside
//! the `ClientStatement` itself (so the length prefix must be read before
//! the scheme is known).

use serde::{Deserialize, Serialize};

use crate::scheme::{Scheme, SchemeError};
use crate::utils::{from_uint, to_uint};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientStatement {
    pub api: u32,
    pub client_time: i64,
    pub scheme_format: String,
    pub compressors: Vec<String>,
    pub default_compression: String,
}

impl ClientStatement {
    pub fn new(api: u32, client_time: i64) -> Self {
        Self {
            api,
            client_time,
            scheme_format: "json".to_string(),
            compressors: vec!["dummy".to_string(), "zlib".to_string()],
            default_compression: "zlib".to_string(),
        }
    }

    pub fn scheme(&self) -> Result<Scheme, SchemeError> {
        Scheme::parse(&self.scheme_format)
    }

    /// Negotiate a non-default document format (`yaml`/`msgpack`) instead of
    /// the `json` every new statement starts with.
    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme_format = scheme.name().to_string();
        self
    }

    /// Frame as `len:u32 | json-encoded body`. The statement itself is
    /// always JSON on the wire, since the peer has not yet learned which
    /// scheme to use for anything else.
    pub fn pack(&self) -> Result<Vec<u8>, SchemeError> {
        pack_with(self)
    }

    pub fn unpack(buf: &[u8]) -> Result<Self, SchemeError> {
        Ok(serde_json::from_slice(buf)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatement {
    pub server_time: i64,
}

impl ServerStatement {
    pub fn new(server_time: i64) -> Self {
        Self { server_time }
    }

    pub fn pack(&self) -> Result<Vec<u8>, SchemeError> {
        pack_with(self)
    }

    pub fn unpack(buf: &[u8]) -> Result<Self, SchemeError> {
        Ok(serde_json::from_slice(buf)?)
    }
}

fn pack_with<T: Serialize>(value: &T) -> Result<Vec<u8>, SchemeError> {
    let body = serde_json::to_vec(value)?;
    let mut framed = to_uint(body.len() as u64, 4);
    framed.extend_from_slice(&body);
    Ok(framed)
}

/// Read a `len:u32 | body` frame's length prefix back out of its first 4
/// bytes, for callers reading the length before the body off the wire.
pub fn frame_len(len_prefix: &[u8; 4]) -> u32 {
    from_uint(len_prefix) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_statement_round_trips() {
        let stmt = ClientStatement::new(2, 1_700_000_000_000);
        let framed = stmt.pack().unwrap();
        let len = frame_len(&framed[0..4].try_into().unwrap());
        assert_eq!(len as usize, framed.len() - 4);
        let decoded = ClientStatement::unpack(&framed[4..]).unwrap();
        assert_eq!(decoded.api, 2);
        assert_eq!(decoded.scheme_format, "json");
    }

    #[test]
    fn with_scheme_overrides_the_default_json_format() {
        let stmt = ClientStatement::new(2, 0).with_scheme(Scheme::Yaml);
        assert_eq!(stmt.scheme_format, "yaml");
        assert_eq!(stmt.scheme().unwrap(), Scheme::Yaml);
    }

    #[test]
    fn server_statement_round_trips() {
        let stmt = ServerStatement::new(42);
        let framed = stmt.pack().unwrap();
        let decoded = ServerStatement::unpack(&framed[4..]).unwrap();
        assert_eq!(decoded.server_time, 42);
    }
}
