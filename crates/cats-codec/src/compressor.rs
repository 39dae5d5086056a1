//! Compressor registry — payload (de)compression identified by an 8-bit id.
//!
//! Mirrors `cats.v2.compressors.api.CompressorAPI`: `propose_compressor`
//! picks the dummy (no-op) compressor for payloads at or under the
//! compression threshold, falling back to the connection's negotiated
//! default compressor above it.

use cats_core::headers::key;
use cats_core::utils::{from_uint, to_uint};
use cats_core::wire::{COMPRESSION_THRESHOLD, COMPRESSOR_DUMMY, COMPRESSOR_GZIP, COMPRESSOR_ZLIB};
use cats_core::Headers;
use flate2::read::{GzDecoder, GzEncoder, ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use std::io::Read;

#[derive(Debug, thiserror::Error)]
pub enum CompressorError {
    #[error("unknown compressor id: {0}")]
    UnknownCompressor(u8),
    #[error("broken data received: length mismatch")]
    LengthMismatch,
    #[error("broken data received: checksum mismatch")]
    ChecksumMismatch,
    #[error("failed to decompress payload: {0}")]
    Codec(#[source] std::io::Error),
}

pub trait Compressor: Send + Sync {
    fn id(&self) -> u8;
    fn name(&self) -> &'static str;
    fn compress(&self, data: &[u8], headers: &mut Headers) -> Result<Vec<u8>, CompressorError>;
    fn decompress(&self, data: &[u8], headers: &Headers) -> Result<Vec<u8>, CompressorError>;
}

/// No-op compressor, id 0x00. Used for payloads at or under the
/// compression threshold where compressing would not pay for itself.
pub struct DummyCompressor;

impl Compressor for DummyCompressor {
    fn id(&self) -> u8 {
        COMPRESSOR_DUMMY
    }

    fn name(&self) -> &'static str {
        "dummy"
    }

    fn compress(&self, data: &[u8], _headers: &mut Headers) -> Result<Vec<u8>, CompressorError> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8], _headers: &Headers) -> Result<Vec<u8>, CompressorError> {
        Ok(data.to_vec())
    }
}

pub struct GzipCompressor;

impl Compressor for GzipCompressor {
    fn id(&self) -> u8 {
        COMPRESSOR_GZIP
    }

    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress(&self, data: &[u8], _headers: &mut Headers) -> Result<Vec<u8>, CompressorError> {
        let mut out = Vec::new();
        GzEncoder::new(data, Compression::new(6))
            .read_to_end(&mut out)
            .map_err(CompressorError::Codec)?;
        Ok(out)
    }

    fn decompress(&self, data: &[u8], _headers: &Headers) -> Result<Vec<u8>, CompressorError> {
        let mut out = Vec::new();
        GzDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(CompressorError::Codec)?;
        Ok(out)
    }
}

/// Prepends a 4-byte big-endian original length and stamps an `Adler32`
/// header on compress; verifies both on decompress.
pub struct ZlibCompressor;

impl Compressor for ZlibCompressor {
    fn id(&self) -> u8 {
        COMPRESSOR_ZLIB
    }

    fn name(&self) -> &'static str {
        "zlib"
    }

    fn compress(&self, data: &[u8], headers: &mut Headers) -> Result<Vec<u8>, CompressorError> {
        let checksum = adler32(data);
        headers.insert_raw(key::ADLER32, serde_json::Value::from(checksum));

        let mut compressed = Vec::new();
        ZlibEncoder::new(data, Compression::new(6))
            .read_to_end(&mut compressed)
            .map_err(CompressorError::Codec)?;

        let mut out = to_uint(data.len() as u64, 4);
        out.extend_from_slice(&compressed);
        Ok(out)
    }

    fn decompress(&self, data: &[u8], headers: &Headers) -> Result<Vec<u8>, CompressorError> {
        if data.len() < 4 {
            return Err(CompressorError::LengthMismatch);
        }
        let expected_len = from_uint(&data[..4]);
        let mut buf = Vec::new();
        ZlibDecoder::new(&data[4..])
            .read_to_end(&mut buf)
            .map_err(CompressorError::Codec)?;

        if buf.len() as u64 != expected_len {
            return Err(CompressorError::LengthMismatch);
        }
        if let Some(expected_checksum) = headers.get(key::ADLER32).and_then(|v| v.as_u64()) {
            if adler32(&buf) as u64 != expected_checksum {
                return Err(CompressorError::ChecksumMismatch);
            }
        }
        Ok(buf)
    }
}

fn adler32(data: &[u8]) -> u32 {
    const MOD_ADLER: u32 = 65521;
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for &byte in data {
        a = (a + byte as u32) % MOD_ADLER;
        b = (b + a) % MOD_ADLER;
    }
    (b << 16) | a
}

pub struct CompressorRegistry {
    compressors: Vec<Box<dyn Compressor>>,
    pub default_id: u8,
}

impl Default for CompressorRegistry {
    fn default() -> Self {
        Self {
            compressors: vec![Box::new(DummyCompressor), Box::new(GzipCompressor), Box::new(ZlibCompressor)],
            default_id: COMPRESSOR_ZLIB,
        }
    }
}

impl CompressorRegistry {
    pub fn get(&self, id: u8) -> Option<&dyn Compressor> {
        self.compressors.iter().find(|c| c.id() == id).map(|c| c.as_ref())
    }

    /// Dummy for payloads at or under the threshold, the registry's
    /// negotiated default above it.
    pub fn propose(&self, len: usize) -> u8 {
        if len > COMPRESSION_THRESHOLD {
            self.default_id
        } else {
            COMPRESSOR_DUMMY
        }
    }

    pub fn compress(&self, data: &[u8], headers: &mut Headers) -> Result<(u8, Vec<u8>), CompressorError> {
        let id = self.propose(data.len());
        let compressor = self.get(id).ok_or(CompressorError::UnknownCompressor(id))?;
        Ok((id, compressor.compress(data, headers)?))
    }

    pub fn decompress(&self, id: u8, data: &[u8], headers: &Headers) -> Result<Vec<u8>, CompressorError> {
        if id == COMPRESSOR_DUMMY {
            return Ok(data.to_vec());
        }
        self.get(id).ok_or(CompressorError::UnknownCompressor(id))?.decompress(data, headers)
    }
}
