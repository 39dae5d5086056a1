//! CATS wire format — on-wire head structs for every action variant.
//!
//! These types ARE the protocol. Every field, every size is part of the
//! wire format described in the protocol documentation; changing anything
//! here is a breaking change.
//!
//! All heads are #[repr(C, packed)] for deterministic layout and use
//! zerocopy derives for safe, allocation-free (de)serialization. There is
//! no unsafe code in this module. Multi-byte fields are big-endian on the
//! wire; zerocopy gives us the in-memory layout, byte order is handled by
//! `to_be`/`from_be` at the read/write boundary in the connection crates.

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// 1-byte action type discriminator, the first byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ActionType {
    Request = 0x00,
    Stream = 0x01,
    Input = 0x02,
    DownloadSpeed = 0x05,
    CancelInput = 0x06,
    StartEncryption = 0xF0,
    StopEncryption = 0xF1,
    Ping = 0xFF,
}

impl TryFrom<u8> for ActionType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(ActionType::Request),
            0x01 => Ok(ActionType::Stream),
            0x02 => Ok(ActionType::Input),
            0x05 => Ok(ActionType::DownloadSpeed),
            0x06 => Ok(ActionType::CancelInput),
            0xF0 => Ok(ActionType::StartEncryption),
            0xF1 => Ok(ActionType::StopEncryption),
            0xFF => Ok(ActionType::Ping),
            other => Err(WireError::UnknownActionType(other)),
        }
    }
}

impl From<ActionType> for u8 {
    fn from(t: ActionType) -> u8 {
        t as u8
    }
}

// ── Request/Response head ────────────────────────────────────────────────

/// Fixed head of a Request/Response action (`type_id = 0x00`).
///
/// Wire size: 18 bytes. Followed by headers terminated by `HEADERS_SEPARATOR`,
/// then `data_len` total bytes (headers included).
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct RequestHead {
    pub handler_id: u16,
    pub message_id: u16,
    pub send_time: u64,
    pub data_type: u8,
    pub compressor: u8,
    pub data_len: u32,
}

assert_eq_size!(RequestHead, [u8; 18]);

// ── Stream head ──────────────────────────────────────────────────────────

/// Fixed head of a Stream action (`type_id = 0x01`).
///
/// Wire size: 14 bytes — same as [`RequestHead`] minus `data_len`, since a
/// stream's length is not known up front. Followed by a 4-byte
/// `headers_len` then that many header bytes (no separator, the length
/// prefix already bounds it), then the chunk loop.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct StreamHead {
    pub handler_id: u16,
    pub message_id: u16,
    pub send_time: u64,
    pub data_type: u8,
    pub compressor: u8,
}

assert_eq_size!(StreamHead, [u8; 14]);

// ── Input head ───────────────────────────────────────────────────────────

/// Fixed head of an InputAction (`type_id = 0x02`).
///
/// Wire size: 8 bytes — same framing as [`RequestHead`] but with no
/// `handler_id`, since an input answer is matched purely by `message_id`.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct InputHead {
    pub message_id: u16,
    pub data_type: u8,
    pub compressor: u8,
    pub data_len: u32,
}

assert_eq_size!(InputHead, [u8; 8]);

// ── Constants ────────────────────────────────────────────────────────────

/// Two-byte sentinel terminating the headers block of Request/Input actions.
pub const HEADERS_SEPARATOR: [u8; 2] = [0x00, 0x00];

/// Four-byte sentinel terminating a stream's chunk loop (a zero-length chunk).
pub const STREAM_TERMINATOR: [u8; 4] = [0x00, 0x00, 0x00, 0x00];

/// Supported protocol version range. Only version 2 is accepted.
pub const PROTOCOL_VERSION: u32 = 2;

/// Default in-memory cap for a single-shot payload. Above this, only the
/// `files` codec may be used; the data is streamed to a temp file instead.
pub const DEFAULT_IN_MEMORY_CAP: usize = 16 * 1024 * 1024;

/// Client-originated message ids are drawn from this half of the id space.
pub const CLIENT_MESSAGE_ID_RANGE: std::ops::RangeInclusive<u16> = 0x0000..=0x7FFF;

/// Server broadcast message ids are drawn from this half of the id space.
pub const BROADCAST_MESSAGE_ID_RANGE: std::ops::RangeInclusive<u16> = 0x8000..=0xFFFF;

/// Codec id: opaque bytes, passed through unchanged.
pub const CODEC_BYTES: u8 = 0x00;
/// Codec id: structured document via the negotiated scheme.
pub const CODEC_SCHEME: u8 = 0x01;
/// Codec id: file bundle.
pub const CODEC_FILES: u8 = 0x02;

/// Compressor id: identity.
pub const COMPRESSOR_DUMMY: u8 = 0x00;
/// Compressor id: gzip level 6.
pub const COMPRESSOR_GZIP: u8 = 0x01;
/// Compressor id: zlib level 6 with length prefix + Adler32 header.
pub const COMPRESSOR_ZLIB: u8 = 0x02;

/// `propose_compressor` picks the dummy compressor below this payload size.
pub const COMPRESSION_THRESHOLD: usize = 4096;

/// Acceptable range for an explicit `DownloadSpeed` action, in bytes/sec.
/// A value of zero disables pacing entirely and is also accepted.
pub const DOWNLOAD_SPEED_RANGE: std::ops::RangeInclusive<u32> = 1024..=33_554_432;

// ── Errors ───────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format bytes.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("unknown action type byte: 0x{0:02x}")]
    UnknownActionType(u8),

    #[error("payload length {0} exceeds in-memory cap {1} for non-file codec")]
    PayloadTooLarge(usize, usize),

    #[error("stream chunk length {0} exceeds u32 range")]
    ChunkTooLarge(u64),

    #[error("unsupported download speed: {0}")]
    UnsupportedDownloadSpeed(u32),

    #[error("protocol version mismatch: proposed {proposed}, peer supports up to {peer_max}")]
    VersionMismatch { proposed: u32, peer_max: u32 },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::{AsBytes, FromBytes};

    #[test]
    fn request_head_round_trips() {
        let head = RequestHead {
            handler_id: 0x0001,
            message_id: 0x1234,
            send_time: 1_700_000_000_000,
            data_type: CODEC_BYTES,
            compressor: COMPRESSOR_DUMMY,
            data_len: 3,
        };
        let bytes = head.as_bytes();
        assert_eq!(bytes.len(), 18);
        let decoded = RequestHead::read_from(bytes).unwrap();
        assert_eq!({ decoded.handler_id }, 0x0001);
        assert_eq!({ decoded.message_id }, 0x1234);
        assert_eq!({ decoded.data_len }, 3);
    }

    #[test]
    fn stream_head_is_fourteen_bytes() {
        let head = StreamHead {
            handler_id: 7,
            message_id: 9,
            send_time: 0,
            data_type: CODEC_SCHEME,
            compressor: COMPRESSOR_ZLIB,
        };
        assert_eq!(head.as_bytes().len(), 14);
    }

    #[test]
    fn input_head_is_eight_bytes() {
        let head = InputHead {
            message_id: 0xBEEF,
            data_type: CODEC_SCHEME,
            compressor: COMPRESSOR_DUMMY,
            data_len: 0,
        };
        assert_eq!(head.as_bytes().len(), 8);
    }

    #[test]
    fn action_type_round_trips_known_values() {
        for &(byte, variant) in &[
            (0x00u8, ActionType::Request),
            (0x01, ActionType::Stream),
            (0x02, ActionType::Input),
            (0x05, ActionType::DownloadSpeed),
            (0x06, ActionType::CancelInput),
            (0xFF, ActionType::Ping),
        ] {
            assert_eq!(ActionType::try_from(byte).unwrap(), variant);
            assert_eq!(u8::from(variant), byte);
        }
        assert!(ActionType::try_from(0x42).is_err());
    }

    #[test]
    fn download_speed_range_matches_spec_bounds() {
        assert!(!DOWNLOAD_SPEED_RANGE.contains(&0));
        assert!(DOWNLOAD_SPEED_RANGE.contains(&1024));
        assert!(DOWNLOAD_SPEED_RANGE.contains(&33_554_432));
        assert!(!DOWNLOAD_SPEED_RANGE.contains(&33_554_433));
    }
}
