//! Action frame reading and writing.
//!
//! One function pair per action variant — read the fixed head with ordinary
//! big-endian tokio primitives (simpler and just as correct as byte-swapping
//! a zerocopy struct read straight off the wire), then apply the codec and
//! compressor registries to turn wire bytes into a decoded [`Payload`] and
//! back.

use cats_codec::codec::{CodecError, CodecRegistry, EncodeInput, Payload};
use cats_codec::compressor::CompressorRegistry;
use cats_core::wire::{
    ActionType, CODEC_FILES, DOWNLOAD_SPEED_RANGE, HEADERS_SEPARATOR,
};
use cats_core::{ConnectionError, Delay, Headers, Scheme};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub enum Action {
    Request(RequestAction),
    Stream(RequestAction),
    Input(InputAction),
    DownloadSpeed(u32),
    CancelInput(u16),
    Ping,
}

pub struct RequestAction {
    pub handler_id: u16,
    pub message_id: u16,
    pub send_time: u64,
    pub data_type: u8,
    pub compressor: u8,
    pub headers: Headers,
    pub payload: Vec<u8>,
}

pub struct InputAction {
    pub message_id: u16,
    pub data_type: u8,
    pub compressor: u8,
    pub headers: Headers,
    pub payload: Vec<u8>,
}

pub struct ReadLimits {
    pub in_memory_cap: usize,
    pub max_plain_payload: usize,
}

/// Read one `type_id` byte and dispatch to the matching head reader. The
/// caller holds the connection's read lock for the full duration of this
/// call, per the per-connection ordering guarantee.
pub async fn read_action<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    scheme: Scheme,
    limits: &ReadLimits,
) -> Result<Action, ConnectionError> {
    let type_byte = reader.read_u8().await?;
    let action_type = ActionType::try_from(type_byte)?;

    match action_type {
        ActionType::Request => Ok(Action::Request(read_request_like(reader, scheme, limits, true).await?)),
        ActionType::Stream => Ok(Action::Stream(read_stream(reader, scheme, limits).await?)),
        ActionType::Input => {
            let inner = read_request_like(reader, scheme, limits, false).await?;
            Ok(Action::Input(InputAction {
                message_id: inner.message_id,
                data_type: inner.data_type,
                compressor: inner.compressor,
                headers: inner.headers,
                payload: inner.payload,
            }))
        }
        ActionType::DownloadSpeed => {
            let value = reader.read_u32().await?;
            if value != 0 && !DOWNLOAD_SPEED_RANGE.contains(&value) {
                return Err(cats_core::wire::WireError::UnsupportedDownloadSpeed(value).into());
            }
            Ok(Action::DownloadSpeed(value))
        }
        ActionType::CancelInput => {
            let message_id = reader.read_u16().await?;
            Ok(Action::CancelInput(message_id))
        }
        ActionType::Ping => Ok(Action::Ping),
        ActionType::StartEncryption | ActionType::StopEncryption => {
            Err(ConnectionError::protocol("encryption control actions are not supported"))
        }
    }
}

/// Shared body for Request (has `handler_id`) and Input (does not).
async fn read_request_like<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    scheme: Scheme,
    limits: &ReadLimits,
    has_handler_id: bool,
) -> Result<RequestAction, ConnectionError> {
    let handler_id = if has_handler_id { reader.read_u16().await? } else { 0 };
    let message_id = reader.read_u16().await?;
    let send_time = reader.read_u64().await?;
    let data_type = reader.read_u8().await?;
    let compressor = reader.read_u8().await?;
    let data_len = reader.read_u32().await? as usize;

    if data_len > limits.in_memory_cap && data_type != CODEC_FILES {
        return Err(ConnectionError::protocol(format!(
            "payload length {data_len} exceeds in-memory cap {}",
            limits.in_memory_cap
        )));
    }

    let mut framed = vec![0u8; data_len];
    reader.read_exact(&mut framed).await?;

    let split = find_headers_terminator(&framed)
        .ok_or_else(|| ConnectionError::protocol("headers terminator not found"))?;
    let headers = Headers::decode(&scheme, &framed[..split]);
    let payload = framed[split + HEADERS_SEPARATOR.len()..].to_vec();

    Ok(RequestAction { handler_id, message_id, send_time, data_type, compressor, headers, payload })
}

async fn read_stream<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    scheme: Scheme,
    limits: &ReadLimits,
) -> Result<RequestAction, ConnectionError> {
    let handler_id = reader.read_u16().await?;
    let message_id = reader.read_u16().await?;
    let send_time = reader.read_u64().await?;
    let data_type = reader.read_u8().await?;
    let compressor = reader.read_u8().await?;

    let headers_len = reader.read_u32().await? as usize;
    let mut headers_buf = vec![0u8; headers_len];
    reader.read_exact(&mut headers_buf).await?;
    let headers = Headers::decode(&scheme, &headers_buf);

    let mut payload = Vec::new();
    loop {
        let chunk_len = reader.read_u32().await? as usize;
        if chunk_len == 0 {
            break;
        }
        let mut chunk = vec![0u8; chunk_len];
        reader.read_exact(&mut chunk).await?;
        payload.extend_from_slice(&chunk);

        if payload.len() > limits.max_plain_payload && data_type != CODEC_FILES {
            return Err(ConnectionError::protocol(format!(
                "aggregated stream payload exceeds {} bytes",
                limits.max_plain_payload
            )));
        }
    }

    Ok(RequestAction { handler_id, message_id, send_time, data_type, compressor, headers, payload })
}

fn find_headers_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADERS_SEPARATOR.len()).position(|w| w == HEADERS_SEPARATOR)
}

/// Decode a request/stream/input's raw payload through the codec and
/// compressor registries.
pub fn decode_payload(
    action: &RequestAction,
    codecs: &CodecRegistry,
    compressors: &CompressorRegistry,
    scheme: Scheme,
) -> Result<Payload, CodecError> {
    let raw = compressors
        .decompress(action.compressor, &action.payload, &action.headers)
        .map_err(|e| CodecError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())))?;
    codecs.decode(action.data_type, &raw, &action.headers, scheme)
}

/// Write a Request/Response or Input action: encode, compress, frame, pace.
#[allow(clippy::too_many_arguments)]
pub async fn write_request_like<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    type_id: ActionType,
    handler_id: u16,
    message_id: u16,
    send_time: u64,
    input: &EncodeInput,
    mut headers: Headers,
    codecs: &CodecRegistry,
    compressors: &CompressorRegistry,
    scheme: &Scheme,
    delay: &mut Delay,
) -> Result<(), ConnectionError> {
    let (data_type, encoded) = codecs
        .encode_any(input, &mut headers, *scheme)
        .map_err(|e| ConnectionError::protocol(e.to_string()))?;
    // The files codec already consumes `Offset`/`Skip` itself (it can only
    // truncate at file boundaries, not at an arbitrary byte within its
    // concatenated output) and clears the header afterward; applying the
    // generic offset slice again here would double-truncate its bytes.
    let offset = if data_type == CODEC_FILES { 0 } else { (headers.offset() as usize).min(encoded.len()) };
    let (compressor, compressed) = compressors
        .compress(&encoded[offset..], &mut headers)
        .map_err(|e| ConnectionError::protocol(e.to_string()))?;

    let headers_bytes = headers.encode(scheme);
    let data_len = headers_bytes.len() + HEADERS_SEPARATOR.len() + compressed.len();

    writer.write_u8(u8::from(type_id)).await?;
    if type_id == ActionType::Request {
        writer.write_u16(handler_id).await?;
    }
    writer.write_u16(message_id).await?;
    writer.write_u64(send_time).await?;
    writer.write_u8(data_type).await?;
    writer.write_u8(compressor).await?;
    writer.write_u32(data_len as u32).await?;
    writer.write_all(&headers_bytes).await?;
    writer.write_all(&HEADERS_SEPARATOR).await?;

    delay.delay(compressed.len() as u64).await;
    writer.write_all(&compressed).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_ping<W: AsyncWriteExt + Unpin>(writer: &mut W) -> Result<(), ConnectionError> {
    writer.write_u8(u8::from(ActionType::Ping)).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_download_speed<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    speed: u32,
) -> Result<(), ConnectionError> {
    writer.write_u8(u8::from(ActionType::DownloadSpeed)).await?;
    writer.write_u32(speed).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_cancel_input<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    message_id: u16,
) -> Result<(), ConnectionError> {
    writer.write_u8(u8::from(ActionType::CancelInput)).await?;
    writer.write_u16(message_id).await?;
    writer.flush().await?;
    Ok(())
}
