//! Action frame reading and writing, client side. Head fields are read and
//! written with ordinary big-endian tokio primitives, same approach as the
//! daemon's read loop.

use cats_codec::codec::{CodecError, CodecRegistry, EncodeInput, Payload};
use cats_codec::compressor::CompressorRegistry;
use cats_core::wire::{ActionType, CODEC_FILES, DOWNLOAD_SPEED_RANGE, HEADERS_SEPARATOR};
use cats_core::{ConnectionError, Delay, Headers, Scheme};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub enum Action {
    /// A Request/Response frame — on the client side this is always a
    /// server reply to something this client sent.
    Response(ResponseAction),
    Stream(ResponseAction),
    /// A server-initiated question, awaiting `reply`/`cancel`.
    Input(InputAction),
    /// The server re-pacing this client's own outbound stream. Symmetric
    /// with the server accepting `DownloadSpeed` from the client — either
    /// peer may send it at any time, not only at setup.
    DownloadSpeed(u32),
    Ping,
}

pub struct ResponseAction {
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

pub async fn read_action<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    scheme: Scheme,
    limits: &ReadLimits,
) -> Result<Action, ConnectionError> {
    let type_byte = reader.read_u8().await?;
    let action_type = ActionType::try_from(type_byte)?;

    match action_type {
        ActionType::Request => Ok(Action::Response(read_request_like(reader, scheme, limits, true).await?)),
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
        ActionType::Ping => Ok(Action::Ping),
        ActionType::DownloadSpeed => {
            let value = reader.read_u32().await?;
            if value != 0 && !DOWNLOAD_SPEED_RANGE.contains(&value) {
                return Err(cats_core::wire::WireError::UnsupportedDownloadSpeed(value).into());
            }
            Ok(Action::DownloadSpeed(value))
        }
        ActionType::CancelInput => Err(ConnectionError::protocol("unexpected server-to-client control action")),
        ActionType::StartEncryption | ActionType::StopEncryption => {
            Err(ConnectionError::protocol("encryption control actions are not supported"))
        }
    }
}

async fn read_request_like<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    scheme: Scheme,
    limits: &ReadLimits,
    has_handler_id: bool,
) -> Result<ResponseAction, ConnectionError> {
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

    let split = find_headers_terminator(&framed).ok_or_else(|| ConnectionError::protocol("headers terminator not found"))?;
    let headers = Headers::decode(&scheme, &framed[..split]);
    let payload = framed[split + HEADERS_SEPARATOR.len()..].to_vec();

    Ok(ResponseAction { handler_id, message_id, send_time, data_type, compressor, headers, payload })
}

async fn read_stream<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    scheme: Scheme,
    limits: &ReadLimits,
) -> Result<ResponseAction, ConnectionError> {
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

    Ok(ResponseAction { handler_id, message_id, send_time, data_type, compressor, headers, payload })
}

fn find_headers_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADERS_SEPARATOR.len()).position(|w| w == HEADERS_SEPARATOR)
}

pub fn decode_payload(
    data_type: u8,
    compressor: u8,
    payload: &[u8],
    headers: &Headers,
    codecs: &CodecRegistry,
    compressors: &CompressorRegistry,
    scheme: Scheme,
) -> Result<Payload, CodecError> {
    let raw = compressors
        .decompress(compressor, payload, headers)
        .map_err(|e| CodecError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())))?;
    codecs.decode(data_type, &raw, headers, scheme)
}

/// Write a Request action (client → server).
#[allow(clippy::too_many_arguments)]
pub async fn write_request<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
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
    write_request_like(
        writer, ActionType::Request, handler_id, message_id, send_time, input, &mut headers, codecs, compressors, scheme,
        delay,
    )
    .await
}

/// Write an Input reply (client → server, same type id as the question).
#[allow(clippy::too_many_arguments)]
pub async fn write_input_reply<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    message_id: u16,
    send_time: u64,
    input: &EncodeInput,
    mut headers: Headers,
    codecs: &CodecRegistry,
    compressors: &CompressorRegistry,
    scheme: &Scheme,
    delay: &mut Delay,
) -> Result<(), ConnectionError> {
    write_request_like(
        writer, ActionType::Input, 0, message_id, send_time, input, &mut headers, codecs, compressors, scheme, delay,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn write_request_like<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    type_id: ActionType,
    handler_id: u16,
    message_id: u16,
    send_time: u64,
    input: &EncodeInput,
    headers: &mut Headers,
    codecs: &CodecRegistry,
    compressors: &CompressorRegistry,
    scheme: &Scheme,
    delay: &mut Delay,
) -> Result<(), ConnectionError> {
    let (data_type, encoded) =
        codecs.encode_any(input, headers, *scheme).map_err(|e| ConnectionError::protocol(e.to_string()))?;
    // The files codec already consumes and clears `Offset`/`Skip` itself;
    // re-slicing here would double-truncate its already-truncated bytes.
    let offset = if data_type == CODEC_FILES { 0 } else { (headers.offset() as usize).min(encoded.len()) };
    let (compressor, compressed) =
        compressors.compress(&encoded[offset..], headers).map_err(|e| ConnectionError::protocol(e.to_string()))?;

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

pub async fn write_cancel_input<W: AsyncWriteExt + Unpin>(writer: &mut W, message_id: u16) -> Result<(), ConnectionError> {
    writer.write_u8(u8::from(ActionType::CancelInput)).await?;
    writer.write_u16(message_id).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_download_speed<W: AsyncWriteExt + Unpin>(writer: &mut W, speed: u32) -> Result<(), ConnectionError> {
    writer.write_u8(u8::from(ActionType::DownloadSpeed)).await?;
    writer.write_u32(speed).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_ping<W: AsyncWriteExt + Unpin>(writer: &mut W) -> Result<(), ConnectionError> {
    writer.write_u8(u8::from(ActionType::Ping)).await?;
    writer.flush().await?;
    Ok(())
}
