//! Connection bootstrap: protocol-version exchange, statement exchange, and
//! the optional handshake. Runs once per accepted socket before the steady
//! state read/dispatch loop begins.

use cats_core::handshake::Sha256TimeHandshake;
use cats_core::wire::PROTOCOL_VERSION;
use cats_core::{ClientStatement, ConnectionError, ServerStatement};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub struct Negotiated {
    pub api_version: u32,
    pub scheme: cats_core::Scheme,
}

/// Server side of the bootstrap sequence: read the client's proposed
/// version, the statement, optionally validate a handshake, and write back
/// the server's statement.
pub async fn server_bootstrap<S>(
    stream: &mut S,
    handshake: Option<&Sha256TimeHandshake>,
) -> Result<Negotiated, ConnectionError>
where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
{
    let proposed = stream.read_u32().await?;
    if proposed != PROTOCOL_VERSION {
        stream.write_u32(PROTOCOL_VERSION).await?;
        stream.flush().await?;
        return Err(ConnectionError::Wire(cats_core::wire::WireError::VersionMismatch {
            proposed,
            peer_max: PROTOCOL_VERSION,
        }));
    }
    stream.write_u32(0).await?;
    stream.flush().await?;

    let stmt_len = stream.read_u32().await? as usize;
    let mut stmt_buf = vec![0u8; stmt_len];
    stream.read_exact(&mut stmt_buf).await?;
    let client_statement = ClientStatement::unpack(&stmt_buf).map_err(ConnectionError::Scheme)?;

    let scheme = client_statement.scheme().map_err(ConnectionError::Scheme)?;

    let server_statement = ServerStatement::new(current_unix_time_millis());
    let packed = server_statement.pack().map_err(ConnectionError::Scheme)?;
    stream.write_all(&packed).await?;
    stream.flush().await?;

    // The handshake runs only after both statements are fully exchanged,
    // not interleaved with them — the wire carries the full statement
    // round-trip before anything handshake-related.
    if let Some(handshake) = handshake {
        let mut digest = [0u8; 32];
        let read = tokio::time::timeout(
            std::time::Duration::from_secs_f64(handshake.timeout_secs),
            stream.read_exact(&mut digest),
        )
        .await
        .map_err(|_| ConnectionError::HandshakeFailed(cats_core::handshake::HandshakeError::Timeout))?;
        read?;
        let now = current_unix_time();
        if handshake.validate_digest(now, &digest) {
            stream.write_u8(0x01).await?;
        } else {
            stream.write_u8(0x00).await?;
            stream.flush().await?;
            return Err(ConnectionError::HandshakeFailed(cats_core::handshake::HandshakeError::Mismatch));
        }
        stream.flush().await?;
    }

    Ok(Negotiated { api_version: client_statement.api, scheme })
}

fn current_unix_time() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn current_unix_time_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
