//! Client side of the connection bootstrap: protocol-version exchange,
//! statement exchange, and the optional handshake. Mirrors catsd's
//! `init::server_bootstrap`, but drives the same sequence from the other
//! end of the socket.

use cats_core::handshake::Sha256TimeHandshake;
use cats_core::wire::PROTOCOL_VERSION;
use cats_core::{ClientStatement, ConnectionError, Scheme, ServerStatement};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub struct Negotiated {
    pub scheme: cats_core::Scheme,
    pub server_time: i64,
}

pub async fn client_bootstrap<S>(
    stream: &mut S,
    api_version: u32,
    scheme_format: Scheme,
    handshake: Option<&Sha256TimeHandshake>,
) -> Result<Negotiated, ConnectionError>
where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
{
    stream.write_u32(PROTOCOL_VERSION).await?;
    stream.flush().await?;

    let ack = stream.read_u32().await?;
    if ack != 0 {
        return Err(ConnectionError::Wire(cats_core::wire::WireError::VersionMismatch {
            proposed: PROTOCOL_VERSION,
            peer_max: ack,
        }));
    }

    let client_statement = ClientStatement::new(api_version, current_unix_time_millis()).with_scheme(scheme_format);
    let scheme = client_statement.scheme().map_err(ConnectionError::Scheme)?;
    let packed = client_statement.pack().map_err(ConnectionError::Scheme)?;
    stream.write_all(&packed).await?;
    stream.flush().await?;

    let stmt_len = stream.read_u32().await? as usize;
    let mut stmt_buf = vec![0u8; stmt_len];
    stream.read_exact(&mut stmt_buf).await?;
    let server_statement = ServerStatement::unpack(&stmt_buf).map_err(ConnectionError::Scheme)?;

    // Handshake runs only after both statements are fully exchanged,
    // matching `init::server_bootstrap`'s order on the other end.
    if let Some(handshake) = handshake {
        let digest = handshake.centered_digest(current_unix_time());
        stream.write_all(&digest).await?;
        stream.flush().await?;
        let ack = stream.read_u8().await?;
        if ack != 0x01 {
            return Err(ConnectionError::HandshakeFailed(cats_core::handshake::HandshakeError::Mismatch));
        }
    }

    Ok(Negotiated { scheme, server_time: server_statement.server_time })
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
