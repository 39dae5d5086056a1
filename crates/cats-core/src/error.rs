//! Connection-level error taxonomy. Kinds, not class names, per the error
//! handling design: the engine distinguishes fatal-to-the-connection
//! conditions from ones a handler or middleware can recover from.

use crate::handshake::HandshakeError;
use crate::scheme::SchemeError;
use crate::wire::WireError;

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(#[from] HandshakeError),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("scheme error: {0}")]
    Scheme(#[from] SchemeError),

    #[error("stream closed")]
    StreamClosed,

    #[error("idle timeout")]
    Timeout,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    InputCancelled(#[from] InputCancelled),
}

impl ConnectionError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Whether this error must terminate the connection (as opposed to
    /// being reported to middleware and the connection staying open).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConnectionError::ProtocolViolation(_)
                | ConnectionError::HandshakeFailed(_)
                | ConnectionError::StreamClosed
                | ConnectionError::Timeout
                | ConnectionError::Io(_)
        )
    }
}

/// A pending input was cancelled, either by the peer's `CancelInput` action
/// or by the input's own timeout. Surfaces only to the handler that called
/// `ask`, never closes the connection.
#[derive(Debug, thiserror::Error)]
#[error("input cancelled")]
pub struct InputCancelled;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_violation_is_fatal() {
        assert!(ConnectionError::protocol("bad frame").is_fatal());
    }

    #[test]
    fn stream_closed_is_fatal() {
        assert!(ConnectionError::StreamClosed.is_fatal());
    }
}
