//! Error types for the sensor protocol.
//!
//! Errors are split by layer:
//! - [`ProtocolError`] covers framing and decoding. The wire contract was
//!   violated or the byte stream ended.
//! - [`DeviceError`] covers a device session: handshake, device rejections,
//!   timeouts and cancellation, plus any protocol error underneath.
//!
//! Neither layer retries on its own. The only retry in the crate is the
//! bounded busy retry inside `DeviceSession::evaluate`.

use std::time::Duration;

use thiserror::Error;

use crate::decoder::Status;

/// Errors raised while encoding commands or decoding frames and responses.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The data frame would not fit the 9-digit length field.
    #[error("data frame of {len} bytes exceeds the 9-digit length field")]
    EncodingError { len: usize },
    /// A command argument cannot be represented on the wire.
    #[error("invalid command argument: {0}")]
    InvalidArgument(String),
    /// The stream returned zero bytes before an exact-length read completed.
    #[error("connection closed after {read} of {expected} bytes")]
    ConnectionClosed { read: usize, expected: usize },
    /// The peer sent something that does not match the wire contract.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// A payload format the decoder deliberately does not handle.
    #[error("unsupported payload format: {0}")]
    UnsupportedFormat(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        ProtocolError::MalformedResponse(msg.into())
    }
}

/// Errors raised by a [`DeviceSession`](crate::session::DeviceSession).
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device did not confirm protocol version 3.
    #[error("handshake failed: expected `1000*`, got {reply:?}")]
    HandshakeFailed { reply: String },
    #[error("could not connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The device answered a command with `!` or `?`.
    #[error("device rejected `{command}` with {status}")]
    DeviceRejected { command: String, status: Status },
    /// `!` during the evaluation sequence. Only seen inside `evaluate`.
    #[error("device busy during `{command}`")]
    TransientBusy { command: String },
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
    /// An earlier request timed out or broke framing, so the position in
    /// the response stream is unknown. The session must be reconnected.
    #[error("session is out of step with the device; reconnect")]
    Desynchronized,
    /// The task running this device's session panicked or was aborted.
    #[error("device worker failed: {0}")]
    Worker(String),
}

impl DeviceError {
    /// True for errors caused by the transport or the wire contract rather
    /// than by the device answering.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DeviceError::Protocol(_)
                | DeviceError::Connect { .. }
                | DeviceError::HandshakeFailed { .. }
                | DeviceError::Timeout(_)
                | DeviceError::Desynchronized
        )
    }
}
