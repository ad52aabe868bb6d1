//! Error taxonomy of the secure channel.

use protocol::ProtocolError;
use thiserror::Error;

use crate::pairing::PairingError;
use crate::state::ConnectionState;

/// How a collaborator should react to a [`ChannelError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient; reconnecting may help.
    Retry,
    /// Possible tampering; show the user and stop.
    Security,
    /// Misconfiguration or a broken peer; retrying will not help.
    Fatal,
    /// Application-level failure of one call; the connection is healthy.
    Call,
}

/// Errors surfaced by the channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The appliance did not answer the liveness probe.
    #[error("appliance unreachable: {0}")]
    Unreachable(String),

    /// The Noise handshake failed for a reason other than a pin mismatch.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The appliance presented a static key that differs from the pinned one.
    #[error(
        "possible tampering: appliance {identity} presented key {presented}, pinned key is {pinned}"
    )]
    PinMismatch {
        /// Identity the connection was opened for.
        identity: String,
        /// Hex prefix of the pinned key.
        pinned: String,
        /// Hex prefix of the presented key.
        presented: String,
    },

    /// A socket, decryption or framing failure ended the connection.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The connection is closed.
    #[error("connection closed")]
    Closed,

    /// A call deadline expired; the connection was closed.
    #[error("{0} timed out")]
    Timeout(String),

    /// The remote method reported a failure.
    #[error("{method} failed: {message}")]
    Remote {
        /// Wire name of the method.
        method: String,
        /// Message reported by the appliance.
        message: String,
    },

    /// A call's arguments or reply could not be encoded or decoded.
    #[error("invalid payload for {method}: {reason}")]
    Payload {
        /// Wire name of the method.
        method: String,
        /// Codec error.
        reason: String,
    },

    /// A state transition that the connection state machine forbids.
    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: ConnectionState,
        /// Requested state.
        to: ConnectionState,
    },

    /// The pairing store failed.
    #[error("pairing store: {0}")]
    Pairing(PairingError),
}

impl ChannelError {
    /// Classifies the error for retry decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            ChannelError::Unreachable(_)
            | ChannelError::ConnectionLost(_)
            | ChannelError::Closed
            | ChannelError::Timeout(_) => ErrorClass::Retry,
            ChannelError::PinMismatch { .. } => ErrorClass::Security,
            ChannelError::HandshakeFailed(_)
            | ChannelError::InvalidTransition { .. }
            | ChannelError::Pairing(_) => ErrorClass::Fatal,
            ChannelError::Remote { .. } | ChannelError::Payload { .. } => ErrorClass::Call,
        }
    }

    /// Returns whether reconnecting may resolve the error.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retry
    }

    /// Returns whether the error tore down (or prevented) the connection.
    pub fn is_connection_fatal(&self) -> bool {
        self.class() != ErrorClass::Call
    }
}

impl From<PairingError> for ChannelError {
    fn from(err: PairingError) -> Self {
        match err {
            PairingError::PinMismatch {
                identity,
                pinned,
                presented,
            } => ChannelError::PinMismatch {
                identity,
                pinned,
                presented,
            },
            other => ChannelError::Pairing(other),
        }
    }
}

impl From<ProtocolError> for ChannelError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::HandshakeFailed(msg) => ChannelError::HandshakeFailed(msg),
            ProtocolError::HandshakeIncomplete => ChannelError::HandshakeFailed(err.to_string()),
            other => ChannelError::ConnectionLost(other.to_string()),
        }
    }
}

/// Result type alias for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;
