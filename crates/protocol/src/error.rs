//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all wire-level failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Serialization errors
    /// Failed to serialize data.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize data.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    // Cryptographic errors
    /// Encryption operation failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption operation failed.
    ///
    /// Covers authentication tag mismatches, truncated frames and frames
    /// carrying an unexpected counter.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Invalid or malformed public key.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    // Handshake errors
    /// Noise protocol handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Attempted to use transport before handshake completion.
    #[error("handshake incomplete: cannot perform operation before handshake is finished")]
    HandshakeIncomplete,

    // Frame errors
    /// Frame exceeds maximum allowed size.
    #[error("frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Frame counter did not match the next expected value.
    #[error("unexpected frame counter: expected {expected}, got {got}")]
    UnexpectedCounter {
        /// Counter the receiver was waiting for.
        expected: u64,
        /// Counter carried by the frame.
        got: u64,
    },

    // Message errors
    /// A decrypted application message carried no opcode.
    #[error("empty application message")]
    EmptyMessage,

    /// A decrypted application message carried an unknown opcode.
    #[error("unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),

    /// A notification body could not be decoded.
    #[error("malformed body for opcode {opcode:#04x}: {reason}")]
    MalformedBody {
        /// Opcode of the offending message.
        opcode: u8,
        /// Decoder error.
        reason: String,
    },
}

impl ProtocolError {
    /// Returns whether this error means the encrypted stream can no longer
    /// be trusted.
    ///
    /// Unknown opcodes, empty messages and undecodable notification bodies
    /// are protocol violations by an authenticated peer and do not
    /// desynchronise the stream.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ProtocolError::UnknownOpcode(_)
                | ProtocolError::EmptyMessage
                | ProtocolError::MalformedBody { .. }
        )
    }
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

// Conversions from underlying crate errors

impl From<rmp_serde::encode::Error> for ProtocolError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        ProtocolError::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ProtocolError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        ProtocolError::Deserialization(err.to_string())
    }
}

impl From<snow::Error> for ProtocolError {
    fn from(err: snow::Error) -> Self {
        let msg = err.to_string();
        match err {
            snow::Error::Decrypt => ProtocolError::Decryption(msg),
            snow::Error::Pattern(_)
            | snow::Error::Init(_)
            | snow::Error::Prereq(_)
            | snow::Error::State(_)
            | snow::Error::Dh => ProtocolError::HandshakeFailed(msg),
            _ => ProtocolError::Encryption(msg),
        }
    }
}
