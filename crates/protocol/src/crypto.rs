//! Static key material and channel fingerprints.
//!
//! This module provides the installation's long-term X25519 key pair used as
//! the Noise static key, and the [`ChannelFingerprint`] both ends of a
//! completed handshake display for out-of-band comparison.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ProtocolError, Result};

/// Length of an X25519 public or private key in bytes.
pub const KEY_LENGTH: usize = 32;

/// Length of a channel fingerprint in bytes (SHA-256 output truncated to 16 bytes).
pub const FINGERPRINT_LENGTH: usize = 16;

/// Domain separation prefix mixed into the fingerprint digest.
const FINGERPRINT_CONTEXT: &[u8] = b"basewire/channel-hash";

/// The local long-term Diffie-Hellman key pair.
///
/// Generated once per installation and used as the Noise static key for every
/// handshake. It is never rotated automatically.
#[derive(Clone, PartialEq, Eq)]
pub struct StaticKeypair {
    private: [u8; KEY_LENGTH],
    public: [u8; KEY_LENGTH],
}

impl StaticKeypair {
    /// Generates a new random key pair using the Noise library's key generator.
    pub fn generate() -> Result<Self> {
        let builder = snow::Builder::new(crate::noise::noise_params()?);
        let keypair = builder.generate_keypair()?;
        Self::from_slices(&keypair.private, &keypair.public)
    }

    /// Reassembles a key pair from raw private and public key bytes.
    pub fn from_bytes(private: [u8; KEY_LENGTH], public: [u8; KEY_LENGTH]) -> Self {
        Self { private, public }
    }

    /// Reassembles a key pair from byte slices, checking their lengths.
    pub fn from_slices(private: &[u8], public: &[u8]) -> Result<Self> {
        let private: [u8; KEY_LENGTH] = private.try_into().map_err(|_| {
            ProtocolError::InvalidPublicKey(format!(
                "private key must be {} bytes, got {}",
                KEY_LENGTH,
                private.len()
            ))
        })?;
        let public = public_key_from_slice(public)?;
        Ok(Self { private, public })
    }

    /// Returns the public half.
    pub fn public_key(&self) -> &[u8; KEY_LENGTH] {
        &self.public
    }

    /// Returns the private half.
    ///
    /// **Security Warning**: only use this for handing the key to the
    /// handshake or writing it to private storage.
    pub fn private_key(&self) -> &[u8; KEY_LENGTH] {
        &self.private
    }
}

impl std::fmt::Debug for StaticKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticKeypair")
            .field("public", &hex_string(&self.public))
            .field("private", &"[REDACTED]")
            .finish()
    }
}

/// Converts a byte slice into a fixed-size public key.
pub fn public_key_from_slice(bytes: &[u8]) -> Result<[u8; KEY_LENGTH]> {
    bytes.try_into().map_err(|_| {
        ProtocolError::InvalidPublicKey(format!(
            "public key must be {} bytes, got {}",
            KEY_LENGTH,
            bytes.len()
        ))
    })
}

/// Short human-comparable value derived from a completed handshake.
///
/// Derived from the Noise handshake hash, which commits to both static and
/// both ephemeral public keys, so honest peers of one handshake compute the
/// same value and a machine-in-the-middle produces two different ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelFingerprint(#[serde(with = "serde_bytes")] pub [u8; FINGERPRINT_LENGTH]);

impl ChannelFingerprint {
    /// Derives the fingerprint from a Noise handshake hash.
    pub fn from_handshake_hash(handshake_hash: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_CONTEXT);
        hasher.update(handshake_hash);
        let digest = hasher.finalize();

        let mut bytes = [0u8; FINGERPRINT_LENGTH];
        bytes.copy_from_slice(&digest[..FINGERPRINT_LENGTH]);
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LENGTH] {
        &self.0
    }

    /// Formats the fingerprint for display.
    ///
    /// Groups of 4 hex characters separated by colons, for example:
    /// `a1b2:c3d4:e5f6:7890:1234:5678:9abc:def0`
    pub fn display_string(&self) -> String {
        self.0
            .chunks(2)
            .map(|chunk| format!("{:02x}{:02x}", chunk[0], chunk[1]))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Compares against a user-typed fingerprint, ignoring case, spaces and
    /// separators.
    pub fn matches_display(&self, typed: &str) -> bool {
        let normalized: String = typed
            .chars()
            .filter(|c| c.is_ascii_hexdigit())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        normalized == hex_string(&self.0)
    }
}

impl std::fmt::Display for ChannelFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_string())
    }
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
