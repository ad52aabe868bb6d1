//! Secure frame codec.
//!
//! # Frame Format
//!
//! Each transport message (one WebSocket binary message) carries exactly one
//! frame:
//! - 8 bytes: message counter (big-endian), used as the AEAD nonce
//! - N bytes: ChaCha20-Poly1305 ciphertext, including the 16-byte tag
//!
//! The underlying socket preserves message boundaries, so no length prefix is
//! needed. The counter travels in clear so the receiver can reject replayed or
//! reordered frames before attempting decryption.

use crate::error::{ProtocolError, Result};
use crate::noise::{MAX_NOISE_MESSAGE_SIZE, NOISE_OVERHEAD};

/// Size of the counter header in bytes.
pub const COUNTER_SIZE: usize = 8;

/// Smallest valid frame: a counter plus an empty ciphertext's tag.
pub const MIN_FRAME_SIZE: usize = COUNTER_SIZE + NOISE_OVERHEAD;

/// Largest valid frame: a counter plus a maximum-size Noise message.
pub const MAX_FRAME_SIZE: usize = COUNTER_SIZE + MAX_NOISE_MESSAGE_SIZE;

/// One encrypted frame as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureFrame {
    /// Per-direction message counter.
    pub counter: u64,
    /// Ciphertext with authentication tag.
    pub ciphertext: Vec<u8>,
}

impl SecureFrame {
    /// Create a new frame.
    pub fn new(counter: u64, ciphertext: Vec<u8>) -> Self {
        Self {
            counter,
            ciphertext,
        }
    }

    /// Encode the frame into wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let total_size = COUNTER_SIZE + self.ciphertext.len();
        if total_size > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: total_size,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut output = Vec::with_capacity(total_size);
        output.extend_from_slice(&self.counter.to_be_bytes());
        output.extend_from_slice(&self.ciphertext);
        Ok(output)
    }

    /// Decode a frame from wire bytes.
    ///
    /// Truncated and oversized frames are rejected here; authenticity is
    /// checked by the receiving cipher.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_FRAME_SIZE {
            return Err(ProtocolError::Decryption(format!(
                "truncated frame: {} bytes, minimum is {} bytes",
                data.len(),
                MIN_FRAME_SIZE
            )));
        }

        if data.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: data.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let mut counter_bytes = [0u8; COUNTER_SIZE];
        counter_bytes.copy_from_slice(&data[..COUNTER_SIZE]);

        Ok(Self {
            counter: u64::from_be_bytes(counter_bytes),
            ciphertext: data[COUNTER_SIZE..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let frame = SecureFrame::new(0x0102_0304_0506_0708, vec![0xAA; NOISE_OVERHEAD]);
        let bytes = frame.encode().unwrap();

        assert_eq!(bytes.len(), MIN_FRAME_SIZE);
        assert_eq!(&bytes[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(bytes[8..].iter().all(|b| *b == 0xAA));
    }

    #[test]
    fn test_decode_encoded_frame() {
        let frame = SecureFrame::new(42, vec![7u8; 100]);
        let decoded = SecureFrame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_decode_truncated_frame() {
        let result = SecureFrame::decode(&[0u8; MIN_FRAME_SIZE - 1]);
        assert!(matches!(result, Err(ProtocolError::Decryption(_))));

        let result = SecureFrame::decode(&[]);
        assert!(matches!(result, Err(ProtocolError::Decryption(_))));
    }

    #[test]
    fn test_decode_oversized_frame() {
        let data = vec![0u8; MAX_FRAME_SIZE + 1];
        let result = SecureFrame::decode(&data);
        assert!(matches!(
            result,
            Err(ProtocolError::FrameTooLarge { size, max })
                if size == MAX_FRAME_SIZE + 1 && max == MAX_FRAME_SIZE
        ));
    }

    #[test]
    fn test_encode_oversized_frame() {
        let frame = SecureFrame::new(0, vec![0u8; MAX_NOISE_MESSAGE_SIZE + 1]);
        assert!(matches!(
            frame.encode(),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_max_size_frame_accepted() {
        let frame = SecureFrame::new(u64::MAX - 1, vec![0u8; MAX_NOISE_MESSAGE_SIZE]);
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes.len(), MAX_FRAME_SIZE);
        assert_eq!(SecureFrame::decode(&bytes).unwrap().counter, u64::MAX - 1);
    }
}
