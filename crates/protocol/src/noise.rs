//! Noise protocol handshake and the resulting cipher session.
//!
//! This module implements the Noise XX handshake pattern between the
//! companion (initiator) and the appliance (responder), followed by a
//! [`CipherSession`] holding one cipher per direction.
//!
//! The XX pattern provides:
//! - Mutual authentication: Both parties prove possession of their static key
//! - Forward secrecy: Compromise of long-term keys doesn't compromise past sessions
//! - Identity hiding: Static keys are encrypted before transmission
//!
//! ## Noise XX Pattern
//! ```text
//! -> e
//! <- e, ee, s, es
//! -> s, se
//! ```
//!
//! After the handshake, every frame carries an explicit counter that doubles
//! as the AEAD nonce. Each direction keeps its own strictly increasing
//! counter and the receiver only accepts the next expected value.

use std::sync::Arc;

use snow::params::NoiseParams;
use snow::{Builder, HandshakeState, StatelessTransportState};

use crate::crypto::{public_key_from_slice, ChannelFingerprint, StaticKeypair, KEY_LENGTH};
use crate::error::{ProtocolError, Result};
use crate::framing::SecureFrame;

/// The Noise protocol pattern used for handshakes.
///
/// Noise_XX_25519_ChaChaPoly_SHA256:
/// - XX: Mutual authentication with identity hiding
/// - 25519: Curve25519 for DH key exchange
/// - ChaChaPoly: ChaCha20-Poly1305 for AEAD
/// - SHA256: SHA-256 for hashing, as used by the appliance firmware
const NOISE_PATTERN: &str = "Noise_XX_25519_ChaChaPoly_SHA256";

/// Maximum size for a Noise protocol message.
///
/// This includes handshake messages and encrypted transport payloads.
/// The Noise protocol specifies a maximum message size of 65535 bytes.
pub const MAX_NOISE_MESSAGE_SIZE: usize = 65535;

/// Overhead added by Noise encryption (Poly1305 tag).
pub const NOISE_OVERHEAD: usize = 16;

/// Largest plaintext that fits in one frame.
pub const MAX_PLAINTEXT_SIZE: usize = MAX_NOISE_MESSAGE_SIZE - NOISE_OVERHEAD;

pub(crate) fn noise_params() -> Result<NoiseParams> {
    NOISE_PATTERN
        .parse()
        .map_err(|e| ProtocolError::HandshakeFailed(format!("invalid noise pattern: {}", e)))
}

/// State of the Noise handshake process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Initiator: Ready to send first message (-> e)
    InitiatorStart,
    /// Initiator: Waiting for response (<- e, ee, s, es)
    InitiatorWaitingForResponse,
    /// Initiator: Ready to send final message (-> s, se)
    InitiatorSendFinal,
    /// Responder: Waiting for first message (-> e)
    ResponderStart,
    /// Responder: Ready to send response (<- e, ee, s, es)
    ResponderSendResponse,
    /// Responder: Waiting for final message (-> s, se)
    ResponderWaitingForFinal,
    /// Handshake complete, ready for transport
    Complete,
}

/// Role in the Noise handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiates the handshake (companion)
    Initiator,
    /// Responds to the handshake (appliance)
    Responder,
}

/// A Noise XX handshake in progress.
///
/// ## Usage
///
/// ```ignore
/// let mut initiator = NoiseSession::new_initiator(&keypair)?;
/// let msg1 = initiator.write_handshake_message(&[])?;
/// // Send msg1, receive msg2...
/// initiator.read_handshake_message(&msg2)?;
/// // The remote static key is known here: check it against the pin.
/// let msg3 = initiator.write_handshake_message(&[])?;
/// let session = initiator.into_cipher_session()?;
/// ```
pub struct NoiseSession {
    handshake: HandshakeState,
    phase: HandshakePhase,
    role: Role,
    buffer: Vec<u8>,
}

impl NoiseSession {
    /// Creates a new Noise session as the initiator.
    pub fn new_initiator(keypair: &StaticKeypair) -> Result<Self> {
        let handshake = Builder::new(noise_params()?)
            .local_private_key(keypair.private_key())
            .build_initiator()
            .map_err(|e| {
                ProtocolError::HandshakeFailed(format!("failed to build initiator: {}", e))
            })?;

        Ok(Self {
            handshake,
            phase: HandshakePhase::InitiatorStart,
            role: Role::Initiator,
            buffer: vec![0u8; MAX_NOISE_MESSAGE_SIZE],
        })
    }

    /// Creates a new Noise session as the responder.
    pub fn new_responder(keypair: &StaticKeypair) -> Result<Self> {
        let handshake = Builder::new(noise_params()?)
            .local_private_key(keypair.private_key())
            .build_responder()
            .map_err(|e| {
                ProtocolError::HandshakeFailed(format!("failed to build responder: {}", e))
            })?;

        Ok(Self {
            handshake,
            phase: HandshakePhase::ResponderStart,
            role: Role::Responder,
            buffer: vec![0u8; MAX_NOISE_MESSAGE_SIZE],
        })
    }

    /// Returns the current handshake phase.
    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Returns the role in the handshake.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns whether the handshake is complete.
    pub fn is_handshake_complete(&self) -> bool {
        self.phase == HandshakePhase::Complete
    }

    /// Returns whether it is this side's turn to write.
    pub fn is_my_turn_to_write(&self) -> bool {
        matches!(
            (self.role, self.phase),
            (Role::Initiator, HandshakePhase::InitiatorStart)
                | (Role::Initiator, HandshakePhase::InitiatorSendFinal)
                | (Role::Responder, HandshakePhase::ResponderSendResponse)
        )
    }

    /// Writes the next handshake message.
    pub fn write_handshake_message(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        if !self.is_my_turn_to_write() {
            return Err(ProtocolError::HandshakeFailed(format!(
                "cannot write in current phase: {:?}",
                self.phase
            )));
        }

        let len = self.handshake.write_message(payload, &mut self.buffer)?;
        let message = self.buffer[..len].to_vec();

        self.phase = match self.phase {
            HandshakePhase::InitiatorStart => HandshakePhase::InitiatorWaitingForResponse,
            HandshakePhase::InitiatorSendFinal => HandshakePhase::Complete,
            HandshakePhase::ResponderSendResponse => HandshakePhase::ResponderWaitingForFinal,
            other => other,
        };

        Ok(message)
    }

    /// Reads a handshake message from the peer.
    ///
    /// Returns any payload included in the handshake message.
    pub fn read_handshake_message(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        match (self.role, self.phase) {
            (Role::Initiator, HandshakePhase::InitiatorWaitingForResponse)
            | (Role::Responder, HandshakePhase::ResponderStart)
            | (Role::Responder, HandshakePhase::ResponderWaitingForFinal) => {}
            _ => {
                return Err(ProtocolError::HandshakeFailed(format!(
                    "cannot read in current phase: {:?}",
                    self.phase
                )));
            }
        }

        if message.len() > MAX_NOISE_MESSAGE_SIZE {
            return Err(ProtocolError::HandshakeFailed(format!(
                "handshake message too large: {} bytes",
                message.len()
            )));
        }

        let len = self
            .handshake
            .read_message(message, &mut self.buffer)
            .map_err(|e| ProtocolError::HandshakeFailed(e.to_string()))?;
        let payload = self.buffer[..len].to_vec();

        self.phase = match self.phase {
            HandshakePhase::InitiatorWaitingForResponse => HandshakePhase::InitiatorSendFinal,
            HandshakePhase::ResponderStart => HandshakePhase::ResponderSendResponse,
            HandshakePhase::ResponderWaitingForFinal => HandshakePhase::Complete,
            other => other,
        };

        Ok(payload)
    }

    /// Returns the remote peer's static public key.
    ///
    /// The initiator learns it after reading the second message, before it
    /// sends its own static key; the responder after the final message.
    pub fn remote_static(&self) -> Option<[u8; KEY_LENGTH]> {
        let remote = self.handshake.get_remote_static()?;
        public_key_from_slice(remote).ok()
    }

    /// Finishes the handshake and derives the directional ciphers.
    pub fn into_cipher_session(self) -> Result<CipherSession> {
        if self.phase != HandshakePhase::Complete {
            return Err(ProtocolError::HandshakeIncomplete);
        }

        let remote_static = self.remote_static().ok_or_else(|| {
            ProtocolError::HandshakeFailed("remote static key not available".to_string())
        })?;
        let fingerprint = ChannelFingerprint::from_handshake_hash(self.handshake.get_handshake_hash());
        let transport = Arc::new(self.handshake.into_stateless_transport_mode()?);

        Ok(CipherSession {
            send: SendCipher {
                transport: Arc::clone(&transport),
                counter: 0,
            },
            receive: ReceiveCipher {
                transport,
                expected: 0,
            },
            remote_static,
            fingerprint,
            role: self.role,
        })
    }
}

impl std::fmt::Debug for NoiseSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoiseSession")
            .field("phase", &self.phase)
            .field("role", &self.role)
            .finish()
    }
}

/// The two directional ciphers of a completed handshake.
///
/// Exclusively owned by one connection and never reused: a reconnect
/// performs a fresh handshake.
pub struct CipherSession {
    send: SendCipher,
    receive: ReceiveCipher,
    remote_static: [u8; KEY_LENGTH],
    fingerprint: ChannelFingerprint,
    role: Role,
}

impl CipherSession {
    /// Returns the fingerprint both ends display for comparison.
    pub fn fingerprint(&self) -> ChannelFingerprint {
        self.fingerprint
    }

    /// Returns the peer's static public key.
    pub fn remote_static(&self) -> &[u8; KEY_LENGTH] {
        &self.remote_static
    }

    /// Returns which side of the handshake this session was.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Encrypts a plaintext into wire frame bytes.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.send.encrypt(plaintext)
    }

    /// Decrypts wire frame bytes.
    pub fn decrypt(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        self.receive.decrypt(frame)
    }

    /// Splits the session into its send and receive halves.
    pub fn split(self) -> (SendCipher, ReceiveCipher) {
        (self.send, self.receive)
    }
}

impl std::fmt::Debug for CipherSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherSession")
            .field("role", &self.role)
            .field("fingerprint", &self.fingerprint)
            .field("sent", &self.send.counter)
            .field("received", &self.receive.expected)
            .finish()
    }
}

/// Outbound half of a [`CipherSession`].
pub struct SendCipher {
    transport: Arc<StatelessTransportState>,
    counter: u64,
}

impl SendCipher {
    /// Encrypts a plaintext under the next counter value.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if plaintext.len() > MAX_PLAINTEXT_SIZE {
            return Err(ProtocolError::Encryption(format!(
                "plaintext too large: {} bytes exceeds maximum of {} bytes",
                plaintext.len(),
                MAX_PLAINTEXT_SIZE
            )));
        }
        if self.counter == u64::MAX {
            return Err(ProtocolError::Encryption("nonce space exhausted".to_string()));
        }

        let mut ciphertext = vec![0u8; plaintext.len() + NOISE_OVERHEAD];
        let len = self
            .transport
            .write_message(self.counter, plaintext, &mut ciphertext)?;
        ciphertext.truncate(len);

        let frame = SecureFrame::new(self.counter, ciphertext).encode()?;
        self.counter += 1;
        Ok(frame)
    }

    /// Number of frames sent so far.
    pub fn counter(&self) -> u64 {
        self.counter
    }
}

/// Inbound half of a [`CipherSession`].
pub struct ReceiveCipher {
    transport: Arc<StatelessTransportState>,
    expected: u64,
}

impl ReceiveCipher {
    /// Decrypts a frame, failing closed on any counter, length or tag problem.
    pub fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let frame = SecureFrame::decode(data)?;
        if frame.counter != self.expected {
            return Err(ProtocolError::UnexpectedCounter {
                expected: self.expected,
                got: frame.counter,
            });
        }

        let mut plaintext = vec![0u8; frame.ciphertext.len()];
        let len = self
            .transport
            .read_message(frame.counter, &frame.ciphertext, &mut plaintext)
            .map_err(|e| ProtocolError::Decryption(e.to_string()))?;
        plaintext.truncate(len);

        self.expected += 1;
        Ok(plaintext)
    }

    /// Counter value the next frame must carry.
    pub fn expected(&self) -> u64 {
        self.expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn handshake_pair() -> (NoiseSession, NoiseSession) {
        let initiator = NoiseSession::new_initiator(&StaticKeypair::generate().unwrap()).unwrap();
        let responder = NoiseSession::new_responder(&StaticKeypair::generate().unwrap()).unwrap();
        (initiator, responder)
    }

    fn complete(
        mut initiator: NoiseSession,
        mut responder: NoiseSession,
    ) -> (CipherSession, CipherSession) {
        let msg1 = initiator.write_handshake_message(&[]).unwrap();
        responder.read_handshake_message(&msg1).unwrap();
        let msg2 = responder.write_handshake_message(&[]).unwrap();
        initiator.read_handshake_message(&msg2).unwrap();
        let msg3 = initiator.write_handshake_message(&[]).unwrap();
        responder.read_handshake_message(&msg3).unwrap();
        (
            initiator.into_cipher_session().unwrap(),
            responder.into_cipher_session().unwrap(),
        )
    }

    #[test]
    fn test_initiator_creation() {
        let session = NoiseSession::new_initiator(&StaticKeypair::generate().unwrap()).unwrap();

        assert_eq!(session.role(), Role::Initiator);
        assert_eq!(session.phase(), HandshakePhase::InitiatorStart);
        assert!(session.is_my_turn_to_write());
        assert!(!session.is_handshake_complete());
    }

    #[test]
    fn test_responder_creation() {
        let session = NoiseSession::new_responder(&StaticKeypair::generate().unwrap()).unwrap();

        assert_eq!(session.role(), Role::Responder);
        assert_eq!(session.phase(), HandshakePhase::ResponderStart);
        assert!(!session.is_my_turn_to_write());
    }

    #[test]
    fn test_full_handshake_phases() {
        let (mut initiator, mut responder) = handshake_pair();

        let msg1 = initiator.write_handshake_message(&[]).unwrap();
        assert_eq!(initiator.phase(), HandshakePhase::InitiatorWaitingForResponse);

        responder.read_handshake_message(&msg1).unwrap();
        assert_eq!(responder.phase(), HandshakePhase::ResponderSendResponse);

        let msg2 = responder.write_handshake_message(&[]).unwrap();
        assert_eq!(responder.phase(), HandshakePhase::ResponderWaitingForFinal);

        initiator.read_handshake_message(&msg2).unwrap();
        assert_eq!(initiator.phase(), HandshakePhase::InitiatorSendFinal);

        let msg3 = initiator.write_handshake_message(&[]).unwrap();
        assert!(initiator.is_handshake_complete());

        responder.read_handshake_message(&msg3).unwrap();
        assert!(responder.is_handshake_complete());
    }

    #[test]
    fn test_initiator_learns_remote_static_before_final_message() {
        let responder_keys = StaticKeypair::generate().unwrap();
        let mut initiator =
            NoiseSession::new_initiator(&StaticKeypair::generate().unwrap()).unwrap();
        let mut responder = NoiseSession::new_responder(&responder_keys).unwrap();

        let msg1 = initiator.write_handshake_message(&[]).unwrap();
        assert!(initiator.remote_static().is_none());
        responder.read_handshake_message(&msg1).unwrap();
        let msg2 = responder.write_handshake_message(&[]).unwrap();
        initiator.read_handshake_message(&msg2).unwrap();

        assert_eq!(initiator.phase(), HandshakePhase::InitiatorSendFinal);
        assert_eq!(initiator.remote_static(), Some(*responder_keys.public_key()));
    }

    #[test]
    fn test_both_sides_compute_same_fingerprint() {
        let initiator_keys = StaticKeypair::generate().unwrap();
        let responder_keys = StaticKeypair::generate().unwrap();
        let (initiator, responder) = complete(
            NoiseSession::new_initiator(&initiator_keys).unwrap(),
            NoiseSession::new_responder(&responder_keys).unwrap(),
        );

        assert_eq!(initiator.fingerprint(), responder.fingerprint());
        assert_eq!(initiator.remote_static(), responder_keys.public_key());
        assert_eq!(responder.remote_static(), initiator_keys.public_key());
    }

    #[test]
    fn test_fingerprint_differs_between_handshakes() {
        let initiator_keys = StaticKeypair::generate().unwrap();
        let responder_keys = StaticKeypair::generate().unwrap();

        let (first, _) = complete(
            NoiseSession::new_initiator(&initiator_keys).unwrap(),
            NoiseSession::new_responder(&responder_keys).unwrap(),
        );
        let (second, _) = complete(
            NoiseSession::new_initiator(&initiator_keys).unwrap(),
            NoiseSession::new_responder(&responder_keys).unwrap(),
        );

        // Fresh ephemerals per handshake.
        assert_ne!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn test_cannot_finish_incomplete_handshake() {
        let (mut initiator, _) = handshake_pair();
        initiator.write_handshake_message(&[]).unwrap();

        assert!(matches!(
            initiator.into_cipher_session(),
            Err(ProtocolError::HandshakeIncomplete)
        ));
    }

    #[test]
    fn test_cannot_write_out_of_turn() {
        let (_, mut responder) = handshake_pair();
        assert!(responder.write_handshake_message(&[]).is_err());
    }

    #[test]
    fn test_cannot_read_out_of_turn() {
        let (mut initiator, _) = handshake_pair();
        assert!(initiator.read_handshake_message(&[0; 48]).is_err());
    }

    #[test]
    fn test_garbage_handshake_message_fails() {
        let (mut initiator, mut responder) = handshake_pair();
        let msg1 = initiator.write_handshake_message(&[]).unwrap();
        responder.read_handshake_message(&msg1).unwrap();
        let mut msg2 = responder.write_handshake_message(&[]).unwrap();
        let last = msg2.len() - 1;
        msg2[last] ^= 0x01;

        assert!(matches!(
            initiator.read_handshake_message(&msg2),
            Err(ProtocolError::HandshakeFailed(_))
        ));
    }

    #[test]
    fn test_transport_roundtrip_both_directions() {
        let (mut initiator, mut responder) = complete_pair();

        let frame = initiator.encrypt(b"Hello, base!").unwrap();
        assert_eq!(responder.decrypt(&frame).unwrap(), b"Hello, base!");

        let frame = responder.encrypt(b"Hello back!").unwrap();
        assert_eq!(initiator.decrypt(&frame).unwrap(), b"Hello back!");
    }

    #[test]
    fn test_random_payload_roundtrip() {
        let (mut initiator, mut responder) = complete_pair();
        let mut rng = rand::thread_rng();

        for _ in 0..20 {
            let len = rng.gen_range(0..4096);
            let payload: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let frame = initiator.encrypt(&payload).unwrap();
            assert_eq!(responder.decrypt(&frame).unwrap(), payload);
        }
    }

    #[test]
    fn test_any_flipped_bit_fails_decryption() {
        let (mut initiator, responder) = complete_pair();
        let (_, receive) = responder.split();
        let frame = initiator.encrypt(b"status please").unwrap();
        let mut rng = rand::thread_rng();

        for _ in 0..32 {
            let mut tampered = frame.clone();
            let byte = rng.gen_range(0..tampered.len());
            let bit = rng.gen_range(0..8);
            tampered[byte] ^= 1 << bit;

            // Each attempt uses a receiver still expecting counter 0.
            let mut fresh = ReceiveCipher {
                transport: Arc::clone(&receive.transport),
                expected: 0,
            };
            assert!(fresh.decrypt(&tampered).is_err());
            assert_eq!(fresh.expected(), 0);
        }
    }

    #[test]
    fn test_replayed_frame_rejected() {
        let (mut initiator, mut responder) = complete_pair();

        let frame = initiator.encrypt(b"once").unwrap();
        responder.decrypt(&frame).unwrap();

        assert!(matches!(
            responder.decrypt(&frame),
            Err(ProtocolError::UnexpectedCounter {
                expected: 1,
                got: 0
            })
        ));
    }

    #[test]
    fn test_reordered_frame_rejected() {
        let (mut initiator, mut responder) = complete_pair();

        let _first = initiator.encrypt(b"first").unwrap();
        let second = initiator.encrypt(b"second").unwrap();

        assert!(matches!(
            responder.decrypt(&second),
            Err(ProtocolError::UnexpectedCounter {
                expected: 0,
                got: 1
            })
        ));
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let (mut initiator, mut responder) = complete_pair();
        let frame = initiator.encrypt(b"truncate me").unwrap();

        assert!(responder.decrypt(&frame[..frame.len() - 1]).is_err());
        assert!(responder.decrypt(&frame[..10]).is_err());
    }

    #[test]
    fn test_directions_use_independent_counters() {
        let (initiator, responder) = complete_pair();
        let (mut i_send, mut i_recv) = initiator.split();
        let (mut r_send, mut r_recv) = responder.split();

        for i in 0..3 {
            let frame = i_send.encrypt(format!("up {}", i).as_bytes()).unwrap();
            r_recv.decrypt(&frame).unwrap();
        }
        let frame = r_send.encrypt(b"down 0").unwrap();
        assert_eq!(i_recv.decrypt(&frame).unwrap(), b"down 0");

        assert_eq!(i_send.counter(), 3);
        assert_eq!(r_recv.expected(), 3);
        assert_eq!(r_send.counter(), 1);
        assert_eq!(i_recv.expected(), 1);
    }

    #[test]
    fn test_frame_from_one_direction_rejected_in_other() {
        let (mut initiator, _) = complete_pair();
        let frame = initiator.encrypt(b"echo").unwrap();

        // The initiator's own receive key is the responder's send key.
        assert!(initiator.decrypt(&frame).is_err());
    }

    #[test]
    fn test_empty_and_max_payload() {
        let (mut initiator, mut responder) = complete_pair();

        let frame = initiator.encrypt(&[]).unwrap();
        assert!(responder.decrypt(&frame).unwrap().is_empty());

        let large = vec![0xAB; MAX_PLAINTEXT_SIZE];
        let frame = initiator.encrypt(&large).unwrap();
        assert_eq!(responder.decrypt(&frame).unwrap(), large);

        let too_large = vec![0u8; MAX_PLAINTEXT_SIZE + 1];
        assert!(matches!(
            initiator.encrypt(&too_large),
            Err(ProtocolError::Encryption(_))
        ));
    }

    fn complete_pair() -> (CipherSession, CipherSession) {
        let (initiator, responder) = handshake_pair();
        complete(initiator, responder)
    }
}
