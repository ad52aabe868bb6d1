//! # Basewire Protocol Library
//!
//! Wire-level building blocks of the secure channel between a companion
//! application and a Basewire appliance. This crate performs no I/O.
//!
//! ## Overview
//!
//! - **Static keys and fingerprints**: X25519 installation key pair and the
//!   human-comparable channel fingerprint
//! - **Noise Protocol**: XX handshake and a cipher session with one
//!   counter-checked cipher per direction
//! - **Secure frames**: counter-prefixed AEAD frames
//! - **Messages**: opcode-tagged notifications and the RPC envelope
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   [opcode][body]  /  RPC envelope       │  MessagePack bodies
//! ├─────────────────────────────────────────┤
//! │           Noise Encryption              │  ChaCha20-Poly1305
//! ├─────────────────────────────────────────┤
//! │        [counter][ciphertext]            │  SecureFrame
//! ├─────────────────────────────────────────┤
//! │      Transport (WebSocket binary)       │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{AppMessage, BaseStatus, NoiseSession, StaticKeypair};
//!
//! let companion = StaticKeypair::generate().unwrap();
//! let appliance = StaticKeypair::generate().unwrap();
//!
//! let mut initiator = NoiseSession::new_initiator(&companion).unwrap();
//! let mut responder = NoiseSession::new_responder(&appliance).unwrap();
//!
//! let msg1 = initiator.write_handshake_message(&[]).unwrap();
//! responder.read_handshake_message(&msg1).unwrap();
//! let msg2 = responder.write_handshake_message(&[]).unwrap();
//! initiator.read_handshake_message(&msg2).unwrap();
//! let msg3 = initiator.write_handshake_message(&[]).unwrap();
//! responder.read_handshake_message(&msg3).unwrap();
//!
//! let mut ours = initiator.into_cipher_session().unwrap();
//! let mut theirs = responder.into_cipher_session().unwrap();
//! assert_eq!(ours.fingerprint(), theirs.fingerprint());
//!
//! let frame = theirs
//!     .encrypt(&AppMessage::StatusChanged(BaseStatus::Initialized).encode().unwrap())
//!     .unwrap();
//! let message = AppMessage::decode(&ours.decrypt(&frame).unwrap()).unwrap();
//! assert_eq!(message, AppMessage::StatusChanged(BaseStatus::Initialized));
//! ```
//!
//! ## Modules
//!
//! - [`crypto`]: Static key pair and channel fingerprint
//! - [`noise`]: Noise XX handshake and cipher session
//! - [`framing`]: Secure frame codec
//! - [`messages`]: Opcodes, notifications and RPC payloads
//! - [`error`]: Error types

pub mod crypto;
pub mod error;
pub mod framing;
pub mod messages;
pub mod noise;

pub use crypto::{ChannelFingerprint, StaticKeypair, FINGERPRINT_LENGTH, KEY_LENGTH};
pub use error::{ProtocolError, Result};
pub use framing::{SecureFrame, COUNTER_SIZE, MAX_FRAME_SIZE, MIN_FRAME_SIZE};
pub use messages::{
    AppMessage, BaseEvent, BaseStatus, ErrorResponse, GetBaseVersionResponse, GetEnvResponse,
    GetHostnameResponse, Method, Opcode, RpcOutcome, RpcRequest, RpcResponse,
    SampleInfoResponse, SetHostnameArgs, UserAuthenticateArgs, UserChangePasswordArgs,
    VerificationProgressResponse, RPC_VERSION,
};
pub use noise::{
    CipherSession, HandshakePhase, NoiseSession, ReceiveCipher, Role, SendCipher,
    MAX_NOISE_MESSAGE_SIZE, MAX_PLAINTEXT_SIZE, NOISE_OVERHEAD,
};
