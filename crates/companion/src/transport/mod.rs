//! Frame transport.
//!
//! A [`Connector`] yields a [`RawLink`]: a pair of queues carrying whole
//! binary frames to and from the appliance. [`FrameTransport::establish`]
//! runs the liveness probe, opens the link, performs the Noise handshake as
//! initiator, checks the appliance's static key against the pairing store and
//! then spawns two tasks that own the directional ciphers:
//!
//! ```text
//!   send() ──► plaintext queue ──► writer task (SendCipher) ──► RawLink.outbound
//!   RawLink.inbound ──► reader task (ReceiveCipher, opcode dispatch) ──► InboundSink
//! ```
//!
//! Both tasks stop when the transport's cancellation token fires.

pub mod memory;
pub mod websocket;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use protocol::{
    AppMessage, ChannelFingerprint, NoiseSession, ReceiveCipher, SendCipher, StaticKeypair,
    KEY_LENGTH, MAX_PLAINTEXT_SIZE,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ConnectionConfig;
use crate::error::{ChannelError, Result};
use crate::pairing::{PairingStore, PinCheck, RemoteIdentity};
use crate::rpc::RequestSink;

pub use memory::{MemoryAcceptor, MemoryConnector};
pub use websocket::WebSocketConnector;

/// Boxed future returned by the object-safe traits of this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One open, unauthenticated binary link.
///
/// The link is gone once `inbound` yields `None`; dropping both halves closes
/// it.
#[derive(Debug)]
pub struct RawLink {
    /// Frames to the appliance.
    pub outbound: mpsc::Sender<Vec<u8>>,
    /// Frames from the appliance.
    pub inbound: mpsc::Receiver<Vec<u8>>,
}

/// Opens raw links to appliances.
///
/// This trait abstracts the underlying socket, allowing for different
/// implementations (e.g., WebSocket, in-memory for testing).
pub trait Connector: Send + Sync {
    /// Unauthenticated liveness check of `address`.
    fn probe<'a>(&'a self, address: &'a str, timeout: Duration) -> BoxFuture<'a, Result<()>>;

    /// Opens a link to `address`. Any tasks backing the link stop when
    /// `shutdown` is cancelled.
    fn open<'a>(
        &'a self,
        address: &'a str,
        shutdown: CancellationToken,
    ) -> BoxFuture<'a, Result<RawLink>>;
}

/// Receiver of decrypted inbound traffic.
pub trait InboundSink: Send + Sync {
    /// Called for every decoded message, in arrival order.
    fn on_message(&self, message: AppMessage);

    /// Called once when the transport fails. Not called for a local close.
    fn on_closed(&self, reason: ChannelError);
}

/// An established, encrypted connection.
pub struct FrameTransport {
    outbound: mpsc::Sender<Vec<u8>>,
    fingerprint: ChannelFingerprint,
    remote_static: [u8; KEY_LENGTH],
    pin_check: PinCheck,
    shutdown: CancellationToken,
}

impl FrameTransport {
    /// Connects to `identity` and completes the handshake.
    ///
    /// Fails with [`ChannelError::Unreachable`] if the probe fails,
    /// [`ChannelError::PinMismatch`] if the appliance presents a key other
    /// than the pinned one (the final handshake message is then never sent)
    /// and [`ChannelError::HandshakeFailed`] for any other handshake failure.
    /// On failure `shutdown` is cancelled.
    pub async fn establish(
        connector: &dyn Connector,
        identity: &RemoteIdentity,
        keypair: &StaticKeypair,
        store: &PairingStore,
        config: &ConnectionConfig,
        sink: Arc<dyn InboundSink>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let result = Self::connect(connector, identity, keypair, store, config, &shutdown).await;
        let (link, cipher, pin_check) = match result {
            Ok(parts) => parts,
            Err(e) => {
                shutdown.cancel();
                return Err(e);
            }
        };

        let fingerprint = cipher.fingerprint();
        let remote_static = *cipher.remote_static();
        let (send, receive) = cipher.split();

        let (outbound, plaintext_rx) = mpsc::channel(config.outbound_queue);
        tokio::spawn(write_loop(
            send,
            plaintext_rx,
            link.outbound,
            Arc::clone(&sink),
            shutdown.clone(),
        ));
        tokio::spawn(read_loop(receive, link.inbound, sink, shutdown.clone()));

        tracing::info!(
            identity = %identity,
            fingerprint = %fingerprint,
            "Secure channel established"
        );

        Ok(Self {
            outbound,
            fingerprint,
            remote_static,
            pin_check,
            shutdown,
        })
    }

    async fn connect(
        connector: &dyn Connector,
        identity: &RemoteIdentity,
        keypair: &StaticKeypair,
        store: &PairingStore,
        config: &ConnectionConfig,
        shutdown: &CancellationToken,
    ) -> Result<(RawLink, protocol::CipherSession, PinCheck)> {
        tracing::debug!(identity = %identity, "Probing appliance");
        connector
            .probe(&identity.address, config.probe_timeout())
            .await?;

        let mut link = connector.open(&identity.address, shutdown.clone()).await?;

        let handshake = handshake(&mut link, identity, keypair, store);
        let (cipher, pin_check) = tokio::select! {
            _ = shutdown.cancelled() => return Err(ChannelError::Closed),
            result = tokio::time::timeout(config.handshake_timeout(), handshake) => {
                result.map_err(|_| {
                    ChannelError::HandshakeFailed(format!(
                        "no answer within {}s",
                        config.handshake_timeout_secs
                    ))
                })??
            }
        };

        Ok((link, cipher, pin_check))
    }

    /// Channel fingerprint of this connection's handshake.
    pub fn fingerprint(&self) -> ChannelFingerprint {
        self.fingerprint
    }

    /// The appliance's static public key.
    pub fn remote_static(&self) -> &[u8; KEY_LENGTH] {
        &self.remote_static
    }

    /// Outcome of the pin check made during the handshake.
    pub fn pin_check(&self) -> PinCheck {
        self.pin_check
    }

    /// Queues a message for encryption and transmission.
    ///
    /// Messages are written in the order their `send` calls complete.
    pub async fn send(&self, message: &AppMessage) -> Result<()> {
        let plaintext = message.encode()?;
        if plaintext.len() > MAX_PLAINTEXT_SIZE {
            return Err(ChannelError::Payload {
                method: format!("{:?}", message.opcode()),
                reason: format!(
                    "message of {} bytes exceeds the {} byte limit",
                    plaintext.len(),
                    MAX_PLAINTEXT_SIZE
                ),
            });
        }

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(ChannelError::Closed),
            sent = self.outbound.send(plaintext) => sent.map_err(|_| ChannelError::Closed),
        }
    }

    /// Closes the transport. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        self.shutdown.cancel();
        tracing::debug!("Frame transport closed");
        true
    }

    /// Returns whether the transport was closed or failed.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl RequestSink for FrameTransport {
    fn send_request<'a>(&'a self, body: Vec<u8>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.send(&AppMessage::Rpc(body)).await })
    }
}

impl Drop for FrameTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Runs the initiator side of the XX handshake over `link`.
///
/// The appliance's static key arrives in the second message; it is checked
/// against the pairing store before the third message is written.
async fn handshake(
    link: &mut RawLink,
    identity: &RemoteIdentity,
    keypair: &StaticKeypair,
    store: &PairingStore,
) -> Result<(protocol::CipherSession, PinCheck)> {
    let mut noise = NoiseSession::new_initiator(keypair)?;

    // -> e
    let msg1 = noise.write_handshake_message(&[])?;
    send_handshake(link, msg1).await?;

    // <- e, ee, s, es
    let msg2 = link
        .inbound
        .recv()
        .await
        .ok_or_else(|| ChannelError::HandshakeFailed("link closed during handshake".into()))?;
    noise.read_handshake_message(&msg2)?;

    let presented = noise
        .remote_static()
        .ok_or_else(|| ChannelError::HandshakeFailed("appliance sent no static key".into()))?;
    let pin_check = store.check(identity, presented)?;
    tracing::debug!(identity = %identity, ?pin_check, "Appliance key accepted");

    // -> s, se
    let msg3 = noise.write_handshake_message(&[])?;
    send_handshake(link, msg3).await?;
    let cipher = noise.into_cipher_session()?;

    // First-use keys are pinned only once the handshake completed
    let pin_check = match pin_check {
        PinCheck::FirstUse => store.check_or_pin(identity, presented)?,
        known => known,
    };

    Ok((cipher, pin_check))
}

async fn send_handshake(link: &RawLink, message: Vec<u8>) -> Result<()> {
    link.outbound
        .send(message)
        .await
        .map_err(|_| ChannelError::HandshakeFailed("link closed during handshake".into()))
}

/// Encrypts queued messages in submission order.
async fn write_loop(
    mut cipher: SendCipher,
    mut plaintext_rx: mpsc::Receiver<Vec<u8>>,
    outbound: mpsc::Sender<Vec<u8>>,
    sink: Arc<dyn InboundSink>,
    shutdown: CancellationToken,
) {
    let failure = loop {
        let plaintext = tokio::select! {
            _ = shutdown.cancelled() => return,
            next = plaintext_rx.recv() => match next {
                Some(plaintext) => plaintext,
                None => return,
            },
        };

        let frame = match cipher.encrypt(&plaintext) {
            Ok(frame) => frame,
            Err(e) => break ChannelError::ConnectionLost(e.to_string()),
        };
        tracing::trace!(counter = cipher.counter(), len = frame.len(), "Writing frame");

        tokio::select! {
            _ = shutdown.cancelled() => return,
            sent = outbound.send(frame) => {
                if sent.is_err() {
                    break ChannelError::ConnectionLost("link closed while writing".into());
                }
            }
        }
    };

    fail(&shutdown, sink.as_ref(), failure);
}

/// Decrypts inbound frames and dispatches them in arrival order.
async fn read_loop(
    mut cipher: ReceiveCipher,
    mut inbound: mpsc::Receiver<Vec<u8>>,
    sink: Arc<dyn InboundSink>,
    shutdown: CancellationToken,
) {
    let failure = loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => return,
            next = inbound.recv() => match next {
                Some(frame) => frame,
                None => break ChannelError::ConnectionLost("link closed by appliance".into()),
            },
        };

        let plaintext = match cipher.decrypt(&frame) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::error!(error = %e, "Rejecting inbound frame");
                break ChannelError::ConnectionLost(e.to_string());
            }
        };

        match AppMessage::decode(&plaintext) {
            Ok(message) => {
                tracing::trace!(opcode = ?message.opcode(), "Dispatching message");
                sink.on_message(message);
            }
            Err(e) if !e.is_fatal() => {
                tracing::warn!(error = %e, "Dropping undecodable message");
            }
            Err(e) => break ChannelError::ConnectionLost(e.to_string()),
        }
    };

    fail(&shutdown, sink.as_ref(), failure);
}

fn fail(shutdown: &CancellationToken, sink: &dyn InboundSink, reason: ChannelError) {
    if shutdown.is_cancelled() {
        return;
    }
    shutdown.cancel();
    sink.on_closed(reason);
}
