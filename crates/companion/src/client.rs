//! Connection façade.
//!
//! [`BaseClient`] ties the pieces together for one appliance: it establishes
//! the [`FrameTransport`], feeds inbound notifications into the
//! [`StateMachine`], routes RPC responses to the [`CallMultiplexer`] and
//! tears everything down when the link fails.
//!
//! A client is single-use: once closed it stays closed, and reconnecting
//! means creating a new client (and a fresh handshake).

use std::sync::{Arc, RwLock};
use std::time::Duration;

use protocol::{AppMessage, ChannelFingerprint, Method, StaticKeypair};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::config::ConnectionConfig;
use crate::error::{ChannelError, Result};
use crate::pairing::{PairingStore, PinCheck, RemoteIdentity};
use crate::rpc::CallMultiplexer;
use crate::state::{ChannelEvent, ConnectionState, PairingFlags, StateMachine};
use crate::transport::{Connector, FrameTransport, InboundSink};

/// Secure channel to one appliance.
pub struct BaseClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ConnectionConfig,
    identity: RemoteIdentity,
    keypair: StaticKeypair,
    store: Arc<PairingStore>,
    connector: Arc<dyn Connector>,
    machine: StateMachine,
    calls: CallMultiplexer,
    transport: RwLock<Option<Arc<FrameTransport>>>,
    shutdown: CancellationToken,
}

impl BaseClient {
    /// Creates a disconnected client.
    pub fn new(
        config: ConnectionConfig,
        identity: RemoteIdentity,
        keypair: StaticKeypair,
        store: Arc<PairingStore>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let calls = CallMultiplexer::new(config.serialize_calls);
        Self {
            inner: Arc::new(ClientInner {
                config,
                identity,
                keypair,
                store,
                connector,
                machine: StateMachine::new(),
                calls,
                transport: RwLock::new(None),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// The appliance this client talks to.
    pub fn identity(&self) -> &RemoteIdentity {
        &self.inner.identity
    }

    /// Connects and performs the handshake.
    ///
    /// Ends in `AwaitingPairing`, or directly in `Active` when the pinned key
    /// was verified in an earlier session. Any failure closes the client.
    pub async fn connect(&self) -> Result<ChannelFingerprint> {
        self.inner.machine.transition(ConnectionState::Connecting)?;
        self.inner.establish_or_close().await
    }

    /// Forgets the pinned key and performs a fresh handshake, pinning the key
    /// the appliance presents now.
    ///
    /// Pending calls fail with [`ChannelError::ConnectionLost`]; calls issued
    /// meanwhile wait for the new connection.
    pub async fn repair(&self) -> Result<ChannelFingerprint> {
        let inner = &self.inner;
        inner.machine.transition(ConnectionState::Connecting)?;
        tracing::info!(identity = %inner.identity, "Re-pairing with appliance");

        if let Some(transport) = inner.take_transport() {
            transport.close();
        }
        inner
            .calls
            .fail_all(&ChannelError::ConnectionLost("re-pairing".into()));

        if let Err(e) = inner.store.unpin(&inner.identity) {
            let err = ChannelError::from(e);
            inner.teardown(&err);
            return Err(err);
        }

        inner.establish_or_close().await
    }

    /// Issues a remote call, waiting until the connection allows calls.
    pub async fn call<A, R>(&self, method: Method, args: &A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        self.inner.machine.wait_until_callable().await?;
        let transport = self.inner.current_transport().ok_or_else(|| {
            ChannelError::ConnectionLost("connection is being re-established".into())
        })?;
        self.inner.calls.call(&*transport, method, args).await
    }

    /// Issues a remote call that must complete within `deadline`.
    ///
    /// On expiry the connection is closed, since an unread response cannot be
    /// skipped without losing track of the stream.
    pub async fn call_with_deadline<A, R>(
        &self,
        method: Method,
        args: &A,
        deadline: Duration,
    ) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        match tokio::time::timeout(deadline, self.call(method, args)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(%method, ?deadline, "Call deadline expired, closing connection");
                self.inner
                    .teardown(&ChannelError::Timeout(method.wire_name().to_string()));
                Err(ChannelError::Timeout(method.wire_name().to_string()))
            }
        }
    }

    /// Fingerprint of the current connection, for out-of-band comparison.
    pub fn fingerprint(&self) -> Option<ChannelFingerprint> {
        self.inner.current_transport().map(|t| t.fingerprint())
    }

    /// Records that the local user confirmed the fingerprint and tells the
    /// appliance.
    ///
    /// The connection becomes `Active` once the appliance's user has
    /// confirmed too.
    pub async fn confirm_fingerprint(&self) -> Result<PairingFlags> {
        let inner = &self.inner;
        let state = inner.machine.state();
        if !state.allows_calls() {
            return Err(if state == ConnectionState::Closed {
                ChannelError::Closed
            } else {
                ChannelError::InvalidTransition {
                    from: state,
                    to: ConnectionState::Active,
                }
            });
        }

        let transport = inner.current_transport().ok_or(ChannelError::Closed)?;
        transport.send(&AppMessage::PairingConfirmed).await?;

        let flags = inner.machine.confirm_local();
        tracing::info!(identity = %inner.identity, "Fingerprint confirmed locally");
        inner.maybe_activate();
        Ok(flags)
    }

    /// Closes the connection. Closing twice is a no-op.
    pub fn close(&self) {
        self.inner.teardown(&ChannelError::Closed);
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.machine.state()
    }

    /// Watches the connection state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.machine.watch()
    }

    /// Waits until `pred` holds for the connection state.
    pub async fn wait_for_state(
        &self,
        pred: impl Fn(ConnectionState) -> bool,
    ) -> ConnectionState {
        self.inner.machine.wait_until(pred).await
    }

    /// Current fingerprint confirmation flags.
    pub fn pairing_flags(&self) -> PairingFlags {
        self.inner.machine.flags()
    }

    /// Latest status reported by the appliance.
    pub fn status(&self) -> Option<protocol::BaseStatus> {
        self.inner.machine.status()
    }

    /// Subscribes to channel events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.machine.subscribe()
    }
}

impl Drop for BaseClient {
    fn drop(&mut self) {
        self.inner.teardown(&ChannelError::Closed);
    }
}

impl ClientInner {
    fn current_transport(&self) -> Option<Arc<FrameTransport>> {
        self.transport
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn take_transport(&self) -> Option<Arc<FrameTransport>> {
        self.transport
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    async fn establish_or_close(self: &Arc<Self>) -> Result<ChannelFingerprint> {
        match self.establish().await {
            Ok(fingerprint) => Ok(fingerprint),
            Err(e) => {
                self.teardown(&e);
                Err(e)
            }
        }
    }

    async fn establish(self: &Arc<Self>) -> Result<ChannelFingerprint> {
        self.machine.reset_pairing();

        let sink: Arc<dyn InboundSink> = Arc::clone(self) as Arc<dyn InboundSink>;
        let transport = FrameTransport::establish(
            self.connector.as_ref(),
            &self.identity,
            &self.keypair,
            &self.store,
            &self.config,
            sink,
            self.shutdown.child_token(),
        )
        .await?;

        let verified = matches!(transport.pin_check(), PinCheck::Known { verified: true });
        if let Err(e) = self.store.touch(&self.identity) {
            tracing::warn!(identity = %self.identity, error = %e, "Failed to record last contact");
        }
        self.machine.set_pin_verified(verified);

        let fingerprint = transport.fingerprint();
        *self
            .transport
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(transport));

        if self.shutdown.is_cancelled() {
            return Err(ChannelError::Closed);
        }
        let next = if verified {
            ConnectionState::Active
        } else {
            ConnectionState::AwaitingPairing
        };
        self.machine.transition(next)?;
        self.maybe_activate();

        Ok(fingerprint)
    }

    /// Promotes the connection once both users confirmed the fingerprint.
    fn maybe_activate(&self) {
        if self.machine.state() != ConnectionState::AwaitingPairing
            || !self.machine.flags().is_trusted()
        {
            return;
        }

        if let Err(e) = self.store.mark_verified(&self.identity) {
            tracing::warn!(identity = %self.identity, error = %e, "Failed to persist verification");
        }
        match self.machine.transition(ConnectionState::Active) {
            Ok(()) => tracing::info!(identity = %self.identity, "Appliance paired"),
            Err(e) => tracing::debug!(error = %e, "Activation raced with another transition"),
        }
    }

    /// Closes everything once. Later calls are no-ops.
    fn teardown(&self, reason: &ChannelError) {
        if !self.machine.close() {
            return;
        }
        match reason {
            ChannelError::Closed => {
                tracing::info!(identity = %self.identity, "Channel closed")
            }
            other => {
                tracing::error!(identity = %self.identity, error = %other, "Channel torn down")
            }
        }

        self.shutdown.cancel();
        if let Some(transport) = self.take_transport() {
            transport.close();
        }
        self.calls.close(reason);
    }
}

impl InboundSink for ClientInner {
    fn on_message(&self, message: AppMessage) {
        match message {
            AppMessage::StatusChanged(status) => self.machine.set_status(status),
            AppMessage::Event(event) => self.machine.publish_event(event),
            AppMessage::PairingConfirmed => {
                tracing::info!(identity = %self.identity, "Appliance user confirmed the fingerprint");
                self.machine.confirm_remote();
                self.maybe_activate();
            }
            AppMessage::Rpc(body) => {
                if let Err(e) = self.calls.handle_response(&body) {
                    self.teardown(&e);
                }
            }
        }
    }

    fn on_closed(&self, reason: ChannelError) {
        self.teardown(&reason);
    }
}
