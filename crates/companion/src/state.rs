//! Connection state machine.
//!
//! ```text
//! Disconnected ──► Connecting ──(handshake ok)──► AwaitingPairing ──(both confirmed)──► Active
//!                      ▲   └──(pin already verified)──────────────────────────────────────┘
//!                      └──────────────── explicit re-pair ◄──────────────────────────────┘
//!
//! every state except Closed ──► Closed (terminal)
//! ```
//!
//! The current state lives in a `watch` channel so readers never observe a
//! torn value and callers can wait for a state. Every transition and every
//! notification is published, in order, on a `broadcast` channel.

use std::sync::Mutex;

use protocol::{BaseEvent, BaseStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::error::{ChannelError, Result};

/// Buffer size for event broadcast channel.
const EVENT_BUFFER_SIZE: usize = 64;

/// Top-level state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    /// Not connected.
    Disconnected,
    /// Probing, opening the socket or handshaking.
    Connecting,
    /// Handshake done; waiting for both users to confirm the fingerprint.
    AwaitingPairing,
    /// Paired and trusted.
    Active,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Returns whether RPC calls may be issued in this state.
    pub fn allows_calls(self) -> bool {
        matches!(self, ConnectionState::AwaitingPairing | ConnectionState::Active)
    }

    /// Structural transition table; see [`StateMachine::transition`] for the
    /// pairing preconditions.
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, to),
            (Disconnected, Connecting)
                | (Connecting, AwaitingPairing)
                | (Connecting, Active)
                | (AwaitingPairing, Active)
                | (AwaitingPairing, Connecting)
                | (Active, Connecting)
                | (Disconnected, Closed)
                | (Connecting, Closed)
                | (AwaitingPairing, Closed)
                | (Active, Closed)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingPairing => "awaiting-pairing",
            ConnectionState::Active => "active",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// The two halves of fingerprint confirmation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingFlags {
    /// The local user confirmed the fingerprint.
    pub local_verified: bool,
    /// The appliance reported that its user confirmed the fingerprint.
    pub remote_verified: bool,
}

impl PairingFlags {
    /// Both sides confirmed.
    pub fn is_trusted(&self) -> bool {
        self.local_verified && self.remote_verified
    }
}

/// Notifications delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ChannelEvent {
    /// The top-level state changed.
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// The appliance reported a new status.
    StatusChanged(BaseStatus),
    /// The appliance fired a named event.
    Event(BaseEvent),
    /// A fingerprint confirmation flag changed.
    FingerprintVerification(PairingFlags),
}

#[derive(Debug, Default)]
struct Inner {
    flags: PairingFlags,
    status: Option<BaseStatus>,
    pin_verified: bool,
}

/// Owner of the connection state; transitions are the only mutation path.
pub struct StateMachine {
    state_tx: watch::Sender<ConnectionState>,
    inner: Mutex<Inner>,
    event_tx: broadcast::Sender<ChannelEvent>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Creates a machine in `Disconnected`.
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self {
            state_tx,
            inner: Mutex::new(Inner::default()),
            event_tx,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Returns a receiver that observes state changes.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Subscribes to channel events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.event_tx.subscribe()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Inner holds plain data; a panic elsewhere cannot leave it torn.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: ChannelEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.event_tx.send(event);
    }

    /// Moves to `to`.
    ///
    /// Besides the transition table, `Connecting -> Active` requires that the
    /// pinned key was verified in an earlier session, and
    /// `AwaitingPairing -> Active` requires both confirmation flags.
    pub fn transition(&self, to: ConnectionState) -> Result<()> {
        let inner = self.lock();
        let from = self.state();

        let allowed = from.can_transition_to(to)
            && match (from, to) {
                (ConnectionState::Connecting, ConnectionState::Active) => inner.pin_verified,
                (ConnectionState::AwaitingPairing, ConnectionState::Active) => {
                    inner.flags.is_trusted()
                }
                _ => true,
            };
        if !allowed {
            return Err(ChannelError::InvalidTransition { from, to });
        }

        self.state_tx.send_replace(to);
        tracing::info!(%from, %to, "Connection state changed");
        self.emit(ChannelEvent::StateChanged { from, to });
        Ok(())
    }

    /// Moves to `Closed` unless already there.
    ///
    /// Returns whether this call performed the transition; only that call
    /// emits the `StateChanged` event.
    pub fn close(&self) -> bool {
        let _inner = self.lock();
        let from = self.state();
        if from == ConnectionState::Closed {
            return false;
        }

        self.state_tx.send_replace(ConnectionState::Closed);
        tracing::info!(%from, "Connection closed");
        self.emit(ChannelEvent::StateChanged {
            from,
            to: ConnectionState::Closed,
        });
        true
    }

    /// Records whether the pinned key of this appliance was verified in an
    /// earlier session.
    pub fn set_pin_verified(&self, verified: bool) {
        self.lock().pin_verified = verified;
    }

    /// Returns the confirmation flags.
    pub fn flags(&self) -> PairingFlags {
        self.lock().flags
    }

    /// Sets the local confirmation flag and returns the updated flags.
    pub fn confirm_local(&self) -> PairingFlags {
        self.update_flags(|f| f.local_verified = true)
    }

    /// Sets the remote confirmation flag and returns the updated flags.
    pub fn confirm_remote(&self) -> PairingFlags {
        self.update_flags(|f| f.remote_verified = true)
    }

    fn update_flags(&self, f: impl FnOnce(&mut PairingFlags)) -> PairingFlags {
        let mut inner = self.lock();
        let before = inner.flags;
        f(&mut inner.flags);
        let after = inner.flags;
        if after != before {
            self.emit(ChannelEvent::FingerprintVerification(after));
        }
        after
    }

    /// Clears confirmation state ahead of a fresh handshake.
    pub fn reset_pairing(&self) {
        let mut inner = self.lock();
        inner.flags = PairingFlags::default();
        inner.pin_verified = false;
        inner.status = None;
    }

    /// Returns the latest appliance status.
    pub fn status(&self) -> Option<BaseStatus> {
        self.lock().status
    }

    /// Records an appliance status; the top-level state is unaffected.
    pub fn set_status(&self, status: BaseStatus) {
        let mut inner = self.lock();
        inner.status = Some(status);
        tracing::debug!(%status, "Appliance status changed");
        self.emit(ChannelEvent::StatusChanged(status));
    }

    /// Publishes a named appliance event.
    pub fn publish_event(&self, event: BaseEvent) {
        let _inner = self.lock();
        tracing::debug!(?event, "Appliance event");
        self.emit(ChannelEvent::Event(event));
    }

    /// Waits until calls are allowed.
    ///
    /// Fails with [`ChannelError::Closed`] once the machine is closed.
    pub async fn wait_until_callable(&self) -> Result<()> {
        let state = self
            .wait_until(|s| s.allows_calls() || s == ConnectionState::Closed)
            .await;
        if state == ConnectionState::Closed {
            Err(ChannelError::Closed)
        } else {
            Ok(())
        }
    }

    /// Waits until `pred` holds for the current state and returns that state.
    pub async fn wait_until(
        &self,
        pred: impl Fn(ConnectionState) -> bool,
    ) -> ConnectionState {
        let mut rx = self.state_tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let state = match rx.wait_for(|s| pred(*s)).await {
            Ok(state) => *state,
            Err(_) => ConnectionState::Closed,
        };
        state
    }
}
