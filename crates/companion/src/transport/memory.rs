//! In-process connector.
//!
//! Every `open` creates a pair of bounded queues and hands the far end to the
//! paired [`MemoryAcceptor`], which plays the appliance. Used by tests and
//! local simulations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::{BoxFuture, Connector, RawLink};
use crate::error::{ChannelError, Result};

/// Connector whose links end in a [`MemoryAcceptor`].
pub struct MemoryConnector {
    acceptor_tx: mpsc::UnboundedSender<RawLink>,
    reachable: AtomicBool,
    capacity: usize,
}

/// Far end of a [`MemoryConnector`].
pub struct MemoryAcceptor {
    links: Mutex<mpsc::UnboundedReceiver<RawLink>>,
}

impl MemoryConnector {
    /// Creates a connected connector/acceptor pair whose link queues hold
    /// `capacity` frames.
    pub fn pair(capacity: usize) -> (Self, MemoryAcceptor) {
        let (acceptor_tx, acceptor_rx) = mpsc::unbounded_channel();
        (
            Self {
                acceptor_tx,
                reachable: AtomicBool::new(true),
                capacity: capacity.max(1),
            },
            MemoryAcceptor {
                links: Mutex::new(acceptor_rx),
            },
        )
    }

    /// Makes the liveness probe fail (or succeed again).
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn check_reachable(&self, address: &str) -> Result<()> {
        if !self.reachable.load(Ordering::SeqCst) || self.acceptor_tx.is_closed() {
            return Err(ChannelError::Unreachable(format!(
                "{} is not accepting connections",
                address
            )));
        }
        Ok(())
    }
}

impl Connector for MemoryConnector {
    fn probe<'a>(&'a self, address: &'a str, _timeout: Duration) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.check_reachable(address) })
    }

    fn open<'a>(
        &'a self,
        address: &'a str,
        _shutdown: CancellationToken,
    ) -> BoxFuture<'a, Result<RawLink>> {
        // Memory links have no pump tasks; they close when the transport
        // drops its halves.
        Box::pin(async move {
            self.check_reachable(address)?;

            let (to_far, from_near) = mpsc::channel(self.capacity);
            let (to_near, from_far) = mpsc::channel(self.capacity);
            let far = RawLink {
                outbound: to_near,
                inbound: from_near,
            };
            self.acceptor_tx
                .send(far)
                .map_err(|_| ChannelError::Unreachable(format!("{} went away", address)))?;

            tracing::debug!(address, "Opened in-memory link");
            Ok(RawLink {
                outbound: to_far,
                inbound: from_far,
            })
        })
    }
}

impl MemoryAcceptor {
    /// Waits for the next link. Returns `None` once the connector is dropped.
    pub async fn accept(&self) -> Option<RawLink> {
        self.links.lock().await.recv().await
    }
}
