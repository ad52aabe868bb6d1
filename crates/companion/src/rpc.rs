//! Call multiplexer.
//!
//! Turns the message-oriented channel into `call(method, args) -> reply`.
//! Every request carries a correlation id (`seq`) that the appliance echoes
//! in its response. Admission is bounded by a semaphore: with one permit
//! (the default) at most one call is outstanding on the connection, as the
//! appliance's classic RPC binding expects; with more permits calls may be in
//! flight concurrently and are told apart by `seq`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;
use protocol::{Method, RpcOutcome, RpcRequest, RpcResponse};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{oneshot, Semaphore};

use crate::error::{ChannelError, Result};
use crate::transport::BoxFuture;

/// Outbound path for encoded RPC envelopes.
pub trait RequestSink: Send + Sync {
    /// Sends one encoded [`RpcRequest`] as a single application frame.
    fn send_request<'a>(&'a self, body: Vec<u8>) -> BoxFuture<'a, Result<()>>;
}

/// A call waiting for its response.
struct PendingCall {
    method: Method,
    reply: oneshot::Sender<Result<Vec<u8>>>,
}

/// Removes a pending entry when the calling future is dropped early.
struct PendingGuard<'a> {
    pending: &'a DashMap<u64, PendingCall>,
    seq: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.seq);
    }
}

/// Correlates requests and responses over one connection.
pub struct CallMultiplexer {
    next_seq: AtomicU64,
    pending: DashMap<u64, PendingCall>,
    admission: Semaphore,
    /// Set by `close`; calls registered afterwards fail with it.
    closed: Mutex<Option<ChannelError>>,
}

impl CallMultiplexer {
    /// Creates a multiplexer.
    ///
    /// With `serialize_calls` only one call is admitted at a time; the others
    /// wait for its response.
    pub fn new(serialize_calls: bool) -> Self {
        let permits = if serialize_calls {
            1
        } else {
            Semaphore::MAX_PERMITS
        };
        Self {
            next_seq: AtomicU64::new(1),
            pending: DashMap::new(),
            admission: Semaphore::new(permits),
            closed: Mutex::new(None),
        }
    }

    /// Number of calls waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Issues a call and waits for its reply.
    ///
    /// Dropping the returned future abandons the call; a late response for
    /// it is then logged and discarded.
    pub async fn call<A, R>(&self, sink: &dyn RequestSink, method: Method, args: &A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let _permit = self
            .admission
            .acquire()
            .await
            .map_err(|_| ChannelError::Closed)?;

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let body = RpcRequest::new(seq, method, args)
            .and_then(|request| request.to_msgpack())
            .map_err(|e| ChannelError::Payload {
                method: method.wire_name().to_string(),
                reason: e.to_string(),
            })?;

        let (tx, rx) = oneshot::channel();
        let _guard = self.register(seq, method, tx)?;

        tracing::debug!(seq, %method, "Sending call");
        sink.send_request(body).await?;

        let reply = rx.await.map_err(|_| ChannelError::Closed)??;

        rmp_serde::from_slice(&reply).map_err(|e| ChannelError::Payload {
            method: method.wire_name().to_string(),
            reason: e.to_string(),
        })
    }

    /// Inserts a pending entry, unless the multiplexer was closed meanwhile.
    ///
    /// `close` sets the flag before failing pending calls, so an entry
    /// inserted concurrently is either failed there or rejected here.
    fn register(
        &self,
        seq: u64,
        method: Method,
        reply: oneshot::Sender<Result<Vec<u8>>>,
    ) -> Result<PendingGuard<'_>> {
        self.pending.insert(seq, PendingCall { method, reply });
        let guard = PendingGuard {
            pending: &self.pending,
            seq,
        };
        if let Some(reason) = self
            .closed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
        {
            return Err(pending_error(reason));
        }
        Ok(guard)
    }

    /// Completes the pending call a response belongs to.
    ///
    /// A body that is not a valid response is a framing error and returned to
    /// the caller, which must tear the connection down. A response for an
    /// unknown `seq` is dropped.
    pub fn handle_response(&self, body: &[u8]) -> Result<()> {
        let response = RpcResponse::from_msgpack(body)
            .map_err(|e| ChannelError::ConnectionLost(format!("malformed rpc response: {}", e)))?;

        let Some((_, call)) = self.pending.remove(&response.seq) else {
            tracing::warn!(seq = response.seq, "Dropping response for unknown call");
            return Ok(());
        };

        let result = match response.outcome {
            RpcOutcome::Ok(reply) => Ok(reply),
            RpcOutcome::Err(message) => Err(ChannelError::Remote {
                method: call.method.wire_name().to_string(),
                message,
            }),
        };
        tracing::debug!(seq = response.seq, method = %call.method, ok = result.is_ok(), "Call completed");

        // The caller may have given up already
        let _ = call.reply.send(result);
        Ok(())
    }

    /// Fails every pending call with an error derived from `reason`.
    pub fn fail_all(&self, reason: &ChannelError) {
        let seqs: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for seq in seqs {
            if let Some((_, call)) = self.pending.remove(&seq) {
                tracing::debug!(seq, method = %call.method, %reason, "Failing pending call");
                let _ = call.reply.send(Err(pending_error(reason)));
            }
        }
    }

    /// Rejects all future calls and fails the pending ones.
    pub fn close(&self, reason: &ChannelError) {
        self.closed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get_or_insert_with(|| pending_error(reason));
        self.admission.close();
        self.fail_all(reason);
    }
}

/// Error handed to one pending call when the connection ends for `reason`.
fn pending_error(reason: &ChannelError) -> ChannelError {
    match reason {
        ChannelError::Closed => ChannelError::Closed,
        ChannelError::ConnectionLost(msg) => ChannelError::ConnectionLost(msg.clone()),
        ChannelError::Timeout(what) => ChannelError::Timeout(what.clone()),
        other => ChannelError::ConnectionLost(other.to_string()),
    }
}
