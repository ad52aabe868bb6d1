//! WebSocket connector.
//!
//! The appliance serves a plain HTTP root (the liveness probe) and upgrades a
//! fixed path to a WebSocket carrying one binary message per frame.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{BoxFuture, Connector, RawLink};
use crate::config::ConnectionConfig;
use crate::error::{ChannelError, Result};

/// Connector for appliances reachable at `host[:port]`.
pub struct WebSocketConnector {
    ws_path: String,
    queue: usize,
    connect_timeout: Duration,
    http: reqwest::Client,
}

impl WebSocketConnector {
    /// Creates a connector from the connection settings.
    pub fn new(config: &ConnectionConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ChannelError::Unreachable(format!("http client: {}", e)))?;
        Ok(Self {
            ws_path: config.ws_path.clone(),
            queue: config.outbound_queue,
            connect_timeout: config.handshake_timeout(),
            http,
        })
    }

    fn probe_url(address: &str) -> Result<Url> {
        Url::parse(&format!("http://{}/", address))
            .map_err(|e| ChannelError::Unreachable(format!("invalid address {}: {}", address, e)))
    }

    fn ws_url(&self, address: &str) -> Result<Url> {
        Url::parse(&format!("ws://{}{}", address, self.ws_path))
            .map_err(|e| ChannelError::Unreachable(format!("invalid address {}: {}", address, e)))
    }
}

impl Connector for WebSocketConnector {
    fn probe<'a>(&'a self, address: &'a str, timeout: Duration) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let url = Self::probe_url(address)?;
            let response = self
                .http
                .get(url)
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| ChannelError::Unreachable(format!("{}: {}", address, e)))?;

            let status = response.status();
            if !status.is_success() {
                return Err(ChannelError::Unreachable(format!(
                    "{} answered the liveness probe with {}",
                    address, status
                )));
            }
            tracing::debug!(address, %status, "Liveness probe succeeded");
            Ok(())
        })
    }

    fn open<'a>(
        &'a self,
        address: &'a str,
        shutdown: CancellationToken,
    ) -> BoxFuture<'a, Result<RawLink>> {
        Box::pin(async move {
            let url = self.ws_url(address)?;
            let connecting = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()));
            let (ws_stream, _) = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(ChannelError::Closed),
                connected = connecting => connected
                    .map_err(|_| {
                        ChannelError::Unreachable(format!(
                            "WebSocket upgrade at {} got no answer within {:?}",
                            url, self.connect_timeout
                        ))
                    })?
                    .map_err(|e| {
                        ChannelError::Unreachable(format!("WebSocket connection failed: {}", e))
                    })?,
            };
            tracing::debug!(%url, "WebSocket connected");

            let (mut ws_sink, mut ws_stream) = ws_stream.split();
            let (outbound, mut outbound_rx) = mpsc::channel::<Vec<u8>>(self.queue);
            let (inbound_tx, inbound) = mpsc::channel::<Vec<u8>>(self.queue);

            // Writer pump
            let writer_shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = writer_shutdown.cancelled() => break,
                        next = outbound_rx.recv() => match next {
                            Some(frame) => {
                                if let Err(e) = ws_sink.send(WsMessage::Binary(frame)).await {
                                    tracing::warn!("failed to send WebSocket message: {}", e);
                                    break;
                                }
                            }
                            None => break,
                        },
                    }
                }
                let _ = ws_sink.close().await;
                tracing::debug!("WebSocket writer stopped");
            });

            // Reader pump
            tokio::spawn(async move {
                loop {
                    let next = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        next = ws_stream.next() => next,
                    };
                    match next {
                        Some(Ok(WsMessage::Binary(data))) => {
                            if inbound_tx.send(data).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(WsMessage::Text(_))) => {
                            tracing::warn!("Ignoring text message on binary channel");
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            tracing::debug!(?frame, "Appliance closed the WebSocket");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!("WebSocket error: {}", e);
                            break;
                        }
                        None => break,
                    }
                }
                tracing::debug!("WebSocket reader stopped");
            });

            Ok(RawLink { outbound, inbound })
        })
    }
}
