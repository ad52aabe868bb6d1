//! Simulated appliance for channel tests.
//!
//! The appliance accepts one link from a [`MemoryConnector`], runs the
//! responder side of the Noise handshake and then answers RPC requests,
//! while the test pushes notifications through an [`ApplianceHandle`].

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use companion::config::ConnectionConfig;
use companion::pairing::{PairingStore, RemoteIdentity};
use companion::protocol::{
    AppMessage, ChannelFingerprint, ErrorResponse, GetBaseVersionResponse, GetEnvResponse,
    GetHostnameResponse, Method, NoiseSession, RpcRequest, RpcResponse, SampleInfoResponse,
    SetHostnameArgs, StaticKeypair, UserAuthenticateArgs, VerificationProgressResponse,
};
use companion::transport::Connector;
use companion::{BaseClient, MemoryAcceptor, MemoryConnector};
use tempfile::TempDir;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// How long tests wait for something the appliance should observe.
pub const OBSERVE_TIMEOUT: Duration = Duration::from_secs(2);

/// Password accepted by the simulated appliance.
pub const PASSWORD: &str = "correct horse battery staple";

/// Pairing store, identity and connector shared by the clients of one test.
pub struct Harness {
    _dir: TempDir,
    pub store: Arc<PairingStore>,
    pub identity: RemoteIdentity,
    pub keypair: StaticKeypair,
    pub connector: Arc<MemoryConnector>,
    pub acceptor: Arc<MemoryAcceptor>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(PairingStore::new(dir.path().join("pinned_keys.json")));
        let identity = store.register("base-1.local:8845").unwrap();
        let (connector, acceptor) = MemoryConnector::pair(32);
        Self {
            _dir: dir,
            store,
            identity,
            keypair: StaticKeypair::generate().unwrap(),
            connector: Arc::new(connector),
            acceptor: Arc::new(acceptor),
        }
    }

    pub fn config() -> ConnectionConfig {
        ConnectionConfig {
            handshake_timeout_secs: 2,
            ..Default::default()
        }
    }

    /// A fresh client with the default (serialized) call discipline.
    pub fn client(&self) -> Arc<BaseClient> {
        self.client_with(Self::config())
    }

    pub fn client_with(&self, config: ConnectionConfig) -> Arc<BaseClient> {
        let connector: Arc<dyn Connector> = self.connector.clone();
        Arc::new(BaseClient::new(
            config,
            self.identity.clone(),
            self.keypair.clone(),
            Arc::clone(&self.store),
            connector,
        ))
    }

    /// Starts an appliance that accepts the next link.
    pub fn spawn_appliance(&self, keypair: StaticKeypair) -> ApplianceHandle {
        ApplianceHandle::spawn(Arc::clone(&self.acceptor), keypair)
    }
}

/// Something the appliance observed.
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    /// The companion never sent the final handshake message.
    HandshakeAborted,
    /// A `PairingConfirmed` frame.
    Confirmed,
    /// An RPC request.
    Request(RpcRequest),
    /// The companion closed the link.
    Closed,
}

enum Control {
    Send(AppMessage),
    SendPlaintext(Vec<u8>),
    SendTampered(AppMessage),
    Disconnect,
}

/// Appliance-side application state.
pub struct ApplianceState {
    hostname: Mutex<String>,
    /// Answer requests at all.
    pub respond: AtomicBool,
    /// Delay before each answer, in milliseconds.
    pub delay_ms: AtomicU64,
}

impl Default for ApplianceState {
    fn default() -> Self {
        Self {
            hostname: Mutex::new("bitbox-base".to_string()),
            respond: AtomicBool::new(true),
            delay_ms: AtomicU64::new(0),
        }
    }
}

impl ApplianceState {
    fn handle(&self, request: &RpcRequest) -> Option<RpcResponse> {
        if !self.respond.load(Ordering::SeqCst) {
            return None;
        }
        let seq = request.seq;
        let response = match request.method {
            Method::GetHostname => RpcResponse::ok(
                seq,
                &GetHostnameResponse {
                    error_response: ErrorResponse::ok(),
                    hostname: self.hostname.lock().unwrap().clone(),
                },
            ),
            Method::SetHostname => {
                let args: SetHostnameArgs = request.args().unwrap();
                if args.hostname.is_empty() {
                    RpcResponse::ok(
                        seq,
                        &ErrorResponse::failure("INVALID_HOSTNAME", "hostname must not be empty"),
                    )
                } else {
                    *self.hostname.lock().unwrap() = args.hostname;
                    RpcResponse::ok(seq, &ErrorResponse::ok())
                }
            }
            Method::UserAuthenticate => {
                let args: UserAuthenticateArgs = request.args().unwrap();
                if args.password == PASSWORD {
                    RpcResponse::ok(seq, &ErrorResponse::ok())
                } else {
                    RpcResponse::ok(
                        seq,
                        &ErrorResponse::failure("AUTHENTICATION_FAILED", "wrong password"),
                    )
                }
            }
            Method::GetBaseVersion => RpcResponse::ok(
                seq,
                &GetBaseVersionResponse {
                    error_response: ErrorResponse::ok(),
                    version: "0.0.4".to_string(),
                },
            ),
            Method::GetSystemEnv => RpcResponse::ok(
                seq,
                &GetEnvResponse {
                    network: "testnet".to_string(),
                    electrs_rpc_port: "51002".to_string(),
                },
            ),
            Method::GetSampleInfo => RpcResponse::ok(
                seq,
                &SampleInfoResponse {
                    blocks: 1_600_000,
                    difficulty: 1.0,
                    lightning_alias: "base-1".to_string(),
                },
            ),
            Method::GetVerificationProgress => RpcResponse::ok(
                seq,
                &VerificationProgressResponse {
                    blocks: 800,
                    headers: 1000,
                    verification_progress: 0.8,
                },
            ),
            Method::MountFlashdrive => Ok(RpcResponse::err(seq, "no flashdrive inserted")),
            _ => RpcResponse::ok(seq, &ErrorResponse::ok()),
        };
        Some(response.unwrap())
    }
}

/// Test-side control of a running simulated appliance.
pub struct ApplianceHandle {
    control: mpsc::UnboundedSender<Control>,
    seen: mpsc::UnboundedReceiver<Seen>,
    fingerprint: Option<oneshot::Receiver<ChannelFingerprint>>,
    pub state: Arc<ApplianceState>,
    task: JoinHandle<()>,
}

impl ApplianceHandle {
    fn spawn(acceptor: Arc<MemoryAcceptor>, keypair: StaticKeypair) -> Self {
        let (control, control_rx) = mpsc::unbounded_channel();
        let (seen_tx, seen) = mpsc::unbounded_channel();
        let (fingerprint_tx, fingerprint) = oneshot::channel();
        let state = Arc::new(ApplianceState::default());

        let task = tokio::spawn(run(
            acceptor,
            keypair,
            Arc::clone(&state),
            control_rx,
            seen_tx,
            fingerprint_tx,
        ));

        Self {
            control,
            seen,
            fingerprint: Some(fingerprint),
            state,
            task,
        }
    }

    /// Fingerprint the appliance computed, once its handshake completed.
    pub async fn fingerprint(&mut self) -> Option<ChannelFingerprint> {
        let rx = self.fingerprint.take()?;
        tokio::time::timeout(OBSERVE_TIMEOUT, rx).await.ok()?.ok()
    }

    pub fn send(&self, message: AppMessage) {
        let _ = self.control.send(Control::Send(message));
    }

    /// Sends an arbitrary decrypted payload, opcode included.
    pub fn send_plaintext(&self, plaintext: Vec<u8>) {
        let _ = self.control.send(Control::SendPlaintext(plaintext));
    }

    /// Sends a message whose frame has one bit flipped.
    pub fn send_tampered(&self, message: AppMessage) {
        let _ = self.control.send(Control::SendTampered(message));
    }

    /// The appliance's user confirms the fingerprint.
    pub fn confirm(&self) {
        self.send(AppMessage::PairingConfirmed);
    }

    pub fn disconnect(&self) {
        let _ = self.control.send(Control::Disconnect);
    }

    /// Next observation, if any arrives in time.
    pub async fn next_seen(&mut self) -> Option<Seen> {
        tokio::time::timeout(OBSERVE_TIMEOUT, self.seen.recv())
            .await
            .ok()
            .flatten()
    }

    /// Waits for the appliance task to finish.
    pub async fn join(self) {
        let _ = tokio::time::timeout(OBSERVE_TIMEOUT, self.task).await;
    }
}

async fn run(
    acceptor: Arc<MemoryAcceptor>,
    keypair: StaticKeypair,
    state: Arc<ApplianceState>,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
    seen: mpsc::UnboundedSender<Seen>,
    fingerprint_tx: oneshot::Sender<ChannelFingerprint>,
) {
    let Some(mut link) = acceptor.accept().await else {
        return;
    };

    // Responder side of XX
    let mut noise = NoiseSession::new_responder(&keypair).unwrap();
    let Some(msg1) = link.inbound.recv().await else {
        return;
    };
    noise.read_handshake_message(&msg1).unwrap();
    let msg2 = noise.write_handshake_message(&[]).unwrap();
    if link.outbound.send(msg2).await.is_err() {
        return;
    }
    let Some(msg3) = link.inbound.recv().await else {
        let _ = seen.send(Seen::HandshakeAborted);
        return;
    };
    noise.read_handshake_message(&msg3).unwrap();

    let cipher = noise.into_cipher_session().unwrap();
    let _ = fingerprint_tx.send(cipher.fingerprint());
    let (mut send, mut receive) = cipher.split();

    loop {
        tokio::select! {
            control = control_rx.recv() => {
                let frame = match control {
                    Some(Control::Send(message)) => send.encrypt(&message.encode().unwrap()).unwrap(),
                    Some(Control::SendPlaintext(plaintext)) => send.encrypt(&plaintext).unwrap(),
                    Some(Control::SendTampered(message)) => {
                        let mut frame = send.encrypt(&message.encode().unwrap()).unwrap();
                        let middle = frame.len() / 2;
                        frame[middle] ^= 0x10;
                        frame
                    }
                    Some(Control::Disconnect) | None => return,
                };
                if link.outbound.send(frame).await.is_err() {
                    let _ = seen.send(Seen::Closed);
                    return;
                }
            }
            frame = link.inbound.recv() => {
                let Some(frame) = frame else {
                    let _ = seen.send(Seen::Closed);
                    return;
                };
                let plaintext = receive.decrypt(&frame).unwrap();
                match AppMessage::decode(&plaintext).unwrap() {
                    AppMessage::PairingConfirmed => {
                        let _ = seen.send(Seen::Confirmed);
                    }
                    AppMessage::Rpc(body) => {
                        let request = RpcRequest::from_msgpack(&body).unwrap();
                        let _ = seen.send(Seen::Request(request.clone()));
                        if let Some(response) = state.handle(&request) {
                            let delay = state.delay_ms.load(Ordering::SeqCst);
                            if delay > 0 {
                                tokio::time::sleep(Duration::from_millis(delay)).await;
                            }
                            let message = AppMessage::Rpc(response.to_msgpack().unwrap());
                            let frame = send.encrypt(&message.encode().unwrap()).unwrap();
                            if link.outbound.send(frame).await.is_err() {
                                let _ = seen.send(Seen::Closed);
                                return;
                            }
                        }
                    }
                    other => panic!("appliance received unexpected message: {:?}", other),
                }
            }
        }
    }
}
