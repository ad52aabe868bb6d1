//! Application message definitions.
//!
//! A decrypted frame is `[opcode][body]`. Notifications from the appliance
//! carry an empty or MessagePack body; RPC traffic carries a MessagePack
//! [`RpcRequest`] or [`RpcResponse`].

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Version of the RPC method set understood by both ends.
pub const RPC_VERSION: u8 = 1;

/// One-byte tag at the start of every decrypted application message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Appliance status changed; body is a [`BaseStatus`].
    StatusChanged = b's',
    /// New sample info is available.
    SampleInfoChanged = b'd',
    /// Verification progress advanced.
    VerificationProgressChanged = b'p',
    /// The sender's user confirmed the channel fingerprint.
    PairingConfirmed = b'v',
    /// Body is an RPC envelope.
    Rpc = b'r',
}

impl Opcode {
    /// Classifies a raw opcode byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b's' => Some(Self::StatusChanged),
            b'd' => Some(Self::SampleInfoChanged),
            b'p' => Some(Self::VerificationProgressChanged),
            b'v' => Some(Self::PairingConfirmed),
            b'r' => Some(Self::Rpc),
            _ => None,
        }
    }

    /// Returns the wire byte.
    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Initialization and service status reported by the appliance.
///
/// Surfaced as a sub-state of an established connection; it never changes
/// the connection state itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BaseStatus {
    /// Connected, nothing else known yet.
    Connected,
    /// Waiting for the fingerprint to be confirmed.
    Unpaired,
    /// The appliance rejected the pairing.
    PairingFailed,
    /// Locked until the user authenticates.
    Locked,
    /// Bitcoin node not yet set up.
    BitcoinPre,
    /// Fully initialized.
    Initialized,
}

impl std::fmt::Display for BaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BaseStatus::Connected => "connected",
            BaseStatus::Unpaired => "unpaired",
            BaseStatus::PairingFailed => "pairing failed",
            BaseStatus::Locked => "locked",
            BaseStatus::BitcoinPre => "bitcoin setup pending",
            BaseStatus::Initialized => "initialized",
        };
        f.write_str(name)
    }
}

/// Named notifications without a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BaseEvent {
    /// Fetch [`Method::GetSampleInfo`] again.
    SampleInfoChanged,
    /// Fetch [`Method::GetVerificationProgress`] again.
    VerificationProgressChanged,
}

/// A decrypted application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppMessage {
    /// Appliance status notification.
    StatusChanged(BaseStatus),
    /// Named event notification.
    Event(BaseEvent),
    /// The peer's user confirmed the fingerprint.
    PairingConfirmed,
    /// Raw RPC envelope bytes, decoded by the call layer.
    Rpc(Vec<u8>),
}

impl AppMessage {
    /// Returns the opcode this message travels under.
    pub fn opcode(&self) -> Opcode {
        match self {
            AppMessage::StatusChanged(_) => Opcode::StatusChanged,
            AppMessage::Event(BaseEvent::SampleInfoChanged) => Opcode::SampleInfoChanged,
            AppMessage::Event(BaseEvent::VerificationProgressChanged) => {
                Opcode::VerificationProgressChanged
            }
            AppMessage::PairingConfirmed => Opcode::PairingConfirmed,
            AppMessage::Rpc(_) => Opcode::Rpc,
        }
    }

    /// Encodes the message as `[opcode][body]`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = vec![self.opcode().as_byte()];
        match self {
            AppMessage::StatusChanged(status) => out.extend(rmp_serde::to_vec(status)?),
            AppMessage::Rpc(body) => out.extend_from_slice(body),
            AppMessage::Event(_) | AppMessage::PairingConfirmed => {}
        }
        Ok(out)
    }

    /// Decodes a decrypted frame.
    ///
    /// Empty frames, unknown opcodes and undecodable status bodies produce
    /// non-fatal errors (see [`ProtocolError::is_fatal`]).
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (&byte, body) = data.split_first().ok_or(ProtocolError::EmptyMessage)?;
        let opcode = Opcode::from_byte(byte).ok_or(ProtocolError::UnknownOpcode(byte))?;

        Ok(match opcode {
            Opcode::StatusChanged => {
                let status = rmp_serde::from_slice(body).map_err(|e| {
                    ProtocolError::MalformedBody {
                        opcode: byte,
                        reason: e.to_string(),
                    }
                })?;
                AppMessage::StatusChanged(status)
            }
            Opcode::SampleInfoChanged => AppMessage::Event(BaseEvent::SampleInfoChanged),
            Opcode::VerificationProgressChanged => {
                AppMessage::Event(BaseEvent::VerificationProgressChanged)
            }
            Opcode::PairingConfirmed => AppMessage::PairingConfirmed,
            Opcode::Rpc => AppMessage::Rpc(body.to_vec()),
        })
    }
}

/// The fixed set of remote methods.
///
/// Serialized under their wire names (`RPCServer.<Name>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "&'static str", try_from = "String")]
pub enum Method {
    GetSystemEnv,
    GetSampleInfo,
    GetVerificationProgress,
    ResyncBitcoin,
    ReindexBitcoin,
    SetHostname,
    GetHostname,
    UserAuthenticate,
    UserChangePassword,
    MountFlashdrive,
    UnmountFlashdrive,
    BackupSysconfig,
    BackupHsmSecret,
    RestoreSysconfig,
    RestoreHsmSecret,
    GetBaseVersion,
}

impl Method {
    /// Every method, in declaration order.
    pub const ALL: [Method; 16] = [
        Method::GetSystemEnv,
        Method::GetSampleInfo,
        Method::GetVerificationProgress,
        Method::ResyncBitcoin,
        Method::ReindexBitcoin,
        Method::SetHostname,
        Method::GetHostname,
        Method::UserAuthenticate,
        Method::UserChangePassword,
        Method::MountFlashdrive,
        Method::UnmountFlashdrive,
        Method::BackupSysconfig,
        Method::BackupHsmSecret,
        Method::RestoreSysconfig,
        Method::RestoreHsmSecret,
        Method::GetBaseVersion,
    ];

    /// Returns the name the appliance dispatches on.
    pub fn wire_name(self) -> &'static str {
        match self {
            Method::GetSystemEnv => "RPCServer.GetSystemEnv",
            Method::GetSampleInfo => "RPCServer.GetSampleInfo",
            Method::GetVerificationProgress => "RPCServer.GetVerificationProgress",
            Method::ResyncBitcoin => "RPCServer.ResyncBitcoin",
            Method::ReindexBitcoin => "RPCServer.ReindexBitcoin",
            Method::SetHostname => "RPCServer.SetHostname",
            Method::GetHostname => "RPCServer.GetHostname",
            Method::UserAuthenticate => "RPCServer.UserAuthenticate",
            Method::UserChangePassword => "RPCServer.UserChangePassword",
            Method::MountFlashdrive => "RPCServer.MountFlashdrive",
            Method::UnmountFlashdrive => "RPCServer.UnmountFlashdrive",
            Method::BackupSysconfig => "RPCServer.BackupSysconfig",
            Method::BackupHsmSecret => "RPCServer.BackupHSMSecret",
            Method::RestoreSysconfig => "RPCServer.RestoreSysconfig",
            Method::RestoreHsmSecret => "RPCServer.RestoreHSMSecret",
            Method::GetBaseVersion => "RPCServer.GetBaseVersion",
        }
    }
}

impl From<Method> for &'static str {
    fn from(method: Method) -> Self {
        method.wire_name()
    }
}

impl TryFrom<String> for Method {
    type Error = String;

    fn try_from(name: String) -> std::result::Result<Self, Self::Error> {
        Method::ALL
            .into_iter()
            .find(|m| m.wire_name() == name)
            .ok_or_else(|| format!("unknown method: {}", name))
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// An RPC call as carried in an [`AppMessage::Rpc`] body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Correlation id echoed by the response.
    pub seq: u64,
    /// Method to invoke.
    pub method: Method,
    /// MessagePack-encoded arguments.
    #[serde(with = "serde_bytes")]
    pub args: Vec<u8>,
}

impl RpcRequest {
    /// Builds a request, encoding `args`.
    pub fn new<A: Serialize>(seq: u64, method: Method, args: &A) -> Result<Self> {
        Ok(Self {
            seq,
            method,
            args: rmp_serde::to_vec(args)?,
        })
    }

    /// Decodes the arguments.
    pub fn args<A: DeserializeOwned>(&self) -> Result<A> {
        Ok(rmp_serde::from_slice(&self.args)?)
    }

    /// Serialize the request to MessagePack bytes.
    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    /// Deserialize a request from MessagePack bytes.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Outcome of a remote call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcOutcome {
    /// MessagePack-encoded reply.
    Ok(#[serde(with = "serde_bytes")] Vec<u8>),
    /// Error string reported by the remote dispatcher.
    Err(String),
}

/// Reply to an [`RpcRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// The request's correlation id.
    pub seq: u64,
    /// Result of the call.
    pub outcome: RpcOutcome,
}

impl RpcResponse {
    /// Builds a successful response, encoding `reply`.
    pub fn ok<R: Serialize>(seq: u64, reply: &R) -> Result<Self> {
        Ok(Self {
            seq,
            outcome: RpcOutcome::Ok(rmp_serde::to_vec(reply)?),
        })
    }

    /// Builds a failed response.
    pub fn err(seq: u64, message: impl Into<String>) -> Self {
        Self {
            seq,
            outcome: RpcOutcome::Err(message.into()),
        }
    }

    /// Serialize the response to MessagePack bytes.
    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    /// Deserialize a response from MessagePack bytes.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

// Remote procedure payloads

/// Generic success/failure reply of most mutating methods.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: String,
}

impl ErrorResponse {
    /// A successful reply.
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// A failed reply with a machine-readable code.
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            code: code.into(),
        }
    }
}

/// Reply of [`Method::GetSystemEnv`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetEnvResponse {
    pub network: String,
    pub electrs_rpc_port: String,
}

/// Reply of [`Method::GetSampleInfo`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleInfoResponse {
    pub blocks: u64,
    pub difficulty: f64,
    pub lightning_alias: String,
}

/// Reply of [`Method::GetVerificationProgress`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationProgressResponse {
    pub blocks: u64,
    pub headers: u64,
    pub verification_progress: f64,
}

/// Arguments of [`Method::SetHostname`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetHostnameArgs {
    pub hostname: String,
}

/// Reply of [`Method::GetHostname`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetHostnameResponse {
    pub error_response: ErrorResponse,
    pub hostname: String,
}

/// Arguments of [`Method::UserAuthenticate`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAuthenticateArgs {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for UserAuthenticateArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserAuthenticateArgs")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Arguments of [`Method::UserChangePassword`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserChangePasswordArgs {
    pub username: String,
    pub new_password: String,
}

impl std::fmt::Debug for UserChangePasswordArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserChangePasswordArgs")
            .field("username", &self.username)
            .field("new_password", &"[REDACTED]")
            .finish()
    }
}

/// Reply of [`Method::GetBaseVersion`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetBaseVersionResponse {
    pub error_response: ErrorResponse,
    pub version: String,
}
