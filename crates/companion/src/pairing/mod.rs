//! Appliance identities, pinned keys and the local static key pair.
//!
//! - [`store`]: trust-on-first-use pairing store persisted as JSON
//! - [`keypair`]: the installation's Noise static key pair on disk

pub mod keypair;
pub mod store;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use keypair::load_or_generate;
pub use store::{PairingStore, PinCheck, PinnedKey};

/// Errors of the pairing store and key persistence.
#[derive(Debug, Error)]
pub enum PairingError {
    #[error("failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("pairing store lock poisoned")]
    LockPoisoned,

    #[error("unknown appliance {0}")]
    UnknownIdentity(Uuid),

    #[error("appliance {0} already has a different pinned key; re-pair explicitly to replace it")]
    AlreadyPinned(Uuid),

    #[error("appliance {identity} presented key {presented}, pinned key is {pinned}")]
    PinMismatch {
        identity: String,
        pinned: String,
        presented: String,
    },
}

/// One physical appliance as registered by the user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteIdentity {
    /// `host[:port]` the appliance listens on.
    pub address: String,
    /// Stable id, independent of the address.
    pub id: Uuid,
}

impl RemoteIdentity {
    /// Registers a newly discovered appliance under a fresh id.
    pub fn register(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            id: Uuid::new_v4(),
        }
    }
}

impl std::fmt::Display for RemoteIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.address, self.id)
    }
}

/// Short hex rendering of a key for logs and errors.
pub(crate) fn key_prefix(key: &[u8; 32]) -> String {
    hex::encode(&key[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_allocates_distinct_ids() {
        let a = RemoteIdentity::register("192.168.1.20:8845");
        let b = RemoteIdentity::register("192.168.1.20:8845");

        assert_eq!(a.address, b.address);
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.get_version_num(), 4);
    }

    #[test]
    fn test_identity_display() {
        let identity = RemoteIdentity {
            address: "base.local:8845".to_string(),
            id: Uuid::nil(),
        };
        assert_eq!(
            identity.to_string(),
            "base.local:8845 (00000000-0000-0000-0000-000000000000)"
        );
    }

    #[test]
    fn test_key_prefix() {
        let mut key = [0u8; 32];
        key[0] = 0xab;
        key[7] = 0xcd;
        assert_eq!(key_prefix(&key), "ab000000000000cd");
    }

    #[test]
    fn test_already_pinned_display() {
        let err = PairingError::AlreadyPinned(Uuid::nil());
        assert!(err.to_string().contains("re-pair explicitly"));
    }
}
