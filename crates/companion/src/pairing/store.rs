//! Persistent pairing store.
//!
//! Maps each registered appliance to the static public key it presented on
//! first contact. Persists to JSON at `~/.config/basewire/pinned_keys.json`.
//! Every mutation is written through to disk before it returns.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{key_prefix, PairingError, RemoteIdentity};

type Result<T> = std::result::Result<T, PairingError>;

/// A registered appliance and its pinned key, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedKey {
    /// The appliance.
    pub identity: RemoteIdentity,
    /// Static public key pinned on first use.
    #[serde(with = "optional_key_serde", default)]
    pub public_key: Option<[u8; 32]>,
    /// Whether both users confirmed the fingerprint of a session with this key.
    #[serde(default)]
    pub verified: bool,
    /// When the key was pinned.
    #[serde(default)]
    pub pinned_at: Option<SystemTime>,
    /// Last successful handshake.
    #[serde(default)]
    pub last_seen: Option<SystemTime>,
}

impl PinnedKey {
    fn registered(identity: RemoteIdentity) -> Self {
        Self {
            identity,
            public_key: None,
            verified: false,
            pinned_at: None,
            last_seen: None,
        }
    }
}

/// Outcome of the trust-on-first-use check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinCheck {
    /// No key was pinned; the presented key is now pinned, unverified.
    FirstUse,
    /// The presented key matches the pinned one.
    Known {
        /// Whether the fingerprint was confirmed in an earlier session.
        verified: bool,
    },
}

/// Serde support for an optional public key (serializes as base64).
mod optional_key_serde {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(key: &Option<[u8; 32]>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        key.map(|k| base64::engine::general_purpose::STANDARD.encode(k))
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<[u8; 32]>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Option<String> = Deserialize::deserialize(deserializer)?;
        let Some(encoded) = encoded else {
            return Ok(None);
        };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&encoded)
            .map_err(serde::de::Error::custom)?;
        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            serde::de::Error::custom(format!(
                "invalid public key length: expected 32, got {}",
                bytes.len()
            ))
        })?;
        Ok(Some(key))
    }
}

/// Wrapper for serializing the store.
#[derive(Debug, Serialize, Deserialize)]
struct PairingStoreData {
    /// Version of the store format (for future migrations).
    version: u32,
    /// Registered appliances.
    entries: Vec<PinnedKey>,
}

/// Thread-safe pairing store.
pub struct PairingStore {
    path: PathBuf,
    entries: RwLock<HashMap<Uuid, PinnedKey>>,
}

impl PairingStore {
    /// Creates an empty store that will persist to the given path.
    ///
    /// This does not load the file; call `load()` or use `open()`.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a store and loads existing entries.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Self::new(path);
        store.load()?;
        Ok(store)
    }

    /// Returns the path to the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the store from disk, replacing in-memory entries.
    ///
    /// A missing file leaves the store empty.
    pub fn load(&self) -> Result<()> {
        if !self.path.exists() {
            tracing::debug!("Pairing store not found at {:?}, starting empty", self.path);
            return Ok(());
        }

        let contents = fs::read_to_string(&self.path).map_err(|source| PairingError::Io {
            action: "read",
            path: self.path.clone(),
            source,
        })?;
        let data: PairingStoreData =
            serde_json::from_str(&contents).map_err(|e| PairingError::Malformed {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        let mut entries = self.entries.write().map_err(|_| PairingError::LockPoisoned)?;
        entries.clear();
        for entry in data.entries {
            entries.insert(entry.identity.id, entry);
        }

        tracing::info!("Loaded {} appliances from {:?}", entries.len(), self.path);
        Ok(())
    }

    /// Writes the store to disk.
    pub fn save(&self) -> Result<()> {
        let entries = self.entries.read().map_err(|_| PairingError::LockPoisoned)?;
        self.persist(&entries)
    }

    /// Atomic write: temp file, then rename.
    fn persist(&self, entries: &HashMap<Uuid, PinnedKey>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| PairingError::Io {
                action: "create",
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut list: Vec<PinnedKey> = entries.values().cloned().collect();
        list.sort_by(|a, b| a.identity.address.cmp(&b.identity.address));
        let data = PairingStoreData {
            version: 1,
            entries: list,
        };
        let contents =
            serde_json::to_string_pretty(&data).map_err(|e| PairingError::Malformed {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &contents).map_err(|source| PairingError::Io {
            action: "write",
            path: temp_path.clone(),
            source,
        })?;
        fs::rename(&temp_path, &self.path).map_err(|source| PairingError::Io {
            action: "replace",
            path: self.path.clone(),
            source,
        })?;

        tracing::debug!("Saved {} appliances to {:?}", entries.len(), self.path);
        Ok(())
    }

    /// Applies `f` to a copy of the entries under the write lock, persists
    /// the copy and only then makes it current.
    fn mutate<T>(&self, f: impl FnOnce(&mut HashMap<Uuid, PinnedKey>) -> Result<T>) -> Result<T> {
        let mut entries = self.entries.write().map_err(|_| PairingError::LockPoisoned)?;
        let mut staged = entries.clone();
        let out = f(&mut staged)?;
        self.persist(&staged)?;
        *entries = staged;
        Ok(out)
    }

    /// Registers a new appliance at `address` without a pinned key.
    pub fn register(&self, address: &str) -> Result<RemoteIdentity> {
        let identity = RemoteIdentity::register(address);
        self.mutate(|entries| {
            entries.insert(identity.id, PinnedKey::registered(identity.clone()));
            Ok(())
        })?;
        tracing::info!(identity = %identity, "Registered appliance");
        Ok(identity)
    }

    /// Gets the entry for an appliance id.
    pub fn get(&self, id: &Uuid) -> Result<Option<PinnedKey>> {
        let entries = self.entries.read().map_err(|_| PairingError::LockPoisoned)?;
        Ok(entries.get(id).cloned())
    }

    /// Finds a registered appliance by id (or unique id prefix) or address.
    pub fn find(&self, query: &str) -> Result<Option<RemoteIdentity>> {
        let entries = self.entries.read().map_err(|_| PairingError::LockPoisoned)?;

        if let Ok(id) = Uuid::parse_str(query) {
            return Ok(entries.get(&id).map(|e| e.identity.clone()));
        }

        let matches: Vec<&PinnedKey> = entries
            .values()
            .filter(|e| e.identity.address == query || e.identity.id.to_string().starts_with(query))
            .collect();
        Ok(match matches.as_slice() {
            [only] => Some(only.identity.clone()),
            _ => None,
        })
    }

    /// Returns the pinned key of an appliance.
    pub fn lookup(&self, identity: &RemoteIdentity) -> Result<Option<[u8; 32]>> {
        let entries = self.entries.read().map_err(|_| PairingError::LockPoisoned)?;
        Ok(entries.get(&identity.id).and_then(|e| e.public_key))
    }

    /// Pins `key` for an appliance.
    ///
    /// Pinning the already-pinned key is a no-op. A different key is refused
    /// with [`PairingError::AlreadyPinned`]; call [`unpin`](Self::unpin) first
    /// when the user explicitly re-pairs.
    pub fn pin(&self, identity: &RemoteIdentity, key: [u8; 32]) -> Result<()> {
        self.mutate(|entries| {
            let entry = entries
                .entry(identity.id)
                .or_insert_with(|| PinnedKey::registered(identity.clone()));
            match entry.public_key {
                Some(existing) if existing == key => Ok(()),
                Some(_) => Err(PairingError::AlreadyPinned(identity.id)),
                None => {
                    entry.public_key = Some(key);
                    entry.verified = false;
                    entry.pinned_at = Some(SystemTime::now());
                    tracing::info!(
                        identity = %identity,
                        key = %key_prefix(&key),
                        "Pinned appliance key"
                    );
                    Ok(())
                }
            }
        })
    }

    /// Forgets the pinned key but keeps the registration.
    pub fn unpin(&self, identity: &RemoteIdentity) -> Result<()> {
        self.mutate(|entries| {
            let entry = entries
                .get_mut(&identity.id)
                .ok_or(PairingError::UnknownIdentity(identity.id))?;
            entry.public_key = None;
            entry.verified = false;
            entry.pinned_at = None;
            tracing::warn!(identity = %identity, "Unpinned appliance key for re-pairing");
            Ok(())
        })
    }

    /// Removes an appliance and its pinned key.
    pub fn remove(&self, identity: &RemoteIdentity) -> Result<Option<PinnedKey>> {
        let removed = self.mutate(|entries| Ok(entries.remove(&identity.id)))?;
        if removed.is_some() {
            tracing::info!(identity = %identity, "Removed appliance");
        }
        Ok(removed)
    }

    /// Records that both users confirmed the fingerprint for the pinned key.
    pub fn mark_verified(&self, identity: &RemoteIdentity) -> Result<()> {
        self.mutate(|entries| {
            let entry = entries
                .get_mut(&identity.id)
                .filter(|e| e.public_key.is_some())
                .ok_or(PairingError::UnknownIdentity(identity.id))?;
            entry.verified = true;
            Ok(())
        })
    }

    /// Updates the last-seen timestamp.
    pub fn touch(&self, identity: &RemoteIdentity) -> Result<()> {
        self.mutate(|entries| {
            let entry = entries
                .get_mut(&identity.id)
                .ok_or(PairingError::UnknownIdentity(identity.id))?;
            entry.last_seen = Some(SystemTime::now());
            Ok(())
        })
    }

    /// Compares a handshake's remote static key with the pinned one without
    /// changing the store.
    ///
    /// Returns [`PinCheck::FirstUse`] when nothing is pinned yet; a key that
    /// differs from the pinned one is [`PairingError::PinMismatch`].
    pub fn check(&self, identity: &RemoteIdentity, presented: [u8; 32]) -> Result<PinCheck> {
        let entries = self.entries.read().map_err(|_| PairingError::LockPoisoned)?;
        compare(identity, entries.get(&identity.id), presented)
    }

    /// Trust-on-first-use check of a handshake's remote static key.
    ///
    /// Pins the key if none is pinned. A key that differs from the pinned one
    /// is rejected with [`PairingError::PinMismatch`] and never replaces it.
    /// The comparison and the pin happen under one write lock.
    pub fn check_or_pin(&self, identity: &RemoteIdentity, presented: [u8; 32]) -> Result<PinCheck> {
        let check = self.check(identity, presented)?;
        if check != PinCheck::FirstUse {
            return Ok(check);
        }

        self.mutate(|entries| {
            let entry = entries
                .entry(identity.id)
                .or_insert_with(|| PinnedKey::registered(identity.clone()));
            let check = compare(identity, Some(entry), presented)?;
            if check == PinCheck::FirstUse {
                entry.public_key = Some(presented);
                entry.verified = false;
                entry.pinned_at = Some(SystemTime::now());
                tracing::info!(
                    identity = %identity,
                    key = %key_prefix(&presented),
                    "Pinned appliance key on first use"
                );
            }
            Ok(check)
        })
    }

    /// Lists all registered appliances, ordered by address.
    pub fn list(&self) -> Result<Vec<PinnedKey>> {
        let entries = self.entries.read().map_err(|_| PairingError::LockPoisoned)?;
        let mut list: Vec<PinnedKey> = entries.values().cloned().collect();
        list.sort_by(|a, b| a.identity.address.cmp(&b.identity.address));
        Ok(list)
    }

    /// Returns the number of registered appliances.
    pub fn len(&self) -> Result<usize> {
        let entries = self.entries.read().map_err(|_| PairingError::LockPoisoned)?;
        Ok(entries.len())
    }

    /// Returns true if no appliance is registered.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn compare(
    identity: &RemoteIdentity,
    entry: Option<&PinnedKey>,
    presented: [u8; 32],
) -> Result<PinCheck> {
    let Some((pinned, verified)) = entry.and_then(|e| e.public_key.map(|k| (k, e.verified)))
    else {
        return Ok(PinCheck::FirstUse);
    };
    if pinned == presented {
        return Ok(PinCheck::Known { verified });
    }

    tracing::error!(
        identity = %identity,
        pinned = %key_prefix(&pinned),
        presented = %key_prefix(&presented),
        "Appliance presented a different static key"
    );
    Err(PairingError::PinMismatch {
        identity: identity.to_string(),
        pinned: key_prefix(&pinned),
        presented: key_prefix(&presented),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store(temp_dir: &TempDir) -> PairingStore {
        PairingStore::new(temp_dir.path().join("pinned_keys.json"))
    }

    #[test]
    fn test_new_store_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        assert!(store.is_empty().unwrap());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_register_persists_without_key() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);

        let identity = store.register("192.168.1.20:8845").unwrap();
        assert!(store.path().exists());
        assert_eq!(store.lookup(&identity).unwrap(), None);

        let reopened = PairingStore::open(store.path()).unwrap();
        let entry = reopened.get(&identity.id).unwrap().unwrap();
        assert_eq!(entry.identity, identity);
        assert_eq!(entry.public_key, None);
        assert!(!entry.verified);
    }

    #[test]
    fn test_pin_and_lookup() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        let identity = store.register("base.local").unwrap();

        store.pin(&identity, [1u8; 32]).unwrap();
        assert_eq!(store.lookup(&identity).unwrap(), Some([1u8; 32]));

        let entry = store.get(&identity.id).unwrap().unwrap();
        assert!(entry.pinned_at.is_some());
        assert!(!entry.verified);
    }

    #[test]
    fn test_pin_same_key_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        let identity = store.register("base.local").unwrap();

        store.pin(&identity, [1u8; 32]).unwrap();
        store.mark_verified(&identity).unwrap();
        store.pin(&identity, [1u8; 32]).unwrap();

        assert!(store.get(&identity.id).unwrap().unwrap().verified);
    }

    #[test]
    fn test_pin_refuses_to_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        let identity = store.register("base.local").unwrap();

        store.pin(&identity, [1u8; 32]).unwrap();
        let err = store.pin(&identity, [2u8; 32]).unwrap_err();
        assert!(matches!(err, PairingError::AlreadyPinned(id) if id == identity.id));
        assert_eq!(store.lookup(&identity).unwrap(), Some([1u8; 32]));
    }

    #[test]
    fn test_unpin_allows_new_key() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        let identity = store.register("base.local").unwrap();

        store.pin(&identity, [1u8; 32]).unwrap();
        store.mark_verified(&identity).unwrap();
        store.unpin(&identity).unwrap();

        let entry = store.get(&identity.id).unwrap().unwrap();
        assert_eq!(entry.public_key, None);
        assert!(!entry.verified);

        store.pin(&identity, [2u8; 32]).unwrap();
        assert_eq!(store.lookup(&identity).unwrap(), Some([2u8; 32]));
    }

    #[test]
    fn test_check_or_pin_first_use_then_known() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        let identity = store.register("base-1").unwrap();

        assert_eq!(
            store.check_or_pin(&identity, [7u8; 32]).unwrap(),
            PinCheck::FirstUse
        );
        assert_eq!(
            store.check_or_pin(&identity, [7u8; 32]).unwrap(),
            PinCheck::Known { verified: false }
        );

        store.mark_verified(&identity).unwrap();
        assert_eq!(
            store.check_or_pin(&identity, [7u8; 32]).unwrap(),
            PinCheck::Known { verified: true }
        );
    }

    #[test]
    fn test_check_or_pin_mismatch_keeps_pinned_key() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        let identity = store.register("base-1").unwrap();

        store.check_or_pin(&identity, [7u8; 32]).unwrap();
        let err = store.check_or_pin(&identity, [8u8; 32]).unwrap_err();

        match err {
            PairingError::PinMismatch {
                pinned, presented, ..
            } => {
                assert_eq!(pinned, "0707070707070707");
                assert_eq!(presented, "0808080808080808");
            }
            other => panic!("expected PinMismatch, got {:?}", other),
        }

        let reopened = PairingStore::open(store.path()).unwrap();
        assert_eq!(reopened.lookup(&identity).unwrap(), Some([7u8; 32]));
    }

    #[test]
    fn test_check_or_pin_unregistered_identity() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        let identity = RemoteIdentity::register("adhoc.local");

        assert_eq!(
            store.check_or_pin(&identity, [3u8; 32]).unwrap(),
            PinCheck::FirstUse
        );
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_check_does_not_pin() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        let identity = store.register("base-1").unwrap();

        assert_eq!(store.check(&identity, [7u8; 32]).unwrap(), PinCheck::FirstUse);
        assert_eq!(store.lookup(&identity).unwrap(), None);

        store.pin(&identity, [7u8; 32]).unwrap();
        assert_eq!(
            store.check(&identity, [7u8; 32]).unwrap(),
            PinCheck::Known { verified: false }
        );
        assert!(matches!(
            store.check(&identity, [8u8; 32]),
            Err(PairingError::PinMismatch { .. })
        ));
    }

    #[test]
    fn test_racing_first_use_pins_once() {
        let temp_dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(create_test_store(&temp_dir));
        let identity = store.register("base-1").unwrap();

        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                let identity = identity.clone();
                std::thread::spawn(move || store.check_or_pin(&identity, [i; 32]))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let first_use = results
            .iter()
            .filter(|r| matches!(r, Ok(PinCheck::FirstUse)))
            .count();
        assert_eq!(first_use, 1);
        assert!(results.iter().all(|r| matches!(
            r,
            Ok(PinCheck::FirstUse) | Err(PairingError::PinMismatch { .. })
        )));
    }

    #[test]
    fn test_failed_write_leaves_memory_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();
        let store = PairingStore::new(blocker.join("pinned_keys.json"));
        let identity = RemoteIdentity::register("base-1");

        assert!(matches!(
            store.check_or_pin(&identity, [7u8; 32]),
            Err(PairingError::Io { .. })
        ));
        assert_eq!(store.lookup(&identity).unwrap(), None);
        assert!(store.is_empty().unwrap());

        // Still first use: nothing was pinned
        assert!(store.check_or_pin(&identity, [7u8; 32]).is_err());
        assert_eq!(store.check(&identity, [7u8; 32]).unwrap(), PinCheck::FirstUse);
    }

    #[test]
    fn test_mark_verified_requires_pinned_key() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        let identity = store.register("base-1").unwrap();

        assert!(matches!(
            store.mark_verified(&identity),
            Err(PairingError::UnknownIdentity(_))
        ));
    }

    #[test]
    fn test_touch_updates_last_seen() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        let identity = store.register("base-1").unwrap();

        store.touch(&identity).unwrap();
        assert!(store.get(&identity.id).unwrap().unwrap().last_seen.is_some());

        let stranger = RemoteIdentity::register("elsewhere");
        assert!(matches!(
            store.touch(&stranger),
            Err(PairingError::UnknownIdentity(_))
        ));
    }

    #[test]
    fn test_remove() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        let identity = store.register("base-1").unwrap();
        store.pin(&identity, [1u8; 32]).unwrap();

        let removed = store.remove(&identity).unwrap().unwrap();
        assert_eq!(removed.public_key, Some([1u8; 32]));
        assert!(store.remove(&identity).unwrap().is_none());
        assert!(PairingStore::open(store.path()).unwrap().is_empty().unwrap());
    }

    #[test]
    fn test_find_by_id_prefix_and_address() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        let a = store.register("kitchen.local").unwrap();
        let _b = store.register("garage.local").unwrap();

        assert_eq!(store.find(&a.id.to_string()).unwrap(), Some(a.clone()));
        assert_eq!(store.find("kitchen.local").unwrap(), Some(a.clone()));
        assert_eq!(store.find(&a.id.to_string()[..8]).unwrap(), Some(a));
        assert_eq!(store.find("nowhere.local").unwrap(), None);
    }

    #[test]
    fn test_list_sorted_by_address() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        store.register("b.local").unwrap();
        store.register("a.local").unwrap();

        let list = store.list().unwrap();
        assert_eq!(list[0].identity.address, "a.local");
        assert_eq!(list[1].identity.address, "b.local");
    }

    #[test]
    fn test_public_key_serialized_as_base64() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);
        let identity = store.register("base-1").unwrap();
        store.pin(&identity, [0xffu8; 32]).unwrap();

        let contents = fs::read_to_string(store.path()).unwrap();
        assert!(contents.contains("\"version\": 1"));
        assert!(contents.contains("//////////"));
        assert!(!temp_dir.path().join("pinned_keys.json.tmp").exists());
    }

    #[test]
    fn test_load_malformed_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pinned_keys.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            PairingStore::open(&path),
            Err(PairingError::Malformed { .. })
        ));
    }

    #[test]
    fn test_load_rejects_short_key() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pinned_keys.json");
        let json = format!(
            r#"{{"version":1,"entries":[{{"identity":{{"address":"x","id":"{}"}},"public_key":"AAAA"}}]}}"#,
            Uuid::new_v4()
        );
        fs::write(&path, json).unwrap();

        assert!(matches!(
            PairingStore::open(&path),
            Err(PairingError::Malformed { .. })
        ));
    }
}
