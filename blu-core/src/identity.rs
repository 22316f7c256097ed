//! Local identity: display handle, transport peer ID, handle persistence and rotation.

use std::fmt;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::directory::PeerDirectory;

const ADJECTIVES: [&str; 6] = ["swift", "silent", "green", "dark", "lucky", "wild"];
const ANIMALS: [&str; 6] = ["wolf", "eagle", "lion", "cobra", "tiger", "falcon"];

/// Transport-level peer identifier (16 random bytes). Regenerated on every identity rotation.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct PeerId(#[serde(with = "bytes_16")] [u8; 16]);

mod bytes_16 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    pub fn serialize<S: Serializer>(v: &[u8; 16], serializer: S) -> Result<S::Ok, S::Error> {
        v.as_slice().serialize(serializer)
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 16], D::Error> {
        let buf: Vec<u8> = Deserialize::deserialize(d)?;
        buf.try_into()
            .map_err(|_| serde::de::Error::custom("expected 16 bytes"))
    }
}

impl PeerId {
    pub fn random() -> Self {
        PeerId(uuid::Uuid::new_v4().into_bytes())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        PeerId(bytes)
    }
}

impl fmt::Display for PeerId {
    /// Short hex form (first 4 bytes), enough to tell peers apart in logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Display handle, always of the form `@name`.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(String);

impl Handle {
    /// Trim whitespace and ensure a leading `@`. Returns `None` when nothing is left.
    pub fn normalize(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let name = trimmed.strip_prefix('@').unwrap_or(trimmed);
        if name.trim().is_empty() {
            return None;
        }
        Some(Handle(format!("@{}", name)))
    }

    /// Random `@adjective_animal` handle.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let adj = ADJECTIVES.choose(&mut rng).copied().unwrap_or("swift");
        let animal = ANIMALS.choose(&mut rng).copied().unwrap_or("wolf");
        Handle(format!("@{}_{}", adj, animal))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name without the leading `@`.
    pub fn name(&self) -> &str {
        self.0.strip_prefix('@').unwrap_or(&self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// External key-value store holding the current handle.
pub trait HandleStore: Send {
    fn load(&self) -> Result<Option<String>, StoreError>;
    fn save(&mut self, handle: &str) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
}

/// In-memory store. Used by tests and hosts without persistent preferences.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    value: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handle(handle: &str) -> Self {
        Self {
            value: Some(handle.to_string()),
        }
    }
}

impl HandleStore for MemoryStore {
    fn load(&self) -> Result<Option<String>, StoreError> {
        Ok(self.value.clone())
    }

    fn save(&mut self, handle: &str) -> Result<(), StoreError> {
        self.value = Some(handle.to_string());
        Ok(())
    }
}

/// Local identity as seen by the transport: handle plus transport peer ID.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LocalIdentity {
    pub handle: Handle,
    pub peer_id: PeerId,
}

impl LocalIdentity {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            peer_id: PeerId::random(),
        }
    }

    /// Replace the identity wholesale: new handle, fresh peer ID, empty directory.
    /// Previously known peers refer to the old transport identity and are discarded.
    pub fn rebuild(&self, handle: Handle) -> (LocalIdentity, PeerDirectory) {
        let identity = LocalIdentity::new(handle);
        let directory = PeerDirectory::new(identity.peer_id);
        (identity, directory)
    }
}

/// Owns the local identity and its persistence.
pub struct IdentityManager {
    store: Box<dyn HandleStore>,
    identity: LocalIdentity,
}

impl IdentityManager {
    /// Read the stored handle, or generate and persist a new one.
    pub fn load(mut store: Box<dyn HandleStore>) -> Self {
        let stored = match store.load() {
            Ok(v) => v.as_deref().and_then(Handle::normalize),
            Err(e) => {
                tracing::warn!(error = %e, "could not read stored handle");
                None
            }
        };
        let handle = match stored {
            Some(h) => h,
            None => {
                let h = Handle::generate();
                if let Err(e) = store.save(h.as_str()) {
                    tracing::warn!(error = %e, "could not persist generated handle");
                }
                h
            }
        };
        Self {
            store,
            identity: LocalIdentity::new(handle),
        }
    }

    pub fn current_handle(&self) -> &Handle {
        &self.identity.handle
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    /// Normalize `raw` and decide whether it would change the current handle.
    pub fn rotation_target(&self, raw: &str) -> Option<Handle> {
        Handle::normalize(raw).filter(|h| *h != self.identity.handle)
    }

    /// Persist and adopt `handle`, returning the fresh directory for the new identity.
    pub fn adopt(&mut self, handle: Handle) -> PeerDirectory {
        if let Err(e) = self.store.save(handle.as_str()) {
            tracing::warn!(error = %e, handle = %handle, "could not persist handle");
        }
        let (identity, directory) = self.identity.rebuild(handle);
        self.identity = identity;
        directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Store sharing its value with the test so writes can be observed after the move.
    struct SharedStore(Arc<Mutex<Option<String>>>);

    impl HandleStore for SharedStore {
        fn load(&self) -> Result<Option<String>, StoreError> {
            Ok(self.0.lock().unwrap().clone())
        }
        fn save(&mut self, handle: &str) -> Result<(), StoreError> {
            *self.0.lock().unwrap() = Some(handle.to_string());
            Ok(())
        }
    }

    #[test]
    fn normalize_handles() {
        assert_eq!(Handle::normalize("  bob ").unwrap().as_str(), "@bob");
        assert_eq!(Handle::normalize("@bob").unwrap().as_str(), "@bob");
        assert!(Handle::normalize("   ").is_none());
        assert!(Handle::normalize("@").is_none());
    }

    #[test]
    fn generated_handle_uses_word_lists() {
        let h = Handle::generate();
        let (adj, animal) = h.name().split_once('_').unwrap();
        assert!(ADJECTIVES.contains(&adj));
        assert!(ANIMALS.contains(&animal));
    }

    #[test]
    fn first_load_generates_and_persists() {
        let cell = Arc::new(Mutex::new(None));
        let mgr = IdentityManager::load(Box::new(SharedStore(cell.clone())));
        let stored = cell.lock().unwrap().clone();
        assert_eq!(stored.as_deref(), Some(mgr.current_handle().as_str()));
    }

    #[test]
    fn stored_handle_is_reused() {
        let mgr = IdentityManager::load(Box::new(MemoryStore::with_handle("@carol")));
        assert_eq!(mgr.current_handle().as_str(), "@carol");
    }

    #[test]
    fn rotation_target_skips_same_handle() {
        let mgr = IdentityManager::load(Box::new(MemoryStore::with_handle("@carol")));
        assert!(mgr.rotation_target(" carol ").is_none());
        assert!(mgr.rotation_target("").is_none());
        assert_eq!(mgr.rotation_target("dave").unwrap().as_str(), "@dave");
    }

    #[test]
    fn adopt_persists_and_changes_peer_id() {
        let cell = Arc::new(Mutex::new(Some("@carol".to_string())));
        let mut mgr = IdentityManager::load(Box::new(SharedStore(cell.clone())));
        let old_id = mgr.identity().peer_id;
        let dir = mgr.adopt(Handle::normalize("dave").unwrap());
        assert_ne!(mgr.identity().peer_id, old_id);
        assert_eq!(dir.count(), 0);
        assert_eq!(cell.lock().unwrap().as_deref(), Some("@dave"));
    }
}
