//! Key material per host fingerprint, optionally persisted to disk.
//!
//! File layout: `b"LLKS"`, one version byte, then the bincode-encoded state.
//! Writes go to a sibling temp file that is renamed over the store, so a
//! crash never leaves a half-written file behind.

use limelight_core::error::StoreError;
use limelight_core::HostFingerprint;
use limelight_crypto::KeyMaterial;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

const MAGIC: &[u8; 4] = b"LLKS";
const VERSION: u8 = 1;

#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct StoredKey {
    key: [u8; 16],
    key_id: u32,
}

#[derive(Clone, Serialize, Deserialize)]
struct StoreState {
    next_key_id: u32,
    entries: HashMap<HostFingerprint, StoredKey>,
    hosts: HashMap<String, HostFingerprint>,
}

impl StoreState {
    fn fresh() -> Self {
        // Random start point; ids only increase from here.
        Self {
            next_key_id: rand::thread_rng().gen_range(1..=u32::MAX / 2),
            entries: HashMap::new(),
            hosts: HashMap::new(),
        }
    }
}

/// Most recent key material per host identity.
pub struct KeyStore {
    state: RwLock<StoreState>,
    path: Option<PathBuf>,
}

impl KeyStore {
    /// Process-scoped store that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(StoreState::fresh()),
            path: None,
        }
    }

    /// Open a persisted store, creating an empty one if the file is absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = if path.exists() {
            let state = read_state(&path)?;
            debug!("Loaded {} pairing(s) from {}", state.entries.len(), path.display());
            state
        } else {
            info!("Creating key store at {}", path.display());
            StoreState::fresh()
        };
        let store = Self {
            state: RwLock::new(state),
            path: Some(path),
        };
        store.persist(&store.write())?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Store key material for a host, replacing any previous entry.
    ///
    /// The key must have been negotiated with `fingerprint`.
    pub fn save(&self, fingerprint: HostFingerprint, key: KeyMaterial) -> Result<(), StoreError> {
        if !key.is_for(&fingerprint) {
            return Err(StoreError::HostMismatch {
                fingerprint,
                key_host: *key.host(),
            });
        }
        self.update(|state| {
            state.entries.insert(
                fingerprint,
                StoredKey {
                    key: *key.key(),
                    key_id: key.key_id(),
                },
            );
            Ok(())
        })?;
        debug!("Saved key id {} for host {}", key.key_id(), fingerprint);
        Ok(())
    }

    pub fn load(&self, fingerprint: &HostFingerprint) -> Option<KeyMaterial> {
        let state = self.state.read().unwrap_or_else(|p| p.into_inner());
        state
            .entries
            .get(fingerprint)
            .map(|stored| KeyMaterial::new(stored.key, stored.key_id, *fingerprint))
    }

    /// Drop the entry for a host. Returns whether one existed.
    pub fn invalidate(&self, fingerprint: &HostFingerprint) -> Result<bool, StoreError> {
        if self.load(fingerprint).is_none() {
            return Ok(false);
        }
        let removed = self.update(|state| Ok(state.entries.remove(fingerprint).is_some()))?;
        if removed {
            info!("Invalidated pairing for host {}", fingerprint);
        }
        Ok(removed)
    }

    /// Associate a host name with the fingerprint it paired under.
    pub fn remember_host(&self, name: &str, fingerprint: HostFingerprint) -> Result<(), StoreError> {
        if self.fingerprint_for(name) == Some(fingerprint) {
            return Ok(());
        }
        self.update(|state| {
            state.hosts.insert(name.to_string(), fingerprint);
            Ok(())
        })
    }

    pub fn fingerprint_for(&self, name: &str) -> Option<HostFingerprint> {
        let state = self.state.read().unwrap_or_else(|p| p.into_inner());
        state.hosts.get(name).copied()
    }

    /// Next key identifier. Never returns the same value twice for this store.
    pub fn allocate_key_id(&self) -> Result<u32, StoreError> {
        self.update(|state| {
            let id = state.next_key_id;
            state.next_key_id = id
                .checked_add(1)
                .ok_or_else(|| StoreError::Corrupt("key id space exhausted".to_string()))?;
            Ok(id)
        })
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap_or_else(|p| p.into_inner()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Apply `change` to a copy of the state and keep it only once it is on disk.
    fn update<T>(
        &self,
        change: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.write();
        let mut next = state.clone();
        let out = change(&mut next)?;
        self.persist(&next)?;
        *state = next;
        Ok(out)
    }

    fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let body = bincode::serialize(state)
            .map_err(|e| StoreError::Corrupt(format!("encode failed: {}", e)))?;

        let mut bytes = Vec::with_capacity(MAGIC.len() + 1 + body.len());
        bytes.extend_from_slice(MAGIC);
        bytes.push(VERSION);
        bytes.extend_from_slice(&body);

        write_private(path, &bytes)?;
        Ok(())
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("path", &self.path)
            .field("entries", &self.len())
            .finish()
    }
}

fn read_state(path: &Path) -> Result<StoreState, StoreError> {
    let bytes = std::fs::read(path)?;
    if bytes.len() < MAGIC.len() + 1 || &bytes[..MAGIC.len()] != MAGIC {
        return Err(StoreError::UnknownFormat);
    }
    let version = bytes[MAGIC.len()];
    if version != VERSION {
        return Err(StoreError::UnsupportedVersion(version));
    }
    bincode::deserialize(&bytes[MAGIC.len() + 1..])
        .map_err(|e| StoreError::Corrupt(e.to_string()))
}

/// Replace `path` with `bytes` through an owner-only sibling temp file.
pub(crate) fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    let mut file = create_private(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    // A stale temp file keeps its old mode when reopened.
    restrict_permissions(&tmp)?;
    std::fs::rename(&tmp, path)
}

fn create_private(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
