use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::persistent::PersistentEngine;
use crate::error::{Result, StorageError};

/// Key written and removed to check that a store accepts writes.
pub const PROBE_KEY: &str = "$$3e2r342";

/// A string key/value store in the style of browser local storage.
pub trait KeyValueStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

/// In-process store. Clones share the same map.
///
/// A store can be switched off with [`MemoryStore::set_available`] to stand in
/// for hosts where storage is disabled.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    items: Arc<RwLock<HashMap<String, String>>>,
    available: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            items: Arc::new(RwLock::new(HashMap::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// A store that rejects every operation.
    pub fn unavailable() -> Self {
        let store = Self::new();
        store.set_available(false);
        store
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.items.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable)
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check()?;
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        items.remove(key);
        Ok(())
    }
}

/// Directory-backed store, one file per key.
///
/// File names are the hex encoding of the key, so any key is safe to use.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut name = String::with_capacity(key.len() * 2 + 5);
        for byte in key.bytes() {
            let _ = write!(name, "{byte:02x}");
        }
        name.push_str(".json");
        self.dir.join(name)
    }
}

impl KeyValueStore for FileStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        // Write then rename so readers never see a half-written record.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn is_supported<S: KeyValueStore>(storage: &S) -> bool {
    let probe = storage
        .set_item(PROBE_KEY, "1")
        .and_then(|()| storage.remove_item(PROBE_KEY));
    match probe {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "storage probe failed, persistence disabled");
            false
        }
    }
}

/// A [`PersistentEngine`] that keeps one JSON-encoded value under `name`.
pub struct LocalStore<T, S> {
    storage: S,
    name: String,
    _marker: PhantomData<fn() -> T>,
}

/// Build a [`LocalStore`] if `storage` passes a write/remove probe.
///
/// Returns `None` when the store is unusable, which
/// [`create_persistent`](crate::persist::create_persistent) treats as "no
/// persistence".
pub fn local_store<T, S>(storage: S, name: impl Into<String>) -> Option<LocalStore<T, S>>
where
    S: KeyValueStore,
{
    if !is_supported(&storage) {
        return None;
    }
    let name = name.into();
    debug!(key = %name, "local store ready");
    Some(LocalStore {
        storage,
        name,
        _marker: PhantomData,
    })
}

impl<T, S> LocalStore<T, S>
where
    T: Serialize + DeserializeOwned,
    S: KeyValueStore,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serialize and store `value`, reporting failures to the caller.
    pub fn try_set(&self, value: &T) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.storage.set_item(&self.name, &text)?;
        Ok(())
    }

    /// Delete the stored record.
    pub fn clear(&self) -> Result<()> {
        self.storage.remove_item(&self.name)?;
        Ok(())
    }
}

impl<T, S> PersistentEngine<T> for LocalStore<T, S>
where
    T: Serialize + DeserializeOwned,
    S: KeyValueStore,
{
    fn get(&self) -> Option<T> {
        let text = match self.storage.get_item(&self.name) {
            Ok(Some(text)) if !text.is_empty() => text,
            Ok(_) => return None,
            Err(err) => {
                warn!(key = %self.name, error = %err, "failed to read stored state");
                return None;
            }
        };

        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key = %self.name, error = %err, "ignoring malformed stored state");
                None
            }
        }
    }

    fn set(&self, value: &T) {
        if let Err(err) = self.try_set(value) {
            warn!(key = %self.name, error = %err, "failed to save state");
        }
    }
}
