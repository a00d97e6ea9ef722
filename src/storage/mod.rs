use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use thiserror::Error;

use crate::config::{app_config_path, config_env_dirs, ConfigPathError, APP_DIR};

mod preference;

pub use preference::{PersistedPreferenceStore, PreferenceSubscription};

const STORAGE_FILE: &str = "storage.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("missing HOME environment variable")]
    MissingHomeDirectory,
    #[error("storage is unavailable in this context")]
    Unavailable,
    #[error("storage quota exceeded while writing {key}")]
    QuotaExceeded { key: String },
    #[error("failed to read storage file: {path}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write storage file: {path}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to parse storage file")]
    Parse(#[from] serde_json::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Durable key/value record behind a [`StorageArea`].
pub trait StorageBackend {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> StorageResult<()>;
    fn remove(&mut self, key: &str) -> StorageResult<()>;
    fn clear(&mut self) -> StorageResult<()>;
}

/// In-process backend. `disabled` and `quota_bytes` mimic sandboxed or full
/// browser storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: BTreeMap<String, String>,
    disabled: bool,
    quota_bytes: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Self::default()
        }
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::default()
        }
    }

    fn ensure_enabled(&self) -> StorageResult<()> {
        if self.disabled {
            return Err(StorageError::Unavailable);
        }
        Ok(())
    }

    fn used_bytes_without(&self, key: &str) -> usize {
        self.entries
            .iter()
            .filter(|(existing, _)| existing.as_str() != key)
            .map(|(existing, value)| existing.len() + value.len())
            .sum()
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.ensure_enabled()?;
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> StorageResult<()> {
        self.ensure_enabled()?;
        if let Some(quota) = self.quota_bytes {
            if self.used_bytes_without(key) + key.len() + value.len() > quota {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                });
            }
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> StorageResult<()> {
        self.ensure_enabled()?;
        self.entries.remove(key);
        Ok(())
    }

    fn clear(&mut self) -> StorageResult<()> {
        self.ensure_enabled()?;
        self.entries.clear();
        Ok(())
    }
}

/// JSON object on disk, rewritten on every mutation.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn with_default_path() -> StorageResult<Self> {
        let (xdg_config_home, home) = config_env_dirs();
        Self::with_default_path_in(xdg_config_home.as_deref(), home.as_deref())
    }

    fn with_default_path_in(
        xdg_config_home: Option<&Path>,
        home: Option<&Path>,
    ) -> StorageResult<Self> {
        let path = app_config_path(APP_DIR, STORAGE_FILE, xdg_config_home, home).map_err(
            |error| match error {
                ConfigPathError::MissingHomeDirectory => StorageError::MissingHomeDirectory,
            },
        )?;
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> StorageResult<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let serialized = fs::read_to_string(&self.path).map_err(|source| StorageError::Read {
            path: self.path.clone(),
            source,
        })?;
        Ok(serde_json::from_str(&serialized)?)
    }

    fn store(&self, entries: &BTreeMap<String, String>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| StorageError::Write {
                path: self.path.clone(),
                source,
            })?;
        }
        let serialized = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, serialized).map_err(|source| StorageError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

impl StorageBackend for JsonFileBackend {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    fn set(&mut self, key: &str, value: &str) -> StorageResult<()> {
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());
        self.store(&entries)
    }

    fn remove(&mut self, key: &str) -> StorageResult<()> {
        let mut entries = self.load()?;
        if entries.remove(key).is_some() {
            self.store(&entries)?;
        }
        Ok(())
    }

    fn clear(&mut self) -> StorageResult<()> {
        self.store(&BTreeMap::new())
    }
}

/// Identifies one execution context (tab, window) sharing a storage area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageListenerId(u64);

/// Change notification delivered to every other context. `key` is `None`
/// when the whole area was cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

type StorageListener = Rc<dyn Fn(&StorageEvent)>;

struct ListenerEntry {
    id: StorageListenerId,
    context: ContextId,
    callback: StorageListener,
}

struct AreaInner {
    backend: RefCell<Box<dyn StorageBackend>>,
    listeners: RefCell<Vec<ListenerEntry>>,
    next_context: Cell<u64>,
    next_listener: Cell<u64>,
}

/// Origin-scoped storage shared by every context opened from it.
#[derive(Clone)]
pub struct StorageArea {
    inner: Rc<AreaInner>,
}

impl StorageArea {
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        Self {
            inner: Rc::new(AreaInner {
                backend: RefCell::new(Box::new(backend)),
                listeners: RefCell::new(Vec::new()),
                next_context: Cell::new(0),
                next_listener: Cell::new(0),
            }),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    pub fn open_context(&self) -> ContextStorage {
        let id = self.inner.next_context.get();
        self.inner.next_context.set(id + 1);
        ContextStorage {
            area: self.clone(),
            context: ContextId(id),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    fn broadcast(&self, origin: ContextId, event: &StorageEvent) {
        // Collect first so listeners may touch storage while being notified.
        let targets: Vec<StorageListener> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .filter(|entry| entry.context != origin)
            .map(|entry| entry.callback.clone())
            .collect();
        tracing::trace!(
            key = ?event.key,
            listeners = targets.len(),
            "broadcasting storage event"
        );
        for callback in targets {
            callback(event);
        }
    }
}

impl std::fmt::Debug for StorageArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageArea")
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

/// One context's view of a [`StorageArea`]. Writes notify every other
/// context, never this one.
#[derive(Debug, Clone)]
pub struct ContextStorage {
    area: StorageArea,
    context: ContextId,
}

impl ContextStorage {
    pub fn context_id(&self) -> ContextId {
        self.context
    }

    pub fn area(&self) -> &StorageArea {
        &self.area
    }

    pub fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        self.area.inner.backend.borrow().get(key)
    }

    pub fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        let old_value = {
            let mut backend = self.area.inner.backend.borrow_mut();
            let old_value = backend.get(key)?;
            backend.set(key, value)?;
            old_value
        };
        if old_value.as_deref() != Some(value) {
            self.area.broadcast(
                self.context,
                &StorageEvent {
                    key: Some(key.to_string()),
                    old_value,
                    new_value: Some(value.to_string()),
                },
            );
        }
        Ok(())
    }

    pub fn remove_item(&self, key: &str) -> StorageResult<()> {
        let old_value = {
            let mut backend = self.area.inner.backend.borrow_mut();
            let old_value = backend.get(key)?;
            backend.remove(key)?;
            old_value
        };
        if old_value.is_some() {
            self.area.broadcast(
                self.context,
                &StorageEvent {
                    key: Some(key.to_string()),
                    old_value,
                    new_value: None,
                },
            );
        }
        Ok(())
    }

    pub fn clear(&self) -> StorageResult<()> {
        self.area.inner.backend.borrow_mut().clear()?;
        self.area.broadcast(
            self.context,
            &StorageEvent {
                key: None,
                old_value: None,
                new_value: None,
            },
        );
        Ok(())
    }

    pub fn add_listener(&self, callback: impl Fn(&StorageEvent) + 'static) -> StorageListenerId {
        let id = StorageListenerId(self.area.inner.next_listener.get());
        self.area.inner.next_listener.set(id.0 + 1);
        self.area.inner.listeners.borrow_mut().push(ListenerEntry {
            id,
            context: self.context,
            callback: Rc::new(callback),
        });
        id
    }

    pub fn remove_listener(&self, id: StorageListenerId) {
        self.area
            .inner
            .listeners
            .borrow_mut()
            .retain(|entry| entry.id != id);
    }
}
