//! Persistence for hydration error records.
//!
//! Two keyed stores back the error history:
//!
//! ```text
//! ~/.hydrascope/errors/
//! ├── lists/     # ErrorList per origin
//! └── details/   # HydrationErrorRecord per id
//! ```
//!
//! [`HydrationErrorStore`] keeps the two consistent and scopes list operations
//! to the origin it was initialized with. Backends implement
//! [`KeyValueStore`]; [`JsonDirStore`] writes one JSON file per key and
//! [`MemoryStore`] keeps everything in a map.

use crate::config::StorageConfig;
use crate::error::{HydraError, Result};
use crate::types::{ErrorList, HydrationErrorRecord, HydrationErrorSummary};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Keyed store. Every operation other than `init` fails with
/// [`HydraError::NotInitialized`] until `init` succeeds.
pub trait KeyValueStore<T>: Send {
    fn init(&mut self) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<T>>;
    fn set(&mut self, key: &str, value: &T) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
    fn clear(&mut self) -> Result<()>;
    fn get_all(&self) -> Result<Vec<T>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// JSON directory backend
// ═══════════════════════════════════════════════════════════════════════════════

/// One `<hex(key)>.json` file per entry.
///
/// Keys are origins and UUIDs; hex-encoding keeps `://` and friends out of
/// file names.
pub struct JsonDirStore<T> {
    dir: PathBuf,
    initialized: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDirStore<T> {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            initialized: false,
            _marker: PhantomData,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_init(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(HydraError::NotInitialized)
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_key(key)))
    }

    fn entry_paths(&self) -> Result<Vec<PathBuf>> {
        let entries = fs_err::read_dir(&self.dir).map_err(|source| HydraError::Io {
            context: format!("listing {}", self.dir.display()),
            source,
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| HydraError::Io {
                context: format!("listing {}", self.dir.display()),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

impl<T> KeyValueStore<T> for JsonDirStore<T>
where
    T: Serialize + DeserializeOwned,
{
    fn init(&mut self) -> Result<()> {
        fs_err::create_dir_all(&self.dir).map_err(|source| HydraError::Io {
            context: format!("creating {}", self.dir.display()),
            source,
        })?;
        self.initialized = true;
        tracing::debug!(dir = %self.dir.display(), "Store ready");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<T>> {
        self.ensure_init()?;
        read_json(&self.path_for(key))
    }

    fn set(&mut self, key: &str, value: &T) -> Result<()> {
        self.ensure_init()?;
        write_json_atomic(&self.dir, &self.path_for(key), value)
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.ensure_init()?;
        let path = self.path_for(key);
        match fs_err::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(HydraError::Io {
                context: format!("removing {}", path.display()),
                source,
            }),
        }
    }

    fn clear(&mut self) -> Result<()> {
        self.ensure_init()?;
        for path in self.entry_paths()? {
            fs_err::remove_file(&path).map_err(|source| HydraError::Io {
                context: format!("removing {}", path.display()),
                source,
            })?;
        }
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<T>> {
        self.ensure_init()?;
        let mut values = Vec::new();
        for path in self.entry_paths()? {
            if let Some(value) = read_json(&path)? {
                values.push(value);
            }
        }
        Ok(values)
    }
}

fn encode_key(key: &str) -> String {
    key.bytes().map(|byte| format!("{:02x}", byte)).collect()
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match fs_err::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(HydraError::Io {
                context: format!("reading {}", path.display()),
                source,
            })
        }
    };

    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|source| HydraError::Json {
            context: format!("parsing {}", path.display()),
            source,
        })
}

/// Temp file in the same directory, then rename.
fn write_json_atomic<T: Serialize>(dir: &Path, path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_vec_pretty(value).map_err(|source| HydraError::Json {
        context: format!("serializing {}", path.display()),
        source,
    })?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|source| HydraError::Io {
        context: "creating temp file".to_string(),
        source,
    })?;
    tmp.write_all(&content).map_err(|source| HydraError::Io {
        context: "writing temp file".to_string(),
        source,
    })?;
    tmp.flush().map_err(|source| HydraError::Io {
        context: "flushing temp file".to_string(),
        source,
    })?;
    tmp.persist(path).map_err(|err| HydraError::Io {
        context: format!("persisting {}", path.display()),
        source: err.error,
    })?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-memory backend
// ═══════════════════════════════════════════════════════════════════════════════

pub struct MemoryStore<T> {
    entries: BTreeMap<String, T>,
    initialized: bool,
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            initialized: false,
        }
    }
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_init(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(HydraError::NotInitialized)
        }
    }
}

impl<T: Clone + Send> KeyValueStore<T> for MemoryStore<T> {
    fn init(&mut self) -> Result<()> {
        self.initialized = true;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<T>> {
        self.ensure_init()?;
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &T) -> Result<()> {
        self.ensure_init()?;
        self.entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.ensure_init()?;
        self.entries.remove(key);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.ensure_init()?;
        self.entries.clear();
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<T>> {
        self.ensure_init()?;
        Ok(self.entries.values().cloned().collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error history
// ═══════════════════════════════════════════════════════════════════════════════

pub struct HydrationErrorStore {
    lists: Box<dyn KeyValueStore<ErrorList>>,
    details: Box<dyn KeyValueStore<HydrationErrorRecord>>,
    origin: Option<String>,
}

impl HydrationErrorStore {
    pub fn new(
        lists: Box<dyn KeyValueStore<ErrorList>>,
        details: Box<dyn KeyValueStore<HydrationErrorRecord>>,
    ) -> Self {
        Self {
            lists,
            details,
            origin: None,
        }
    }

    /// File-backed store under the configured root.
    pub fn open(storage: &StorageConfig) -> Self {
        Self::new(
            Box::new(JsonDirStore::new(storage.error_lists_dir())),
            Box::new(JsonDirStore::new(storage.error_details_dir())),
        )
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStore::new()), Box::new(MemoryStore::new()))
    }

    /// Readies both backends and scopes list operations to `origin`.
    pub fn init(&mut self, origin: &str) -> Result<()> {
        self.lists.init()?;
        self.details.init()?;
        self.origin = Some(origin.to_string());
        tracing::debug!(origin, "Error store initialized");
        Ok(())
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Saves the full record, then appends its summary to the current
    /// origin's list unless an entry with the same id is already there.
    ///
    /// Returns whether the list gained an entry.
    pub fn add_error(&mut self, record: &HydrationErrorRecord) -> Result<bool> {
        let origin = self.require_origin()?.to_string();
        self.details.set(&record.id, record)?;

        let mut errors = self.current_errors(&origin)?;
        if errors.iter().any(|existing| existing.id == record.id) {
            tracing::debug!(id = %record.id, "Error already listed");
            return Ok(false);
        }

        errors.push(record.summary());
        self.save_list(&origin, errors)?;
        tracing::info!(id = %record.id, origin = %origin, "Hydration error stored");
        Ok(true)
    }

    pub fn errors_list(&self) -> Result<Vec<HydrationErrorSummary>> {
        let origin = self.require_origin()?;
        self.current_errors(origin)
    }

    pub fn error_detail(&self, id: &str) -> Result<Option<HydrationErrorRecord>> {
        self.require_origin()?;
        self.details.get(id)
    }

    /// Deletes the record and drops it from the current origin's list.
    pub fn remove_error(&mut self, id: &str) -> Result<()> {
        let origin = self.require_origin()?.to_string();
        self.details.remove(id)?;

        let Some(list) = self.lists.get(&origin)? else {
            return Ok(());
        };
        let errors = list
            .errors
            .into_iter()
            .filter(|summary| summary.id != id)
            .collect();
        self.save_list(&origin, errors)?;
        tracing::info!(id, origin = %origin, "Hydration error removed");
        Ok(())
    }

    /// Deletes every record listed for the current origin. Returns how many
    /// were listed.
    pub fn clear_all_errors(&mut self) -> Result<usize> {
        let origin = self.require_origin()?.to_string();
        let Some(list) = self.lists.get(&origin)? else {
            return Ok(0);
        };

        for summary in &list.errors {
            self.details.remove(&summary.id)?;
        }
        let cleared = list.errors.len();
        self.save_list(&origin, Vec::new())?;
        tracing::info!(origin = %origin, cleared, "Hydration errors cleared");
        Ok(cleared)
    }

    fn require_origin(&self) -> Result<&str> {
        self.origin.as_deref().ok_or(HydraError::NotInitialized)
    }

    fn current_errors(&self, origin: &str) -> Result<Vec<HydrationErrorSummary>> {
        Ok(self
            .lists
            .get(origin)?
            .map(|list| list.errors)
            .unwrap_or_default())
    }

    fn save_list(&mut self, origin: &str, errors: Vec<HydrationErrorSummary>) -> Result<()> {
        let list = ErrorList {
            origin: origin.to_string(),
            errors,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        self.lists.set(origin, &list)
    }
}
