//! File-backed cache store: one JSON file per entry, written atomically.

use std::fs;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use serde_json::Value;
use strum::{Display, EnumString};

use crate::error::{BrokerError, Result};

/// Independent areas of the cache. Each maps to its own directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum Namespace {
    Token,
    DeviceAuthorization,
    Credentials,
    Roles,
    Accounts,
}

/// Storage abstraction for persisted broker state.
///
/// Implementations hold no semantics: values are opaque JSON documents
/// addressed by namespace and key. Callers own validity checks.
pub trait CacheStore: Send + Sync {
    fn get(&self, namespace: Namespace, key: &str) -> Result<Option<Value>>;
    fn set(&self, namespace: Namespace, key: &str, value: &Value) -> Result<()>;
    fn delete(&self, namespace: Namespace, key: &str) -> Result<()>;
    /// Remove every entry in a namespace.
    fn clear(&self, namespace: Namespace) -> Result<()>;
    /// Keys currently stored in a namespace, in their on-disk form.
    fn keys(&self, namespace: Namespace) -> Result<Vec<String>>;
}

/// File-backed cache store: one JSON file per entry.
///
/// Layout: `<base_dir>/<namespace>/<key>.json`. Writes go through a temp
/// file and a rename, so a reader sees either the old or the new document.
/// A file that cannot be parsed is deleted and reported as absent.
///
/// # Example
/// ```no_run
/// use ssobroker::cache::{CacheStore, FileCacheStore, Namespace};
///
/// let store = FileCacheStore::new_default();
/// store.set(Namespace::Accounts, "default", &serde_json::json!({"items": []}))?;
/// # Ok::<(), ssobroker::error::BrokerError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    base_dir: PathBuf,
}

impl FileCacheStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn new_default() -> Self {
        Self::new(default_cache_dir())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn namespace_dir(&self, namespace: Namespace) -> PathBuf {
        self.base_dir.join(namespace.to_string())
    }

    fn entry_path(&self, namespace: Namespace, key: &str) -> PathBuf {
        self.namespace_dir(namespace)
            .join(format!("{}.json", normalize_key(key)))
    }
}

impl CacheStore for FileCacheStore {
    fn get(&self, namespace: Namespace, key: &str) -> Result<Option<Value>> {
        let path = self.entry_path(namespace, key);
        let raw = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(BrokerError::Io(err)),
        };
        match serde_json::from_slice(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "Discarding unreadable cache file"
                );
                remove_if_present(&path)?;
                Ok(None)
            }
        }
    }

    fn set(&self, namespace: Namespace, key: &str, value: &Value) -> Result<()> {
        let path = self.entry_path(namespace, key);
        let serialized = serde_json::to_vec_pretty(value)?;
        atomic_write(&path, &serialized)
    }

    fn delete(&self, namespace: Namespace, key: &str) -> Result<()> {
        remove_if_present(&self.entry_path(namespace, key))
    }

    fn clear(&self, namespace: Namespace) -> Result<()> {
        match fs::remove_dir_all(self.namespace_dir(namespace)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(BrokerError::Io(err)),
        }
    }

    fn keys(&self, namespace: Namespace) -> Result<Vec<String>> {
        let entries = match fs::read_dir(self.namespace_dir(namespace)) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(BrokerError::Io(err)),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if let Some(key) = name.strip_suffix(".json") {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Default cache location: `~/.ssobroker/cache`.
pub fn default_cache_dir() -> PathBuf {
    crate::config::default_broker_dir().join("cache")
}

/// Map an arbitrary key onto a safe file stem.
pub fn normalize_key(value: &str) -> String {
    let trimmed = value.trim();
    let mut out = String::with_capacity(trimmed.len());
    for ch in trimmed.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '@') {
            out.push(ch);
        } else {
            out.push('-');
        }
    }
    let out = out.trim_start_matches('.').to_string();
    if out.trim_matches('-').is_empty() {
        "default".to_string()
    } else {
        out
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(BrokerError::Io(err)),
    }
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file_name = path.file_name().ok_or_else(|| {
        BrokerError::Configuration(format!("Cache path {} has no file name", path.display()))
    })?;
    let temp_name = format!(
        ".{}.tmp-{}-{}",
        file_name.to_string_lossy(),
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    );
    let temp_path = path.with_file_name(temp_name);

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let write_result = (|| -> std::io::Result<()> {
        let mut temp_file = options.open(&temp_path)?;
        temp_file.write_all(data)?;
        temp_file.sync_all()?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(BrokerError::Io(err));
    }

    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(BrokerError::Io(err));
    }

    #[cfg(unix)]
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

    Ok(())
}
