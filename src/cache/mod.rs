//! Persistent cache for tokens, device authorizations, credentials and listings.

pub mod store;

pub use store::{default_cache_dir, normalize_key, CacheStore, FileCacheStore, Namespace};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Key used by namespaces holding a single entry.
pub const DEFAULT_KEY: &str = "default";

/// Load a typed entry.
///
/// An entry whose shape no longer matches `T` (older layout, manual edit)
/// is deleted and reported as absent.
pub fn load<T: DeserializeOwned>(
    store: &dyn CacheStore,
    namespace: Namespace,
    key: &str,
) -> Result<Option<T>> {
    let Some(value) = store.get(namespace, key)? else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(entry) => Ok(Some(entry)),
        Err(err) => {
            tracing::warn!(
                namespace = %namespace,
                key,
                error = %err,
                "Discarding cache entry with unexpected shape"
            );
            store.delete(namespace, key)?;
            Ok(None)
        }
    }
}

/// Save a typed entry.
pub fn save<T: Serialize>(
    store: &dyn CacheStore,
    namespace: Namespace,
    key: &str,
    entry: &T,
) -> Result<()> {
    let value = serde_json::to_value(entry)?;
    store.set(namespace, key, &value)
}

/// Cache key for a credential pair.
///
/// Distinct pairs never share a key: bytes outside `[A-Za-z0-9@-]` are
/// written as `_XX` and the two parts are joined by `__`. The result is
/// already a valid file stem.
pub fn credential_key(account_id: &str, role_name: &str) -> String {
    format!("{}__{}", escape_key_part(account_id), escape_key_part(role_name))
}

fn escape_key_part(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for byte in part.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'@') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("_{byte:02X}"));
        }
    }
    out
}
