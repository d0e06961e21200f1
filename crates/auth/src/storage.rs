//! Key-value persistence for identity metadata, cached responses and cookies

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use reqwest::cookie::Jar;
use thiserror::Error;
use url::Url;

/// Errors raised by a [`KeyValueStore`]
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// A string-keyed store with the same surface as a browser's local storage.
///
/// Implementations must be cheap to call from synchronous code: the session
/// layer reads and writes through this trait while holding no locks of its own.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    /// Every key currently present, used by the teardown sweep
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// In-process store. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.keys().cloned().collect())
    }
}

/// Store backed by a single JSON object on disk.
///
/// The whole map is rewritten on every mutation through a temporary file and a
/// rename, so a crash mid-write leaves the previous contents intact.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open the store at `path`, creating parent directories as needed.
    /// A missing file is treated as an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let entries = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.keys().cloned().collect())
    }
}

/// Cookie area that doubles as an HTTP cookie jar.
///
/// Values are `Set-Cookie` strings keyed by cookie name. Every write is
/// mirrored into the `reqwest` jar for `origin`, so cookies written by the
/// session layer travel with requests the way a browser would send them.
/// `backing` keeps the raw strings for reads and across restarts.
pub struct HttpCookieStore {
    jar: Arc<Jar>,
    origin: Url,
    backing: Arc<dyn KeyValueStore>,
}

impl HttpCookieStore {
    /// Cookies already present in `backing` are replayed into the jar.
    pub fn new(
        jar: Arc<Jar>,
        origin: Url,
        backing: Arc<dyn KeyValueStore>,
    ) -> Result<Self, StorageError> {
        for key in backing.keys()? {
            if let Some(raw) = backing.get(&key)? {
                jar.add_cookie_str(&raw, &origin);
            }
        }

        Ok(Self {
            jar,
            origin,
            backing,
        })
    }

    pub fn jar(&self) -> &Arc<Jar> {
        &self.jar
    }
}

impl KeyValueStore for HttpCookieStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.backing.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.jar.add_cookie_str(value, &self.origin);
        self.backing.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.jar
            .add_cookie_str(&format!("{}=; Path=/; Max-Age=0", key), &self.origin);
        self.backing.remove(key)
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.backing.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::cookie::CookieStore;

    #[test]
    fn test_http_cookie_store_mirrors_into_jar() {
        let origin = Url::parse("http://admin.local/").unwrap();
        let backing: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        backing
            .set("theme", "theme=dark; Path=/; SameSite=Strict")
            .unwrap();

        let jar = Arc::new(Jar::default());
        let store = HttpCookieStore::new(Arc::clone(&jar), origin.clone(), backing).unwrap();
        store
            .set("XSRF-TOKEN", "XSRF-TOKEN=abc123; Path=/; SameSite=Strict")
            .unwrap();

        let header = jar.cookies(&origin).unwrap();
        let header = header.to_str().unwrap();
        assert!(header.contains("XSRF-TOKEN=abc123"));
        assert!(header.contains("theme=dark"));

        store.remove("XSRF-TOKEN").unwrap();
        let header = jar.cookies(&origin).unwrap();
        assert!(!header.to_str().unwrap().contains("XSRF-TOKEN"));
        assert_eq!(store.get("XSRF-TOKEN").unwrap(), None);
    }

    #[test]
    fn test_memory_store_basic_operations() {
        let store = MemoryStore::new();
        assert_eq!(store.get("missing").unwrap(), None);

        store.set("cache_users", "[]").unwrap();
        store.set("admin_user", "{}").unwrap();
        assert_eq!(store.get("cache_users").unwrap(), Some("[]".to_string()));
        assert_eq!(store.keys().unwrap(), vec!["admin_user", "cache_users"]);

        store.remove("cache_users").unwrap();
        store.remove("cache_users").unwrap();
        assert_eq!(store.keys().unwrap(), vec!["admin_user"]);
    }

    #[test]
    fn test_json_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        {
            let store = JsonFileStore::open(&path).unwrap();
            store.set("admin_user", r#"{"username":"ada"}"#).unwrap();
            store.set("api_calendars", "[]").unwrap();
            store.remove("api_calendars").unwrap();
        }

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("admin_user").unwrap(),
            Some(r#"{"username":"ada"}"#.to_string())
        );
        assert_eq!(reopened.get("api_calendars").unwrap(), None);
    }

    #[test]
    fn test_json_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "not json").unwrap();

        assert!(matches!(
            JsonFileStore::open(&path),
            Err(StorageError::Serialization(_))
        ));
    }
}
