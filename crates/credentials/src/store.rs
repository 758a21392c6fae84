use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential store I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("credential store {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("credential store lock poisoned")]
    Poisoned,
}

/// Persisted secret store keyed by `(key, login)`.
///
/// Implementations provide their own internal consistency; callers treat
/// every operation as a single atomic step.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get_item(&self, key: &str, login: &str) -> Result<Option<String>, CredentialError>;
    async fn set_item(&self, key: &str, login: &str, secret: &str) -> Result<(), CredentialError>;
    /// Returns `true` when an entry was removed.
    async fn delete_item(&self, key: &str, login: &str) -> Result<bool, CredentialError>;
}

// ── In-memory store ──────────────────────────────────────────────────────────

/// Non-persistent store for tests and for embedders that keep secrets in
/// their own vault and only hand the trampoline what it needs.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    items: RwLock<HashMap<(String, String), String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get_item(&self, key: &str, login: &str) -> Result<Option<String>, CredentialError> {
        let items = self.items.read().map_err(|_| CredentialError::Poisoned)?;
        Ok(items.get(&(key.to_string(), login.to_string())).cloned())
    }

    async fn set_item(&self, key: &str, login: &str, secret: &str) -> Result<(), CredentialError> {
        let mut items = self.items.write().map_err(|_| CredentialError::Poisoned)?;
        items.insert((key.to_string(), login.to_string()), secret.to_string());
        Ok(())
    }

    async fn delete_item(&self, key: &str, login: &str) -> Result<bool, CredentialError> {
        let mut items = self.items.write().map_err(|_| CredentialError::Poisoned)?;
        Ok(items.remove(&(key.to_string(), login.to_string())).is_some())
    }
}

// ── JSON file store ──────────────────────────────────────────────────────────

type Entries = BTreeMap<String, BTreeMap<String, String>>;

/// Token store persisted as a JSON document (`{ key: { login: secret } }`).
///
/// Every mutation rewrites the whole file through a temporary sibling and a
/// rename, holding an async mutex so concurrent writers cannot interleave.
/// On Unix the file is created with mode `0600`.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Entries, CredentialError> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) if raw.is_empty() => Ok(Entries::new()),
            Ok(raw) => serde_json::from_slice(&raw).map_err(|source| CredentialError::Corrupt {
                path: self.path.clone(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Entries::new()),
            Err(source) => Err(CredentialError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    async fn save(&self, entries: &Entries) -> Result<(), CredentialError> {
        let io_err = |source| CredentialError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
            }
        }

        let rendered = serde_json::to_vec_pretty(entries).map_err(|source| {
            CredentialError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, rendered).await.map_err(io_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(io_err)?;
        }

        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn get_item(&self, key: &str, login: &str) -> Result<Option<String>, CredentialError> {
        let entries = self.load().await?;
        Ok(entries.get(key).and_then(|logins| logins.get(login)).cloned())
    }

    async fn set_item(&self, key: &str, login: &str, secret: &str) -> Result<(), CredentialError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        entries
            .entry(key.to_string())
            .or_default()
            .insert(login.to_string(), secret.to_string());
        self.save(&entries).await?;
        debug!(key, login, "token stored");
        Ok(())
    }

    async fn delete_item(&self, key: &str, login: &str) -> Result<bool, CredentialError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        let removed = match entries.get_mut(key) {
            Some(logins) => {
                let removed = logins.remove(login).is_some();
                if logins.is_empty() {
                    entries.remove(key);
                }
                removed
            }
            None => false,
        };
        if removed {
            self.save(&entries).await?;
            debug!(key, login, "token deleted");
        }
        Ok(removed)
    }
}
