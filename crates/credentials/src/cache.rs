use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use trampoline_config::PinnedHost;

use crate::{SSH_PASSPHRASE_STORE_KEY, TokenStore};

/// Host trust allowlist plus SSH key passphrase cache.
///
/// One instance is built at startup and shared (`Arc`) by every resolver.
/// Reads and writes of the two maps go through `RwLock`s; callers that need
/// "check, ask a human, then populate" to be atomic per key hold the guard
/// returned by [`CredentialCache::lock_key`] for the whole sequence.
///
/// A passphrase typed by the user is *staged*: it only counts as proven once
/// [`CredentialCache::confirm_passphrases`] is called after the operation
/// that used it succeeded.  Until then it is handed out only to prompts that
/// were already waiting when it was entered; a later prompt for the same key
/// means `ssh` rejected it.
pub struct CredentialCache {
    trusted_hosts: RwLock<HashSet<(String, String)>>,
    passphrases: RwLock<HashMap<String, CachedPassphrase>>,
    generation: AtomicU64,
    store: Option<Arc<dyn TokenStore>>,
    key_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

#[derive(Clone)]
struct CachedPassphrase {
    passphrase: String,
    proven: bool,
    remember: bool,
    generation: u64,
}

impl Default for CredentialCache {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl CredentialCache {
    /// A cache whose allowlist starts with `pinned` and whose passphrases
    /// live in memory only.
    pub fn new(pinned: impl IntoIterator<Item = PinnedHost>) -> Self {
        let trusted_hosts = pinned
            .into_iter()
            .map(|p| (p.host, p.fingerprint))
            .collect();
        Self {
            trusted_hosts: RwLock::new(trusted_hosts),
            passphrases: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            store: None,
            key_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Back remembered passphrases with a persistent token store.
    pub fn with_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    // ── Host trust ──────────────────────────────────────────────────────────

    pub fn is_host_trusted(&self, host: &str, fingerprint: &str) -> bool {
        self.trusted_hosts
            .read()
            .map(|hosts| hosts.contains(&(host.to_string(), fingerprint.to_string())))
            .unwrap_or(false)
    }

    pub fn trust_host(&self, host: &str, fingerprint: &str) {
        match self.trusted_hosts.write() {
            Ok(mut hosts) => {
                if hosts.insert((host.to_string(), fingerprint.to_string())) {
                    debug!(host, "host added to trust allowlist");
                }
            }
            Err(_) => warn!(host, "trust allowlist lock poisoned; host not recorded"),
        }
    }

    // ── SSH key passphrases ─────────────────────────────────────────────────

    /// Marker to take before waiting on [`CredentialCache::lock_key`] and pass
    /// to [`CredentialCache::passphrase`] afterwards.
    pub fn passphrase_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Passphrase to answer a prompt for `key_path` that arrived at
    /// `arrived_at`.
    ///
    /// Proven passphrases are always returned; a staged one only when it was
    /// entered after `arrived_at`.  A staged passphrase that was already there
    /// when the prompt arrived is dropped as rejected.  Falls back to the
    /// persistent store, whose entries count as proven.
    pub async fn passphrase(&self, key_path: &str, arrived_at: u64) -> Option<String> {
        let cached = self
            .passphrases
            .read()
            .ok()
            .and_then(|map| map.get(key_path).cloned());
        match cached {
            Some(entry) if entry.proven || entry.generation > arrived_at => {
                return Some(entry.passphrase);
            }
            Some(_) => {
                debug!(key_path, "staged ssh key passphrase was rejected; dropping it");
                if let Ok(mut map) = self.passphrases.write() {
                    map.remove(key_path);
                }
                return None;
            }
            None => {}
        }

        let store = self.store.as_ref()?;
        match store.get_item(SSH_PASSPHRASE_STORE_KEY, key_path).await {
            Ok(Some(passphrase)) => {
                self.insert(key_path, &passphrase, true, false);
                Some(passphrase)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(%err, "failed to read stored SSH key passphrase");
                None
            }
        }
    }

    /// Stage a passphrase the user just entered.  With `remember` it is
    /// written to the token store once confirmed.
    pub fn stage_passphrase(&self, key_path: &str, passphrase: &str, remember: bool) {
        self.insert(key_path, passphrase, false, remember);
    }

    /// Mark every staged passphrase as proven and persist the remembered
    /// ones.  Call after an operation that used them succeeded.
    pub async fn confirm_passphrases(&self) {
        let to_persist = match self.passphrases.write() {
            Ok(mut map) => {
                let mut to_persist = Vec::new();
                for (key_path, entry) in map.iter_mut().filter(|(_, e)| !e.proven) {
                    entry.proven = true;
                    if entry.remember {
                        to_persist.push((key_path.clone(), entry.passphrase.clone()));
                    }
                }
                to_persist
            }
            Err(_) => {
                warn!("passphrase cache lock poisoned; nothing confirmed");
                return;
            }
        };

        let Some(store) = &self.store else {
            return;
        };
        for (key_path, passphrase) in to_persist {
            if let Err(err) = store
                .set_item(SSH_PASSPHRASE_STORE_KEY, &key_path, &passphrase)
                .await
            {
                warn!(%err, "failed to persist SSH key passphrase");
            }
        }
    }

    fn insert(&self, key_path: &str, passphrase: &str, proven: bool, remember: bool) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        match self.passphrases.write() {
            Ok(mut map) => {
                map.insert(
                    key_path.to_string(),
                    CachedPassphrase {
                        passphrase: passphrase.to_string(),
                        proven,
                        remember,
                        generation,
                    },
                );
            }
            Err(_) => warn!("passphrase cache lock poisoned; passphrase not cached"),
        }
    }

    // ── Per-key serialization ───────────────────────────────────────────────

    /// Exclusive guard for `key`.  Two resolutions of the same host or key
    /// path run one after the other; different keys never block each other.
    pub async fn lock_key(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = match self.key_locks.lock() {
                Ok(locks) => locks,
                Err(poisoned) => poisoned.into_inner(),
            };
            // Entries nobody holds or waits on are only referenced by the map.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.key_locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }
}
