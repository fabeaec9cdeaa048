//! OS secret store integration for caching the derived master key.
//!
//! The vault only ever needs two operations from an external secret store:
//! read an entry and write an entry, both addressed by `(service, key)`.
//! [`SecretStore`] captures exactly that, and the implementation is chosen
//! once when the vault is built:
//!
//! - [`OsSecretStore`]: platform keyring (macOS Keychain, Windows Credential
//!   Manager, Linux kernel keyutils) via the `keyring` crate
//! - [`NoopSecretStore`]: nothing is remembered; every unlock re-derives
//! - [`MemorySecretStore`]: process-local map, for tests and embedding

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;

use crate::config::VaultBackend;
use crate::error::{Result, VaultError};

/// Service name all vault entries are filed under.
pub const SERVICE_NAME: &str = "devhub";

/// Capability for remembering small secrets outside the vault directory.
pub trait SecretStore: Send + Sync {
    /// Read the entry for `(service, key)`. `Ok(None)` when absent.
    fn get(&self, service: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Create or replace the entry for `(service, key)`.
    fn set(&self, service: &str, key: &str, value: &[u8]) -> Result<()>;
}

/// Pick the secret store matching a resolved backend.
pub fn for_backend(backend: VaultBackend) -> Arc<dyn SecretStore> {
    match backend {
        VaultBackend::OsKeyring => Arc::new(OsSecretStore),
        _ => Arc::new(NoopSecretStore),
    }
}

/// Platform keyring backed by the `keyring` crate.
///
/// Values are stored base64-encoded since not every platform store accepts
/// arbitrary bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSecretStore;

impl OsSecretStore {
    fn entry(service: &str, key: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(service, key)
            .map_err(|e| VaultError::Keychain(format!("failed to open keyring entry: {e}")))
    }
}

impl SecretStore for OsSecretStore {
    fn get(&self, service: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let entry = Self::entry(service, key)?;
        match entry.get_password() {
            Ok(encoded) => {
                let value = STANDARD.decode(encoded.trim()).map_err(|e| {
                    VaultError::Keychain(format!("keyring entry is not valid base64: {e}"))
                })?;
                debug!(service, key, "read entry from OS keyring");
                Ok(Some(value))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(VaultError::Keychain(format!("keyring read failed: {e}"))),
        }
    }

    fn set(&self, service: &str, key: &str, value: &[u8]) -> Result<()> {
        let entry = Self::entry(service, key)?;
        entry
            .set_password(&STANDARD.encode(value))
            .map_err(|e| VaultError::Keychain(format!("keyring write failed: {e}")))?;
        debug!(service, key, "wrote entry to OS keyring");
        Ok(())
    }
}

/// Secret store that remembers nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSecretStore;

impl SecretStore for NoopSecretStore {
    fn get(&self, _service: &str, _key: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn set(&self, _service: &str, _key: &str, _value: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// In-process secret store.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, service: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| VaultError::Keychain("memory secret store poisoned".to_string()))?;
        Ok(entries.get(&(service.to_string(), key.to_string())).cloned())
    }

    fn set(&self, service: &str, key: &str, value: &[u8]) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| VaultError::Keychain("memory secret store poisoned".to_string()))?;
        entries.insert((service.to_string(), key.to_string()), value.to_vec());
        Ok(())
    }
}
