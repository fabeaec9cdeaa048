//! Master key derivation.
//!
//! The master key is PBKDF2-HMAC-SHA256 over the user's password and a
//! vault-wide random salt. The salt is written once, on first derivation, to
//! `.master_salt` (mode `0600`); for the in-memory backend it lives in process
//! memory instead.
//!
//! Both entry points share [`MasterKeyManager::derive`] so a key produced at
//! initialization and a key produced at unlock are always byte-identical.
//!
//! A remembered key is stored in the secret store as `SHA-256(salt ‖ password)`
//! followed by the key. The entry only answers for the password and salt it
//! was derived from, so vaults sharing a keyring entry name never hand each
//! other their keys.

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use devhub_core::paths;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::{VaultBackend, VaultConfig};
use crate::crypto::{self, MasterKey, KEY_SIZE};
use crate::error::{Result, VaultError};
use crate::keychain::{SecretStore, SERVICE_NAME};

/// Length of the vault-wide key derivation salt.
pub const MASTER_SALT_SIZE: usize = 16;

/// Length of the salted password digest prefixed to a remembered key.
const DIGEST_SIZE: usize = 32;

/// How a derivation treats missing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// First use: create the salt if needed.
    Create,
    /// Unlock: the salt must already exist.
    Existing,
}

/// Where the vault-wide salt lives.
#[derive(Debug)]
enum SaltSource {
    File(PathBuf),
    Memory(Mutex<Option<Vec<u8>>>),
}

/// Derives the vault master key from a password.
pub struct MasterKeyManager {
    salt: SaltSource,
    iterations: NonZeroU32,
    key_name: String,
    secrets: Arc<dyn SecretStore>,
}

impl MasterKeyManager {
    /// Build a manager for `config` on the resolved `backend`, remembering
    /// keys in `secrets`.
    pub fn new(
        config: &VaultConfig,
        backend: VaultBackend,
        secrets: Arc<dyn SecretStore>,
    ) -> Result<Self> {
        let iterations = NonZeroU32::new(config.kdf_iterations).ok_or_else(|| {
            VaultError::KeyDerivationFailed("kdf_iterations must be greater than 0".to_string())
        })?;

        let salt = match backend {
            VaultBackend::Memory => SaltSource::Memory(Mutex::new(None)),
            _ => SaltSource::File(config.salt_file()),
        };

        Ok(Self {
            salt,
            iterations,
            key_name: config.master_key_name.clone(),
            secrets,
        })
    }

    /// Whether a salt exists, i.e. a key has been derived for this vault before.
    pub fn has_salt(&self) -> Result<bool> {
        Ok(self.load_salt()?.is_some())
    }

    /// Derive the master key, creating the salt on first use.
    pub fn derive_or_create(&self, password: &[u8]) -> Result<MasterKey> {
        self.derive(password, Mode::Create)
    }

    /// Re-derive the master key for unlock. Never writes anything.
    ///
    /// Fails with [`VaultError::NotInitialized`] when no salt exists.
    pub fn rederive(&self, password: &[u8]) -> Result<MasterKey> {
        self.derive(password, Mode::Existing)
    }

    fn derive(&self, password: &[u8], mode: Mode) -> Result<MasterKey> {
        let salt = match (self.load_salt()?, mode) {
            (Some(salt), _) => salt,
            (None, Mode::Create) => self.create_salt()?,
            (None, Mode::Existing) => return Err(VaultError::NotInitialized),
        };

        Ok(crypto::derive_master_key(password, &salt, self.iterations))
    }

    /// Key remembered in the secret store for this password and salt.
    ///
    /// Returns `None` when no salt exists yet, when the secret store has no
    /// usable entry, or when the entry was written for another password or
    /// another vault. The caller must still check the key against stored data.
    pub fn recall(&self, password: &[u8]) -> Result<Option<MasterKey>> {
        let Some(salt) = self.load_salt()? else {
            return Ok(None);
        };

        let entry = match self.secrets.get(SERVICE_NAME, &self.key_name) {
            Ok(Some(bytes)) => Zeroizing::new(bytes),
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(error = %e, "secret store unavailable; deriving master key");
                return Ok(None);
            }
        };

        if entry.len() != DIGEST_SIZE + KEY_SIZE {
            warn!(key_name = %self.key_name, "ignoring malformed remembered master key");
            return Ok(None);
        }

        let (digest, key) = entry.split_at(DIGEST_SIZE);
        let Ok(expected) = <[u8; DIGEST_SIZE]>::try_from(digest) else {
            return Ok(None);
        };
        let candidate = crypto::salted_password_hash(&salt, password);
        if !crypto::password_hash_matches(&expected, &candidate) {
            debug!(key_name = %self.key_name, "remembered master key is for another vault or password");
            return Ok(None);
        }

        Ok(MasterKey::from_slice(key).ok())
    }

    /// Store `key` in the secret store for this password and salt.
    ///
    /// Best effort: failures are logged. Only call this with a key that has
    /// been checked against the vault's data.
    pub fn remember(&self, password: &[u8], key: &MasterKey) {
        let salt = match self.load_salt() {
            Ok(Some(salt)) => salt,
            Ok(None) => {
                warn!(key_name = %self.key_name, "no master salt; not remembering key");
                return;
            }
            Err(e) => {
                warn!(error = %e, "failed to read master salt; not remembering key");
                return;
            }
        };

        let mut entry = Zeroizing::new(Vec::with_capacity(DIGEST_SIZE + KEY_SIZE));
        entry.extend_from_slice(&crypto::salted_password_hash(&salt, password));
        entry.extend_from_slice(key.as_bytes());

        match self.secrets.set(SERVICE_NAME, &self.key_name, &entry) {
            Ok(()) => debug!(key_name = %self.key_name, "remembered master key"),
            Err(e) => warn!(error = %e, "failed to remember master key in secret store"),
        }
    }

    fn load_salt(&self) -> Result<Option<Vec<u8>>> {
        let salt = match &self.salt {
            SaltSource::File(path) => match std::fs::read(path) {
                Ok(bytes) => Some(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(e.into()),
            },
            SaltSource::Memory(slot) => slot
                .lock()
                .map_err(|_| VaultError::KeyDerivationFailed("salt lock poisoned".to_string()))?
                .clone(),
        };

        match salt {
            Some(bytes) if bytes.is_empty() => Err(VaultError::KeyDerivationFailed(
                "master salt is empty".to_string(),
            )),
            other => Ok(other),
        }
    }

    fn create_salt(&self) -> Result<Vec<u8>> {
        let salt = crypto::random_bytes(MASTER_SALT_SIZE);
        match &self.salt {
            SaltSource::File(path) => {
                paths::write_private_file(path, &salt)?;
                info!(path = %path.display(), "created master salt");
            }
            SaltSource::Memory(slot) => {
                let mut slot = slot.lock().map_err(|_| {
                    VaultError::KeyDerivationFailed("salt lock poisoned".to_string())
                })?;
                *slot = Some(salt.clone());
            }
        }
        Ok(salt)
    }
}

impl std::fmt::Debug for MasterKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKeyManager")
            .field("salt", &self.salt)
            .field("iterations", &self.iterations)
            .field("key_name", &self.key_name)
            .finish_non_exhaustive()
    }
}
