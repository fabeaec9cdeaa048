//! The vault: lock state machine and gated credential operations.
//!
//! ```text
//! Uninitialized --initialize--> Unlocked --lock / idle--> Locked
//!                                  ^                        |
//!                                  +-------unlock-----------+
//! ```
//!
//! Every public operation takes one exclusive async lock over the runtime
//! state, so concurrent callers are serialized. Idle auto-lock is evaluated
//! lazily whenever the state is consulted; there is no background timer.
//! Consecutive wrong passwords beyond `max_failed_attempts` lock the vault
//! out for the lifetime of this instance.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use devhub_core::paths;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::audit::{AuditAction, AuditLogger, VaultAuditEntry};
use crate::config::{VaultBackend, VaultConfig};
use crate::crypto::{self, CipherEngine, MasterKey};
use crate::error::{Result, VaultError};
use crate::keychain::{self, SecretStore};
use crate::master_key::MasterKeyManager;
use crate::store::{self, CredentialStore};
use crate::types::{CredentialMetadata, DecryptedSecret, EncryptedCredential};

/// Externally visible vault state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultStatus {
    /// `initialize` has not succeeded on this instance.
    Uninitialized,
    /// Initialized but locked; `unlock` may succeed.
    Locked,
    /// Locked after too many failed attempts; `unlock` always fails.
    LockedOut,
    /// Credential operations are allowed.
    Unlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Locked,
    Unlocked,
}

/// Why the vault was locked, as recorded in the audit log.
#[derive(Debug, Clone, Copy)]
enum LockReason {
    Requested,
    IdleTimeout,
    ScopeExit,
    Shutdown,
}

impl LockReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::IdleTimeout => "idle_timeout",
            Self::ScopeExit => "scope_exit",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Runtime state, never persisted.
struct VaultState {
    phase: Phase,
    failed_attempts: u32,
    last_activity: Instant,
    password_hash: Option<Zeroizing<[u8; 32]>>,
    cipher: Option<CipherEngine>,
    store: CredentialStore,
}

impl VaultState {
    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

struct VaultInner {
    config: VaultConfig,
    backend: VaultBackend,
    keys: Arc<MasterKeyManager>,
    audit: AuditLogger,
    state: Mutex<VaultState>,
}

/// Encrypted credential vault.
///
/// Cheap to clone; clones share the same state. Build one per application
/// and hand it to every component that needs credentials.
#[derive(Clone)]
pub struct Vault {
    inner: Arc<VaultInner>,
}

impl Vault {
    /// Open a vault using the secret store that matches the configured
    /// backend.
    ///
    /// Creates the vault directory (mode `0700`) for persistent backends.
    /// Audit logging needs a Tokio runtime; outside one it is disabled.
    pub fn open(config: VaultConfig) -> Result<Self> {
        let secrets = keychain::for_backend(config.effective_backend());
        Self::with_secret_store(config, secrets)
    }

    /// Open a vault that remembers master keys in `secrets`.
    pub fn with_secret_store(config: VaultConfig, secrets: Arc<dyn SecretStore>) -> Result<Self> {
        config.validate()?;

        let backend = config.effective_backend();
        if backend != config.backend {
            warn!(
                configured = ?config.backend,
                fallback = ?backend,
                "HSM backend is not available; using fallback backend"
            );
        }

        let store = if backend.is_persistent() {
            paths::ensure_private_dir(&config.vault_dir)?;
            CredentialStore::on_disk(config.credentials_file())
        } else {
            CredentialStore::in_memory()
        };

        let audit = if config.audit_enabled {
            if let Some(parent) = config.audit_file.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    warn!(path = %parent.display(), error = %e, "failed to create audit directory");
                }
            }
            AuditLogger::spawn(&config.audit_file, config.audit_queue_capacity)
        } else {
            AuditLogger::disabled()
        };

        let keys = Arc::new(MasterKeyManager::new(&config, backend, secrets)?);

        debug!(backend = ?backend, dir = %config.vault_dir.display(), "opened vault");

        Ok(Self {
            inner: Arc::new(VaultInner {
                config,
                backend,
                keys,
                audit,
                state: Mutex::new(VaultState {
                    phase: Phase::Uninitialized,
                    failed_attempts: 0,
                    last_activity: Instant::now(),
                    password_hash: None,
                    cipher: None,
                    store,
                }),
            }),
        })
    }

    /// The configuration this vault was opened with.
    pub fn config(&self) -> &VaultConfig {
        &self.inner.config
    }

    /// The backend in use after resolving placeholders.
    pub fn backend(&self) -> VaultBackend {
        self.inner.backend
    }

    /// Derive the master key and unlock the vault for the first time on this
    /// instance.
    ///
    /// Creates the salt on a fresh vault. When the vault already holds
    /// records, the derived key must authenticate one of them; otherwise the
    /// password is rejected, counted as a failed attempt, and the vault stays
    /// uninitialized.
    pub async fn initialize(&self, password: &str) -> Result<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;

        if state.phase != Phase::Uninitialized {
            return Err(VaultError::AlreadyInitialized);
        }

        if let Err(e) = inner.check_lockout(&state) {
            inner.audit.log(VaultAuditEntry::failed(AuditAction::VaultInitializeFailed, &e));
            return Err(e);
        }

        match inner.open_store(&mut state, password).await {
            Ok(cipher) => {
                state.cipher = Some(cipher);
                state.password_hash = Some(Zeroizing::new(crypto::hash_password(
                    password.as_bytes(),
                )));
                state.phase = Phase::Unlocked;
                state.failed_attempts = 0;
                state.touch();
                info!(count = state.store.len(), "vault initialized");
                inner.audit.log(
                    VaultAuditEntry::succeeded(AuditAction::VaultInitialized)
                        .with_metadata("credentials", state.store.len()),
                );
                Ok(())
            }
            Err(e) => {
                if matches!(e, VaultError::InvalidPassword) {
                    state.failed_attempts += 1;
                }
                state.store.clear();
                warn!(error = %e, "vault initialization failed");
                inner.audit.log(
                    VaultAuditEntry::failed(AuditAction::VaultInitializeFailed, &e)
                        .with_metadata("failed_attempts", state.failed_attempts),
                );
                Err(e)
            }
        }
    }

    /// Unlock with the master password.
    ///
    /// The password is checked against the in-memory verifier before any key
    /// derivation, so wrong passwords fail cheaply. Once the failed-attempt
    /// limit is reached every call fails with
    /// [`VaultError::TooManyFailedAttempts`], even with the right password.
    pub async fn unlock(&self, password: &str) -> Result<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        inner.expire_if_idle(&mut state);

        if state.phase == Phase::Uninitialized {
            return Err(VaultError::NotInitialized);
        }

        if let Err(e) = inner.check_lockout(&state) {
            inner.audit.log(VaultAuditEntry::failed(AuditAction::VaultUnlockBlocked, &e));
            return Err(e);
        }

        let candidate = crypto::hash_password(password.as_bytes());
        let verified = state
            .password_hash
            .as_ref()
            .is_some_and(|expected| crypto::password_hash_matches(expected, &candidate));

        if !verified {
            state.failed_attempts += 1;
            warn!(failed_attempts = state.failed_attempts, "invalid master password");
            inner.audit.log(
                VaultAuditEntry::failed(AuditAction::VaultUnlockFailed, VaultError::InvalidPassword)
                    .with_metadata("failed_attempts", state.failed_attempts),
            );
            return Err(VaultError::InvalidPassword);
        }

        if state.phase == Phase::Unlocked {
            state.touch();
            return Ok(());
        }

        let unlocked = async {
            let key = inner.with_keys(password, MasterKeyManager::rederive).await?;
            state.store.load().await?;
            Ok::<_, VaultError>(CipherEngine::new(key))
        }
        .await;

        match unlocked {
            Ok(cipher) => {
                state.cipher = Some(cipher);
                state.phase = Phase::Unlocked;
                state.failed_attempts = 0;
                state.touch();
                info!(count = state.store.len(), "vault unlocked");
                inner.audit.log(VaultAuditEntry::succeeded(AuditAction::VaultUnlocked));
                Ok(())
            }
            Err(e) => {
                state.failed_attempts += 1;
                if state.store.is_persistent() {
                    state.store.clear();
                }
                warn!(error = %e, "vault unlock failed");
                inner.audit.log(
                    VaultAuditEntry::failed(AuditAction::VaultUnlockError, &e)
                        .with_metadata("failed_attempts", state.failed_attempts),
                );
                Err(e)
            }
        }
    }

    /// Lock the vault, scrubbing the master key.
    ///
    /// Does nothing on an uninitialized vault.
    pub async fn lock(&self) {
        let mut state = self.inner.state.lock().await;
        self.inner.lock_state(&mut state, LockReason::Requested);
    }

    /// Whether credential operations are currently refused.
    ///
    /// Locks the vault first if it has been idle past the auto-lock timeout.
    pub async fn is_locked(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        self.inner.expire_if_idle(&mut state);
        state.phase != Phase::Unlocked
    }

    /// Current state, applying the idle timeout first.
    pub async fn status(&self) -> VaultStatus {
        let mut state = self.inner.state.lock().await;
        self.inner.expire_if_idle(&mut state);
        if state.phase != Phase::Unlocked && self.inner.check_lockout(&state).is_err() {
            return VaultStatus::LockedOut;
        }
        match state.phase {
            Phase::Uninitialized => VaultStatus::Uninitialized,
            Phase::Locked => VaultStatus::Locked,
            Phase::Unlocked => VaultStatus::Unlocked,
        }
    }

    /// Consecutive failed unlock attempts since the last success.
    pub async fn failed_attempts(&self) -> u32 {
        self.inner.state.lock().await.failed_attempts
    }

    /// Unlock, run `f`, and lock again however `f` ends.
    ///
    /// The vault is relocked when `f` completes, panics, or the returned
    /// future is dropped before completion.
    pub async fn with_unlocked<F, Fut, T>(&self, password: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.unlock(password).await?;
        let guard = RelockGuard {
            inner: Some(Arc::clone(&self.inner)),
        };
        let output = f().await;
        guard.relock().await;
        Ok(output)
    }

    /// Encrypt and store a credential, replacing any with the same name.
    ///
    /// A replacement keeps the original `created_at`. If the credentials file
    /// cannot be written the in-memory map is rolled back and the error
    /// returned.
    pub async fn store_credential(
        &self,
        metadata: CredentialMetadata,
        data: impl AsRef<[u8]>,
    ) -> Result<()> {
        let name = metadata.name.clone();
        let credential_type = metadata.credential_type;
        let result = self.store_inner(metadata, data.as_ref()).await;

        let entry = match &result {
            Ok(()) => VaultAuditEntry::succeeded(AuditAction::CredentialStored)
                .with_metadata("credential_type", credential_type.as_str()),
            Err(e) => VaultAuditEntry::failed(AuditAction::CredentialStoreFailed, e),
        };
        self.inner.audit.log(entry.with_credential(name));
        result
    }

    async fn store_inner(&self, metadata: CredentialMetadata, data: &[u8]) -> Result<()> {
        store::validate_name(&metadata.name)?;

        let mut guard = self.inner.state.lock().await;
        self.inner.ensure_unlocked(&mut guard)?;
        let state = &mut *guard;

        let cipher = state.cipher.as_ref().ok_or(VaultError::Locked)?;
        let sealed = cipher.encrypt(data)?;

        let metadata = match state.store.get(&metadata.name) {
            Some(previous) => metadata.replacing(&previous.metadata),
            None => metadata,
        };
        let name = metadata.name.clone();
        let record = EncryptedCredential {
            metadata,
            encrypted_data: sealed.ciphertext,
            salt: sealed.salt,
            nonce: sealed.nonce,
            checksum: sealed.checksum,
        };

        let previous = state.store.insert(record);
        if let Err(e) = state.store.persist().await {
            state.store.restore(&name, previous);
            return Err(e);
        }

        state.touch();
        debug!(name = %name, "stored credential");
        Ok(())
    }

    /// Decrypt and return a credential.
    ///
    /// The record's checksum is verified before decryption and expired
    /// records are refused. A successful read bumps `access_count` and
    /// persists it; if that write fails the bump is rolled back and the error
    /// returned.
    pub async fn get_credential(&self, name: &str) -> Result<DecryptedSecret> {
        let result = self.get_inner(name).await;

        let entry = match &result {
            Ok((_, access_count)) => VaultAuditEntry::succeeded(AuditAction::CredentialAccessed)
                .with_metadata("access_count", *access_count),
            Err(e) => {
                let action = match e {
                    VaultError::NotFound(_) => AuditAction::CredentialNotFound,
                    VaultError::IntegrityFailure(_) => AuditAction::CredentialIntegrityFailed,
                    VaultError::Expired(_) => AuditAction::CredentialExpired,
                    _ => AuditAction::CredentialAccessFailed,
                };
                VaultAuditEntry::failed(action, e)
            }
        };
        self.inner.audit.log(entry.with_credential(name));

        result.map(|(secret, _)| secret)
    }

    async fn get_inner(&self, name: &str) -> Result<(DecryptedSecret, u64)> {
        let mut guard = self.inner.state.lock().await;
        self.inner.ensure_unlocked(&mut guard)?;
        let state = &mut *guard;

        let cipher = state.cipher.as_ref().ok_or(VaultError::Locked)?;
        let record = state
            .store
            .get(name)
            .ok_or_else(|| VaultError::NotFound(name.to_string()))?;

        if !record.verify_integrity() {
            warn!(name, "credential failed integrity check");
            return Err(VaultError::IntegrityFailure(name.to_string()));
        }
        if record.metadata.is_expired() {
            return Err(VaultError::Expired(name.to_string()));
        }

        let mut plaintext = cipher.decrypt(record)?;
        let accessed = record.with_metadata(record.metadata.with_access());
        let access_count = accessed.metadata.access_count;

        let previous = state.store.insert(accessed);
        if let Err(e) = state.store.persist().await {
            state.store.restore(name, previous);
            plaintext.zeroize();
            return Err(e);
        }

        state.touch();
        debug!(name, access_count, "read credential");
        Ok((DecryptedSecret::new(plaintext), access_count))
    }

    /// Remove a credential.
    pub async fn delete_credential(&self, name: &str) -> Result<()> {
        let result = self.delete_inner(name).await;

        let entry = match &result {
            Ok(()) => VaultAuditEntry::succeeded(AuditAction::CredentialDeleted),
            Err(e) => VaultAuditEntry::failed(AuditAction::CredentialDeleteFailed, e),
        };
        self.inner.audit.log(entry.with_credential(name));
        result
    }

    async fn delete_inner(&self, name: &str) -> Result<()> {
        let mut guard = self.inner.state.lock().await;
        self.inner.ensure_unlocked(&mut guard)?;
        let state = &mut *guard;

        let removed = state
            .store
            .remove(name)
            .ok_or_else(|| VaultError::NotFound(name.to_string()))?;

        if let Err(e) = state.store.persist().await {
            state.store.restore(name, Some(removed));
            return Err(e);
        }

        state.touch();
        debug!(name, "deleted credential");
        Ok(())
    }

    /// Metadata of every credential, ordered by name.
    ///
    /// Returns an empty list instead of an error while locked.
    pub async fn list_credentials(&self) -> Vec<CredentialMetadata> {
        let mut state = self.inner.state.lock().await;
        self.inner.expire_if_idle(&mut state);
        if state.phase != Phase::Unlocked {
            return Vec::new();
        }
        state.touch();
        state.store.metadata()
    }

    /// Lock the vault and wait for queued audit entries to be written.
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock().await;
            self.inner.lock_state(&mut state, LockReason::Shutdown);
        }
        self.inner.audit.shutdown().await;
    }

    /// Wait until every audit entry queued so far has been written.
    pub async fn flush_audit(&self) {
        self.inner.audit.flush().await;
    }
}

impl fmt::Debug for Vault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vault")
            .field("backend", &self.inner.backend)
            .field("vault_dir", &self.inner.config.vault_dir)
            .field("audit", &self.inner.audit)
            .finish_non_exhaustive()
    }
}

impl VaultInner {
    fn check_lockout(&self, state: &VaultState) -> Result<()> {
        if state.failed_attempts >= self.config.max_failed_attempts {
            return Err(VaultError::TooManyFailedAttempts {
                attempts: state.failed_attempts,
            });
        }
        Ok(())
    }

    fn expire_if_idle(&self, state: &mut VaultState) {
        if state.phase == Phase::Unlocked
            && state.last_activity.elapsed() > self.config.auto_lock_duration()
        {
            info!("vault idle past auto-lock timeout");
            self.lock_state(state, LockReason::IdleTimeout);
        }
    }

    fn ensure_unlocked(&self, state: &mut VaultState) -> Result<()> {
        self.expire_if_idle(state);
        match state.phase {
            Phase::Unlocked => Ok(()),
            Phase::Locked => Err(VaultError::Locked),
            Phase::Uninitialized => Err(VaultError::NotInitialized),
        }
    }

    fn lock_state(&self, state: &mut VaultState, reason: LockReason) {
        if state.phase == Phase::Uninitialized {
            return;
        }

        if let Some(mut cipher) = state.cipher.take() {
            cipher.scrub();
        }
        if state.store.is_persistent() {
            state.store.clear();
        }
        state.phase = Phase::Locked;
        state.touch();

        debug!(reason = reason.as_str(), "vault locked");
        self.audit.log(
            VaultAuditEntry::succeeded(AuditAction::VaultLocked)
                .with_metadata("reason", reason.as_str()),
        );
    }

    /// Run blocking key work (KDF, secret store) off the async executor.
    async fn with_keys<F, T>(&self, password: &str, f: F) -> Result<T>
    where
        F: FnOnce(&MasterKeyManager, &[u8]) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let keys = Arc::clone(&self.keys);
        let password = Zeroizing::new(password.as_bytes().to_vec());
        tokio::task::spawn_blocking(move || f(keys.as_ref(), password.as_slice()))
            .await
            .map_err(|e| VaultError::KeyDerivationFailed(format!("key derivation task failed: {e}")))?
    }

    /// Load the store and find a key for `initialize` that opens it.
    ///
    /// A remembered key is tried first; if it does not authenticate the
    /// stored data the key is derived again. Only a derived key that passes
    /// the check is remembered.
    async fn open_store(&self, state: &mut VaultState, password: &str) -> Result<CipherEngine> {
        state.store.load().await?;

        if let Some(key) = self.with_keys(password, MasterKeyManager::recall).await? {
            let cipher = CipherEngine::new(key);
            match verify_key(&cipher, &state.store) {
                Ok(()) => {
                    debug!("using remembered master key");
                    return Ok(cipher);
                }
                Err(VaultError::DecryptionFailed(_)) => {
                    warn!("remembered master key does not open this vault; deriving");
                }
                Err(e) => return Err(e),
            }
        }

        let key = self.with_keys(password, MasterKeyManager::derive_or_create).await?;
        let cipher = CipherEngine::new(key.clone());
        match verify_key(&cipher, &state.store) {
            Ok(()) => {}
            Err(VaultError::DecryptionFailed(_)) => return Err(VaultError::InvalidPassword),
            Err(e) => return Err(e),
        }

        self.with_keys(password, move |keys, password| {
            keys.remember(password, &key);
            Ok(())
        })
        .await?;

        Ok(cipher)
    }
}

/// Check `cipher` against the first intact record. An empty store accepts
/// any key.
fn verify_key(cipher: &CipherEngine, store: &CredentialStore) -> Result<()> {
    if let Some(record) = store.first_intact() {
        let mut plaintext = cipher.decrypt(record)?;
        plaintext.zeroize();
    }
    Ok(())
}

/// Relocks the vault when dropped, unless [`RelockGuard::relock`] ran.
struct RelockGuard {
    inner: Option<Arc<VaultInner>>,
}

impl RelockGuard {
    async fn relock(mut self) {
        if let Some(inner) = self.inner.take() {
            let mut state = inner.state.lock().await;
            inner.lock_state(&mut state, LockReason::ScopeExit);
        }
    }
}

impl Drop for RelockGuard {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };

        if let Ok(mut state) = inner.state.try_lock() {
            inner.lock_state(&mut state, LockReason::ScopeExit);
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let mut state = inner.state.lock().await;
                    inner.lock_state(&mut state, LockReason::ScopeExit);
                });
            }
            Err(_) => warn!("could not relock vault: state busy and no runtime available"),
        }
    }
}
