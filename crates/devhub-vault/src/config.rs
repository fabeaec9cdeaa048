//! Vault configuration.
//!
//! [`VaultConfig`] is built once and shared read-only by every vault
//! component. It can be loaded from `~/.devhub/vault.json5`, overridden from
//! the environment, and validated before use.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use devhub_core::env::{self, vars};
use devhub_core::{paths, ConfigError};
use serde::{Deserialize, Serialize};

/// File name of the vault-wide key derivation salt.
pub const SALT_FILE_NAME: &str = ".master_salt";

/// File name of the serialized credential map.
pub const CREDENTIALS_FILE_NAME: &str = "credentials.json";

/// File name of the marker callers use to pick `initialize` over `unlock`.
pub const INITIALIZED_MARKER_NAME: &str = ".initialized";

/// Storage backend for the vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultBackend {
    /// Credentials file on disk, master key cached in the OS keyring.
    OsKeyring,
    /// Credentials file on disk only.
    FileSystem,
    /// Process memory only; nothing touches disk.
    Memory,
    /// Hardware security module. Not implemented; resolves to the fallback.
    Hsm,
}

impl VaultBackend {
    /// Parse a backend name as written in config files and env vars.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "os_keyring" | "keyring" => Some(Self::OsKeyring),
            "file_system" | "filesystem" | "file" => Some(Self::FileSystem),
            "memory" => Some(Self::Memory),
            "hsm" => Some(Self::Hsm),
            _ => None,
        }
    }

    /// Whether records and salt are kept on disk.
    pub fn is_persistent(self) -> bool {
        !matches!(self, Self::Memory)
    }
}

/// Immutable vault configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Primary storage backend.
    #[serde(default = "default_backend")]
    pub backend: VaultBackend,

    /// Backend used when the primary one is unavailable.
    #[serde(default = "default_fallback_backend")]
    pub fallback_backend: VaultBackend,

    /// Directory holding the salt and credentials files.
    #[serde(default = "default_vault_dir")]
    pub vault_dir: PathBuf,

    /// PBKDF2-HMAC-SHA256 iteration count for the master key.
    #[serde(default = "default_kdf_iterations", alias = "encryption_rounds")]
    pub kdf_iterations: u32,

    /// Keyring entry name the derived master key is cached under.
    #[serde(default = "default_master_key_name")]
    pub master_key_name: String,

    /// Whether audit entries are written.
    #[serde(default = "default_true")]
    pub audit_enabled: bool,

    /// Path of the append-only audit log.
    #[serde(default = "default_audit_file")]
    pub audit_file: PathBuf,

    /// Idle seconds after which the vault locks itself.
    #[serde(default = "default_auto_lock_timeout")]
    pub auto_lock_timeout: f64,

    /// Consecutive wrong passwords tolerated before lockout.
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: u32,

    /// Require biometric confirmation. Carried for callers; unused by the vault.
    #[serde(default)]
    pub require_biometric: bool,

    /// Number of audit entries that may wait for the writer before new ones
    /// are dropped.
    #[serde(default = "default_audit_queue_capacity")]
    pub audit_queue_capacity: usize,
}

fn default_backend() -> VaultBackend {
    VaultBackend::OsKeyring
}

fn default_fallback_backend() -> VaultBackend {
    VaultBackend::FileSystem
}

fn default_vault_dir() -> PathBuf {
    paths::vault_dir().unwrap_or_else(|_| PathBuf::from(".devhub").join("vault"))
}

fn default_kdf_iterations() -> u32 {
    100_000
}

fn default_master_key_name() -> String {
    "devhub_vault_master_key".to_string()
}

fn default_true() -> bool {
    true
}

fn default_audit_file() -> PathBuf {
    paths::audit_file().unwrap_or_else(|_| PathBuf::from(".devhub").join("vault.audit"))
}

fn default_auto_lock_timeout() -> f64 {
    3600.0
}

fn default_max_failed_attempts() -> u32 {
    3
}

fn default_audit_queue_capacity() -> usize {
    256
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            fallback_backend: default_fallback_backend(),
            vault_dir: default_vault_dir(),
            kdf_iterations: default_kdf_iterations(),
            master_key_name: default_master_key_name(),
            audit_enabled: true,
            audit_file: default_audit_file(),
            auto_lock_timeout: default_auto_lock_timeout(),
            max_failed_attempts: default_max_failed_attempts(),
            require_biometric: false,
            audit_queue_capacity: default_audit_queue_capacity(),
        }
    }
}

impl VaultConfig {
    /// Config rooted at `vault_dir`, with the audit log inside it.
    pub fn in_dir(vault_dir: impl Into<PathBuf>) -> Self {
        let vault_dir = vault_dir.into();
        Self {
            audit_file: vault_dir.join("vault.audit"),
            vault_dir,
            ..Self::default()
        }
    }

    /// Load configuration from the default path, falling back to defaults
    /// when no file exists. Environment overrides are applied either way.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = paths::vault_config_file()?;
        let mut config = if path.exists() {
            Self::load(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self =
            json5::from_str(content).map_err(|e| ConfigError::Json5(e.to_string()))?;
        config.vault_dir = paths::expand_tilde(&config.vault_dir.to_string_lossy());
        config.audit_file = paths::expand_tilde(&config.audit_file.to_string_lossy());
        Ok(config)
    }

    /// Save configuration to a file path.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write atomically
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Apply `DEVHUB_VAULT_*` environment variables on top of this config.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(dir) = env::get_var(vars::DEVHUB_VAULT_DIR) {
            self.vault_dir = paths::expand_tilde(&dir);
        }
        if let Some(name) = env::get_var(vars::DEVHUB_VAULT_BACKEND) {
            self.backend = VaultBackend::parse(&name).ok_or_else(|| {
                ConfigError::Validation(format!(
                    "{} has unknown backend '{name}'",
                    vars::DEVHUB_VAULT_BACKEND
                ))
            })?;
        }
        if let Some(enabled) = env::get_bool(vars::DEVHUB_VAULT_AUDIT) {
            self.audit_enabled = enabled;
        }
        if let Some(file) = env::get_var(vars::DEVHUB_VAULT_AUDIT_FILE) {
            self.audit_file = paths::expand_tilde(&file);
        }
        if let Some(raw) = env::get_var(vars::DEVHUB_VAULT_AUTO_LOCK) {
            self.auto_lock_timeout = raw.parse().map_err(|_| {
                ConfigError::Validation(format!(
                    "{} must be a number of seconds, got '{raw}'",
                    vars::DEVHUB_VAULT_AUTO_LOCK
                ))
            })?;
        }
        Ok(())
    }

    /// Validate the configuration, collecting all errors before returning.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.kdf_iterations == 0 {
            errors.push("kdf_iterations must be greater than 0".to_string());
        }

        if self.master_key_name.trim().is_empty() {
            errors.push("master_key_name must not be empty".to_string());
        }

        if !self.auto_lock_timeout.is_finite() || self.auto_lock_timeout < 0.0 {
            errors.push(format!(
                "auto_lock_timeout must be a non-negative number of seconds, got {}",
                self.auto_lock_timeout
            ));
        }

        if self.max_failed_attempts == 0 {
            errors.push("max_failed_attempts must be at least 1".to_string());
        }

        if self.fallback_backend == VaultBackend::Hsm {
            errors.push("fallback_backend cannot be hsm".to_string());
        }

        if self.audit_enabled && self.audit_queue_capacity == 0 {
            errors.push("audit_queue_capacity must be at least 1".to_string());
        }

        if self.backend.is_persistent() && self.vault_dir.as_os_str().is_empty() {
            errors.push("vault_dir must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors.join("; ")))
        }
    }

    /// The backend actually used, after resolving placeholders.
    pub fn effective_backend(&self) -> VaultBackend {
        match self.backend {
            VaultBackend::Hsm => self.fallback_backend,
            other => other,
        }
    }

    /// Idle window after which the vault auto-locks.
    pub fn auto_lock_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.auto_lock_timeout).unwrap_or(Duration::MAX)
    }

    /// Path of the vault-wide key derivation salt.
    pub fn salt_file(&self) -> PathBuf {
        self.vault_dir.join(SALT_FILE_NAME)
    }

    /// Path of the serialized credential map.
    pub fn credentials_file(&self) -> PathBuf {
        self.vault_dir.join(CREDENTIALS_FILE_NAME)
    }

    /// Path of the `.initialized` marker maintained by callers.
    pub fn initialized_marker(&self) -> PathBuf {
        self.vault_dir.join(INITIALIZED_MARKER_NAME)
    }
}
