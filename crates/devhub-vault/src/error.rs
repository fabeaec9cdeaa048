//! Error types for the credential vault.

use devhub_core::ConfigError;
use thiserror::Error;

/// Errors that can occur during vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Vault not initialized")]
    NotInitialized,

    #[error("Vault already initialized")]
    AlreadyInitialized,

    #[error("Invalid master password")]
    InvalidPassword,

    #[error("Vault locked due to too many failed attempts ({attempts})")]
    TooManyFailedAttempts { attempts: u32 },

    #[error("Vault is locked")]
    Locked,

    #[error("Credential not found: {0}")]
    NotFound(String),

    #[error("Credential has expired: {0}")]
    Expired(String),

    #[error("Credential integrity check failed: {0}")]
    IntegrityFailure(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Invalid credential name: {0}")]
    InvalidName(String),

    #[error("Keychain error: {0}")]
    Keychain(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VaultError {
    /// Whether retrying the same call can reasonably succeed.
    ///
    /// Tampered records and lockouts need someone to intervene.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::IntegrityFailure(_)
                | Self::TooManyFailedAttempts { .. }
                | Self::AlreadyInitialized
                | Self::InvalidName(_)
                | Self::Config(_)
        )
    }
}

/// Convenience result alias for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;
