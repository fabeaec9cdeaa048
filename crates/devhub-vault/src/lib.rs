//! # devhub-vault
//!
//! Encrypted-at-rest credential vault for DevHub.
//!
//! - **Master key**: PBKDF2-HMAC-SHA256 over the master password and a
//!   persisted salt, optionally remembered in the OS keyring
//! - **Records**: AES-256-GCM under per-record HKDF keys, with a SHA-256
//!   checksum verified before every decrypt
//! - **Storage**: one `credentials.json` map, rewritten atomically on every
//!   mutation
//! - **State**: lock/unlock with brute-force lockout and idle auto-lock
//! - **Audit**: newline-delimited JSON written by a background task
//!
//! ```no_run
//! use devhub_vault::{CredentialMetadata, CredentialType, Vault, VaultConfig};
//!
//! # async fn example() -> devhub_vault::Result<()> {
//! let vault = Vault::open(VaultConfig::load_default()?)?;
//! vault.initialize("correct horse").await?;
//!
//! let metadata = CredentialMetadata::new("github_token", CredentialType::ApiToken);
//! vault.store_credential(metadata, "ghp_abc123").await?;
//!
//! let token = vault.get_credential("github_token").await?;
//! assert_eq!(token.expose_str(), Some("ghp_abc123"));
//!
//! vault.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod config;
pub mod crypto;
pub mod error;
pub mod keychain;
pub mod master_key;
pub mod store;
pub mod types;
pub mod vault;

pub use audit::{AuditAction, AuditLogger, VaultAuditEntry};
pub use config::{VaultBackend, VaultConfig};
pub use error::{Result, VaultError};
pub use keychain::{MemorySecretStore, NoopSecretStore, OsSecretStore, SecretStore};
pub use types::{CredentialMetadata, CredentialType, DecryptedSecret, EncryptedCredential};
pub use vault::{Vault, VaultStatus};
