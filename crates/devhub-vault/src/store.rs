//! Credential storage.
//!
//! [`CredentialStore`] holds the name → [`EncryptedCredential`] map in memory
//! and mirrors it to a single `credentials.json` file. Every write replaces
//! the whole file atomically (temp file, fsync, rename) with mode `0600`.
//! A store without a path never touches disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use devhub_core::paths;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{Result, VaultError};
use crate::types::{CredentialMetadata, EncryptedCredential};

/// Maximum allowed length for a credential name, in characters.
pub const MAX_NAME_LEN: usize = 128;

/// In-memory credential map with optional file persistence.
#[derive(Debug, Default)]
pub struct CredentialStore {
    path: Option<PathBuf>,
    records: BTreeMap<String, EncryptedCredential>,
}

impl CredentialStore {
    /// A store mirrored to `path`.
    pub fn on_disk(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            records: BTreeMap::new(),
        }
    }

    /// A store that lives in process memory only.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Whether records are mirrored to a file.
    pub fn is_persistent(&self) -> bool {
        self.path.is_some()
    }

    /// Replace the in-memory map with the file contents.
    ///
    /// A missing file loads as an empty map. In-memory stores keep their
    /// records untouched.
    pub async fn load(&mut self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let records = match tokio::fs::read(path).await {
            Ok(data) => serde_json::from_slice(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        self.records = records;
        debug!(path = %path.display(), count = self.records.len(), "loaded credentials");
        Ok(())
    }

    /// Write the whole map to the backing file.
    pub async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let json = serde_json::to_vec_pretty(&self.records)?;
        write_atomic(path, &json).await?;
        debug!(path = %path.display(), count = self.records.len(), "persisted credentials");
        Ok(())
    }

    /// Look up a record by name.
    pub fn get(&self, name: &str) -> Option<&EncryptedCredential> {
        self.records.get(name)
    }

    /// First record whose checksum still matches, used to check a key
    /// against existing data.
    pub fn first_intact(&self) -> Option<&EncryptedCredential> {
        self.records.values().find(|r| r.verify_integrity())
    }

    /// Insert or replace a record under its metadata name.
    ///
    /// Returns the record previously stored under that name.
    pub fn insert(&mut self, record: EncryptedCredential) -> Option<EncryptedCredential> {
        self.records.insert(record.metadata.name.clone(), record)
    }

    /// Remove a record, returning it.
    pub fn remove(&mut self, name: &str) -> Option<EncryptedCredential> {
        self.records.remove(name)
    }

    /// Put back what a failed mutation displaced.
    ///
    /// `previous` is what was stored under `name` before the mutation.
    pub fn restore(&mut self, name: &str, previous: Option<EncryptedCredential>) {
        match previous {
            Some(record) => {
                self.records.insert(name.to_string(), record);
            }
            None => {
                self.records.remove(name);
            }
        }
    }

    /// Metadata of every record, ordered by name.
    pub fn metadata(&self) -> Vec<CredentialMetadata> {
        self.records.values().map(|r| r.metadata.clone()).collect()
    }

    /// Drop every cached record.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Validate a credential name.
///
/// Names are map keys in a JSON file and appear in audit lines, so they must
/// be non-empty, at most [`MAX_NAME_LEN`] characters, and free of control
/// characters.
pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(VaultError::InvalidName(
            "name must not be empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(VaultError::InvalidName(format!(
            "name exceeds maximum length of {MAX_NAME_LEN} characters"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(VaultError::InvalidName(format!(
            "name contains control characters: {}",
            name.escape_debug()
        )));
    }
    Ok(())
}

/// Replace `path` with `data` via a synced sibling temp file, mode 0600.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let temp_path = paths::temp_path_for(path);

    let written = async {
        let mut file = tokio::fs::File::create(&temp_path).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .await?;
        }

        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e.into());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    Ok(())
}
