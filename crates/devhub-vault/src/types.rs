//! Core types for credential management.
//!
//! Provides the data structures used to represent credentials in both
//! encrypted (at-rest) and decrypted (in-memory) forms.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use devhub_core::SecretBytes;
use serde::{Deserialize, Serialize};

use crate::crypto;

/// Kind of credential held in the vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    ApiToken,
    Password,
    SshKey,
    OauthToken,
    Certificate,
    DatabaseUrl,
    WebhookSecret,
}

impl CredentialType {
    /// Name as written in the credentials file.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiToken => "api_token",
            Self::Password => "password",
            Self::SshKey => "ssh_key",
            Self::OauthToken => "oauth_token",
            Self::Certificate => "certificate",
            Self::DatabaseUrl => "database_url",
            Self::WebhookSecret => "webhook_secret",
        }
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptive, non-secret information about a credential.
///
/// Values are never mutated in place: recording an access or a replacement
/// produces a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialMetadata {
    /// Unique name within the vault.
    pub name: String,

    /// Kind of credential.
    pub credential_type: CredentialType,

    /// Free-text description.
    #[serde(default)]
    pub description: String,

    /// Tags for organization.
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// When the credential was first stored.
    pub created_at: DateTime<Utc>,

    /// When the credential value was last replaced.
    pub updated_at: DateTime<Utc>,

    /// After this instant the credential is rejected on read.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    /// Suggested rotation period, in seconds.
    #[serde(default)]
    pub rotation_interval: Option<u64>,

    /// Number of successful reads.
    #[serde(default)]
    pub access_count: u64,

    /// When the credential was last read successfully.
    #[serde(default)]
    pub last_accessed: Option<DateTime<Utc>>,
}

impl CredentialMetadata {
    /// Metadata for a new credential, timestamped now.
    pub fn new(name: impl Into<String>, credential_type: CredentialType) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            credential_type,
            description: String::new(),
            tags: BTreeSet::new(),
            created_at: now,
            updated_at: now,
            expires_at: None,
            rotation_interval: None,
            access_count: 0,
            last_accessed: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the expiry instant.
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Set the rotation hint.
    pub fn with_rotation_interval(mut self, interval: Duration) -> Self {
        self.rotation_interval = Some(interval.as_secs());
        self
    }

    /// Whether the credential is past its expiry.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whether the credential is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }

    /// Whether the credential is older than its rotation hint.
    pub fn needs_rotation(&self) -> bool {
        self.needs_rotation_at(Utc::now())
    }

    /// Whether the credential is older than its rotation hint at `now`.
    pub fn needs_rotation_at(&self, now: DateTime<Utc>) -> bool {
        let Some(secs) = self.rotation_interval else {
            return false;
        };
        let interval = chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX));
        match self.updated_at.checked_add_signed(interval) {
            Some(due) => now > due,
            None => false,
        }
    }

    /// Copy of this metadata with one more recorded access.
    pub fn with_access(&self) -> Self {
        Self {
            access_count: self.access_count.saturating_add(1),
            last_accessed: Some(Utc::now()),
            ..self.clone()
        }
    }

    /// Copy of this metadata replacing `previous`: keeps the original
    /// creation time and stamps the update.
    pub(crate) fn replacing(self, previous: &Self) -> Self {
        Self {
            created_at: previous.created_at,
            updated_at: Utc::now(),
            ..self
        }
    }
}

/// A credential as held in memory and written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedCredential {
    /// Descriptive metadata.
    pub metadata: CredentialMetadata,

    /// AES-256-GCM ciphertext including the tag, base64 on disk.
    #[serde(with = "base64_bytes")]
    pub encrypted_data: Vec<u8>,

    /// Per-record HKDF salt, base64 on disk.
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,

    /// AES-GCM nonce, base64 on disk.
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,

    /// Hex SHA-256 over `encrypted_data || salt || nonce`.
    pub checksum: String,
}

impl EncryptedCredential {
    /// Recompute the checksum and compare it in constant time.
    pub fn verify_integrity(&self) -> bool {
        crypto::verify_checksum(&self.encrypted_data, &self.salt, &self.nonce, &self.checksum)
    }

    /// Same ciphertext under new metadata.
    pub(crate) fn with_metadata(&self, metadata: CredentialMetadata) -> Self {
        Self {
            metadata,
            ..self.clone()
        }
    }
}

/// A decrypted credential held in memory.
///
/// Wraps `SecretBytes` so the plaintext is zeroed on drop. Debug and Display
/// both emit `[REDACTED]` to prevent accidental logging.
pub struct DecryptedSecret {
    inner: SecretBytes,
}

impl DecryptedSecret {
    /// Create a new decrypted secret from raw plaintext.
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: SecretBytes::new(value),
        }
    }

    /// Expose the plaintext bytes. Use sparingly.
    pub fn expose(&self) -> &[u8] {
        self.inner.expose_secret()
    }

    /// Expose the plaintext as UTF-8 text, if it is text.
    pub fn expose_str(&self) -> Option<&str> {
        self.inner.expose_str()
    }
}

impl fmt::Debug for DecryptedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for DecryptedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}
