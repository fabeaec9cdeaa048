//! AES-256-GCM encryption with HKDF-SHA256 per-record keys.
//!
//! The master key is never used directly as a cipher key. Each record gets a
//! random salt that feeds HKDF together with the master key, and a random
//! nonce for AES-GCM. A SHA-256 checksum over `ciphertext || salt || nonce`
//! is checked before any decryption is attempted.

use std::fmt;
use std::num::NonZeroU32;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use ring::pbkdf2;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, VaultError};
use crate::types::EncryptedCredential;

/// Length of the AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Length of the per-record HKDF salt in bytes.
pub const SALT_SIZE: usize = 32;

/// Length of the master key and of per-record keys in bytes.
pub const KEY_SIZE: usize = 32;

/// HKDF info string used to domain-separate derived keys.
const HKDF_INFO: &[u8] = b"devhub-vault-record-v1";

/// The vault master key.
///
/// Zeroed on drop; [`MasterKey::scrub`] additionally overwrites it with
/// random bytes first.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; KEY_SIZE]);

impl MasterKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build a key from a slice, which must be exactly [`KEY_SIZE`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            VaultError::KeyDerivationFailed(format!(
                "master key must be {KEY_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Generate a new random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Expose the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Overwrite the key with random bytes, then zero it.
    pub fn scrub(&mut self) {
        rand::thread_rng().fill_bytes(&mut self.0);
        self.0.zeroize();
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

impl PartialEq for MasterKey {
    fn eq(&self, other: &Self) -> bool {
        self.0[..].ct_eq(&other.0[..]).into()
    }
}

impl Eq for MasterKey {}

/// Derive the master key from `password` and the vault-wide `salt` using
/// PBKDF2-HMAC-SHA256.
pub fn derive_master_key(password: &[u8], salt: &[u8], iterations: NonZeroU32) -> MasterKey {
    let mut out = [0u8; KEY_SIZE];
    pbkdf2::derive(pbkdf2::PBKDF2_HMAC_SHA256, iterations, salt, password, &mut out);
    let key = MasterKey(out);
    out.zeroize();
    key
}

/// SHA-256 digest of the password, used for cheap unlock verification.
pub fn hash_password(password: &[u8]) -> [u8; 32] {
    Sha256::digest(password).into()
}

/// SHA-256 over `salt || password`, tying a digest to one vault's salt.
pub fn salted_password_hash(salt: &[u8], password: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password);
    hasher.finalize().into()
}

/// Constant-time equality of two password digests.
pub fn password_hash_matches(expected: &[u8; 32], candidate: &[u8; 32]) -> bool {
    expected[..].ct_eq(&candidate[..]).into()
}

/// Hex SHA-256 over `ciphertext || salt || nonce`.
pub fn checksum(ciphertext: &[u8], salt: &[u8], nonce: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ciphertext);
    hasher.update(salt);
    hasher.update(nonce);
    hex::encode(hasher.finalize())
}

/// Recompute the checksum and compare it to `expected` in constant time.
pub fn verify_checksum(ciphertext: &[u8], salt: &[u8], nonce: &[u8], expected: &str) -> bool {
    let actual = checksum(ciphertext, salt, nonce);
    actual.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Fill a fresh buffer with `len` random bytes.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

/// Derive a 256-bit record key from `master_key` and `salt` via HKDF-SHA256.
fn derive_record_key(master_key: &MasterKey, salt: &[u8]) -> Result<[u8; KEY_SIZE]> {
    let hk = Hkdf::<Sha256>::new(Some(salt), master_key.as_bytes());
    let mut okm = [0u8; KEY_SIZE];
    hk.expand(HKDF_INFO, &mut okm)
        .map_err(|e| VaultError::KeyDerivationFailed(e.to_string()))?;
    Ok(okm)
}

/// Output of [`CipherEngine::encrypt`].
#[derive(Debug, Clone)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub salt: Vec<u8>,
    pub nonce: Vec<u8>,
    pub checksum: String,
}

/// Encrypts and decrypts credential payloads under the master key.
///
/// Exists only while the vault is unlocked; dropping it zeroes the key.
pub struct CipherEngine {
    master_key: MasterKey,
}

impl CipherEngine {
    /// Create an engine owning `master_key`.
    pub fn new(master_key: MasterKey) -> Self {
        Self { master_key }
    }

    /// Encrypt `plaintext` under a fresh salt and nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Sealed> {
        let salt = random_bytes(SALT_SIZE);
        let nonce_bytes = random_bytes(NONCE_SIZE);

        let mut key = derive_record_key(&self.master_key, &salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| VaultError::EncryptionFailed(e.to_string()));
        key.zeroize();
        let cipher = cipher?;

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

        let checksum = checksum(&ciphertext, &salt, &nonce_bytes);
        Ok(Sealed {
            ciphertext,
            salt,
            nonce: nonce_bytes,
            checksum,
        })
    }

    /// Decrypt a stored record.
    ///
    /// The checksum is verified first; a mismatch fails with
    /// [`VaultError::IntegrityFailure`] without touching the cipher.
    pub fn decrypt(&self, record: &EncryptedCredential) -> Result<Vec<u8>> {
        if !record.verify_integrity() {
            return Err(VaultError::IntegrityFailure(record.metadata.name.clone()));
        }
        if record.nonce.len() != NONCE_SIZE {
            return Err(VaultError::DecryptionFailed(format!(
                "nonce must be {NONCE_SIZE} bytes, got {}",
                record.nonce.len()
            )));
        }

        let mut key = derive_record_key(&self.master_key, &record.salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| VaultError::DecryptionFailed(e.to_string()));
        key.zeroize();

        cipher?
            .decrypt(Nonce::from_slice(&record.nonce), record.encrypted_data.as_slice())
            .map_err(|_| {
                VaultError::DecryptionFailed(
                    "authentication failed: wrong key or corrupted data".to_string(),
                )
            })
    }

    /// Overwrite the key material. The engine is unusable afterwards.
    pub fn scrub(&mut self) {
        self.master_key.scrub();
    }
}

impl fmt::Debug for CipherEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherEngine").finish_non_exhaustive()
    }
}
