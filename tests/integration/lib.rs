//! Shared fixtures for vault integration tests.

use std::path::Path;
use std::sync::Arc;

use devhub_vault::{NoopSecretStore, Vault, VaultAuditEntry, VaultBackend, VaultConfig};

/// Route vault logs to the test harness. Set `RUST_LOG=devhub_vault=debug`
/// to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// File-system vault rooted at `dir` with a fast KDF.
pub fn test_config(dir: &Path) -> VaultConfig {
    VaultConfig {
        backend: VaultBackend::FileSystem,
        kdf_iterations: 1_000,
        ..VaultConfig::in_dir(dir)
    }
}

/// Open a vault that never touches the OS keyring.
pub fn open_vault(config: VaultConfig) -> Vault {
    init_tracing();
    Vault::with_secret_store(config, Arc::new(NoopSecretStore)).expect("open vault")
}

/// Parse every line of an audit log.
pub fn read_audit(path: &Path) -> Vec<VaultAuditEntry> {
    std::fs::read_to_string(path)
        .expect("read audit log")
        .lines()
        .map(|line| serde_json::from_str(line).expect("audit line is JSON"))
        .collect()
}

/// Read `credentials.json` as raw JSON.
pub fn read_credentials(config: &VaultConfig) -> serde_json::Value {
    let raw = std::fs::read_to_string(config.credentials_file()).expect("read credentials");
    serde_json::from_str(&raw).expect("credentials are JSON")
}

/// Rewrite one field of a stored record on disk by changing the first
/// character of its base64 text.
pub fn tamper(config: &VaultConfig, name: &str, field: &str) {
    let mut json = read_credentials(config);
    let value = json[name][field]
        .as_str()
        .expect("field is a string")
        .to_string();

    let mut chars: Vec<char> = value.chars().collect();
    chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
    json[name][field] = serde_json::Value::String(chars.into_iter().collect());

    std::fs::write(
        config.credentials_file(),
        serde_json::to_vec_pretty(&json).expect("serialize"),
    )
    .expect("write credentials");
}
