//! Environment variable handling.

use std::env;

/// Get an environment variable, returning None if not set or empty.
pub fn get_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Get an environment variable as a boolean.
///
/// Returns `None` when unset so callers can tell "off" apart from "absent".
pub fn get_bool(name: &str) -> Option<bool> {
    get_var(name).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

/// Best-effort name of the user running this process.
pub fn current_user() -> String {
    get_var("USER")
        .or_else(|| get_var("USERNAME"))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Environment variable names read by DevHub.
pub mod vars {
    /// DevHub home directory override.
    pub const DEVHUB_HOME: &str = "DEVHUB_HOME";

    /// Vault directory override.
    pub const DEVHUB_VAULT_DIR: &str = "DEVHUB_VAULT_DIR";

    /// Vault backend override (`os_keyring`, `file_system`, `memory`, `hsm`).
    pub const DEVHUB_VAULT_BACKEND: &str = "DEVHUB_VAULT_BACKEND";

    /// Enable or disable vault audit logging.
    pub const DEVHUB_VAULT_AUDIT: &str = "DEVHUB_VAULT_AUDIT";

    /// Vault audit log path override.
    pub const DEVHUB_VAULT_AUDIT_FILE: &str = "DEVHUB_VAULT_AUDIT_FILE";

    /// Vault auto-lock timeout in seconds.
    pub const DEVHUB_VAULT_AUTO_LOCK: &str = "DEVHUB_VAULT_AUTO_LOCK";
}
