//! Path resolution utilities.

use crate::env;
use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the DevHub base directory (`$DEVHUB_HOME` or `~/.devhub`).
pub fn base_dir() -> Result<PathBuf, ConfigError> {
    if let Some(home) = env::get_var(env::vars::DEVHUB_HOME) {
        return Ok(expand_tilde(&home));
    }
    let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
    Ok(home.join(".devhub"))
}

/// Get the vault directory (~/.devhub/vault).
pub fn vault_dir() -> Result<PathBuf, ConfigError> {
    Ok(base_dir()?.join("vault"))
}

/// Get the vault audit log path (~/.devhub/vault.audit).
pub fn audit_file() -> Result<PathBuf, ConfigError> {
    Ok(base_dir()?.join("vault.audit"))
}

/// Get the vault config file path (~/.devhub/vault.json5).
pub fn vault_config_file() -> Result<PathBuf, ConfigError> {
    Ok(base_dir()?.join("vault.json5"))
}

/// Expand tilde (~) in a path.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Create `dir` (and parents) and restrict it to the owner on Unix.
pub fn ensure_private_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }

    Ok(())
}

/// Atomically replace `path` with `data`, readable by the owner only.
///
/// Writes a sibling temp file, syncs it, then renames it over `path`.
pub fn write_private_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let temp_path = temp_path_for(path);
    let written = (|| {
        let mut file = std::fs::File::create(&temp_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }

        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&temp_path, path)
    })();

    if let Err(e) = written {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }

    Ok(())
}

/// Sibling temp path used for atomic replacement of `path`.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
