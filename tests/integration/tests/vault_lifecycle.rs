//! Lock/unlock lifecycle across the public vault API.

use std::time::Duration;

use devhub_integration_tests::{open_vault, test_config};
use devhub_vault::{CredentialMetadata, CredentialType, VaultConfig, VaultError, VaultStatus};
use tempfile::TempDir;

fn api_token(name: &str) -> CredentialMetadata {
    CredentialMetadata::new(name, CredentialType::ApiToken)
}

#[tokio::test]
async fn test_github_token_scenario() {
    let tmp = TempDir::new().unwrap();
    let vault = open_vault(test_config(tmp.path()));

    vault.initialize("pw1").await.unwrap();
    vault
        .store_credential(api_token("github_token"), "ghp_abc123")
        .await
        .unwrap();
    vault.lock().await;

    let err = vault.unlock("wrong").await.unwrap_err();
    assert!(matches!(err, VaultError::InvalidPassword));
    assert_eq!(vault.failed_attempts().await, 1);

    vault.unlock("pw1").await.unwrap();
    assert_eq!(vault.failed_attempts().await, 0);

    let secret = vault.get_credential("github_token").await.unwrap();
    assert_eq!(secret.expose_str(), Some("ghp_abc123"));

    let metadata = vault.list_credentials().await;
    assert_eq!(metadata.len(), 1);
    assert_eq!(metadata[0].access_count, 1);
}

#[tokio::test]
async fn test_persistence_across_instances() {
    let tmp = TempDir::new().unwrap();

    let first = open_vault(test_config(tmp.path()));
    first.initialize("pw").await.unwrap();
    first.store_credential(api_token("k"), "v").await.unwrap();
    first.shutdown().await;

    // Callers record initialization themselves.
    std::fs::write(first.config().initialized_marker(), b"").unwrap();
    drop(first);

    let config = test_config(tmp.path());
    assert!(config.initialized_marker().exists());

    let second = open_vault(config);
    assert_eq!(second.status().await, VaultStatus::Uninitialized);
    second.initialize("pw").await.unwrap();
    assert_eq!(second.get_credential("k").await.unwrap().expose_str(), Some("v"));

    second.lock().await;
    second.unlock("pw").await.unwrap();
    assert_eq!(second.get_credential("k").await.unwrap().expose_str(), Some("v"));
}

#[tokio::test]
async fn test_lock_gates_every_operation() {
    let tmp = TempDir::new().unwrap();
    let vault = open_vault(test_config(tmp.path()));
    vault.initialize("pw").await.unwrap();
    vault.store_credential(api_token("k"), "v").await.unwrap();
    vault.lock().await;

    assert!(vault.is_locked().await);
    assert!(matches!(
        vault.store_credential(api_token("other"), "v").await,
        Err(VaultError::Locked)
    ));
    assert!(matches!(vault.get_credential("k").await, Err(VaultError::Locked)));
    assert!(matches!(vault.delete_credential("k").await, Err(VaultError::Locked)));
    assert!(vault.list_credentials().await.is_empty());

    vault.unlock("pw").await.unwrap();
    assert_eq!(vault.list_credentials().await.len(), 1);
}

#[tokio::test]
async fn test_lockout_rejects_correct_password() {
    let tmp = TempDir::new().unwrap();
    let vault = open_vault(test_config(tmp.path()));
    vault.initialize("pw").await.unwrap();
    vault.lock().await;

    let max = vault.config().max_failed_attempts;
    for attempt in 1..=max {
        assert!(matches!(vault.unlock("guess").await, Err(VaultError::InvalidPassword)));
        assert_eq!(vault.failed_attempts().await, attempt);
    }

    assert_eq!(vault.status().await, VaultStatus::LockedOut);
    let err = vault.unlock("pw").await.unwrap_err();
    assert!(matches!(err, VaultError::TooManyFailedAttempts { .. }));
    assert_ne!(err.to_string(), VaultError::InvalidPassword.to_string());
}

#[tokio::test(start_paused = true)]
async fn test_idle_vault_locks_itself() {
    let tmp = TempDir::new().unwrap();
    let config = VaultConfig {
        auto_lock_timeout: 0.1,
        ..test_config(tmp.path())
    };
    let vault = open_vault(config);
    vault.initialize("pw").await.unwrap();
    assert!(!vault.is_locked().await);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(vault.is_locked().await);
    assert_eq!(vault.status().await, VaultStatus::Locked);
}

#[tokio::test]
async fn test_scoped_unlock() {
    let tmp = TempDir::new().unwrap();
    let vault = open_vault(test_config(tmp.path()));
    vault.initialize("pw").await.unwrap();
    vault.store_credential(api_token("k"), "v").await.unwrap();
    vault.lock().await;

    let names = vault
        .with_unlocked("pw", || async {
            vault
                .list_credentials()
                .await
                .into_iter()
                .map(|m| m.name)
                .collect::<Vec<_>>()
        })
        .await
        .unwrap();

    assert_eq!(names, vec!["k".to_string()]);
    assert!(vault.is_locked().await);
}

#[tokio::test]
async fn test_clones_share_state() {
    let tmp = TempDir::new().unwrap();
    let vault = open_vault(test_config(tmp.path()));
    let handle = vault.clone();

    vault.initialize("pw").await.unwrap();
    handle.store_credential(api_token("k"), "v").await.unwrap();
    handle.lock().await;

    assert!(vault.is_locked().await);
}
