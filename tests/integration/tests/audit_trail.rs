//! Audit log contents and configuration loading.

use devhub_integration_tests::{open_vault, read_audit, test_config};
use devhub_vault::{
    AuditAction, CredentialMetadata, CredentialType, VaultBackend, VaultConfig,
};
use tempfile::TempDir;

#[tokio::test]
async fn test_every_operation_is_audited() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let vault = open_vault(config.clone());

    vault.initialize("pw").await.unwrap();
    vault
        .store_credential(CredentialMetadata::new("k", CredentialType::ApiToken), "v")
        .await
        .unwrap();
    vault.get_credential("k").await.unwrap();
    let _ = vault.get_credential("missing").await;
    vault.lock().await;
    let _ = vault.unlock("wrong").await;
    vault.unlock("pw").await.unwrap();
    vault.delete_credential("k").await.unwrap();
    vault.flush_audit().await;

    let entries = read_audit(&config.audit_file);
    let actions: Vec<AuditAction> = entries.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::VaultInitialized,
            AuditAction::CredentialStored,
            AuditAction::CredentialAccessed,
            AuditAction::CredentialNotFound,
            AuditAction::VaultLocked,
            AuditAction::VaultUnlockFailed,
            AuditAction::VaultUnlocked,
            AuditAction::CredentialDeleted,
        ]
    );

    let failed = &entries[5];
    assert!(!failed.success);
    assert!(failed.error_message.is_some());
    assert_eq!(failed.metadata["failed_attempts"], 1);

    let stored = &entries[1];
    assert!(stored.success);
    assert_eq!(stored.credential_name.as_deref(), Some("k"));
    assert!(!stored.user.is_empty());

    // Plaintext never reaches the audit log.
    let raw = std::fs::read_to_string(&config.audit_file).unwrap();
    assert!(!raw.contains("\"v\""));
    assert!(!raw.contains("pw"));
}

#[tokio::test]
async fn test_distinct_entries_for_read_failures() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let vault = open_vault(config.clone());
    vault.initialize("pw").await.unwrap();

    let expired = CredentialMetadata::new("old", CredentialType::ApiToken)
        .with_expires_at(chrono::Utc::now() - chrono::Duration::seconds(1));
    vault.store_credential(expired, "v").await.unwrap();

    let _ = vault.get_credential("old").await;
    let _ = vault.get_credential("absent").await;
    vault.shutdown().await;

    let actions: Vec<AuditAction> = read_audit(&config.audit_file)
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert!(actions.contains(&AuditAction::CredentialExpired));
    assert!(actions.contains(&AuditAction::CredentialNotFound));
    assert_eq!(actions.last(), Some(&AuditAction::VaultLocked));
}

#[tokio::test]
async fn test_lockout_is_audited_as_blocked() {
    let tmp = TempDir::new().unwrap();
    let config = VaultConfig {
        max_failed_attempts: 1,
        ..test_config(tmp.path())
    };
    let vault = open_vault(config.clone());
    vault.initialize("pw").await.unwrap();
    vault.lock().await;

    let _ = vault.unlock("wrong").await;
    let _ = vault.unlock("pw").await;
    vault.flush_audit().await;

    let entries = read_audit(&config.audit_file);
    let last = entries.last().unwrap();
    assert_eq!(last.action, AuditAction::VaultUnlockBlocked);
    assert!(!last.success);
}

#[tokio::test]
async fn test_audit_disabled_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let config = VaultConfig {
        audit_enabled: false,
        ..test_config(tmp.path())
    };
    let vault = open_vault(config.clone());
    vault.initialize("pw").await.unwrap();
    vault.shutdown().await;

    assert!(!config.audit_file.exists());
}

#[tokio::test]
async fn test_unwritable_audit_log_does_not_fail_operations() {
    let tmp = TempDir::new().unwrap();
    let blocker = tmp.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let config = VaultConfig {
        audit_file: blocker.join("vault.audit"),
        ..test_config(&tmp.path().join("vault"))
    };
    let vault = open_vault(config);

    vault.initialize("pw").await.unwrap();
    vault
        .store_credential(CredentialMetadata::new("k", CredentialType::ApiToken), "v")
        .await
        .unwrap();
    assert_eq!(vault.get_credential("k").await.unwrap().expose_str(), Some("v"));
    vault.shutdown().await;
}

#[tokio::test]
async fn test_config_file_drives_vault() {
    let tmp = TempDir::new().unwrap();
    let vault_dir = tmp.path().join("custom-vault");
    let config_path = tmp.path().join("vault.json5");

    let content = format!(
        r#"{{
            // JSON5 allows comments and unquoted keys
            backend: "file_system",
            vault_dir: "{dir}",
            encryption_rounds: 1000,
            audit_file: "{audit}",
            max_failed_attempts: 5,
        }}"#,
        dir = vault_dir.display(),
        audit = tmp.path().join("audit.log").display(),
    );
    std::fs::write(&config_path, content).unwrap();

    let config = VaultConfig::load(&config_path).unwrap();
    assert_eq!(config.backend, VaultBackend::FileSystem);
    assert_eq!(config.kdf_iterations, 1000);
    assert_eq!(config.max_failed_attempts, 5);

    let vault = open_vault(config.clone());
    vault.initialize("pw").await.unwrap();
    vault.flush_audit().await;

    assert!(vault_dir.join(".master_salt").exists());
    assert_eq!(read_audit(&config.audit_file).len(), 1);
}
