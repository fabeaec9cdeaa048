//! Append-only audit trail for vault operations.
//!
//! Entries are queued on a bounded channel and written as newline-delimited
//! JSON by a single background task. Producers never wait: when the queue is
//! full or the writer is gone, the entry is dropped with a warning. Write
//! errors are logged by the writer and never reach the operation being
//! audited.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use devhub_core::env;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    VaultInitialized,
    VaultInitializeFailed,
    VaultUnlocked,
    VaultUnlockFailed,
    VaultUnlockBlocked,
    VaultUnlockError,
    VaultLocked,
    CredentialStored,
    CredentialStoreFailed,
    CredentialAccessed,
    CredentialAccessFailed,
    CredentialNotFound,
    CredentialIntegrityFailed,
    CredentialExpired,
    CredentialDeleted,
    CredentialDeleteFailed,
}

/// One line of the audit log. Never modified once queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultAuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub credential_name: Option<String>,
    /// Acting user, best-effort from the environment.
    pub user: String,
    pub success: bool,
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl VaultAuditEntry {
    /// An entry stamped now for the current user.
    pub fn new(action: AuditAction, success: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            credential_name: None,
            user: env::current_user(),
            success,
            error_message: None,
            metadata: Map::new(),
        }
    }

    /// A successful `action`.
    pub fn succeeded(action: AuditAction) -> Self {
        Self::new(action, true)
    }

    /// A failed `action` with the error that caused it.
    pub fn failed(action: AuditAction, error: impl fmt::Display) -> Self {
        Self::new(action, false).with_error(error)
    }

    pub fn with_credential(mut self, name: impl Into<String>) -> Self {
        self.credential_name = Some(name.into());
        self
    }

    pub fn with_error(mut self, error: impl fmt::Display) -> Self {
        self.error_message = Some(error.to_string());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

enum Command {
    Entry(Box<VaultAuditEntry>),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the background audit writer.
pub struct AuditLogger {
    tx: Option<mpsc::Sender<Command>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AuditLogger {
    /// Start a writer appending to `path`, holding at most `capacity`
    /// pending entries.
    ///
    /// Needs a Tokio runtime; without one the logger is disabled.
    pub fn spawn(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let path = path.into();
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(path = %path.display(), "no async runtime available; audit logging disabled");
                return Self::disabled();
            }
        };

        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = handle.spawn(run_writer(path, rx));

        Self {
            tx: Some(tx),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// A logger that discards every entry.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            worker: Mutex::new(None),
        }
    }

    /// Whether entries are written anywhere.
    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue `entry` without waiting.
    pub fn log(&self, entry: VaultAuditEntry) {
        let Some(tx) = &self.tx else {
            return;
        };

        if let Err(e) = tx.try_send(Command::Entry(Box::new(entry))) {
            let (reason, dropped) = match e {
                mpsc::error::TrySendError::Full(Command::Entry(entry)) => ("queue full", entry),
                mpsc::error::TrySendError::Closed(Command::Entry(entry)) => {
                    ("writer stopped", entry)
                }
                _ => return,
            };
            warn!(
                reason,
                action = ?dropped.action,
                credential = dropped.credential_name.as_deref().unwrap_or(""),
                "dropping audit entry"
            );
        }
    }

    /// Wait until every entry queued so far has been written.
    pub async fn flush(&self) {
        let Some(tx) = &self.tx else {
            return;
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if tx.send(Command::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Drain the queue and stop the writer.
    ///
    /// Entries logged afterwards are dropped.
    pub async fn shutdown(&self) {
        let Some(tx) = &self.tx else {
            return;
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if tx.send(Command::Shutdown(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }

        let worker = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "audit writer ended abnormally");
            }
        }
    }
}

impl fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLogger")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

async fn run_writer(path: PathBuf, mut rx: mpsc::Receiver<Command>) {
    let mut sink = AuditSink { path, file: None };

    while let Some(command) = rx.recv().await {
        match command {
            Command::Entry(entry) => sink.append(&entry).await,
            Command::Flush(ack) => {
                sink.sync().await;
                let _ = ack.send(());
            }
            Command::Shutdown(ack) => {
                sink.sync().await;
                let _ = ack.send(());
                break;
            }
        }
    }

    debug!(path = %sink.path.display(), "audit writer stopped");
}

/// The audit file, opened on first write and reopened after errors.
struct AuditSink {
    path: PathBuf,
    file: Option<tokio::fs::File>,
}

impl AuditSink {
    async fn append(&mut self, entry: &VaultAuditEntry) {
        if let Err(e) = self.try_append(entry).await {
            warn!(path = %self.path.display(), error = %e, "failed to write audit entry");
            self.file = None;
        }
    }

    async fn try_append(&mut self, entry: &VaultAuditEntry) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let file = match self.file.take() {
            Some(file) => file,
            None => open_append(&self.path).await?,
        };
        let file = self.file.insert(file);
        file.write_all(&line).await?;
        file.flush().await
    }

    async fn sync(&mut self) {
        if let Some(file) = &mut self.file {
            if let Err(e) = file.sync_data().await {
                warn!(path = %self.path.display(), error = %e, "failed to sync audit log");
            }
        }
    }
}

async fn open_append(path: &Path) -> std::io::Result<tokio::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    options.mode(0o600);
    options.open(path).await
}
