//! Server registry and the directory-facing API.
//!
//! Callers address servers by id. [`Warden`] looks the id up through a
//! [`ProcessSupervisor`], which owns the processes and knows where each
//! server lives, and routes the call to that server's [`PlayerDirectory`].

use crate::config::Config;
use crate::directory::{MutationReceipt, PlayerDirectory};
use crate::error::DirectoryError;
use crate::list_store::{JsonListStore, ListEntries};
use crate::process::ServerHandle;
use log::{debug, info};
use shared::{AdminCommand, BanEntry, CommandKind, ListKind, OpEntry, WhitelistEntry};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use tokio::sync::Mutex;

/// Where a server lives and whether it is up.
pub trait ProcessSupervisor: Send + Sync {
    /// Working directory holding the list files, `None` for unknown ids
    fn server_dir(&self, server_id: &str) -> Option<PathBuf>;

    /// Handle to the running process, `None` when stopped
    fn process(&self, server_id: &str) -> Option<ServerHandle>;
}

struct Registration {
    dir: PathBuf,
    process: Option<ServerHandle>,
}

/// In-memory [`ProcessSupervisor`] filled in by whoever launches servers.
#[derive(Default)]
pub struct ProcessTable {
    servers: StdMutex<HashMap<String, Registration>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, server_id: &str, dir: impl Into<PathBuf>) {
        self.lock().insert(
            server_id.to_string(),
            Registration {
                dir: dir.into(),
                process: None,
            },
        );
    }

    /// Attaches or detaches a process. Returns false for unknown ids.
    pub fn set_process(&self, server_id: &str, process: Option<ServerHandle>) -> bool {
        match self.lock().get_mut(server_id) {
            Some(registration) => {
                registration.process = process;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, server_id: &str) {
        self.lock().remove(server_id);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Registration>> {
        // The map stays consistent even if a holder panicked
        self.servers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProcessSupervisor for ProcessTable {
    fn server_dir(&self, server_id: &str) -> Option<PathBuf> {
        self.lock().get(server_id).map(|r| r.dir.clone())
    }

    fn process(&self, server_id: &str) -> Option<ServerHandle> {
        self.lock().get(server_id).and_then(|r| r.process.clone())
    }
}

/// Entry point for list reads and admin commands across all managed servers.
pub struct Warden {
    supervisor: Arc<dyn ProcessSupervisor>,
    config: Config,
    directories: Mutex<HashMap<String, Arc<PlayerDirectory>>>,
}

impl Warden {
    pub fn new(supervisor: Arc<dyn ProcessSupervisor>, config: Config) -> Self {
        Self {
            supervisor,
            config,
            directories: Mutex::new(HashMap::new()),
        }
    }

    /// The directory for `server_id`, created on first use.
    pub async fn directory(&self, server_id: &str) -> Result<Arc<PlayerDirectory>, DirectoryError> {
        let mut directories = self.directories.lock().await;
        if let Some(directory) = directories.get(server_id) {
            return Ok(Arc::clone(directory));
        }

        let dir = self
            .supervisor
            .server_dir(server_id)
            .ok_or_else(|| DirectoryError::UnknownServer(server_id.to_string()))?;
        debug!("Opening player directory for {} at {}", server_id, dir.display());

        let directory = Arc::new(PlayerDirectory::new(
            server_id,
            Arc::new(JsonListStore::new(dir)),
            self.config.channel.clone(),
            self.config.directory.clone(),
        ));
        directories.insert(server_id.to_string(), Arc::clone(&directory));
        Ok(directory)
    }

    /// Drops the cached directory, e.g. after the server was deleted.
    pub async fn forget(&self, server_id: &str) {
        if self.directories.lock().await.remove(server_id).is_some() {
            info!("Forgot player directory for {}", server_id);
        }
    }

    pub async fn list(
        &self,
        server_id: &str,
        kind: ListKind,
    ) -> Result<ListEntries, DirectoryError> {
        let directory = self.directory(server_id).await?;
        let process = self.supervisor.process(server_id);
        directory.list(process.as_ref(), kind).await
    }

    pub async fn list_whitelist(
        &self,
        server_id: &str,
    ) -> Result<Vec<WhitelistEntry>, DirectoryError> {
        let entries = self.list(server_id, ListKind::Whitelist).await?;
        Ok(entries.into_whitelist().unwrap_or_default())
    }

    pub async fn list_bans(&self, server_id: &str) -> Result<Vec<BanEntry>, DirectoryError> {
        let entries = self.list(server_id, ListKind::Bans).await?;
        Ok(entries.into_bans().unwrap_or_default())
    }

    pub async fn list_ops(&self, server_id: &str) -> Result<Vec<OpEntry>, DirectoryError> {
        let entries = self.list(server_id, ListKind::Ops).await?;
        Ok(entries.into_ops().unwrap_or_default())
    }

    /// Runs any admin command against `server_id`.
    pub async fn execute(
        &self,
        server_id: &str,
        command: AdminCommand,
    ) -> Result<MutationReceipt, DirectoryError> {
        let directory = self.directory(server_id).await?;
        let process = self.supervisor.process(server_id);
        directory.mutate(process.as_ref(), command).await
    }

    pub async fn add_whitelist(
        &self,
        server_id: &str,
        name: &str,
    ) -> Result<MutationReceipt, DirectoryError> {
        self.execute(server_id, AdminCommand::new(CommandKind::WhitelistAdd, name)).await
    }

    pub async fn remove_whitelist(
        &self,
        server_id: &str,
        name: &str,
    ) -> Result<MutationReceipt, DirectoryError> {
        self.execute(server_id, AdminCommand::new(CommandKind::WhitelistRemove, name)).await
    }

    /// Bans `name`; a blank reason falls back to the configured default.
    pub async fn ban(
        &self,
        server_id: &str,
        name: &str,
        reason: Option<&str>,
    ) -> Result<MutationReceipt, DirectoryError> {
        self.execute(
            server_id,
            AdminCommand::new(CommandKind::Ban, name).with_reason(reason),
        )
        .await
    }

    pub async fn unban(
        &self,
        server_id: &str,
        name: &str,
    ) -> Result<MutationReceipt, DirectoryError> {
        self.execute(server_id, AdminCommand::new(CommandKind::Pardon, name)).await
    }

    pub async fn add_op(
        &self,
        server_id: &str,
        name: &str,
    ) -> Result<MutationReceipt, DirectoryError> {
        self.execute(server_id, AdminCommand::new(CommandKind::Op, name)).await
    }

    pub async fn remove_op(
        &self,
        server_id: &str,
        name: &str,
    ) -> Result<MutationReceipt, DirectoryError> {
        self.execute(server_id, AdminCommand::new(CommandKind::Deop, name)).await
    }

    /// Kicks `name`; only possible while the server runs.
    pub async fn kick(
        &self,
        server_id: &str,
        name: &str,
        reason: Option<&str>,
    ) -> Result<MutationReceipt, DirectoryError> {
        self.execute(
            server_id,
            AdminCommand::new(CommandKind::Kick, name).with_reason(reason),
        )
        .await
    }

    /// Re-reads every list of `server_id` from disk.
    pub async fn reconcile(&self, server_id: &str) -> Result<(), DirectoryError> {
        let directory = self.directory(server_id).await?;
        let process = self.supervisor.process(server_id);
        directory.reconcile(process.as_ref()).await
    }
}
