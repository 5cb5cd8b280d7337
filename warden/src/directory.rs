//! Player directory: the per-server access-list state machine
//!
//! Two sources of truth exist for a server's access lists. While the server
//! is stopped the files are authoritative and are edited directly. While it
//! runs, the server process owns the files and every change has to go
//! through its console; the directory then serves reads from a cache built
//! from the file snapshot taken when the server was first seen running, plus
//! every change the console confirmed since.
//!
//! The running-state cache is not re-read from disk, so changes made behind
//! the directory's back (a hand-edited file, a ban issued by the server
//! itself) stay invisible until [`PlayerDirectory::reconcile`] is called.

use crate::channel::CommandChannel;
use crate::config::{ChannelConfig, DirectorySettings};
use crate::error::{AmbiguityReason, DirectoryError, OpContext};
use crate::interpreter::{Outcome, ResponseInterpreter};
use crate::list_store::{ListEntries, ListStore};
use crate::process::ServerHandle;
use log::{debug, info, warn};
use shared::{
    offline_uuid, AdminCommand, BanEntry, CommandKind, ListEntry, ListKind, OpEntry, PlayerRef,
    WhitelistEntry,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Which source of truth is in charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Running,
}

/// Best-known contents of the lists.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    lists: HashMap<ListKind, ListEntries>,
}

impl Snapshot {
    pub fn get(&self, kind: ListKind) -> Option<&ListEntries> {
        self.lists.get(&kind)
    }

    fn set(&mut self, entries: ListEntries) {
        self.lists.insert(entries.kind(), entries);
    }

    /// A uuid already on record for `name` in any list
    fn known_uuid(&self, name: &str) -> Option<Uuid> {
        fn find<T: ListEntry>(entries: &[T], name: &str) -> Option<Uuid> {
            entries
                .iter()
                .map(ListEntry::player)
                .find(|p| p.matches_name(name))
                .map(|p| p.uuid)
        }
        self.lists.values().find_map(|entries| match entries {
            ListEntries::Whitelist(v) => find(v, name),
            ListEntries::Bans(v) => find(v, name),
            ListEntries::Ops(v) => find(v, name),
        })
    }
}

/// Successful result of a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationReceipt {
    /// `Applied` or `AlreadyInState`
    pub outcome: Outcome,
    pub message: String,
}

struct View {
    state: ServerState,
    snapshot: Arc<Snapshot>,
    /// Console-confirmed changes since the last reload
    deltas: Vec<AdminCommand>,
}

/// Access-list orchestrator for one managed server.
pub struct PlayerDirectory {
    server_id: String,
    store: Arc<dyn ListStore>,
    channel: CommandChannel,
    interpreter: Arc<ResponseInterpreter>,
    settings: DirectorySettings,
    view: RwLock<View>,
    // Held by every cache writer; readers never take it
    writer: Mutex<()>,
}

impl PlayerDirectory {
    /// Creates the directory and its command queue; needs a tokio runtime.
    pub fn new(
        server_id: impl Into<String>,
        store: Arc<dyn ListStore>,
        channel_config: ChannelConfig,
        settings: DirectorySettings,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            store,
            channel: CommandChannel::new(channel_config),
            interpreter: Arc::new(ResponseInterpreter::vanilla()),
            settings,
            view: RwLock::new(View {
                state: ServerState::Stopped,
                snapshot: Arc::new(Snapshot::default()),
                deltas: Vec::new(),
            }),
            writer: Mutex::new(()),
        }
    }

    pub fn with_interpreter(mut self, interpreter: ResponseInterpreter) -> Self {
        self.interpreter = Arc::new(interpreter);
        self
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// The state last observed by a directory call
    pub async fn state(&self) -> ServerState {
        self.view.read().await.state
    }

    /// Number of console-confirmed changes applied to the cache since the last reload
    pub async fn applied_deltas(&self) -> usize {
        self.view.read().await.deltas.len()
    }

    /// Cached entries without touching the file or the process
    pub async fn cached(&self, kind: ListKind) -> Option<ListEntries> {
        self.view.read().await.snapshot.get(kind).cloned()
    }

    /// Returns the best-known entries of `kind`.
    ///
    /// Stopped: read straight from the file. Running: the cache, loading the
    /// file snapshot first if this is the first call to see the server up.
    pub async fn list(
        &self,
        process: Option<&ServerHandle>,
        kind: ListKind,
    ) -> Result<ListEntries, DirectoryError> {
        let context = OpContext::list(&self.server_id, kind);

        if is_running(process) {
            {
                let view = self.view.read().await;
                if view.state == ServerState::Running {
                    if let Some(entries) = view.snapshot.get(kind) {
                        return Ok(entries.clone());
                    }
                }
            }

            let _writer = self.writer.lock().await;
            self.enter_running(&context).await?;
            let view = self.view.read().await;
            return Ok(view
                .snapshot
                .get(kind)
                .cloned()
                .unwrap_or_else(|| ListEntries::empty(kind)));
        }

        self.enter_stopped().await;
        let entries = self
            .store
            .read(kind)
            .await
            .map_err(|source| DirectoryError::Store { context, source })?;

        // A writer in progress will refresh the cache itself
        if let Ok(_writer) = self.writer.try_lock() {
            self.replace_cached(entries.clone()).await;
        }
        Ok(entries)
    }

    /// Applies `command`, through the file or the console depending on state.
    pub async fn mutate(
        &self,
        process: Option<&ServerHandle>,
        command: AdminCommand,
    ) -> Result<MutationReceipt, DirectoryError> {
        let context = OpContext::mutate(&self.server_id, command.kind, &command.name);
        command
            .validate()
            .map_err(|message| DirectoryError::InvalidArgument {
                context: context.clone(),
                message,
            })?;

        let _writer = self.writer.lock().await;
        match process.filter(|p| p.is_running()) {
            Some(process) => self.mutate_running(process, &command, context).await,
            None => {
                self.enter_stopped().await;
                self.mutate_stopped(&command, context).await
            }
        }
    }

    /// Re-reads all three files into the cache and forgets tracked deltas.
    ///
    /// The way to resolve an ambiguous outcome, or to pick up changes made
    /// outside the directory while the server runs.
    pub async fn reconcile(&self, process: Option<&ServerHandle>) -> Result<(), DirectoryError> {
        let context = OpContext::reconcile(&self.server_id);
        let _writer = self.writer.lock().await;
        let snapshot = self.load_all(&context).await?;

        let mut view = self.view.write().await;
        view.state = if is_running(process) {
            ServerState::Running
        } else {
            ServerState::Stopped
        };
        view.snapshot = Arc::new(snapshot);
        view.deltas.clear();
        info!("[{}] Reconciled lists from disk", self.server_id);
        Ok(())
    }

    async fn mutate_stopped(
        &self,
        command: &AdminCommand,
        context: OpContext,
    ) -> Result<MutationReceipt, DirectoryError> {
        // Kicking only means something to a live server
        let Some(kind) = command.kind.list_kind() else {
            return Err(DirectoryError::NotRunning { context });
        };

        let mut entries = match self.store.read(kind).await {
            Ok(entries) => entries,
            Err(source) => return Err(DirectoryError::Store { context, source }),
        };
        let uuid = self.resolve_uuid_from_files(&command.name, &entries).await;
        let outcome = apply_command(&mut entries, command, uuid, &self.settings);

        match outcome {
            Outcome::Applied => {
                if let Err(source) = self.store.write(&entries).await {
                    return Err(DirectoryError::Store { context, source });
                }
                info!("[{}] {} (file)", self.server_id, command);
            }
            Outcome::NotFound => {
                return Err(DirectoryError::NotFound {
                    context,
                    message: describe(command, outcome),
                });
            }
            _ => debug!("[{}] {} left the file unchanged", self.server_id, command),
        }

        self.replace_cached(entries).await;
        Ok(MutationReceipt {
            outcome,
            message: describe(command, outcome),
        })
    }

    async fn mutate_running(
        &self,
        process: &ServerHandle,
        command: &AdminCommand,
        context: OpContext,
    ) -> Result<MutationReceipt, DirectoryError> {
        self.enter_running(&context).await?;

        let line = command.to_command_line();
        let kind = command.kind;
        let interpreter = Arc::clone(&self.interpreter);
        let target = command.name.clone();
        info!("[{}] > {}", self.server_id, line);

        let output = self
            .channel
            .send_until(Arc::clone(process), &line, move |l| {
                interpreter.is_conclusive(kind, &target, l)
            })
            .await
            .map_err(|e| DirectoryError::from_channel(context.clone(), e))
            .map_err(|e| {
                if e.is_ambiguous() {
                    warn!("{}", e);
                }
                e
            })?;

        let verdict = self.interpreter.interpret(kind, &command.name, &output);
        debug!("[{}] {} -> {:?}", self.server_id, line, verdict.outcome);
        let message = verdict
            .message()
            .map(str::to_string)
            .unwrap_or_else(|| describe(command, verdict.outcome));

        match verdict.outcome {
            Outcome::Applied => {
                self.apply_delta(command).await;
                Ok(MutationReceipt {
                    outcome: Outcome::Applied,
                    message,
                })
            }
            Outcome::AlreadyInState => Ok(MutationReceipt {
                outcome: Outcome::AlreadyInState,
                message,
            }),
            Outcome::NotFound => Err(DirectoryError::NotFound { context, message }),
            Outcome::Malformed => {
                let err = DirectoryError::Ambiguous {
                    context,
                    reason: AmbiguityReason::Malformed(output),
                };
                warn!("{}", err);
                Err(err)
            }
            Outcome::Unknown => {
                let err = DirectoryError::Ambiguous {
                    context,
                    reason: AmbiguityReason::Unrecognized(output),
                };
                warn!("{}", err);
                Err(err)
            }
        }
    }

    /// Stopped -> Running: the files become the new cache baseline.
    /// Caller holds the writer lock.
    async fn enter_running(&self, context: &OpContext) -> Result<(), DirectoryError> {
        if self.view.read().await.state == ServerState::Running {
            return Ok(());
        }

        info!("[{}] Server is running; loading list snapshot", self.server_id);
        let snapshot = self.load_all(context).await?;
        let mut view = self.view.write().await;
        view.state = ServerState::Running;
        view.snapshot = Arc::new(snapshot);
        view.deltas.clear();
        Ok(())
    }

    /// Running -> Stopped: the server kept the files current, so only the
    /// delta tracking is dropped.
    async fn enter_stopped(&self) {
        let mut view = self.view.write().await;
        if view.state == ServerState::Running {
            info!(
                "[{}] Server stopped; dropping {} tracked change(s)",
                self.server_id,
                view.deltas.len()
            );
            view.state = ServerState::Stopped;
            view.deltas.clear();
        }
    }

    async fn load_all(&self, context: &OpContext) -> Result<Snapshot, DirectoryError> {
        let mut snapshot = Snapshot::default();
        for kind in ListKind::ALL {
            let entries = self
                .store
                .read(kind)
                .await
                .map_err(|source| DirectoryError::Store {
                    context: context.clone(),
                    source,
                })?;
            snapshot.set(entries);
        }
        Ok(snapshot)
    }

    async fn replace_cached(&self, entries: ListEntries) {
        let mut view = self.view.write().await;
        let mut snapshot = (*view.snapshot).clone();
        snapshot.set(entries);
        view.snapshot = Arc::new(snapshot);
    }

    /// Mirrors a console-confirmed change in the cache.
    async fn apply_delta(&self, command: &AdminCommand) {
        let Some(kind) = command.kind.list_kind() else {
            return;
        };

        let mut view = self.view.write().await;
        let mut snapshot = (*view.snapshot).clone();
        let uuid = snapshot
            .known_uuid(&command.name)
            .unwrap_or_else(|| offline_uuid(&command.name));
        let entries = snapshot
            .lists
            .entry(kind)
            .or_insert_with(|| ListEntries::empty(kind));
        apply_command(entries, command, uuid, &self.settings);

        view.snapshot = Arc::new(snapshot);
        view.deltas.push(command.clone());
    }

    /// Looks `name` up in the target list and the other list files.
    ///
    /// The files are authoritative while stopped; a list that cannot be read
    /// only narrows the search.
    async fn resolve_uuid_from_files(&self, name: &str, target: &ListEntries) -> Uuid {
        let mut files = Snapshot::default();
        files.set(target.clone());
        for kind in ListKind::ALL {
            if kind == target.kind() {
                continue;
            }
            match self.store.read(kind).await {
                Ok(entries) => files.set(entries),
                Err(e) => debug!("[{}] uuid lookup skipped {}: {}", self.server_id, kind, e),
            }
        }
        files
            .known_uuid(name)
            .unwrap_or_else(|| offline_uuid(name))
    }
}

fn is_running(process: Option<&ServerHandle>) -> bool {
    process.map_or(false, |p| p.is_running())
}

/// Edits `entries` the way the server would for `command`.
fn apply_command(
    entries: &mut ListEntries,
    command: &AdminCommand,
    uuid: Uuid,
    settings: &DirectorySettings,
) -> Outcome {
    let name = command.name.as_str();
    let player = || PlayerRef::new(uuid, name);

    match (command.kind, entries) {
        (CommandKind::WhitelistAdd, ListEntries::Whitelist(list)) => {
            insert_if_absent(list, uuid, name, || WhitelistEntry::new(player()))
        }
        (CommandKind::WhitelistRemove, ListEntries::Whitelist(list)) => remove_named(list, name),
        (CommandKind::Ban, ListEntries::Bans(list)) => insert_if_absent(list, uuid, name, || {
            let reason = command
                .reason
                .clone()
                .unwrap_or_else(|| settings.default_ban_reason.clone());
            BanEntry::new(player(), reason, settings.ban_source.clone())
        }),
        (CommandKind::Pardon, ListEntries::Bans(list)) => remove_named(list, name),
        (CommandKind::Op, ListEntries::Ops(list)) => {
            insert_if_absent(list, uuid, name, || OpEntry::new(player(), settings.op_level()))
        }
        (CommandKind::Deop, ListEntries::Ops(list)) => remove_named(list, name),
        _ => Outcome::Unknown,
    }
}

fn insert_if_absent<T: ListEntry>(
    list: &mut Vec<T>,
    uuid: Uuid,
    name: &str,
    make: impl FnOnce() -> T,
) -> Outcome {
    let present = list
        .iter()
        .any(|e| e.player().uuid == uuid || e.player().matches_name(name));
    if present {
        Outcome::AlreadyInState
    } else {
        list.push(make());
        Outcome::Applied
    }
}

fn remove_named<T: ListEntry>(list: &mut Vec<T>, name: &str) -> Outcome {
    let before = list.len();
    list.retain(|e| !e.player().matches_name(name));
    if list.len() < before {
        Outcome::Applied
    } else {
        Outcome::NotFound
    }
}

/// Message for outcomes decided locally, worded like the server console
fn describe(command: &AdminCommand, outcome: Outcome) -> String {
    let name = &command.name;
    match (command.kind, outcome) {
        (CommandKind::WhitelistAdd, Outcome::Applied) => format!("Added {} to the whitelist", name),
        (CommandKind::WhitelistAdd, Outcome::AlreadyInState) => {
            format!("{} is already whitelisted", name)
        }
        (CommandKind::WhitelistRemove, Outcome::Applied) => {
            format!("Removed {} from the whitelist", name)
        }
        (CommandKind::WhitelistRemove, Outcome::NotFound) => format!("{} is not whitelisted", name),
        (CommandKind::Ban, Outcome::Applied) => match &command.reason {
            Some(reason) => format!("Banned {}: {}", name, reason),
            None => format!("Banned {}", name),
        },
        (CommandKind::Ban, Outcome::AlreadyInState) => format!("{} is already banned", name),
        (CommandKind::Pardon, Outcome::Applied) => format!("Unbanned {}", name),
        (CommandKind::Pardon, Outcome::NotFound) => format!("{} is not banned", name),
        (CommandKind::Op, Outcome::Applied) => format!("Made {} a server operator", name),
        (CommandKind::Op, Outcome::AlreadyInState) => format!("{} is already an operator", name),
        (CommandKind::Deop, Outcome::Applied) => {
            format!("Made {} no longer a server operator", name)
        }
        (CommandKind::Deop, Outcome::NotFound) => format!("{} is not an operator", name),
        (CommandKind::Kick, Outcome::Applied) => format!("Kicked {}", name),
        (CommandKind::Kick, Outcome::NotFound) => format!("{} is not online", name),
        (kind, outcome) => format!("{} {}: {:?}", kind, name, outcome),
    }
}
