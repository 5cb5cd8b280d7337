//! On-disk access lists
//!
//! Reads and writes the three JSON list files in a server directory. The
//! store knows nothing about processes: while a server runs, the server is
//! the only writer and this store is only read from.

use crate::error::StoreError;
use async_trait::async_trait;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::{BanEntry, ListEntry, ListKind, OpEntry, WhitelistEntry};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// The contents of one list file, typed by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ListEntries {
    Whitelist(Vec<WhitelistEntry>),
    Bans(Vec<BanEntry>),
    Ops(Vec<OpEntry>),
}

impl ListEntries {
    pub fn empty(kind: ListKind) -> Self {
        match kind {
            ListKind::Whitelist => ListEntries::Whitelist(Vec::new()),
            ListKind::Bans => ListEntries::Bans(Vec::new()),
            ListKind::Ops => ListEntries::Ops(Vec::new()),
        }
    }

    pub fn kind(&self) -> ListKind {
        match self {
            ListEntries::Whitelist(_) => ListKind::Whitelist,
            ListEntries::Bans(_) => ListKind::Bans,
            ListEntries::Ops(_) => ListKind::Ops,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ListEntries::Whitelist(v) => v.len(),
            ListEntries::Bans(v) => v.len(),
            ListEntries::Ops(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Player names in file order
    pub fn names(&self) -> Vec<&str> {
        fn collect<T: ListEntry>(entries: &[T]) -> Vec<&str> {
            entries.iter().map(|e| e.player().name.as_str()).collect()
        }
        match self {
            ListEntries::Whitelist(v) => collect(v),
            ListEntries::Bans(v) => collect(v),
            ListEntries::Ops(v) => collect(v),
        }
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.names().iter().any(|n| n.eq_ignore_ascii_case(name))
    }

    pub fn into_whitelist(self) -> Option<Vec<WhitelistEntry>> {
        match self {
            ListEntries::Whitelist(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_bans(self) -> Option<Vec<BanEntry>> {
        match self {
            ListEntries::Bans(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_ops(self) -> Option<Vec<OpEntry>> {
        match self {
            ListEntries::Ops(v) => Some(v),
            _ => None,
        }
    }
}

/// File-backed list access.
#[async_trait]
pub trait ListStore: Send + Sync {
    /// Loads every entry of `kind` in file order.
    async fn read(&self, kind: ListKind) -> Result<ListEntries, StoreError>;

    /// Atomically replaces the file for `entries.kind()`.
    async fn write(&self, entries: &ListEntries) -> Result<(), StoreError>;
}

/// The JSON files a game server keeps in its working directory.
#[derive(Debug, Clone)]
pub struct JsonListStore {
    dir: PathBuf,
}

impl JsonListStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, kind: ListKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    async fn load<T>(&self, kind: ListKind) -> Result<Vec<T>, StoreError>
    where
        T: ListEntry + DeserializeOwned,
    {
        let path = self.path_for(kind);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;

        // A zero-length file is what a freshly created server leaves behind
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let entries: Vec<T> = serde_json::from_str(&text).map_err(|e| StoreError::Format {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let total = entries.len();
        let entries = dedup_by_uuid(entries);
        if entries.len() != total {
            warn!(
                "{} holds {} duplicate uuid records; keeping the first of each",
                path.display(),
                total - entries.len()
            );
        }
        debug!("Loaded {} {} entries from {}", entries.len(), kind, path.display());
        Ok(entries)
    }

    async fn store<T: Serialize>(&self, kind: ListKind, entries: &[T]) -> Result<(), StoreError> {
        let path = self.path_for(kind);
        let json = serde_json::to_string_pretty(entries).map_err(|e| StoreError::Format {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let tmp = self.dir.join(format!(".{}.tmp", kind.file_name()));
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };

        let result = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(json.as_bytes()).await?;
            file.write_all(b"\n").await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &path).await
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err(e));
        }

        debug!("Wrote {} {} entries to {}", entries.len(), kind, path.display());
        Ok(())
    }
}

#[async_trait]
impl ListStore for JsonListStore {
    async fn read(&self, kind: ListKind) -> Result<ListEntries, StoreError> {
        Ok(match kind {
            ListKind::Whitelist => ListEntries::Whitelist(self.load(kind).await?),
            ListKind::Bans => ListEntries::Bans(self.load(kind).await?),
            ListKind::Ops => ListEntries::Ops(self.load(kind).await?),
        })
    }

    async fn write(&self, entries: &ListEntries) -> Result<(), StoreError> {
        match entries {
            ListEntries::Whitelist(v) => self.store(ListKind::Whitelist, v).await,
            ListEntries::Bans(v) => self.store(ListKind::Bans, v).await,
            ListEntries::Ops(v) => self.store(ListKind::Ops, v).await,
        }
    }
}

fn dedup_by_uuid<T: ListEntry>(entries: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|e| seen.insert(e.player().uuid))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{BanExpiry, OpLevel, PlayerRef};
    use tempfile::tempdir;
    use tokio_test::{assert_err, assert_ok};

    const NOTCH: &str = "069a79f4-44e9-4726-a5be-fca90e38aaf5";

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let store = JsonListStore::new(dir.path());
        let err = assert_err!(store.read(ListKind::Whitelist).await);
        assert!(matches!(err, StoreError::Io { .. }));
    }

    #[tokio::test]
    async fn test_missing_name_is_format_error() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("whitelist.json"),
            format!(r#"[{{"uuid":"{}"}}]"#, NOTCH),
        )
        .unwrap();
        let store = JsonListStore::new(dir.path());
        let err = assert_err!(store.read(ListKind::Whitelist).await);
        assert!(matches!(err, StoreError::Format { .. }));
    }

    #[tokio::test]
    async fn test_bad_uuid_is_format_error() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("ops.json"),
            r#"[{"uuid":"not-a-uuid","name":"Notch","level":4}]"#,
        )
        .unwrap();
        let store = JsonListStore::new(dir.path());
        let err = assert_err!(store.read(ListKind::Ops).await);
        assert!(matches!(err, StoreError::Format { .. }));
    }

    #[tokio::test]
    async fn test_empty_file_reads_as_empty_list() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("banned-players.json"), "").unwrap();
        let store = JsonListStore::new(dir.path());
        let entries = assert_ok!(store.read(ListKind::Bans).await);
        assert_eq!(entries, ListEntries::Bans(vec![]));
    }

    #[tokio::test]
    async fn test_duplicate_uuids_collapse() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("whitelist.json"),
            format!(
                r#"[{{"uuid":"{0}","name":"Notch"}},{{"uuid":"{0}","name":"Notch2"}}]"#,
                NOTCH
            ),
        )
        .unwrap();
        let store = JsonListStore::new(dir.path());
        let entries = assert_ok!(store.read(ListKind::Whitelist).await);
        assert_eq!(entries.names(), vec!["Notch"]);
    }

    #[tokio::test]
    async fn test_write_replaces_file_and_leaves_no_temp() {
        let dir = tempdir().unwrap();
        let store = JsonListStore::new(dir.path());
        let bans = ListEntries::Bans(vec![
            BanEntry::new(PlayerRef::offline("Steve"), "griefing", "Server"),
            BanEntry::new(PlayerRef::offline("Alex"), "spam", "Admin"),
        ]);
        assert_ok!(store.write(&bans).await);

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["banned-players.json".to_string()]);

        let raw = std::fs::read_to_string(dir.path().join("banned-players.json")).unwrap();
        assert!(raw.contains("\"expires\": \"forever\""));

        let back = assert_ok!(store.read(ListKind::Bans).await);
        assert_eq!(back.names(), vec!["Steve", "Alex"]);
        if let ListEntries::Bans(entries) = back {
            assert_eq!(entries[0].expires, BanExpiry::Never);
            assert_eq!(entries[1].source, "Admin");
        }
    }

    #[tokio::test]
    async fn test_write_into_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let store = JsonListStore::new(dir.path().join("gone"));
        let ops = ListEntries::Ops(vec![OpEntry::new(
            PlayerRef::offline("Steve"),
            OpLevel::default(),
        )]);
        let err = assert_err!(store.write(&ops).await);
        assert!(matches!(err, StoreError::Io { .. }));
    }
}
