//! Integration tests for the player access core
//!
//! These tests drive the public API end to end: real list files in a temp
//! directory, and a scripted console standing in for a running server.

use shared::{offline_uuid, BanEntry, ListKind, PlayerRef, WhitelistEntry};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};
use warden::config::Config;
use warden::directory::ServerState;
use warden::error::{AmbiguityReason, DirectoryError};
use warden::interpreter::Outcome;
use warden::list_store::{JsonListStore, ListEntries, ListStore};
use warden::process::ServerHandle;
use warden::registry::{ProcessTable, Warden};
use warden::testing::{Event, ScriptedLine, ScriptedProcess};

const SERVER: &str = "lobby";
const ALICE_UUID: &str = "853c80ef-3c37-49fd-aa49-938b674adae6";

/// A server directory holding the given whitelist JSON and empty bans/ops.
fn server_dir(whitelist: &str) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("whitelist.json"), whitelist).unwrap();
    std::fs::write(dir.path().join("banned-players.json"), "[]").unwrap();
    std::fs::write(dir.path().join("ops.json"), "[]").unwrap();
    dir
}

fn fast_config() -> Config {
    let mut config = Config::default();
    config.channel.response_timeout_ms = 200;
    config.channel.settle_ms = 20;
    config
}

fn warden_for(dir: &Path, process: Option<Arc<ScriptedProcess>>) -> Warden {
    let table = Arc::new(ProcessTable::new());
    table.register(SERVER, dir);
    let process: Option<ServerHandle> = process.map(|p| p as ServerHandle);
    table.set_process(SERVER, process);
    Warden::new(table, fast_config())
}

fn read_file(dir: &Path, name: &str) -> serde_json::Value {
    let raw = std::fs::read_to_string(dir.join(name)).unwrap();
    serde_json::from_str(&raw).unwrap()
}

/// LIST FILE TESTS
mod list_file_tests {
    use super::*;

    /// Every record of a freshly loaded file is returned exactly once
    #[tokio::test]
    async fn whitelist_entries_listed_once() {
        let dir = server_dir(&format!(
            r#"[
                {{"uuid":"{0}","name":"Alice"}},
                {{"uuid":"{0}","name":"Alice"}},
                {{"uuid":"{1}","name":"Bob"}}
            ]"#,
            ALICE_UUID,
            offline_uuid("Bob")
        ));
        let warden = warden_for(dir.path(), None);

        let entries = assert_ok!(warden.list_whitelist(SERVER).await);
        let names: Vec<&str> = entries.iter().map(|e| e.player.name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "Bob"]);
    }

    /// Write then read returns the same entries, bans in insertion order
    #[tokio::test]
    async fn write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonListStore::new(dir.path());

        let whitelist = ListEntries::Whitelist(vec![
            WhitelistEntry::new(PlayerRef::offline("Steve")),
            WhitelistEntry::new(PlayerRef::offline("Alex")),
        ]);
        let bans = ListEntries::Bans(vec![
            BanEntry::new(PlayerRef::offline("Griefer"), "griefing", "Server"),
            BanEntry::new(PlayerRef::offline("Spammer"), "spam", "Console"),
        ]);

        assert_ok!(store.write(&whitelist).await);
        assert_ok!(store.write(&bans).await);

        assert_eq!(assert_ok!(store.read(ListKind::Whitelist).await), whitelist);
        assert_eq!(assert_ok!(store.read(ListKind::Bans).await), bans);
    }

    /// A file the server wrote is read with its own field names and timestamps
    #[tokio::test]
    async fn server_written_files_are_understood() {
        let dir = server_dir("[]");
        std::fs::write(
            dir.path().join("banned-players.json"),
            format!(
                r#"[{{"uuid":"{}","name":"Alice","created":"2024-01-31 18:04:11 +0000",
                     "source":"Server","expires":"forever","reason":"Banned by an operator."}}]"#,
                ALICE_UUID
            ),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("ops.json"),
            format!(
                r#"[{{"uuid":"{}","name":"Alice","level":2,"bypassesPlayerLimit":true}}]"#,
                ALICE_UUID
            ),
        )
        .unwrap();
        let warden = warden_for(dir.path(), None);

        let bans = assert_ok!(warden.list_bans(SERVER).await);
        assert!(bans[0].is_active(chrono::Utc::now()));
        assert_eq!(bans[0].created.timestamp(), 1_706_724_251);

        let ops = assert_ok!(warden.list_ops(SERVER).await);
        assert_eq!(ops[0].level.value(), 2);
        assert!(ops[0].bypasses_player_limit);
    }

    fn expired_ban_dir() -> TempDir {
        let dir = server_dir("[]");
        std::fs::write(
            dir.path().join("banned-players.json"),
            format!(
                r#"[{{"uuid":"{}","name":"Alice","created":"2020-01-01 00:00:00 +0000",
                     "source":"Server","expires":"2021-01-01 00:00:00 +0000","reason":"cooldown"}}]"#,
                ALICE_UUID
            ),
        )
        .unwrap();
        dir
    }

    /// Expired bans the server has not pruned yet are still listed
    #[tokio::test]
    async fn expired_ban_is_listed_while_stopped() {
        let dir = expired_ban_dir();
        let warden = warden_for(dir.path(), None);

        let bans = assert_ok!(warden.list_bans(SERVER).await);
        assert_eq!(bans.len(), 1);
        assert_eq!(bans[0].player.name, "Alice");
        assert!(!bans[0].is_active(chrono::Utc::now()));
    }

    #[tokio::test]
    async fn expired_ban_is_listed_while_running() {
        let dir = expired_ban_dir();
        let process = ScriptedProcess::vanilla(&[], &["Alice"], &[]);
        let warden = warden_for(dir.path(), Some(process));

        let bans = assert_ok!(warden.list_bans(SERVER).await);
        assert_eq!(bans.len(), 1);
        assert!(!bans[0].is_active(chrono::Utc::now()));
        let directory = assert_ok!(warden.directory(SERVER).await);
        assert_eq!(directory.state().await, ServerState::Running);
    }

    #[tokio::test]
    async fn corrupt_file_fails_instead_of_guessing() {
        let dir = server_dir(r#"[{"uuid":"#);
        let warden = warden_for(dir.path(), None);

        let err = assert_err!(warden.list_whitelist(SERVER).await);
        assert_eq!(err.category(), "format");
    }
}

/// STOPPED SERVER TESTS
mod stopped_tests {
    use super::*;

    /// Sequential edits each land in the file
    #[tokio::test]
    async fn remove_alice_then_add_bob() {
        let dir = server_dir(&format!(r#"[{{"uuid":"{}","name":"Alice"}}]"#, ALICE_UUID));
        let warden = warden_for(dir.path(), None);

        let receipt = assert_ok!(warden.remove_whitelist(SERVER, "Alice").await);
        assert_eq!(receipt.outcome, Outcome::Applied);
        assert_eq!(read_file(dir.path(), "whitelist.json"), serde_json::json!([]));

        assert_ok!(warden.add_whitelist(SERVER, "Bob").await);
        let file = read_file(dir.path(), "whitelist.json");
        let records = file.as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["name"], "Bob");
        assert_eq!(records[0]["uuid"], offline_uuid("Bob").to_string());
    }

    /// A player known from another list keeps their uuid
    #[tokio::test]
    async fn op_reuses_uuid_from_whitelist_file() {
        let dir = server_dir(&format!(r#"[{{"uuid":"{}","name":"Alice"}}]"#, ALICE_UUID));
        let warden = warden_for(dir.path(), None);

        assert_ok!(warden.add_op(SERVER, "alice").await);
        let file = read_file(dir.path(), "ops.json");
        assert_eq!(file[0]["uuid"], ALICE_UUID);
        assert_eq!(file[0]["level"], 4);
    }

    #[tokio::test]
    async fn removing_absent_player_is_not_found() {
        let dir = server_dir("[]");
        let warden = warden_for(dir.path(), None);

        let err = assert_err!(warden.remove_op(SERVER, "Zed").await);
        assert!(matches!(err, DirectoryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn ban_defaults_fill_the_record() {
        let dir = server_dir("[]");
        let warden = warden_for(dir.path(), None);

        assert_ok!(warden.ban(SERVER, "Steve", None).await);
        let file = read_file(dir.path(), "banned-players.json");
        assert_eq!(file[0]["reason"], "Banned by an operator.");
        assert_eq!(file[0]["source"], "Server");
        assert_eq!(file[0]["expires"], "forever");
    }

    #[tokio::test]
    async fn kick_is_refused() {
        let dir = server_dir("[]");
        let warden = warden_for(dir.path(), None);

        let err = assert_err!(warden.kick(SERVER, "Steve", None).await);
        assert_eq!(err.category(), "not_running");
    }
}

/// RUNNING SERVER TESTS
mod running_tests {
    use super::*;

    /// Adding twice is Applied then AlreadyInState, with one cached entry
    #[tokio::test]
    async fn add_is_idempotent() {
        let dir = server_dir("[]");
        let process = ScriptedProcess::vanilla(&[], &[], &[]);
        let warden = warden_for(dir.path(), Some(process.clone()));

        let first = assert_ok!(warden.add_whitelist(SERVER, "Bob").await);
        let second = assert_ok!(warden.add_whitelist(SERVER, "Bob").await);
        assert_eq!(first.outcome, Outcome::Applied);
        assert_eq!(second.outcome, Outcome::AlreadyInState);
        assert_eq!(first.message, "Added Bob to the whitelist");

        let entries = assert_ok!(warden.list_whitelist(SERVER).await);
        assert_eq!(entries.len(), 1);
        assert_eq!(
            process.received(),
            vec!["whitelist add Bob".to_string(), "whitelist add Bob".to_string()]
        );
    }

    /// A silent console leaves the cache untouched and reports ambiguity
    #[tokio::test]
    async fn timeout_is_ambiguous_and_cache_unchanged() {
        let dir = server_dir(&format!(r#"[{{"uuid":"{}","name":"Alice"}}]"#, ALICE_UUID));
        let process = ScriptedProcess::silent();
        let warden = warden_for(dir.path(), Some(process));

        let before = assert_ok!(warden.list_whitelist(SERVER).await);
        let err = assert_err!(warden.add_whitelist(SERVER, "Bob").await);
        assert!(matches!(
            err,
            DirectoryError::Ambiguous {
                reason: AmbiguityReason::Timeout(_),
                ..
            }
        ));
        let after = assert_ok!(warden.list_whitelist(SERVER).await);
        assert_eq!(before, after);
    }

    /// "Player is not whitelisted" is NotFound and changes nothing
    #[tokio::test]
    async fn remove_unknown_player_is_not_found() {
        let dir = server_dir(&format!(r#"[{{"uuid":"{}","name":"Alice"}}]"#, ALICE_UUID));
        let process = ScriptedProcess::replying("Player is not whitelisted");
        let warden = warden_for(dir.path(), Some(process));

        let before = assert_ok!(warden.list_whitelist(SERVER).await);
        let err = assert_err!(warden.remove_whitelist(SERVER, "Zed").await);
        match err {
            DirectoryError::NotFound { message, .. } => {
                assert_eq!(message, "Player is not whitelisted")
            }
            other => panic!("expected NotFound, got {:?}", other),
        }

        let after = assert_ok!(warden.list_whitelist(SERVER).await);
        assert_eq!(before, after);
        let directory = assert_ok!(warden.directory(SERVER).await);
        assert_eq!(directory.applied_deltas().await, 0);
    }

    /// Concurrent ban and kick reach the console one at a time
    #[tokio::test]
    async fn ban_and_kick_never_interleave() {
        let dir = server_dir("[]");
        let process = ScriptedProcess::new(|line| {
            if line.starts_with("ban") {
                vec![ScriptedLine::after(
                    Duration::from_millis(120),
                    "Banned Steve: griefing",
                )]
            } else {
                vec![ScriptedLine::now("Kicked Alex: Kicked by an operator")]
            }
        });
        let warden = Arc::new(warden_for(dir.path(), Some(process.clone())));

        let ban = {
            let warden = Arc::clone(&warden);
            tokio::spawn(async move { warden.ban(SERVER, "Steve", Some("griefing")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let kick = warden.kick(SERVER, "Alex", None).await;

        assert_ok!(assert_ok!(ban.await));
        assert_ok!(kick);
        assert_eq!(
            process.events(),
            vec![
                Event::Received("ban Steve griefing".into()),
                Event::Emitted("Banned Steve: griefing".into()),
                Event::Received("kick Alex".into()),
                Event::Emitted("Kicked Alex: Kicked by an operator".into()),
            ]
        );
    }

    /// Confirmed changes show up in reads without touching the file
    #[tokio::test]
    async fn cache_tracks_confirmed_changes() {
        let dir = server_dir(&format!(r#"[{{"uuid":"{}","name":"Alice"}}]"#, ALICE_UUID));
        let process = ScriptedProcess::vanilla(&["Alice"], &[], &[]);
        let warden = warden_for(dir.path(), Some(process));

        assert_ok!(warden.add_op(SERVER, "Alice").await);
        let ops = assert_ok!(warden.list_ops(SERVER).await);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].player.uuid.to_string(), ALICE_UUID);
        assert_eq!(read_file(dir.path(), "ops.json"), serde_json::json!([]));

        let directory = assert_ok!(warden.directory(SERVER).await);
        assert_eq!(directory.state().await, ServerState::Running);
        assert_eq!(directory.applied_deltas().await, 1);
    }

    /// Chat that quotes a success message does not count as one
    #[tokio::test]
    async fn chat_is_not_a_confirmation() {
        let dir = server_dir("[]");
        let process =
            ScriptedProcess::replying("<Alex> lol Made Steve a server operator yesterday");
        let warden = warden_for(dir.path(), Some(process));

        let err = assert_err!(warden.add_op(SERVER, "Bob").await);
        assert!(err.is_ambiguous());
        assert!(assert_ok!(warden.list_ops(SERVER).await).is_empty());
    }

    /// Names that would inject console input never reach the process
    #[tokio::test]
    async fn injection_is_rejected() {
        let dir = server_dir("[]");
        let process = ScriptedProcess::vanilla(&[], &[], &[]);
        let warden = warden_for(dir.path(), Some(process.clone()));

        let err = assert_err!(warden.add_op(SERVER, "Bob\nstop").await);
        assert_eq!(err.category(), "invalid_argument");
        assert!(process.received().is_empty());
    }
}
