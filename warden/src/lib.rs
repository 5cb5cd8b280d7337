//! # Warden: Player Access Management
//!
//! This library keeps the whitelist, ban list and operator list of managed
//! game servers in step with what administrators ask for, whether or not the
//! server is currently running.
//!
//! ## Core Responsibilities
//!
//! ### File Access While Stopped
//! A stopped server's lists are plain JSON files in its working directory.
//! Reads go straight to disk and writes replace the file atomically, so a
//! server started afterwards picks the change up on boot.
//!
//! ### Console Commands While Running
//! A running server owns its list files and rewrites them from memory, so
//! editing them would be silently undone. Instead every change is sent as a
//! console command and the response is classified into an outcome:
//! - Applied: the server changed state
//! - Already in state: nothing to do, the request is satisfied
//! - Not found: the player was not on the list
//! - Malformed or unknown: the effect cannot be determined
//!
//! ### Read Cache
//! While running, reads are served from the file snapshot taken when the
//! server was first seen up, plus every change the console confirmed since.
//! Changes whose outcome was ambiguous never touch the cache; callers fix
//! that with an explicit reconcile.
//!
//! ## Architecture Design
//!
//! ### One Command In Flight
//! The console has no request ids, so responses are matched to commands by
//! timing alone. Each server gets a queue worker task that writes one line,
//! collects its response and only then takes the next request. Callers never
//! block each other beyond waiting their turn.
//!
//! ### Single Cache Writer
//! Readers take a shared lock and clone an `Arc`'d snapshot. Anything that
//! changes the cache first takes the directory's writer lock, so concurrent
//! mutations and the stopped-to-running reload cannot interleave.
//!
//! ## Module Organization
//!
//! ### List Store (`list_store`)
//! Typed reads and atomic writes of `whitelist.json`, `banned-players.json`
//! and `ops.json`.
//!
//! ### Process (`process`)
//! The [`process::ServerProcess`] seam plus a `tokio::process` child
//! implementation with a broadcast output pump.
//!
//! ### Channel (`channel`)
//! The FIFO command queue with response windows and quiet-period settling.
//!
//! ### Interpreter (`interpreter`)
//! Per-command rule tables turning free-text console output into an
//! [`interpreter::Outcome`].
//!
//! ### Directory (`directory`)
//! The Stopped/Running state machine and its cache.
//!
//! ### Registry (`registry`)
//! Server-id routing and the public list and mutation calls.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use warden::config::Config;
//! use warden::registry::{ProcessTable, Warden};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let table = Arc::new(ProcessTable::new());
//!     table.register("lobby", "/srv/lobby");
//!
//!     let warden = Warden::new(table, Config::default());
//!
//!     // Stopped server: edits whitelist.json directly
//!     let receipt = warden.add_whitelist("lobby", "Steve").await?;
//!     println!("{}", receipt.message);
//!
//!     for entry in warden.list_whitelist("lobby").await? {
//!         println!("{} {}", entry.player.name, entry.player.uuid);
//!     }
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod directory;
pub mod error;
pub mod interpreter;
pub mod list_store;
pub mod process;
pub mod registry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
