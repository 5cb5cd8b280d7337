//! Scripted stand-ins for a server console.
//!
//! [`ScriptedProcess`] records every line written to it and answers with
//! lines produced by a responder closure, each after its own delay.
//! [`ScriptedProcess::vanilla`] keeps in-memory access lists and answers the
//! way a stock server does.

use crate::process::ServerProcess;
use async_trait::async_trait;
use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

const LOG_PREFIX: &str = "[12:00:00] [Server thread/INFO]: ";

/// One line of scripted output.
#[derive(Debug, Clone)]
pub struct ScriptedLine {
    pub delay: Duration,
    pub text: String,
}

impl ScriptedLine {
    pub fn after(delay: Duration, text: impl Into<String>) -> Self {
        Self {
            delay,
            text: text.into(),
        }
    }

    pub fn now(text: impl Into<String>) -> Self {
        Self::after(Duration::ZERO, text)
    }
}

/// What happened at the process boundary, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Received(String),
    Emitted(String),
}

type Responder = Box<dyn Fn(&str) -> Vec<ScriptedLine> + Send + Sync>;

pub struct ScriptedProcess {
    running: AtomicBool,
    broken: AtomicBool,
    output: broadcast::Sender<String>,
    events: Arc<Mutex<Vec<Event>>>,
    responder: Responder,
}

impl ScriptedProcess {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&str) -> Vec<ScriptedLine> + Send + Sync + 'static,
    {
        let (output, _) = broadcast::channel(256);
        Arc::new(Self {
            running: AtomicBool::new(true),
            broken: AtomicBool::new(false),
            output,
            events: Arc::new(Mutex::new(Vec::new())),
            responder: Box::new(responder),
        })
    }

    /// Accepts everything and never answers
    pub fn silent() -> Arc<Self> {
        Self::new(|_| Vec::new())
    }

    /// Answers every line with the same fixed text
    pub fn replying(text: &'static str) -> Arc<Self> {
        Self::new(move |_| vec![ScriptedLine::now(text)])
    }

    /// Behaves like a stock server holding the given initial lists.
    pub fn vanilla(whitelist: &[&str], banned: &[&str], ops: &[&str]) -> Arc<Self> {
        let state = Mutex::new(VanillaLists {
            whitelist: whitelist.iter().map(|n| n.to_lowercase()).collect(),
            banned: banned.iter().map(|n| n.to_lowercase()).collect(),
            ops: ops.iter().map(|n| n.to_lowercase()).collect(),
        });
        Self::new(move |line| {
            let reply = match state.lock() {
                Ok(mut lists) => lists.respond(line),
                Err(_) => "Internal error".to_string(),
            };
            vec![ScriptedLine::now(format!("{}{}", LOG_PREFIX, reply))]
        })
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Makes every subsequent write fail as if the pipe had closed
    pub fn fail_writes(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    /// Writes an unsolicited output line, e.g. chat or a join message.
    pub fn emit(&self, line: &str) {
        record(&self.events, Event::Emitted(line.to_string()));
        let _ = self.output.send(line.to_string());
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Lines written to stdin, in order
    pub fn received(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Received(line) => Some(line),
                Event::Emitted(_) => None,
            })
            .collect()
    }
}

fn record(events: &Mutex<Vec<Event>>, event: Event) {
    if let Ok(mut events) = events.lock() {
        events.push(event);
    }
}

#[async_trait]
impl ServerProcess for ScriptedProcess {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn send_line(&self, line: &str) -> io::Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin closed"));
        }
        record(&self.events, Event::Received(line.to_string()));

        let script = (self.responder)(line);
        if script.is_empty() {
            return Ok(());
        }

        let output = self.output.clone();
        let events = Arc::clone(&self.events);
        tokio::spawn(async move {
            for line in script {
                if !line.delay.is_zero() {
                    tokio::time::sleep(line.delay).await;
                }
                record(&events, Event::Emitted(line.text.clone()));
                let _ = output.send(line.text);
            }
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.output.subscribe()
    }
}

struct VanillaLists {
    whitelist: HashSet<String>,
    banned: HashSet<String>,
    ops: HashSet<String>,
}

impl VanillaLists {
    fn respond(&mut self, line: &str) -> String {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["whitelist", "add", name] => {
                if self.whitelist.insert(name.to_lowercase()) {
                    format!("Added {} to the whitelist", name)
                } else {
                    "Player is already whitelisted".to_string()
                }
            }
            ["whitelist", "remove", name] => {
                if self.whitelist.remove(&name.to_lowercase()) {
                    format!("Removed {} from the whitelist", name)
                } else {
                    "Player is not whitelisted".to_string()
                }
            }
            ["ban", name, reason @ ..] => {
                if self.banned.insert(name.to_lowercase()) {
                    let reason = if reason.is_empty() {
                        shared::DEFAULT_BAN_REASON.to_string()
                    } else {
                        reason.join(" ")
                    };
                    format!("Banned {}: {}", name, reason)
                } else {
                    "Nothing changed. The player is already banned".to_string()
                }
            }
            ["pardon", name] => {
                if self.banned.remove(&name.to_lowercase()) {
                    format!("Unbanned {}", name)
                } else {
                    "Nothing changed. The player isn't banned".to_string()
                }
            }
            ["op", name] => {
                if self.ops.insert(name.to_lowercase()) {
                    format!("Made {} a server operator", name)
                } else {
                    "Nothing changed. The player already is an operator".to_string()
                }
            }
            ["deop", name] => {
                if self.ops.remove(&name.to_lowercase()) {
                    format!("Made {} no longer a server operator", name)
                } else {
                    "Nothing changed. The player is not an operator".to_string()
                }
            }
            ["kick", name, reason @ ..] => {
                let reason = if reason.is_empty() {
                    "Kicked by an operator".to_string()
                } else {
                    reason.join(" ")
                };
                format!("Kicked {}: {}", name, reason)
            }
            _ => "Unknown or incomplete command, see below for error".to_string(),
        }
    }
}
