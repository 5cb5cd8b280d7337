//! The console of a managed server process
//!
//! Processes are owned by whoever launched them. The core only ever holds a
//! [`ServerHandle`] for the duration of one call.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, Mutex};

/// Console output lines buffered per subscriber before it starts lagging
const OUTPUT_BUFFER: usize = 1024;

/// A line-oriented console attached to a running server.
#[async_trait]
pub trait ServerProcess: Send + Sync {
    fn is_running(&self) -> bool;

    /// Writes `line` followed by a newline to the server's stdin.
    async fn send_line(&self, line: &str) -> io::Result<()>;

    /// Receives every output line produced after this call.
    fn subscribe(&self) -> broadcast::Receiver<String>;
}

pub type ServerHandle = Arc<dyn ServerProcess>;

/// A server launched as a child process with piped stdin/stdout.
pub struct ChildProcess {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    output: broadcast::Sender<String>,
    running: Arc<AtomicBool>,
}

impl ChildProcess {
    /// Starts `program` inside `dir` and begins pumping its stdout.
    pub fn spawn(program: &str, args: &[String], dir: &Path) -> io::Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdout not captured"))?;

        let (output, _) = broadcast::channel(OUTPUT_BUFFER);
        let running = Arc::new(AtomicBool::new(true));
        info!("Launched {} (pid {:?}) in {}", program, child.id(), dir.display());

        {
            let output = output.clone();
            let running = Arc::clone(&running);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            debug!("console> {}", line);
                            // No subscribers just means nobody is waiting on a response
                            let _ = output.send(line);
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("Error reading server output: {}", e);
                            break;
                        }
                    }
                }
                running.store(false, Ordering::SeqCst);
                info!("Server output closed");
            });
        }

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            output,
            running,
        })
    }

    /// Waits for the process to exit.
    pub async fn wait(&self) -> io::Result<ExitStatus> {
        let status = self.child.lock().await.wait().await?;
        self.running.store(false, Ordering::SeqCst);
        Ok(status)
    }
}

#[async_trait]
impl ServerProcess for ChildProcess {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn send_line(&self, line: &str) -> io::Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.output.subscribe()
    }
}
