//! Serialized command delivery to a server console.
//!
//! The console protocol has no request ids, so a response can only be
//! attributed to a command if nothing else is in flight. Each
//! [`CommandChannel`] owns a worker task that takes requests off a FIFO queue
//! and runs them one at a time: write the line, then collect output until the
//! response is recognised, goes quiet, or the window closes.

use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::process::ServerHandle;
use log::{debug, error, warn};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{timeout_at, Instant};

/// Decides whether an output line completes a response.
pub type Terminator = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// A queued command waiting for the worker
struct CommandRequest {
    process: ServerHandle,
    line: String,
    terminator: Option<Terminator>,
    reply: oneshot::Sender<Result<Vec<String>, ChannelError>>,
}

/// Handle to one server's command queue. Cheap to clone.
#[derive(Clone)]
pub struct CommandChannel {
    queue: mpsc::Sender<CommandRequest>,
}

impl CommandChannel {
    /// Spawns the queue worker; must be called inside a tokio runtime.
    pub fn new(config: ChannelConfig) -> Self {
        let (queue, requests) = mpsc::channel(config.queue_capacity.max(1));
        tokio::spawn(run_queue(requests, config));
        Self { queue }
    }

    /// Sends `line` and returns the output lines that followed it.
    pub async fn send(
        &self,
        process: ServerHandle,
        line: &str,
    ) -> Result<Vec<String>, ChannelError> {
        self.submit(process, line, None).await
    }

    /// Like [`send`](Self::send), but the response ends at the first line
    /// `terminator` accepts rather than after a quiet period.
    pub async fn send_until<F>(
        &self,
        process: ServerHandle,
        line: &str,
        terminator: F,
    ) -> Result<Vec<String>, ChannelError>
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.submit(process, line, Some(Box::new(terminator))).await
    }

    async fn submit(
        &self,
        process: ServerHandle,
        line: &str,
        terminator: Option<Terminator>,
    ) -> Result<Vec<String>, ChannelError> {
        // Never queue for a server that is already down
        if !process.is_running() {
            return Err(ChannelError::NotRunning);
        }

        let (reply, response) = oneshot::channel();
        let request = CommandRequest {
            process,
            line: line.to_string(),
            terminator,
            reply,
        };
        self.queue
            .send(request)
            .await
            .map_err(|_| ChannelError::Process("command queue closed".to_string()))?;

        response
            .await
            .map_err(|_| ChannelError::Process("command worker stopped".to_string()))?
    }
}

async fn run_queue(mut requests: mpsc::Receiver<CommandRequest>, config: ChannelConfig) {
    while let Some(request) = requests.recv().await {
        let CommandRequest {
            process,
            line,
            terminator,
            reply,
        } = request;

        if reply.is_closed() {
            debug!("Skipping cancelled command: {}", line);
            continue;
        }

        let result = deliver(&process, &line, terminator.as_deref(), &config).await;
        match &result {
            Ok(lines) => debug!("'{}' -> {} line(s)", line, lines.len()),
            Err(e) => warn!("'{}' failed: {}", line, e),
        }

        // The caller may have stopped waiting; the window still had to close
        let _ = reply.send(result);
    }
    debug!("Command queue closed");
}

async fn deliver(
    process: &ServerHandle,
    line: &str,
    terminator: Option<&(dyn Fn(&str) -> bool + Send + Sync)>,
    config: &ChannelConfig,
) -> Result<Vec<String>, ChannelError> {
    if !process.is_running() {
        return Err(ChannelError::NotRunning);
    }

    // Subscribe first so the response cannot race past us
    let mut output = process.subscribe();
    process.send_line(line).await.map_err(|e| {
        error!("Console write failed: {}", e);
        ChannelError::Process(e.to_string())
    })?;

    collect_response(
        &mut output,
        terminator,
        config.response_timeout(),
        config.settle(),
    )
    .await
}

/// Gathers output lines until the response is complete.
///
/// With a terminator, waits for an accepted line or the full window. Without
/// one, stops once `settle` passes with no new line. An empty window is a
/// timeout; any collected lines are returned as-is.
async fn collect_response(
    output: &mut broadcast::Receiver<String>,
    terminator: Option<&(dyn Fn(&str) -> bool + Send + Sync)>,
    window: Duration,
    settle: Duration,
) -> Result<Vec<String>, ChannelError> {
    let deadline = Instant::now() + window;
    let mut lines = Vec::new();

    loop {
        let wait_until = if lines.is_empty() || terminator.is_some() {
            deadline
        } else {
            (Instant::now() + settle).min(deadline)
        };

        match timeout_at(wait_until, output.recv()).await {
            Ok(Ok(line)) => {
                let done = terminator.map_or(false, |accepts| accepts(&line));
                lines.push(line);
                if done {
                    break;
                }
            }
            Ok(Err(RecvError::Lagged(skipped))) => {
                warn!("Console output lagged, {} line(s) skipped", skipped);
            }
            Ok(Err(RecvError::Closed)) => {
                if lines.is_empty() {
                    return Err(ChannelError::Process("console output closed".to_string()));
                }
                break;
            }
            Err(_) => {
                if lines.is_empty() {
                    return Err(ChannelError::Timeout { window });
                }
                break;
            }
        }
    }

    Ok(lines)
}
