//! Subprocess client.
//!
//! The child's stdout is drained by a reader task that resolves pending
//! requests (`id → oneshot`). Stderr goes to `debug!` only. The connection
//! lock is held across write and await, so at most one request is in flight
//! per client.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use vigil_core::tools::ToolOutcome;
use vigil_settings::TransportSettings;

use crate::backend::ToolBackend;
use crate::errors::{TransportError, TransportResult};
use crate::protocol::{
    METHOD_CALL_TOOL, METHOD_INITIALIZE, RequestEnvelope, ResponseEnvelope, call_tool_params,
    initialize_params,
};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<ResponseEnvelope>>>>;

/// How to start and talk to the automation subprocess.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportConfig {
    /// Executable.
    pub command: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Limit for the `initialize` exchange.
    pub handshake_timeout: Duration,
    /// Limit for one tool call.
    pub call_timeout: Duration,
}

impl TransportConfig {
    /// Config from transport settings.
    #[must_use]
    pub fn from_settings(settings: &TransportSettings) -> Self {
        Self {
            command: settings.command.clone(),
            args: settings.args.clone(),
            handshake_timeout: Duration::from_millis(settings.handshake_timeout_ms),
            call_timeout: Duration::from_millis(settings.call_timeout_ms),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::from_settings(&TransportSettings::default())
    }
}

/// Why a single request did not produce a response.
#[derive(Debug)]
enum CallFailure {
    TimedOut,
    Died(String),
    Fatal(TransportError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection
// ─────────────────────────────────────────────────────────────────────────────

/// One live child process.
struct Connection {
    child: Child,
    stdin: ChildStdin,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
    stderr: JoinHandle<()>,
}

impl Connection {
    fn spawn(config: &TransportConfig) -> TransportResult<Self> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                command: config.command.clone(),
                source,
            })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(TransportError::Spawn {
                command: config.command.clone(),
                source: std::io::Error::other("stdio pipes unavailable"),
            });
        };

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_loop(stdout, Arc::clone(&pending), Arc::clone(&alive)));
        let stderr = tokio::spawn(drain_stderr(stderr));

        info!(command = %config.command, pid = child.id(), "automation process started");
        Ok(Self {
            child,
            stdin,
            pending,
            alive,
            next_id: AtomicU64::new(1),
            reader,
            stderr,
        })
    }

    async fn request(
        &mut self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<ResponseEnvelope, CallFailure> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(CallFailure::Died("process exited".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = RequestEnvelope::new(id, method, params)
            .to_line()
            .map_err(|e| CallFailure::Fatal(e.into()))?;

        let (tx, rx) = oneshot::channel();
        let _ = self.pending.lock().insert(id, tx);
        // The reader clears the map after flipping `alive`; re-check so a
        // sender inserted after the clear cannot wait out the full timeout.
        if !self.alive.load(Ordering::Acquire) {
            let _ = self.pending.lock().remove(&id);
            return Err(CallFailure::Died("process exited".into()));
        }

        if let Err(e) = write_line(&mut self.stdin, &line).await {
            let _ = self.pending.lock().remove(&id);
            return Err(CallFailure::Died(format!("write failed: {e}")));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(CallFailure::Died("process closed stdout".into())),
            Err(_) => {
                let _ = self.pending.lock().remove(&id);
                Err(CallFailure::TimedOut)
            }
        }
    }

    async fn handshake(&mut self, timeout: Duration) -> TransportResult<()> {
        match self.request(METHOD_INITIALIZE, initialize_params(), timeout).await {
            Ok(ResponseEnvelope { error: Some(err), .. }) => Err(TransportError::Handshake {
                reason: format!("remote error {}: {}", err.code, err.message),
            }),
            Ok(response) => {
                debug!(version = response.version.as_deref().unwrap_or("?"), "handshake complete");
                Ok(())
            }
            Err(CallFailure::TimedOut) => Err(TransportError::Handshake {
                reason: format!("no response within {}ms", timeout.as_millis()),
            }),
            Err(CallFailure::Died(reason)) => Err(TransportError::Handshake { reason }),
            Err(CallFailure::Fatal(e)) => Err(e),
        }
    }

    async fn close(mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "kill failed (process already gone)");
        }
        self.reader.abort();
        self.stderr.abort();
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

async fn read_loop(stdout: ChildStdout, pending: PendingMap, alive: Arc<AtomicBool>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let Some(response) = ResponseEnvelope::parse_line(&line) else {
                    debug!(line = %line, "ignoring non-response stdout line");
                    continue;
                };
                let id = response.id;
                match pending.lock().remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => debug!(id, "dropping response with no waiting request"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "automation stdout read failed");
                break;
            }
        }
    }
    alive.store(false, Ordering::Release);
    pending.lock().clear();
    debug!("automation stdout closed");
}

async fn drain_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "vigil_transport::stderr", line = %line, "automation stderr");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ToolTransport
// ─────────────────────────────────────────────────────────────────────────────

/// Tool client for one execution context.
///
/// The process starts lazily on the first call (or eagerly via
/// [`start`](Self::start)).
pub struct ToolTransport {
    config: TransportConfig,
    conn: tokio::sync::Mutex<Option<Connection>>,
    respawns: AtomicU64,
}

impl ToolTransport {
    /// Create a client. Nothing is spawned yet.
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            conn: tokio::sync::Mutex::new(None),
            respawns: AtomicU64::new(0),
        }
    }

    /// The client's configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Number of times the process was replaced after dying.
    pub fn respawn_count(&self) -> u64 {
        self.respawns.load(Ordering::Relaxed)
    }

    /// Whether a handshaken process is currently attached.
    pub async fn is_connected(&self) -> bool {
        self.conn
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| c.alive.load(Ordering::Acquire))
    }

    /// Spawn and handshake now if not yet connected.
    pub async fn start(&self) -> TransportResult<()> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        Ok(())
    }

    async fn connect(&self) -> TransportResult<Connection> {
        let mut conn = Connection::spawn(&self.config)?;
        if let Err(e) = conn.handshake(self.config.handshake_timeout).await {
            warn!(error = %e, "automation handshake failed");
            conn.close().await;
            return Err(e);
        }
        Ok(conn)
    }

    /// Run one tool call.
    ///
    /// A timeout or a remote error is returned as a failed outcome. If the
    /// process dies the call is retried once on a fresh process; a second
    /// death is [`TransportError::ProcessDied`].
    #[instrument(skip_all, fields(tool_name = name))]
    pub async fn call_tool(&self, name: &str, arguments: &Map<String, Value>) -> TransportResult<ToolOutcome> {
        let params = call_tool_params(name, arguments);
        let mut guard = self.conn.lock().await;
        let mut retried = false;

        loop {
            let conn = match guard.take() {
                Some(conn) => conn,
                None => self.connect().await?,
            };
            let conn = guard.insert(conn);

            match conn.request(METHOD_CALL_TOOL, params.clone(), self.config.call_timeout).await {
                Ok(response) => return Ok(response.into_outcome(name)),
                Err(CallFailure::TimedOut) => {
                    let ms = self.config.call_timeout.as_millis();
                    warn!(timeout_ms = ms, "tool call timed out");
                    return Ok(ToolOutcome::failure(format!("{name} timed out after {ms}ms")));
                }
                Err(CallFailure::Fatal(e)) => return Err(e),
                Err(CallFailure::Died(reason)) => {
                    if let Some(dead) = guard.take() {
                        dead.close().await;
                    }
                    if retried {
                        warn!(reason = %reason, "automation process died again, giving up");
                        return Err(TransportError::ProcessDied { reason });
                    }
                    warn!(reason = %reason, "automation process died, respawning");
                    let _ = self.respawns.fetch_add(1, Ordering::Relaxed);
                    retried = true;
                }
            }
        }
    }

    /// Kill the process, if any.
    pub async fn shutdown(&self) {
        if let Some(conn) = self.conn.lock().await.take() {
            conn.close().await;
            info!("automation process stopped");
        }
    }
}

#[async_trait]
impl ToolBackend for ToolTransport {
    async fn execute(&self, name: &str, arguments: &Map<String, Value>) -> TransportResult<ToolOutcome> {
        self.call_tool(name, arguments).await
    }
}
