/// MCP server connection
///
/// Owns one MCP server child process and its stdio pipes, and speaks
/// line-delimited JSON-RPC 2.0 over them.
///
/// The protocol is strictly synchronous: at most one request is in flight
/// per connection, and a response is matched to its request by read order,
/// NOT by id. `send_request` performs exactly one write and one read while
/// holding the channel mutex across the whole round trip. Do not "upgrade"
/// this to id-based multiplexing: nothing in the surrounding system issues
/// overlapping requests on one connection, and servers are free to echo
/// whatever id they saw.
use crate::config::{ConnectionConfig, ConnectionState};
use crate::protocol::{
    CallToolParams, InitializeParams, InitializeResult, JsonRpcRequest, JsonRpcResponse,
    ListResourcesResult, ListToolsResult, McpResource, McpTool,
};
use crate::{McpError, Result};
use serde_json::Value;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, RwLock};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// Upper bound on one write+read round trip; expiry force-disconnects.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period for the server process to exit before it is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Write and read halves of the child's stdio, locked together so a full
/// round trip is one critical section.
struct StdioChannel {
    writer: ChildStdin,
    reader: BufReader<ChildStdout>,
}

/// Connection to a single MCP server process.
pub struct ServerConnection {
    config: ConnectionConfig,
    /// Request id counter, starts at 1 and only increases
    request_id: AtomicU64,
    /// Cleared first on disconnect so concurrent observers see it immediately
    connected: AtomicBool,
    state: RwLock<ConnectionState>,
    process: Mutex<Option<Child>>,
    channel: Mutex<Option<StdioChannel>>,
}

impl ServerConnection {
    /// Create a new, disconnected connection owning `config`.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            request_id: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            state: RwLock::new(ConnectionState::Disconnected),
            process: Mutex::new(None),
            channel: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Spawn the server process and perform the initialize handshake.
    ///
    /// On failure the process and pipes are released before returning and
    /// the connection is left `Failed`; a fresh connect needs a new
    /// instance.
    pub async fn connect(&self, client_name: &str, client_version: &str) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != ConnectionState::Disconnected {
                return Err(McpError::Connection {
                    server: self.config.id.clone(),
                    reason: format!("connect is not permitted from state {:?}", *state),
                });
            }
            *state = ConnectionState::Connecting;
        }

        info!(
            target: "mcp_client",
            server = %self.config.id,
            command = %self.config.command,
            "connecting to MCP server"
        );

        match self.establish(client_name, client_version).await {
            Ok(()) => {
                self.connected.store(true, Ordering::SeqCst);
                *self.state.write().await = ConnectionState::Connected;
                info!(target: "mcp_client", server = %self.config.id, "MCP server connected");
                Ok(())
            }
            Err(e) => {
                self.release().await;
                *self.state.write().await = ConnectionState::Failed;
                Err(match e {
                    McpError::Connection { .. } => e,
                    other => McpError::Connection {
                        server: self.config.id.clone(),
                        reason: other.to_string(),
                    },
                })
            }
        }
    }

    async fn establish(&self, client_name: &str, client_version: &str) -> Result<()> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref env) = self.config.env {
            for (key, val) in env {
                cmd.env(key, val);
            }
        }

        if let Some(ref dir) = self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| McpError::Connection {
            server: self.config.id.clone(),
            reason: format!("failed to spawn process: {e}"),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| McpError::Connection {
            server: self.config.id.clone(),
            reason: "failed to capture stdin".to_string(),
        })?;

        let stdout = child.stdout.take().ok_or_else(|| McpError::Connection {
            server: self.config.id.clone(),
            reason: "failed to capture stdout".to_string(),
        })?;

        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_drain(self.config.id.clone(), stderr);
        }

        *self.channel.lock().await = Some(StdioChannel {
            writer: stdin,
            reader: BufReader::new(stdout),
        });
        *self.process.lock().await = Some(child);

        let params = InitializeParams::new(client_name, client_version);
        let request = JsonRpcRequest::request(
            self.next_request_id(),
            "initialize",
            Some(serde_json::to_value(&params)?),
        );

        let response = self.send_request(request).await?;

        if let Some(error) = response.error {
            return Err(McpError::Connection {
                server: self.config.id.clone(),
                reason: format!("initialize rejected: {} (code {})", error.message, error.code),
            });
        }

        if let Some(result) = response.result {
            if let Ok(init) = serde_json::from_value::<InitializeResult>(result) {
                info!(
                    target: "mcp_client",
                    server = %self.config.id,
                    server_name = %init.server_info.name,
                    server_version = %init.server_info.version,
                    "MCP server initialized"
                );
            }
        }

        self.send_notification(JsonRpcRequest::notification("notifications/initialized", None))
            .await?;

        Ok(())
    }

    /// Send one request and read its response.
    ///
    /// Exactly one newline-terminated JSON line is written, then exactly
    /// one line is read back and parsed; the channel mutex is held across
    /// both so concurrent callers cannot cross-deliver responses. The
    /// response id is intentionally not checked against the request id.
    pub async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        if !self.connected.load(Ordering::SeqCst) && request.method != "initialize" {
            return Err(McpError::Connection {
                server: self.config.id.clone(),
                reason: "server not connected".to_string(),
            });
        }

        let mut line = serde_json::to_string(&request)?;
        line.push('\n');
        let server = self.config.id.clone();

        debug!(target: "mcp_client", server = %server, method = %request.method, "sending request");

        let mut guard = self.channel.lock().await;
        let channel = guard.as_mut().ok_or_else(|| McpError::Connection {
            server: server.clone(),
            reason: "channel closed".to_string(),
        })?;

        let round_trip = async {
            channel
                .writer
                .write_all(line.as_bytes())
                .await
                .map_err(|e| McpError::Protocol {
                    server: server.clone(),
                    reason: format!("write failed: {e}"),
                })?;
            channel.writer.flush().await.map_err(|e| McpError::Protocol {
                server: server.clone(),
                reason: format!("flush failed: {e}"),
            })?;

            let mut response_line = String::new();
            let read = channel
                .reader
                .read_line(&mut response_line)
                .await
                .map_err(|e| McpError::Protocol {
                    server: server.clone(),
                    reason: format!("read failed: {e}"),
                })?;
            if read == 0 {
                return Err(McpError::Protocol {
                    server: server.clone(),
                    reason: "server closed the stream".to_string(),
                });
            }

            serde_json::from_str::<JsonRpcResponse>(response_line.trim()).map_err(|e| {
                McpError::Protocol {
                    server: server.clone(),
                    reason: format!("malformed response line: {e}"),
                }
            })
        };

        match timeout(REQUEST_TIMEOUT, round_trip).await {
            Ok(result) => result,
            Err(_) => {
                drop(guard);
                warn!(
                    target: "mcp_client",
                    server = %self.config.id,
                    method = %request.method,
                    "request timed out, force-disconnecting"
                );
                self.disconnect().await;
                Err(McpError::Protocol {
                    server: self.config.id.clone(),
                    reason: format!("no response within {}s", REQUEST_TIMEOUT.as_secs()),
                })
            }
        }
    }

    async fn send_notification(&self, notification: JsonRpcRequest) -> Result<()> {
        let mut line = serde_json::to_string(&notification)?;
        line.push('\n');

        let mut guard = self.channel.lock().await;
        let channel = guard.as_mut().ok_or_else(|| McpError::Connection {
            server: self.config.id.clone(),
            reason: "channel closed".to_string(),
        })?;

        channel
            .writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::Protocol {
                server: self.config.id.clone(),
                reason: format!("write failed: {e}"),
            })?;
        channel.writer.flush().await.map_err(|e| McpError::Protocol {
            server: self.config.id.clone(),
            reason: format!("flush failed: {e}"),
        })?;

        Ok(())
    }

    /// List tools offered by the server.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        debug!(target: "mcp_client", server = %self.config.id, "listing tools");

        let request = JsonRpcRequest::request(self.next_request_id(), "tools/list", None);
        let response = self.send_request(request).await?;

        if let Some(error) = response.error {
            return Err(McpError::Tool {
                server: self.config.id.clone(),
                message: error.message,
            });
        }

        let tools = match response.result {
            Some(Value::Null) | None => Vec::new(),
            Some(result) => {
                serde_json::from_value::<ListToolsResult>(result)
                    .map_err(|e| McpError::Protocol {
                        server: self.config.id.clone(),
                        reason: format!("invalid tools/list result: {e}"),
                    })?
                    .tools
            }
        };

        debug!(target: "mcp_client", server = %self.config.id, count = tools.len(), "listed tools");
        Ok(tools)
    }

    /// List resources offered by the server.
    pub async fn list_resources(&self) -> Result<Vec<McpResource>> {
        debug!(target: "mcp_client", server = %self.config.id, "listing resources");

        let request = JsonRpcRequest::request(self.next_request_id(), "resources/list", None);
        let response = self.send_request(request).await?;

        if let Some(error) = response.error {
            return Err(McpError::Resource {
                server: self.config.id.clone(),
                message: error.message,
            });
        }

        let resources = match response.result {
            Some(Value::Null) | None => Vec::new(),
            Some(result) => {
                serde_json::from_value::<ListResourcesResult>(result)
                    .map_err(|e| McpError::Protocol {
                        server: self.config.id.clone(),
                        reason: format!("invalid resources/list result: {e}"),
                    })?
                    .resources
            }
        };

        debug!(
            target: "mcp_client",
            server = %self.config.id,
            count = resources.len(),
            "listed resources"
        );
        Ok(resources)
    }

    /// Invoke a tool and return the raw result payload.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<Value> {
        debug!(target: "mcp_client", server = %self.config.id, tool = %name, "calling tool");

        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        let request = JsonRpcRequest::request(
            self.next_request_id(),
            "tools/call",
            Some(serde_json::to_value(&params)?),
        );
        let response = self.send_request(request).await?;

        if let Some(error) = response.error {
            return Err(McpError::Tool {
                server: self.config.id.clone(),
                message: error.message,
            });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Disconnect from the server. Idempotent; cleanup failures are logged,
    /// never raised.
    pub async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!(target: "mcp_client", server = %self.config.id, "disconnecting from MCP server");
        }
        *self.state.write().await = ConnectionState::Disconnected;
        self.release().await;
    }

    /// True iff the connected flag is set and the process is alive right
    /// now; liveness is never cached beyond one call.
    pub async fn is_connected(&self) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        self.process_alive().await
    }

    async fn process_alive(&self) -> bool {
        match self.process.lock().await.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Tear down pipes and process. When a round trip is blocked on the
    /// channel, the process is killed first so the blocked caller surfaces
    /// an I/O failure and releases the lock.
    async fn release(&self) {
        match self.channel.try_lock() {
            Ok(mut guard) => {
                if let Some(mut channel) = guard.take() {
                    if let Err(e) = channel.writer.shutdown().await {
                        warn!(
                            target: "mcp_client",
                            server = %self.config.id,
                            error = %e,
                            "error closing write channel"
                        );
                    }
                }
                drop(guard);
                self.reap_process(true).await;
            }
            Err(_) => {
                self.reap_process(false).await;
                self.channel.lock().await.take();
            }
        }
    }

    async fn reap_process(&self, graceful: bool) {
        let Some(mut child) = self.process.lock().await.take() else {
            return;
        };

        if graceful {
            match timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(
                        target: "mcp_client",
                        server = %self.config.id,
                        status = %status,
                        "server process exited"
                    );
                    return;
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "mcp_client",
                        server = %self.config.id,
                        error = %e,
                        "error waiting for server process"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "mcp_client",
                        server = %self.config.id,
                        "server process did not exit within grace period, killing"
                    );
                }
            }
        }

        if let Err(e) = child.kill().await {
            warn!(
                target: "mcp_client",
                server = %self.config.id,
                error = %e,
                "failed to kill server process"
            );
        }
    }
}

/// Forward the server's stderr into the log, one line at a time.
fn spawn_stderr_drain(server: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            debug!(target: "mcp_server", server = %server, "{}", line);
        }
    });
}
