//! MCP Host (C4, §4.4): supervises external content-processor child
//! processes over a hand-rolled JSON-RPC 2.0 stdio channel.
//!
//! Process-spawn conventions (`kill_on_drop(true)`, `env_clear()` + merged
//! env, piped stdin/stdout/stderr) are grounded on
//! `codex-dashflow-mcp::client::McpClient::connect_stdio`
//! (`examples/dropbox-dTOOL/codex_dashflow/crates/mcp/src/client.rs`); the
//! exponential-backoff restart loop generalizes that same crate's
//! `call_tool_with_retry`.

use std::collections::HashMap;
use std::ffi::OsString;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use serde_json::{json, Value};
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{error, info, warn};

use crate::config::McpServerConfig;
use crate::error::McpError;
use crate::metrics::Metrics;
use crate::router::IngestionRouter;

use super::descriptor::{McpServerDescriptor, ServerHealth, Transport};
use super::protocol::{parse_incoming, read_line, write_message, IncomingMessage, RpcNotification, RpcRequest};

const NANCY_CAPABILITIES: &[&str] = &["nancy/ingest", "nancy/health_check", "nancy/capabilities"];

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<Value>>>>;

struct ServerProcess {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    pending: PendingMap,
    next_id: AtomicI64,
    config: McpServerConfig,
}

/// Supervises the configured set of MCP content-processor servers (§4.4).
pub struct McpHost {
    descriptors: SyncMutex<HashMap<String, McpServerDescriptor>>,
    processes: Mutex<HashMap<String, Arc<ServerProcess>>>,
    configs: Vec<McpServerConfig>,
    router: Arc<IngestionRouter>,
    metrics: Arc<Metrics>,
}

impl McpHost {
    pub fn new(configs: Vec<McpServerConfig>, router: Arc<IngestionRouter>, metrics: Arc<Metrics>) -> Self {
        let descriptors = configs
            .iter()
            .map(|c| {
                (
                    c.name.clone(),
                    McpServerDescriptor::new(c.name.clone(), c.content_types.clone(), c.priority),
                )
            })
            .collect();
        Self {
            descriptors: SyncMutex::new(descriptors),
            processes: Mutex::new(HashMap::new()),
            configs,
            router,
            metrics,
        }
    }

    pub fn descriptor(&self, name: &str) -> Option<McpServerDescriptor> {
        self.descriptors.lock().get(name).cloned()
    }

    pub fn descriptors(&self) -> Vec<McpServerDescriptor> {
        self.descriptors.lock().values().cloned().collect()
    }

    pub fn healthy_count(&self) -> i64 {
        self.descriptors
            .lock()
            .values()
            .filter(|d| d.health == ServerHealth::Healthy)
            .count() as i64
    }

    /// Launch and initialize every configured server (§4.4 "Start").
    pub async fn start_all(self: &Arc<Self>) {
        self.metrics.set_mcp_servers_total(self.configs.len() as i64);
        for config in self.configs.clone() {
            if let Err(e) = self.start_server(&config).await {
                error!(server = %config.name, error = %e, "failed to start mcp server");
            }
            self.spawn_heartbeat_monitor(config);
        }
        self.metrics.set_mcp_servers_healthy(self.healthy_count());
    }

    async fn start_server(self: &Arc<Self>, config: &McpServerConfig) -> Result<(), McpError> {
        info!(server = %config.name, "starting mcp server");

        let mut envs: HashMap<OsString, OsString> = std::env::vars_os().collect();
        for (k, v) in &config.env {
            envs.insert(k.into(), v.into());
        }

        let mut cmd = Command::new(&config.command);
        cmd.kill_on_drop(true)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .envs(envs)
            .args(&config.args);

        let mut child = cmd.spawn().map_err(|e| McpError::Spawn {
            name: config.name.clone(),
            message: e.to_string(),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| McpError::Spawn {
            name: config.name.clone(),
            message: "child process did not expose stdin".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| McpError::Spawn {
            name: config.name.clone(),
            message: "child process did not expose stdout".to_string(),
        })?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let process = Arc::new(ServerProcess {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            pending: pending.clone(),
            next_id: AtomicI64::new(1),
            config: config.clone(),
        });

        self.spawn_reader(config.name.clone(), stdout, pending, Arc::clone(self));
        self.processes
            .lock()
            .await
            .insert(config.name.clone(), Arc::clone(&process));

        let init_params = json!({
            "capabilities": NANCY_CAPABILITIES,
        });
        let result = self
            .call(&process, "initialize", Some(init_params), Duration::from_secs(config.heartbeat_interval_secs.max(5)))
            .await?;

        let version = result
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let capabilities: Vec<String> = result
            .get("capabilities")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        if !capabilities.iter().any(|c| c == "nancy/ingest") {
            warn!(server = %config.name, "server did not advertise nancy/ingest");
        }

        let mut descriptors = self.descriptors.lock();
        if let Some(d) = descriptors.get_mut(&config.name) {
            d.transport = Transport::ChildProcessStdio;
            d.on_initialized(version, capabilities);
        }
        Ok(())
    }

    /// Background task reading newline-delimited JSON-RPC messages from the
    /// child's stdout, dispatching responses to pending calls and
    /// notifications (`heartbeat`) to descriptor state.
    fn spawn_reader(
        &self,
        name: String,
        stdout: tokio::process::ChildStdout,
        pending: PendingMap,
        host: Arc<McpHost>,
    ) {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            loop {
                match read_line(&mut reader).await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match parse_incoming(&line) {
                            Ok(IncomingMessage::Response(resp)) => {
                                if let Some(id) = resp.id.as_i64() {
                                    if let Some(tx) = pending.lock().await.remove(&id) {
                                        let value = resp.result.unwrap_or(Value::Null);
                                        let _ = tx.send(value);
                                    }
                                }
                            }
                            Ok(IncomingMessage::Notification(note)) if note.method == "heartbeat" => {
                                let mut descriptors = host.descriptors.lock();
                                if let Some(d) = descriptors.get_mut(&name) {
                                    d.on_heartbeat();
                                }
                            }
                            Ok(IncomingMessage::Notification(_)) => {}
                            Err(e) => warn!(server = %name, error = %e, "malformed mcp message"),
                        }
                    }
                    Ok(None) => {
                        warn!(server = %name, "mcp server closed stdout");
                        break;
                    }
                    Err(e) => {
                        warn!(server = %name, error = %e, "error reading from mcp server");
                        break;
                    }
                }
            }
        });
    }

    async fn call(
        &self,
        process: &ServerProcess,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        let id = process.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        process.pending.lock().await.insert(id, tx);

        let request = RpcRequest::new(json!(id), method, params);
        {
            let mut stdin = process.stdin.lock().await;
            write_message(&mut *stdin, &request)
                .await
                .map_err(|e| McpError::Rpc {
                    server: process.config.name.clone(),
                    method: method.to_string(),
                    message: e.to_string(),
                })?;
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(McpError::Rpc {
                server: process.config.name.clone(),
                method: method.to_string(),
                message: "response channel closed".to_string(),
            }),
            Err(_) => {
                process.pending.lock().await.remove(&id);
                Err(McpError::Timeout {
                    name: process.config.name.clone(),
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }

    /// Select the registered server whose declared content types cover
    /// `content_type`: first match by configured priority, tie-broken by
    /// most recent heartbeat (§4.4 "Route").
    fn select_server(&self, content_type: &str) -> Result<McpServerDescriptor, McpError> {
        let descriptors = self.descriptors.lock();
        let mut candidates: Vec<&McpServerDescriptor> = descriptors
            .values()
            .filter(|d| d.supports(content_type))
            .collect();
        if candidates.is_empty() {
            return Err(McpError::NoServerForContentType(content_type.to_string()));
        }
        candidates.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| b.last_heartbeat.cmp(&a.last_heartbeat))
        });
        let chosen = candidates[0];
        match chosen.health {
            ServerHealth::Healthy | ServerHealth::Starting => Ok(chosen.clone()),
            ServerHealth::Unhealthy | ServerHealth::Disabled => {
                Err(McpError::ServerUnavailable(chosen.name.clone()))
            }
        }
    }

    /// `nancy/ingest(file_path, metadata)` — ask the selected server to
    /// extract `file_path` (declared as content type `content_type`) into a
    /// Knowledge Packet, then forward it to the Ingestion Router (§4.4
    /// "Route"/"Forward").
    pub async fn ingest_file(
        &self,
        file_path: &str,
        content_type: &str,
        metadata: Value,
    ) -> Result<crate::router::IngestResponse, crate::error::NancyError> {
        let server = self.select_server(content_type)?;
        let processes = self.processes.lock().await;
        let process = processes
            .get(&server.name)
            .ok_or_else(|| McpError::ServerUnavailable(server.name.clone()))?;

        let params = json!({"file_path": file_path, "metadata": metadata});
        let result = self
            .call(process, "nancy/ingest", Some(params), Duration::from_secs(30))
            .await?;

        self.router.ingest(&result).await
    }

    fn spawn_heartbeat_monitor(self: &Arc<Self>, config: McpServerConfig) {
        let host = Arc::clone(self);
        tokio::spawn(async move {
            let interval = Duration::from_secs(config.heartbeat_interval_secs.max(1));
            loop {
                tokio::time::sleep(interval).await;
                let should_restart = {
                    let mut descriptors = host.descriptors.lock();
                    match descriptors.get_mut(&config.name) {
                        Some(d) if d.health == ServerHealth::Disabled => return,
                        Some(d) => d.note_missed_heartbeat(config.max_missed),
                        None => return,
                    }
                };
                host.metrics.set_mcp_servers_healthy(host.healthy_count());
                if should_restart {
                    host.attempt_restart(&config).await;
                }
            }
        });
    }

    /// Restart a server after it's been marked unhealthy, backing off
    /// exponentially; after `max_restart_attempts` it is marked `disabled`
    /// and no further attempts are made (§4.4 "Health").
    async fn attempt_restart(self: &Arc<Self>, config: &McpServerConfig) {
        let attempt = {
            let mut descriptors = self.descriptors.lock();
            let d = match descriptors.get_mut(&config.name) {
                Some(d) => d,
                None => return,
            };
            if d.health == ServerHealth::Disabled {
                return;
            }
            d.on_restart_attempted(config.max_restart_attempts);
            d.restart_attempts
        };

        if self.descriptor(&config.name).map(|d| d.health) == Some(ServerHealth::Disabled) {
            warn!(server = %config.name, "mcp server disabled after repeated restart failures");
            return;
        }

        let delay = Duration::from_millis(100u64.saturating_mul(1u64 << attempt.min(10)).min(30_000));
        tokio::time::sleep(delay).await;

        self.processes.lock().await.remove(&config.name);
        match self.start_server(config).await {
            Ok(()) => {
                if let Some(d) = self.descriptors.lock().get_mut(&config.name) {
                    d.on_restart_succeeded();
                }
                info!(server = %config.name, "mcp server restarted");
            }
            Err(e) => {
                warn!(server = %config.name, error = %e, "mcp server restart attempt failed");
            }
        }
    }

    /// Send `shutdown`, wait `graceful_ms`, then terminate every server
    /// (§4.4 "Shutdown").
    pub async fn shutdown_all(&self) {
        let processes = self.processes.lock().await;
        for (name, process) in processes.iter() {
            let notice = RpcNotification {
                jsonrpc: super::protocol::JSONRPC_VERSION.to_string(),
                method: "shutdown".to_string(),
                params: None,
            };
            let mut stdin = process.stdin.lock().await;
            let _ = write_message(&mut *stdin, &notice).await;
            drop(stdin);

            tokio::time::sleep(Duration::from_millis(process.config.graceful_ms)).await;
            let mut child = process.child.lock().await;
            let _ = child.start_kill();
            info!(server = %name, "mcp server shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, content_types: Vec<&str>, priority: i32) -> McpServerConfig {
        McpServerConfig {
            name: name.to_string(),
            command: "true".to_string(),
            args: Vec::new(),
            content_types: content_types.into_iter().map(str::to_string).collect(),
            priority,
            env: HashMap::new(),
            heartbeat_interval_secs: 10,
            max_missed: 3,
            max_restart_attempts: 5,
            graceful_ms: 0,
        }
    }

    fn host() -> McpHost {
        let configs = vec![
            config("doc-a", vec!["document"], 0),
            config("doc-b", vec!["document"], 1),
            config("sheet", vec!["spreadsheet"], 0),
        ];
        let vector = Arc::new(crate::brains::InMemoryVectorBrain::new());
        let analytical = Arc::new(crate::brains::InMemoryAnalyticalBrain::new());
        let graph = Arc::new(crate::brains::InMemoryGraphBrain::new());
        let router = Arc::new(IngestionRouter::new(
            vector,
            analytical,
            graph,
            Arc::new(crate::history::IngestHistory::new()),
            Arc::new(Metrics::new()),
            crate::config::RetrySection::default(),
            16,
            64,
        ));
        McpHost::new(configs, router, Arc::new(Metrics::new()))
    }

    #[test]
    fn select_server_prefers_lower_priority_number() {
        let host = host();
        {
            let mut descriptors = host.descriptors.lock();
            descriptors.get_mut("doc-a").unwrap().health = ServerHealth::Healthy;
            descriptors.get_mut("doc-b").unwrap().health = ServerHealth::Healthy;
        }
        let chosen = host.select_server("document").unwrap();
        assert_eq!(chosen.name, "doc-a");
    }

    #[test]
    fn select_server_errors_when_no_server_covers_the_content_type() {
        let host = host();
        let err = host.select_server("video").unwrap_err();
        assert!(matches!(err, McpError::NoServerForContentType(_)));
    }

    #[test]
    fn select_server_reports_unavailable_when_the_only_candidate_is_disabled() {
        let host = host();
        {
            let mut descriptors = host.descriptors.lock();
            descriptors.get_mut("sheet").unwrap().health = ServerHealth::Disabled;
        }
        let err = host.select_server("spreadsheet").unwrap_err();
        assert!(matches!(err, McpError::ServerUnavailable(_)));
    }

    /// A server that exits immediately on launch never completes
    /// `initialize`, so every heartbeat tick counts as missed; after
    /// `max_restart_attempts` it lands in `disabled` and further ingest
    /// requests for its content types report `ServerUnavailable`, while
    /// other content types are unaffected (§4.4 "Health", §8 scenario 6).
    #[tokio::test]
    async fn a_crash_looping_server_is_disabled_after_its_restart_budget_is_spent() {
        let crashing = config("crasher", vec!["document"], 0);
        let crashing = McpServerConfig {
            command: "false".to_string(),
            heartbeat_interval_secs: 1,
            max_missed: 0,
            max_restart_attempts: 2,
            ..crashing
        };
        let sound = McpServerConfig { heartbeat_interval_secs: 1, ..config("sheet", vec!["spreadsheet"], 0) };

        let vector = Arc::new(crate::brains::InMemoryVectorBrain::new());
        let analytical = Arc::new(crate::brains::InMemoryAnalyticalBrain::new());
        let graph = Arc::new(crate::brains::InMemoryGraphBrain::new());
        let router = Arc::new(IngestionRouter::new(
            vector,
            analytical,
            graph,
            Arc::new(crate::history::IngestHistory::new()),
            Arc::new(Metrics::new()),
            crate::config::RetrySection::default(),
            16,
            64,
        ));
        let host = Arc::new(McpHost::new(vec![crashing, sound], router, Arc::new(Metrics::new())));
        host.start_all().await;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(40);
        loop {
            if host.descriptor("crasher").map(|d| d.health) == Some(ServerHealth::Disabled) {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "crasher was never disabled");
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        let err = host.ingest_file("doc.txt", "document", json!({})).await.unwrap_err();
        assert!(matches!(err, crate::error::NancyError::Mcp(McpError::ServerUnavailable(_))));

        // The unrelated "sheet" server never crashed and stays startable for
        // its own content type.
        assert_eq!(host.select_server("spreadsheet").unwrap().name, "sheet");
    }
}
