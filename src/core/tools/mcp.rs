use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use super::{ToolClient, ToolDescriptor};
use crate::core::config::ToolsConfig;

#[derive(Serialize, Deserialize, Debug, Clone)]
struct JsonRpcRequest {
    jsonrpc: String,
    id: u64,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct JsonRpcResponse {
    jsonrpc: String,
    id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
}

/// JSON-RPC 2.0 client for a tool server spawned on child-process stdio.
pub struct McpToolClient {
    server: String,
    _child: Mutex<Option<Child>>,
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>,
    outbox: mpsc::Sender<String>,
    stderr: Arc<Mutex<String>>,
}

impl McpToolClient {
    pub async fn new(config: &ToolsConfig) -> Result<Arc<Self>> {
        info!("Starting tool server: {}", config.command);

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("Failed to open tool server stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("Failed to open tool server stdout"))?;
        let stderr_pipe = child.stderr.take();

        let (outbox, mut rx_out) = mpsc::channel::<String>(100);
        let pending = Arc::new(Mutex::new(HashMap::new()));
        let stderr_buf = Arc::new(Mutex::new(String::new()));

        let client = Arc::new(Self {
            server: config.command.clone(),
            _child: Mutex::new(Some(child)),
            next_id: AtomicU64::new(1),
            pending: pending.clone(),
            outbox,
            stderr: stderr_buf.clone(),
        });

        // Writer task: serialize requests onto the child's stdin.
        let mut stdin_writer = tokio::io::BufWriter::new(stdin);
        tokio::spawn(async move {
            while let Some(msg) = rx_out.recv().await {
                debug!("tool server TX: {}", msg);
                if let Err(e) = stdin_writer
                    .write_all(format!("{}\n", msg).as_bytes())
                    .await
                {
                    error!("Failed to write to tool server stdin: {}", e);
                    break;
                }
                let _ = stdin_writer.flush().await;
            }
        });

        // Reader task: route responses back to the waiting caller by id.
        let pending_reader = pending.clone();
        let server_name = config.command.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(line_res) = reader.next_line().await {
                match line_res {
                    Some(line) => {
                        debug!("tool server RX [{}]: {}", server_name, line);
                        if let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&line) {
                            let mut p = pending_reader.lock().await;
                            if let Some(tx) = p.remove(&resp.id) {
                                let _ = tx.send(resp);
                            }
                        } else {
                            warn!("Unparsed tool server RX [{}]: {}", server_name, line);
                        }
                    }
                    None => break,
                }
            }
            warn!("Tool server stdout closed [{}].", server_name);
            // Drop all pending senders so waiting calls fail fast
            let mut p = pending_reader.lock().await;
            p.clear();
        });

        if let Some(stderr_pipe) = stderr_pipe {
            let stderr_log = client.stderr.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr_pipe).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    let mut s = stderr_log.lock().await;
                    if s.len() < 2000 {
                        s.push_str(&line);
                        s.push('\n');
                    }
                    debug!("tool server STDERR: {}", line);
                }
            });
        }

        match tokio::time::timeout(std::time::Duration::from_secs(15), client.initialize()).await
        {
            Err(_elapsed) => {
                let err_log = client.stderr.lock().await;
                error!(
                    "Tool server [{}] failed to initialize (timeout). Stderr: {}",
                    config.command, err_log
                );
                return Err(anyhow!(
                    "Tool server initialization timeout for [{}]. Stderr: {}",
                    config.command,
                    err_log
                ));
            }
            Ok(Err(e)) => {
                let err_log = client.stderr.lock().await;
                error!(
                    "Tool server [{}] failed to initialize: {}. Stderr: {}",
                    config.command, e, err_log
                );
                return Err(anyhow!(
                    "Tool server initialization failed for [{}]: {}. Stderr: {}",
                    config.command,
                    e,
                    err_log
                ));
            }
            Ok(Ok(())) => {
                info!("Tool server [{}] initialized", config.command);
            }
        }

        Ok(client)
    }

    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        };

        let req_str = serde_json::to_string(&req)?;
        let (tx, rx) = oneshot::channel();

        {
            let mut p = self.pending.lock().await;
            p.insert(id, tx);
        }

        self.outbox.send(req_str).await?;

        let resp = rx.await?;
        if let Some(error) = resp.error {
            return Err(anyhow!("Tool server RPC error [{}]: {:?}", self.server, error));
        }

        resp.result
            .ok_or_else(|| anyhow!("Tool server RPC missing result [{}]", self.server))
    }

    async fn initialize(&self) -> Result<()> {
        let params = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {
                "roots": { "listChanged": true },
                "sampling": {}
            },
            "clientInfo": {
                "name": "adjudex",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let resp = self.call("initialize", Some(params)).await?;
        debug!("Tool server initialized: {:?}", resp);

        // The protocol requires an 'initialized' notification after the handshake
        let notif_str = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        })
        .to_string();
        self.outbox.send(notif_str).await?;

        Ok(())
    }
}

#[async_trait]
impl ToolClient for McpToolClient {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let result = self.call("tools/list", None).await?;
        if let Some(tools_arr) = result.get("tools").and_then(|t| t.as_array()) {
            let tools: Vec<ToolDescriptor> = tools_arr
                .iter()
                .filter_map(|t| serde_json::from_value(t.clone()).ok())
                .collect();
            Ok(tools)
        } else {
            Ok(vec![])
        }
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments
        });
        self.call("tools/call", Some(params)).await
    }
}
