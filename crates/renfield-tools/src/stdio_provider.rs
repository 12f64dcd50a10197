//! Child-process-stdio tool provider transport.
//!
//! §1 keeps concrete provider integrations out of scope but keeps in scope
//! "the protocol those tools must satisfy" — this is that protocol's client
//! side: JSON-RPC 2.0, one object per line over the child's stdin/stdout,
//! mirroring the wire shape of the teacher's own `mcp_bridge.rs` (there the
//! gateway is the server; here it's the client dialing an external one).

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use renfield_core::types::ToolDescriptor;

use crate::error::{Result, ToolsError};
use crate::tool::Tool;

struct StdioLink {
    // Held only to keep the child alive and kill it on drop; never read.
    _child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// One request in flight at a time per provider process — tool calls
/// against a single provider aren't expected to run at high concurrency,
/// and serializing avoids demultiplexing interleaved stdout lines by id.
struct StdioClient {
    link: Mutex<StdioLink>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl StdioClient {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let line = format!("{}\n", json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}));

        let call = async {
            let mut link = self.link.lock().await;
            link.stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| ToolsError::Internal(format!("stdio write failed: {e}")))?;
            link.stdin.flush().await.map_err(|e| ToolsError::Internal(format!("stdio flush failed: {e}")))?;

            let mut response_line = String::new();
            let read = link
                .stdout
                .read_line(&mut response_line)
                .await
                .map_err(|e| ToolsError::Internal(format!("stdio read failed: {e}")))?;
            if read == 0 {
                return Err(ToolsError::Internal("provider closed stdout".to_string()));
            }
            let response: Value = serde_json::from_str(response_line.trim())
                .map_err(|e| ToolsError::Internal(format!("invalid JSON-RPC response: {e}")))?;
            if let Some(err) = response.get("error") {
                return Err(ToolsError::Internal(format!("provider error: {err}")));
            }
            Ok(response.get("result").cloned().unwrap_or(Value::Null))
        };

        tokio::time::timeout(self.timeout, call).await.map_err(|_| ToolsError::Timeout)?
    }
}

/// One callable tool backed by a shared `StdioClient`'s `tools/call`.
struct StdioTool {
    descriptor: ToolDescriptor,
    client: Arc<StdioClient>,
}

#[async_trait]
impl Tool for StdioTool {
    fn descriptor(&self) -> ToolDescriptor {
        self.descriptor.clone()
    }

    async fn call(&self, arguments: Value, _cancel: CancellationToken) -> Result<Value> {
        let result = self
            .client
            .request("tools/call", json!({"name": self.descriptor.original_name, "arguments": arguments}))
            .await?;
        if result.get("isError").and_then(|v| v.as_bool()).unwrap_or(false) {
            let message = result.get("content").map(|c| c.to_string()).unwrap_or_else(|| "tool call failed".to_string());
            return Err(ToolsError::Internal(message));
        }
        Ok(result)
    }
}

/// Spawn `command args...`, run the `initialize` + `tools/list` handshake,
/// and return one `Tool` per entry the child advertises. The child is
/// killed when the last returned `Tool` (and thus the shared client) drops.
pub async fn connect(provider_name: &str, command: &str, args: &[String], timeout_secs: u64) -> Result<Vec<Arc<dyn Tool>>> {
    let mut child = tokio::process::Command::new(command)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ToolsError::Internal(format!("failed to spawn {command}: {e}")))?;

    let stdin = child.stdin.take().ok_or_else(|| ToolsError::Internal("no stdin handle".to_string()))?;
    let stdout = child.stdout.take().ok_or_else(|| ToolsError::Internal("no stdout handle".to_string()))?;

    let client = Arc::new(StdioClient {
        link: Mutex::new(StdioLink { _child: child, stdin, stdout: BufReader::new(stdout) }),
        next_id: AtomicU64::new(1),
        timeout: Duration::from_secs(timeout_secs),
    });

    client.request("initialize", json!({})).await?;
    let listed = client.request("tools/list", json!({})).await?;
    let tools = listed.get("tools").and_then(|t| t.as_array()).cloned().unwrap_or_default();

    let mut out: Vec<Arc<dyn Tool>> = Vec::with_capacity(tools.len());
    for entry in tools {
        let Some(name) = entry.get("name").and_then(|n| n.as_str()) else { continue };
        let description = entry.get("description").and_then(|d| d.as_str()).unwrap_or("").to_string();
        let input_schema = entry.get("inputSchema").cloned().unwrap_or_else(|| json!({}));
        let descriptor = ToolDescriptor {
            name: ToolDescriptor::namespaced_name(provider_name, name),
            provider_name: provider_name.to_string(),
            original_name: name.to_string(),
            description,
            input_schema,
            output_shape_hint: None,
            timeout_secs: Some(timeout_secs),
        };
        out.push(Arc::new(StdioTool { descriptor, client: Arc::clone(&client) }));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A tiny shell provider that answers the `initialize`/`tools/list`
    /// handshake and one `echo` tool call, line by line, with no external
    /// binary beyond `sh`.
    const SCRIPT: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"method":"initialize"'*) echo '{"jsonrpc":"2.0","id":1,"result":{}}' ;;
    *'"method":"tools/list"'*) echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo","description":"echoes input","inputSchema":{}}]}}' ;;
    *'"method":"tools/call"'*) echo '{"jsonrpc":"2.0","id":3,"result":{"content":"echoed"}}' ;;
    *) echo '{"jsonrpc":"2.0","id":0,"error":{"message":"unknown method"}}' ;;
  esac
done
"#;

    #[tokio::test]
    async fn connect_lists_and_calls_a_tool() {
        let tools = connect("scripted", "sh", &["-c".to_string(), SCRIPT.to_string()], 5).await.unwrap();
        assert_eq!(tools.len(), 1);
        let descriptor = tools[0].descriptor();
        assert_eq!(descriptor.name, "scripted__echo");
        assert_eq!(descriptor.provider_name, "scripted");
        assert_eq!(descriptor.timeout_secs, Some(5));

        let result = tools[0].call(json!({"text": "hi"}), CancellationToken::new()).await.unwrap();
        assert_eq!(result.get("content").and_then(|c| c.as_str()), Some("echoed"));
    }

    #[tokio::test]
    async fn connect_fails_for_a_missing_binary() {
        let err = connect("scripted", "/nonexistent/binary-does-not-exist", &[], 5).await.unwrap_err();
        assert!(matches!(err, ToolsError::Internal(_)));
    }
}
