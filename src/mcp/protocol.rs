//! JSON-RPC 2.0 wire types and newline-delimited framing over an async
//! byte stream (§4.4, §6 "MCP RPC interface").
//!
//! Grounded on the teacher's `codex-dashflow-mcp::client` process-spawn
//! conventions (`kill_on_drop(true)`, `env_clear()` + merged env, piped
//! stdio) but hand-rolls the JSON-RPC framing itself rather than depending
//! on the `rmcp` SDK: Nancy's wire methods (`nancy/ingest`,
//! `nancy/health_check`, `nancy/capabilities`, `heartbeat`) are bespoke,
//! not the standard MCP tool-call surface `rmcp` targets (SPEC_FULL.md
//! §4.4a).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(id: Value, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

/// Either shape a server may send unsolicited (a notification) or in reply
/// to a Nancy-initiated call (a response). Distinguished by the presence
/// of `id`.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    Response(RpcResponse),
    Notification(RpcNotification),
}

pub fn parse_incoming(line: &str) -> Result<IncomingMessage, serde_json::Error> {
    let value: Value = serde_json::from_str(line)?;
    if value.get("id").is_some() && (value.get("result").is_some() || value.get("error").is_some()) {
        Ok(IncomingMessage::Response(serde_json::from_value(value)?))
    } else {
        Ok(IncomingMessage::Notification(serde_json::from_value(value)?))
    }
}

/// Write one newline-delimited JSON-RPC message to `writer` and flush.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> std::io::Result<()>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_string(message).expect("rpc messages always serialize");
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// Read one newline-delimited line from `reader`, or `None` on EOF.
pub async fn read_line<R>(reader: &mut BufReader<R>) -> std::io::Result<Option<String>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Some(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_a_response_with_id_and_result() {
        let line = r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#;
        match parse_incoming(line).unwrap() {
            IncomingMessage::Response(r) => assert_eq!(r.result, Some(json!({"ok": true}))),
            IncomingMessage::Notification(_) => panic!("expected response"),
        }
    }

    #[test]
    fn parses_a_notification_without_id() {
        let line = r#"{"jsonrpc":"2.0","method":"heartbeat","params":{"stats":{}}}"#;
        match parse_incoming(line).unwrap() {
            IncomingMessage::Notification(n) => assert_eq!(n.method, "heartbeat"),
            IncomingMessage::Response(_) => panic!("expected notification"),
        }
    }

    #[tokio::test]
    async fn write_then_read_round_trips_a_request() {
        let req = RpcRequest::new(json!(1), "nancy/ingest", Some(json!({"file_path": "a.md"})));
        let mut buf: Vec<u8> = Vec::new();
        write_message(&mut buf, &req).await.unwrap();

        let mut reader = BufReader::new(buf.as_slice());
        let line = read_line(&mut reader).await.unwrap().unwrap();
        let parsed: RpcRequest = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.method, "nancy/ingest");
    }
}
