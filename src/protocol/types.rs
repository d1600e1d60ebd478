//! JSON-RPC 2.0 and MCP protocol types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ProtocolError;

/// JSON-RPC version constant.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol version advertised in every initialize result.
pub const MCP_VERSION: &str = "2024-11-05";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_PING: &str = "ping";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";
pub const METHOD_NOTIFICATION_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_NOTIFICATION_CANCELLED: &str = "notifications/cancelled";
pub const METHOD_NOTIFICATION_PROGRESS: &str = "notifications/progress";

/// JSON-RPC request ID - a signed integer or a non-empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl RequestId {
    /// A string id must be non-empty to be valid.
    pub fn is_valid(&self) -> bool {
        match self {
            Self::String(s) => !s.is_empty(),
            Self::Number(_) => true,
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

/// Progress token carried in a request's `_meta.progressToken`; same shape
/// as a request id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressToken {
    String(String),
    Number(i64),
}

/// Runtime identity assigned to locally-originated messages: a monotonically
/// increasing id plus a millisecond creation timestamp. Trace metadata only,
/// never serialised to the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    pub runtime_id: u64,
    pub timestamp_ms: u64,
}

static STAMP_BASE: AtomicU64 = AtomicU64::new(1);

impl Stamp {
    pub fn next() -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            runtime_id: STAMP_BASE.fetch_add(1, Ordering::Relaxed),
            timestamp_ms,
        }
    }
}

/// JSON-RPC 2.0 Error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Builds the wire error for a protocol failure. The canonical message
    /// for the code is used; variant detail stays in the logs.
    pub fn from_protocol(error: &ProtocolError) -> Self {
        Self::new(error.code(), error.canonical_message())
    }
}

/// Implementation descriptor for either side of the connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

/// Server capabilities. Only the tools capability is meaningful here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Client capabilities are accepted but not interpreted by this server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Value>,
}

/// Initialize request params.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ClientCapabilities,
    pub client_info: Implementation,
}

/// Initialize response result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: Implementation,
}

/// Tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Tool list request params.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Tool list response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Tool call request params.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Tool call result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<ToolContent>,
    pub is_error: bool,
}

impl CallToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    pub fn json<T: Serialize>(data: &T) -> Self {
        let text = serde_json::to_string_pretty(data).unwrap_or_else(|e| e.to_string());
        Self::text(text)
    }
}

/// Tool content types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image { data: String, mime_type: String },
}

/// Progress notification params.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressParams {
    pub progress_token: ProgressToken,
    pub progress: i64,
    pub total: i64,
}

/// Cancelled notification params.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledParams {
    pub request_id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A request from the peer, classified and typed at parse time.
#[derive(Debug, Clone)]
pub enum ClientRequest {
    Initialize(InitializeParams),
    Ping,
    ListTools(ListToolsParams),
    CallTool(CallToolParams),
}

impl ClientRequest {
    pub fn method(&self) -> &'static str {
        match self {
            Self::Initialize(_) => METHOD_INITIALIZE,
            Self::Ping => METHOD_PING,
            Self::ListTools(_) => METHOD_TOOLS_LIST,
            Self::CallTool(_) => METHOD_TOOLS_CALL,
        }
    }
}

/// A fully-decoded inbound request: id, optional progress token, payload.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub id: RequestId,
    pub progress_token: Option<ProgressToken>,
    pub request: ClientRequest,
}

/// A notification from the peer.
#[derive(Debug, Clone)]
pub enum ClientNotification {
    Initialized,
    Cancelled(CancelledParams),
}

/// Message category, decided by `id`/`method` presence on the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCategory {
    Request,
    Response,
    Notification,
}

/// Any inbound frame after classification and typed decoding.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Request(IncomingRequest),
    Notification(ClientNotification),
    /// Responses are never expected in this profile; the raw value is kept
    /// for logging.
    Response(Value),
}

/// An outbound message, built by the dispatcher or the task engine.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    Response { id: RequestId, result: Value },
    Error { id: RequestId, error: JsonRpcError },
    Notification { method: &'static str, params: Value },
}

impl ServerMessage {
    pub fn response<T: Serialize>(id: RequestId, result: &T) -> crate::error::Result<Self> {
        Ok(Self::Response {
            id,
            result: serde_json::to_value(result)?,
        })
    }

    pub fn error(id: RequestId, error: &ProtocolError) -> Self {
        Self::Error {
            id,
            error: JsonRpcError::from_protocol(error),
        }
    }

    pub fn progress(params: &ProgressParams) -> crate::error::Result<Self> {
        Ok(Self::Notification {
            method: METHOD_NOTIFICATION_PROGRESS,
            params: serde_json::to_value(params)?,
        })
    }

    /// True for final replies (responses and errors), false for notifications.
    pub fn is_reply(&self) -> bool {
        !matches!(self, Self::Notification { .. })
    }
}
