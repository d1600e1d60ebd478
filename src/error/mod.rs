//! Error types for the MCP tool server.
//!
//! Uses `thiserror` for ergonomic error definitions with automatic `From` conversions.

use std::borrow::Cow;
use thiserror::Error;

/// Main error type for the MCP tool server.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: Cow<'static, str> },
}

/// JSON-RPC 2.0 and MCP protocol errors.
///
/// Every variant maps to a standard JSON-RPC error code via [`ProtocolError::code`].
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Parse error: invalid JSON")]
    ParseError,

    #[error("Invalid request: {0}")]
    InvalidRequest(Cow<'static, str>),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(Cow<'static, str>),

    #[error("Internal error: {0}")]
    InternalError(Cow<'static, str>),
}

impl ProtocolError {
    /// Returns the JSON-RPC 2.0 error code.
    pub fn code(&self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest(_) => -32600,
            Self::MethodNotFound(_) => -32601,
            Self::InvalidParams(_) => -32602,
            Self::InternalError(_) => -32603,
        }
    }

    /// Canonical single-sentence wire message for this error's code.
    ///
    /// Error responses carry the canonical text; variant payloads are for
    /// logging only and never reach the wire.
    pub fn canonical_message(&self) -> &'static str {
        match self {
            Self::ParseError => "parse error",
            Self::InvalidRequest(_) => "invalid request",
            Self::MethodNotFound(_) => "method not found",
            Self::InvalidParams(_) => "invalid params",
            Self::InternalError(_) => "internal error",
        }
    }
}

/// Transport-level errors.
///
/// These carry the internal termination codes: they break the read loop but
/// are never serialised onto the wire.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Peer closed the stream or a stop was requested.
    #[error("Transport terminated")]
    Terminated,

    #[error("Transport not connected")]
    NotConnected,

    #[error("Transport startup failed: {0}")]
    Startup(Cow<'static, str>),

    #[error("Transport IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame write failed: {0}")]
    Write(Cow<'static, str>),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(Cow<'static, str>),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        field: Cow<'static, str>,
        message: Cow<'static, str>,
    },
}

/// Tool execution errors.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Missing required argument: {0}")]
    MissingArgument(Cow<'static, str>),
}

impl ToolError {
    /// Maps a tool failure to the protocol error surfaced to the peer.
    pub fn into_protocol(self) -> ProtocolError {
        match self {
            Self::NotFound(name) => ProtocolError::InvalidParams(name.into()),
            Self::InvalidArguments(msg) => ProtocolError::InvalidParams(msg.into()),
            Self::MissingArgument(name) => ProtocolError::InvalidParams(name),
            Self::ExecutionFailed(msg) => ProtocolError::InternalError(msg.into()),
        }
    }
}

/// Result type alias for McpError.
pub type Result<T> = std::result::Result<T, McpError>;

/// Result type alias for ProtocolError.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Result type alias for TransportError.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_codes() {
        assert_eq!(ProtocolError::ParseError.code(), -32700);
        assert_eq!(ProtocolError::InvalidRequest("test".into()).code(), -32600);
        assert_eq!(ProtocolError::MethodNotFound("test".into()).code(), -32601);
        assert_eq!(ProtocolError::InvalidParams("test".into()).code(), -32602);
        assert_eq!(ProtocolError::InternalError("test".into()).code(), -32603);
    }

    #[test]
    fn test_canonical_messages() {
        assert_eq!(ProtocolError::ParseError.canonical_message(), "parse error");
        assert_eq!(
            ProtocolError::InvalidRequest("detail only for logs".into()).canonical_message(),
            "invalid request"
        );
        assert_eq!(
            ProtocolError::MethodNotFound("x".into()).canonical_message(),
            "method not found"
        );
    }

    #[test]
    fn test_tool_error_mapping() {
        let err = ToolError::NotFound("nope".into()).into_protocol();
        assert_eq!(err.code(), -32602);

        let err = ToolError::ExecutionFailed("boom".into()).into_protocol();
        assert_eq!(err.code(), -32603);
    }

    #[test]
    fn test_error_conversion() {
        let proto = ProtocolError::ParseError;
        let mcp: McpError = proto.into();
        assert!(matches!(mcp, McpError::Protocol(_)));
    }
}
