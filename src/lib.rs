//! Server-side runtime for the Model Context Protocol (MCP).
//!
//! A host application registers named tools, and the runtime accepts a
//! stream of JSON-RPC 2.0 frames from a peer, validates them against the
//! session state machine, dispatches tool invocations to the registered
//! handlers, and streams progress and final results back. Two transports
//! are provided: line-framed stdio and a single-endpoint HTTP bridge.
//!
//! # Example
//!
//! ```no_run
//! use mcp_tool_server::{
//!     error::ToolError,
//!     protocol::{CallToolResult, Tool},
//!     server::{McpServerBuilder, ToolContext, ToolHandler},
//!     transport::StdioTransport,
//! };
//! use async_trait::async_trait;
//! use serde_json::{Value, json};
//! use std::sync::Arc;
//!
//! struct EchoTool;
//!
//! #[async_trait]
//! impl ToolHandler for EchoTool {
//!     fn definition(&self) -> Tool {
//!         Tool {
//!             name: "echo".into(),
//!             description: "Echoes back the provided message".into(),
//!             input_schema: json!({
//!                 "type": "object",
//!                 "properties": {"message": {"type": "string"}},
//!                 "required": ["message"],
//!             }),
//!         }
//!     }
//!
//!     async fn call(&self, _ctx: ToolContext, args: Value) -> Result<CallToolResult, ToolError> {
//!         let message = args["message"]
//!             .as_str()
//!             .ok_or_else(|| ToolError::MissingArgument("message".into()))?;
//!         Ok(CallToolResult::text(message))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = McpServerBuilder::new()
//!         .server_info("echo_server", "1.0.0.1")
//!         .with_tools()
//!         .tool(EchoTool)
//!         .transport(Arc::new(StdioTransport::new()))
//!         .build()?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod testutils;
pub mod transport;

pub use config::{ServerConfig, TransportConfig};
pub use error::{McpError, Result};
pub use protocol::{CallToolResult, Implementation, RequestId, Tool};
pub use server::{McpServer, McpServerBuilder, SessionState, ToolContext, ToolHandler};
pub use transport::{HttpTransport, StdioTransport, Transport};
