//! MCP server implementation: registry, session, dispatcher, task engine
//! and the lifecycle facade.

pub mod dispatcher;
pub mod engine;
pub mod registry;
pub mod runtime;
pub mod session;

pub use dispatcher::Dispatcher;
pub use engine::{TaskEngine, TaskStatus, ToolContext, ToolTask};
pub use registry::{ToolHandler, ToolRegistry};
pub use runtime::{McpServer, McpServerBuilder};
pub use session::{Session, SessionState};
