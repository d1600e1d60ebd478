//! MCP server facade with lifecycle management.
//!
//! Lifecycle: configure (builder) → run (connect + message loop) → stop.

use std::sync::Arc;
use tracing::{debug, error, info};

use crate::error::{ConfigError, McpError, Result, TransportError};
use crate::protocol::{Implementation, ServerCapabilities, ToolsCapability};
use crate::server::dispatcher::Dispatcher;
use crate::server::engine::TaskEngine;
use crate::server::registry::{ToolHandler, ToolRegistry};
use crate::server::session::{Session, SessionState};
use crate::transport::{Outbox, Transport};

/// MCP Server.
pub struct McpServer {
    session: Arc<Session>,
    transport: Arc<dyn Transport>,
    engine: TaskEngine,
    dispatcher: Dispatcher,
    server_info: Implementation,
}

impl McpServer {
    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Runs the message loop until the transport terminates.
    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting MCP server: {} v{}",
            self.server_info.name, self.server_info.version
        );
        self.transport.connect().await?;

        loop {
            match self.transport.read().await {
                Ok(inbound) => self.dispatcher.dispatch(inbound).await,
                Err(TransportError::Terminated) => {
                    debug!("Transport terminated, shutting down");
                    break;
                }
                Err(e) => {
                    error!("Transport error: {e}");
                    break;
                }
            }
        }

        // Graceful teardown: no further replies leave after this point.
        self.engine.stop();
        if let Err(e) = self.session.advance(SessionState::Terminated) {
            error!("State switch failed: {e}");
        }
        self.transport.disconnect().await?;

        info!("Server stopped");
        Ok(())
    }

    /// Requests a graceful stop. Callable from any task; the read loop
    /// observes it through the transport and tears the session down.
    pub fn stop(&self) {
        info!("Stop requested");
        self.transport.stop();
    }
}

/// Builder for [`McpServer`].
pub struct McpServerBuilder {
    name: String,
    version: String,
    capabilities: ServerCapabilities,
    paginate_tools: bool,
    registry: Arc<ToolRegistry>,
    transport: Option<Arc<dyn Transport>>,
}

impl McpServerBuilder {
    pub fn new() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").into(),
            version: env!("CARGO_PKG_VERSION").into(),
            capabilities: ServerCapabilities::default(),
            paginate_tools: false,
            registry: Arc::new(ToolRegistry::new()),
            transport: None,
        }
    }

    pub fn server_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.name = name.into();
        self.version = version.into();
        self
    }

    /// Declares the tools capability.
    pub fn with_tools(mut self) -> Self {
        self.capabilities.tools = Some(ToolsCapability::default());
        self
    }

    pub fn tools_list_changed(mut self, list_changed: bool) -> Self {
        self.capabilities.tools = Some(ToolsCapability {
            list_changed: Some(list_changed),
        });
        self
    }

    /// Serves `tools/list` one tool per page when enabled.
    pub fn paginate_tools(mut self, paginate: bool) -> Self {
        self.paginate_tools = paginate;
        self
    }

    /// Registers a tool. Registration is frozen once the server is built.
    pub fn tool<T: ToolHandler + 'static>(self, tool: T) -> Self {
        self.registry.register(tool);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<McpServer> {
        let transport = self.transport.ok_or_else(|| {
            McpError::Config(ConfigError::MissingField("transport".into()))
        })?;

        let server_info = Implementation {
            name: self.name,
            version: self.version,
        };
        let session = Arc::new(Session::new(
            server_info.clone(),
            self.capabilities,
            self.registry,
            self.paginate_tools,
        ));

        let outbox = Outbox::new(Arc::clone(&transport));
        let engine = TaskEngine::new(outbox.clone());
        let dispatcher = Dispatcher::new(Arc::clone(&session), engine.clone(), outbox);

        Ok(McpServer {
            session,
            transport,
            engine,
            dispatcher,
            server_info,
        })
    }
}

impl Default for McpServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
