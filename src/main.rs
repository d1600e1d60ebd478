//! MCP echo server binary entry point.

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use mcp_tool_server::{
    config::{ServerConfig, TransportConfig},
    error::ToolError,
    protocol::{CallToolResult, Tool},
    server::{McpServerBuilder, ToolContext, ToolHandler},
};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

const SERVER_NAME: &str = "echo_server";
const SERVER_VERSION: &str = "1.0.0.1";

/// MCP echo server over stdio or HTTP.
#[derive(Parser, Debug)]
#[command(name = "echo_server", version, about, long_about = None)]
struct Cli {
    /// Serve over stdio (the default)
    #[arg(long, conflicts_with = "http")]
    stdio: bool,

    /// Serve over HTTP on a single POST endpoint
    #[arg(long)]
    http: bool,

    /// Bind address for the HTTP transport
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Bind port for the HTTP transport
    #[arg(long, default_value_t = 8080, value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "echo".into(),
            description: "Echoes back the provided message".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "message": {"type": "string"}
                },
                "required": ["message"]
            }),
        }
    }

    async fn call(&self, ctx: ToolContext, arguments: Value) -> Result<CallToolResult, ToolError> {
        let message = arguments
            .get("message")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::MissingArgument("message".into()))?;

        // A no-op unless the request carried a progress token.
        ctx.progress(1, 1).await;

        Ok(CallToolResult::text(message))
    }
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        let transport = match (self.stdio, self.http) {
            (_, true) => TransportConfig::Http {
                host: self.host,
                port: self.port,
            },
            _ => TransportConfig::Stdio,
        };
        ServerConfig {
            name: SERVER_NAME.into(),
            version: SERVER_VERSION.into(),
            paginate_tools: false,
            transport,
            log_file: self.log_file,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Argument problems exit 1, matching startup errors.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };
    let config = cli.into_config();
    init_tracing(config.log_file.as_deref())?;

    info!("Starting {} v{}", config.name, config.version);
    config.validate()?;

    let server = Arc::new(
        McpServerBuilder::new()
            .server_info(&config.name, &config.version)
            .with_tools()
            .paginate_tools(config.paginate_tools)
            .tool(EchoTool)
            .transport(config.build_transport())
            .build()?,
    );

    {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            server.stop();
        });
    }

    server.run().await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install SIGINT handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mcp_tool_server=info,warn"));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            // Use JSON format for structured logging to stderr (stdout is for MCP protocol)
            fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .json()
                .init();
        }
    }
    Ok(())
}
