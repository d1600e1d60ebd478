//! Server configuration.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{ConfigError, Result};
use crate::transport::{HttpTransport, StdioTransport, Transport};

/// Which transport variant to serve on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    Stdio,
    Http { host: String, port: u16 },
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Stdio
    }
}

/// Host-application configuration: identity, transport selection, logging.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub version: String,
    pub paginate_tools: bool,
    pub transport: TransportConfig,
    pub log_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").into(),
            version: env!("CARGO_PKG_VERSION").into(),
            paginate_tools: false,
            transport: TransportConfig::default(),
            log_file: None,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ConfigError::MissingField("name".into()).into());
        }
        if let TransportConfig::Http { host, port } = &self.transport {
            if host.is_empty() {
                return Err(ConfigError::MissingField("host".into()).into());
            }
            if *port == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "port".into(),
                    message: "must be in 1..=65535".into(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Builds the configured transport.
    pub fn build_transport(&self) -> Arc<dyn Transport> {
        match &self.transport {
            TransportConfig::Stdio => Arc::new(StdioTransport::new()),
            TransportConfig::Http { host, port } => Arc::new(HttpTransport::new(host, *port)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.transport, TransportConfig::Stdio);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_port_zero_is_rejected() {
        let config = ServerConfig {
            transport: TransportConfig::Http {
                host: "0.0.0.0".into(),
                port: 0,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_http_host_required() {
        let config = ServerConfig {
            transport: TransportConfig::Http {
                host: String::new(),
                port: 8080,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
