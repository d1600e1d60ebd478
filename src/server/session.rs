//! Session state machine and per-session server data.

use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::{
    Implementation, InitializeParams, InitializeResult, ListToolsParams, ListToolsResult,
    MCP_VERSION, MessageCategory, ServerCapabilities,
};
use crate::server::registry::ToolRegistry;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no handshake yet.
    Original,
    /// Initialize accepted, awaiting the initialized notification.
    Initializing,
    /// Fully operational.
    Initialized,
    /// Stopped or transport gone. Terminal.
    Terminated,
}

/// Per-process session: identity, capabilities, the frozen tool set and the
/// current lifecycle state.
pub struct Session {
    server_info: Implementation,
    capabilities: ServerCapabilities,
    registry: Arc<ToolRegistry>,
    paginate_tools: bool,
    state: RwLock<SessionState>,
    client_info: RwLock<Option<Implementation>>,
    requests_received: AtomicU64,
    notifications_received: AtomicU64,
    responses_received: AtomicU64,
}

impl Session {
    pub fn new(
        server_info: Implementation,
        capabilities: ServerCapabilities,
        registry: Arc<ToolRegistry>,
        paginate_tools: bool,
    ) -> Self {
        Self {
            server_info,
            capabilities,
            registry,
            paginate_tools,
            state: RwLock::new(SessionState::Original),
            client_info: RwLock::new(None),
            requests_received: AtomicU64::new(0),
            notifications_received: AtomicU64::new(0),
            responses_received: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Counts one accepted inbound message of the given category.
    pub fn record_inbound(&self, category: MessageCategory) {
        let counter = match category {
            MessageCategory::Request => &self.requests_received,
            MessageCategory::Notification => &self.notifications_received,
            MessageCategory::Response => &self.responses_received,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inbound_count(&self, category: MessageCategory) -> u64 {
        match category {
            MessageCategory::Request => &self.requests_received,
            MessageCategory::Notification => &self.notifications_received,
            MessageCategory::Response => &self.responses_received,
        }
        .load(Ordering::Relaxed)
    }

    // The tool set is frozen once the server is built; the registry handle
    // stays crate-internal so nothing can grow it mid-session.
    pub(crate) fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn client_info(&self) -> Option<Implementation> {
        self.client_info.read().clone()
    }

    /// Guarded state transition. Initializing is only reachable from
    /// Original and Initialized only from Initializing; Terminated is
    /// reachable from anywhere. An illegal transition is an internal error
    /// for the caller to log; it never tears the session down by itself.
    pub fn advance(&self, to: SessionState) -> ProtocolResult<()> {
        let mut state = self.state.write();
        let legal = match to {
            SessionState::Original => false,
            SessionState::Initializing => *state == SessionState::Original,
            SessionState::Initialized => *state == SessionState::Initializing,
            SessionState::Terminated => true,
        };
        if !legal {
            return Err(ProtocolError::InternalError(
                format!("illegal state transition {:?} -> {:?}", *state, to).into(),
            ));
        }
        debug!("State transition: {:?} -> {:?}", *state, to);
        *state = to;
        Ok(())
    }

    /// Handles an initialize request: records the peer identity and builds
    /// the handshake result. The state advance is the caller's step.
    pub fn initialize(&self, params: InitializeParams) -> InitializeResult {
        info!(
            "Initialize request from {} v{} (protocol {})",
            params.client_info.name, params.client_info.version, params.protocol_version
        );
        *self.client_info.write() = Some(params.client_info);

        InitializeResult {
            protocol_version: MCP_VERSION.into(),
            capabilities: self.capabilities.clone(),
            server_info: self.server_info.clone(),
        }
    }

    /// Lists tools, one per page in registration order when pagination is
    /// enabled. The cursor is the next index as a decimal string; a
    /// non-numeric or out-of-range cursor is invalid params.
    pub fn list_tools(&self, params: &ListToolsParams) -> ProtocolResult<ListToolsResult> {
        let tools = self.registry.definitions();

        if !self.paginate_tools {
            return Ok(ListToolsResult {
                tools,
                next_cursor: None,
            });
        }

        let index = match &params.cursor {
            None => 0,
            Some(cursor) => cursor.parse::<usize>().map_err(|_| {
                ProtocolError::InvalidParams(format!("bad pagination cursor: {cursor}").into())
            })?,
        };
        if index >= tools.len() && !(index == 0 && tools.is_empty()) {
            return Err(ProtocolError::InvalidParams(
                format!("pagination cursor out of range: {index}").into(),
            ));
        }

        let next_cursor = if index + 1 < tools.len() {
            Some((index + 1).to_string())
        } else {
            None
        };
        let page = tools.into_iter().nth(index).into_iter().collect();

        Ok(ListToolsResult {
            tools: page,
            next_cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::protocol::{CallToolResult, Tool, ToolsCapability};
    use crate::server::engine::ToolContext;
    use crate::server::registry::ToolHandler;
    use async_trait::async_trait;
    use serde_json::{Value, json};

    struct NamedTool(&'static str);

    #[async_trait]
    impl ToolHandler for NamedTool {
        fn definition(&self) -> Tool {
            Tool {
                name: self.0.into(),
                description: "test".into(),
                input_schema: json!({"type": "object"}),
            }
        }

        async fn call(
            &self,
            _ctx: ToolContext,
            _arguments: Value,
        ) -> Result<CallToolResult, ToolError> {
            Ok(CallToolResult::text("ok"))
        }
    }

    fn session(paginate: bool, tools: &[&'static str]) -> Session {
        let registry = Arc::new(ToolRegistry::new());
        for name in tools {
            registry.register(NamedTool(*name));
        }
        Session::new(
            Implementation {
                name: "echo_server".into(),
                version: "1.0.0.1".into(),
            },
            ServerCapabilities {
                tools: Some(ToolsCapability::default()),
            },
            registry,
            paginate,
        )
    }

    #[test]
    fn test_legal_transitions() {
        let session = session(false, &[]);
        assert_eq!(session.state(), SessionState::Original);
        session.advance(SessionState::Initializing).unwrap();
        session.advance(SessionState::Initialized).unwrap();
        session.advance(SessionState::Terminated).unwrap();
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[test]
    fn test_illegal_transitions_do_not_change_state() {
        let session = session(false, &[]);
        assert!(session.advance(SessionState::Initialized).is_err());
        assert_eq!(session.state(), SessionState::Original);

        session.advance(SessionState::Initializing).unwrap();
        assert!(session.advance(SessionState::Initializing).is_err());
        assert_eq!(session.state(), SessionState::Initializing);
    }

    #[test]
    fn test_initialize_records_client_info() {
        let session = session(false, &[]);
        let result = session.initialize(InitializeParams {
            protocol_version: "2024-11-05".into(),
            capabilities: Default::default(),
            client_info: Implementation {
                name: "t".into(),
                version: "1".into(),
            },
        });
        assert_eq!(result.protocol_version, MCP_VERSION);
        assert_eq!(result.server_info.name, "echo_server");
        assert_eq!(session.client_info().unwrap().name, "t");
    }

    #[test]
    fn test_list_tools_unpaginated() {
        let session = session(false, &["a", "b"]);
        let result = session.list_tools(&ListToolsParams::default()).unwrap();
        assert_eq!(result.tools.len(), 2);
        assert!(result.next_cursor.is_none());
    }

    #[test]
    fn test_list_tools_paginated_walk() {
        let session = session(true, &["a", "b"]);

        let first = session.list_tools(&ListToolsParams::default()).unwrap();
        assert_eq!(first.tools.len(), 1);
        assert_eq!(first.tools[0].name, "a");
        assert_eq!(first.next_cursor.as_deref(), Some("1"));

        let second = session
            .list_tools(&ListToolsParams {
                cursor: Some("1".into()),
            })
            .unwrap();
        assert_eq!(second.tools[0].name, "b");
        assert!(second.next_cursor.is_none());
    }

    #[test]
    fn test_inbound_counters() {
        let session = session(false, &[]);
        assert_eq!(session.inbound_count(MessageCategory::Request), 0);

        session.record_inbound(MessageCategory::Request);
        session.record_inbound(MessageCategory::Request);
        session.record_inbound(MessageCategory::Notification);

        assert_eq!(session.inbound_count(MessageCategory::Request), 2);
        assert_eq!(session.inbound_count(MessageCategory::Notification), 1);
        assert_eq!(session.inbound_count(MessageCategory::Response), 0);
    }

    #[test]
    fn test_list_tools_bad_cursor() {
        let session = session(true, &["a", "b"]);

        let err = session
            .list_tools(&ListToolsParams {
                cursor: Some("5".into()),
            })
            .unwrap_err();
        assert_eq!(err.code(), -32602);

        let err = session
            .list_tools(&ListToolsParams {
                cursor: Some("nope".into()),
            })
            .unwrap_err();
        assert_eq!(err.code(), -32602);
    }
}
