//! Request dispatcher: decode, check state legality, route.
//!
//! Synchronous requests (initialize, ping, tools/list) are answered inline
//! before the next frame is read; tools/call is handed to the task engine.
//! The dispatcher is the only place outbound error frames are synthesised.

use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use std::sync::Arc;

use crate::error::{ProtocolError, ToolError};
use crate::protocol::{
    ClientMessage, ClientNotification, ClientRequest, Decoded, IncomingRequest, MessageCategory,
    RequestId, ServerMessage, decode_frame,
};
use crate::server::engine::{TaskEngine, ToolTask};
use crate::server::session::{Session, SessionState};
use crate::transport::{Inbound, Origin, Outbox};

pub struct Dispatcher {
    session: Arc<Session>,
    engine: TaskEngine,
    outbox: Outbox,
}

impl Dispatcher {
    pub fn new(session: Arc<Session>, engine: TaskEngine, outbox: Outbox) -> Self {
        Self {
            session,
            engine,
            outbox,
        }
    }

    /// Processes one inbound frame end to end.
    pub async fn dispatch(&self, inbound: Inbound) {
        let origin = inbound.origin;
        match decode_frame(&inbound.body) {
            Ok(Decoded::Message(ClientMessage::Request(request))) => {
                self.session.record_inbound(MessageCategory::Request);
                self.handle_request(request, origin).await;
            }
            Ok(Decoded::Message(ClientMessage::Notification(notification))) => {
                self.session.record_inbound(MessageCategory::Notification);
                self.handle_notification(notification);
            }
            Ok(Decoded::Message(ClientMessage::Response(value))) => {
                // This server never issues requests, so no response is ever
                // expected.
                self.session.record_inbound(MessageCategory::Response);
                warn!("Dropping unexpected response frame: {value}");
            }
            Ok(Decoded::Dropped(reason)) => {
                debug!("Dropping frame: {reason}");
            }
            Err(decode_error) => {
                warn!("Failed to decode frame: {}", decode_error.error);
                match decode_error.id {
                    Some(id) => self.send_error(id, &decode_error.error, origin).await,
                    None => debug!("No recoverable id; frame dropped"),
                }
            }
        }
    }

    async fn handle_request(&self, request: IncomingRequest, origin: Origin) {
        let state = self.session.state();
        info!("Processing request: {}", request.request.method());

        match request.request {
            ClientRequest::Initialize(params) => {
                if state != SessionState::Original {
                    error!("Initialize request in state {state:?}");
                    self.send_error(
                        request.id,
                        &ProtocolError::InvalidRequest("initialize after handshake".into()),
                        origin,
                    )
                    .await;
                    return;
                }
                let result = self.session.initialize(params);
                self.send_response(request.id, &result, origin).await;
                if let Err(e) = self.session.advance(SessionState::Initializing) {
                    error!("State switch failed: {e}");
                }
            }
            ClientRequest::Ping => {
                // Legal in every state.
                self.send_response(request.id, &json!({}), origin).await;
            }
            ClientRequest::ListTools(params) => {
                if state != SessionState::Initialized {
                    error!("ListTools request in state {state:?}");
                    self.send_error(
                        request.id,
                        &ProtocolError::InvalidRequest("session not initialized".into()),
                        origin,
                    )
                    .await;
                    return;
                }
                match self.session.list_tools(&params) {
                    Ok(result) => self.send_response(request.id, &result, origin).await,
                    Err(e) => self.send_error(request.id, &e, origin).await,
                }
            }
            ClientRequest::CallTool(params) => {
                if state != SessionState::Initialized {
                    error!("CallTool request in state {state:?}");
                    self.send_error(
                        request.id,
                        &ProtocolError::InvalidRequest("session not initialized".into()),
                        origin,
                    )
                    .await;
                    return;
                }

                info!("Calling tool: {}", params.name);
                let Some(handler) = self.session.registry().get(&params.name) else {
                    self.send_error(
                        request.id,
                        &ToolError::NotFound(params.name).into_protocol(),
                        origin,
                    )
                    .await;
                    return;
                };

                let task = ToolTask::new(
                    request.id.clone(),
                    request.progress_token,
                    origin,
                    handler,
                    params.arguments,
                );
                // The read loop does not wait for completion; the engine
                // replies when the handler finishes.
                if let Err(e) = self.engine.submit(task) {
                    error!("Failed to submit tool task: {e}");
                    self.send_error(request.id, &e, origin).await;
                }
            }
        }
    }

    fn handle_notification(&self, notification: ClientNotification) {
        match notification {
            ClientNotification::Initialized => match self.session.state() {
                SessionState::Initializing => {
                    match self.session.advance(SessionState::Initialized) {
                        Ok(()) => {
                            info!("Session initialized");
                            self.engine.start();
                        }
                        Err(e) => error!("State switch failed: {e}"),
                    }
                }
                SessionState::Original => {
                    // Protocol violation: logged, no reply, no state change.
                    warn!("Initialized notification before initialize");
                }
                state => debug!("Ignoring initialized notification in state {state:?}"),
            },
            ClientNotification::Cancelled(params) => {
                if self.session.state() == SessionState::Initialized {
                    debug!("Cancellation requested for {}", params.request_id);
                    self.engine.cancel(params.request_id);
                } else {
                    debug!("Ignoring cancelled notification before initialization");
                }
            }
        }
    }

    async fn send_response<T: Serialize>(&self, id: RequestId, result: &T, origin: Origin) {
        let message = match ServerMessage::response(id.clone(), result) {
            Ok(message) => message,
            Err(e) => {
                error!("Failed to serialise response: {e}");
                ServerMessage::error(id, &ProtocolError::InternalError(e.to_string().into()))
            }
        };
        if let Err(e) = self.outbox.send(message, origin).await {
            error!("Failed to send response: {e}");
        }
    }

    async fn send_error(&self, id: RequestId, protocol_error: &ProtocolError, origin: Origin) {
        info!(
            "Sending error response: code={}, message={}",
            protocol_error.code(),
            protocol_error.canonical_message()
        );
        let message = ServerMessage::error(id, protocol_error);
        if let Err(e) = self.outbox.send(message, origin).await {
            error!("Failed to send error response: {e}");
        }
    }
}
