//! Transport abstraction: the bytes-to-frames boundary.
//!
//! Two concrete variants are provided: line-framed stdio and a
//! single-endpoint HTTP request/response bridge. Both are thread-safe;
//! `stop()` causes any blocked `read` to return
//! [`TransportError::Terminated`](crate::error::TransportError::Terminated)
//! promptly.

pub mod http;
pub mod stdio;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

use crate::error::{Result, TransportResult};
use crate::protocol::{ServerMessage, Stamp, encode};

pub use http::HttpTransport;
pub use stdio::StdioTransport;

/// Identifies one in-flight HTTP exchange.
pub type ConnectionId = u64;

/// Where an inbound frame came from, and therefore where its reply must go.
///
/// Stdio frames share the single output stream; each HTTP frame is bound to
/// the connection that carried it, and the reply is routed back by id rather
/// than by arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Stream,
    Connection(ConnectionId),
}

/// One complete inbound frame.
#[derive(Debug)]
pub struct Inbound {
    pub body: String,
    pub origin: Origin,
}

/// Whether an outbound frame is the final reply for a request or a
/// mid-request notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Reply,
    Notification,
}

/// One complete outbound frame, addressed to the origin of the request it
/// belongs to.
#[derive(Debug)]
pub struct OutboundFrame {
    pub body: String,
    pub kind: FrameKind,
    pub origin: Origin,
    pub stamp: Stamp,
}

/// Transport trait for MCP communication.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> TransportResult<()>;
    async fn disconnect(&self) -> TransportResult<()>;

    /// Requests termination: blocked reads return promptly and pending HTTP
    /// exchanges are released. Callable from any task.
    fn stop(&self);

    /// Reads one complete frame.
    async fn read(&self) -> TransportResult<Inbound>;

    /// Writes one complete frame atomically.
    async fn write(&self, frame: OutboundFrame) -> TransportResult<()>;
}

/// Serialising writer shared by the dispatcher and the task engine.
///
/// Every outbound message funnels through here: it is encoded, stamped with
/// its runtime identity, and handed to the transport's single write path.
#[derive(Clone)]
pub struct Outbox {
    transport: Arc<dyn Transport>,
}

impl Outbox {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn send(&self, message: ServerMessage, origin: Origin) -> Result<()> {
        let stamp = Stamp::next();
        let body = encode(&message)?;
        let kind = if message.is_reply() {
            FrameKind::Reply
        } else {
            FrameKind::Notification
        };
        trace!(
            runtime_id = stamp.runtime_id,
            timestamp_ms = stamp.timestamp_ms,
            "sending frame: {body}"
        );
        self.transport
            .write(OutboundFrame {
                body,
                kind,
                origin,
                stamp,
            })
            .await?;
        Ok(())
    }
}
