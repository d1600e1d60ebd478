//! HTTP transport: a single-endpoint POST bridge.
//!
//! Each POST body is one MCP frame; the HTTP response body is the one reply
//! frame the pipeline produces for that request. Every exchange gets a
//! monotonically-assigned connection id and a oneshot reply channel; the id
//! travels with the frame through the dispatcher so the reply is routed back
//! to the exact connection that carried the request, independent of
//! completion order. The async engine may delay replies; the connection
//! holds until the reply arrives or the server stops.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{TransportError, TransportResult};
use crate::transport::{ConnectionId, FrameKind, Inbound, Origin, OutboundFrame, Transport};

const STOPPED_BODY: &str = r#"{"error":"Server stopped"}"#;

/// One in-flight HTTP exchange, parked until its reply is produced.
struct Exchange {
    id: ConnectionId,
    body: String,
    /// False for notification frames, which are acknowledged up front and
    /// never produce a reply.
    expects_reply: bool,
    reply_tx: oneshot::Sender<String>,
}

#[derive(Clone)]
struct AppState {
    pending_tx: mpsc::UnboundedSender<Exchange>,
    shutdown: CancellationToken,
    next_id: Arc<AtomicU64>,
}

/// HTTP server transport bound to a single local endpoint.
pub struct HttpTransport {
    bind_addr: String,
    shutdown: CancellationToken,
    pending_tx: mpsc::UnboundedSender<Exchange>,
    pending_rx: Mutex<mpsc::UnboundedReceiver<Exchange>>,
    waiting: DashMap<ConnectionId, oneshot::Sender<String>>,
    next_id: Arc<AtomicU64>,
    server_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
    local_addr: parking_lot::Mutex<Option<std::net::SocketAddr>>,
}

impl HttpTransport {
    pub fn new(host: impl AsRef<str>, port: u16) -> Self {
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        Self {
            bind_addr: format!("{}:{}", host.as_ref(), port),
            shutdown: CancellationToken::new(),
            pending_tx,
            pending_rx: Mutex::new(pending_rx),
            waiting: DashMap::new(),
            next_id: Arc::new(AtomicU64::new(1)),
            server_handle: parking_lot::Mutex::new(None),
            local_addr: parking_lot::Mutex::new(None),
        }
    }

    /// The actual bound address, available after `connect` (useful when the
    /// transport was created with port 0).
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        *self.local_addr.lock()
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> TransportResult<()> {
        let listener = tokio::net::TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|e| {
                TransportError::Startup(format!("failed to bind {}: {e}", self.bind_addr).into())
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::Startup(e.to_string().into()))?;
        *self.local_addr.lock() = Some(local_addr);

        let state = AppState {
            pending_tx: self.pending_tx.clone(),
            shutdown: self.shutdown.clone(),
            next_id: Arc::clone(&self.next_id),
        };
        let router = Router::new().route("/", post(handle_post)).with_state(state);

        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                warn!("HTTP server error: {e}");
            }
        });
        *self.server_handle.lock() = Some(handle);

        info!("HTTP server listening on {local_addr}");
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.shutdown.cancel();
        let handle = self.server_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        Ok(())
    }

    fn stop(&self) {
        self.shutdown.cancel();
    }

    async fn read(&self) -> TransportResult<Inbound> {
        let mut pending_rx = self.pending_rx.lock().await;
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(TransportError::Terminated),
            next = pending_rx.recv() => {
                let Some(exchange) = next else {
                    return Err(TransportError::Terminated);
                };
                debug!("HTTP exchange {} ready", exchange.id);
                if exchange.expects_reply {
                    self.waiting.insert(exchange.id, exchange.reply_tx);
                }
                Ok(Inbound {
                    body: exchange.body,
                    origin: Origin::Connection(exchange.id),
                })
            }
        }
    }

    async fn write(&self, frame: OutboundFrame) -> TransportResult<()> {
        let Origin::Connection(id) = frame.origin else {
            return Err(TransportError::Write(
                "http transport requires a connection origin".into(),
            ));
        };

        match frame.kind {
            FrameKind::Reply => {
                let Some((_, reply_tx)) = self.waiting.remove(&id) else {
                    // The exchange was already released, e.g. by shutdown.
                    warn!("No pending HTTP exchange for connection {id}");
                    return Ok(());
                };
                if reply_tx.send(frame.body).is_err() {
                    debug!("HTTP peer for connection {id} is gone");
                }
                Ok(())
            }
            FrameKind::Notification => {
                // A single request/response exchange has no lane for
                // mid-call notifications.
                debug!("Dropping notification for HTTP connection {id}");
                Ok(())
            }
        }
    }
}

async fn handle_post(State(state): State<AppState>, body: String) -> Response {
    let id = state.next_id.fetch_add(1, Ordering::Relaxed);
    debug!("POST request received, connection {id}");

    // Only request frames produce a reply; everything else is handed to the
    // pipeline and acknowledged immediately so the connection never parks
    // waiting for a frame that will not come.
    let expects_reply = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|value| crate::protocol::classify(&value))
        .is_some_and(|category| category == crate::protocol::MessageCategory::Request);

    let (reply_tx, reply_rx) = oneshot::channel();
    let exchange = Exchange {
        id,
        body,
        expects_reply,
        reply_tx,
    };
    if state.pending_tx.send(exchange).is_err() {
        return stopped_response();
    }

    if !expects_reply {
        return StatusCode::ACCEPTED.into_response();
    }

    tokio::select! {
        _ = state.shutdown.cancelled() => stopped_response(),
        reply = reply_rx => match reply {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response(),
            Err(_) => stopped_response(),
        },
    }
}

fn stopped_response() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(header::CONTENT_TYPE, "application/json")],
        STOPPED_BODY,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Stamp;

    fn frame(body: &str, kind: FrameKind, origin: Origin) -> OutboundFrame {
        OutboundFrame {
            body: body.to_string(),
            kind,
            origin,
            stamp: Stamp::next(),
        }
    }

    #[tokio::test]
    async fn test_read_pairs_reply_with_connection() {
        let transport = HttpTransport::new("127.0.0.1", 0);
        let (reply_tx, reply_rx) = oneshot::channel();
        transport
            .pending_tx
            .send(Exchange {
                id: 42,
                body: r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.into(),
                expects_reply: true,
                reply_tx,
            })
            .unwrap();

        let inbound = transport.read().await.unwrap();
        assert_eq!(inbound.origin, Origin::Connection(42));
        assert!(inbound.body.contains("ping"));

        transport
            .write(frame(
                r#"{"jsonrpc":"2.0","id":1,"result":{}}"#,
                FrameKind::Reply,
                Origin::Connection(42),
            ))
            .await
            .unwrap();

        let reply = reply_rx.await.unwrap();
        assert!(reply.contains("result"));
    }

    #[tokio::test]
    async fn test_notification_frames_are_dropped() {
        let transport = HttpTransport::new("127.0.0.1", 0);
        let (reply_tx, mut reply_rx) = oneshot::channel();
        transport
            .pending_tx
            .send(Exchange {
                id: 7,
                body: "{}".into(),
                expects_reply: true,
                reply_tx,
            })
            .unwrap();
        transport.read().await.unwrap();

        transport
            .write(frame(
                r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{}}"#,
                FrameKind::Notification,
                Origin::Connection(7),
            ))
            .await
            .unwrap();

        // The exchange is still waiting for its final reply.
        assert!(reply_rx.try_recv().is_err());
        assert!(transport.waiting.contains_key(&7));
    }

    #[tokio::test]
    async fn test_stop_interrupts_read() {
        let transport = HttpTransport::new("127.0.0.1", 0);
        transport.stop();
        let result = tokio::time::timeout(std::time::Duration::from_millis(100), transport.read())
            .await
            .expect("read did not observe stop in time");
        assert!(matches!(result, Err(TransportError::Terminated)));
    }

    #[tokio::test]
    async fn test_reply_for_released_exchange_is_not_an_error() {
        let transport = HttpTransport::new("127.0.0.1", 0);
        let result = transport
            .write(frame("{}", FrameKind::Reply, Origin::Connection(99)))
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_stopped_body_shape() {
        let value: serde_json::Value = serde_json::from_str(STOPPED_BODY).unwrap();
        assert_eq!(value["error"], "Server stopped");
    }
}
