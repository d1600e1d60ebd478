//! In-process transport for driving a server in tests.
//!
//! [`ChannelTransport::pair`] returns the transport plus a handle: feed
//! frames through `inbound_tx` as if a peer had written them, and read what
//! the server emitted from `outbound_rx`.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::{TransportError, TransportResult};
use crate::transport::{Inbound, Origin, OutboundFrame, Transport};

/// In-memory channel-backed transport.
pub struct ChannelTransport {
    inbound_rx: Mutex<mpsc::UnboundedReceiver<String>>,
    outbound_tx: mpsc::UnboundedSender<String>,
    shutdown: CancellationToken,
}

/// Test-side handle for a [`ChannelTransport`].
pub struct ChannelTransportHandle {
    /// Frames the peer "writes" to the server.
    pub inbound_tx: mpsc::UnboundedSender<String>,
    /// Frames the server wrote back.
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
}

impl ChannelTransport {
    pub fn pair() -> (Arc<Self>, ChannelTransportHandle) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            inbound_rx: Mutex::new(inbound_rx),
            outbound_tx,
            shutdown: CancellationToken::new(),
        });
        let handle = ChannelTransportHandle {
            inbound_tx,
            outbound_rx,
        };
        (transport, handle)
    }
}

impl ChannelTransportHandle {
    /// Sends one frame to the server.
    pub fn send(&self, frame: impl Into<String>) {
        self.inbound_tx
            .send(frame.into())
            .expect("transport inbound channel closed");
    }

    /// Sends a JSON value as one frame.
    pub fn send_json(&self, value: serde_json::Value) {
        self.send(value.to_string());
    }

    /// Receives the next server frame, parsed, within two seconds.
    pub async fn recv_json(&mut self) -> serde_json::Value {
        let frame = tokio::time::timeout(Duration::from_secs(2), self.outbound_rx.recv())
            .await
            .expect("timed out waiting for a server frame")
            .expect("transport outbound channel closed");
        serde_json::from_str(&frame).expect("server emitted invalid JSON")
    }

    /// Asserts the server stays silent for the given window.
    pub async fn assert_silent(&mut self, window: Duration) {
        tokio::time::sleep(window).await;
        if let Ok(frame) = self.outbound_rx.try_recv() {
            panic!("expected no server frame, got: {frame}");
        }
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn connect(&self) -> TransportResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.shutdown.cancel();
        Ok(())
    }

    fn stop(&self) {
        self.shutdown.cancel();
    }

    async fn read(&self) -> TransportResult<Inbound> {
        let mut inbound_rx = self.inbound_rx.lock().await;
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(TransportError::Terminated),
            next = inbound_rx.recv() => match next {
                Some(body) => Ok(Inbound {
                    body,
                    origin: Origin::Stream,
                }),
                None => Err(TransportError::Terminated),
            },
        }
    }

    async fn write(&self, frame: OutboundFrame) -> TransportResult<()> {
        self.outbound_tx
            .send(frame.body)
            .map_err(|_| TransportError::Write("test outbound channel closed".into()))
    }
}
