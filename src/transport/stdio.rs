//! Stdio transport: newline-terminated UTF-8 JSON frames.
//!
//! stdin carries peer frames, stdout carries replies, stderr stays free for
//! logging. A blocked read races against the shutdown token so `stop()` is
//! observed without relying on stdin closure.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

use crate::error::{TransportError, TransportResult};
use crate::transport::{Inbound, Origin, OutboundFrame, Transport};

/// Stdio-based transport.
pub struct StdioTransport {
    reader: Mutex<BufReader<Stdin>>,
    writer: Mutex<Stdout>,
    shutdown: CancellationToken,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            reader: Mutex::new(BufReader::new(tokio::io::stdin())),
            writer: Mutex::new(tokio::io::stdout()),
            shutdown: CancellationToken::new(),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    async fn connect(&self) -> TransportResult<()> {
        info!("Stdio transport ready");
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
        let mut reader = self.reader.lock().await;

        loop {
            if self.shutdown.is_cancelled() {
                return Err(TransportError::Terminated);
            }

            let mut line = String::new();
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Err(TransportError::Terminated);
                }
                read = reader.read_line(&mut line) => {
                    match read {
                        Ok(0) => return Err(TransportError::Terminated), // EOF
                        Ok(_) => {
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            trace!("Received line: {line}");
                            return Ok(Inbound {
                                body: line.to_string(),
                                origin: Origin::Stream,
                            });
                        }
                        Err(e) => return Err(TransportError::Io(e)),
                    }
                }
            }
        }
    }

    async fn write(&self, frame: OutboundFrame) -> TransportResult<()> {
        // Frames are newline-delimited; an embedded newline would split one.
        debug_assert!(!frame.body.contains('\n'));

        let mut writer = self.writer.lock().await;
        trace!("Sending line: {}", frame.body);
        writer.write_all(frame.body.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }
}
