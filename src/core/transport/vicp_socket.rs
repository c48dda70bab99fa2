//! Raw-socket VICP transport
//!
//! Speaks the VICP framing protocol directly over TCP, bypassing any
//! instrument-session library. This is the only path that carries LeCroy
//! screen images: the structured LAN sub-protocols cannot move them.

use super::{ScopeTransport, TransportError, TransportKind, TransportStats};
use crate::core::vicp::{drain_stream, VicpCodec};
use async_trait::async_trait;
use bytes::Bytes;
use futures::SinkExt;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info};

/// VICP transport over a raw TCP socket
pub struct VicpSocketTransport {
    host: String,
    port: u16,
    framed: Option<Framed<TcpStream, VicpCodec>>,
    read_timeout: Duration,
    stats: TransportStats,
}

impl VicpSocketTransport {
    /// Connect to `host:port` within `timeout`. The same bound is reused as
    /// the per-read timeout while draining responses.
    pub async fn connect(
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let addr = format!("{host}:{port}");

        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| TransportError::ConnectTimeout(timeout))?
            .map_err(|e| TransportError::ConnectFailed(format!("{addr}: {e}")))?;

        // Low latency matters for the command/settle/dump sequence
        stream.set_nodelay(true).map_err(TransportError::Io)?;

        info!(endpoint = %addr, "VICP socket connected");

        Ok(Self {
            host: host.to_string(),
            port,
            framed: Some(Framed::new(stream, VicpCodec::new())),
            read_timeout: timeout,
            stats: TransportStats::default(),
        })
    }

    fn framed(&mut self) -> Result<&mut Framed<TcpStream, VicpCodec>, TransportError> {
        self.framed.as_mut().ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl ScopeTransport for VicpSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn identify(&mut self) -> Result<String, TransportError> {
        self.send_command("*IDN?").await?;

        let timeout = self.read_timeout;
        let framed = self.framed()?;
        let outcome = drain_stream(framed, timeout).await;
        if outcome.frames == 0 {
            return Err(TransportError::QueryFailed(
                "no response to *IDN?".to_string(),
            ));
        }

        self.stats.bytes_received += outcome.data.len() as u64;
        self.stats.reads += u64::from(outcome.frames);

        Ok(String::from_utf8_lossy(&outcome.data).trim().to_string())
    }

    async fn send_command(&mut self, command: &str) -> Result<(), TransportError> {
        let framed = self.framed()?;
        framed
            .send(command)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        self.stats.bytes_sent += command.len() as u64;
        debug!(command, "sent VICP command");
        Ok(())
    }

    async fn receive_raw(&mut self) -> Result<Bytes, TransportError> {
        let timeout = self.read_timeout;
        let framed = self.framed()?;
        let outcome = drain_stream(framed, timeout).await;

        // A stall or close after at least one frame is a normal stream
        // boundary; before the first frame it is a genuine timeout.
        if outcome.frames == 0 {
            return Err(TransportError::StreamTimeout);
        }

        self.stats.bytes_received += outcome.data.len() as u64;
        self.stats.reads += u64::from(outcome.frames);

        debug!(
            frames = outcome.frames,
            bytes = outcome.data.len(),
            eoi = outcome.saw_eoi,
            "VICP receive complete"
        );
        Ok(Bytes::from(outcome.data))
    }

    async fn close(&mut self) {
        if let Some(mut framed) = self.framed.take() {
            framed.get_mut().shutdown().await.ok();
            debug!(endpoint = %self.endpoint(), "VICP socket closed");
        }
    }

    fn stats(&self) -> TransportStats {
        self.stats
    }
}
