//! Transport layer for reaching an instrument
//!
//! Two transports satisfy the same contract:
//! - A structured instrument session (VISA-class library) for `::INSTR`
//!   and `::SOCKET` resource strings
//! - A raw TCP socket speaking VICP frames directly
//!
//! The orchestrator never opens sockets itself; it asks a [`Connector`] to
//! turn a [`Candidate`](crate::core::resolver::Candidate) into an open
//! transport, which makes the retry logic scriptable in tests.

mod session;
mod vicp_socket;

pub use session::{InstrumentSession, SessionBackend, SessionTransport};
#[cfg(feature = "visa")]
pub use session::VisaBackend;
pub use vicp_socket::VicpSocketTransport;

use crate::core::resolver::Candidate;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Transport kind identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Structured instrument session (VISA-class resource)
    Session,
    /// Raw VICP socket
    Socket,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session => write!(f, "session"),
            Self::Socket => write!(f, "socket"),
        }
    }
}

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Candidate unreachable
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// Connection attempt timed out
    #[error("connection timeout after {0:?}")]
    ConnectTimeout(Duration),

    /// No structured-session backend is available for this resource
    #[error("no instrument-session backend available for {0}")]
    NoBackend(String),

    /// Identity query failed
    #[error("identity query failed: {0}")]
    QueryFailed(String),

    /// Command write failed
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Read timed out before a single complete frame arrived
    #[error("receive timed out before any data arrived")]
    StreamTimeout,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation on a closed transport
    #[error("not connected")]
    NotConnected,
}

/// Transport statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Complete frames or reads consumed
    pub reads: u64,
}

/// Uniform contract over the two instrument transports
#[async_trait]
pub trait ScopeTransport: Send {
    /// Which kind of transport this is
    fn kind(&self) -> TransportKind;

    /// Human-readable endpoint, e.g. `10.0.0.5:1861` or a resource string
    fn endpoint(&self) -> String;

    /// Query `*IDN?` and return the raw identity string
    async fn identify(&mut self) -> Result<String, TransportError>;

    /// Send one SCPI command
    async fn send_command(&mut self, command: &str) -> Result<(), TransportError>;

    /// Read the bulk binary response, text termination disabled
    async fn receive_raw(&mut self) -> Result<Bytes, TransportError>;

    /// Tear the connection down. Idempotent; safe after a failed open.
    async fn close(&mut self);

    /// Get transfer statistics
    fn stats(&self) -> TransportStats;
}

/// Opens transports for candidates. The production implementation is
/// [`NetConnector`]; tests substitute scripted connectors.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a transport over `candidate`, or fail with a connect error
    async fn open(
        &self,
        candidate: &Candidate,
        timeout: Duration,
    ) -> Result<Box<dyn ScopeTransport>, TransportError>;
}

/// Production connector: raw-socket candidates get a VICP socket, structured
/// candidates go through the instrument-session backend when one is present.
pub struct NetConnector {
    backend: Option<Arc<dyn SessionBackend>>,
}

impl NetConnector {
    /// Create a connector. `backend` is `None` when no instrument-session
    /// library is available; structured candidates then fail with
    /// [`TransportError::NoBackend`] and the caller falls through to
    /// raw-socket candidates.
    pub fn new(backend: Option<Arc<dyn SessionBackend>>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Connector for NetConnector {
    async fn open(
        &self,
        candidate: &Candidate,
        timeout: Duration,
    ) -> Result<Box<dyn ScopeTransport>, TransportError> {
        match candidate {
            Candidate::RawSocket { host, port } => {
                let transport = VicpSocketTransport::connect(host, *port, timeout).await?;
                Ok(Box::new(transport))
            }
            Candidate::Structured(resource) => {
                let backend = self
                    .backend
                    .as_ref()
                    .ok_or_else(|| TransportError::NoBackend(resource.clone()))?;
                let transport = SessionTransport::open(backend.as_ref(), resource, timeout)?;
                Ok(Box::new(transport))
            }
        }
    }
}
