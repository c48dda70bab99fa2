//! # Scopeshot Core Library
//!
//! Captures a screen image from a bench oscilloscope over LAN or USB,
//! negotiating among vendor SCPI dialects:
//! - LeCroy / Teledyne LeCroy (VICP binary transport on port 1861)
//! - Tektronix (HARDcopy)
//! - Keysight / Agilent (:DISP:DATA? binary block)
//! - Rigol / Siglent (:DISP:DATA?, with legacy fallback)
//!
//! ## Features
//!
//! - Ordered connection candidates per target (VXI-11, HiSLIP, raw socket)
//! - Unknown-vendor graceful degradation across all dialects
//! - Forced raw-VICP downgrade for LeCroy scopes reached over a structured
//!   session
//! - Accept-partial VICP stream decoding (scopes often close without EOI)
//! - Cancellation checked between capture phases
//!
//! ## Example
//!
//! ```rust,no_run
//! use scopeshot_core::{CaptureEngine, CaptureRequest, ColorMode, NetConnector, Target};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = CaptureEngine::new(Arc::new(NetConnector::new(None)));
//!
//!     let request = CaptureRequest {
//!         target: Target::Network {
//!             host: "10.0.0.5".to_string(),
//!             port: None,
//!         },
//!         color: ColorMode::White,
//!         timeout: Duration::from_secs(15),
//!         output: "scope_screenshot.png".into(),
//!     };
//!
//!     let report = engine.capture(&request).await?;
//!     println!("captured {} bytes from {}", report.image.bytes.len(), report.endpoint);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes};
pub use crate::config::Settings;
pub use crate::core::capture::{
    CaptureEngine, CaptureError, CapturePhase, CaptureReport, CaptureRequest,
    DEFAULT_MIN_IMAGE_BYTES,
};
pub use crate::core::image::{
    persist, strip_block_header, timestamped_path, EnvelopeKind, ImageBlob, PersistedImage,
};
pub use crate::core::resolver::{
    candidates_for, Candidate, Target, DISCOVERY_PATTERNS, SCPI_RAW_PORT, VICP_PORT,
};
#[cfg(feature = "visa")]
pub use crate::core::transport::VisaBackend;
pub use crate::core::transport::{
    Connector, InstrumentSession, NetConnector, ScopeTransport, SessionBackend,
    SessionTransport, TransportError, TransportKind, TransportStats, VicpSocketTransport,
};
pub use crate::core::vendor::{
    command_plans, ColorMode, CommandPlan, CommandStep, Pacing, Vendor,
};
pub use crate::core::vicp::{drain_stream, Frame, SequenceCounter, StreamOutcome, VicpCodec};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
