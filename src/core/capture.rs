//! Capture orchestration
//!
//! Drives one screen capture through its phases:
//!
//! ```text
//! IDLE -> CONNECTING -> IDENTIFYING -> CONFIGURING -> TRIGGERED
//!      -> RECEIVING -> VALIDATING -> { DONE | RETRY | FAILED }
//! ```
//!
//! Every failure is a value, never a panic: an unreachable candidate moves
//! to the next one, a failed identity query downgrades to the unknown-vendor
//! dialect sweep, and an implausibly small image retries, including the
//! forced raw-VICP downgrade for LeCroy scopes reached over a structured
//! session, whose image bytes the LAN discovery sub-protocols cannot carry.
//! The transport is torn down on every exit path of every attempt; a
//! candidate never inherits another candidate's connection.

use crate::core::image::ImageBlob;
use crate::core::resolver::{candidates_for, Candidate, Target, VICP_PORT};
use crate::core::transport::{Connector, ScopeTransport, SessionBackend, TransportError};
use crate::core::vendor::{command_plans, ColorMode, CommandStep, Pacing, Vendor};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default minimum plausible screen-image size in bytes. Anything smaller
/// is an error string or a truncated transfer, not a screenshot.
pub const DEFAULT_MIN_IMAGE_BYTES: usize = 100;

/// One capture to perform
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// What to capture from
    pub target: Target,
    /// Requested background color
    pub color: ColorMode,
    /// Connect and per-read timeout
    pub timeout: Duration,
    /// Output path template; a timestamp is inserted before the extension
    pub output: PathBuf,
}

/// Capture failure reported to the caller
#[derive(Error, Debug)]
pub enum CaptureError {
    /// The resolver produced no way to reach the target
    #[error("no connection candidates for target")]
    NoCandidates,

    /// Cancelled between phases by the caller
    #[error("capture cancelled")]
    Cancelled,

    /// Every candidate, including any forced downgrade, failed
    #[error("all {attempts} connection attempt(s) exhausted without a plausible image")]
    Exhausted {
        /// Number of candidates tried
        attempts: usize,
    },
}

/// Orchestration phases of one capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    /// Not started
    Idle,
    /// Opening a transport over the current candidate
    Connecting,
    /// Querying `*IDN?`
    Identifying,
    /// Issuing hardcopy configuration commands
    Configuring,
    /// Screen dump triggered
    Triggered,
    /// Draining the binary response
    Receiving,
    /// Checking the result against the plausibility threshold
    Validating,
    /// Image accepted
    Done,
    /// Moving to the next candidate
    Retry,
    /// All candidates exhausted
    Failed,
}

impl CapturePhase {
    /// No further transitions happen from this phase
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Successful capture summary handed back to the caller
#[derive(Debug)]
pub struct CaptureReport {
    /// The finalized image
    pub image: ImageBlob,
    /// Vendor the capture dialect was selected for
    pub vendor: Vendor,
    /// Raw identity string, empty when the query failed
    pub identity: String,
    /// Endpoint the image was captured over
    pub endpoint: String,
    /// Dialect plan that produced the image
    pub plan: &'static str,
    /// Candidates tried, including the successful one
    pub attempts: usize,
}

enum AttemptError {
    Cancelled,
    Transport(TransportError),
    Insufficient { best: usize },
}

struct AttemptFailure {
    vendor: Vendor,
    error: AttemptError,
}

/// Sequences one capture across candidates and transports
pub struct CaptureEngine {
    connector: Arc<dyn Connector>,
    backend: Option<Arc<dyn SessionBackend>>,
    min_image_bytes: usize,
    pacing: Pacing,
    cancel: CancellationToken,
}

impl CaptureEngine {
    /// Create an engine over a connector
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            backend: None,
            min_image_bytes: DEFAULT_MIN_IMAGE_BYTES,
            pacing: Pacing::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Attach an instrument-session backend for device auto-discovery
    #[must_use]
    pub fn with_backend(mut self, backend: Option<Arc<dyn SessionBackend>>) -> Self {
        self.backend = backend;
        self
    }

    /// Override the plausibility threshold
    #[must_use]
    pub fn with_min_image_bytes(mut self, bytes: usize) -> Self {
        self.min_image_bytes = bytes;
        self
    }

    /// Override settle delays (tests use [`Pacing::zero`])
    #[must_use]
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Token a caller can cancel to abort between phases
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one capture. Returns the finalized image on success; every
    /// failure path returns a [`CaptureError`] value.
    pub async fn capture(&self, request: &CaptureRequest) -> Result<CaptureReport, CaptureError> {
        let capture_id = Uuid::new_v4();
        let mut phase = CapturePhase::Idle;

        let mut candidates: VecDeque<Candidate> =
            candidates_for(&request.target, self.backend.as_deref()).into();
        if candidates.is_empty() {
            return Err(CaptureError::NoCandidates);
        }

        let mut downgrade_used = false;
        let mut attempts = 0usize;

        while let Some(candidate) = candidates.pop_front() {
            attempts += 1;
            self.advance(&mut phase, CapturePhase::Connecting)?;
            info!(capture = %capture_id, candidate = %candidate, attempt = attempts, "connecting");

            let mut transport = match self.connector.open(&candidate, request.timeout).await {
                Ok(transport) => transport,
                Err(e) => {
                    warn!(capture = %capture_id, candidate = %candidate, error = %e, "candidate unreachable");
                    self.advance(&mut phase, CapturePhase::Retry)?;
                    continue;
                }
            };

            let endpoint = transport.endpoint();
            let attempt = self
                .run_attempt(&mut phase, transport.as_mut(), request)
                .await;
            // One open connection at most: torn down before anything else,
            // success, failure, or cancellation alike
            transport.close().await;

            let failure = match attempt {
                Ok((image, vendor, identity, plan)) => {
                    self.advance(&mut phase, CapturePhase::Done)?;
                    info!(
                        capture = %capture_id,
                        endpoint = %endpoint,
                        vendor = %vendor,
                        plan,
                        bytes = image.bytes.len(),
                        "capture complete"
                    );
                    return Ok(CaptureReport {
                        image,
                        vendor,
                        identity,
                        endpoint,
                        plan,
                        attempts,
                    });
                }
                Err(failure) => failure,
            };

            match failure.error {
                AttemptError::Cancelled => return Err(CaptureError::Cancelled),
                AttemptError::Transport(ref e) => {
                    warn!(capture = %capture_id, endpoint = %endpoint, error = %e, "attempt failed");
                }
                AttemptError::Insufficient { best } => {
                    warn!(
                        capture = %capture_id,
                        endpoint = %endpoint,
                        best_bytes = best,
                        threshold = self.min_image_bytes,
                        "no plausible image from candidate"
                    );
                }
            }

            // LeCroy sends its screen image only over VICP; a structured
            // discovery session will never carry it. Force a raw-socket
            // session on the proprietary port against the same host, once
            // per target, ahead of the remaining candidates.
            if !downgrade_used
                && failure.vendor == Vendor::LeCroy
                && matches!(candidate, Candidate::Structured(_))
            {
                if let Target::Network { host, .. } = &request.target {
                    downgrade_used = true;
                    info!(capture = %capture_id, host = %host, port = VICP_PORT, "forcing raw VICP downgrade");
                    candidates.push_front(Candidate::RawSocket {
                        host: host.clone(),
                        port: VICP_PORT,
                    });
                }
            }

            self.advance(&mut phase, CapturePhase::Retry)?;
        }

        self.advance(&mut phase, CapturePhase::Failed)?;
        Err(CaptureError::Exhausted { attempts })
    }

    /// One attempt over an open transport: identify, then work through the
    /// vendor's dialect plans until one yields a plausible image.
    async fn run_attempt(
        &self,
        phase: &mut CapturePhase,
        transport: &mut dyn ScopeTransport,
        request: &CaptureRequest,
    ) -> Result<(ImageBlob, Vendor, String, &'static str), AttemptFailure> {
        self.advance_attempt(phase, CapturePhase::Identifying, Vendor::Unknown)?;

        // A failed or empty identity query does not abort the attempt
        let identity = match transport.identify().await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(error = %e, "identity query failed, proceeding as UNKNOWN");
                String::new()
            }
        };
        let vendor = Vendor::detect(&identity);
        info!(identity = %identity, vendor = %vendor, "instrument identified");

        let plans = command_plans(vendor, request.color, transport.kind(), &self.pacing);
        let mut best = 0usize;
        let mut last_transport_err = None;

        for plan in &plans {
            let Some((trigger, setup)) = plan.steps.split_last() else {
                continue;
            };

            self.advance_attempt(phase, CapturePhase::Configuring, vendor)?;
            debug!(plan = plan.label, "issuing command plan");

            let mut step_result = Ok(());
            for step in setup {
                step_result = self.send_step(transport, step).await;
                if step_result.is_err() {
                    break;
                }
            }
            if step_result.is_ok() {
                self.advance_attempt(phase, CapturePhase::Triggered, vendor)?;
                step_result = self.send_step(transport, trigger).await;
            }
            if let Err(e) = step_result {
                warn!(plan = plan.label, error = %e, "command plan failed to send");
                last_transport_err = Some(e);
                continue;
            }

            self.advance_attempt(phase, CapturePhase::Receiving, vendor)?;
            let raw = match transport.receive_raw().await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(plan = plan.label, error = %e, "receive failed");
                    last_transport_err = Some(e);
                    continue;
                }
            };

            self.advance_attempt(phase, CapturePhase::Validating, vendor)?;
            if raw.len() >= self.min_image_bytes {
                return Ok((ImageBlob::finalize(raw), vendor, identity, plan.label));
            }
            warn!(
                plan = plan.label,
                bytes = raw.len(),
                threshold = self.min_image_bytes,
                "image data too small"
            );
            best = best.max(raw.len());
        }

        let error = match last_transport_err {
            Some(e) if best == 0 => AttemptError::Transport(e),
            _ => AttemptError::Insufficient { best },
        };
        Err(AttemptFailure { vendor, error })
    }

    async fn send_step(
        &self,
        transport: &mut dyn ScopeTransport,
        step: &CommandStep,
    ) -> Result<(), TransportError> {
        transport.send_command(&step.command).await?;
        // The settle delay is a protocol requirement: the instrument renders
        // the hardcopy before it answers
        if !step.settle.is_zero() {
            tokio::time::sleep(step.settle).await;
        }
        Ok(())
    }

    fn advance(
        &self,
        phase: &mut CapturePhase,
        next: CapturePhase,
    ) -> Result<(), CaptureError> {
        if self.cancel.is_cancelled() {
            warn!(at = ?phase, "capture cancelled");
            return Err(CaptureError::Cancelled);
        }
        debug!(from = ?phase, to = ?next, "phase transition");
        *phase = next;
        Ok(())
    }

    fn advance_attempt(
        &self,
        phase: &mut CapturePhase,
        next: CapturePhase,
        vendor: Vendor,
    ) -> Result<(), AttemptFailure> {
        self.advance(phase, next).map_err(|_| AttemptFailure {
            vendor,
            error: AttemptError::Cancelled,
        })
    }
}
