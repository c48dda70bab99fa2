//! Structured instrument-session transport
//!
//! Wraps an external instrument-session library (VISA-class) behind the
//! [`InstrumentSession`] boundary trait. The transport itself only sequences
//! calls: disable text termination before binary reads, and retry the
//! `::INSTR`/`::INST` suffix spelling when a resource open is rejected.
//! Standard VISA and the LeCroy IVI driver disagree on the suffix for the
//! same physical instrument class.

use super::{ScopeTransport, TransportError, TransportKind, TransportStats};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, info};

/// One open session with the external instrument library.
///
/// Calls are blocking; the capture flow is strictly sequential so they run
/// inline on the single logical thread of control.
#[cfg_attr(test, mockall::automock)]
pub trait InstrumentSession: Send {
    /// Write a command and read back its text response
    fn query(&mut self, command: &str) -> Result<String, TransportError>;

    /// Write a command without reading a response
    fn write(&mut self, command: &str) -> Result<(), TransportError>;

    /// Read raw response bytes until the library's timeout or end of data
    fn read_raw(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Enable or disable text line termination on reads
    fn set_term_enabled(&mut self, enabled: bool) -> Result<(), TransportError>;

    /// Release the session
    fn close(&mut self);
}

/// Factory boundary for the external instrument-session library.
#[cfg_attr(test, mockall::automock)]
pub trait SessionBackend: Send + Sync {
    /// Open a session for a resource string
    fn open(
        &self,
        resource: &str,
        timeout: Duration,
    ) -> Result<Box<dyn InstrumentSession>, TransportError>;

    /// Enumerate resource strings matching an instrument-class glob pattern
    fn list_resources(&self, pattern: &str) -> Result<Vec<String>, TransportError>;
}

/// Suffix spellings to try for one resource, nominal form first.
pub(crate) fn suffix_variants(resource: &str) -> Vec<String> {
    let mut variants = vec![resource.to_string()];
    if let Some(stem) = resource.strip_suffix("::INSTR") {
        variants.push(format!("{stem}::INST"));
    } else if let Some(stem) = resource.strip_suffix("::INST") {
        variants.push(format!("{stem}::INSTR"));
    }
    variants
}

/// Transport over a structured instrument session
pub struct SessionTransport {
    resource: String,
    session: Option<Box<dyn InstrumentSession>>,
    stats: TransportStats,
}

impl SessionTransport {
    /// Open `resource` through `backend`, retrying the alternate suffix
    /// spelling before giving up on the candidate.
    pub fn open(
        backend: &dyn SessionBackend,
        resource: &str,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let variants = suffix_variants(resource);

        let mut last_err = None;
        for variant in &variants {
            match backend.open(variant, timeout) {
                Ok(session) => {
                    if variant != resource {
                        info!(resource = %variant, "opened with adjusted suffix");
                    } else {
                        info!(resource = %variant, "session opened");
                    }
                    return Ok(Self {
                        resource: variant.clone(),
                        session: Some(session),
                        stats: TransportStats::default(),
                    });
                }
                Err(e) => {
                    debug!(resource = %variant, error = %e, "resource open rejected");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            TransportError::ConnectFailed(format!("cannot open {resource}"))
        }))
    }

    fn session(&mut self) -> Result<&mut Box<dyn InstrumentSession>, TransportError> {
        self.session.as_mut().ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl ScopeTransport for SessionTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Session
    }

    fn endpoint(&self) -> String {
        self.resource.clone()
    }

    async fn identify(&mut self) -> Result<String, TransportError> {
        let session = self.session()?;
        let identity = session.query("*IDN?")?;
        Ok(identity.trim().to_string())
    }

    async fn send_command(&mut self, command: &str) -> Result<(), TransportError> {
        let session = self.session()?;
        session.write(command)?;
        self.stats.bytes_sent += command.len() as u64;
        debug!(command, "sent session command");
        Ok(())
    }

    async fn receive_raw(&mut self) -> Result<Bytes, TransportError> {
        let session = self.session()?;

        // Binary transfer: a text terminator would truncate the image
        session.set_term_enabled(false)?;
        let data = session.read_raw()?;

        self.stats.bytes_received += data.len() as u64;
        self.stats.reads += 1;
        debug!(bytes = data.len(), "session raw read complete");
        Ok(Bytes::from(data))
    }

    async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
            debug!(resource = %self.resource, "session closed");
        }
    }

    fn stats(&self) -> TransportStats {
        self.stats
    }
}

/// Instrument-session backend over the system VISA library.
///
/// Compiled only with the `visa` feature; default builds run without any
/// native VISA installation and reach instruments over raw sockets instead.
#[cfg(feature = "visa")]
pub struct VisaBackend {
    rm: visa_rs::DefaultRM,
}

#[cfg(feature = "visa")]
mod visa_impl {
    use super::*;
    use std::ffi::CString;
    use std::io::{Read, Write};
    use tracing::warn;
    use visa_rs::prelude::*;

    impl VisaBackend {
        /// Connect to the system VISA resource manager
        pub fn new() -> Result<Self, TransportError> {
            let rm = DefaultRM::new()
                .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
            Ok(Self { rm })
        }

        fn visa_string(text: &str) -> Result<VisaString, TransportError> {
            let c_string = CString::new(text)
                .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
            Ok(VisaString::from(c_string))
        }
    }

    struct VisaSession {
        instr: Instrument,
    }

    impl SessionBackend for VisaBackend {
        fn open(
            &self,
            resource: &str,
            _timeout: Duration,
        ) -> Result<Box<dyn InstrumentSession>, TransportError> {
            let name = Self::visa_string(resource)?;
            let instr = self
                .rm
                .open(&name, AccessMode::NO_LOCK, TIMEOUT_IMMEDIATE)
                .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
            Ok(Box::new(VisaSession { instr }))
        }

        fn list_resources(&self, pattern: &str) -> Result<Vec<String>, TransportError> {
            let expr = Self::visa_string(pattern)?;
            let list = self
                .rm
                .find_res_list(&expr)
                .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
            let mut resources = Vec::new();
            for res in list {
                match res {
                    Ok(name) => resources.push(name.to_string()),
                    Err(e) => warn!(error = %e, "skipping unreadable resource entry"),
                }
            }
            Ok(resources)
        }
    }

    impl InstrumentSession for VisaSession {
        fn query(&mut self, command: &str) -> Result<String, TransportError> {
            self.write(command)?;
            let mut buf = [0u8; 1024];
            let n = self
                .instr
                .read(&mut buf)
                .map_err(|e| TransportError::QueryFailed(e.to_string()))?;
            Ok(String::from_utf8_lossy(&buf[..n]).to_string())
        }

        fn write(&mut self, command: &str) -> Result<(), TransportError> {
            let mut line = command.as_bytes().to_vec();
            line.push(b'\n');
            self.instr
                .write_all(&line)
                .map_err(|e| TransportError::SendFailed(e.to_string()))
        }

        fn read_raw(&mut self) -> Result<Vec<u8>, TransportError> {
            let mut data = Vec::new();
            let mut buf = vec![0u8; 65536];
            loop {
                match self.instr.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => data.extend_from_slice(&buf[..n]),
                    // The library times out once the instrument stops
                    // sending; whatever accumulated is the response.
                    Err(_) if !data.is_empty() => break,
                    Err(e) => return Err(TransportError::Io(e)),
                }
            }
            Ok(data)
        }

        fn set_term_enabled(&mut self, _enabled: bool) -> Result<(), TransportError> {
            // viRead already returns raw bytes; termination is a text-layer
            // concern that this backend never applies to reads.
            Ok(())
        }

        fn close(&mut self) {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use mockall::Sequence;

    #[test]
    fn test_suffix_variants() {
        assert_eq!(
            suffix_variants("USB0::0x05FF::0x1023::SN1::INSTR"),
            vec![
                "USB0::0x05FF::0x1023::SN1::INSTR".to_string(),
                "USB0::0x05FF::0x1023::SN1::INST".to_string(),
            ]
        );
        assert_eq!(
            suffix_variants("USB0::0x05FF::0x1023::SN1::INST"),
            vec![
                "USB0::0x05FF::0x1023::SN1::INST".to_string(),
                "USB0::0x05FF::0x1023::SN1::INSTR".to_string(),
            ]
        );
        // SOCKET resources have no alternate spelling
        assert_eq!(
            suffix_variants("TCPIP::10.0.0.5::5025::SOCKET"),
            vec!["TCPIP::10.0.0.5::5025::SOCKET".to_string()]
        );
    }

    #[test]
    fn test_open_retries_alternate_suffix() {
        let mut backend = MockSessionBackend::new();
        let mut seq = Sequence::new();

        backend
            .expect_open()
            .with(eq("USB0::1::2::SN::INSTR"), eq(Duration::from_secs(5)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|resource, _| {
                Err(TransportError::ConnectFailed(resource.to_string()))
            });
        backend
            .expect_open()
            .with(eq("USB0::1::2::SN::INST"), eq(Duration::from_secs(5)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                let mut session = MockInstrumentSession::new();
                session.expect_close().return_const(());
                Ok(Box::new(session) as Box<dyn InstrumentSession>)
            });

        let transport =
            SessionTransport::open(&backend, "USB0::1::2::SN::INSTR", Duration::from_secs(5))
                .unwrap();
        assert_eq!(transport.endpoint(), "USB0::1::2::SN::INST");
    }

    #[test]
    fn test_open_fails_after_both_suffixes() {
        let mut backend = MockSessionBackend::new();
        backend
            .expect_open()
            .times(2)
            .returning(|resource, _| {
                Err(TransportError::ConnectFailed(resource.to_string()))
            });

        let result =
            SessionTransport::open(&backend, "USB0::1::2::SN::INSTR", Duration::from_secs(5));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_receive_disables_termination_before_read() {
        let mut session = MockInstrumentSession::new();
        let mut seq = Sequence::new();
        session
            .expect_set_term_enabled()
            .with(eq(false))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        session
            .expect_read_raw()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(b"BM1234".to_vec()));
        session.expect_close().return_const(());

        let mut backend = MockSessionBackend::new();
        backend
            .expect_open()
            .times(1)
            .return_once(move |_, _| Ok(Box::new(session) as Box<dyn InstrumentSession>));

        let mut transport =
            SessionTransport::open(&backend, "TCPIP::10.0.0.5::inst0::INSTR", Duration::from_secs(5))
                .unwrap();
        let data = transport.receive_raw().await.unwrap();
        assert_eq!(data.as_ref(), b"BM1234");
        transport.close().await;
    }
}
