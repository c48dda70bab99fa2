//! Connection resolution
//!
//! Turns a logical capture target into an ordered list of concrete
//! candidates to try. Order encodes protocol preference (the structured
//! LAN sub-protocols VXI-11 and HiSLIP ahead of a raw socket), not
//! correctness; any candidate may fail independently and the orchestrator
//! simply moves to the next. Resolution is pure address-space logic and
//! never inspects instrument identity.

use crate::core::transport::SessionBackend;
use std::fmt;
use tracing::{debug, warn};

/// LeCroy VICP proprietary port
pub const VICP_PORT: u16 = 1861;

/// Well-known raw SCPI socket port
pub const SCPI_RAW_PORT: u16 = 5025;

/// Instrument-class glob patterns for USB auto-discovery, in priority
/// order. Standard VISA lists `::INSTR`; the LeCroy IVI driver lists
/// `::INST`; the bare form is a last resort.
pub const DISCOVERY_PATTERNS: [&str; 3] = ["USB?*::INSTR", "USB?*::INST", "USB?*"];

/// A logical endpoint to capture from, fixed for the whole capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Instrument reachable over the LAN
    Network {
        /// Host name or IP address
        host: String,
        /// Explicit port; `None` or `Some(0)` resolves to the default
        port: Option<u16>,
    },
    /// Instrument reachable through the session library (USB-TMC)
    Device {
        /// Exact resource string; `None` auto-discovers the first instrument
        resource: Option<String>,
    },
}

/// One concrete way to reach a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    /// Structured-session resource string
    Structured(String),
    /// Raw VICP socket endpoint
    RawSocket {
        /// Host name or IP address
        host: String,
        /// TCP port
        port: u16,
    },
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structured(resource) => write!(f, "{resource}"),
            Self::RawSocket { host, port } => write!(f, "{host}:{port}"),
        }
    }
}

/// Build the ordered candidate list for a target.
///
/// Deterministic and stable for a given target. `backend` is only consulted
/// for device auto-discovery; without one, auto-discovery yields no
/// candidates.
pub fn candidates_for(
    target: &Target,
    backend: Option<&dyn SessionBackend>,
) -> Vec<Candidate> {
    match target {
        Target::Network { host, port } => {
            let resolved = match port {
                Some(p) if *p != 0 => *p,
                _ => SCPI_RAW_PORT,
            };
            vec![
                Candidate::Structured(format!("TCPIP::{host}::inst0::INSTR")),
                Candidate::Structured(format!("TCPIP::{host}::hislip0::INSTR")),
                Candidate::RawSocket {
                    host: host.clone(),
                    port: resolved,
                },
            ]
        }
        Target::Device {
            resource: Some(resource),
        } => vec![Candidate::Structured(resource.clone())],
        Target::Device { resource: None } => discover_first(backend)
            .map(Candidate::Structured)
            .into_iter()
            .collect(),
    }
}

/// Enumerate instrument resources pattern by pattern and return the first
/// address of the first pattern that matches anything. Matches are never
/// merged across patterns.
fn discover_first(backend: Option<&dyn SessionBackend>) -> Option<String> {
    let Some(backend) = backend else {
        warn!("no instrument-session backend; cannot auto-discover devices");
        return None;
    };

    for pattern in DISCOVERY_PATTERNS {
        match backend.list_resources(pattern) {
            Ok(resources) if !resources.is_empty() => {
                debug!(
                    pattern,
                    count = resources.len(),
                    first = %resources[0],
                    "discovery pattern matched"
                );
                return Some(resources[0].clone());
            }
            Ok(_) => {}
            Err(e) => debug!(pattern, error = %e, "discovery pattern failed"),
        }
    }

    warn!("no USB instruments found by the session library");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::{InstrumentSession, TransportError};
    use std::collections::HashMap;
    use std::time::Duration;

    struct FakeBackend {
        by_pattern: HashMap<&'static str, Vec<String>>,
    }

    impl SessionBackend for FakeBackend {
        fn open(
            &self,
            resource: &str,
            _timeout: Duration,
        ) -> Result<Box<dyn InstrumentSession>, TransportError> {
            Err(TransportError::ConnectFailed(resource.to_string()))
        }

        fn list_resources(&self, pattern: &str) -> Result<Vec<String>, TransportError> {
            Ok(self.by_pattern.get(pattern).cloned().unwrap_or_default())
        }
    }

    #[test]
    fn test_network_candidates_prefer_structured_forms() {
        let target = Target::Network {
            host: "10.0.0.5".to_string(),
            port: None,
        };
        let candidates = candidates_for(&target, None);
        assert_eq!(
            candidates,
            vec![
                Candidate::Structured("TCPIP::10.0.0.5::inst0::INSTR".to_string()),
                Candidate::Structured("TCPIP::10.0.0.5::hislip0::INSTR".to_string()),
                Candidate::RawSocket {
                    host: "10.0.0.5".to_string(),
                    port: SCPI_RAW_PORT,
                },
            ]
        );
    }

    #[test]
    fn test_network_explicit_port_wins() {
        let target = Target::Network {
            host: "scope.lab".to_string(),
            port: Some(VICP_PORT),
        };
        let candidates = candidates_for(&target, None);
        assert_eq!(
            candidates[2],
            Candidate::RawSocket {
                host: "scope.lab".to_string(),
                port: VICP_PORT,
            }
        );
    }

    #[test]
    fn test_network_port_zero_means_default() {
        let target = Target::Network {
            host: "scope.lab".to_string(),
            port: Some(0),
        };
        let candidates = candidates_for(&target, None);
        assert_eq!(
            candidates[2],
            Candidate::RawSocket {
                host: "scope.lab".to_string(),
                port: SCPI_RAW_PORT,
            }
        );
    }

    #[test]
    fn test_ordering_is_stable_across_calls() {
        let target = Target::Network {
            host: "10.0.0.5".to_string(),
            port: Some(1861),
        };
        assert_eq!(candidates_for(&target, None), candidates_for(&target, None));
    }

    #[test]
    fn test_explicit_device_resource_is_sole_candidate() {
        let target = Target::Device {
            resource: Some("USB0::0x05FF::0x1023::SN1::INSTR".to_string()),
        };
        let candidates = candidates_for(&target, None);
        assert_eq!(
            candidates,
            vec![Candidate::Structured(
                "USB0::0x05FF::0x1023::SN1::INSTR".to_string()
            )]
        );
    }

    #[test]
    fn test_discovery_stops_at_first_matching_pattern() {
        let backend = FakeBackend {
            by_pattern: HashMap::from([
                (
                    "USB?*::INSTR",
                    vec![
                        "USB0::0x05FF::0x1023::A::INSTR".to_string(),
                        "USB0::0x0957::0x1799::B::INSTR".to_string(),
                    ],
                ),
                ("USB?*::INST", vec!["USB0::0x05FF::0x1023::C::INST".to_string()]),
            ]),
        };

        let target = Target::Device { resource: None };
        let candidates = candidates_for(&target, Some(&backend));
        // First pattern wins; later patterns are never merged in
        assert_eq!(
            candidates,
            vec![Candidate::Structured(
                "USB0::0x05FF::0x1023::A::INSTR".to_string()
            )]
        );
    }

    #[test]
    fn test_discovery_falls_through_empty_patterns() {
        let backend = FakeBackend {
            by_pattern: HashMap::from([
                ("USB?*::INST", vec!["USB0::0x05FF::0x1023::C::INST".to_string()]),
            ]),
        };

        let target = Target::Device { resource: None };
        let candidates = candidates_for(&target, Some(&backend));
        assert_eq!(
            candidates,
            vec![Candidate::Structured(
                "USB0::0x05FF::0x1023::C::INST".to_string()
            )]
        );
    }

    #[test]
    fn test_discovery_without_backend_yields_nothing() {
        let target = Target::Device { resource: None };
        assert!(candidates_for(&target, None).is_empty());
    }
}
