//! Vendor command dispatch
//!
//! Maps a detected instrument vendor to the exact SCPI sequence that
//! triggers a screen dump, including the settle delays the instrument needs
//! to render the image before it starts transmitting. Every command string
//! and delay here is a protocol requirement of the instrument family, not a
//! tuning knob.

use crate::core::image::EnvelopeKind;
use crate::core::transport::TransportKind;
use std::fmt;
use std::time::Duration;
use tracing::warn;

/// Background color of the captured screenshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMode {
    /// White background (ink-saver rendering)
    #[default]
    White,
    /// Black background (the scope's native look)
    Black,
}

impl ColorMode {
    /// Parse a user-supplied color name. Anything other than WHITE or BLACK
    /// coerces to white with a warning; an unknown color is never fatal.
    pub fn parse_lossy(value: &str) -> Self {
        match value.trim().to_uppercase().as_str() {
            "WHITE" => Self::White,
            "BLACK" => Self::Black,
            other => {
                warn!(color = other, "unknown display color, defaulting to WHITE");
                Self::White
            }
        }
    }

    fn lecroy_background(self) -> &'static str {
        match self {
            Self::White => "WHITE",
            Self::Black => "BLACK",
        }
    }

    fn tektronix_inksaver(self) -> &'static str {
        match self {
            Self::White => "ON",
            Self::Black => "OFF",
        }
    }

    fn keysight_scheme(self) -> &'static str {
        match self {
            Self::White => "INKS",
            Self::Black => "SCR",
        }
    }

    fn rigol_invert(self) -> &'static str {
        match self {
            Self::White => "OFF",
            Self::Black => "ON",
        }
    }
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lecroy_background())
    }
}

/// Instrument vendor families with distinct screen-dump dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vendor {
    /// LeCroy / Teledyne LeCroy
    LeCroy,
    /// Tektronix TDS / MDO / MSO / DPO series
    Tektronix,
    /// Keysight / Agilent InfiniiVision and Infiniium series
    Keysight,
    /// Rigol DS / MSO and Siglent SDS series
    RigolSiglent,
    /// Identity unknown; all dialects are tried in priority order
    Unknown,
}

impl Vendor {
    /// Derive the vendor tag from a raw `*IDN?` response by case-insensitive
    /// substring match. An empty or unrecognized identity maps to `Unknown`.
    pub fn detect(idn: &str) -> Self {
        let upper = idn.to_uppercase();
        if upper.contains("LECROY") || upper.contains("TELEDYNE") {
            Self::LeCroy
        } else if upper.contains("TEKTRONIX") || upper.contains("TEK") {
            Self::Tektronix
        } else if upper.contains("KEYSIGHT")
            || upper.contains("AGILENT")
            || upper.contains("HEWLETT")
        {
            Self::Keysight
        } else if upper.contains("RIGOL") || upper.contains("SIGLENT") {
            Self::RigolSiglent
        } else {
            Self::Unknown
        }
    }

    /// Short tag for logs and reports
    pub fn label(&self) -> &'static str {
        match self {
            Self::LeCroy => "LECROY",
            Self::Tektronix => "TEKTRONIX",
            Self::Keysight => "KEYSIGHT",
            Self::RigolSiglent => "RIGOL_SIGLENT",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Settle delays between commands.
///
/// These model instrument-side rendering latency: the scope composes the
/// full bitmap before the first byte leaves the wire. LeCroy needs much
/// longer on the raw VICP socket than on a structured session.
#[derive(Debug, Clone)]
pub struct Pacing {
    /// After LeCroy `HCSU` hardcopy setup, structured session
    pub lecroy_setup: Duration,
    /// After LeCroy `SCREEN_DUMP`, structured session
    pub lecroy_dump: Duration,
    /// After LeCroy `HCSU` hardcopy setup, raw socket
    pub lecroy_setup_raw: Duration,
    /// After LeCroy `SCREEN_DUMP`, raw socket
    pub lecroy_dump_raw: Duration,
    /// After Tektronix hardcopy configuration
    pub tektronix_setup: Duration,
    /// After `HARDcopy START`
    pub tektronix_dump: Duration,
    /// After a Keysight/Rigol display-data query
    pub query_settle: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            lecroy_setup: Duration::from_millis(300),
            lecroy_dump: Duration::from_millis(1500),
            lecroy_setup_raw: Duration::from_millis(500),
            lecroy_dump_raw: Duration::from_millis(4000),
            tektronix_setup: Duration::from_millis(200),
            tektronix_dump: Duration::from_millis(2000),
            query_settle: Duration::from_millis(500),
        }
    }
}

impl Pacing {
    /// All delays zero, for tests and simulated instruments
    pub fn zero() -> Self {
        Self {
            lecroy_setup: Duration::ZERO,
            lecroy_dump: Duration::ZERO,
            lecroy_setup_raw: Duration::ZERO,
            lecroy_dump_raw: Duration::ZERO,
            tektronix_setup: Duration::ZERO,
            tektronix_dump: Duration::ZERO,
            query_settle: Duration::ZERO,
        }
    }
}

/// One SCPI command plus the delay the instrument needs afterwards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStep {
    /// Command text
    pub command: String,
    /// Mandatory settle delay after sending
    pub settle: Duration,
}

impl CommandStep {
    fn new(command: impl Into<String>, settle: Duration) -> Self {
        Self {
            command: command.into(),
            settle,
        }
    }
}

/// A complete screen-dump attempt: commands to send, then one binary read
#[derive(Debug, Clone)]
pub struct CommandPlan {
    /// Dialect tag for logs
    pub label: &'static str,
    /// Commands in send order
    pub steps: Vec<CommandStep>,
    /// Envelope expected around the returned image bytes
    pub envelope: EnvelopeKind,
}

/// Ordered screen-dump plans for a vendor.
///
/// Most vendors yield one plan. Rigol/Siglent yields the parameterized
/// query followed by the legacy unparameterized form for older firmware.
/// `Unknown` yields every dialect in fixed priority order (Keysight, Rigol,
/// LeCroy, Tektronix) and the caller accepts the first plausible result.
pub fn command_plans(
    vendor: Vendor,
    color: ColorMode,
    kind: TransportKind,
    pacing: &Pacing,
) -> Vec<CommandPlan> {
    match vendor {
        Vendor::LeCroy => vec![lecroy(color, kind, pacing)],
        Vendor::Tektronix => vec![tektronix(color, pacing)],
        Vendor::Keysight => vec![keysight(color, pacing)],
        Vendor::RigolSiglent => vec![rigol(color, pacing), rigol_legacy(pacing)],
        Vendor::Unknown => vec![
            keysight(color, pacing),
            rigol(color, pacing),
            rigol_legacy(pacing),
            lecroy(color, kind, pacing),
            tektronix(color, pacing),
        ],
    }
}

fn lecroy(color: ColorMode, kind: TransportKind, pacing: &Pacing) -> CommandPlan {
    let (setup, dump) = match kind {
        TransportKind::Session => (pacing.lecroy_setup, pacing.lecroy_dump),
        TransportKind::Socket => (pacing.lecroy_setup_raw, pacing.lecroy_dump_raw),
    };
    CommandPlan {
        label: "lecroy",
        steps: vec![
            CommandStep::new(
                format!(
                    "HCSU DEV,BMP,FORMAT,PORTRAIT,BCKG,{},DEST,REMOTE,PORT,NET",
                    color.lecroy_background()
                ),
                setup,
            ),
            CommandStep::new("SCREEN_DUMP", dump),
        ],
        envelope: EnvelopeKind::None,
    }
}

fn tektronix(color: ColorMode, pacing: &Pacing) -> CommandPlan {
    CommandPlan {
        label: "tektronix",
        steps: vec![
            CommandStep::new("HARDcopy:PORT GPIB", Duration::ZERO),
            CommandStep::new("HARDcopy:FORMat BMP", Duration::ZERO),
            CommandStep::new(
                format!("HARDcopy:INKSaver {}", color.tektronix_inksaver()),
                pacing.tektronix_setup,
            ),
            CommandStep::new("HARDcopy START", pacing.tektronix_dump),
        ],
        envelope: EnvelopeKind::None,
    }
}

fn keysight(color: ColorMode, pacing: &Pacing) -> CommandPlan {
    let scheme = color.keysight_scheme();
    CommandPlan {
        label: "keysight",
        steps: vec![
            // Some older models ignore the arguments; both forms are safe
            CommandStep::new(format!(":DISP:DATA PNG,{scheme},COL"), pacing.query_settle),
            CommandStep::new(format!(":DISP:DATA? PNG,{scheme},COL"), pacing.query_settle),
        ],
        envelope: EnvelopeKind::IeeeBlock,
    }
}

fn rigol(color: ColorMode, pacing: &Pacing) -> CommandPlan {
    CommandPlan {
        label: "rigol",
        steps: vec![CommandStep::new(
            format!(":DISP:DATA? ON,{},PNG", color.rigol_invert()),
            pacing.query_settle,
        )],
        envelope: EnvelopeKind::IeeeBlock,
    }
}

fn rigol_legacy(pacing: &Pacing) -> CommandPlan {
    CommandPlan {
        label: "rigol-legacy",
        steps: vec![CommandStep::new(":DISP:DATA?", pacing.query_settle)],
        envelope: EnvelopeKind::IeeeBlock,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_known_vendors() {
        assert_eq!(
            Vendor::detect("LECROY,WAVERUNNER8104,LCRY001,8.2.0"),
            Vendor::LeCroy
        );
        assert_eq!(
            Vendor::detect("Teledyne LeCroy,HDO6104A,SN001,9.1"),
            Vendor::LeCroy
        );
        assert_eq!(Vendor::detect("TEKTRONIX,MSO54,C01,FV:1.3"), Vendor::Tektronix);
        assert_eq!(
            Vendor::detect("Keysight Technologies,MSOX3054T,MY123,7.30"),
            Vendor::Keysight
        );
        assert_eq!(
            Vendor::detect("AGILENT TECHNOLOGIES,DSO-X 2024A,MY5,2.41"),
            Vendor::Keysight
        );
        assert_eq!(
            Vendor::detect("RIGOL TECHNOLOGIES,DS1054Z,DS1ZA1,00.04.04"),
            Vendor::RigolSiglent
        );
        assert_eq!(
            Vendor::detect("Siglent Technologies,SDS1202X-E,SDSM1,8.1.6"),
            Vendor::RigolSiglent
        );
        assert_eq!(Vendor::detect(""), Vendor::Unknown);
        assert_eq!(Vendor::detect("(no IDN response)"), Vendor::Unknown);
    }

    #[test]
    fn test_color_parse_lossy_coerces_unknown_to_white() {
        assert_eq!(ColorMode::parse_lossy("WHITE"), ColorMode::White);
        assert_eq!(ColorMode::parse_lossy("black"), ColorMode::Black);
        assert_eq!(ColorMode::parse_lossy("GREEN"), ColorMode::White);
        assert_eq!(ColorMode::parse_lossy(""), ColorMode::White);
    }

    #[test]
    fn test_lecroy_plan_embeds_background_color() {
        let pacing = Pacing::default();
        let plan = &command_plans(
            Vendor::LeCroy,
            ColorMode::Black,
            TransportKind::Session,
            &pacing,
        )[0];
        assert_eq!(
            plan.steps[0].command,
            "HCSU DEV,BMP,FORMAT,PORTRAIT,BCKG,BLACK,DEST,REMOTE,PORT,NET"
        );
        assert_eq!(plan.steps[1].command, "SCREEN_DUMP");
        assert_eq!(plan.envelope, EnvelopeKind::None);
    }

    #[test]
    fn test_lecroy_raw_socket_waits_longer_for_render() {
        let pacing = Pacing::default();
        let session = &command_plans(
            Vendor::LeCroy,
            ColorMode::White,
            TransportKind::Session,
            &pacing,
        )[0];
        let socket = &command_plans(
            Vendor::LeCroy,
            ColorMode::White,
            TransportKind::Socket,
            &pacing,
        )[0];
        assert!(socket.steps[1].settle > session.steps[1].settle);
    }

    #[test]
    fn test_tektronix_inksaver_follows_color() {
        let pacing = Pacing::zero();
        let white = &command_plans(
            Vendor::Tektronix,
            ColorMode::White,
            TransportKind::Session,
            &pacing,
        )[0];
        assert!(white.steps.iter().any(|s| s.command == "HARDcopy:INKSaver ON"));
        let black = &command_plans(
            Vendor::Tektronix,
            ColorMode::Black,
            TransportKind::Session,
            &pacing,
        )[0];
        assert!(black.steps.iter().any(|s| s.command == "HARDcopy:INKSaver OFF"));
    }

    #[test]
    fn test_rigol_offers_legacy_fallback_plan() {
        let pacing = Pacing::zero();
        let plans = command_plans(
            Vendor::RigolSiglent,
            ColorMode::White,
            TransportKind::Session,
            &pacing,
        );
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].steps[0].command, ":DISP:DATA? ON,OFF,PNG");
        assert_eq!(plans[1].steps[0].command, ":DISP:DATA?");
    }

    #[test]
    fn test_unknown_vendor_plan_priority_order() {
        let pacing = Pacing::zero();
        let plans = command_plans(
            Vendor::Unknown,
            ColorMode::White,
            TransportKind::Socket,
            &pacing,
        );
        let labels: Vec<&str> = plans.iter().map(|p| p.label).collect();
        assert_eq!(
            labels,
            vec!["keysight", "rigol", "rigol-legacy", "lecroy", "tektronix"]
        );
    }

    #[test]
    fn test_zero_pacing_has_no_delays() {
        let pacing = Pacing::zero();
        for plan in command_plans(
            Vendor::Unknown,
            ColorMode::White,
            TransportKind::Socket,
            &pacing,
        ) {
            assert!(plan.steps.iter().all(|s| s.settle == Duration::ZERO));
        }
    }
}
