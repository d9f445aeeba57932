//! Mode Gate (C7, §4.7): the global ingestion policy selector.

use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{NancyError, Result};

/// Global policy selector controlling which ingestion paths are live (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Legacy,
    #[default]
    Hybrid,
    Mcp,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Legacy => "legacy",
            Mode::Hybrid => "hybrid",
            Mode::Mcp => "mcp",
        }
    }

    pub fn accepts_knowledge_packets(&self) -> bool {
        matches!(self, Mode::Hybrid | Mode::Mcp)
    }

    pub fn accepts_legacy_uploads(&self) -> bool {
        matches!(self, Mode::Legacy | Mode::Hybrid)
    }

    pub fn starts_mcp_host(&self) -> bool {
        matches!(self, Mode::Hybrid | Mode::Mcp)
    }

    fn to_u8(self) -> u8 {
        match self {
            Mode::Legacy => 0,
            Mode::Hybrid => 1,
            Mode::Mcp => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Mode::Legacy,
            2 => Mode::Mcp,
            _ => Mode::Hybrid,
        }
    }
}

impl FromStr for Mode {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "legacy" => Ok(Mode::Legacy),
            "hybrid" => Ok(Mode::Hybrid),
            "mcp" => Ok(Mode::Mcp),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Runtime-switchable mode holder. Reads are lock-free; writes go through
/// [`ModeGate::transition`], which is the only privileged control call
/// allowed to change it (§4.7).
///
/// Mode transitions never drop in-flight work: callers that need the drain
/// guarantee of §4.7 ("the Ingestion Router drains before switching") hold
/// an `IngestionRouter` alongside the gate and call
/// `router.drain().await` before `transition`, as `NancyCore::set_mode` does.
pub struct ModeGate {
    current: AtomicU8,
}

impl ModeGate {
    pub fn new(initial: Mode) -> Self {
        Self {
            current: AtomicU8::new(initial.to_u8()),
        }
    }

    pub fn mode(&self) -> Mode {
        Mode::from_u8(self.current.load(Ordering::SeqCst))
    }

    /// Unconditionally swap the active mode. Draining in-flight work is the
    /// caller's responsibility (§4.7); this call itself is just the atomic
    /// flip.
    pub fn transition(&self, new_mode: Mode) {
        self.current.store(new_mode.to_u8(), Ordering::SeqCst);
    }

    /// Reject an ingest attempt that the active mode does not permit
    /// (§7 `ModeRejection`).
    pub fn require_knowledge_packet_ingest(&self) -> Result<()> {
        let mode = self.mode();
        if mode.accepts_knowledge_packets() {
            Ok(())
        } else {
            Err(NancyError::ModeRejection {
                active_mode: mode.to_string(),
            })
        }
    }

    pub fn require_legacy_ingest(&self) -> Result<()> {
        let mode = self.mode();
        if mode.accepts_legacy_uploads() {
            Ok(())
        } else {
            Err(NancyError::ModeRejection {
                active_mode: mode.to_string(),
            })
        }
    }
}

impl Default for ModeGate {
    fn default() -> Self {
        Self::new(Mode::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mcp_mode_rejects_legacy_uploads() {
        let gate = ModeGate::new(Mode::Mcp);
        assert!(gate.require_legacy_ingest().is_err());
        assert!(gate.require_knowledge_packet_ingest().is_ok());
    }

    #[test]
    fn legacy_mode_rejects_knowledge_packets() {
        let gate = ModeGate::new(Mode::Legacy);
        assert!(gate.require_knowledge_packet_ingest().is_err());
        assert!(gate.require_legacy_ingest().is_ok());
    }

    #[test]
    fn hybrid_mode_accepts_both() {
        let gate = ModeGate::new(Mode::Hybrid);
        assert!(gate.require_knowledge_packet_ingest().is_ok());
        assert!(gate.require_legacy_ingest().is_ok());
    }

    #[test]
    fn transition_is_visible_to_subsequent_reads() {
        let gate = ModeGate::new(Mode::Legacy);
        gate.transition(Mode::Mcp);
        assert_eq!(gate.mode(), Mode::Mcp);
    }
}
