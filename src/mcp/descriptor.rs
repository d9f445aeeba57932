//! MCP Server Descriptor (§3, §4.4): the host-owned lifecycle state for one
//! configured content-processor process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    ChildProcessStdio,
    LocalSocket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerHealth {
    Starting,
    Healthy,
    Unhealthy,
    Disabled,
}

/// {name, version, transport, content_types supported, declared
/// capabilities, current health, last_heartbeat} (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerDescriptor {
    pub name: String,
    pub version: String,
    pub transport: Transport,
    pub content_types: Vec<String>,
    pub capabilities: Vec<String>,
    pub priority: i32,
    pub health: ServerHealth,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub missed_heartbeats: u32,
    pub restart_attempts: u32,
}

impl McpServerDescriptor {
    pub fn new(name: impl Into<String>, content_types: Vec<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            version: "unknown".to_string(),
            transport: Transport::ChildProcessStdio,
            content_types,
            capabilities: Vec::new(),
            priority,
            health: ServerHealth::Starting,
            last_heartbeat: None,
            missed_heartbeats: 0,
            restart_attempts: 0,
        }
    }

    pub fn supports(&self, content_type: &str) -> bool {
        self.content_types.iter().any(|c| c == content_type)
    }

    pub fn on_initialized(&mut self, version: String, capabilities: Vec<String>) {
        self.version = version;
        self.capabilities = capabilities;
        self.health = ServerHealth::Healthy;
        self.last_heartbeat = Some(Utc::now());
        self.missed_heartbeats = 0;
    }

    pub fn on_heartbeat(&mut self) {
        self.last_heartbeat = Some(Utc::now());
        self.missed_heartbeats = 0;
        if self.health != ServerHealth::Disabled {
            self.health = ServerHealth::Healthy;
        }
    }

    /// Returns `true` once `max_missed` is exceeded, i.e. the server should
    /// be marked unhealthy (§4.4).
    pub fn note_missed_heartbeat(&mut self, max_missed: u32) -> bool {
        self.missed_heartbeats += 1;
        if self.missed_heartbeats > max_missed {
            self.health = ServerHealth::Unhealthy;
            true
        } else {
            false
        }
    }

    pub fn on_restart_attempted(&mut self, max_restart_attempts: u32) {
        self.restart_attempts += 1;
        if self.restart_attempts >= max_restart_attempts {
            self.health = ServerHealth::Disabled;
        }
    }

    pub fn on_restart_succeeded(&mut self) {
        self.restart_attempts = 0;
        self.health = ServerHealth::Healthy;
        self.missed_heartbeats = 0;
        self.last_heartbeat = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supports_matches_a_registered_content_type() {
        let d = McpServerDescriptor::new("docproc", vec!["document".into()], 0);
        assert!(d.supports("document"));
        assert!(!d.supports("spreadsheet"));
    }

    #[test]
    fn missed_heartbeats_beyond_the_threshold_mark_unhealthy() {
        let mut d = McpServerDescriptor::new("docproc", vec!["document".into()], 0);
        d.on_initialized("1.0.0".into(), vec!["nancy/ingest".into()]);
        assert!(!d.note_missed_heartbeat(3));
        assert!(!d.note_missed_heartbeat(3));
        assert!(!d.note_missed_heartbeat(3));
        assert!(d.note_missed_heartbeat(3));
        assert_eq!(d.health, ServerHealth::Unhealthy);
    }

    #[test]
    fn repeated_restart_attempts_disable_the_server() {
        let mut d = McpServerDescriptor::new("docproc", vec!["document".into()], 0);
        for _ in 0..5 {
            d.on_restart_attempted(5);
        }
        assert_eq!(d.health, ServerHealth::Disabled);
    }

    #[test]
    fn heartbeat_resets_the_missed_counter() {
        let mut d = McpServerDescriptor::new("docproc", vec!["document".into()], 0);
        d.note_missed_heartbeat(3);
        d.note_missed_heartbeat(3);
        d.on_heartbeat();
        assert_eq!(d.missed_heartbeats, 0);
    }
}
