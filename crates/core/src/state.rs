use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Normalized lifecycle state of a managed server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    #[default]
    Unknown,
    Offline,
    Starting,
    Stopping,
    Restarting,
    Online,
    Failed,
}

impl ServerState {
    pub const ALL: [ServerState; 7] = [
        ServerState::Unknown,
        ServerState::Offline,
        ServerState::Starting,
        ServerState::Stopping,
        ServerState::Restarting,
        ServerState::Online,
        ServerState::Failed,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ServerState::Unknown => "unknown",
            ServerState::Offline => "offline",
            ServerState::Starting => "starting",
            ServerState::Stopping => "stopping",
            ServerState::Restarting => "restarting",
            ServerState::Online => "online",
            ServerState::Failed => "failed",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|s| s.name().eq_ignore_ascii_case(name))
    }

    pub fn is_online(&self) -> bool {
        matches!(self, ServerState::Online)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ServerState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| CoreError::Other(format!("unknown server state '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for state in ServerState::ALL {
            assert_eq!(ServerState::from_name(state.name()), Some(state));
        }
        assert_eq!(ServerState::from_name(" ONLINE "), Some(ServerState::Online));
        assert_eq!(ServerState::from_name("sleeping"), None);
    }

    #[test]
    fn serde_uses_lowercase() {
        let json = serde_json::to_string(&ServerState::Restarting).unwrap();
        assert_eq!(json, "\"restarting\"");
    }
}
