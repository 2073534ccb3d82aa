use std::fmt;
use serde::{Deserialize, Serialize};
use crate::session::{SessionFlags, SessionId, SessionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl UnitStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    /// Unit status for a terminal session state.
    pub fn from_terminal(state: SessionState) -> Option<Self> {
        match state {
            SessionState::Completed => Some(Self::Completed),
            SessionState::Failed => Some(Self::Failed),
            SessionState::Stopped => Some(Self::Stopped),
            _ => None,
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary a batch keeps for one unit. Live log state stays with the session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub status: UnitStatus,
    pub session_id: Option<SessionId>,
    pub flags: SessionFlags,
    pub error: Option<String>,
}

impl UnitOutcome {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn succeeded(&self) -> bool {
        self.status == UnitStatus::Completed
    }
}
