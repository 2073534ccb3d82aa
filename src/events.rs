use crate::batch::{AggregateStats, UnitOutcome};
use crate::catalog::ServiceKey;
use crate::session::{LogLine, SessionId, SessionState};
use crate::wizard::WizardStep;

/// Messages sent from the core to the terminal front-end for real-time display.
#[derive(Debug, Clone)]
pub enum ConsoleEvent {
    /// The wizard moved to a different step
    StepChanged {
        step: WizardStep,
    },
    /// A catalog load or reload succeeded
    CatalogLoaded {
        services: usize,
        source: String,
    },
    /// A catalog load failed; `unavailable` distinguishes "nothing recorded" from "malformed"
    CatalogFailed {
        unavailable: bool,
        error: String,
    },
    SelectionChanged {
        selected: usize,
    },
    /// A session moved through its lifecycle
    SessionStateChanged {
        service: ServiceKey,
        session_id: Option<SessionId>,
        state: SessionState,
        error: Option<String>,
    },
    /// A line was appended to a session's display buffer
    LogAppended {
        service: ServiceKey,
        line: LogLine,
    },
    /// Log polling has failed repeatedly; emitted once per failure streak
    PollDegraded {
        service: ServiceKey,
        session_id: SessionId,
        consecutive_failures: u32,
        error: String,
    },
    /// A batch unit changed status
    UnitOutcome {
        service: ServiceKey,
        outcome: UnitOutcome,
    },
    StatsUpdated {
        stats: AggregateStats,
    },
    BatchFinished {
        stats: AggregateStats,
        cancelled: bool,
    },
}
