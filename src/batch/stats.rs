use serde::Serialize;
use super::outcome::{UnitOutcome, UnitStatus};

/// Counters derived from a batch's outcome map.
///
/// `completed` counts every unit that reached a terminal state; `failed` and
/// `stopped` are subsets of it. Always rebuilt from the outcomes, never
/// incremented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregateStats {
    pub total: usize,
    pub completed: usize,
    pub running: usize,
    pub pending: usize,
    pub failed: usize,
    pub stopped: usize,
    pub succeeded: usize,
    pub root_access: usize,
    pub shells_opened: usize,
}

impl AggregateStats {
    pub fn from_outcomes<'a, I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = &'a UnitOutcome>,
    {
        let mut stats = Self::default();
        for outcome in outcomes {
            stats.total += 1;
            match outcome.status {
                UnitStatus::Running => stats.running += 1,
                UnitStatus::Failed => stats.failed += 1,
                UnitStatus::Stopped => stats.stopped += 1,
                UnitStatus::Completed => stats.succeeded += 1,
                UnitStatus::Pending => {}
            }
            if outcome.status.is_terminal() {
                stats.completed += 1;
            }
            if outcome.flags.root_access {
                stats.root_access += 1;
            }
            if outcome.flags.shell_opened {
                stats.shells_opened += 1;
            }
        }
        stats.pending = stats.total - stats.completed - stats.running;
        stats
    }

    pub fn is_finished(&self) -> bool {
        self.completed == self.total
    }

    /// Share of terminal units, 0.0 for an empty batch.
    pub fn progress_ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.completed as f64 / self.total as f64
    }
}
