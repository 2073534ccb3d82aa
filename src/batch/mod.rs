pub mod outcome;
pub mod stats;
pub mod orchestrator;

pub use outcome::{UnitOutcome, UnitStatus};
pub use stats::AggregateStats;
pub use orchestrator::{BatchMode, BatchOrchestrator, BatchReport, BatchSettings};
