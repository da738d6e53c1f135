pub mod cycle;
pub mod scheduler;

pub use cycle::{CycleSummary, SyncCycle};
pub use scheduler::{RunOutcome, SchedulerState, SyncMode, SyncScheduler};
