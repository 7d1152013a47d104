//! Settlement scheduling
//!
//! Picks the most negative funding symbol, derives its next settlement on
//! the funding interval grid, and arms a capture trigger ahead of it.

mod scheduler;
mod settlement;
mod types;

pub use scheduler::{Scheduler, SchedulerConfig};
pub use settlement::{next_settlement, plan_capture, select_target};
pub use types::{ArmedTrigger, Evaluation, ScheduleError, SchedulerState};
