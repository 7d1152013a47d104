//! Event loop runtime
//!
//! The [`Monitor`] ties feeds, scheduling, capture and clock estimation
//! together; slow work is delegated to the [`BackgroundWorker`].

mod clock;
mod monitor;
mod worker;

pub use clock::{deadline, until, Clock, SystemClock};
pub use monitor::{Monitor, MonitorConfig, MonitorDeps, MonitorStats};
pub use worker::{BackgroundWorker, Completion};
