//! Settlement scheduler state machine
//!
//! Transitions:
//! - `Idle → Armed` when a target and settlement can be derived
//! - `Armed → Armed` when the target changes before the trigger is due
//! - `Armed → Idle` when the new target cannot be scheduled
//! - `Armed → Capturing` when the trigger fires
//! - `Capturing → Flushing` at window end
//! - `Flushing → Idle` once the capture log write finishes or gives up

use super::settlement::{plan_capture, select_target};
use super::types::{ArmedTrigger, Evaluation, SchedulerState};
use crate::config::{ScheduleConfig, MAX_WINDOW_SECS};
use crate::feed::FundingTable;
use chrono::{DateTime, Duration, Utc};

/// Timing of the capture window relative to settlement
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Capture starts this long before settlement
    pub lead: Duration,
    /// Capture length
    pub window: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lead: Duration::seconds(30),
            window: Duration::seconds(60),
        }
    }
}

impl From<&ScheduleConfig> for SchedulerConfig {
    fn from(config: &ScheduleConfig) -> Self {
        Self {
            lead: Duration::seconds(config.lead_secs.min(MAX_WINDOW_SECS) as i64),
            window: Duration::seconds(config.window_secs.min(MAX_WINDOW_SECS) as i64),
        }
    }
}

/// Picks the capture target and owns the process-wide capture state
pub struct Scheduler {
    config: SchedulerConfig,
    state: SchedulerState,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            state: SchedulerState::Idle,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    /// Re-evaluate the target against the current funding table
    ///
    /// Suspended while a capture is running or flushing. An armed trigger
    /// that is already due is never re-targeted.
    pub fn evaluate(&mut self, table: &FundingTable, now: DateTime<Utc>) -> Evaluation {
        match &self.state {
            SchedulerState::Capturing(_) | SchedulerState::Flushing(_) => {
                return Evaluation::Suspended
            }
            SchedulerState::Armed(armed) if now >= armed.trigger_at => {
                return Evaluation::Unchanged
            }
            _ => {}
        }

        let Some(target) = select_target(table) else {
            return Evaluation::NoCandidate;
        };

        match plan_capture(target, now, self.config.lead, self.config.window) {
            Ok(plan) => match std::mem::take(&mut self.state) {
                SchedulerState::Armed(previous) if previous.targets_same(&plan) => {
                    self.state = SchedulerState::Armed(plan);
                    Evaluation::Unchanged
                }
                SchedulerState::Armed(previous) => {
                    self.state = SchedulerState::Armed(plan.clone());
                    Evaluation::Rearmed {
                        previous,
                        current: plan,
                    }
                }
                _ => {
                    self.state = SchedulerState::Armed(plan.clone());
                    Evaluation::Armed(plan)
                }
            },
            Err(error) => {
                let cancelled = match std::mem::take(&mut self.state) {
                    SchedulerState::Armed(previous) => Some(previous),
                    _ => None,
                };
                Evaluation::Skipped { error, cancelled }
            }
        }
    }

    /// When the armed trigger is due
    pub fn trigger_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            SchedulerState::Armed(armed) => Some(armed.trigger_at),
            _ => None,
        }
    }

    /// Fire the armed trigger if it is due
    pub fn fire(&mut self, now: DateTime<Utc>) -> Option<ArmedTrigger> {
        match &self.state {
            SchedulerState::Armed(armed) if now >= armed.trigger_at => {
                let armed = armed.clone();
                self.state = SchedulerState::Capturing(armed.clone());
                Some(armed)
            }
            _ => None,
        }
    }

    /// Capture window closed; the log write is pending
    pub fn begin_flush(&mut self) -> bool {
        match std::mem::take(&mut self.state) {
            SchedulerState::Capturing(armed) => {
                self.state = SchedulerState::Flushing(armed);
                true
            }
            other => {
                self.state = other;
                false
            }
        }
    }

    /// Log write finished; back to idle
    pub fn complete(&mut self) -> Option<ArmedTrigger> {
        match std::mem::take(&mut self.state) {
            SchedulerState::Flushing(armed) | SchedulerState::Capturing(armed) => Some(armed),
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Drop an armed trigger that has not fired
    pub fn cancel(&mut self) -> Option<ArmedTrigger> {
        match std::mem::take(&mut self.state) {
            SchedulerState::Armed(armed) => Some(armed),
            other => {
                self.state = other;
                None
            }
        }
    }
}
