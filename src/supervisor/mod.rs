//! Supervision layer
//!
//! - Tier definitions and the sequencer that walks them
//! - Repair actions dispatched on failure
//! - Alert evaluation with hysteresis
//! - The monitor loop tying one cycle together

pub mod alerts;
pub mod monitor;
pub mod repair;
pub mod sequencer;
pub mod tiers;

pub use monitor::{plex_recovery, CyclePlan, CycleReport, Monitor, PlexRecovery};
pub use repair::{RepairAction, RepairOutcome, Repairer};
pub use sequencer::{exit_code, step_key, Hysteresis, Sequencer, StepResult, TierPolicy, TierReport};
pub use tiers::{Check, DiagnosticStep};
