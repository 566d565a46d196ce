pub mod adapters;
pub mod cli;
pub mod collector;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod probes;
pub mod services;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use collector::Collector;
pub use config::AppConfig;
pub use domain::{
    AlertEntry, AlertStatus, FailureCode, HealthSnapshot, RepairMode, Severity, Thresholds,
};
pub use error::{Result, WatchError};
pub use persistence::{AlertStateStore, SnapshotLog};
pub use probes::ProbeOutcome;
pub use services::Services;
pub use supervisor::{
    CyclePlan, CycleReport, Monitor, RepairAction, RepairOutcome, Repairer, Sequencer,
    TierPolicy, TierReport,
};
