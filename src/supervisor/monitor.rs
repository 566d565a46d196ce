//! Monitor loop
//!
//! One cycle: quick check, alert evaluation, Deluge verification, gated Plex
//! recovery and the severity tiers, with a pause between the steps. Cycles
//! never overlap and an error only ends the cycle it happened in; the loop
//! itself stops only when the stop flag is raised.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use super::alerts::{self, PLEX_LOCAL};
use super::repair::{RepairAction, RepairOutcome};
use super::sequencer::{Hysteresis, Sequencer, TierPolicy, TierReport};
use crate::collector::Collector;
use crate::config::AppConfig;
use crate::domain::{Evaluation, FailureCode, HealthSnapshot, RepairMode, Scope, Severity};
use crate::error::{Result, WatchError};
use crate::persistence::{AlertStateStore, SnapshotLog, PLEX_AUTOREPAIR_KEY};
use crate::services::Services;

/// Longest single sleep between two looks at the stop flag
const STOP_POLL: Duration = Duration::from_secs(1);

/// Which steps a cycle runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CyclePlan {
    pub quick_check: bool,
    pub alerts: bool,
    pub deluge_verify: bool,
    /// Let the verification dispatch its repairs
    pub deluge_repair: bool,
    pub plex_recovery: bool,
    /// Bypass the Plex cooldown and offline gate
    pub force: bool,
    pub tiers: bool,
    /// Escalate tier failures only once the alert store confirms them
    pub confirm: bool,
    /// Sleep `step_delay` between steps
    pub paced: bool,
}

impl CyclePlan {
    /// The full cycle run by `monitor`
    pub fn monitor(config: &AppConfig) -> Self {
        Self {
            quick_check: true,
            alerts: true,
            deluge_verify: true,
            deluge_repair: config.repair.mode != RepairMode::Never,
            plex_recovery: true,
            force: false,
            tiers: config.monitor.run_tiers,
            confirm: true,
            paced: true,
        }
    }

    /// Nothing selected
    pub fn empty() -> Self {
        Self {
            quick_check: false,
            alerts: false,
            deluge_verify: false,
            deluge_repair: false,
            plex_recovery: false,
            force: false,
            tiers: false,
            confirm: false,
            paced: false,
        }
    }
}

/// Outcome of the gated Plex recovery
#[derive(Debug, Clone)]
pub struct PlexRecovery {
    pub report: TierReport,
    /// Restart dispatched on a healthy server in `always` mode
    pub exercised: Option<RepairOutcome>,
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub snapshot: Option<HealthSnapshot>,
    pub evaluations: Vec<(&'static str, Evaluation)>,
    pub verification: Option<TierReport>,
    pub plex_recovery: Option<PlexRecovery>,
    pub tiers: Vec<TierReport>,
}

impl CycleReport {
    /// 0 when every selected step passed, 1 when a verification or repair failed
    pub fn exit_code(&self) -> i32 {
        let verify_failed = self
            .verification
            .as_ref()
            .is_some_and(|r| !r.is_clean() || r.repair_failed());
        let recovery_failed = self.plex_recovery.as_ref().is_some_and(|p| {
            p.report.repair_failed() || p.exercised.as_ref().is_some_and(RepairOutcome::is_failure)
        });
        let tier_failed = self.tiers.iter().any(|r| !r.is_clean());
        i32::from(verify_failed || recovery_failed || tier_failed)
    }
}

pub struct Monitor {
    config: Arc<AppConfig>,
    services: Services,
    collector: Collector,
    log: SnapshotLog,
    stop: Arc<AtomicBool>,
}

impl Monitor {
    pub fn new(config: Arc<AppConfig>, services: Services, stop: Arc<AtomicBool>) -> Self {
        let log = SnapshotLog::new(
            config.monitor.snapshot_path.clone(),
            config.monitor.snapshot_retention,
        );
        Self {
            config,
            services,
            collector: Collector::new(),
            log,
            stop,
        }
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Run cycles until the stop flag is raised
    pub async fn run(&mut self) {
        let plan = CyclePlan::monitor(&self.config);
        let interval = self.config.monitor.interval();
        info!(
            interval_secs = interval.as_secs(),
            mode = %self.config.repair.mode,
            apply = self.config.repair.apply,
            "monitor started"
        );
        self.services
            .notifier
            .send("\u{25b6}\u{fe0f} mediawatch monitor started")
            .await;

        while !self.stopped() {
            let started = Instant::now();
            match self.run_cycle(&plan, Utc::now()).await {
                Ok(report) => debug!(
                    exit_code = report.exit_code(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "cycle complete"
                ),
                Err(WatchError::Cancelled) => break,
                Err(e) => {
                    error!(error = %e, "cycle failed");
                    self.services
                        .notifier
                        .send(&format!("\u{26a0}\u{fe0f} monitor cycle failed: {}", e))
                        .await;
                }
            }

            let remaining = interval.saturating_sub(started.elapsed());
            if self.pause(remaining).await.is_err() {
                break;
            }
        }
        info!("monitor stopped");
    }

    /// Sleep in short slices; Err(Cancelled) as soon as the stop flag is seen
    async fn pause(&self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            if self.stopped() {
                return Err(WatchError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            sleep(STOP_POLL.min(deadline - now)).await;
        }
    }

    async fn step_pause(&self, plan: &CyclePlan) -> Result<()> {
        if plan.paced {
            self.pause(self.config.monitor.step_delay()).await
        } else {
            Ok(())
        }
    }

    pub async fn run_cycle(&mut self, plan: &CyclePlan, now: DateTime<Utc>) -> Result<CycleReport> {
        let config = self.config.clone();
        let mut report = CycleReport::default();

        if plan.quick_check {
            let snap = self.collector.collect(&config, &self.services, now).await;
            if let Err(e) = self.log.append(&snap).await {
                warn!(path = %self.log.path().display(), error = %e, "snapshot not persisted");
                self.services
                    .notifier
                    .send(&format!("\u{26a0}\u{fe0f} health log not written: {}", e))
                    .await;
            }
            report.snapshot = Some(snap);
            self.step_pause(plan).await?;
        }

        let mut store = AlertStateStore::load(&config.monitor.alert_state_path).await;

        if plan.alerts {
            let latest = match &report.snapshot {
                Some(snap) => Some(snap.clone()),
                None => self.log.latest().await,
            };
            match latest {
                Some(snap) => {
                    report.evaluations = alerts::evaluate(
                        &mut store,
                        &snap,
                        &config.containers,
                        &config.alerts,
                        self.services.notifier.as_ref(),
                    )
                    .await;
                    store.save().await;
                }
                None => info!("no snapshot yet, alert evaluation skipped"),
            }
            self.step_pause(plan).await?;
        }

        let mode = config.repair.mode;
        let apply = config.repair.apply;
        let thresholds = config.alerts.thresholds(Scope::Local);

        if plan.deluge_verify {
            let repair = plan.deluge_repair && mode != RepairMode::Never;
            let sequencer = Sequencer::new(&config, &self.services, repair, apply);
            let verification = if plan.confirm {
                let mut gate = Hysteresis::new(&mut store, thresholds);
                sequencer.run_tier_confirmed(Severity::Sev1, &mut gate).await
            } else {
                sequencer.run_tier(Severity::Sev1).await
            };
            report.verification = Some(verification);
            if plan.confirm {
                store.save().await;
            }
        }

        if plan.plex_recovery {
            report.plex_recovery =
                plex_recovery(&config, &self.services, &mut store, mode, plan.force, now).await;
        }

        if plan.tiers {
            let gate = plan.confirm.then(|| Hysteresis::new(&mut store, thresholds));
            let tiers = self.tier_pass(&config, &report, gate, mode, apply).await;
            report.tiers = tiers;
            if plan.confirm {
                store.save().await;
            }
        }

        Ok(report)
    }

    /// First-unhealthy pass over every tier. SEV0 and SEV1 reuse this cycle's
    /// recovery and verification reports; their repairs belong to those gated steps.
    async fn tier_pass(
        &self,
        config: &AppConfig,
        report: &CycleReport,
        mut gate: Option<Hysteresis<'_>>,
        mode: RepairMode,
        apply: bool,
    ) -> Vec<TierReport> {
        let reuse = |severity: Severity| match severity {
            Severity::Sev0 => report.plex_recovery.as_ref().map(|p| p.report.clone()),
            Severity::Sev1 => report.verification.clone(),
            _ => None,
        };
        Sequencer::new(config, &self.services, mode != RepairMode::Never, apply)
            .repair_only(&[Severity::Sev2, Severity::Sev3])
            .run_tiers_with(&Severity::ALL, TierPolicy::FirstUnhealthy, reuse, gate.as_mut())
            .await
    }
}

/// Automatic Plex recovery. Runs only when `plex_local` is alerting (or the
/// mode is `always`) and the cooldown has elapsed, unless `force` is set.
pub async fn plex_recovery(
    config: &AppConfig,
    services: &Services,
    store: &mut AlertStateStore,
    mode: RepairMode,
    force: bool,
    now: DateTime<Utc>,
) -> Option<PlexRecovery> {
    if mode == RepairMode::Never && !force {
        return None;
    }

    let offline = store.status(PLEX_LOCAL).is_alerting();
    let wanted = offline || mode == RepairMode::Always;
    if !force {
        if !wanted {
            debug!("plex online, recovery not needed");
            return None;
        }
        let cooldown = Duration::from_secs(config.plex.cooldown_secs);
        if !store.cooldown_elapsed(PLEX_AUTOREPAIR_KEY, cooldown, now) {
            info!(cooldown_secs = config.plex.cooldown_secs, "plex recovery suppressed by cooldown");
            return None;
        }
    }

    store.mark_triggered(PLEX_AUTOREPAIR_KEY, now);
    store.save().await;
    info!(offline, force, mode = %mode, "plex recovery");
    if offline {
        services
            .notifier
            .send("\u{267b}\u{fe0f} Plex offline, starting recovery")
            .await;
    }

    let sequencer = Sequencer::new(config, services, true, config.repair.apply);
    let report = sequencer.run_tier(Severity::Sev0).await;

    let exercised = if report.is_clean() && mode == RepairMode::Always {
        Some(
            sequencer
                .repairer()
                .run(&RepairAction::RestartContainer {
                    code: FailureCode::P002,
                    container: config.containers.plex.clone(),
                })
                .await,
        )
    } else {
        None
    };

    Some(PlexRecovery { report, exercised })
}
