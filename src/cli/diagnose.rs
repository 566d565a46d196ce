//! `once` and `diagnose` commands

use anyhow::Result;
use chrono::Utc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::domain::{FailureCode, RepairMode, Severity};
use crate::persistence::{AlertStateStore, PLEX_AUTOREPAIR_KEY};
use crate::probes::ProbeOutcome;
use crate::services::Services;
use crate::supervisor::{
    exit_code, CyclePlan, CycleReport, Monitor, RepairAction, RepairOutcome, Sequencer,
    TierPolicy, TierReport,
};

/// Steps picked on the `once` command line
#[derive(Debug, Clone, Copy, Default)]
pub struct OnceSelection {
    pub alerts: bool,
    pub deluge_verify: bool,
    pub deluge_repair: bool,
    pub plex_online: bool,
    pub force: bool,
}

impl OnceSelection {
    fn any_step(&self) -> bool {
        self.alerts || self.deluge_verify || self.deluge_repair || self.plex_online
    }

    pub fn plan(&self, config: &AppConfig) -> CyclePlan {
        if !self.any_step() {
            return CyclePlan {
                tiers: false,
                paced: false,
                force: self.force,
                ..CyclePlan::monitor(config)
            };
        }
        CyclePlan {
            quick_check: self.alerts,
            alerts: self.alerts,
            deluge_verify: self.deluge_verify || self.deluge_repair,
            deluge_repair: self.deluge_repair,
            plex_recovery: self.plex_online,
            force: self.force,
            ..CyclePlan::empty()
        }
    }
}

pub async fn once(
    config: Arc<AppConfig>,
    services: Services,
    stop: Arc<AtomicBool>,
    selection: OnceSelection,
) -> Result<i32> {
    let plan = selection.plan(&config);
    let mut monitor = Monitor::new(config, services, stop);
    let report = monitor.run_cycle(&plan, Utc::now()).await?;
    print_cycle(&report);
    Ok(report.exit_code())
}

/// Options for `diagnose`
#[derive(Debug, Clone)]
pub struct DiagnoseOptions {
    pub tiers: Vec<Severity>,
    pub repair: bool,
    pub apply: bool,
    pub dry_run: bool,
    pub mode: Option<RepairMode>,
    pub force: bool,
}

pub async fn diagnose(config: &AppConfig, services: &Services, opts: DiagnoseOptions) -> Result<i32> {
    let mode = opts.mode.unwrap_or(config.repair.mode);
    let apply = (opts.apply || config.repair.apply) && !opts.dry_run;
    let repair = opts.repair && mode != RepairMode::Never;
    let policy = if opts.tiers.len() > 1 {
        TierPolicy::All
    } else {
        TierPolicy::FirstUnhealthy
    };

    let sequencer = Sequencer::new(config, services, repair, apply);
    let reports = sequencer.run_tiers(&opts.tiers, policy).await;
    for report in &reports {
        print_tier(report);
    }

    let mut exercised = None;
    let sev0_clean = reports
        .iter()
        .any(|r| r.severity == Severity::Sev0 && r.is_clean());
    if repair && mode == RepairMode::Always && sev0_clean {
        exercised = exercise_plex_repair(config, &sequencer, opts.force).await;
        if let Some(outcome) = &exercised {
            println!("  plex repair path: {}", outcome);
        }
    }

    let code = exit_code(&reports);
    let repair_failed = reports.iter().any(TierReport::repair_failed)
        || exercised.as_ref().is_some_and(RepairOutcome::is_failure);
    Ok(if code == 0 && repair_failed { 1 } else { code })
}

/// Restart Plex on a healthy server to prove the repair path, honouring the cooldown
async fn exercise_plex_repair(
    config: &AppConfig,
    sequencer: &Sequencer<'_>,
    force: bool,
) -> Option<RepairOutcome> {
    let now = Utc::now();
    let mut store = AlertStateStore::load(&config.monitor.alert_state_path).await;
    let cooldown = Duration::from_secs(config.plex.cooldown_secs);
    if !force && !store.cooldown_elapsed(PLEX_AUTOREPAIR_KEY, cooldown, now) {
        println!("  plex repair path: skipped, cooldown active (use --force)");
        return None;
    }
    store.mark_triggered(PLEX_AUTOREPAIR_KEY, now);
    store.save().await;
    Some(
        sequencer
            .repairer()
            .run(&RepairAction::RestartContainer {
                code: FailureCode::P002,
                container: config.containers.plex.clone(),
            })
            .await,
    )
}

fn outcome_marker(outcome: &ProbeOutcome) -> &'static str {
    match outcome {
        ProbeOutcome::Ok(_) => "\x1b[32m\u{2713}\x1b[0m",
        ProbeOutcome::Degraded(_) => "\x1b[33m~\x1b[0m",
        ProbeOutcome::Fail(_) => "\x1b[31m\u{2717}\x1b[0m",
        ProbeOutcome::Unknown(_) => "\x1b[33m?\x1b[0m",
    }
}

fn print_tier(report: &TierReport) {
    println!(
        "\n\x1b[36m{} {}\x1b[0m",
        report.severity.emoji(),
        report.severity
    );
    for step in &report.steps {
        print!(
            "  {} [{}] {:<18} {}",
            outcome_marker(&step.outcome),
            step.code,
            step.name,
            step.outcome
        );
        match &step.repair {
            Some(repair) => println!("  -> {}", repair),
            None => println!(),
        }
    }
    match report.aborted_at {
        Some(code) => println!("  \x1b[31maborted at {}\x1b[0m", code),
        None if report.is_clean() => println!("  \x1b[32mclean\x1b[0m"),
        None => println!("  \x1b[33munhealthy\x1b[0m"),
    }
}

fn print_cycle(report: &CycleReport) {
    if let Some(snap) = &report.snapshot {
        let running = snap.containers.values().filter(|r| **r).count();
        println!(
            "snapshot {}: {}/{} containers running, plex local {}",
            snap.timestamp.to_rfc3339(),
            running,
            snap.containers.len(),
            if snap.plex.local_accessible { "up" } else { "down" }
        );
    }
    for (key, eval) in &report.evaluations {
        match eval.transition {
            Some(t) => println!("  {:<14} {} -> {}", key, t.from, t.to),
            None => println!("  {:<14} {}", key, eval.status),
        }
    }
    if let Some(verification) = &report.verification {
        print_tier(verification);
    }
    if let Some(recovery) = &report.plex_recovery {
        print_tier(&recovery.report);
        if let Some(outcome) = &recovery.exercised {
            println!("  plex repair path: {}", outcome);
        }
    }
    for tier in &report.tiers {
        print_tier(tier);
    }
}
