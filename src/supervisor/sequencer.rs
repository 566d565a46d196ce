//! Diagnostic sequencer
//!
//! Runs the steps of a tier strictly in order. The first failing terminal
//! step aborts the tier after notifying and dispatching its repair;
//! non-terminal failures are reported and the tier carries on.
//!
//! With a [`Hysteresis`] gate the sequencer escalates only confirmed
//! conditions: a step notifies and repairs when its key crosses the failure
//! threshold, and while it stays down only container restarts repeat.

use tracing::{debug, info, warn};

use super::repair::{RepairAction, RepairOutcome, Repairer};
use super::tiers::{self, DiagnosticStep};
use crate::config::AppConfig;
use crate::domain::{Evaluation, FailureCode, Severity, Thresholds};
use crate::persistence::AlertStateStore;
use crate::probes::ProbeOutcome;
use crate::services::Services;

/// How far a multi-tier run goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierPolicy {
    /// Stop after the first tier with a failure
    FirstUnhealthy,
    All,
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub name: &'static str,
    pub code: FailureCode,
    pub terminal: bool,
    pub outcome: ProbeOutcome,
    /// Set when the bound repair was dispatched
    pub repair: Option<RepairOutcome>,
}

impl StepResult {
    pub fn failed(&self) -> bool {
        !self.outcome.is_passing()
    }
}

#[derive(Debug, Clone)]
pub struct TierReport {
    pub severity: Severity,
    pub steps: Vec<StepResult>,
    /// Terminal step that cut the tier short
    pub aborted_at: Option<FailureCode>,
}

impl TierReport {
    pub fn is_clean(&self) -> bool {
        !self.steps.iter().any(StepResult::failed)
    }

    /// 1-based position of the first failing step
    pub fn first_failure(&self) -> Option<(usize, &StepResult)> {
        self.steps
            .iter()
            .enumerate()
            .find(|(_, step)| step.failed())
            .map(|(i, step)| (i + 1, step))
    }

    /// Process exit status for this tier: 0 when clean, else the failing ordinal
    pub fn exit_code(&self) -> i32 {
        self.first_failure().map(|(ordinal, _)| ordinal as i32).unwrap_or(0)
    }

    pub fn repair_failed(&self) -> bool {
        self.steps
            .iter()
            .any(|s| s.repair.as_ref().is_some_and(RepairOutcome::is_failure))
    }

    pub fn repairs_invoked(&self) -> usize {
        self.steps.iter().filter(|s| s.repair.is_some()).count()
    }
}

/// Exit status for several tiers: the first unhealthy tier decides
pub fn exit_code(reports: &[TierReport]) -> i32 {
    reports
        .iter()
        .map(TierReport::exit_code)
        .find(|code| *code != 0)
        .unwrap_or(0)
}

/// Alert store key for a diagnostic step
pub fn step_key(code: FailureCode) -> String {
    format!("tier_{}", code)
}

/// Feeds step outcomes through the alert store so only confirmed
/// conditions escalate
pub struct Hysteresis<'s> {
    store: &'s mut AlertStateStore,
    thresholds: Thresholds,
}

impl<'s> Hysteresis<'s> {
    pub fn new(store: &'s mut AlertStateStore, thresholds: Thresholds) -> Self {
        Self { store, thresholds }
    }

    fn observe(&mut self, code: FailureCode, outcome: &ProbeOutcome) -> Evaluation {
        self.store.evaluate(&step_key(code), outcome, self.thresholds)
    }
}

pub struct Sequencer<'a> {
    config: &'a AppConfig,
    services: &'a Services,
    repairer: Repairer<'a>,
    repair: bool,
    /// Tiers allowed to repair; all of them when unset
    repair_scope: Option<&'a [Severity]>,
}

impl<'a> Sequencer<'a> {
    /// `repair` dispatches bound repairs on failure; `apply` lets them change things
    pub fn new(config: &'a AppConfig, services: &'a Services, repair: bool, apply: bool) -> Self {
        Self {
            config,
            services,
            repairer: Repairer::new(config, services, apply),
            repair,
            repair_scope: None,
        }
    }

    /// Restrict repairs to `tiers`; the others only diagnose
    pub fn repair_only(mut self, tiers: &'a [Severity]) -> Self {
        self.repair_scope = Some(tiers);
        self
    }

    pub fn repairer(&self) -> &Repairer<'a> {
        &self.repairer
    }

    fn repairs(&self, severity: Severity) -> bool {
        self.repair && self.repair_scope.map_or(true, |scope| scope.contains(&severity))
    }

    pub async fn run_tier(&self, severity: Severity) -> TierReport {
        self.run_steps(severity, tiers::steps(severity, self.config)).await
    }

    /// Run a tier, escalating only failures the gate confirms
    pub async fn run_tier_confirmed(&self, severity: Severity, gate: &mut Hysteresis<'_>) -> TierReport {
        self.run_gated(severity, tiers::steps(severity, self.config), Some(gate))
            .await
    }

    pub async fn run_tiers(&self, tiers: &[Severity], policy: TierPolicy) -> Vec<TierReport> {
        self.run_tiers_with(tiers, policy, |_| None, None).await
    }

    /// As [`run_tiers`](Self::run_tiers), taking a tier's report from `reuse`
    /// when it already ran this cycle and gating the rest through `gate`
    pub async fn run_tiers_with<F>(
        &self,
        tiers: &[Severity],
        policy: TierPolicy,
        mut reuse: F,
        mut gate: Option<&mut Hysteresis<'_>>,
    ) -> Vec<TierReport>
    where
        F: FnMut(Severity) -> Option<TierReport>,
    {
        let mut reports = Vec::with_capacity(tiers.len());
        for severity in tiers {
            let report = match reuse(*severity) {
                Some(report) => {
                    debug!(tier = %severity, "reusing this cycle's report");
                    report
                }
                None => {
                    let steps = tiers::steps(*severity, self.config);
                    self.run_gated(*severity, steps, gate.as_deref_mut()).await
                }
            };
            let clean = report.is_clean();
            reports.push(report);
            if !clean && policy == TierPolicy::FirstUnhealthy {
                info!(tier = %severity, "stopping at first unhealthy tier");
                break;
            }
        }
        reports
    }

    pub async fn run_steps(&self, severity: Severity, steps: Vec<DiagnosticStep>) -> TierReport {
        self.run_gated(severity, steps, None).await
    }

    async fn run_gated(
        &self,
        severity: Severity,
        steps: Vec<DiagnosticStep>,
        mut gate: Option<&mut Hysteresis<'_>>,
    ) -> TierReport {
        debug!(tier = %severity, steps = steps.len(), gated = gate.is_some(), "entering tier");
        let mut report = TierReport {
            severity,
            steps: Vec::with_capacity(steps.len()),
            aborted_at: None,
        };

        for step in steps {
            let outcome = step.check.run(self.config, self.services).await;
            debug!(tier = %severity, step = step.name, code = %step.code, outcome = %outcome, "step");

            let mut result = StepResult {
                name: step.name,
                code: step.code,
                terminal: step.terminal,
                outcome,
                repair: None,
            };

            match gate.as_deref_mut() {
                Some(gate) => self.escalate_confirmed(severity, &step, &mut result, gate).await,
                None => self.escalate(severity, &step, &mut result).await,
            }

            let abort = step.terminal && result.failed();
            report.steps.push(result);
            if abort {
                report.aborted_at = Some(step.code);
                break;
            }
        }

        match report.first_failure() {
            None => info!(tier = %severity, "tier clean"),
            Some((ordinal, step)) => info!(
                tier = %severity,
                code = %step.code,
                ordinal,
                aborted = report.aborted_at.is_some(),
                "tier unhealthy"
            ),
        }
        report
    }

    /// Notify on any non-passing result and repair hard failures
    async fn escalate(&self, severity: Severity, step: &DiagnosticStep, result: &mut StepResult) {
        match &result.outcome {
            ProbeOutcome::Ok(_) => {}
            ProbeOutcome::Degraded(reason) => {
                warn!(tier = %severity, code = %step.code, reason = %reason, "degraded");
                self.notify(severity, step.code, reason).await;
            }
            ProbeOutcome::Unknown(reason) => {
                warn!(tier = %severity, code = %step.code, reason = %reason, "could not determine");
                self.notify(
                    severity,
                    step.code,
                    &format!("could not be determined: {}", reason),
                )
                .await;
            }
            ProbeOutcome::Fail(reason) => {
                warn!(tier = %severity, code = %step.code, terminal = step.terminal, reason = %reason, "check failed");
                self.notify(severity, step.code, reason).await;
                result.repair = self.dispatch(severity, step).await;
            }
        }
    }

    async fn escalate_confirmed(
        &self,
        severity: Severity,
        step: &DiagnosticStep,
        result: &mut StepResult,
        gate: &mut Hysteresis<'_>,
    ) {
        let evaluation = gate.observe(step.code, &result.outcome);
        match evaluation.transition {
            Some(t) if t.to.is_alerting() => self.escalate(severity, step, result).await,
            Some(_) => {
                info!(tier = %severity, code = %step.code, "recovered");
                self.services
                    .notifier
                    .send(&format!(
                        "\u{2705} {} [{}] {}: recovered",
                        severity,
                        step.code,
                        step.code.description()
                    ))
                    .await;
            }
            None if evaluation.status.is_alerting() => {
                if matches!(result.outcome, ProbeOutcome::Fail(_))
                    && matches!(step.repair, Some(RepairAction::RestartContainer { .. }))
                {
                    result.repair = self.dispatch(severity, step).await;
                }
            }
            None => {
                if result.failed() {
                    debug!(tier = %severity, code = %step.code, outcome = %result.outcome, "failure not yet confirmed");
                }
            }
        }
    }

    async fn dispatch(&self, severity: Severity, step: &DiagnosticStep) -> Option<RepairOutcome> {
        if !self.repairs(severity) {
            return None;
        }
        match &step.repair {
            Some(action) => Some(self.repairer.run(action).await),
            None => None,
        }
    }

    async fn notify(&self, severity: Severity, code: FailureCode, reason: &str) {
        let text = format!(
            "{} {} [{}] {}: {}",
            severity.emoji(),
            severity,
            code,
            code.description(),
            reason
        );
        self.services.notifier.send(&text).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fakes;
    use std::sync::atomic::Ordering;

    fn count(fakes: &Fakes, needle: &str) -> usize {
        fakes
            .notifier
            .messages()
            .iter()
            .filter(|m| m.contains(needle))
            .count()
    }

    #[tokio::test]
    async fn test_vpn_down_short_circuits_sev1() {
        let fakes = Fakes::healthy();
        fakes.containers.set_running("vpn", false);
        let config = AppConfig::default();

        let report = Sequencer::new(&config, &fakes.services, true, false)
            .run_tier(Severity::Sev1)
            .await;

        assert_eq!(report.aborted_at, Some(FailureCode::D001));
        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.repairs_invoked(), 1);
        assert_eq!(report.steps[0].repair, Some(RepairOutcome::NotifyOnly));
        assert_eq!(report.exit_code(), 1);
        assert_eq!(fakes.torrent.connects(), 0);
        assert!(fakes.notifier.any_contains("D-001"));
        assert!(fakes
            .containers
            .calls()
            .iter()
            .all(|c| c != "is_running deluge"));
    }

    #[tokio::test]
    async fn test_rpc_down_restarts_deluge_in_preview() {
        let fakes = Fakes::healthy();
        fakes
            .torrent
            .reachable
            .store(false, std::sync::atomic::Ordering::SeqCst);
        let config = AppConfig::default();

        let report = Sequencer::new(&config, &fakes.services, true, false)
            .run_tier(Severity::Sev1)
            .await;

        assert_eq!(report.aborted_at, Some(FailureCode::D003));
        assert_eq!(report.exit_code(), 3);
        assert!(matches!(report.steps[2].repair, Some(RepairOutcome::Preview(_))));
        assert_eq!(fakes.containers.count("restart deluge"), 0);
    }

    #[tokio::test]
    async fn test_non_terminal_failure_continues() {
        let fakes = Fakes::healthy();
        fakes.radarr.set_status(Err("connection refused".into()));
        let config = AppConfig::default();

        let report = Sequencer::new(&config, &fakes.services, true, true)
            .run_tier(Severity::Sev2)
            .await;

        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.aborted_at, None);
        assert!(!report.is_clean());
        assert_eq!(report.exit_code(), 1);
        assert_eq!(fakes.containers.count("restart radarr"), 1);
        assert_eq!(fakes.containers.count("restart sonarr"), 0);
    }

    #[tokio::test]
    async fn test_diagnose_only_never_repairs() {
        let fakes = Fakes::healthy();
        fakes.plex.set_up(false);
        let config = AppConfig::default();

        let report = Sequencer::new(&config, &fakes.services, false, true)
            .run_tier(Severity::Sev0)
            .await;

        assert_eq!(report.aborted_at, Some(FailureCode::P002));
        assert_eq!(report.repairs_invoked(), 0);
        assert_eq!(fakes.containers.count("restart plex"), 0);
        assert!(fakes.notifier.any_contains("[P-002]"));
    }

    #[tokio::test]
    async fn test_first_unhealthy_policy() {
        let fakes = Fakes::healthy();
        fakes.containers.set_running("sonarr", false);
        fakes.sonarr.set_status(Err("connection refused".into()));
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.proxy.config_path = dir.path().join("plex.conf");
        std::fs::write(&config.proxy.config_path, "server {}").unwrap();
        config.deluge.core_conf_path = dir.path().join("core.conf");
        std::fs::write(
            &config.deluge.core_conf_path,
            r#"{"file":1,"format":1}{"listen_interface":"10.8.0.5","outgoing_interface":"10.8.0.5"}"#,
        )
        .unwrap();

        let sequencer = Sequencer::new(&config, &fakes.services, false, false);
        let first = sequencer
            .run_tiers(&Severity::ALL, TierPolicy::FirstUnhealthy)
            .await;
        assert_eq!(
            first.iter().map(|r| r.severity).collect::<Vec<_>>(),
            vec![Severity::Sev0, Severity::Sev1, Severity::Sev2]
        );
        assert_eq!(exit_code(&first), 2);

        let all = sequencer.run_tiers(&Severity::ALL, TierPolicy::All).await;
        assert_eq!(all.len(), 4);
        assert!(!all[3].is_clean());
    }

    #[tokio::test]
    async fn test_gate_escalates_only_confirmed_failures() {
        let fakes = Fakes::healthy();
        fakes.torrent.reachable.store(false, Ordering::SeqCst);
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.deluge.core_conf_path = dir.path().join("core.conf");
        std::fs::write(
            &config.deluge.core_conf_path,
            r#"{"file":1,"format":1}{"listen_interface":"10.8.0.5","outgoing_interface":"10.8.0.5"}"#,
        )
        .unwrap();
        let mut store = AlertStateStore::load(dir.path().join("alert_state.json")).await;
        let thresholds = Thresholds::new(3, 2);
        let sequencer = Sequencer::new(&config, &fakes.services, true, true);

        for _ in 0..2 {
            let mut gate = Hysteresis::new(&mut store, thresholds);
            let report = sequencer.run_tier_confirmed(Severity::Sev1, &mut gate).await;
            assert_eq!(report.aborted_at, Some(FailureCode::D003));
            assert_eq!(report.repairs_invoked(), 0);
        }
        assert!(fakes.notifier.messages().is_empty());
        assert_eq!(fakes.containers.count("restart deluge"), 0);

        let mut gate = Hysteresis::new(&mut store, thresholds);
        let confirmed = sequencer.run_tier_confirmed(Severity::Sev1, &mut gate).await;
        assert_eq!(confirmed.repairs_invoked(), 1);
        assert_eq!(fakes.containers.count("restart deluge"), 1);
        assert_eq!(count(&fakes, "SEV1 [D-003]"), 1);

        // Still down: the restart repeats, the alert does not
        let mut gate = Hysteresis::new(&mut store, thresholds);
        sequencer.run_tier_confirmed(Severity::Sev1, &mut gate).await;
        assert_eq!(fakes.containers.count("restart deluge"), 2);
        assert_eq!(count(&fakes, "SEV1 [D-003]"), 1);
        assert!(store.status(&step_key(FailureCode::D003)).is_alerting());

        fakes.torrent.reachable.store(true, Ordering::SeqCst);
        for _ in 0..2 {
            let mut gate = Hysteresis::new(&mut store, thresholds);
            assert!(sequencer
                .run_tier_confirmed(Severity::Sev1, &mut gate)
                .await
                .is_clean());
        }
        assert_eq!(count(&fakes, "[D-003] Deluge"), 2);
        assert_eq!(count(&fakes, "recovered"), 1);
        assert!(!store.status(&step_key(FailureCode::D003)).is_alerting());
    }

    #[tokio::test]
    async fn test_gate_never_repeats_non_restart_repairs() {
        let fakes = Fakes::healthy();
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.proxy.config_path = dir.path().join("missing").join("plex.conf");
        let mut store = AlertStateStore::load(dir.path().join("alert_state.json")).await;
        let thresholds = Thresholds::new(1, 1);
        let sequencer = Sequencer::new(&config, &fakes.services, true, false);

        let mut gate = Hysteresis::new(&mut store, thresholds);
        let first = sequencer.run_tier_confirmed(Severity::Sev0, &mut gate).await;
        assert_eq!(first.aborted_at, Some(FailureCode::P006));
        assert_eq!(first.repairs_invoked(), 1);

        let mut gate = Hysteresis::new(&mut store, thresholds);
        let second = sequencer.run_tier_confirmed(Severity::Sev0, &mut gate).await;
        assert_eq!(second.aborted_at, Some(FailureCode::P006));
        assert_eq!(second.repairs_invoked(), 0);
        assert_eq!(count(&fakes, "SEV0 [P-006]"), 1);
    }

    #[tokio::test]
    async fn test_reused_reports_are_not_rerun() {
        let fakes = Fakes::healthy();
        fakes.containers.set_running("vpn", false);
        let config = AppConfig::default();
        let cached = TierReport {
            severity: Severity::Sev0,
            steps: Vec::new(),
            aborted_at: None,
        };

        let reports = Sequencer::new(&config, &fakes.services, false, false)
            .run_tiers_with(
                &Severity::ALL,
                TierPolicy::FirstUnhealthy,
                |severity| (severity == Severity::Sev0).then(|| cached.clone()),
                None,
            )
            .await;

        assert_eq!(reports.len(), 2);
        assert!(reports[0].steps.is_empty());
        assert_eq!(reports[1].aborted_at, Some(FailureCode::D001));
        assert_eq!(fakes.plex.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_repair_scope_limits_tiers() {
        let fakes = Fakes::healthy();
        fakes.plex.set_up(false);
        let config = AppConfig::default();

        let report = Sequencer::new(&config, &fakes.services, true, true)
            .repair_only(&[Severity::Sev2, Severity::Sev3])
            .run_tier(Severity::Sev0)
            .await;

        assert_eq!(report.aborted_at, Some(FailureCode::P002));
        assert_eq!(report.repairs_invoked(), 0);
        assert_eq!(fakes.containers.count("restart plex"), 0);
    }
}
