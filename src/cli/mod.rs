//! mediawatch CLI
//!
//! Commands:
//! - `mediawatch monitor` - Run the monitoring loop until stopped
//! - `mediawatch once` - Run selected cycle steps a single time
//! - `mediawatch diagnose` - Walk one or all severity tiers
//! - `mediawatch proxy-conf` / `ddns` - Single repairs
//! - `mediawatch status` - Latest snapshot and alert state

pub mod diagnose;
pub mod maintenance;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::adapters::Notifier;
use crate::config::AppConfig;
use crate::domain::{RepairMode, Severity};
use crate::services::Services;
use crate::supervisor::Monitor;

/// Media server health checks and repairs
#[derive(Parser, Debug)]
#[command(name = "mediawatch")]
#[command(author, version, about = "Severity-tiered health checks and repairs for a home media server")]
pub struct Cli {
    /// Directory holding default.toml and per-environment overrides
    #[arg(long, global = true, env = "MEDIAWATCH_CONFIG_DIR", default_value = "config")]
    pub config_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the monitoring loop until SIGINT/SIGTERM
    Monitor,

    /// Run the selected steps once (all of them when none is selected)
    Once {
        /// Quick check and alert evaluation
        #[arg(long)]
        alerts: bool,
        /// Deluge binding verification, diagnose only
        #[arg(long)]
        deluge_verify: bool,
        /// Deluge binding verification with repair
        #[arg(long)]
        deluge_repair: bool,
        /// Plex recovery when it is offline
        #[arg(long)]
        plex_online: bool,
        /// Ignore the Plex cooldown and offline gate
        #[arg(long)]
        force: bool,
    },

    /// Run a severity tier, or every tier
    Diagnose {
        #[arg(value_enum)]
        tier: TierArg,
        /// Dispatch the repair bound to a failing step
        #[arg(long)]
        repair: bool,
        /// Let repairs change things
        #[arg(long)]
        apply: bool,
        /// Force preview even when the configuration applies
        #[arg(long, conflicts_with = "apply")]
        dry_run: bool,
        /// Override the configured repair mode
        #[arg(long, value_enum)]
        mode: Option<RepairMode>,
        /// Ignore the Plex cooldown in `always` mode
        #[arg(long)]
        force: bool,
    },

    /// Make sure the reverse-proxy config exists and passes `nginx -t`
    ProxyConf {
        #[arg(long)]
        apply: bool,
    },

    /// Point the DDNS record at the current public IP
    Ddns {
        #[arg(long)]
        apply: bool,
        /// Update even when the record already matches
        #[arg(long)]
        force: bool,
    },

    /// Print the latest snapshot and alert state
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TierArg {
    Sev0,
    Sev1,
    Sev2,
    Sev3,
    All,
}

impl TierArg {
    pub fn severities(self) -> Vec<Severity> {
        match self {
            TierArg::Sev0 => vec![Severity::Sev0],
            TierArg::Sev1 => vec![Severity::Sev1],
            TierArg::Sev2 => vec![Severity::Sev2],
            TierArg::Sev3 => vec![Severity::Sev3],
            TierArg::All => Severity::ALL.to_vec(),
        }
    }
}

impl Commands {
    /// Run the command and return the process exit status
    /// `config_problems` were already logged at startup; they are sent to the
    /// notifier once it exists.
    pub async fn run(
        self,
        config: Arc<AppConfig>,
        config_problems: &[String],
        stop: Arc<AtomicBool>,
    ) -> Result<i32> {
        if let Self::Status = self {
            return maintenance::status(&config).await;
        }

        let services = Services::from_config(&config)?;
        notify_config_problems(services.notifier.as_ref(), config_problems).await;
        match self {
            Self::Monitor => {
                Monitor::new(config, services, stop).run().await;
                Ok(0)
            }
            Self::Once {
                alerts,
                deluge_verify,
                deluge_repair,
                plex_online,
                force,
            } => {
                let selection = diagnose::OnceSelection {
                    alerts,
                    deluge_verify,
                    deluge_repair,
                    plex_online,
                    force,
                };
                diagnose::once(config, services, stop, selection).await
            }
            Self::Diagnose {
                tier,
                repair,
                apply,
                dry_run,
                mode,
                force,
            } => {
                let options = diagnose::DiagnoseOptions {
                    tiers: tier.severities(),
                    repair,
                    apply,
                    dry_run,
                    mode,
                    force,
                };
                diagnose::diagnose(&config, &services, options).await
            }
            Self::ProxyConf { apply } => maintenance::proxy_conf(&config, &services, apply).await,
            Self::Ddns { apply, force } => maintenance::ddns(&config, &services, apply, force).await,
            Self::Status => maintenance::status(&config).await,
        }
    }
}

async fn notify_config_problems(notifier: &dyn Notifier, problems: &[String]) {
    if problems.is_empty() {
        return;
    }
    notifier
        .send(&format!(
            "\u{26a0}\u{fe0f} mediawatch configuration problems:\n{}",
            problems.join("\n")
        ))
        .await;
}
