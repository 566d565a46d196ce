use clap::Parser;
use mediawatch::cli::Cli;
use mediawatch::config::AppConfig;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let (config, config_problems) = load_config(&cli.config_dir);
    let _guard = init_logging(&config);
    for problem in &config_problems {
        warn!("{}", problem);
    }

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("stop requested, finishing current step");
            stop.store(true, Ordering::SeqCst);
        });
    }

    let code = match cli.command.run(Arc::new(config), &config_problems, stop).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("error: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

/// Load and validate configuration. Invalid fields fall back to their
/// defaults; an unreadable configuration falls back entirely.
fn load_config(dir: &Path) -> (AppConfig, Vec<String>) {
    match AppConfig::load_from(dir) {
        Ok(mut config) => {
            let problems = config
                .sanitize()
                .into_iter()
                .map(|e| format!("invalid configuration: {}", e))
                .collect();
            (config, problems)
        }
        Err(e) => (
            AppConfig::default(),
            vec![format!(
                "configuration not loaded from {} ({}), continuing with built-in defaults",
                dir.display(),
                e
            )],
        ),
    }
}

fn init_logging(config: &AppConfig) -> Option<WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},mediawatch=debug", config.logging.level)));

    // `rolling::daily` panics if it cannot create the first file, so check writability first
    let mut guard = None;
    let file_layer = config.logging.directory.as_ref().and_then(|dir| {
        let probe = dir.join(".mediawatch_write_test");
        let writable = std::fs::create_dir_all(dir).is_ok()
            && std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&probe)
                .is_ok();
        if !writable {
            eprintln!(
                "Warning: cannot write to log directory {}, file logging disabled",
                dir.display()
            );
            return None;
        }
        let _ = std::fs::remove_file(&probe);

        let appender = tracing_appender::rolling::daily(dir, "mediawatch.log");
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        guard = Some(file_guard);
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true),
        )
    });

    let json_layer = config
        .logging
        .json
        .then(|| tracing_subscriber::fmt::layer().json().with_target(true));
    let console_layer = (!config.logging.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .with(file_layer)
        .init();

    guard
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
