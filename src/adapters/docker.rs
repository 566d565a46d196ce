//! Container control over the `docker` CLI
//!
//! Every call is a subprocess bounded by a timeout; a stuck daemon delays the
//! cycle but never hangs it.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Result, WatchError};

/// Output of a command run inside a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runtime control of named containers
#[async_trait]
pub trait ContainerControl: Send + Sync {
    /// True iff the container's runtime state is "running"
    async fn is_running(&self, name: &str) -> Result<bool>;

    async fn start(&self, name: &str) -> Result<()>;

    async fn stop(&self, name: &str) -> Result<()>;

    async fn restart(&self, name: &str) -> Result<()>;

    /// Run `argv` inside the container
    async fn exec(&self, name: &str, argv: &[&str]) -> Result<ExecOutput>;
}

/// `docker` subprocess implementation
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    timeout: Duration,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker", Duration::from_secs(20))
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<ExecOutput> {
        debug!(binary = %self.binary, ?args, "docker");

        let child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WatchError::Internal(format!("cannot run {}: {}", self.binary, e)))?;

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                WatchError::timeout(format!("docker {}", args.join(" ")), self.timeout.as_secs())
            })??;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    async fn run_checked(&self, container: &str, args: &[&str]) -> Result<ExecOutput> {
        let output = self.run(args).await?;
        if output.success() {
            Ok(output)
        } else {
            warn!(
                container,
                exit_code = output.exit_code,
                stderr = %output.stderr,
                "docker {} failed",
                args.first().copied().unwrap_or_default()
            );
            Err(WatchError::container(container, output.stderr))
        }
    }
}

#[async_trait]
impl ContainerControl for DockerCli {
    async fn is_running(&self, name: &str) -> Result<bool> {
        let output = self
            .run_checked(name, &["inspect", "-f", "{{.State.Running}}", name])
            .await?;
        Ok(output.stdout == "true")
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.run_checked(name, &["start", name]).await.map(|_| ())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.run_checked(name, &["stop", name]).await.map(|_| ())
    }

    async fn restart(&self, name: &str) -> Result<()> {
        self.run_checked(name, &["restart", name]).await.map(|_| ())
    }

    async fn exec(&self, name: &str, argv: &[&str]) -> Result<ExecOutput> {
        let mut args = Vec::with_capacity(argv.len() + 2);
        args.push("exec");
        args.push(name);
        args.extend_from_slice(argv);
        self.run(&args).await
    }
}

/// Parse the first IPv4 address out of `ip -4 -o addr show` output
pub fn parse_ipv4_from_ip_addr(output: &str) -> Option<String> {
    output.split_whitespace().skip_while(|tok| *tok != "inet").nth(1).and_then(|cidr| {
        let ip = cidr.split('/').next()?;
        ip.parse::<std::net::Ipv4Addr>().ok().map(|addr| addr.to_string())
    })
}
