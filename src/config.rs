use crate::domain::{RepairMode, Scope, Thresholds};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure, built once at process start
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub repair: RepairConfig,
    #[serde(default)]
    pub containers: ContainerNames,
    #[serde(default)]
    pub plex: PlexConfig,
    #[serde(default)]
    pub deluge: DelugeConfig,
    #[serde(default)]
    pub vpn: VpnConfig,
    #[serde(default)]
    pub arr: ArrConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between cycle starts
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Pause between the steps of one cycle
    #[serde(default = "default_step_delay")]
    pub step_delay_secs: u64,
    /// Health log (JSON array of snapshots)
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    /// Alert state (JSON object keyed by check name)
    #[serde(default = "default_alert_state_path")]
    pub alert_state_path: PathBuf,
    /// Maximum snapshots kept in the log (0 = unbounded)
    #[serde(default = "default_retention")]
    pub snapshot_retention: usize,
    /// Run the severity tiers after the verification step
    #[serde(default = "default_true")]
    pub run_tiers: bool,
    /// Run the speedtest every N cycles (0 = never)
    #[serde(default)]
    pub speedtest_every: u64,
    /// Command printing Ookla-style JSON
    #[serde(default = "default_speedtest_command")]
    pub speedtest_command: Vec<String>,
    /// Default timeout for probes that have no own setting
    #[serde(default = "default_timeout")]
    pub probe_timeout_secs: u64,
}

fn default_interval() -> u64 {
    300
}

fn default_step_delay() -> u64 {
    10
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("data/health_log.json")
}

fn default_alert_state_path() -> PathBuf {
    PathBuf::from("data/alert_state.json")
}

fn default_retention() -> usize {
    2880
}

fn default_true() -> bool {
    true
}

fn default_speedtest_command() -> Vec<String> {
    vec![
        "speedtest".to_string(),
        "--format=json".to_string(),
        "--accept-license".to_string(),
    ]
}

fn default_timeout() -> u64 {
    10
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            step_delay_secs: default_step_delay(),
            snapshot_path: default_snapshot_path(),
            alert_state_path: default_alert_state_path(),
            snapshot_retention: default_retention(),
            run_tiers: true,
            speedtest_every: 0,
            speedtest_command: default_speedtest_command(),
            probe_timeout_secs: default_timeout(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_secs(self.step_delay_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Hysteresis thresholds, split by local and external reachability
#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    #[serde(default = "default_fails")]
    pub local_fails_for_alert: u32,
    #[serde(default = "default_successes")]
    pub local_successes_to_clear: u32,
    #[serde(default = "default_fails")]
    pub external_fails_for_alert: u32,
    #[serde(default = "default_successes")]
    pub external_successes_to_clear: u32,
    /// Mount usage at which storage reports degraded
    #[serde(default = "default_disk_warn_percent")]
    pub disk_warn_percent: f64,
}

fn default_fails() -> u32 {
    3
}

fn default_successes() -> u32 {
    2
}

fn default_disk_warn_percent() -> f64 {
    90.0
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            local_fails_for_alert: default_fails(),
            local_successes_to_clear: default_successes(),
            external_fails_for_alert: default_fails(),
            external_successes_to_clear: default_successes(),
            disk_warn_percent: default_disk_warn_percent(),
        }
    }
}

impl AlertConfig {
    pub fn thresholds(&self, scope: Scope) -> Thresholds {
        match scope {
            Scope::Local => {
                Thresholds::new(self.local_fails_for_alert, self.local_successes_to_clear)
            }
            Scope::External => Thresholds::new(
                self.external_fails_for_alert,
                self.external_successes_to_clear,
            ),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RepairConfig {
    /// Repair policy for the automatic paths
    #[serde(default)]
    pub mode: RepairMode,
    /// Apply changes; when false every repair is a preview
    #[serde(default)]
    pub apply: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerNames {
    #[serde(default = "default_plex_container")]
    pub plex: String,
    #[serde(default = "default_deluge_container")]
    pub deluge: String,
    #[serde(default = "default_vpn_container")]
    pub vpn: String,
    #[serde(default = "default_radarr_container")]
    pub radarr: String,
    #[serde(default = "default_sonarr_container")]
    pub sonarr: String,
    #[serde(default = "default_nginx_container")]
    pub nginx: String,
    /// Further containers watched by the core-container sweep
    #[serde(default)]
    pub extra: Vec<String>,
}

fn default_plex_container() -> String {
    "plex".to_string()
}

fn default_deluge_container() -> String {
    "deluge".to_string()
}

fn default_vpn_container() -> String {
    "vpn".to_string()
}

fn default_radarr_container() -> String {
    "radarr".to_string()
}

fn default_sonarr_container() -> String {
    "sonarr".to_string()
}

fn default_nginx_container() -> String {
    "nginx".to_string()
}

impl Default for ContainerNames {
    fn default() -> Self {
        Self {
            plex: default_plex_container(),
            deluge: default_deluge_container(),
            vpn: default_vpn_container(),
            radarr: default_radarr_container(),
            sonarr: default_sonarr_container(),
            nginx: default_nginx_container(),
            extra: Vec::new(),
        }
    }
}

impl ContainerNames {
    /// Every container the quick check inspects, in a stable order
    pub fn core(&self) -> Vec<String> {
        let mut names = vec![
            self.vpn.clone(),
            self.deluge.clone(),
            self.plex.clone(),
            self.radarr.clone(),
            self.sonarr.clone(),
            self.nginx.clone(),
        ];
        for extra in &self.extra {
            if !names.contains(extra) {
                names.push(extra.clone());
            }
        }
        names
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlexConfig {
    /// LAN address of the media server
    #[serde(default = "default_plex_url")]
    pub local_url: String,
    /// Public address through the reverse proxy (external checks skipped when unset)
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default)]
    pub token: String,
    /// Minimum seconds between two automatic recovery runs
    #[serde(default = "default_plex_cooldown")]
    pub cooldown_secs: u64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_plex_url() -> String {
    "http://127.0.0.1:32400".to_string()
}

fn default_plex_cooldown() -> u64 {
    1800
}

impl Default for PlexConfig {
    fn default() -> Self {
        Self {
            local_url: default_plex_url(),
            public_url: None,
            token: String::new(),
            cooldown_secs: default_plex_cooldown(),
            timeout_secs: default_timeout(),
        }
    }
}

impl PlexConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DelugeConfig {
    /// Web JSON-RPC host
    #[serde(default = "default_localhost")]
    pub host: String,
    #[serde(default = "default_deluge_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default = "default_deluge_password")]
    pub password: String,
    /// Host path of Deluge's core.conf
    #[serde(default = "default_core_conf")]
    pub core_conf_path: PathBuf,
    /// URL fetched from inside the container; the body is the public IP
    #[serde(default = "default_ip_echo_url")]
    pub connectivity_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_localhost() -> String {
    "127.0.0.1".to_string()
}

fn default_deluge_port() -> u16 {
    8112
}

fn default_deluge_password() -> String {
    "deluge".to_string()
}

fn default_core_conf() -> PathBuf {
    PathBuf::from("/opt/deluge/config/core.conf")
}

fn default_ip_echo_url() -> String {
    "https://api.ipify.org".to_string()
}

impl Default for DelugeConfig {
    fn default() -> Self {
        Self {
            host: default_localhost(),
            port: default_deluge_port(),
            user: String::new(),
            password: default_deluge_password(),
            core_conf_path: default_core_conf(),
            connectivity_url: default_ip_echo_url(),
            timeout_secs: default_timeout(),
        }
    }
}

impl DelugeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VpnConfig {
    /// Tunnel device inside the VPN container
    #[serde(default = "default_tunnel_interface")]
    pub tunnel_interface: String,
}

fn default_tunnel_interface() -> String {
    "tun0".to_string()
}

impl Default for VpnConfig {
    fn default() -> Self {
        Self {
            tunnel_interface: default_tunnel_interface(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArrConfig {
    #[serde(default = "default_radarr_url")]
    pub radarr_url: String,
    #[serde(default)]
    pub radarr_api_key: String,
    #[serde(default = "default_sonarr_url")]
    pub sonarr_url: String,
    #[serde(default)]
    pub sonarr_api_key: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_radarr_url() -> String {
    "http://127.0.0.1:7878".to_string()
}

fn default_sonarr_url() -> String {
    "http://127.0.0.1:8989".to_string()
}

impl Default for ArrConfig {
    fn default() -> Self {
        Self {
            radarr_url: default_radarr_url(),
            radarr_api_key: String::new(),
            sonarr_url: default_sonarr_url(),
            sonarr_api_key: String::new(),
            timeout_secs: default_timeout(),
        }
    }
}

impl ArrConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Host path of the generated site config
    #[serde(default = "default_proxy_conf")]
    pub config_path: PathBuf,
    /// Public server name; falls back to the DNS domain
    #[serde(default)]
    pub server_name: Option<String>,
    /// Upstream as seen from the proxy container
    #[serde(default = "default_proxy_upstream")]
    pub upstream: String,
}

fn default_proxy_conf() -> PathBuf {
    PathBuf::from("/opt/nginx/conf.d/plex.conf")
}

fn default_proxy_upstream() -> String {
    "http://plex:32400".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            config_path: default_proxy_conf(),
            server_name: None,
            upstream: default_proxy_upstream(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DnsConfig {
    /// Fully qualified name checked against the public IP (DNS checks skipped when unset)
    #[serde(default)]
    pub domain: Option<String>,
    /// Provider subdomain (e.g. "myplex" for myplex.duckdns.org)
    #[serde(default)]
    pub subdomain: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_ddns_update_url")]
    pub update_url: String,
    #[serde(default = "default_ip_echo_url")]
    pub public_ip_url: String,
    /// Resolver as "ip:port"; system resolver when unset
    #[serde(default)]
    pub resolver: Option<String>,
    #[serde(default = "default_cert_warn_days")]
    pub cert_warn_days: i64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_ddns_update_url() -> String {
    "https://www.duckdns.org/update".to_string()
}

fn default_cert_warn_days() -> i64 {
    14
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            domain: None,
            subdomain: String::new(),
            token: String::new(),
            update_url: default_ddns_update_url(),
            public_ip_url: default_ip_echo_url(),
            resolver: None,
            cert_warn_days: default_cert_warn_days(),
            timeout_secs: default_timeout(),
        }
    }
}

impl DnsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    /// Discord webhook; notifications only go to the log when unset
    #[serde(default)]
    pub discord_webhook_url: Option<String>,
    #[serde(default = "default_notifier_username")]
    pub username: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_notifier_username() -> String {
    "mediawatch".to_string()
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            discord_webhook_url: None,
            username: default_notifier_username(),
            timeout_secs: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for the daily rolling log file
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            directory: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("repair.mode", "on-fail")?
            .set_default("repair.apply", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("MEDIAWATCH_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (MEDIAWATCH__PLEX__TOKEN, etc.)
            .add_source(
                Environment::with_prefix("MEDIAWATCH")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("containers.extra")
                    .with_list_parse_key("monitor.speedtest_command")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let errors = self.clone().sanitize();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Reset each invalid field to a safe value and describe what was reset.
    /// Valid fields are left alone.
    pub fn sanitize(&mut self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.monitor.interval_secs == 0 {
            self.monitor.interval_secs = default_interval();
            errors.push(format!(
                "monitor.interval_secs must be positive, using {}",
                self.monitor.interval_secs
            ));
        }

        if self.monitor.step_delay_secs.saturating_mul(2) > self.monitor.interval_secs {
            let delay = default_step_delay().min(self.monitor.interval_secs / 4);
            errors.push(format!(
                "monitor.step_delay_secs ({}) leaves no room in a {}s cycle, using {}",
                self.monitor.step_delay_secs, self.monitor.interval_secs, delay
            ));
            self.monitor.step_delay_secs = delay;
        }

        for (name, value, fallback) in [
            (
                "alerts.local_fails_for_alert",
                &mut self.alerts.local_fails_for_alert,
                default_fails(),
            ),
            (
                "alerts.local_successes_to_clear",
                &mut self.alerts.local_successes_to_clear,
                default_successes(),
            ),
            (
                "alerts.external_fails_for_alert",
                &mut self.alerts.external_fails_for_alert,
                default_fails(),
            ),
            (
                "alerts.external_successes_to_clear",
                &mut self.alerts.external_successes_to_clear,
                default_successes(),
            ),
        ] {
            if *value == 0 {
                *value = fallback;
                errors.push(format!("{name} must be at least 1, using {fallback}"));
            }
        }

        if self.dns.domain.is_some() && self.dns.subdomain.is_empty() {
            self.dns.domain = None;
            errors.push("dns.subdomain is required when dns.domain is set, DNS checks disabled".to_string());
        }

        if let Some(resolver) = &self.dns.resolver {
            if resolver.parse::<std::net::SocketAddr>().is_err() {
                errors.push(format!(
                    "dns.resolver '{resolver}' is not an ip:port pair, using the system resolver"
                ));
                self.dns.resolver = None;
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.repair.mode, RepairMode::OnFail);
        assert!(!config.repair.apply);
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let mut config = AppConfig::default();
        config.alerts.external_fails_for_alert = 0;
        let errors = config.validate().unwrap_err();
        assert!(errors[0].contains("external_fails_for_alert"));
    }

    #[test]
    fn test_step_delay_must_fit_interval() {
        let mut config = AppConfig::default();
        config.monitor.interval_secs = 10;
        config.monitor.step_delay_secs = 8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sanitize_resets_only_invalid_fields() {
        let mut config = AppConfig::default();
        config.dns.resolver = Some("1.1.1.1".to_string());
        config.notifier.discord_webhook_url = Some("https://discord.example/hook".to_string());
        config.containers.plex = "plexmediaserver".to_string();
        config.alerts.local_fails_for_alert = 0;

        let problems = config.sanitize();

        assert_eq!(problems.len(), 2);
        assert!(problems.iter().any(|p| p.contains("dns.resolver")));
        assert_eq!(config.dns.resolver, None);
        assert_eq!(config.alerts.local_fails_for_alert, 3);
        assert_eq!(
            config.notifier.discord_webhook_url.as_deref(),
            Some("https://discord.example/hook")
        );
        assert_eq!(config.containers.plex, "plexmediaserver");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_thresholds_by_scope() {
        let mut alerts = AlertConfig::default();
        alerts.external_fails_for_alert = 5;
        assert_eq!(alerts.thresholds(Scope::External).fails_for_alert, 5);
        assert_eq!(alerts.thresholds(Scope::Local).fails_for_alert, 3);
    }

    #[test]
    fn test_core_containers_dedup() {
        let mut names = ContainerNames::default();
        names.extra = vec!["plex".to_string(), "overseerr".to_string()];
        let core = names.core();
        assert_eq!(core.iter().filter(|n| *n == "plex").count(), 1);
        assert_eq!(core.last().map(String::as_str), Some("overseerr"));
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            "[monitor]\ninterval_secs = 60\n\n[plex]\ncooldown_secs = 120\n",
        )
        .unwrap();
        let config = AppConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.monitor.interval_secs, 60);
        assert_eq!(config.plex.cooldown_secs, 120);
        assert_eq!(config.alerts.local_fails_for_alert, 3);
    }
}
