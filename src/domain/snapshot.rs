use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One record of the health log, written once per monitoring cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub timestamp: DateTime<Utc>,
    /// Container name -> running
    #[serde(default)]
    pub containers: BTreeMap<String, bool>,
    #[serde(default)]
    pub network: NetworkBlock,
    #[serde(default)]
    pub plex: PlexBlock,
    #[serde(default)]
    pub deluge: DelugeBlock,
    #[serde(default)]
    pub system: SystemBlock,
    #[serde(default)]
    pub storage: BTreeMap<String, MountUsage>,
}

impl HealthSnapshot {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            containers: BTreeMap::new(),
            network: NetworkBlock::default(),
            plex: PlexBlock::default(),
            deluge: DelugeBlock::default(),
            system: SystemBlock::default(),
            storage: BTreeMap::new(),
        }
    }

    /// Running state of a container; absent means it was not inspected.
    pub fn container_running(&self, name: &str) -> Option<bool> {
        self.containers.get(name).copied()
    }

    /// Names of inspected containers that are not running
    pub fn stopped_containers(&self) -> Vec<&str> {
        self.containers
            .iter()
            .filter(|(_, running)| !**running)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkBlock {
    pub vpn_internal_ip: Option<String>,
    pub vpn_public_ip: Option<String>,
    pub deluge_internal_ip: Option<String>,
    pub deluge_public_ip: Option<String>,
    #[serde(default)]
    pub internet_access: bool,
    pub speedtest_download_mbps: Option<f64>,
    pub speedtest_upload_mbps: Option<f64>,
}

impl NetworkBlock {
    /// Deluge traffic leaves through the VPN when both public IPs are known and equal
    pub fn deluge_behind_vpn(&self) -> Option<bool> {
        match (&self.vpn_public_ip, &self.deluge_public_ip) {
            (Some(vpn), Some(deluge)) => Some(vpn == deluge),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlexBlock {
    #[serde(default)]
    pub active_sessions: u32,
    #[serde(default)]
    pub unique_clients: u32,
    #[serde(default)]
    pub transcoding: u32,
    #[serde(default)]
    pub local_accessible: bool,
    /// None when no public URL is configured
    pub external_accessible: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DelugeBlock {
    #[serde(default)]
    pub reachable: bool,
    #[serde(default)]
    pub downloading: u32,
    #[serde(default)]
    pub seeding: u32,
    /// Bytes per second
    #[serde(default)]
    pub download_rate: f64,
    /// Bytes per second
    #[serde(default)]
    pub upload_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemBlock {
    #[serde(default)]
    pub cpu_percent: f32,
    #[serde(default)]
    pub ram_percent: f32,
    pub temperature_c: Option<f32>,
    #[serde(default)]
    pub disk_read_bytes: u64,
    #[serde(default)]
    pub disk_written_bytes: u64,
    #[serde(default)]
    pub net_received_bytes: u64,
    #[serde(default)]
    pub net_transmitted_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MountUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
}

impl MountUsage {
    pub fn from_total_and_free(total_bytes: u64, free_bytes: u64) -> Self {
        Self {
            total_bytes,
            used_bytes: total_bytes.saturating_sub(free_bytes),
            free_bytes,
        }
    }

    pub fn used_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}
