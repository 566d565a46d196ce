//! Host metrics via sysinfo

use std::collections::BTreeMap;
use sysinfo::{Components, Disks, Networks, System};

use crate::domain::{MountUsage, SystemBlock};

/// Keeps sysinfo handles between cycles so CPU usage is measured over the
/// cycle rather than an instant.
pub struct SystemSampler {
    sys: System,
    disks: Disks,
    networks: Networks,
    components: Components,
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        Self {
            sys,
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            components: Components::new_with_refreshed_list(),
        }
    }

    pub fn sample(&mut self) -> SystemBlock {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        self.disks = Disks::new_with_refreshed_list();
        self.networks = Networks::new_with_refreshed_list();
        self.components = Components::new_with_refreshed_list();

        let total_memory = self.sys.total_memory();
        let ram_percent = if total_memory == 0 {
            0.0
        } else {
            (self.sys.used_memory() as f64 / total_memory as f64 * 100.0) as f32
        };

        let (disk_read_bytes, disk_written_bytes) =
            self.disks.list().iter().fold((0u64, 0u64), |(read, written), d| {
                let usage = d.usage();
                (
                    read.saturating_add(usage.total_read_bytes),
                    written.saturating_add(usage.total_written_bytes),
                )
            });

        let (net_received_bytes, net_transmitted_bytes) = self
            .networks
            .list()
            .iter()
            .filter(|(name, _)| name.as_str() != "lo")
            .fold((0u64, 0u64), |(rx, tx), (_, data)| {
                (
                    rx.saturating_add(data.total_received()),
                    tx.saturating_add(data.total_transmitted()),
                )
            });

        // Hottest sensor; most boards label the package sensor inconsistently
        let temperature_c = self
            .components
            .list()
            .iter()
            .filter_map(|c| c.temperature())
            .filter(|t| t.is_finite())
            .fold(None, |max: Option<f32>, t| Some(max.map_or(t, |m| m.max(t))));

        SystemBlock {
            cpu_percent: self.sys.global_cpu_usage(),
            ram_percent,
            temperature_c,
            disk_read_bytes,
            disk_written_bytes,
            net_received_bytes,
            net_transmitted_bytes,
        }
    }

    /// Usage per mount point, skipping pseudo filesystems with no capacity
    pub fn storage(&self) -> BTreeMap<String, MountUsage> {
        self.disks
            .list()
            .iter()
            .filter(|d| d.total_space() > 0)
            .map(|d| {
                (
                    d.mount_point().to_string_lossy().into_owned(),
                    MountUsage::from_total_and_free(d.total_space(), d.available_space()),
                )
            })
            .collect()
    }
}
