use serde::{Deserialize, Serialize};

/// Severity tier, ordered by root-cause priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Content-serving layer (Plex, DNS, certificate, reverse proxy)
    Sev0,
    /// Download layer (VPN, Deluge)
    Sev1,
    /// Library managers (Radarr, Sonarr)
    Sev2,
    /// Any core container down
    Sev3,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Sev0,
        Severity::Sev1,
        Severity::Sev2,
        Severity::Sev3,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Sev0 => "SEV0",
            Severity::Sev1 => "SEV1",
            Severity::Sev2 => "SEV2",
            Severity::Sev3 => "SEV3",
        }
    }

    /// Notification prefix
    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Sev0 => "\u{1f6a8}",       // police light
            Severity::Sev1 => "\u{274c}",        // red X
            Severity::Sev2 => "\u{26a0}\u{fe0f}", // warning icon
            Severity::Sev3 => "\u{2139}\u{fe0f}", // info icon
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Diagnostic failure codes. The string form is stable and appears in every
/// notification about the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureCode {
    /// Plex container not running
    P001,
    /// Plex not reachable on the LAN
    P002,
    /// Dynamic DNS record does not match the public IP
    P003,
    /// Certificate expired, unreadable or close to expiry
    P004,
    /// Plex not reachable through the public URL
    P005,
    /// Reverse-proxy config missing or failing `nginx -t`
    P006,
    /// VPN container not running
    D001,
    /// Deluge container not running
    D002,
    /// Deluge RPC unreachable while the container runs
    D003,
    /// Deluge bound interface differs from the tunnel IP, or no internet
    D004,
    /// Radarr unreachable
    A001,
    /// Sonarr unreachable
    A002,
    /// One or more core containers down
    C001,
    /// Reverse-proxy config missing
    ConfPresent,
    /// Dynamic DNS record out of date
    DnsMatch,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::P001 => "P-001",
            FailureCode::P002 => "P-002",
            FailureCode::P003 => "P-003",
            FailureCode::P004 => "P-004",
            FailureCode::P005 => "P-005",
            FailureCode::P006 => "P-006",
            FailureCode::D001 => "D-001",
            FailureCode::D002 => "D-002",
            FailureCode::D003 => "D-003",
            FailureCode::D004 => "D-004",
            FailureCode::A001 => "A-001",
            FailureCode::A002 => "A-002",
            FailureCode::C001 => "C-001",
            FailureCode::ConfPresent => "CONF_PRESENT",
            FailureCode::DnsMatch => "DNS_MATCH",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FailureCode::P001 => "Plex container not running",
            FailureCode::P002 => "Plex unreachable on the local network",
            FailureCode::P003 => "DNS record does not match public IP",
            FailureCode::P004 => "TLS certificate invalid or expiring",
            FailureCode::P005 => "Plex unreachable from outside",
            FailureCode::P006 => "Reverse-proxy config missing or invalid",
            FailureCode::D001 => "VPN container not running",
            FailureCode::D002 => "Deluge container not running",
            FailureCode::D003 => "Deluge RPC unreachable",
            FailureCode::D004 => "Deluge not bound to VPN tunnel or offline",
            FailureCode::A001 => "Radarr unreachable",
            FailureCode::A002 => "Sonarr unreachable",
            FailureCode::C001 => "Core container down",
            FailureCode::ConfPresent => "Reverse-proxy config missing",
            FailureCode::DnsMatch => "Dynamic DNS out of date",
        }
    }
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// When the Plex path is allowed to repair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RepairMode {
    /// Diagnose only
    Never,
    /// Repair when a step fails
    #[default]
    OnFail,
    /// Also exercise the repair path when healthy
    Always,
}

impl RepairMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairMode::Never => "never",
            RepairMode::OnFail => "on-fail",
            RepairMode::Always => "always",
        }
    }
}

impl std::fmt::Display for RepairMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
