pub mod adaptive;
pub mod discovery;
pub mod interfaces;
pub mod liveness;
pub mod planner;
pub mod ports;
pub mod service_map;
pub mod tls;

use serde::Serialize;

pub use tls::CertificateData;

/// CIDR-aware description of one attached private network.
///
/// `scan_ips` is priority-ordered and never contains `own_ip`. The reported
/// `cidr` honors the interface netmask, but scanning is always /24-based
/// under `network` (deliberate simplification).
#[derive(Debug, Clone)]
pub struct NetworkInfo {
    /// Dotted /24 prefix, e.g. "192.168.1"
    pub network: String,
    /// Canonical CIDR of the interface, e.g. "192.168.1.0/24"
    pub cidr: String,
    /// Detected gateway, e.g. "192.168.1.1"
    pub gateway: String,
    /// Our own address in this network
    pub own_ip: String,
    /// All IPs to scan, priority-ordered
    pub scan_ips: Vec<String>,
}

/// Dispatch priority for a candidate IP. Declaration order gives
/// High < Medium < Low so a stable sort puts interesting hosts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// A host discovered during a scan cycle, as published to the control plane.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryResult {
    pub host: String,
    pub ip_address: String,
    pub open_ports: Vec<u16>,
    pub services: Vec<String>,
    #[serde(rename = "response_time_ms")]
    pub response_time: u64,
}

/// Coarse OS family guessed from observed services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsType {
    Linux,
    Windows,
    NetworkDevice,
    Unknown,
}

impl OsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OsType::Linux => "linux",
            OsType::Windows => "windows",
            OsType::NetworkDevice => "network-device",
            OsType::Unknown => "unknown",
        }
    }
}

/// Per-host evidence gathered between scan phases, used to decide whether
/// the host qualifies for the adaptive second pass.
#[derive(Debug, Clone)]
pub struct HostProfile {
    pub ip: String,
    pub os_type: OsType,
    pub is_server: bool,
    pub service_ports: Vec<u16>,
}

impl HostProfile {
    pub fn from_result(result: &DiscoveryResult) -> Self {
        Self {
            ip: result.ip_address.clone(),
            os_type: service_map::detect_os_type(&result.open_ports, &result.services),
            is_server: result.open_ports.len() >= 3,
            service_ports: result.open_ports.clone(),
        }
    }

    /// Hosts with a recognizable profile get the adaptive second pass.
    pub fn qualifies_for_deep_scan(&self) -> bool {
        self.is_server || self.os_type != OsType::Unknown
    }
}
