use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::AgentError;
use crate::scanner::{planner, NetworkInfo};

/// Container-bridge prefixes that must never be scanned: Docker default,
/// Docker custom bridges and Docker Desktop.
const BRIDGE_PREFIXES: [&str; 3] = ["172.17.", "172.18.", "192.168.65."];

const GATEWAY_PROBE_TIMEOUT: Duration = Duration::from_millis(200);

/// Enumerate all attached private IPv4 networks and turn each into a
/// ready-to-scan `NetworkInfo` with a detected gateway and a prioritized
/// target list.
///
/// Loopback and non-RFC-1918 addresses are skipped, container bridges are
/// blacklisted, and duplicate /24 prefixes across interfaces collapse into
/// one entry. Fails with `NoPrivateNetwork` when nothing survives.
pub async fn enumerate_networks(
    cancel: &CancellationToken,
) -> Result<Vec<NetworkInfo>, AgentError> {
    let interfaces = NetworkInterface::show()
        .map_err(|e| AgentError::InterfaceEnumeration(e.to_string()))?;

    // BTreeMap keeps cycle output deterministic across runs
    let mut prefixes: BTreeMap<String, (Ipv4Addr, String)> = BTreeMap::new();

    for interface in &interfaces {
        for addr in &interface.addr {
            let Addr::V4(v4) = addr else { continue };
            let ip = v4.ip;

            if ip.is_loopback() || !ip.is_private() {
                continue;
            }

            let octets = ip.octets();
            let prefix = format!("{}.{}.{}", octets[0], octets[1], octets[2]);

            if is_bridge_prefix(&prefix) {
                debug!(interface = %interface.name, %prefix, "Skipping container bridge network");
                continue;
            }

            let cidr = cidr_of(ip, v4.netmask);
            prefixes.entry(prefix).or_insert((ip, cidr));
        }
    }

    let mut networks = Vec::with_capacity(prefixes.len());
    for (prefix, (own_ip, cidr)) in prefixes {
        let gateway = detect_gateway(cancel, &prefix).await;
        let own_ip = own_ip.to_string();
        let scan_ips = planner::generate_scan_ips(&prefix, &own_ip, &gateway);

        networks.push(NetworkInfo {
            network: prefix,
            cidr,
            gateway,
            own_ip,
            scan_ips,
        });
    }

    if networks.is_empty() {
        return Err(AgentError::NoPrivateNetwork);
    }

    Ok(networks)
}

/// Try the usual gateway addresses on their web ports; the first one that
/// accepts wins. Falls back to `<prefix>.1` when nobody answers in time.
pub async fn detect_gateway(cancel: &CancellationToken, prefix: &str) -> String {
    for candidate in [format!("{prefix}.1"), format!("{prefix}.254")] {
        for port in [80u16, 443] {
            let address = format!("{candidate}:{port}");
            tokio::select! {
                _ = cancel.cancelled() => return format!("{prefix}.1"),
                result = tokio::time::timeout(GATEWAY_PROBE_TIMEOUT, TcpStream::connect(&address)) => {
                    if matches!(result, Ok(Ok(_))) {
                        return candidate;
                    }
                }
            }
        }
    }
    format!("{prefix}.1")
}

fn is_bridge_prefix(prefix: &str) -> bool {
    BRIDGE_PREFIXES
        .iter()
        .any(|bridge| format!("{prefix}.").starts_with(bridge))
}

/// Canonical CIDR of the interface address. The netmask decides the prefix
/// length; scanning still happens /24-based regardless.
fn cidr_of(ip: Ipv4Addr, netmask: Option<Ipv4Addr>) -> String {
    let bits = netmask.map_or(24, |mask| u32::from(mask).count_ones());
    let mask = if bits == 0 {
        0u32
    } else {
        u32::MAX << (32 - bits)
    };
    let network = Ipv4Addr::from(u32::from(ip) & mask);
    format!("{network}/{bits}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_prefixes_are_rejected() {
        assert!(is_bridge_prefix("172.17.0"));
        assert!(is_bridge_prefix("172.18.5"));
        assert!(is_bridge_prefix("192.168.65"));
        assert!(!is_bridge_prefix("172.19.0"));
        assert!(!is_bridge_prefix("192.168.6"));
    }

    #[test]
    fn cidr_honors_netmask() {
        let ip = Ipv4Addr::new(10, 1, 2, 3);
        assert_eq!(cidr_of(ip, Some(Ipv4Addr::new(255, 255, 0, 0))), "10.1.0.0/16");
        assert_eq!(
            cidr_of(ip, Some(Ipv4Addr::new(255, 255, 255, 0))),
            "10.1.2.0/24"
        );
        assert_eq!(cidr_of(ip, None), "10.1.2.0/24");
    }

    #[tokio::test]
    async fn gateway_falls_back_to_dot_one() {
        // TEST-NET-3: all four probes time out after 200ms
        let cancel = CancellationToken::new();
        let gateway = detect_gateway(&cancel, "203.0.113").await;
        assert_eq!(gateway, "203.0.113.1");
    }
}
