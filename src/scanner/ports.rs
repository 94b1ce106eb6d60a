use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::scanner::service_map;

/// Ports probed in the first pass: the services that matter on IT
/// infrastructure (mail, web, directory, databases, remote access).
pub const STANDARD_PORTS: [u16; 25] = [
    21, 22, 23, 25, 53, 80, 110, 143, 389, 443, 445, 465, 587, 636, 993, 995, 3306, 3389, 5432,
    5900, 6379, 8080, 8443, 9200, 27017,
];

/// Parallel connects per host during the standard pass.
pub const PHASE1_PARALLELISM: usize = 5;
/// Parallel connects per host during the adaptive pass.
pub const PHASE2_PARALLELISM: usize = 10;

/// Outcome of one port-scan batch against a single host.
#[derive(Debug, Clone)]
pub struct PortScan {
    /// Open ports, ascending and unique.
    pub open_ports: Vec<u16>,
    /// Service names in ascending-port order, first occurrence wins.
    pub services: Vec<String>,
    /// Wall time of the whole batch in milliseconds.
    pub response_time: u64,
}

/// Probe `ports` on `ip` with at most `parallelism` connects in flight.
///
/// Connect errors and timeouts mean "closed" and are never surfaced. A
/// cancelled batch reports whatever was confirmed open before the signal.
pub async fn scan_ports(
    cancel: &CancellationToken,
    ip: &str,
    ports: &[u16],
    timeout: Duration,
    parallelism: usize,
) -> PortScan {
    let started = Instant::now();

    let mut open_ports: Vec<u16> = stream::iter(ports.to_vec())
        .map(|port| {
            let cancel = cancel.clone();
            let address = format!("{ip}:{port}");
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => None,
                    result = tokio::time::timeout(timeout, TcpStream::connect(&address)) => {
                        match result {
                            Ok(Ok(_)) => Some(port),
                            _ => None,
                        }
                    }
                }
            }
        })
        .buffer_unordered(parallelism.max(1))
        .filter_map(|port| async move { port })
        .collect()
        .await;

    open_ports.sort_unstable();
    open_ports.dedup();

    let mut services = Vec::new();
    for port in &open_ports {
        let service = service_map::identify_service(*port);
        if !services.contains(&service) {
            services.push(service);
        }
    }

    PortScan {
        open_ports,
        services,
        response_time: started.elapsed().as_millis() as u64,
    }
}
