use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::AgentError;
use crate::scanner::{
    adaptive, interfaces, liveness, ports, DiscoveryResult, HostProfile,
};

/// In-flight IP tasks across all networks of one cycle.
const GLOBAL_SCAN_CONCURRENCY: usize = 100;
/// Progress is reported every N completed targets.
const PROGRESS_EVERY: usize = 5;

/// One progress sample streamed back to the control plane.
#[derive(Debug, Clone)]
pub struct ScanProgress {
    pub current: usize,
    pub total: usize,
    pub status: String,
}

/// Two-phase discovery across every attached private network.
///
/// Phase 1 sweeps all planned IPs with the standard port list; phase 2
/// re-scans promising hosts with a service-driven adaptive port list.
pub struct NetworkDiscovery {
    scan_timeout: Duration,
}

impl NetworkDiscovery {
    pub fn new(scan_timeout: Duration) -> Self {
        Self { scan_timeout }
    }

    /// Run one full discovery cycle. Progress samples are pushed through
    /// `progress` (monotonic per cycle); the returned hosts are sorted by IP.
    pub async fn discover_local_network(
        &self,
        cancel: &CancellationToken,
        progress: &mpsc::UnboundedSender<ScanProgress>,
    ) -> Result<Vec<DiscoveryResult>, AgentError> {
        let networks = interfaces::enumerate_networks(cancel).await?;
        let total: usize = networks.iter().map(|n| n.scan_ips.len()).sum();

        info!(
            networks_found = networks.len(),
            targets = total,
            "Starting network discovery on all private networks"
        );
        let _ = progress.send(ScanProgress {
            current: 0,
            total,
            status: "scanning".to_string(),
        });

        // PHASE 1: liveness + standard port sweep
        let results: Arc<DashMap<String, DiscoveryResult>> = Arc::new(DashMap::new());
        let scanned = Arc::new(Mutex::new(0usize));
        let semaphore = Arc::new(Semaphore::new(GLOBAL_SCAN_CONCURRENCY));

        let mut tasks = Vec::with_capacity(total);
        'dispatch: for network in &networks {
            for ip in &network.scan_ips {
                // Acquire before spawning so dispatch follows planner order
                let permit = tokio::select! {
                    _ = cancel.cancelled() => break 'dispatch,
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break 'dispatch,
                    },
                };

                let ip = ip.clone();
                let cancel = cancel.clone();
                let results = results.clone();
                let scanned = scanned.clone();
                let progress = progress.clone();
                let scan_timeout = self.scan_timeout;

                tasks.push(tokio::spawn(async move {
                    let _permit = permit;

                    if cancel.is_cancelled() {
                        return;
                    }

                    if liveness::is_host_alive(&cancel, &ip).await {
                        let scan = ports::scan_ports(
                            &cancel,
                            &ip,
                            &ports::STANDARD_PORTS,
                            scan_timeout,
                            ports::PHASE1_PARALLELISM,
                        )
                        .await;

                        if !scan.open_ports.is_empty() && !cancel.is_cancelled() {
                            info!(
                                host = %ip,
                                open_ports = ?scan.open_ports,
                                services = ?scan.services,
                                "Host discovered"
                            );
                            results.insert(
                                ip.clone(),
                                DiscoveryResult {
                                    host: ip.clone(),
                                    ip_address: ip.clone(),
                                    open_ports: scan.open_ports,
                                    services: scan.services,
                                    response_time: scan.response_time,
                                },
                            );
                        }
                    }

                    if cancel.is_cancelled() {
                        return;
                    }

                    // Progress is emitted under the counter lock so samples
                    // stay monotonic.
                    let mut count = scanned.lock().await;
                    *count += 1;
                    if *count % PROGRESS_EVERY == 0 {
                        let _ = progress.send(ScanProgress {
                            current: *count,
                            total,
                            status: format!("Analysiere Hosts: {}/{}", *count, total),
                        });
                    }
                }));
            }
        }

        for task in tasks {
            let _ = task.await;
        }

        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        // PHASE 2: adaptive deep scan for hosts that look like servers or
        // have a recognizable OS profile
        let profiles: Vec<HostProfile> = results
            .iter()
            .map(|entry| HostProfile::from_result(entry.value()))
            .collect();

        let mut deep_tasks = Vec::new();
        for profile in profiles {
            if !profile.qualifies_for_deep_scan() {
                continue;
            }

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let Some(phase1) = results.get(&profile.ip).map(|entry| entry.value().clone()) else {
                continue;
            };
            let port_list = adaptive::adaptive_port_list(&phase1.open_ports, &phase1.services);

            let cancel = cancel.clone();
            let results = results.clone();
            let scan_timeout = self.scan_timeout;

            deep_tasks.push(tokio::spawn(async move {
                let _permit = permit;

                debug!(
                    host = %profile.ip,
                    os_type = profile.os_type.as_str(),
                    is_server = profile.is_server,
                    ports = port_list.len(),
                    "Running adaptive deep scan"
                );

                let scan = ports::scan_ports(
                    &cancel,
                    &profile.ip,
                    &port_list,
                    scan_timeout,
                    ports::PHASE2_PARALLELISM,
                )
                .await;

                if cancel.is_cancelled() {
                    return;
                }

                // The adaptive result wins only when it actually saw more
                if scan.open_ports.len() > phase1.open_ports.len() {
                    results.insert(
                        profile.ip.clone(),
                        DiscoveryResult {
                            host: profile.ip.clone(),
                            ip_address: profile.ip,
                            open_ports: scan.open_ports,
                            services: scan.services,
                            response_time: scan.response_time,
                        },
                    );
                }
            }));
        }

        for task in deep_tasks {
            let _ = task.await;
        }

        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        let _ = progress.send(ScanProgress {
            current: total,
            total,
            status: "completed".to_string(),
        });

        let mut hosts: Vec<DiscoveryResult> = results
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        hosts.sort_by_key(|host| {
            host.ip_address
                .parse::<Ipv4Addr>()
                .map(u32::from)
                .unwrap_or(u32::MAX)
        });

        info!(
            hosts_found = hosts.len(),
            networks_scanned = networks.len(),
            "Network discovery completed"
        );

        Ok(hosts)
    }
}
