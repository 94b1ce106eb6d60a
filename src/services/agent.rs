use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::AgentError;
use crate::scanner::discovery::{NetworkDiscovery, ScanProgress};
use crate::scanner::tls::CertificateScanner;
use crate::scanner::DiscoveryResult;
use crate::supabase::ControlPlane;

/// Open ports worth a TLS handshake: HTTPS, HTTPS-Alt, LDAPS, IMAPS, POP3S,
/// SMTPS.
pub const TLS_CANDIDATE_PORTS: [u16; 6] = [443, 8443, 636, 993, 995, 465];

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// The runtime-mutable part of the configuration. The backend can replace
/// targets and ports via polling; the scan loop snapshots an `Arc` at tick
/// boundaries and never observes a mid-cycle change.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub targets: Vec<String>,
    pub ports: Vec<u16>,
}

impl ScanSettings {
    /// Empty targets, or just "localhost", means full network discovery.
    pub fn auto_discovery(&self) -> bool {
        self.targets.is_empty() || (self.targets.len() == 1 && self.targets[0] == "localhost")
    }
}

/// Per-cycle publish counters, mirrored into the final UI log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleStats {
    pub certificates: usize,
    pub failures: usize,
}

/// The periodic driver: scan tick, heartbeat tick, config-poll tick and
/// shutdown signal.
pub struct Agent {
    scan_interval: Duration,
    settings: RwLock<Arc<ScanSettings>>,
    client: Arc<dyn ControlPlane>,
    discovery: NetworkDiscovery,
    cert_scanner: CertificateScanner,
}

impl Agent {
    pub fn new(config: &Config, client: Arc<dyn ControlPlane>) -> Result<Self, AgentError> {
        Ok(Self {
            scan_interval: config.scan_interval,
            settings: RwLock::new(Arc::new(ScanSettings {
                targets: config.scan_targets.clone(),
                ports: config.scan_ports.clone(),
            })),
            client,
            discovery: NetworkDiscovery::new(config.scan_timeout),
            cert_scanner: CertificateScanner::new(config.scan_timeout)?,
        })
    }

    /// Main loop. The first scan tick fires immediately, so the agent scans
    /// right after registration and then on every interval.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut scan_tick = tokio::time::interval(self.scan_interval.max(Duration::from_secs(1)));
        scan_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut heartbeat_tick = tokio::time::interval(HEARTBEAT_INTERVAL);
        let mut poll_tick = tokio::time::interval(CONFIG_POLL_INTERVAL);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutting down gracefully...");
                    return;
                }
                _ = scan_tick.tick() => {
                    self.run_cycle(&cancel).await;
                }
                _ = heartbeat_tick.tick() => {
                    match self.client.heartbeat().await {
                        Ok(()) => debug!("Heartbeat updated"),
                        Err(e) => warn!(error = %e, "Failed to update heartbeat"),
                    }
                }
                _ = poll_tick.tick() => {
                    if self.poll_config().await {
                        info!("Triggered scan from backend - running scan now...");
                        self.run_cycle(&cancel).await;
                    }
                }
            }
        }
    }

    /// One scan cycle against the settings snapshot: full network discovery
    /// by default, targeted certificate scans when the backend configured an
    /// explicit target list.
    pub async fn run_cycle(&self, cancel: &CancellationToken) {
        let settings = self.settings.read().await.clone();
        if settings.auto_discovery() {
            self.run_network_discovery(cancel).await;
        } else {
            self.run_targeted_scan(cancel, &settings).await;
        }
    }

    /// Fetch backend config, apply target/port updates atomically and report
    /// whether a scan was triggered (the trigger is cleared before returning
    /// so a crash cannot loop the scan).
    pub async fn poll_config(&self) -> bool {
        let config = match self.client.get_config().await {
            Ok(Some(config)) => config,
            Ok(None) => return false,
            Err(e) => {
                debug!(error = %e, "Failed to fetch config");
                return false;
            }
        };

        if !config.scan_targets.is_empty() || !config.scan_ports.is_empty() {
            let current = self.settings.read().await.clone();
            let updated = ScanSettings {
                targets: if config.scan_targets.is_empty() {
                    current.targets.clone()
                } else {
                    config.scan_targets.clone()
                },
                ports: if config.scan_ports.is_empty() {
                    current.ports.clone()
                } else {
                    config.scan_ports.clone()
                },
            };

            if !config.scan_targets.is_empty() {
                info!(targets = ?config.scan_targets, "Updated scan targets from backend");
            }
            if !config.scan_ports.is_empty() {
                info!(ports = ?config.scan_ports, "Updated scan ports from backend");
            }

            *self.settings.write().await = Arc::new(updated);
        }

        if config.trigger_scan > 0 {
            if let Err(e) = self.client.clear_scan_trigger().await {
                warn!(error = %e, "Failed to clear scan trigger");
            }
            return true;
        }

        false
    }

    async fn run_network_discovery(&self, cancel: &CancellationToken) {
        let started = Instant::now();
        info!("Starting network discovery...");

        self.log_to_ui(
            "info",
            "🌐 Netzwerk-Scan gestartet... Scanne alle privaten IP-Bereiche",
            Some(json!({ "scan_mode": "auto-discovery" })),
        )
        .await;

        // Single forwarder keeps progress updates ordered on the wire
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ScanProgress>();
        let progress_client = self.client.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(progress) = progress_rx.recv().await {
                if let Err(e) = progress_client
                    .update_scan_progress(progress.current, progress.total, &progress.status)
                    .await
                {
                    debug!(error = %e, "Failed to update scan progress");
                }
            }
        });

        let outcome = self
            .discovery
            .discover_local_network(cancel, &progress_tx)
            .await;
        drop(progress_tx);

        let hosts = match outcome {
            Ok(hosts) => hosts,
            Err(AgentError::Cancelled) => {
                let _ = forwarder.await;
                return;
            }
            Err(e) => {
                error!(error = %e, "Network discovery failed");
                self.log_to_ui(
                    "error",
                    &format!("❌ Netzwerk-Scan fehlgeschlagen: {e}"),
                    None,
                )
                .await;
                let _ = forwarder.await;
                return;
            }
        };

        let duration = started.elapsed();
        info!(
            hosts_found = hosts.len(),
            duration_ms = duration.as_millis() as u64,
            "Network discovery completed"
        );
        self.log_to_ui(
            "info",
            &format!(
                "✅ Netzwerk-Scan abgeschlossen: {} Hosts in {}s gefunden",
                hosts.len(),
                duration.as_secs()
            ),
            Some(json!({
                "hosts_found": hosts.len(),
                "duration_ms": duration.as_millis() as u64,
            })),
        )
        .await;

        let stats = self.publish_hosts(cancel, &hosts).await;

        info!(
            hosts = hosts.len(),
            success = stats.certificates,
            failed = stats.failures,
            "Network discovery and certificate scan completed"
        );

        let total_duration = started.elapsed();
        self.log_to_ui(
            "info",
            &completion_message(hosts.len(), stats, total_duration),
            Some(json!({
                "hosts_found": hosts.len(),
                "certificates": stats.certificates,
                "errors": stats.failures,
                "duration_ms": total_duration.as_millis() as u64,
                "scan_mode": "auto-discovery",
            })),
        )
        .await;

        let _ = forwarder.await;
    }

    /// Publish every discovered host, then TLS-probe its candidate ports.
    ///
    /// The discovery row always goes out first so hosts without a single
    /// certificate still appear on the control plane. A cancelled cycle
    /// publishes nothing further.
    pub async fn publish_hosts(
        &self,
        cancel: &CancellationToken,
        hosts: &[DiscoveryResult],
    ) -> CycleStats {
        let mut stats = CycleStats::default();

        for host in hosts {
            if cancel.is_cancelled() {
                break;
            }

            match self.client.upsert_discovery(host).await {
                Ok(()) => {
                    let services = if host.services.is_empty() {
                        "keine Services".to_string()
                    } else {
                        host.services.join(", ")
                    };
                    self.log_to_ui(
                        "info",
                        &format!(
                            "🌐 Host gefunden: {} ({} Ports: {})",
                            host.ip_address,
                            host.open_ports.len(),
                            services
                        ),
                        Some(json!({
                            "ip": host.ip_address,
                            "open_ports": host.open_ports,
                            "services": host.services,
                        })),
                    )
                    .await;
                }
                Err(e) => warn!(error = %e, host = %host.ip_address, "Failed to upsert discovery result"),
            }

            let tls_ports: Vec<u16> = host
                .open_ports
                .iter()
                .copied()
                .filter(|port| TLS_CANDIDATE_PORTS.contains(port))
                .collect();

            for port in tls_ports {
                if cancel.is_cancelled() {
                    return stats;
                }

                let mut cert = match self.cert_scanner.scan_host(cancel, &host.ip_address, port).await
                {
                    Ok(cert) => cert,
                    Err(AgentError::Cancelled) => return stats,
                    Err(e) => {
                        debug!(host = %host.ip_address, port, error = %e, "TLS scan failed");
                        stats.failures += 1;
                        continue;
                    }
                };

                // Asset first; the certificate row points at it
                match self.client.upsert_asset(&host.ip_address, port).await {
                    Ok(asset_id) => cert.asset_id = Some(asset_id),
                    Err(e) => {
                        warn!(error = %e, host = %host.ip_address, port, "Failed to upsert asset");
                        stats.failures += 1;
                        continue;
                    }
                }

                if let Err(e) = self.client.upsert_certificate(&cert).await {
                    error!(error = %e, host = %host.ip_address, port, "Failed to upsert certificate");
                    stats.failures += 1;
                    continue;
                }

                stats.certificates += 1;
                info!(
                    host = %host.ip_address,
                    port,
                    subject_cn = %cert.subject_cn,
                    fingerprint = %cert.fingerprint,
                    "Certificate discovered and reported"
                );
                self.log_to_ui(
                    "info",
                    &format!(
                        "🔐 Zertifikat gefunden: {} auf {}:{}",
                        cert.subject_cn, host.ip_address, port
                    ),
                    Some(json!({
                        "host": host.ip_address,
                        "port": port,
                        "subject_cn": cert.subject_cn,
                    })),
                )
                .await;
            }
        }

        stats
    }

    /// Certificate scan of a static `targets × ports` matrix, for deployments
    /// that configured explicit scan targets instead of auto-discovery.
    async fn run_targeted_scan(&self, cancel: &CancellationToken, settings: &ScanSettings) {
        info!("Starting certificate scan");
        let mut stats = CycleStats::default();

        for target in &settings.targets {
            for &port in &settings.ports {
                if cancel.is_cancelled() {
                    return;
                }

                debug!(host = %target, port, "Scanning target");

                let mut cert = match self.cert_scanner.scan_host(cancel, target, port).await {
                    Ok(cert) => cert,
                    Err(AgentError::Cancelled) => return,
                    Err(e) => {
                        warn!(host = %target, port, error = %e, "Scan failed");
                        stats.failures += 1;
                        continue;
                    }
                };

                match self.client.upsert_asset(target, port).await {
                    Ok(asset_id) => cert.asset_id = Some(asset_id),
                    Err(e) => {
                        warn!(error = %e, host = %target, port, "Failed to upsert asset");
                        stats.failures += 1;
                        continue;
                    }
                }

                if let Err(e) = self.client.upsert_certificate(&cert).await {
                    error!(
                        error = %e,
                        host = %target,
                        port,
                        fingerprint = %cert.fingerprint,
                        "Failed to upsert certificate"
                    );
                    stats.failures += 1;
                    continue;
                }

                stats.certificates += 1;
                info!(
                    host = %target,
                    port,
                    subject_cn = %cert.subject_cn,
                    fingerprint = %cert.fingerprint,
                    not_after = %cert.not_after,
                    "Certificate scanned and reported"
                );
            }
        }

        info!(
            success = stats.certificates,
            failed = stats.failures,
            total = stats.certificates + stats.failures,
            "Certificate scan completed"
        );
    }

    async fn log_to_ui(&self, level: &str, message: &str, metadata: Option<serde_json::Value>) {
        if let Err(e) = self.client.send_log(level, message, metadata).await {
            debug!(error = %e, "Failed to send UI log");
        }
    }

    /// Current settings snapshot, as the next cycle would see it.
    pub async fn settings_snapshot(&self) -> Arc<ScanSettings> {
        self.settings.read().await.clone()
    }
}

/// Final UI log line of a discovery cycle.
pub fn completion_message(hosts: usize, stats: CycleStats, duration: Duration) -> String {
    format!(
        "✅ Scan abgeschlossen: {} Hosts, {} Zertifikate gefunden, {} Fehler (Dauer: {}s)",
        hosts,
        stats.certificates,
        stats.failures,
        duration.as_secs()
    )
}
