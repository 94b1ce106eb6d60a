use std::time::Duration;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Ports tried to decide whether a host is alive at all. Ordered by how
/// likely they are to answer on a typical corporate network.
pub const LIVENESS_PORTS: [u16; 10] = [80, 443, 22, 3389, 445, 8080, 8443, 21, 25, 23];

const LIVENESS_TIMEOUT: Duration = Duration::from_millis(300);

/// Quick reachability check: sequential TCP connects against the probe set,
/// stopping at the first accept. No data is sent; timeouts and refusals are
/// just "closed, try the next one".
pub async fn is_host_alive(cancel: &CancellationToken, ip: &str) -> bool {
    for port in LIVENESS_PORTS {
        let address = format!("{ip}:{port}");
        tokio::select! {
            _ = cancel.cancelled() => return false,
            result = tokio::time::timeout(LIVENESS_TIMEOUT, TcpStream::connect(&address)) => {
                if matches!(result, Ok(Ok(_))) {
                    return true;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn silent_host_is_dead() {
        // TEST-NET-1 is guaranteed unassigned; every probe times out or is
        // rejected by the local stack.
        let cancel = CancellationToken::new();
        assert!(!is_host_alive(&cancel, "192.0.2.1").await);
    }

    #[tokio::test]
    async fn cancelled_probe_reports_dead() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!is_host_alive(&cancel, "127.0.0.1").await);
    }
}
