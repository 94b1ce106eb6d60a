use crate::scanner::Priority;

/// Generate the priority-ordered target list for one /24 network.
///
/// Gateways and the usual .1/.254 router addresses come first, then common
/// server addresses, then the rest. The sort is stable, so ties keep their
/// numeric order and interesting hosts surface early even if the cycle is
/// cancelled halfway through.
pub fn generate_scan_ips(network: &str, own_ip: &str, gateway: &str) -> Vec<String> {
    let mut tagged: Vec<(Priority, String)> = Vec::with_capacity(253);

    for i in 1..255u16 {
        let ip = format!("{network}.{i}");

        if ip == own_ip {
            continue;
        }

        let priority = if ip == gateway || i == 1 || i == 254 {
            Priority::High
        } else if matches!(i, 10 | 20 | 100 | 200 | 250) || (2..=50).contains(&i) {
            Priority::Medium
        } else {
            Priority::Low
        };

        tagged.push((priority, ip));
    }

    tagged.sort_by_key(|(priority, _)| *priority);
    tagged.into_iter().map(|(_, ip)| ip).collect()
}
