use std::collections::BTreeSet;

/// Expand a phase-1 port list based on the services already seen on a host.
///
/// Web servers often hide admin panels on alternate ports, a Linux box with
/// SSH tends to carry databases, Windows file servers expose RPC/WinRM, and
/// so on. Returns the union of both lists, sorted.
pub fn adaptive_port_list(initial_ports: &[u16], services: &[String]) -> Vec<u16> {
    let mut ports: BTreeSet<u16> = initial_ports.iter().copied().collect();

    for service in services {
        match service.as_str() {
            "HTTP" | "HTTPS" => {
                ports.extend([8080, 8443, 8000, 3000]);
            }
            "SSH" => {
                ports.extend([3306, 5432, 6379, 27017, 9200]);
            }
            "RDP" | "SMB/CIFS" => {
                ports.extend([135, 139, 5985, 5986, 1433]);
            }
            "LDAP" | "LDAPS" => {
                ports.extend([88, 464, 3268]);
            }
            "SMTP" | "SMTPS" | "IMAP" | "IMAPS" | "POP3" | "POP3S" => {
                ports.extend([25, 465, 587, 993, 995]);
            }
            _ => {}
        }
    }

    ports.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn services(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn result_is_superset_of_initial_ports() {
        let expanded = adaptive_port_list(&[22, 5900], &services(&["VNC"]));
        assert!(expanded.contains(&22));
        assert!(expanded.contains(&5900));
    }

    #[test]
    fn ssh_adds_database_ports() {
        let expanded = adaptive_port_list(&[22], &services(&["SSH"]));
        for port in [3306, 5432, 6379, 27017, 9200] {
            assert!(expanded.contains(&port), "missing {port}");
        }
    }

    #[test]
    fn web_adds_alternate_web_ports() {
        let expanded = adaptive_port_list(&[80], &services(&["HTTP"]));
        for port in [8080, 8443, 8000, 3000] {
            assert!(expanded.contains(&port), "missing {port}");
        }
    }

    #[test]
    fn windows_adds_rpc_and_winrm() {
        let expanded = adaptive_port_list(&[445], &services(&["SMB/CIFS"]));
        for port in [135, 139, 5985, 5986, 1433] {
            assert!(expanded.contains(&port), "missing {port}");
        }
    }

    #[test]
    fn directory_and_mail_rules() {
        let expanded = adaptive_port_list(&[389], &services(&["LDAP"]));
        for port in [88, 464, 3268] {
            assert!(expanded.contains(&port), "missing {port}");
        }

        let expanded = adaptive_port_list(&[143], &services(&["IMAP"]));
        for port in [25, 465, 587, 993, 995] {
            assert!(expanded.contains(&port), "missing {port}");
        }
    }

    #[test]
    fn output_is_sorted_and_unique() {
        let expanded = adaptive_port_list(&[8080, 80], &services(&["HTTP", "HTTPS"]));
        let mut sorted = expanded.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(expanded, sorted);
    }

    #[test]
    fn unrecognized_services_add_nothing() {
        let expanded = adaptive_port_list(&[6379], &services(&["Redis", "TCP/4444"]));
        assert_eq!(expanded, vec![6379]);
    }
}
