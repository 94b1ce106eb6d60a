use crate::scanner::OsType;

/// Map a port to its well-known service name, falling back to "TCP/<port>".
/// Total and pure; the scan pipeline relies on it being deterministic.
pub fn identify_service(port: u16) -> String {
    let name = match port {
        21 => "FTP",
        22 => "SSH",
        23 => "Telnet",
        25 => "SMTP",
        53 => "DNS",
        80 => "HTTP",
        110 => "POP3",
        143 => "IMAP",
        389 => "LDAP",
        443 => "HTTPS",
        445 => "SMB/CIFS",
        465 => "SMTPS",
        587 => "SMTP-Submission",
        636 => "LDAPS",
        993 => "IMAPS",
        995 => "POP3S",
        3306 => "MySQL",
        3389 => "RDP",
        5432 => "PostgreSQL",
        5900 => "VNC",
        6379 => "Redis",
        8080 => "HTTP-Proxy",
        8443 => "HTTPS-Alt",
        9200 => "Elasticsearch",
        27017 => "MongoDB",
        _ => return format!("TCP/{port}"),
    };
    name.to_string()
}

/// Guess the OS family from observed services.
///
/// RDP, or SMB without SSH, reads as Windows; SSH as Linux; a host that only
/// speaks HTTP(S) on a handful of ports is most likely a router or switch.
pub fn detect_os_type(open_ports: &[u16], services: &[String]) -> OsType {
    let mut has_ssh = false;
    let mut has_rdp = false;
    let mut has_smb = false;
    let mut has_http = false;

    for service in services {
        match service.as_str() {
            "SSH" => has_ssh = true,
            "RDP" => has_rdp = true,
            "SMB/CIFS" => has_smb = true,
            "HTTP" | "HTTPS" => has_http = true,
            _ => {}
        }
    }

    if has_rdp || (has_smb && !has_ssh) {
        OsType::Windows
    } else if has_ssh {
        OsType::Linux
    } else if has_http && open_ports.len() < 5 {
        OsType::NetworkDevice
    } else {
        OsType::Unknown
    }
}
