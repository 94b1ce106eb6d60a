use std::env;
use std::time::Duration;

use chrono::Local;

use crate::error::AgentError;

/// Agent configuration, loaded once from the environment at startup.
///
/// `scan_targets` and `scan_ports` are only the initial values; the backend
/// can replace them at runtime via config polling (see `services::agent`).
#[derive(Debug, Clone)]
pub struct Config {
    pub supabase_url: String,
    pub supabase_api_key: String,
    pub connector_token: String,
    pub connector_name: String,
    pub scan_targets: Vec<String>,
    pub scan_ports: Vec<u16>,
    pub scan_interval: Duration,
    pub scan_timeout: Duration,
    pub health_check_port: u16,
}

impl Config {
    pub fn load() -> Result<Self, AgentError> {
        let supabase_url = require_env("SUPABASE_URL")?;

        let connector_token = require_env("CONNECTOR_TOKEN")?;

        // Anon key for initial auth, service-role key as fallback for old setups
        let supabase_api_key = match env::var("SUPABASE_ANON_KEY") {
            Ok(key) if !key.is_empty() => key,
            _ => match env::var("SUPABASE_SERVICE_ROLE_KEY") {
                Ok(key) if !key.is_empty() => key,
                _ => {
                    return Err(AgentError::Config(
                        "SUPABASE_ANON_KEY is required".to_string(),
                    ))
                }
            },
        };

        let connector_name = match env::var("CONNECTOR_NAME") {
            Ok(name) if !name.is_empty() => name,
            _ => format!("agent-{}", Local::now().format("%Y%m%d-%H%M%S")),
        };

        let scan_targets = parse_targets(&env_or("SCAN_TARGETS", "localhost"));
        let scan_ports = parse_ports(&env_or("SCAN_PORTS", "443,8443,636"))?;

        let scan_interval = Duration::from_secs(parse_seconds(
            "SCAN_INTERVAL",
            &env_or("SCAN_INTERVAL", "3600"),
        )?);
        let scan_timeout = Duration::from_secs(parse_seconds(
            "SCAN_TIMEOUT",
            &env_or("SCAN_TIMEOUT", "5"),
        )?);

        let health_port_str = env_or("HEALTH_CHECK_PORT", "8080");
        let health_check_port = health_port_str
            .parse::<u16>()
            .map_err(|_| AgentError::Config(format!("invalid HEALTH_CHECK_PORT: {health_port_str}")))?;

        Ok(Self {
            supabase_url,
            supabase_api_key,
            connector_token,
            connector_name,
            scan_targets,
            scan_ports,
            scan_interval,
            scan_timeout,
            health_check_port,
        })
    }
}

fn require_env(key: &str) -> Result<String, AgentError> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(AgentError::Config(format!("{key} is required"))),
    }
}

fn env_or(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

/// Split a comma list of scan targets, trimming whitespace.
pub fn parse_targets(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Split a comma list of ports, rejecting anything that is not a valid port.
pub fn parse_ports(raw: &str) -> Result<Vec<u16>, AgentError> {
    raw.split(',')
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.parse::<u16>()
                .map_err(|_| AgentError::Config(format!("invalid port: {p}")))
        })
        .collect()
}

fn parse_seconds(key: &str, raw: &str) -> Result<u64, AgentError> {
    raw.parse::<u64>()
        .map_err(|_| AgentError::Config(format!("invalid {key}: {raw}")))
}
