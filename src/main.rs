use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use certwatch_agent::api;
use certwatch_agent::config::Config;
use certwatch_agent::services::agent::Agent;
use certwatch_agent::supabase::{ControlPlane, SupabaseClient};

#[tokio::main]
async fn main() {
    // Load .env file
    dotenvy::dotenv().ok();

    let level = if std::env::var("LOG_LEVEL").as_deref() == Ok("DEBUG") {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    info!("Starting Certwatch Agent");

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    info!(
        scan_interval = config.scan_interval.as_secs(),
        scan_timeout = config.scan_timeout.as_secs(),
        scan_ports = ?config.scan_ports,
        scan_targets = ?config.scan_targets,
        "Configuration loaded"
    );

    let client = match SupabaseClient::new(
        &config.supabase_url,
        &config.supabase_api_key,
        &config.connector_name,
    ) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Failed to build control-plane client");
            std::process::exit(1);
        }
    };

    info!("Validating connector token...");
    let connector = match client.validate_and_register(&config.connector_token).await {
        Ok(connector) => connector,
        Err(e) => {
            error!(error = %e, "Token validation failed");
            std::process::exit(1);
        }
    };
    info!(
        connector_id = %connector.id,
        tenant_id = %connector.tenant_id,
        name = %connector.name,
        "✅ Connector authenticated successfully!"
    );

    tokio::spawn(api::health::serve(config.health_check_port));

    let client: Arc<dyn ControlPlane> = Arc::new(client);
    let agent = match Agent::new(&config, client) {
        Ok(agent) => agent,
        Err(e) => {
            error!(error = %e, "Failed to initialize agent");
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    agent.run(cancel).await;
    info!("Agent stopped");
}

/// Cancel everything on SIGINT or SIGTERM.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(signal) => signal,
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                let _ = ctrl_c.await;
                cancel.cancel();
                return;
            }
        };

        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }

    cancel.cancel();
}
