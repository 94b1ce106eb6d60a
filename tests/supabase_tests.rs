use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use certwatch_agent::scanner::DiscoveryResult;
use certwatch_agent::supabase::{ControlPlane, SupabaseClient};

/// Requests seen by the stub: (method, endpoint, body).
type Log = Arc<Mutex<Vec<(String, String, Value)>>>;

fn record(log: &Log, method: &str, endpoint: &str, body: Value) {
    log.lock()
        .unwrap()
        .push((method.to_string(), endpoint.to_string(), body));
}

/// Minimal PostgREST stand-in covering the endpoints the client talks to.
async fn spawn_stub() -> (String, Log) {
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let app = Router::new()
        .route(
            "/rest/v1/rpc/validate_connector_token",
            post(|State(log): State<Log>, Json(body): Json<Value>| async move {
                let valid = body["p_token"] == json!("good-token");
                record(&log, "POST", "validate", body);
                if valid {
                    Json(json!([{
                        "connector_id": "conn-42",
                        "tenant_id": "tenant-7",
                        "name": "edge-agent",
                    }]))
                } else {
                    Json(json!([]))
                }
            }),
        )
        .route(
            "/rest/v1/assets",
            post(|State(log): State<Log>, Json(body): Json<Value>| async move {
                record(&log, "POST", "assets", body);
                Json(json!([{ "id": "asset-9" }]))
            }),
        )
        .route(
            "/rest/v1/certificates",
            post(|State(log): State<Log>, Json(body): Json<Value>| async move {
                record(&log, "POST", "certificates", body);
                Json(json!([]))
            }),
        )
        .route(
            "/rest/v1/connectors",
            get(|State(log): State<Log>| async move {
                record(&log, "GET", "connectors", Value::Null);
                Json(json!([{
                    "config": {
                        "scan_targets": ["10.9.9.9"],
                        "scan_ports": [8443],
                        "trigger_scan": 1,
                        "scanning": false,
                    }
                }]))
            })
            .patch(|State(log): State<Log>, Json(body): Json<Value>| async move {
                record(&log, "PATCH", "connectors", body);
                Json(json!([]))
            }),
        )
        .route(
            "/rest/v1/discovery_results",
            get(|State(log): State<Log>| async move {
                record(&log, "GET", "discovery_results", Value::Null);
                Json(json!([]))
            })
            .post(|State(log): State<Log>, Json(body): Json<Value>| async move {
                record(&log, "POST", "discovery_results", body);
                Json(json!([]))
            }),
        )
        .route(
            "/rest/v1/agent_logs",
            post(|State(log): State<Log>, Json(body): Json<Value>| async move {
                record(&log, "POST", "agent_logs", body);
                Json(json!([]))
            }),
        )
        .with_state(log.clone());

    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("bind stub");
    let addr = listener.local_addr().expect("stub addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (format!("http://{addr}"), log)
}

fn client_for(base_url: &str) -> SupabaseClient {
    SupabaseClient::new(base_url, "anon-key", "edge-agent").expect("client")
}

async fn registered_client(base_url: &str) -> SupabaseClient {
    let client = client_for(base_url);
    client
        .validate_and_register("good-token")
        .await
        .expect("registration");
    client
}

fn entries(log: &Log) -> Vec<(String, String, Value)> {
    log.lock().unwrap().clone()
}

#[tokio::test]
async fn token_validation_returns_connector_identity() {
    let (base_url, _log) = spawn_stub().await;
    let client = client_for(&base_url);

    let connector = client.validate_and_register("good-token").await.expect("ok");
    assert_eq!(connector.id, "conn-42");
    assert_eq!(connector.tenant_id, "tenant-7");
    assert_eq!(connector.name, "edge-agent");
}

#[tokio::test]
async fn invalid_token_is_rejected() {
    let (base_url, _log) = spawn_stub().await;
    let client = client_for(&base_url);

    assert!(client.validate_and_register("bad-token").await.is_err());
}

#[tokio::test]
async fn operations_before_registration_fail() {
    let (base_url, _log) = spawn_stub().await;
    let client = client_for(&base_url);

    assert!(client.upsert_asset("10.0.0.1", 443).await.is_err());
    assert!(client.heartbeat().await.is_err());
}

#[tokio::test]
async fn asset_upsert_carries_identity_and_returns_id() {
    let (base_url, log) = spawn_stub().await;
    let client = registered_client(&base_url).await;

    let asset_id = client.upsert_asset("192.168.1.10", 443).await.expect("ok");
    assert_eq!(asset_id, "asset-9");

    let body = entries(&log)
        .into_iter()
        .find(|(_, endpoint, _)| endpoint == "assets")
        .map(|(_, _, body)| body)
        .expect("asset request");
    assert_eq!(body["tenant_id"], json!("tenant-7"));
    assert_eq!(body["connector_id"], json!("conn-42"));
    assert_eq!(body["host"], json!("192.168.1.10"));
    assert_eq!(body["port"], json!(443));
    assert_eq!(body["proto"], json!("tls"));
}

#[tokio::test]
async fn new_discovery_row_is_inserted_after_existence_check() {
    let (base_url, log) = spawn_stub().await;
    let client = registered_client(&base_url).await;

    let result = DiscoveryResult {
        host: "192.168.1.10".to_string(),
        ip_address: "192.168.1.10".to_string(),
        open_ports: vec![80, 443],
        services: vec!["HTTP".to_string(), "HTTPS".to_string()],
        response_time: 23,
    };
    client.upsert_discovery(&result).await.expect("ok");

    let discovery_calls: Vec<_> = entries(&log)
        .into_iter()
        .filter(|(_, endpoint, _)| endpoint == "discovery_results")
        .collect();
    assert_eq!(discovery_calls[0].0, "GET");
    assert_eq!(discovery_calls[1].0, "POST");

    let body = &discovery_calls[1].2;
    assert_eq!(body["connector_id"], json!("conn-42"));
    assert_eq!(body["ip_address"], json!("192.168.1.10"));
    assert_eq!(body["open_ports"], json!([80, 443]));
    assert!(body["discovered_at"].is_string());
}

#[tokio::test]
async fn backend_config_is_parsed() {
    let (base_url, _log) = spawn_stub().await;
    let client = registered_client(&base_url).await;

    let config = client.get_config().await.expect("ok").expect("some");
    assert_eq!(config.scan_targets, vec!["10.9.9.9"]);
    assert_eq!(config.scan_ports, vec![8443]);
    assert_eq!(config.trigger_scan, 1);
}

#[tokio::test]
async fn clearing_the_trigger_patches_config_without_it() {
    let (base_url, log) = spawn_stub().await;
    let client = registered_client(&base_url).await;

    client.clear_scan_trigger().await.expect("ok");

    let patch = entries(&log)
        .into_iter()
        .find(|(method, endpoint, _)| method == "PATCH" && endpoint == "connectors")
        .map(|(_, _, body)| body)
        .expect("patch request");
    let config = &patch["config"];
    assert!(config.get("trigger_scan").is_none());
    // Unrelated keys survive the round trip
    assert_eq!(config["scan_targets"], json!(["10.9.9.9"]));
}

#[tokio::test]
async fn progress_update_writes_scanning_state() {
    let (base_url, log) = spawn_stub().await;
    let client = registered_client(&base_url).await;

    client
        .update_scan_progress(10, 254, "Analysiere Hosts: 10/254")
        .await
        .expect("progress");

    let patch = entries(&log)
        .into_iter()
        .find(|(method, endpoint, _)| method == "PATCH" && endpoint == "connectors")
        .map(|(_, _, body)| body)
        .expect("patch request");
    let config = &patch["config"];
    assert_eq!(config["scanning"], json!(true));
    assert_eq!(config["scan_progress"]["current"], json!(10));
    assert_eq!(config["scan_progress"]["total"], json!(254));
    assert_eq!(
        config["scan_progress"]["status"],
        json!("Analysiere Hosts: 10/254")
    );
}

#[tokio::test]
async fn heartbeat_patches_liveness_fields() {
    let (base_url, log) = spawn_stub().await;
    let client = registered_client(&base_url).await;

    client.heartbeat().await.expect("heartbeat");

    let patch = entries(&log)
        .into_iter()
        .find(|(method, endpoint, _)| method == "PATCH" && endpoint == "connectors")
        .map(|(_, _, body)| body)
        .expect("patch request");
    assert_eq!(patch["status"], json!("active"));
    assert!(patch["last_seen"].is_string());
}
