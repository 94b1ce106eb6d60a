use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::scanner::{CertificateData, DiscoveryResult};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("control plane returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("connector not registered")]
    NotRegistered,
}

/// Connector identity established by token validation.
#[derive(Debug, Clone)]
pub struct ConnectorInfo {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
}

/// Runtime configuration pushed from the backend via polling.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectorConfig {
    #[serde(default)]
    pub scan_targets: Vec<String>,
    #[serde(default)]
    pub scan_ports: Vec<u16>,
    #[serde(default)]
    pub trigger_scan: u64,
}

/// Everything the agent needs from the control plane. The scan pipeline only
/// depends on this trait; the Supabase client below is the one real
/// implementation, and tests substitute a recording mock.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn validate_and_register(&self, token: &str) -> Result<ConnectorInfo, ControlPlaneError>;

    async fn upsert_asset(&self, host: &str, port: u16) -> Result<String, ControlPlaneError>;

    async fn upsert_certificate(&self, cert: &CertificateData) -> Result<(), ControlPlaneError>;

    async fn upsert_discovery(&self, result: &DiscoveryResult) -> Result<(), ControlPlaneError>;

    async fn heartbeat(&self) -> Result<(), ControlPlaneError>;

    async fn get_config(&self) -> Result<Option<ConnectorConfig>, ControlPlaneError>;

    async fn clear_scan_trigger(&self) -> Result<(), ControlPlaneError>;

    async fn send_log(
        &self,
        level: &str,
        message: &str,
        metadata: Option<Value>,
    ) -> Result<(), ControlPlaneError>;

    async fn update_scan_progress(
        &self,
        current: usize,
        total: usize,
        status: &str,
    ) -> Result<(), ControlPlaneError>;
}

#[derive(Debug, Clone)]
struct Identity {
    connector_id: String,
    tenant_id: String,
}

/// Supabase PostgREST client. Safe for concurrent calls from multiple scan
/// tasks; the identity is written once during registration.
pub struct SupabaseClient {
    base_url: String,
    api_key: String,
    connector_name: String,
    http: reqwest::Client,
    identity: OnceLock<Identity>,
}

impl SupabaseClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        connector_name: &str,
    ) -> Result<Self, ControlPlaneError> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            connector_name: connector_name.to_string(),
            http,
            identity: OnceLock::new(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/rest/v1/{path}", self.base_url))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }

    fn identity(&self) -> Result<&Identity, ControlPlaneError> {
        self.identity.get().ok_or(ControlPlaneError::NotRegistered)
    }

    async fn check(response: Response) -> Result<Response, ControlPlaneError> {
        let status = response.status();
        if status.as_u16() >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(ControlPlaneError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Raw `config` JSON of this connector, used by the read-modify-write
    /// operations (trigger clearing, progress updates).
    async fn fetch_config_value(&self) -> Result<Value, ControlPlaneError> {
        let identity = self.identity()?;

        #[derive(Deserialize)]
        struct Row {
            #[serde(default)]
            config: Value,
        }

        let response = self
            .request(
                Method::GET,
                &format!("connectors?id=eq.{}&select=config", identity.connector_id),
            )
            .send()
            .await?;
        let rows: Vec<Row> = Self::check(response).await?.json().await?;

        Ok(rows.into_iter().next().map(|row| row.config).unwrap_or(Value::Null))
    }

    async fn patch_config_value(&self, config: Value) -> Result<(), ControlPlaneError> {
        let identity = self.identity()?;
        let response = self
            .request(
                Method::PATCH,
                &format!("connectors?id=eq.{}", identity.connector_id),
            )
            .json(&json!({ "config": config }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for SupabaseClient {
    async fn validate_and_register(&self, token: &str) -> Result<ConnectorInfo, ControlPlaneError> {
        #[derive(Deserialize)]
        struct Row {
            connector_id: String,
            tenant_id: String,
            name: String,
        }

        let response = self
            .request(Method::POST, "rpc/validate_connector_token")
            .json(&json!({ "p_token": token }))
            .send()
            .await?;
        let rows: Vec<Row> = Self::check(response).await?.json().await?;

        let Some(row) = rows.into_iter().next() else {
            return Err(ControlPlaneError::Decode(
                "token invalid or connector not found".to_string(),
            ));
        };

        let _ = self.identity.set(Identity {
            connector_id: row.connector_id.clone(),
            tenant_id: row.tenant_id.clone(),
        });

        Ok(ConnectorInfo {
            id: row.connector_id,
            tenant_id: row.tenant_id,
            name: row.name,
        })
    }

    async fn upsert_asset(&self, host: &str, port: u16) -> Result<String, ControlPlaneError> {
        let identity = self.identity()?;

        #[derive(Deserialize)]
        struct Row {
            id: String,
        }

        let response = self
            .request(Method::POST, "assets")
            .header("Prefer", "return=representation,resolution=merge-duplicates")
            .json(&json!({
                "tenant_id": identity.tenant_id,
                "connector_id": identity.connector_id,
                "host": host,
                "port": port,
                "proto": "tls",
                "status": "active",
            }))
            .send()
            .await?;
        let rows: Vec<Row> = Self::check(response).await?.json().await?;

        rows.into_iter()
            .next()
            .map(|row| row.id)
            .ok_or_else(|| ControlPlaneError::Decode("no asset returned".to_string()))
    }

    async fn upsert_certificate(&self, cert: &CertificateData) -> Result<(), ControlPlaneError> {
        let identity = self.identity()?;

        let mut cert = cert.clone();
        if cert.tenant_id.is_none() {
            cert.tenant_id = Some(identity.tenant_id.clone());
        }

        let response = self
            .request(Method::POST, "certificates")
            .header("Prefer", "resolution=merge-duplicates")
            .json(&cert)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn upsert_discovery(&self, result: &DiscoveryResult) -> Result<(), ControlPlaneError> {
        let identity = self.identity()?;

        // PostgREST has no upsert on this table, so: check, then PATCH or POST
        let check_path = format!(
            "discovery_results?connector_id=eq.{}&ip_address=eq.{}&select=id",
            identity.connector_id, result.ip_address
        );
        let response = self.request(Method::GET, &check_path).send().await?;
        let existing: Vec<Value> = Self::check(response).await?.json().await.unwrap_or_default();

        let payload = json!({
            "tenant_id": identity.tenant_id,
            "connector_id": identity.connector_id,
            "host": result.host,
            "ip_address": result.ip_address,
            "open_ports": result.open_ports,
            "services": result.services,
            "response_time": result.response_time,
            "discovered_at": Utc::now().to_rfc3339(),
        });

        let response = if existing.is_empty() {
            self.request(Method::POST, "discovery_results")
                .json(&payload)
                .send()
                .await?
        } else {
            let patch_path = format!(
                "discovery_results?connector_id=eq.{}&ip_address=eq.{}",
                identity.connector_id, result.ip_address
            );
            self.request(Method::PATCH, &patch_path)
                .json(&payload)
                .send()
                .await?
        };
        Self::check(response).await?;
        Ok(())
    }

    async fn heartbeat(&self) -> Result<(), ControlPlaneError> {
        let identity = self.identity()?;
        let response = self
            .request(
                Method::PATCH,
                &format!("connectors?id=eq.{}", identity.connector_id),
            )
            .json(&json!({
                "last_seen": Utc::now().to_rfc3339(),
                "status": "active",
            }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn get_config(&self) -> Result<Option<ConnectorConfig>, ControlPlaneError> {
        let config = self.fetch_config_value().await?;
        if config.is_null() {
            return Ok(None);
        }
        let parsed: ConnectorConfig = serde_json::from_value(config)
            .map_err(|e| ControlPlaneError::Decode(e.to_string()))?;
        Ok(Some(parsed))
    }

    async fn clear_scan_trigger(&self) -> Result<(), ControlPlaneError> {
        let mut config = self.fetch_config_value().await?;
        if let Some(map) = config.as_object_mut() {
            map.remove("trigger_scan");
        }
        self.patch_config_value(config).await
    }

    async fn send_log(
        &self,
        level: &str,
        message: &str,
        metadata: Option<Value>,
    ) -> Result<(), ControlPlaneError> {
        let identity = self.identity()?;
        // UI logging must never take down the agent; HTTP error statuses
        // are swallowed here.
        let _ = self
            .request(Method::POST, "agent_logs")
            .json(&json!({
                "tenant_id": identity.tenant_id,
                "connector_id": identity.connector_id,
                "connector_name": self.connector_name,
                "level": level,
                "message": message,
                "metadata": metadata,
                "timestamp": Utc::now().to_rfc3339(),
            }))
            .send()
            .await?;
        Ok(())
    }

    async fn update_scan_progress(
        &self,
        current: usize,
        total: usize,
        status: &str,
    ) -> Result<(), ControlPlaneError> {
        let mut config = self.fetch_config_value().await?;
        if !config.is_object() {
            config = json!({});
        }
        if let Some(map) = config.as_object_mut() {
            map.insert("scanning".to_string(), json!(current < total));
            map.insert(
                "scan_progress".to_string(),
                json!({
                    "current": current,
                    "total": total,
                    "status": status,
                }),
            );
        }
        self.patch_config_value(config).await
    }
}
