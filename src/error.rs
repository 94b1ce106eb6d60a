use thiserror::Error;

use crate::supabase::ControlPlaneError;

/// Agent-level error taxonomy. Probe failures (connect timeout/refused) are
/// deliberately absent: they are treated as "port closed" and never surfaced.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("enrollment failed: {0}")]
    Enrollment(String),

    #[error("no valid private networks found")]
    NoPrivateNetwork,

    #[error("interface enumeration failed: {0}")]
    InterfaceEnumeration(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("no certificates found")]
    NoPeerCertificates,

    #[error("certificate parse failed: {0}")]
    CertificateParse(String),

    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),

    #[error("scan cancelled")]
    Cancelled,
}
