use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

use crate::error::AgentError;

/// Leaf-certificate metadata as published to the control plane.
///
/// `fingerprint` (uppercase hex SHA-256 of the DER bytes) is the content
/// identity: two probes of the same certificate always produce the same
/// string.
#[derive(Debug, Clone, Serialize)]
pub struct CertificateData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub fingerprint: String,
    pub subject_cn: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub san: Vec<String>,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub key_algorithm: String,
    #[serde(rename = "key_size", skip_serializing_if = "key_size_is_unknown")]
    pub key_size_bits: u32,
    #[serde(rename = "serial_number")]
    pub serial: String,
    #[serde(rename = "signature_algorithm")]
    pub signature_algorithm: String,
}

fn key_size_is_unknown(bits: &u32) -> bool {
    *bits == 0
}

/// TLS probe: connects, handshakes without verification and extracts the
/// peer's leaf-certificate metadata. The goal is inventory, not trust, so
/// invalid, expired and self-signed certificates are all fair game.
pub struct CertificateScanner {
    timeout: Duration,
    connector: tokio_native_tls::TlsConnector,
}

impl CertificateScanner {
    pub fn new(timeout: Duration) -> Result<Self, AgentError> {
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|e| AgentError::TlsHandshake(format!("connector setup: {e}")))?;

        Ok(Self {
            timeout,
            connector: tokio_native_tls::TlsConnector::from(connector),
        })
    }

    /// Handshake with `host:port` (SNI = host) and return the leaf metadata.
    pub async fn scan_host(
        &self,
        cancel: &CancellationToken,
        host: &str,
        port: u16,
    ) -> Result<CertificateData, AgentError> {
        let address = format!("{host}:{port}");

        let stream = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            result = tokio::time::timeout(self.timeout, TcpStream::connect(&address)) => {
                match result {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => return Err(AgentError::TlsHandshake(format!("connect: {e}"))),
                    Err(_) => return Err(AgentError::TlsHandshake("connect timed out".to_string())),
                }
            }
        };

        let tls_stream = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            result = tokio::time::timeout(self.timeout, self.connector.connect(host, stream)) => {
                match result {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => return Err(AgentError::TlsHandshake(e.to_string())),
                    Err(_) => return Err(AgentError::TlsHandshake("handshake timed out".to_string())),
                }
            }
        };

        let certificate = tls_stream
            .get_ref()
            .peer_certificate()
            .map_err(|e| AgentError::TlsHandshake(e.to_string()))?
            .ok_or(AgentError::NoPeerCertificates)?;

        let der = certificate
            .to_der()
            .map_err(|e| AgentError::CertificateParse(e.to_string()))?;

        parse_certificate_metadata(&der)
    }
}

/// Extract the inventory metadata from raw DER bytes. Pure, so the whole
/// extraction is testable without a TLS endpoint.
pub fn parse_certificate_metadata(der: &[u8]) -> Result<CertificateData, AgentError> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| AgentError::CertificateParse(e.to_string()))?;

    let subject_cn = common_name(cert.subject());
    let issuer = common_name(cert.issuer());
    let san = extract_san(&cert);

    let validity = cert.validity();
    let not_before = timestamp_of(validity.not_before)?;
    let not_after = timestamp_of(validity.not_after)?;

    let (key_algorithm, key_size_bits) = public_key_info(cert.public_key());
    let signature_algorithm =
        signature_algorithm_name(&cert.signature_algorithm.algorithm.to_id_string());

    Ok(CertificateData {
        asset_id: None,
        tenant_id: None,
        fingerprint: fingerprint_hex(der),
        subject_cn,
        san,
        issuer,
        not_before,
        not_after,
        key_algorithm: key_algorithm.to_string(),
        key_size_bits,
        serial: cert.serial.to_string(),
        signature_algorithm,
    })
}

/// Uppercase hex SHA-256 over the DER bytes, 64 characters.
pub fn fingerprint_hex(der: &[u8]) -> String {
    hex::encode_upper(Sha256::digest(der))
}

fn common_name(name: &X509Name<'_>) -> String {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Subject Alternative Names, grouped: DNS names, then IP addresses, then
/// email addresses, then URIs. Within-group order is preserved.
fn extract_san(cert: &X509Certificate<'_>) -> Vec<String> {
    let mut dns = Vec::new();
    let mut ips = Vec::new();
    let mut emails = Vec::new();
    let mut uris = Vec::new();

    if let Ok(Some(extension)) = cert.subject_alternative_name() {
        for name in &extension.value.general_names {
            match name {
                GeneralName::DNSName(value) => dns.push(value.to_string()),
                GeneralName::IPAddress(bytes) => {
                    if let Some(ip) = ip_from_bytes(bytes) {
                        ips.push(ip.to_string());
                    }
                }
                GeneralName::RFC822Name(value) => emails.push(value.to_string()),
                GeneralName::URI(value) => uris.push(value.to_string()),
                _ => {}
            }
        }
    }

    dns.into_iter()
        .chain(ips)
        .chain(emails)
        .chain(uris)
        .collect()
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        _ => None,
    }
}

fn timestamp_of(time: ASN1Time) -> Result<DateTime<Utc>, AgentError> {
    DateTime::<Utc>::from_timestamp(time.timestamp(), 0)
        .ok_or_else(|| AgentError::CertificateParse("validity timestamp out of range".to_string()))
}

const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
const OID_ED25519: &str = "1.3.101.112";
const OID_DSA: &str = "1.2.840.10040.4.1";

/// Canonical key algorithm name plus key size in bits (0 when the size
/// cannot be derived from the key type).
fn public_key_info(spki: &SubjectPublicKeyInfo<'_>) -> (&'static str, u32) {
    match spki.algorithm.algorithm.to_id_string().as_str() {
        OID_RSA_ENCRYPTION => {
            let bits = match spki.parsed() {
                Ok(PublicKey::RSA(rsa)) => rsa_key_bits(rsa.modulus),
                _ => 0,
            };
            ("RSA", bits)
        }
        OID_EC_PUBLIC_KEY => {
            let curve = spki
                .algorithm
                .parameters
                .as_ref()
                .and_then(|params| params.as_oid().ok())
                .map(|oid| oid.to_id_string());
            ("ECDSA", curve.map_or(0, |oid| ec_key_bits(&oid)))
        }
        OID_ED25519 => ("Ed25519", 256),
        OID_DSA => ("DSA", 0),
        _ => ("Unknown", 0),
    }
}

/// Modulus bit length, ignoring the DER sign byte.
fn rsa_key_bits(modulus: &[u8]) -> u32 {
    let significant: &[u8] = match modulus.split_first() {
        Some((0, rest)) => rest,
        _ => modulus,
    };
    match significant.first() {
        Some(first) => significant.len() as u32 * 8 - first.leading_zeros(),
        None => 0,
    }
}

fn ec_key_bits(curve_oid: &str) -> u32 {
    match curve_oid {
        "1.2.840.10045.3.1.7" => 256, // P-256
        "1.3.132.0.34" => 384,        // P-384
        "1.3.132.0.35" => 521,        // P-521
        "1.3.132.0.10" => 256,        // secp256k1
        _ => 0,
    }
}

/// Canonical signature algorithm names (the usual Go/OpenSSL spellings),
/// falling back to the dotted OID for exotic algorithms.
fn signature_algorithm_name(oid: &str) -> String {
    let name = match oid {
        "1.2.840.113549.1.1.4" => "MD5-RSA",
        "1.2.840.113549.1.1.5" => "SHA1-RSA",
        "1.2.840.113549.1.1.11" => "SHA256-RSA",
        "1.2.840.113549.1.1.12" => "SHA384-RSA",
        "1.2.840.113549.1.1.13" => "SHA512-RSA",
        "1.2.840.113549.1.1.10" => "RSA-PSS",
        "1.2.840.10045.4.1" => "ECDSA-SHA1",
        "1.2.840.10045.4.3.2" => "ECDSA-SHA256",
        "1.2.840.10045.4.3.3" => "ECDSA-SHA384",
        "1.2.840.10045.4.3.4" => "ECDSA-SHA512",
        "1.3.101.112" => "Ed25519",
        "1.2.840.10040.4.3" => "DSA-SHA1",
        other => return other.to_string(),
    };
    name.to_string()
}
