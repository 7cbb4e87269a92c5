//! TLS material loading
//!
//! Reads CA certificates, client certificates and private keys from PEM
//! files and checks that they parse before they are handed to the MQTT,
//! NATS or Kafka client.

use std::fs;

use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::RootCertStore;

/// Error type for TLS configuration
#[derive(Debug)]
pub enum TlsError {
    /// IO error reading files
    Io { path: String, source: std::io::Error },
    /// Certificate parsing error
    CertificateError(String),
    /// Private key error
    PrivateKeyError(String),
    /// TLS configuration error
    ConfigError(String),
}

impl std::fmt::Display for TlsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsError::Io { path, source } => write!(f, "IO error reading {}: {}", path, source),
            TlsError::CertificateError(msg) => write!(f, "Certificate error: {}", msg),
            TlsError::PrivateKeyError(msg) => write!(f, "Private key error: {}", msg),
            TlsError::ConfigError(msg) => write!(f, "TLS config error: {}", msg),
        }
    }
}

impl std::error::Error for TlsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TlsError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Validated PEM material for a TLS client
#[derive(Clone)]
pub struct ClientTlsMaterial {
    /// CA bundle (PEM bytes)
    pub ca: Vec<u8>,
    /// Client certificate chain and private key (PEM bytes)
    pub identity: (Vec<u8>, Vec<u8>),
}

impl std::fmt::Debug for ClientTlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material
        f.debug_struct("ClientTlsMaterial")
            .field("ca_len", &self.ca.len())
            .field("cert_len", &self.identity.0.len())
            .finish()
    }
}

fn read_file(path: &str) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|source| TlsError::Io {
        path: path.to_string(),
        source,
    })
}

/// Parse certificates from PEM bytes
fn parse_certs(pem: &[u8], path: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            TlsError::CertificateError(format!("Failed to parse certificates in {}: {}", path, e))
        })?;

    if certs.is_empty() {
        return Err(TlsError::CertificateError(format!(
            "No certificates found in {}",
            path
        )));
    }

    Ok(certs)
}

/// Load CA certificates into a root store
fn load_ca_certs(pem: &[u8], path: &str) -> Result<RootCertStore, TlsError> {
    let mut root_store = RootCertStore::empty();
    let certs = parse_certs(pem, path)?;

    for cert in certs {
        root_store.add(cert).map_err(|e| {
            TlsError::CertificateError(format!("Failed to add CA certificate from {}: {}", path, e))
        })?;
    }

    Ok(root_store)
}

/// Read a CA bundle and check it holds at least one usable certificate.
///
/// Returns the raw PEM bytes.
pub fn read_ca_file(path: &str) -> Result<Vec<u8>, TlsError> {
    let pem = read_file(path)?;
    load_ca_certs(&pem, path)?;
    Ok(pem)
}

/// Read a client certificate chain and its private key.
///
/// Returns the raw PEM bytes of both files.
pub fn read_client_identity(cert_path: &str, key_path: &str) -> Result<(Vec<u8>, Vec<u8>), TlsError> {
    let cert_pem = read_file(cert_path)?;
    parse_certs(&cert_pem, cert_path)?;

    let key_pem = read_file(key_path)?;
    PrivateKeyDer::from_pem_slice(&key_pem).map_err(|e| {
        TlsError::PrivateKeyError(format!("Failed to parse private key in {}: {}", key_path, e))
    })?;

    Ok((cert_pem, key_pem))
}

/// Load a full client TLS configuration: CA bundle plus client identity
pub fn load_client_material(
    ca_path: &str,
    cert_path: &str,
    key_path: &str,
) -> Result<ClientTlsMaterial, TlsError> {
    let ca = read_ca_file(ca_path)?;
    let identity = read_client_identity(cert_path, key_path)?;
    Ok(ClientTlsMaterial {
        ca,
        identity,
    })
}
