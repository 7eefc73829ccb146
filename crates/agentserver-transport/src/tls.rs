// SPDX-License-Identifier: MIT OR Apache-2.0
//! TLS 1.3-only server configuration for the main bus and OOB listeners
//! (§6). Certificate/key material and rotation policy are bootstrap
//! concerns owned by the binary; this module only builds the
//! `rustls::ServerConfig` from PEM bytes already read from disk.

use agentserver_error::ErrorCode;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::sync::Arc;
use thiserror::Error;

/// Errors building the TLS server configuration.
#[derive(Debug, Error)]
pub enum TlsError {
    /// Certificate or key PEM could not be parsed.
    #[error("invalid certificate material: {0}")]
    InvalidMaterial(String),

    /// rustls rejected the assembled configuration.
    #[error("rustls configuration rejected: {0}")]
    ConfigRejected(#[from] rustls::Error),
}

impl TlsError {
    /// Map to the shared error taxonomy.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::TlsSetupFailed
    }
}

/// Build a TLS 1.3-only server config from a PEM certificate chain and
/// private key.
pub fn server_config(
    cert_chain_pem: &[u8],
    private_key_pem: &[u8],
) -> Result<Arc<ServerConfig>, TlsError> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &cert_chain_pem[..])
        .collect::<Result<_, _>>()
        .map_err(|e| TlsError::InvalidMaterial(e.to_string()))?;

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut &private_key_pem[..])
        .map_err(|e| TlsError::InvalidMaterial(e.to_string()))?
        .ok_or_else(|| TlsError::InvalidMaterial("no private key found in PEM".to_string()))?;

    let config = ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(Arc::new(config))
}
