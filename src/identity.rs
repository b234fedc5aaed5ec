use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;

use crate::ForgeError;

/// A forged end-entity certificate bundled with everything the proxy engine
/// needs to present it during a TLS handshake: the signed certificate, its
/// private key, the issuing chain, and a ready rustls `ServerConfig`.
/// Immutable after issuance.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    /// Cache key the certificate was issued for (possibly a wildcard).
    pub hostname: String,
    pub cert_der: Vec<u8>,
    pub cert_pem: String,
    pub key_pkcs8_der: Vec<u8>,
    /// Leaf first, issuing root last.
    pub chain_der: Vec<Vec<u8>>,
    pub serial_hex: String,
    pub not_before_unix: i64,
    pub not_after_unix: i64,
    pub server_config: Arc<ServerConfig>,
}

pub(crate) fn build_server_config(
    chain_der: &[Vec<u8>],
    key_pkcs8_der: &[u8],
) -> Result<Arc<ServerConfig>, ForgeError> {
    let chain: Vec<CertificateDer<'static>> = chain_der
        .iter()
        .map(|der| CertificateDer::from(der.clone()))
        .collect();
    let private_key = PrivateKeyDer::from(PrivatePkcs8KeyDer::from(key_pkcs8_der.to_vec()));
    let server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, private_key)?;
    Ok(Arc::new(server_config))
}
