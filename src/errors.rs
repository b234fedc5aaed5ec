use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    #[error("certificate build failed: {0}")]
    CertificateBuild(String),
    #[error("invalid certificate material: {0}")]
    InvalidMaterial(String),
    #[error("root persistence failed: {0}")]
    Persistence(String),
    #[error("unable to produce a certificate for host {host}: {detail}")]
    IssuanceFailed { host: String, detail: String },
    #[error("TLS identity build failed: {0}")]
    IdentityBuild(String),
    #[error("certificate forge lock poisoned")]
    LockPoisoned,
    #[error("trust store error: {0}")]
    TrustStore(#[from] TrustStoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<openssl::error::ErrorStack> for ForgeError {
    fn from(value: openssl::error::ErrorStack) -> Self {
        Self::CertificateBuild(value.to_string())
    }
}

impl From<rustls::Error> for ForgeError {
    fn from(value: rustls::Error) -> Self {
        Self::IdentityBuild(value.to_string())
    }
}

#[derive(Debug, Error)]
pub enum TrustStoreError {
    #[error("permission denied while performing {operation}: {detail}")]
    PermissionDenied { operation: String, detail: String },
    #[error("trust store operation failed: {0}")]
    OperationFailed(String),
    #[error("invalid certificate handed to trust store: {0}")]
    InvalidCertificate(String),
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
