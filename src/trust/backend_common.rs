use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::x509::X509;

use crate::authority::render_hex;
use crate::TrustStoreError;

use super::{TrustScope, TrustStoreBridge};

/// Fingerprint and subject CN of a certificate handed to the bridge; what
/// the backends key their state on.
pub(super) struct CertificateIdentity {
    pub fingerprint: String,
    pub subject_common_name: String,
    pub cert_pem: Vec<u8>,
}

pub(super) fn certificate_identity(cert_der: &[u8]) -> Result<CertificateIdentity, TrustStoreError> {
    let cert = X509::from_der(cert_der)
        .map_err(|error| TrustStoreError::InvalidCertificate(error.to_string()))?;
    let digest = cert
        .digest(MessageDigest::sha256())
        .map_err(|error| TrustStoreError::InvalidCertificate(error.to_string()))?;
    let subject_common_name = cert
        .subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|cn| cn.to_string())
        .unwrap_or_default();
    let cert_pem = cert
        .to_pem()
        .map_err(|error| TrustStoreError::InvalidCertificate(error.to_string()))?;
    Ok(CertificateIdentity {
        fingerprint: render_hex(&digest),
        subject_common_name,
        cert_pem,
    })
}

/// In-memory bridge for tests and embeddings that must not touch the OS
/// store. Scope-aware and subject-searchable like the real backends.
#[derive(Debug, Default)]
pub struct MemoryTrustBridge {
    entries: Mutex<HashMap<&'static str, Vec<(String, String)>>>,
}

impl TrustStoreBridge for MemoryTrustBridge {
    fn is_trusted(&self, cert_der: &[u8], scope: TrustScope) -> Result<bool, TrustStoreError> {
        let identity = certificate_identity(cert_der)?;
        let entries = self
            .entries
            .lock()
            .map_err(|_| lock_error("is_trusted"))?;
        Ok(entries
            .get(scope.as_str())
            .is_some_and(|scoped| {
                scoped
                    .iter()
                    .any(|(fingerprint, _)| *fingerprint == identity.fingerprint)
            }))
    }

    fn install(&self, cert_der: &[u8], scope: TrustScope) -> Result<(), TrustStoreError> {
        let identity = certificate_identity(cert_der)?;
        let mut entries = self.entries.lock().map_err(|_| lock_error("install"))?;
        let scoped = entries.entry(scope.as_str()).or_default();
        if scoped
            .iter()
            .any(|(fingerprint, _)| *fingerprint == identity.fingerprint)
        {
            return Ok(());
        }
        scoped.push((identity.fingerprint, identity.subject_common_name));
        Ok(())
    }

    fn remove_by_issuer_subject(
        &self,
        subject_pattern: &str,
        scope: TrustScope,
    ) -> Result<usize, TrustStoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| lock_error("remove_by_issuer_subject"))?;
        let Some(scoped) = entries.get_mut(scope.as_str()) else {
            return Ok(0);
        };
        let before = scoped.len();
        scoped.retain(|(_, subject)| !subject.contains(subject_pattern));
        Ok(before - scoped.len())
    }
}

fn lock_error(operation: &str) -> TrustStoreError {
    TrustStoreError::Io(io::Error::other(format!(
        "trust bridge lock poisoned during {operation}"
    )))
}

#[derive(Debug)]
pub(super) struct CommandOutcome {
    pub success: bool,
    // certutil reports removal counts on stdout; unread elsewhere.
    #[allow(dead_code)]
    pub stdout: String,
    pub stderr: String,
}

pub(super) fn run_command<I, S>(
    operation: &str,
    program: &str,
    args: I,
) -> Result<CommandOutcome, TrustStoreError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(program).args(args).output().map_err(|error| {
        if error.kind() == io::ErrorKind::NotFound {
            return TrustStoreError::UnsupportedOperation(format!(
                "{operation}: command '{program}' not found"
            ));
        }
        if error.kind() == io::ErrorKind::PermissionDenied {
            return TrustStoreError::PermissionDenied {
                operation: operation.to_string(),
                detail: error.to_string(),
            };
        }
        TrustStoreError::Io(error)
    })?;

    Ok(CommandOutcome {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

pub(super) struct TrustState {
    pub fingerprint: String,
    pub subject: String,
    pub cert_path: PathBuf,
}

pub(super) fn write_staged_cert(
    namespace: &str,
    scope: TrustScope,
    cert_pem: &[u8],
) -> Result<PathBuf, TrustStoreError> {
    let path = staged_cert_path(namespace, scope)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, cert_pem)?;
    Ok(path)
}

pub(super) fn write_state(
    namespace: &str,
    scope: TrustScope,
    fingerprint: &str,
    subject: &str,
    cert_path: &Path,
) -> Result<(), TrustStoreError> {
    let state_path = trust_state_path(namespace, scope)?;
    if let Some(parent) = state_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = format!(
        "fingerprint={}\nsubject={}\ncert_path={}\n",
        fingerprint,
        subject,
        cert_path.display()
    );
    fs::write(state_path, body)?;
    Ok(())
}

pub(super) fn read_state(
    namespace: &str,
    scope: TrustScope,
) -> Result<Option<TrustState>, TrustStoreError> {
    let state_path = trust_state_path(namespace, scope)?;
    if !state_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(state_path)?;
    let mut fingerprint = None;
    let mut subject = None;
    let mut cert_path = None;
    for line in content.lines() {
        if let Some(value) = line.strip_prefix("fingerprint=") {
            fingerprint = Some(value.to_string());
            continue;
        }
        if let Some(value) = line.strip_prefix("subject=") {
            subject = Some(value.to_string());
            continue;
        }
        if let Some(value) = line.strip_prefix("cert_path=") {
            cert_path = Some(PathBuf::from(value));
        }
    }
    match (fingerprint, subject, cert_path) {
        (Some(fingerprint), Some(subject), Some(cert_path)) => Ok(Some(TrustState {
            fingerprint,
            subject,
            cert_path,
        })),
        _ => Ok(None),
    }
}

pub(super) fn clear_state(namespace: &str, scope: TrustScope) -> Result<(), TrustStoreError> {
    let state_path = trust_state_path(namespace, scope)?;
    match fs::remove_file(state_path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(TrustStoreError::Io(error)),
    }
}

pub(super) fn operation_error(operation: &str, detail: impl Into<String>) -> TrustStoreError {
    let detail = detail.into();
    if permission_denied_hint(&detail) {
        return TrustStoreError::PermissionDenied {
            operation: operation.to_string(),
            detail,
        };
    }
    TrustStoreError::OperationFailed(format!("{operation}: {detail}"))
}

fn permission_denied_hint(detail: &str) -> bool {
    let lower = detail.to_ascii_lowercase();
    lower.contains("permission denied")
        || lower.contains("not permitted")
        || lower.contains("user interaction is not allowed")
        || lower.contains("access is denied")
}

fn staged_cert_path(namespace: &str, scope: TrustScope) -> Result<PathBuf, TrustStoreError> {
    Ok(base_state_dir()?
        .join(namespace)
        .join(format!("root-{}.pem", scope.as_str())))
}

fn trust_state_path(namespace: &str, scope: TrustScope) -> Result<PathBuf, TrustStoreError> {
    Ok(base_state_dir()?
        .join(namespace)
        .join(format!("trust_state_{}.txt", scope.as_str())))
}

fn base_state_dir() -> Result<PathBuf, TrustStoreError> {
    if let Some(path) = std::env::var_os("CERTFORGE_STATE_DIR") {
        return Ok(PathBuf::from(path));
    }

    if let Some(home) = std::env::var_os("HOME") {
        return Ok(PathBuf::from(home).join(".mitm-certforge"));
    }

    Err(TrustStoreError::UnsupportedOperation(
        "unable to determine state directory (set CERTFORGE_STATE_DIR)".to_string(),
    ))
}
