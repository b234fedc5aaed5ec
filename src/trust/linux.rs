use std::path::{Path, PathBuf};

use crate::TrustStoreError;

use super::backend_common::{
    certificate_identity, clear_state, operation_error, read_state, run_command, write_staged_cert,
    write_state,
};
use super::{TrustScope, TrustStoreBridge};

#[derive(Debug, Default)]
pub(super) struct PlatformTrustBackend;

impl TrustStoreBridge for PlatformTrustBackend {
    fn install(&self, cert_der: &[u8], scope: TrustScope) -> Result<(), TrustStoreError> {
        require_machine_scope(scope, "install_trust")?;
        let identity = certificate_identity(cert_der)?;
        let cert_path = write_staged_cert("linux", scope, &identity.cert_pem)?;

        let anchor_path = system_anchor_path();
        if let Some(parent) = anchor_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&anchor_path, &identity.cert_pem).map_err(|error| {
            if error.kind() == std::io::ErrorKind::PermissionDenied {
                return TrustStoreError::PermissionDenied {
                    operation: "install_trust".to_string(),
                    detail: error.to_string(),
                };
            }
            TrustStoreError::Io(error)
        })?;

        let outcome = run_command("install_trust", "update-ca-certificates", ["--fresh"])?;
        if !outcome.success {
            return Err(operation_error("install_trust", outcome.stderr));
        }

        write_state(
            "linux",
            scope,
            &identity.fingerprint,
            &identity.subject_common_name,
            &cert_path,
        )?;
        Ok(())
    }

    fn is_trusted(&self, cert_der: &[u8], scope: TrustScope) -> Result<bool, TrustStoreError> {
        if scope == TrustScope::User {
            return Ok(false);
        }
        let identity = certificate_identity(cert_der)?;
        let Some(state) = read_state("linux", scope)? else {
            return Ok(false);
        };
        if state.fingerprint != identity.fingerprint {
            return Ok(false);
        }

        let ca_bundle = default_ca_bundle();
        let args = [
            "verify",
            "-CAfile",
            ca_bundle
                .to_str()
                .ok_or_else(|| operation_error("is_trusted", "invalid CA bundle path"))?,
            state
                .cert_path
                .to_str()
                .ok_or_else(|| operation_error("is_trusted", "invalid staged cert path"))?,
        ];
        let outcome = run_command("is_trusted", "openssl", args)?;
        Ok(outcome.success)
    }

    fn remove_by_issuer_subject(
        &self,
        subject_pattern: &str,
        scope: TrustScope,
    ) -> Result<usize, TrustStoreError> {
        if scope == TrustScope::User {
            return Ok(0);
        }
        let Some(state) = read_state("linux", scope)? else {
            return Ok(0);
        };
        if !state.subject.contains(subject_pattern) {
            return Ok(0);
        }

        let anchor_path = system_anchor_path();
        match std::fs::remove_file(&anchor_path) {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) if error.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(TrustStoreError::PermissionDenied {
                    operation: "remove_trust".to_string(),
                    detail: error.to_string(),
                });
            }
            Err(error) => return Err(TrustStoreError::Io(error)),
        }

        let outcome = run_command("remove_trust", "update-ca-certificates", ["--fresh"])?;
        if !outcome.success {
            return Err(operation_error("remove_trust", outcome.stderr));
        }
        clear_state("linux", scope)?;
        Ok(1)
    }
}

fn require_machine_scope(scope: TrustScope, operation: &str) -> Result<(), TrustStoreError> {
    if scope == TrustScope::Machine {
        return Ok(());
    }
    Err(TrustStoreError::UnsupportedOperation(format!(
        "{operation}: linux manages the system anchor directory only; per-user stores are not supported"
    )))
}

fn system_anchor_path() -> PathBuf {
    if let Some(path) = std::env::var_os("CERTFORGE_LINUX_CA_PATH") {
        return PathBuf::from(path);
    }
    PathBuf::from("/usr/local/share/ca-certificates/mitm-certforge-root.crt")
}

fn default_ca_bundle() -> &'static Path {
    Path::new("/etc/ssl/certs/ca-certificates.crt")
}
