use std::path::PathBuf;

use crate::TrustStoreError;

use super::backend_common::{
    certificate_identity, clear_state, operation_error, read_state, run_command, write_staged_cert,
    write_state,
};
use super::{TrustScope, TrustStoreBridge};

// security(1) refuses deletes once nothing matches; this caps the loop in
// case it keeps reporting success on an emptied keychain.
const MAX_REMOVALS_PER_CALL: usize = 32;

#[derive(Debug, Default)]
pub(super) struct PlatformTrustBackend;

impl TrustStoreBridge for PlatformTrustBackend {
    fn install(&self, cert_der: &[u8], scope: TrustScope) -> Result<(), TrustStoreError> {
        let identity = certificate_identity(cert_der)?;
        let cert_path = write_staged_cert("macos", scope, &identity.cert_pem)?;
        let keychain = keychain_path(scope)?;

        if self.is_trusted(cert_der, scope)? {
            write_state(
                "macos",
                scope,
                &identity.fingerprint,
                &identity.subject_common_name,
                &cert_path,
            )?;
            return Ok(());
        }

        let args = [
            "add-trusted-cert",
            "-d",
            "-r",
            "trustRoot",
            "-k",
            keychain
                .to_str()
                .ok_or_else(|| operation_error("install_trust", "invalid keychain path"))?,
            cert_path
                .to_str()
                .ok_or_else(|| operation_error("install_trust", "invalid cert path"))?,
        ];
        let outcome = run_command("install_trust", "security", args)?;
        if !outcome.success {
            return Err(operation_error("install_trust", outcome.stderr));
        }

        write_state(
            "macos",
            scope,
            &identity.fingerprint,
            &identity.subject_common_name,
            &cert_path,
        )?;
        Ok(())
    }

    fn is_trusted(&self, cert_der: &[u8], scope: TrustScope) -> Result<bool, TrustStoreError> {
        let identity = certificate_identity(cert_der)?;
        let Some(state) = read_state("macos", scope)? else {
            return Ok(false);
        };
        if state.fingerprint != identity.fingerprint {
            return Ok(false);
        }

        let keychain = keychain_path(scope)?;
        let outcome = run_command(
            "is_trusted",
            "security",
            [
                "verify-cert",
                "-c",
                state
                    .cert_path
                    .to_str()
                    .ok_or_else(|| operation_error("is_trusted", "invalid staged cert path"))?,
                "-k",
                keychain
                    .to_str()
                    .ok_or_else(|| operation_error("is_trusted", "invalid keychain path"))?,
            ],
        )?;
        Ok(outcome.success)
    }

    fn remove_by_issuer_subject(
        &self,
        subject_pattern: &str,
        scope: TrustScope,
    ) -> Result<usize, TrustStoreError> {
        let keychain = keychain_path(scope)?;
        let keychain_arg = keychain
            .to_str()
            .ok_or_else(|| operation_error("remove_trust", "invalid keychain path"))?;

        let mut removed = 0;
        while removed < MAX_REMOVALS_PER_CALL {
            let outcome = run_command(
                "remove_trust",
                "security",
                ["delete-certificate", "-c", subject_pattern, keychain_arg],
            )?;
            if !outcome.success {
                let lower = outcome.stderr.to_ascii_lowercase();
                if lower.contains("could not find") || lower.contains("not found") {
                    break;
                }
                if removed == 0 {
                    return Err(operation_error("remove_trust", outcome.stderr));
                }
                break;
            }
            removed += 1;
        }

        if removed > 0 {
            if let Some(state) = read_state("macos", scope)? {
                if state.subject.contains(subject_pattern) {
                    clear_state("macos", scope)?;
                }
            }
        }
        Ok(removed)
    }
}

fn keychain_path(scope: TrustScope) -> Result<PathBuf, TrustStoreError> {
    match scope {
        TrustScope::Machine => Ok(PathBuf::from("/Library/Keychains/System.keychain")),
        TrustScope::User => {
            let Some(home) = std::env::var_os("HOME") else {
                return Err(TrustStoreError::UnsupportedOperation(
                    "HOME is not set; cannot resolve macOS login keychain".to_string(),
                ));
            };
            Ok(PathBuf::from(home).join("Library/Keychains/login.keychain-db"))
        }
    }
}
