use std::time::Duration;

use crate::TrustStoreError;

use super::backend_common::{
    certificate_identity, clear_state, operation_error, read_state, run_command, write_staged_cert,
    write_state,
};
use super::{TrustScope, TrustStoreBridge};

// User-scope Root installs pop an interactive confirmation dialog; the pauses
// give the window time to come forward before and settle after.
const PROMPT_PAUSE: Duration = Duration::from_millis(250);

#[derive(Debug, Default)]
pub(super) struct PlatformTrustBackend;

impl TrustStoreBridge for PlatformTrustBackend {
    fn install(&self, cert_der: &[u8], scope: TrustScope) -> Result<(), TrustStoreError> {
        let identity = certificate_identity(cert_der)?;
        let cert_path = write_staged_cert("windows", scope, &identity.cert_pem)?;
        let cert_arg = cert_path
            .to_str()
            .ok_or_else(|| operation_error("install_trust", "invalid staged cert path"))?;

        let mut args = scope_args(scope);
        args.extend(["-f", "-addstore", "Root", cert_arg]);

        if scope == TrustScope::User {
            std::thread::sleep(PROMPT_PAUSE);
        }
        let outcome = run_command("install_trust", "certutil", args)?;
        if scope == TrustScope::User {
            std::thread::sleep(PROMPT_PAUSE);
        }
        if !outcome.success {
            return Err(operation_error("install_trust", outcome.stderr));
        }

        write_state(
            "windows",
            scope,
            &identity.fingerprint,
            &identity.subject_common_name,
            &cert_path,
        )?;
        Ok(())
    }

    fn is_trusted(&self, cert_der: &[u8], scope: TrustScope) -> Result<bool, TrustStoreError> {
        let identity = certificate_identity(cert_der)?;
        let Some(state) = read_state("windows", scope)? else {
            return Ok(false);
        };
        if state.fingerprint != identity.fingerprint {
            return Ok(false);
        }

        let mut args = scope_args(scope);
        args.extend(["-store", "Root", state.subject.as_str()]);
        let outcome = run_command("is_trusted", "certutil", args)?;
        Ok(outcome.success)
    }

    fn remove_by_issuer_subject(
        &self,
        subject_pattern: &str,
        scope: TrustScope,
    ) -> Result<usize, TrustStoreError> {
        let mut args = scope_args(scope);
        args.extend(["-delstore", "Root", subject_pattern]);
        let outcome = run_command("remove_trust", "certutil", args)?;
        if !outcome.success {
            let lower = outcome.stderr.to_ascii_lowercase();
            if lower.contains("cannot find") || lower.contains("not found") {
                return Ok(0);
            }
            return Err(operation_error("remove_trust", outcome.stderr));
        }

        // certutil prints one "Deleting Certificate" line per removed entry.
        let removed = outcome
            .stdout
            .lines()
            .filter(|line| line.to_ascii_lowercase().contains("deleting certificate"))
            .count()
            .max(1);

        if let Some(state) = read_state("windows", scope)? {
            if state.subject.contains(subject_pattern) {
                clear_state("windows", scope)?;
            }
        }
        Ok(removed)
    }
}

fn scope_args<'a>(scope: TrustScope) -> Vec<&'a str> {
    match scope {
        TrustScope::User => vec!["-user"],
        TrustScope::Machine => Vec::new(),
    }
}
