use crate::TrustStoreError;

use super::{TrustScope, TrustStoreBridge};

#[derive(Debug, Default)]
pub(super) struct PlatformTrustBackend;

impl TrustStoreBridge for PlatformTrustBackend {
    fn is_trusted(&self, _cert_der: &[u8], _scope: TrustScope) -> Result<bool, TrustStoreError> {
        Err(TrustStoreError::UnsupportedOperation(
            "system trust query unsupported on this platform".to_string(),
        ))
    }

    fn install(&self, _cert_der: &[u8], _scope: TrustScope) -> Result<(), TrustStoreError> {
        Err(TrustStoreError::UnsupportedOperation(
            "system trust install unsupported on this platform".to_string(),
        ))
    }

    fn remove_by_issuer_subject(
        &self,
        _subject_pattern: &str,
        _scope: TrustScope,
    ) -> Result<usize, TrustStoreError> {
        Err(TrustStoreError::UnsupportedOperation(
            "system trust removal unsupported on this platform".to_string(),
        ))
    }
}
