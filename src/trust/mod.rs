use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::TrustStoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustScope {
    User,
    Machine,
}

impl TrustScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Machine => "machine",
        }
    }
}

/// Capability contract over the OS trust store. The forge only ever talks to
/// this trait; platform mechanics live in the cfg-selected backends and are
/// chosen once at startup, never at call sites.
pub trait TrustStoreBridge: Send + Sync {
    fn is_trusted(&self, cert_der: &[u8], scope: TrustScope) -> Result<bool, TrustStoreError>;
    fn install(&self, cert_der: &[u8], scope: TrustScope) -> Result<(), TrustStoreError>;
    /// Best-effort removal of previously installed certificates whose subject
    /// matches the pattern. Returns how many were removed.
    fn remove_by_issuer_subject(
        &self,
        subject_pattern: &str,
        scope: TrustScope,
    ) -> Result<usize, TrustStoreError>;
}

mod backend_common;
#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
mod unsupported;
#[cfg(target_os = "windows")]
mod windows;

#[cfg(target_os = "linux")]
use linux::PlatformTrustBackend;
#[cfg(target_os = "macos")]
use macos::PlatformTrustBackend;
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
use unsupported::PlatformTrustBackend;
#[cfg(target_os = "windows")]
use windows::PlatformTrustBackend;

pub use backend_common::MemoryTrustBridge;

/// Bridge for the OS this process runs on, ready for injection into a
/// `CertificateAuthority`.
pub fn platform_trust_bridge() -> Arc<dyn TrustStoreBridge> {
    Arc::new(PlatformTrustBackend::default())
}
