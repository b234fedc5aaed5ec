mod authority;
mod config;
mod errors;
mod forge;
mod host_cache;
mod identity;
mod keys;
mod persistence;
mod trust;
mod wildcard;

pub use authority::{CertificateAuthority, RootMaterial};
pub use config::{ForgeConfig, HashAlgorithm};
pub use errors::{ForgeError, TrustStoreError};
pub use forge::CertificateForge;
pub use host_cache::{HostCertificateCache, IssuanceMetricsSnapshot};
pub use identity::IssuedCertificate;
pub use keys::KeyPairProvider;
pub use persistence::{MemoryPreferenceStore, PreferenceStore};
pub use trust::{platform_trust_bridge, MemoryTrustBridge, TrustScope, TrustStoreBridge};
pub use wildcard::{cache_key_for_host, normalize_host, parse_ip_literal};
