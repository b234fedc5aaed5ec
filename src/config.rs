use openssl::hash::MessageDigest;
use serde::{Deserialize, Serialize};

use crate::ForgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        Self::Sha256
    }
}

impl HashAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    pub(crate) fn message_digest(self) -> MessageDigest {
        match self {
            Self::Sha256 => MessageDigest::sha256(),
            Self::Sha384 => MessageDigest::sha384(),
            Self::Sha512 => MessageDigest::sha512(),
        }
    }
}

/// Tunable policy surface for root and leaf issuance. Read-only once the
/// forge is constructed; `validate` runs up front so issuance paths never
/// see a malformed policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForgeConfig {
    /// Base name for persisted key material and the default PKCS#12 alias.
    pub key_container_name: String,
    pub root_common_name: String,
    /// Organization marker stamped into both the root and every leaf subject.
    pub organization: String,
    pub root_key_bits: u32,
    pub leaf_key_bits: u32,
    /// Logs generated private keys (base64 PKCS#8 DER) at debug level.
    /// Intentionally insecure; only for protocol debugging.
    pub log_private_keys: bool,
    /// Generate one end-entity key pair and reuse it for every leaf.
    pub reuse_server_key: bool,
    /// Reuse the root key pair as the end-entity key pair. Performance
    /// tradeoff: skips per-host RSA keygen entirely but removes the
    /// isolation between CA and leaf key material.
    pub reuse_root_key_for_server: bool,
    /// Persist the root cert+key to the preference store so it survives
    /// restarts.
    pub persist_root_across_restarts: bool,
    pub root_valid_days: u32,
    pub leaf_valid_years: u32,
    /// Backdate for notBefore, tolerates client/server clock skew.
    pub created_days_ago: u32,
    pub signature_hash: HashAlgorithm,
    /// Omitting the SAN produces certificates modern clients reject.
    pub add_subject_alt_name: bool,
    pub san_critical: bool,
    pub add_authority_key_identifier: bool,
    pub add_client_auth_eku: bool,
    pub certificate_policy_oid: Option<String>,
    pub crl_distribution_url: Option<String>,
    pub wildcard_enabled: bool,
    /// TLDs eligible for wildcard collapsing, without leading dot ("com").
    pub wildcard_tlds: Vec<String>,
    /// Bounded wait for callers parked behind an in-flight generation.
    pub generation_wait_timeout_ms: u64,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            key_container_name: "certforge".to_string(),
            root_common_name: "certforge Root Authority".to_string(),
            organization: "DO_NOT_TRUST".to_string(),
            root_key_bits: 2048,
            leaf_key_bits: 2048,
            log_private_keys: false,
            reuse_server_key: true,
            reuse_root_key_for_server: true,
            persist_root_across_restarts: true,
            root_valid_days: 3650,
            leaf_valid_years: 1,
            created_days_ago: 7,
            signature_hash: HashAlgorithm::Sha256,
            add_subject_alt_name: true,
            san_critical: false,
            add_authority_key_identifier: true,
            add_client_auth_eku: false,
            certificate_policy_oid: None,
            crl_distribution_url: None,
            wildcard_enabled: false,
            wildcard_tlds: Vec::new(),
            generation_wait_timeout_ms: 25_000,
        }
    }
}

impl ForgeConfig {
    pub fn validate(&self) -> Result<(), ForgeError> {
        if self.key_container_name.trim().is_empty() {
            return Err(ForgeError::InvalidConfig(
                "key_container_name must not be empty".to_string(),
            ));
        }
        if self.root_common_name.trim().is_empty() {
            return Err(ForgeError::InvalidConfig(
                "root_common_name must not be empty".to_string(),
            ));
        }
        if self.organization.trim().is_empty() {
            return Err(ForgeError::InvalidConfig(
                "organization must not be empty".to_string(),
            ));
        }
        for (field, bits) in [
            ("root_key_bits", self.root_key_bits),
            ("leaf_key_bits", self.leaf_key_bits),
        ] {
            if !(1024..=8192).contains(&bits) {
                return Err(ForgeError::InvalidConfig(format!(
                    "{field} must be between 1024 and 8192, got {bits}"
                )));
            }
        }
        if self.root_valid_days == 0 {
            return Err(ForgeError::InvalidConfig(
                "root_valid_days must be greater than zero".to_string(),
            ));
        }
        if self.leaf_valid_years == 0 {
            return Err(ForgeError::InvalidConfig(
                "leaf_valid_years must be greater than zero".to_string(),
            ));
        }
        if self.generation_wait_timeout_ms == 0 {
            return Err(ForgeError::InvalidConfig(
                "generation_wait_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.wildcard_enabled && self.wildcard_tlds.is_empty() {
            return Err(ForgeError::InvalidConfig(
                "wildcard_tlds must not be empty when wildcard_enabled is set".to_string(),
            ));
        }
        for tld in &self.wildcard_tlds {
            if tld.is_empty() || tld.starts_with('.') || tld.ends_with('.') {
                return Err(ForgeError::InvalidConfig(format!(
                    "wildcard TLD '{tld}' must be a bare label list like 'com' or 'co.uk'"
                )));
            }
        }
        if let Some(oid) = &self.certificate_policy_oid {
            if oid.is_empty() || !oid.chars().all(|c| c.is_ascii_digit() || c == '.') {
                return Err(ForgeError::InvalidConfig(format!(
                    "certificate_policy_oid '{oid}' is not a dotted OID"
                )));
            }
        }
        if let Some(url) = &self.crl_distribution_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ForgeError::InvalidConfig(format!(
                    "crl_distribution_url '{url}' must be an http(s) URL"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn root_cert_preference_key(&self) -> String {
        format!("{}.root.cert", self.key_container_name)
    }

    pub(crate) fn root_key_preference_key(&self) -> String {
        format!("{}.root.key", self.key_container_name)
    }
}

#[cfg(test)]
mod tests {
    use super::{ForgeConfig, HashAlgorithm};

    #[test]
    fn default_config_is_valid() {
        ForgeConfig::default().validate().expect("default config");
    }

    #[test]
    fn rejects_out_of_range_key_bits() {
        let config = ForgeConfig {
            leaf_key_bits: 512,
            ..ForgeConfig::default()
        };
        let error = config.validate().expect_err("512-bit keys must be rejected");
        assert!(error.to_string().contains("leaf_key_bits"), "{error}");
    }

    #[test]
    fn rejects_wildcard_policy_without_tlds() {
        let config = ForgeConfig {
            wildcard_enabled: true,
            ..ForgeConfig::default()
        };
        let error = config.validate().expect_err("missing TLD list must fail");
        assert!(error.to_string().contains("wildcard_tlds"), "{error}");
    }

    #[test]
    fn rejects_malformed_policy_oid() {
        let config = ForgeConfig {
            certificate_policy_oid: Some("not-an-oid".to_string()),
            ..ForgeConfig::default()
        };
        let error = config.validate().expect_err("bad OID must fail");
        assert!(error.to_string().contains("dotted OID"), "{error}");
    }

    #[test]
    fn hash_algorithm_codes_are_stable() {
        assert_eq!(HashAlgorithm::Sha256.as_str(), "sha256");
        assert_eq!(HashAlgorithm::Sha384.as_str(), "sha384");
        assert_eq!(HashAlgorithm::Sha512.as_str(), "sha512");
        assert_eq!(HashAlgorithm::default(), HashAlgorithm::Sha256);
    }

    #[test]
    fn preference_keys_derive_from_container_name() {
        let config = ForgeConfig {
            key_container_name: "acme".to_string(),
            ..ForgeConfig::default()
        };
        assert_eq!(config.root_cert_preference_key(), "acme.root.cert");
        assert_eq!(config.root_key_preference_key(), "acme.root.key");
    }
}
