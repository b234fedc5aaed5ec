use std::sync::Arc;

use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::nid::Nid;
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
};
use openssl::x509::{X509Extension, X509Name, X509};

use crate::authority::{unix_now, RootMaterial};
use crate::identity::{build_server_config, IssuedCertificate};
use crate::keys::KeyPairProvider;
use crate::wildcard::parse_ip_literal;
use crate::{ForgeConfig, ForgeError};

const X509_VERSION_3: i32 = 2;
const SECONDS_PER_DAY: i64 = 86_400;
/// Stamped into every leaf subject so forged certificates are recognizable.
const LEAF_ORGANIZATIONAL_UNIT: &str = "Generated by mitm-certforge";

/// Builds X.509v3 end-entity certificates signed by the active root. Pure
/// issuance: no caching, no retries — failures propagate to the caller.
pub struct CertificateForge {
    config: Arc<ForgeConfig>,
    keys: Arc<KeyPairProvider>,
}

impl CertificateForge {
    pub fn new(config: Arc<ForgeConfig>, keys: Arc<KeyPairProvider>) -> Self {
        Self { config, keys }
    }

    pub fn issue(
        &self,
        hostname: &str,
        root: &RootMaterial,
    ) -> Result<IssuedCertificate, ForgeError> {
        let key = self.keys.end_entity_key(Some(&root.key), hostname)?;

        let mut builder = X509::builder()?;
        builder.set_version(X509_VERSION_3)?;
        let (serial, serial_hex) = random_serial()?;
        builder.set_serial_number(&serial)?;

        let mut name = X509Name::builder()?;
        name.append_entry_by_nid(Nid::ORGANIZATIONALUNITNAME, LEAF_ORGANIZATIONAL_UNIT)?;
        name.append_entry_by_nid(Nid::ORGANIZATIONNAME, &self.config.organization)?;
        name.append_entry_by_nid(Nid::COMMONNAME, hostname)?;
        let subject = name.build();
        builder.set_subject_name(&subject)?;
        builder.set_issuer_name(root.cert.subject_name())?;

        let (not_before_unix, not_after_unix) = self.validity_window(root.not_after_unix);
        let not_before_time = Asn1Time::from_unix(not_before_unix)?;
        let not_after_time = Asn1Time::from_unix(not_after_unix)?;
        builder.set_not_before(&not_before_time)?;
        builder.set_not_after(&not_after_time)?;
        builder.set_pubkey(&key)?;

        builder.append_extension(BasicConstraints::new().build()?)?;

        let mut key_usage = KeyUsage::new();
        key_usage.digital_signature().key_encipherment();
        builder.append_extension(key_usage.build()?)?;

        let mut eku = ExtendedKeyUsage::new();
        eku.server_auth();
        if self.config.add_client_auth_eku {
            eku.client_auth();
        }
        builder.append_extension(eku.build()?)?;

        if self.config.add_subject_alt_name {
            let san = {
                let context = builder.x509v3_context(Some(&root.cert), None);
                build_subject_alt_name(hostname, self.config.san_critical)?.build(&context)?
            };
            builder.append_extension(san)?;
        }

        if self.config.add_authority_key_identifier {
            let akid = {
                let context = builder.x509v3_context(Some(&root.cert), None);
                AuthorityKeyIdentifier::new().keyid(false).build(&context)?
            };
            builder.append_extension(akid)?;
        }

        // No builder type exists for these two extensions, so they go
        // through the nconf-style constructor.
        if let Some(oid) = &self.config.certificate_policy_oid {
            #[allow(deprecated)]
            let policy = {
                let context = builder.x509v3_context(Some(&root.cert), None);
                X509Extension::new_nid(None, Some(&context), Nid::CERTIFICATE_POLICIES, oid)?
            };
            builder.append_extension(policy)?;
        }

        if let Some(url) = &self.config.crl_distribution_url {
            #[allow(deprecated)]
            let crl = {
                let context = builder.x509v3_context(Some(&root.cert), None);
                X509Extension::new_nid(
                    None,
                    Some(&context),
                    Nid::CRL_DISTRIBUTION_POINTS,
                    &format!("URI:{url}"),
                )?
            };
            builder.append_extension(crl)?;
        }

        builder.sign(&root.key, self.config.signature_hash.message_digest())?;
        let cert = builder.build();

        let cert_der = cert.to_der()?;
        let cert_pem = String::from_utf8(cert.to_pem()?)
            .map_err(|error| ForgeError::CertificateBuild(error.to_string()))?;
        let key_pkcs8_der = key.private_key_to_pkcs8()?;
        let chain_der = vec![cert_der.clone(), root.cert_der.clone()];
        let server_config = build_server_config(&chain_der, &key_pkcs8_der)?;

        tracing::debug!(hostname, serial = %serial_hex, "issued end-entity certificate");

        Ok(IssuedCertificate {
            hostname: hostname.to_string(),
            cert_der,
            cert_pem,
            key_pkcs8_der,
            chain_der,
            serial_hex,
            not_before_unix,
            not_after_unix,
            server_config,
        })
    }

    /// Backdated notBefore for clock skew; notAfter one month inside the
    /// configured leaf lifetime and never past the root's own expiry.
    fn validity_window(&self, root_not_after_unix: i64) -> (i64, i64) {
        let now = unix_now();
        let not_before = now - i64::from(self.config.created_days_ago) * SECONDS_PER_DAY;
        let mut not_after =
            now + i64::from(self.config.leaf_valid_years) * 365 * SECONDS_PER_DAY
                - 30 * SECONDS_PER_DAY;
        if not_after > root_not_after_unix {
            not_after = root_not_after_unix;
        }
        (not_before, not_after)
    }

    pub(crate) fn reset_keys(&self) {
        self.keys.reset();
    }
}

/// 128 random bits as a positive big integer. Random serials avoid both
/// collisions and predictable sequences; used for the root and every leaf.
pub(crate) fn random_serial() -> Result<(Asn1Integer, String), ForgeError> {
    let mut serial = BigNum::new()?;
    serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
    let hex = serial.to_hex_str()?.to_string().to_ascii_lowercase();
    Ok((serial.to_asn1_integer()?, hex))
}

fn build_subject_alt_name(
    hostname: &str,
    critical: bool,
) -> Result<SubjectAlternativeName, ForgeError> {
    let mut san = SubjectAlternativeName::new();
    if critical {
        san.critical();
    }
    match parse_ip_literal(hostname) {
        Some(ip) => {
            san.ip(&ip.to_string());
            if ip.is_ipv6() {
                // Clients that match on the host header see the bracketed
                // form, so both spellings are listed.
                san.dns(&format!("[{ip}]"));
            }
        }
        None => {
            san.dns(hostname);
        }
    }
    Ok(san)
}
