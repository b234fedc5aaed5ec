use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{BasicConstraints, KeyUsage, SubjectKeyIdentifier};
use openssl::x509::{X509Name, X509};

use crate::forge::random_serial;
use crate::keys::KeyPairProvider;
use crate::persistence::PreferenceStore;
use crate::trust::{TrustScope, TrustStoreBridge};
use crate::{ForgeConfig, ForgeError};

const X509_VERSION_3: i32 = 2;

/// In-memory root material. The certificate and key are only ever set
/// together; the private key never leaves this struct except through the
/// password-protected PKCS#12 export.
pub struct RootMaterial {
    pub(crate) cert: X509,
    pub(crate) key: Arc<PKey<Private>>,
    pub(crate) cert_der: Vec<u8>,
    pub(crate) not_after_unix: i64,
    pub(crate) fingerprint: String,
    pub(crate) subject_common_name: String,
}

impl RootMaterial {
    fn from_parts(cert: X509, key: Arc<PKey<Private>>) -> Result<Self, ForgeError> {
        let cert_der = cert.to_der()?;
        let not_after_unix = asn1_time_to_unix(cert.not_after())?;
        let digest = cert.digest(MessageDigest::sha256())?;
        let fingerprint = render_hex(&digest);
        let subject_common_name = cert
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .and_then(|entry| entry.data().as_utf8().ok())
            .map(|cn| cn.to_string())
            .unwrap_or_default();
        Ok(Self {
            cert,
            key,
            cert_der,
            not_after_unix,
            fingerprint,
            subject_common_name,
        })
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Root-CA lifecycle: generate or reload exactly one active root, persist it
/// per policy, export/import it, and clear it. Owned by the composition root
/// and injected wherever root material is needed; there is no process-global
/// authority state.
pub struct CertificateAuthority {
    config: Arc<ForgeConfig>,
    store: Arc<dyn PreferenceStore>,
    trust: Arc<dyn TrustStoreBridge>,
    keys: Arc<KeyPairProvider>,
    root: Mutex<Option<Arc<RootMaterial>>>,
}

impl CertificateAuthority {
    pub fn new(
        config: Arc<ForgeConfig>,
        store: Arc<dyn PreferenceStore>,
        trust: Arc<dyn TrustStoreBridge>,
        keys: Arc<KeyPairProvider>,
    ) -> Self {
        Self {
            config,
            store,
            trust,
            keys,
            root: Mutex::new(None),
        }
    }

    /// Returns the active root, reloading it from the preference store or
    /// generating a fresh one as needed. The root mutex is held across the
    /// whole check-reload-generate-assign sequence so concurrent first
    /// callers observe exactly one generation.
    pub fn ensure_root(&self) -> Result<Arc<RootMaterial>, ForgeError> {
        let mut slot = self.root.lock().map_err(|_| ForgeError::LockPoisoned)?;
        if let Some(existing) = slot.as_ref() {
            return Ok(Arc::clone(existing));
        }

        if let Some(reloaded) = self.reload_from_store() {
            *slot = Some(Arc::clone(&reloaded));
            return Ok(reloaded);
        }

        let generated = Arc::new(self.generate_root()?);
        if self.config.persist_root_across_restarts {
            self.persist_root(&generated)?;
        }
        tracing::debug!(
            fingerprint = %generated.fingerprint,
            "generated new root certificate authority"
        );
        *slot = Some(Arc::clone(&generated));
        Ok(generated)
    }

    /// Public certificate only, never the key. Reloads from persistence when
    /// nothing is in memory; `None` when no root is available. Does not
    /// trigger generation.
    pub fn root_certificate(&self) -> Option<Vec<u8>> {
        let mut slot = self.root.lock().ok()?;
        if slot.is_none() {
            *slot = self.reload_from_store();
        }
        slot.as_ref().map(|material| material.cert_der.clone())
    }

    pub fn root_certificate_pem(&self) -> Option<String> {
        let der = self.root_certificate()?;
        let cert = X509::from_der(&der).ok()?;
        let pem = cert.to_pem().ok()?;
        String::from_utf8(pem).ok()
    }

    /// Drops the in-memory root. With `include_root`, additionally erases the
    /// persisted blobs and best-effort removes previously installed copies
    /// from the OS trust store; trust failures are logged and do not abort
    /// the clear.
    pub fn clear(&self, include_root: bool) {
        let removed_subject = {
            let mut slot = self
                .root
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let subject = slot
                .as_ref()
                .map(|material| material.subject_common_name.clone());
            *slot = None;
            subject
        };

        if !include_root {
            return;
        }

        self.store.remove(&self.config.root_cert_preference_key());
        self.store.remove(&self.config.root_key_preference_key());

        let pattern = removed_subject.unwrap_or_else(|| self.config.root_common_name.clone());
        for scope in [TrustScope::User, TrustScope::Machine] {
            match self.trust.remove_by_issuer_subject(&pattern, scope) {
                Ok(count) if count > 0 => tracing::debug!(
                    count,
                    scope = scope.as_str(),
                    "removed previously installed root certificates from trust store"
                ),
                Ok(_) => {}
                Err(error) => tracing::warn!(
                    %error,
                    scope = scope.as_str(),
                    "best-effort trust store cleanup failed"
                ),
            }
        }
    }

    pub fn install_root(&self, scope: TrustScope) -> Result<(), ForgeError> {
        let material = self.ensure_root()?;
        self.trust.install(&material.cert_der, scope)?;
        Ok(())
    }

    pub fn is_root_trusted(&self, scope: TrustScope) -> Result<bool, ForgeError> {
        let Some(der) = self.root_certificate() else {
            return Ok(false);
        };
        Ok(self.trust.is_trusted(&der, scope)?)
    }

    /// Password-protected PKCS#12 container holding the root cert and key.
    pub fn export_root_pkcs12(
        &self,
        password: &str,
        alias: Option<&str>,
    ) -> Result<Vec<u8>, ForgeError> {
        let material = self.ensure_root()?;
        let mut builder = Pkcs12::builder();
        builder.name(alias.unwrap_or(&self.config.key_container_name));
        builder.pkey(&material.key);
        builder.cert(&material.cert);
        let container = builder
            .build2(password)
            .map_err(|error| ForgeError::InvalidMaterial(error.to_string()))?;
        Ok(container.to_der()?)
    }

    /// DER-only export of the public root certificate.
    pub fn export_root_der(&self) -> Result<Vec<u8>, ForgeError> {
        let material = self.ensure_root()?;
        Ok(material.cert_der.clone())
    }

    /// Replaces the active root with the contents of a PKCS#12 container.
    /// The container must hold both a certificate and a matching private key
    /// (the bundled alias is informational and not checked). Leaf
    /// certificates issued under the previous root remain cached until the
    /// caller clears them.
    pub fn import_root_pkcs12(&self, pkcs12_der: &[u8], password: &str) -> Result<(), ForgeError> {
        let parsed = Pkcs12::from_der(pkcs12_der)?
            .parse2(password)
            .map_err(|error| ForgeError::InvalidMaterial(error.to_string()))?;
        let (Some(cert), Some(key)) = (parsed.cert, parsed.pkey) else {
            return Err(ForgeError::InvalidMaterial(
                "PKCS#12 container must hold both a certificate and a private key".to_string(),
            ));
        };
        let public = cert.public_key()?;
        if !public.public_eq(&key) {
            return Err(ForgeError::InvalidMaterial(
                "PKCS#12 certificate and private key do not match".to_string(),
            ));
        }

        let material = Arc::new(RootMaterial::from_parts(cert, Arc::new(key))?);
        if self.config.persist_root_across_restarts {
            self.persist_root(&material)?;
        }
        let mut slot = self.root.lock().map_err(|_| ForgeError::LockPoisoned)?;
        *slot = Some(material);
        Ok(())
    }

    fn reload_from_store(&self) -> Option<Arc<RootMaterial>> {
        let cert_key = self.config.root_cert_preference_key();
        let key_key = self.config.root_key_preference_key();
        let cert_blob = self.store.get(&cert_key)?;
        let key_blob = self.store.get(&key_key)?;

        match self.decode_persisted(&cert_blob, &key_blob) {
            Ok(material) => Some(Arc::new(material)),
            Err(error) => {
                tracing::warn!(
                    %error,
                    "discarding unparseable persisted root material; a new root will be generated"
                );
                self.store.remove(&cert_key);
                self.store.remove(&key_key);
                None
            }
        }
    }

    fn decode_persisted(&self, cert_blob: &str, key_blob: &str) -> Result<RootMaterial, ForgeError> {
        let cert_der = BASE64
            .decode(cert_blob)
            .map_err(|error| ForgeError::InvalidMaterial(error.to_string()))?;
        let key_der = BASE64
            .decode(key_blob)
            .map_err(|error| ForgeError::InvalidMaterial(error.to_string()))?;
        let cert = X509::from_der(&cert_der)
            .map_err(|error| ForgeError::InvalidMaterial(error.to_string()))?;
        let key = PKey::private_key_from_pkcs8(&key_der)
            .map_err(|error| ForgeError::InvalidMaterial(error.to_string()))?;
        let public = cert.public_key()?;
        if !public.public_eq(&key) {
            return Err(ForgeError::InvalidMaterial(
                "persisted root certificate and key do not match".to_string(),
            ));
        }
        RootMaterial::from_parts(cert, Arc::new(key))
    }

    fn persist_root(&self, material: &RootMaterial) -> Result<(), ForgeError> {
        let key_der = material
            .key
            .private_key_to_pkcs8()
            .map_err(|error| ForgeError::Persistence(error.to_string()))?;
        self.store.set(
            &self.config.root_cert_preference_key(),
            &BASE64.encode(&material.cert_der),
        );
        self.store
            .set(&self.config.root_key_preference_key(), &BASE64.encode(key_der));
        Ok(())
    }

    fn generate_root(&self) -> Result<RootMaterial, ForgeError> {
        let key = Arc::new(self.keys.generate_root_key()?);

        let mut builder = X509::builder()?;
        builder.set_version(X509_VERSION_3)?;
        let (serial, _serial_hex) = random_serial()?;
        builder.set_serial_number(&serial)?;

        let mut name = X509Name::builder()?;
        name.append_entry_by_nid(Nid::COMMONNAME, &self.config.root_common_name)?;
        name.append_entry_by_nid(Nid::ORGANIZATIONNAME, &self.config.organization)?;
        let name = name.build();
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;

        let now = unix_now();
        let not_before = now - i64::from(self.config.created_days_ago) * 86_400;
        let not_after = now + i64::from(self.config.root_valid_days) * 86_400;
        let not_before_time = Asn1Time::from_unix(not_before)?;
        let not_after_time = Asn1Time::from_unix(not_after)?;
        builder.set_not_before(&not_before_time)?;
        builder.set_not_after(&not_after_time)?;
        builder.set_pubkey(&key)?;

        let mut basic_constraints = BasicConstraints::new();
        basic_constraints.critical().ca().pathlen(0);
        builder.append_extension(basic_constraints.build()?)?;

        let mut key_usage = KeyUsage::new();
        key_usage
            .critical()
            .key_cert_sign()
            .crl_sign()
            .digital_signature();
        builder.append_extension(key_usage.build()?)?;

        let skid = {
            let context = builder.x509v3_context(None, None);
            SubjectKeyIdentifier::new().build(&context)?
        };
        builder.append_extension(skid)?;

        builder.sign(&key, self.config.signature_hash.message_digest())?;
        RootMaterial::from_parts(builder.build(), key)
    }
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

pub(crate) fn asn1_time_to_unix(time: &Asn1TimeRef) -> Result<i64, ForgeError> {
    let epoch = Asn1Time::from_unix(0)?;
    let diff = epoch.diff(time)?;
    Ok(i64::from(diff.days) * 86_400 + i64::from(diff.secs))
}

pub(crate) fn render_hex(bytes: &[u8]) -> String {
    let mut rendered = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        rendered.push(hex_digit(byte >> 4));
        rendered.push(hex_digit(byte & 0x0f));
    }
    rendered
}

fn hex_digit(value: u8) -> char {
    match value {
        0..=9 => (b'0' + value) as char,
        10..=15 => (b'a' + (value - 10)) as char,
        _ => '0',
    }
}
