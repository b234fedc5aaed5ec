use std::sync::{Arc, RwLock};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;

use crate::{ForgeConfig, ForgeError};

/// Supplies RSA key pairs for certificate issuance under the configured
/// reuse policy. The shared end-entity key is initialized at most once:
/// readers check under the read lock, the first miss upgrades to the write
/// lock, re-checks, and only then runs the keygen.
pub struct KeyPairProvider {
    config: Arc<ForgeConfig>,
    shared_server_key: RwLock<Option<Arc<PKey<Private>>>>,
}

impl KeyPairProvider {
    pub fn new(config: Arc<ForgeConfig>) -> Self {
        Self {
            config,
            shared_server_key: RwLock::new(None),
        }
    }

    pub(crate) fn generate_root_key(&self) -> Result<PKey<Private>, ForgeError> {
        let key = generate_rsa_key(self.config.root_key_bits)?;
        self.maybe_log_private_key("root", &key);
        Ok(key)
    }

    pub(crate) fn end_entity_key(
        &self,
        root_key: Option<&Arc<PKey<Private>>>,
        host: &str,
    ) -> Result<Arc<PKey<Private>>, ForgeError> {
        if self.config.reuse_root_key_for_server {
            if let Some(root) = root_key {
                tracing::debug!(host, "reusing root key pair for end-entity certificate");
                return Ok(Arc::clone(root));
            }
        }

        if self.config.reuse_server_key {
            {
                let slot = self
                    .shared_server_key
                    .read()
                    .map_err(|_| ForgeError::LockPoisoned)?;
                if let Some(existing) = slot.as_ref() {
                    return Ok(Arc::clone(existing));
                }
            }
            let mut slot = self
                .shared_server_key
                .write()
                .map_err(|_| ForgeError::LockPoisoned)?;
            if let Some(existing) = slot.as_ref() {
                return Ok(Arc::clone(existing));
            }
            let key = Arc::new(generate_rsa_key(self.config.leaf_key_bits)?);
            self.maybe_log_private_key(host, &key);
            *slot = Some(Arc::clone(&key));
            return Ok(key);
        }

        let key = Arc::new(generate_rsa_key(self.config.leaf_key_bits)?);
        self.maybe_log_private_key(host, &key);
        Ok(key)
    }

    /// Drops the shared end-entity key so the next issuance regenerates it.
    pub(crate) fn reset(&self) {
        let mut slot = self
            .shared_server_key
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = None;
    }

    fn maybe_log_private_key(&self, context: &str, key: &PKey<Private>) {
        if !self.config.log_private_keys {
            return;
        }
        match key.private_key_to_pkcs8() {
            Ok(der) => tracing::debug!(
                context,
                key_base64 = %BASE64.encode(der),
                "generated RSA private key (log_private_keys is enabled)"
            ),
            Err(error) => tracing::debug!(
                context,
                %error,
                "unable to render generated private key for logging"
            ),
        }
    }
}

fn generate_rsa_key(bits: u32) -> Result<PKey<Private>, ForgeError> {
    let rsa = Rsa::generate(bits).map_err(|error| ForgeError::KeyGeneration(error.to_string()))?;
    PKey::from_rsa(rsa).map_err(|error| ForgeError::KeyGeneration(error.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::KeyPairProvider;
    use crate::ForgeConfig;

    fn provider(config: ForgeConfig) -> KeyPairProvider {
        KeyPairProvider::new(Arc::new(config))
    }

    #[test]
    fn shared_server_key_is_generated_once() {
        let keys = provider(ForgeConfig {
            reuse_server_key: true,
            reuse_root_key_for_server: false,
            ..ForgeConfig::default()
        });

        let first = keys.end_entity_key(None, "a.example.com").expect("first key");
        let second = keys
            .end_entity_key(None, "b.example.com")
            .expect("second key");
        assert!(Arc::ptr_eq(&first, &second), "shared key must be reused");
    }

    #[test]
    fn fresh_keys_when_reuse_disabled() {
        let keys = provider(ForgeConfig {
            reuse_server_key: false,
            reuse_root_key_for_server: false,
            leaf_key_bits: 1024,
            ..ForgeConfig::default()
        });

        let first = keys.end_entity_key(None, "a.example.com").expect("first key");
        let second = keys
            .end_entity_key(None, "a.example.com")
            .expect("second key");
        assert!(!Arc::ptr_eq(&first, &second), "keys must not be shared");
    }

    #[test]
    fn root_key_reused_for_leaves_when_policy_set() {
        let keys = provider(ForgeConfig {
            reuse_root_key_for_server: true,
            root_key_bits: 1024,
            ..ForgeConfig::default()
        });

        let root = Arc::new(keys.generate_root_key().expect("root key"));
        let leaf = keys
            .end_entity_key(Some(&root), "a.example.com")
            .expect("leaf key");
        assert!(Arc::ptr_eq(&root, &leaf), "root key must be handed out");
    }

    #[test]
    fn reset_forces_regeneration_of_shared_key() {
        let keys = provider(ForgeConfig {
            reuse_server_key: true,
            reuse_root_key_for_server: false,
            leaf_key_bits: 1024,
            ..ForgeConfig::default()
        });

        let first = keys.end_entity_key(None, "a.example.com").expect("first key");
        keys.reset();
        let second = keys
            .end_entity_key(None, "a.example.com")
            .expect("second key");
        assert!(!Arc::ptr_eq(&first, &second), "reset must drop the shared key");
    }

    #[test]
    fn concurrent_first_calls_converge_on_one_shared_key() {
        let keys = Arc::new(provider(ForgeConfig {
            reuse_server_key: true,
            reuse_root_key_for_server: false,
            leaf_key_bits: 1024,
            ..ForgeConfig::default()
        }));

        let handles: Vec<_> = (0..8)
            .map(|index| {
                let keys = Arc::clone(&keys);
                std::thread::spawn(move || {
                    keys.end_entity_key(None, &format!("host-{index}.example.com"))
                        .expect("key under contention")
                })
            })
            .collect();

        let first = handles
            .into_iter()
            .map(|handle| handle.join().expect("keygen thread join"))
            .reduce(|left, right| {
                assert!(Arc::ptr_eq(&left, &right), "all threads must see one key");
                left
            });
        assert!(first.is_some());
    }
}
