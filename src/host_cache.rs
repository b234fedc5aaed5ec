use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::Duration;

use crate::authority::CertificateAuthority;
use crate::forge::CertificateForge;
use crate::identity::IssuedCertificate;
use crate::keys::KeyPairProvider;
use crate::persistence::PreferenceStore;
use crate::trust::TrustStoreBridge;
use crate::wildcard::cache_key_for_host;
use crate::{ForgeConfig, ForgeError};

/// Per-hostname generation state. A ticket exists only while generation for
/// its key is in flight or just finished; waiters park on the condvar.
enum TicketState {
    InProgress,
    Done(Arc<IssuedCertificate>),
    Failed(String),
}

struct GenerationTicket {
    state: Mutex<TicketState>,
    signal: Condvar,
}

impl GenerationTicket {
    fn new() -> Self {
        Self {
            state: Mutex::new(TicketState::InProgress),
            signal: Condvar::new(),
        }
    }
}

#[derive(Debug, Default)]
struct IssuanceMetrics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    signing_operations: AtomicU64,
    single_flight_waits: AtomicU64,
    wait_timeouts: AtomicU64,
    failed_generations: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IssuanceMetricsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub signing_operations: u64,
    pub single_flight_waits: u64,
    pub wait_timeouts: u64,
    pub failed_generations: u64,
}

/// Hostname → issued-certificate map with single-flight generation: however
/// many handshakes race on one hostname, exactly one thread runs the
/// expensive root-ensure + forge sequence and everyone else waits (bounded)
/// for its result.
///
/// Dropping the cache releases every cached leaf (and its private key);
/// persisted root material is not affected.
pub struct HostCertificateCache {
    config: Arc<ForgeConfig>,
    authority: Arc<CertificateAuthority>,
    forge: CertificateForge,
    entries: RwLock<HashMap<String, Arc<IssuedCertificate>>>,
    tickets: Mutex<HashMap<String, Arc<GenerationTicket>>>,
    metrics: IssuanceMetrics,
}

impl HostCertificateCache {
    /// Convenience constructor wiring a fresh authority over the given
    /// stores. Validates the configuration up front.
    pub fn new(
        config: ForgeConfig,
        store: Arc<dyn PreferenceStore>,
        trust: Arc<dyn TrustStoreBridge>,
    ) -> Result<Self, ForgeError> {
        config.validate()?;
        let config = Arc::new(config);
        let keys = Arc::new(KeyPairProvider::new(Arc::clone(&config)));
        let authority = Arc::new(CertificateAuthority::new(
            Arc::clone(&config),
            store,
            trust,
            Arc::clone(&keys),
        ));
        Ok(Self::with_authority(config, authority, keys))
    }

    /// Composition-root constructor: the authority is owned elsewhere and
    /// injected, so several independent authorities can coexist in-process.
    pub fn with_authority(
        config: Arc<ForgeConfig>,
        authority: Arc<CertificateAuthority>,
        keys: Arc<KeyPairProvider>,
    ) -> Self {
        let forge = CertificateForge::new(Arc::clone(&config), keys);
        Self {
            config,
            authority,
            forge,
            entries: RwLock::new(HashMap::new()),
            tickets: Mutex::new(HashMap::new()),
            metrics: IssuanceMetrics::default(),
        }
    }

    pub fn authority(&self) -> &Arc<CertificateAuthority> {
        &self.authority
    }

    /// Certificate for the requested host, issuing one on first sight.
    /// `Ok(None)` means "unavailable right now" (a bounded wait on another
    /// thread's generation timed out); errors are failed issuances.
    pub fn certificate_for_host(
        &self,
        host: &str,
    ) -> Result<Option<Arc<IssuedCertificate>>, ForgeError> {
        let key = cache_key_for_host(
            host,
            self.config.wildcard_enabled,
            &self.config.wildcard_tlds,
        );

        if let Some(found) = self.lookup(&key)? {
            self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(found));
        }
        self.metrics.cache_misses.fetch_add(1, Ordering::Relaxed);

        let (ticket, is_generator) = {
            let mut tickets = self.tickets.lock().map_err(|_| ForgeError::LockPoisoned)?;
            match tickets.get(&key) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let ticket = Arc::new(GenerationTicket::new());
                    tickets.insert(key.clone(), Arc::clone(&ticket));
                    (ticket, true)
                }
            }
        };

        if is_generator {
            return self.generate_and_publish(&key, &ticket).map(Some);
        }

        self.metrics
            .single_flight_waits
            .fetch_add(1, Ordering::Relaxed);
        self.wait_for_ticket(&key, &ticket)
    }

    /// Explicit cache injection; the only way an existing entry is replaced.
    pub fn inject(&self, host: &str, certificate: Arc<IssuedCertificate>) -> Result<(), ForgeError> {
        let key = cache_key_for_host(
            host,
            self.config.wildcard_enabled,
            &self.config.wildcard_tlds,
        );
        let mut entries = self.entries.write().map_err(|_| ForgeError::LockPoisoned)?;
        entries.insert(key, certificate);
        Ok(())
    }

    /// Copy of the full hostname → certificate map; no locks are held once
    /// this returns.
    pub fn snapshot(&self) -> HashMap<String, Arc<IssuedCertificate>> {
        self.entries
            .read()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Empties the leaf cache and delegates root clearing to the authority.
    /// With `include_root`, the shared end-entity key is dropped as well
    /// (it may have been the root key under the reuse policy).
    pub fn clear(&self, include_root: bool) {
        {
            let mut entries = self
                .entries
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            entries.clear();
        }
        if include_root {
            self.forge.reset_keys();
        }
        self.authority.clear(include_root);
    }

    pub fn metrics_snapshot(&self) -> IssuanceMetricsSnapshot {
        IssuanceMetricsSnapshot {
            cache_hits: self.metrics.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.metrics.cache_misses.load(Ordering::Relaxed),
            signing_operations: self.metrics.signing_operations.load(Ordering::Relaxed),
            single_flight_waits: self.metrics.single_flight_waits.load(Ordering::Relaxed),
            wait_timeouts: self.metrics.wait_timeouts.load(Ordering::Relaxed),
            failed_generations: self.metrics.failed_generations.load(Ordering::Relaxed),
        }
    }

    fn lookup(&self, key: &str) -> Result<Option<Arc<IssuedCertificate>>, ForgeError> {
        let entries = self.entries.read().map_err(|_| ForgeError::LockPoisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn generate_and_publish(
        &self,
        key: &str,
        ticket: &GenerationTicket,
    ) -> Result<Arc<IssuedCertificate>, ForgeError> {
        let outcome = self.generate_and_store(key);

        let next_state = match &outcome {
            Ok(certificate) => TicketState::Done(Arc::clone(certificate)),
            Err(error) => {
                self.metrics
                    .failed_generations
                    .fetch_add(1, Ordering::Relaxed);
                TicketState::Failed(error.to_string())
            }
        };
        {
            // Waiters must be released even if a panic elsewhere poisoned
            // the ticket lock.
            let mut state = ticket
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *state = next_state;
        }
        ticket.signal.notify_all();
        {
            let mut tickets = self
                .tickets
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            tickets.remove(key);
        }

        outcome.map_err(|error| ForgeError::IssuanceFailed {
            host: key.to_string(),
            detail: error.to_string(),
        })
    }

    fn generate_and_store(&self, key: &str) -> Result<Arc<IssuedCertificate>, ForgeError> {
        // A finishing generator may have published between this thread's
        // cache miss and its ticket insertion; re-check before signing so
        // one hostname never gets two independently signed certificates.
        if let Some(existing) = self.lookup(key)? {
            return Ok(existing);
        }

        let root = self.authority.ensure_root()?;
        self.metrics
            .signing_operations
            .fetch_add(1, Ordering::Relaxed);
        let issued = Arc::new(self.forge.issue(key, &root)?);

        let mut entries = self.entries.write().map_err(|_| ForgeError::LockPoisoned)?;
        entries.insert(key.to_string(), Arc::clone(&issued));
        Ok(issued)
    }

    fn wait_for_ticket(
        &self,
        key: &str,
        ticket: &GenerationTicket,
    ) -> Result<Option<Arc<IssuedCertificate>>, ForgeError> {
        let timeout = Duration::from_millis(self.config.generation_wait_timeout_ms);
        let guard = ticket.state.lock().map_err(|_| ForgeError::LockPoisoned)?;
        let (guard, _wait_result) = ticket
            .signal
            .wait_timeout_while(guard, timeout, |state| {
                matches!(state, TicketState::InProgress)
            })
            .map_err(|_| ForgeError::LockPoisoned)?;

        match &*guard {
            TicketState::Done(certificate) => Ok(Some(Arc::clone(certificate))),
            TicketState::Failed(detail) => Err(ForgeError::IssuanceFailed {
                host: key.to_string(),
                detail: detail.clone(),
            }),
            TicketState::InProgress => {
                drop(guard);
                self.metrics.wait_timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    host = key,
                    timeout_ms = self.config.generation_wait_timeout_ms,
                    "timed out waiting for in-flight certificate generation; \
                     falling back to a best-effort cache read"
                );
                self.lookup(key)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::HostCertificateCache;
    use crate::persistence::MemoryPreferenceStore;
    use crate::trust::MemoryTrustBridge;
    use crate::ForgeConfig;

    fn test_config() -> ForgeConfig {
        // Default 2048-bit keys: rustls rejects smaller RSA keys when the
        // issued identity is assembled.
        ForgeConfig::default()
    }

    fn build_cache(config: ForgeConfig) -> HostCertificateCache {
        HostCertificateCache::new(
            config,
            Arc::new(MemoryPreferenceStore::default()),
            Arc::new(MemoryTrustBridge::default()),
        )
        .expect("cache")
    }

    #[test]
    fn sequential_requests_return_byte_identical_certificates() {
        let cache = build_cache(test_config());
        let first = cache
            .certificate_for_host("api.example.com")
            .expect("first request")
            .expect("first certificate");
        let second = cache
            .certificate_for_host("api.example.com")
            .expect("second request")
            .expect("second certificate");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.cert_der, second.cert_der);

        let metrics = cache.metrics_snapshot();
        assert_eq!(metrics.cache_hits, 1);
        assert_eq!(metrics.cache_misses, 1);
        assert_eq!(metrics.signing_operations, 1);
    }

    #[test]
    fn hostnames_are_case_insensitive_cache_keys() {
        let cache = build_cache(test_config());
        let lower = cache
            .certificate_for_host("api.example.com")
            .expect("lower request")
            .expect("lower certificate");
        let upper = cache
            .certificate_for_host("API.EXAMPLE.COM")
            .expect("upper request")
            .expect("upper certificate");
        assert!(Arc::ptr_eq(&lower, &upper));
    }

    #[test]
    fn sibling_subdomains_share_one_wildcard_certificate() {
        let cache = build_cache(ForgeConfig {
            wildcard_enabled: true,
            wildcard_tlds: vec!["com".to_string()],
            ..test_config()
        });

        let first = cache
            .certificate_for_host("a.b.example.com")
            .expect("first request")
            .expect("first certificate");
        let second = cache
            .certificate_for_host("c.b.example.com")
            .expect("second request")
            .expect("second certificate");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.hostname, "*.example.com");
        assert_eq!(cache.metrics_snapshot().signing_operations, 1);
    }

    #[test]
    fn injection_overwrites_an_existing_entry() {
        let cache = build_cache(test_config());
        let original = cache
            .certificate_for_host("api.example.com")
            .expect("request")
            .expect("certificate");

        let replacement = {
            let other = build_cache(test_config());
            other
                .certificate_for_host("api.example.com")
                .expect("replacement request")
                .expect("replacement certificate")
        };
        cache
            .inject("api.example.com", Arc::clone(&replacement))
            .expect("inject");

        let after = cache
            .certificate_for_host("api.example.com")
            .expect("request after inject")
            .expect("certificate after inject");
        assert!(Arc::ptr_eq(&after, &replacement));
        assert!(!Arc::ptr_eq(&after, &original));
    }

    #[test]
    fn snapshot_copies_the_map() {
        let cache = build_cache(test_config());
        cache
            .certificate_for_host("a.example.com")
            .expect("request a");
        cache
            .certificate_for_host("b.example.com")
            .expect("request b");

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains_key("a.example.com"));
        assert!(snapshot.contains_key("b.example.com"));

        cache.clear(false);
        assert_eq!(snapshot.len(), 2, "snapshot must be detached from the cache");
        assert!(cache.snapshot().is_empty());
    }

    #[test]
    fn clear_without_root_reissues_under_the_same_root() {
        let cache = build_cache(test_config());
        let before = cache
            .certificate_for_host("api.example.com")
            .expect("request before clear")
            .expect("certificate before clear");

        cache.clear(false);
        let root_after = cache
            .authority()
            .ensure_root()
            .expect("root after clear");
        let after = cache
            .certificate_for_host("api.example.com")
            .expect("request after clear")
            .expect("certificate after clear");

        assert!(!Arc::ptr_eq(&before, &after), "leaf cache must be empty");
        assert_eq!(after.chain_der[1], root_after.cert_der);
        assert_eq!(before.chain_der[1], after.chain_der[1], "root must survive");
    }

    #[test]
    fn clear_including_root_rotates_the_chain() {
        let cache = build_cache(ForgeConfig {
            persist_root_across_restarts: false,
            ..test_config()
        });
        let before = cache
            .certificate_for_host("api.example.com")
            .expect("request before clear")
            .expect("certificate before clear");

        cache.clear(true);
        let after = cache
            .certificate_for_host("api.example.com")
            .expect("request after clear")
            .expect("certificate after clear");

        assert_ne!(before.chain_der[1], after.chain_der[1], "root must rotate");
    }

    #[test]
    fn ip_hosts_are_cached_under_their_literal() {
        let cache = build_cache(ForgeConfig {
            wildcard_enabled: true,
            wildcard_tlds: vec!["com".to_string()],
            ..test_config()
        });
        let issued = cache
            .certificate_for_host("192.168.1.5")
            .expect("request")
            .expect("certificate");
        assert_eq!(issued.hostname, "192.168.1.5");
        assert!(cache.snapshot().contains_key("192.168.1.5"));
    }
}
