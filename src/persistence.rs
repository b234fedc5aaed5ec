use std::collections::HashMap;
use std::sync::Mutex;

/// Key-value contract over whatever preference/config storage the embedding
/// application uses. The forge persists the root certificate and key as two
/// opaque string blobs under keys it derives from the configured container
/// name; it never interprets other entries.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    entries: Mutex<HashMap<String, String>>,
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryPreferenceStore, PreferenceStore};

    #[test]
    fn memory_store_round_trips_entries() {
        let store = MemoryPreferenceStore::default();
        assert_eq!(store.get("missing"), None);

        store.set("certforge.root.cert", "blob");
        assert_eq!(store.get("certforge.root.cert").as_deref(), Some("blob"));

        store.set("certforge.root.cert", "newer");
        assert_eq!(store.get("certforge.root.cert").as_deref(), Some("newer"));

        store.remove("certforge.root.cert");
        assert_eq!(store.get("certforge.root.cert"), None);
    }
}
