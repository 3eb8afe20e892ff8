//! Key-store boundary
//!
//! Opaque storage of fixed-length key material by id, consumed only when
//! a tunnel is established. The bridge core never touches this.

use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;

/// Length of a key id in bytes.
pub const KEY_ID_LEN: usize = 20;

/// Length of key material in bytes.
pub const KEY_LEN: usize = 32;

/// Lookup/insert of key material by id, plus random selection for
/// clients that rotate between pre-shared keys.
pub trait KeyStore: Send + Sync {
    /// Look up the key material stored under `id`.
    fn key(&self, id: &[u8]) -> Option<Vec<u8>>;

    /// Store `key` under `id`, replacing any previous entry.
    fn set_key(&self, id: Vec<u8>, key: Vec<u8>);

    /// Pick a uniformly random `(id, key)` entry, if any exist.
    fn random_key(&self) -> Option<(Vec<u8>, Vec<u8>)>;
}

/// In-memory [`KeyStore`].
#[derive(Default)]
pub struct MemoryKeyStore {
    entries: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

impl KeyStore for MemoryKeyStore {
    fn key(&self, id: &[u8]) -> Option<Vec<u8>> {
        self.entries.lock().unwrap().get(id).cloned()
    }

    fn set_key(&self, id: Vec<u8>, key: Vec<u8>) {
        self.entries.lock().unwrap().insert(id, key);
    }

    fn random_key(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        let entries = self.entries.lock().unwrap();
        if entries.is_empty() {
            return None;
        }
        let target = rand::thread_rng().gen_range(0..entries.len());
        entries
            .iter()
            .nth(target)
            .map(|(id, key)| (id.clone(), key.clone()))
    }
}

/// Generate a fresh random `(id, key)` pair.
pub fn generate_key() -> (Vec<u8>, Vec<u8>) {
    let mut rng = rand::thread_rng();
    let mut id = vec![0u8; KEY_ID_LEN];
    let mut key = vec![0u8; KEY_LEN];
    rng.fill(id.as_mut_slice());
    rng.fill(key.as_mut_slice());
    (id, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get_key() {
        let store = MemoryKeyStore::new();
        let (id, key) = generate_key();

        store.set_key(id.clone(), key.clone());
        assert_eq!(store.key(&id), Some(key));
        assert_eq!(store.key(b"missing"), None);
    }

    #[test]
    fn test_random_key_from_empty_store() {
        let store = MemoryKeyStore::new();
        assert!(store.random_key().is_none());
    }

    #[test]
    fn test_random_key_returns_stored_entry() {
        let store = MemoryKeyStore::new();
        for _ in 0..5 {
            let (id, key) = generate_key();
            store.set_key(id, key);
        }
        assert_eq!(store.len(), 5);

        let (id, key) = store.random_key().unwrap();
        assert_eq!(store.key(&id), Some(key));
    }

    #[test]
    fn test_generated_key_lengths() {
        let (id, key) = generate_key();
        assert_eq!(id.len(), KEY_ID_LEN);
        assert_eq!(key.len(), KEY_LEN);
    }
}
