use dashmap::DashMap;

/// Concurrent key/value map backing the live cache and the rotation scratch store.
///
/// `get` returns `Option<Vec<u8>>` rather than collapsing a hit-with-empty-value
/// into "not found" — that distinction belongs to the wire layer (`NF:`), not here.
#[derive(Debug, Default)]
pub struct Store {
    map: DashMap<Vec<u8>, Vec<u8>>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }

    pub fn set(&self, key: Vec<u8>, value: Vec<u8>) {
        self.map.insert(key, value);
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.map.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    /// Returns the number of entries removed (0 or 1).
    pub fn remove(&self, key: &[u8]) -> usize {
        if self.map.remove(key).is_some() {
            1
        } else {
            0
        }
    }

    pub fn clear(&self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Exchanges contents with `other`: after this call, `self` holds what
    /// `other` held and `other` is empty. Used by the rotation algorithm to
    /// swap the rebuilt rotate-store into the live store.
    pub fn swap(&self, other: &Store) {
        self.map.clear();
        let drained: Vec<(Vec<u8>, Vec<u8>)> = other
            .map
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        other.map.clear();
        for (key, value) in drained {
            self.map.insert(key, value);
        }
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> std::collections::BTreeMap<Vec<u8>, Vec<u8>> {
        self.map
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_roundtrips() {
        let store = Store::new();
        store.set(b"alpha".to_vec(), b"one".to_vec());
        assert_eq!(store.get(b"alpha"), Some(b"one".to_vec()));
    }

    #[test]
    fn get_on_missing_key_is_none_not_empty_string() {
        let store = Store::new();
        store.set(b"alpha".to_vec(), Vec::new());
        // Present with an empty value: Some(empty), distinct from absent: None.
        assert_eq!(store.get(b"alpha"), Some(Vec::new()));
        assert_eq!(store.get(b"missing"), None);
    }

    #[test]
    fn last_write_wins() {
        let store = Store::new();
        store.set(b"k".to_vec(), b"v".to_vec());
        store.set(b"k".to_vec(), b"w".to_vec());
        assert_eq!(store.get(b"k"), Some(b"w".to_vec()));
    }

    #[test]
    fn remove_returns_count() {
        let store = Store::new();
        assert_eq!(store.remove(b"missing"), 0);
        store.set(b"k".to_vec(), b"v".to_vec());
        assert_eq!(store.remove(b"k"), 1);
        assert_eq!(store.get(b"k"), None);
    }

    #[test]
    fn swap_moves_contents_and_empties_source() {
        let main = Store::new();
        let rotate = Store::new();
        main.set(b"old".to_vec(), b"stale".to_vec());
        rotate.set(b"fresh".to_vec(), b"new".to_vec());

        main.swap(&rotate);

        assert_eq!(main.get(b"fresh"), Some(b"new".to_vec()));
        assert_eq!(main.get(b"old"), None);
        assert!(rotate.is_empty());
    }
}
