//! # SafeMap
//!
//! Concurrent key/value store with concurrent reads and serialized writes.
//!
//! Plain `get` then `set` from two tasks can lose an update. Use
//! [`SafeMap::upsert`] or [`SafeMap::update`] when the new value depends on
//! the old one: they run the read-modify-write under a single write lock.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::RwLock;

#[derive(Debug)]
pub struct SafeMap<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for SafeMap<K, V> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> SafeMap<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces, returning the previous value.
    pub fn set(&self, key: K, value: V) -> Option<V> {
        self.inner.write().insert(key, value)
    }

    /// Returns a clone of the value for `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
        V: Clone,
    {
        self.inner.read().get(key).cloned()
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.read().contains_key(key)
    }

    /// Removes `key`, returning its value.
    pub fn delete<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.write().remove(key)
    }

    /// Snapshot of the keys.
    pub fn keys(&self) -> Vec<K> {
        self.inner.read().keys().cloned().collect()
    }

    pub fn size(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }

    /// Visits every entry under the read lock.
    ///
    /// Writers wait until `f` has seen every entry, so `f` must not call back
    /// into this map. Entries written after `for_each` returns are not seen;
    /// callers must not treat the visit as a point-in-time snapshot of any
    /// other structure.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        for (k, v) in self.inner.read().iter() {
            f(k, v);
        }
    }

    /// Applies `f` to the value for `key`, if present, as one write.
    pub fn update<Q, R, F>(&self, key: &Q, f: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
        F: FnOnce(&mut V) -> R,
    {
        self.inner.write().get_mut(key).map(f)
    }

    /// Applies `f` to the value for `key`, inserting `default()` first if
    /// absent, as one write.
    pub fn upsert<R, D, F>(&self, key: K, default: D, f: F) -> R
    where
        D: FnOnce() -> V,
        F: FnOnce(&mut V) -> R,
    {
        let mut map = self.inner.write();
        f(map.entry(key).or_insert_with(default))
    }

    /// Keeps only entries for which `keep` returns true. Returns how many
    /// were removed.
    pub fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        let mut map = self.inner.write();
        let before = map.len();
        map.retain(|k, v| keep(k, v));
        before - map.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_basic_operations() {
        let map: SafeMap<String, u32> = SafeMap::new();
        assert!(map.is_empty());

        assert_eq!(map.set("a".into(), 1), None);
        assert_eq!(map.set("a".into(), 2), Some(1));
        map.set("b".into(), 3);

        assert_eq!(map.get("a"), Some(2));
        assert!(map.contains_key("b"));
        assert_eq!(map.size(), 2);

        let mut keys = map.keys();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);

        assert_eq!(map.delete("a"), Some(2));
        assert_eq!(map.get("a"), None);

        map.clear();
        assert_eq!(map.size(), 0);
    }

    #[test]
    fn test_for_each_visits_everything() {
        let map: SafeMap<u32, u32> = SafeMap::new();
        for i in 0..10 {
            map.set(i, i * 2);
        }

        let mut sum = 0;
        map.for_each(|_, v| sum += v);
        assert_eq!(sum, 90);
    }

    #[test]
    fn test_update_and_retain() {
        let map: SafeMap<&'static str, u32> = SafeMap::new();
        map.set("x", 1);
        map.set("y", 10);

        assert_eq!(map.update("x", |v| { *v += 1; *v }), Some(2));
        assert_eq!(map.update("missing", |v| *v), None);

        let removed = map.retain(|_, v| *v > 5);
        assert_eq!(removed, 1);
        assert_eq!(map.keys(), vec!["y"]);
    }

    #[test]
    fn test_upsert_has_no_lost_updates() {
        let map: Arc<SafeMap<String, u64>> = Arc::new(SafeMap::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let map = map.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        map.upsert("10.0.0.1".to_string(), || 0, |count| *count += 1);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(map.get("10.0.0.1"), Some(4000));
    }
}
