//! Generic lookup table with a not-found fallback.
//!
//! Every block, item and command lookup goes through a [`Registry`]. A miss is
//! never an error: `get` hands back the configured fallback value instead.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

/// Insert-or-overwrite map whose `get` always returns a value.
#[derive(Debug, Clone)]
pub struct Registry<K, V> {
    entries: HashMap<K, V>,
    fallback: V,
}

impl<K: Eq + Hash, V> Registry<K, V> {
    pub fn new(fallback: V) -> Self {
        Self {
            entries: HashMap::new(),
            fallback,
        }
    }

    /// Store `value` under `key`, returning the value it replaced.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    /// The stored value, or the fallback when `key` is absent.
    pub fn get<Q>(&self, key: &Q) -> &V
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).unwrap_or(&self.fallback)
    }

    /// Like [`Registry::get`] but distinguishes a miss.
    pub fn try_get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get_mut(key)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    pub fn fallback(&self) -> &V {
        &self.fallback
    }

    pub fn set_fallback(&mut self, fallback: V) {
        self.fallback = fallback;
    }

    /// Number of stored entries (the fallback is not counted).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate stored entries in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_returns_fallback() {
        let mut r: Registry<String, u32> = Registry::new(7);
        r.insert("a".into(), 1);
        assert_eq!(*r.get("a"), 1);
        assert_eq!(*r.get("missing"), 7);
        assert!(r.try_get("missing").is_none());
    }

    #[test]
    fn insert_overwrites() {
        let mut r: Registry<u16, &str> = Registry::new("none");
        assert_eq!(r.insert(1, "one"), None);
        assert_eq!(r.insert(1, "uno"), Some("one"));
        assert_eq!(*r.get(&1), "uno");
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn fallback_can_be_replaced() {
        let mut r: Registry<u16, &str> = Registry::new("first");
        r.set_fallback("second");
        assert_eq!(*r.get(&99), "second");
        assert_eq!(*r.fallback(), "second");
    }
}
