use ahash::{AHashMap, AHashSet};
use std::{borrow::Borrow, hash::Hash};

/// A one-to-many secondary index. Keys with no values are dropped.
#[derive(Debug)]
pub(crate) struct Multimap<K, V>(AHashMap<K, AHashSet<V>>);

impl<K, V> Default for Multimap<K, V> {
    fn default() -> Self {
        Self(AHashMap::default())
    }
}

impl<K: Eq + Hash, V: Eq + Hash> Multimap<K, V> {
    pub(crate) fn insert(&mut self, key: K, value: V) {
        self.0.entry(key).or_default().insert(value);
    }

    pub(crate) fn remove<Q>(&mut self, key: &Q, value: &V)
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        if let Some(values) = self.0.get_mut(key) {
            values.remove(value);
            if values.is_empty() {
                self.0.remove(key);
            }
        }
    }

    pub(crate) fn get<Q>(&self, key: &Q) -> impl Iterator<Item = &V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.0.get(key).into_iter().flatten()
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }
}
