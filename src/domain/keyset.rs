//! Ordered key-tree model.

use std::collections::btree_map;
use std::collections::BTreeMap;

use crate::domain::key::{Key, KeyCompare, KeyName};

/// Ordered-by-name collection of keys covering one or more namespace roots.
///
/// Parents may be implied: `user:/a/b` can exist without `user:/a`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySet {
    keys: BTreeMap<KeyName, Key>,
}

impl KeySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Insert or replace a key, returning the previous one.
    pub fn insert(&mut self, name: KeyName, key: Key) -> Option<Key> {
        self.keys.insert(name, key)
    }

    pub fn get(&self, name: &KeyName) -> Option<&Key> {
        self.keys.get(name)
    }

    pub fn get_mut(&mut self, name: &KeyName) -> Option<&mut Key> {
        self.keys.get_mut(name)
    }

    pub fn contains(&self, name: &KeyName) -> bool {
        self.keys.contains_key(name)
    }

    /// Remove exactly one key.
    pub fn remove(&mut self, name: &KeyName) -> Option<Key> {
        self.keys.remove(name)
    }

    /// Remove a key and all its descendants, returning what was removed.
    pub fn remove_recursive(&mut self, name: &KeyName) -> KeySet {
        let doomed: Vec<KeyName> = self.subtree(name).map(|(n, _)| n.clone()).collect();
        doomed
            .into_iter()
            .filter_map(|n| self.keys.remove(&n).map(|k| (n, k)))
            .collect()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, KeyName, Key> {
        self.keys.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &KeyName> {
        self.keys.keys()
    }

    /// `name` itself (if present) followed by all descendants, in path order.
    pub fn subtree<'a>(
        &'a self,
        name: &'a KeyName,
    ) -> impl Iterator<Item = (&'a KeyName, &'a Key)> + 'a {
        self.keys
            .range(name.clone()..)
            .take_while(move |(n, _)| n.is_below_or_same(name))
    }

    /// All keys strictly below `name`, in path order.
    pub fn descendants<'a>(
        &'a self,
        name: &'a KeyName,
    ) -> impl Iterator<Item = (&'a KeyName, &'a Key)> + 'a {
        self.subtree(name).filter(move |(n, _)| *n != name)
    }

    /// Names of the direct children of `name`, including implied ones.
    pub fn children(&self, name: &KeyName) -> Vec<KeyName> {
        let depth = name.depth() + 1;
        let mut children: Vec<KeyName> = Vec::new();
        for (descendant, _) in self.descendants(name) {
            let child = descendant.truncate(depth);
            if children.last() != Some(&child) {
                children.push(child);
            }
        }
        children
    }

    /// Copy of the subtree rooted at `name`.
    pub fn cut(&self, name: &KeyName) -> KeySet {
        self.subtree(name)
            .map(|(n, k)| (n.clone(), k.clone()))
            .collect()
    }

    /// Keys matching a predicate on their name.
    pub fn filter_names(&self, mut keep: impl FnMut(&KeyName) -> bool) -> KeySet {
        self.keys
            .iter()
            .filter(|(n, _)| keep(n))
            .map(|(n, k)| (n.clone(), k.clone()))
            .collect()
    }

    /// Add all keys of `other`, replacing duplicates.
    pub fn extend(&mut self, other: KeySet) {
        self.keys.extend(other.keys);
    }

    /// Highest `order` metadata value in the set.
    pub fn max_order(&self) -> Option<u64> {
        self.keys.values().filter_map(Key::order).max()
    }

    /// Per-key equality; `order` metadata only counts when requested.
    pub fn equals(&self, other: &KeySet, compare: KeyCompare) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|((na, ka), (nb, kb))| na == nb && ka.same_as(kb, compare))
    }
}

impl FromIterator<(KeyName, Key)> for KeySet {
    fn from_iter<I: IntoIterator<Item = (KeyName, Key)>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for KeySet {
    type Item = (KeyName, Key);
    type IntoIter = btree_map::IntoIter<KeyName, Key>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.into_iter()
    }
}

impl<'a> IntoIterator for &'a KeySet {
    type Item = (&'a KeyName, &'a Key);
    type IntoIter = btree_map::Iter<'a, KeyName, Key>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}
