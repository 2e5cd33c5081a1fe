//! Diff engine: structured change sets between two key-trees.

use std::collections::BTreeMap;

use itertools::{EitherOrBoth, Itertools};

use crate::domain::key::{Key, KeyCompare, KeyName};
use crate::domain::keyset::KeySet;

/// Added, modified and removed keys between two trees.
///
/// A name appears in at most one of the three maps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    pub added: BTreeMap<KeyName, Key>,
    /// `(old, new)`
    pub modified: BTreeMap<KeyName, (Key, Key)>,
    pub removed: BTreeMap<KeyName, Key>,
}

/// `(old, new)` state of one name in a diff; `None` means absent.
pub type Change<'a> = (Option<&'a Key>, Option<&'a Key>);

/// Compute the diff turning `from` into `to`.
///
/// Single merge-walk over both path-ordered key lists.
pub fn diff(from: &KeySet, to: &KeySet, compare: KeyCompare) -> Diff {
    let mut result = Diff::default();
    for entry in from
        .iter()
        .merge_join_by(to.iter(), |(a, _), (b, _)| a.cmp(b))
    {
        match entry {
            EitherOrBoth::Left((name, old)) => {
                result.removed.insert(name.clone(), old.clone());
            }
            EitherOrBoth::Right((name, new)) => {
                result.added.insert(name.clone(), new.clone());
            }
            EitherOrBoth::Both((name, old), (_, new)) => {
                if !old.same_as(new, compare) {
                    result
                        .modified
                        .insert(name.clone(), (old.clone(), new.clone()));
                }
            }
        }
    }
    result
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }

    /// Old and new state of `name`, if the diff touches it.
    pub fn get(&self, name: &KeyName) -> Option<Change<'_>> {
        if let Some(new) = self.added.get(name) {
            return Some((None, Some(new)));
        }
        if let Some((old, new)) = self.modified.get(name) {
            return Some((Some(old), Some(new)));
        }
        self.removed.get(name).map(|old| (Some(old), None))
    }

    /// All touched names in path order.
    pub fn names(&self) -> Vec<&KeyName> {
        self.added
            .keys()
            .merge(self.modified.keys())
            .merge(self.removed.keys())
            .collect()
    }

    /// Record a transition for `name`, dropping it when it is a no-op.
    pub fn record(
        &mut self,
        name: KeyName,
        old: Option<Key>,
        new: Option<Key>,
        compare: KeyCompare,
    ) {
        self.added.remove(&name);
        self.modified.remove(&name);
        self.removed.remove(&name);
        match (old, new) {
            (None, Some(new)) => {
                self.added.insert(name, new);
            }
            (Some(old), None) => {
                self.removed.insert(name, old);
            }
            (Some(old), Some(new)) if !old.same_as(&new, compare) => {
                self.modified.insert(name, (old, new));
            }
            _ => {}
        }
    }

    /// Apply the diff to `tree`, producing a new tree.
    pub fn apply(&self, tree: &KeySet) -> KeySet {
        let mut out = tree.clone();
        for name in self.removed.keys() {
            out.remove(name);
        }
        for (name, key) in &self.added {
            out.insert(name.clone(), key.clone());
        }
        for (name, (_, new)) in &self.modified {
            out.insert(name.clone(), new.clone());
        }
        out
    }

    /// Revert the diff on `tree`, producing a new tree.
    pub fn undo(&self, tree: &KeySet) -> KeySet {
        let mut out = tree.clone();
        for name in self.added.keys() {
            out.remove(name);
        }
        for (name, key) in &self.removed {
            out.insert(name.clone(), key.clone());
        }
        for (name, (old, _)) in &self.modified {
            out.insert(name.clone(), old.clone());
        }
        out
    }

    /// Fold a later diff into this one: the result goes from this diff's old
    /// state straight to `later`'s new state.
    pub fn compose(&self, later: &Diff, compare: KeyCompare) -> Diff {
        let mut result = Diff::default();
        for name in self.names().into_iter().merge(later.names()).dedup() {
            let (old, new) = match (self.get(name), later.get(name)) {
                (Some((old, _)), Some((_, new))) => (old, new),
                (Some(change), None) | (None, Some(change)) => change,
                (None, None) => continue,
            };
            result.record(name.clone(), old.cloned(), new.cloned(), compare);
        }
        result
    }

    /// Keep only names accepted by `keep`.
    pub fn filter(&self, mut keep: impl FnMut(&KeyName) -> bool) -> Diff {
        Diff {
            added: self
                .added
                .iter()
                .filter(|(n, _)| keep(n))
                .map(|(n, k)| (n.clone(), k.clone()))
                .collect(),
            modified: self
                .modified
                .iter()
                .filter(|(n, _)| keep(n))
                .map(|(n, k)| (n.clone(), k.clone()))
                .collect(),
            removed: self
                .removed
                .iter()
                .filter(|(n, _)| keep(n))
                .map(|(n, k)| (n.clone(), k.clone()))
                .collect(),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} added, {} modified, {} removed",
            self.added.len(),
            self.modified.len(),
            self.removed.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn name(s: &str) -> KeyName {
        s.parse().unwrap()
    }

    fn tree(entries: &[(&str, &str)]) -> KeySet {
        entries
            .iter()
            .map(|(n, v)| (name(n), Key::with_value(*v)))
            .collect()
    }

    #[test]
    fn given_two_trees_when_diffing_then_changes_classified() {
        let from = tree(&[("user:/a", "1"), ("user:/b", "2"), ("user:/c", "3")]);
        let to = tree(&[("user:/b", "2"), ("user:/c", "30"), ("user:/d", "4")]);

        let d = diff(&from, &to, KeyCompare::default());

        assert_eq!(d.added.keys().collect::<Vec<_>>(), vec![&name("user:/d")]);
        assert_eq!(d.removed.keys().collect::<Vec<_>>(), vec![&name("user:/a")]);
        assert_eq!(d.modified.keys().collect::<Vec<_>>(), vec![&name("user:/c")]);
        assert_eq!(d.len(), 3);
    }

    #[test]
    fn given_metadata_change_when_diffing_then_modified() {
        let from: KeySet = [(name("user:/a"), Key::with_value("1").with_meta("type", "long"))]
            .into_iter()
            .collect();
        let to: KeySet = [(name("user:/a"), Key::with_value("1"))].into_iter().collect();
        assert_eq!(diff(&from, &to, KeyCompare::default()).modified.len(), 1);
    }

    #[rstest]
    #[case(&[], &[("user:/a", "1")])]
    #[case(&[("user:/a", "1")], &[])]
    #[case(&[("user:/a", "1"), ("user:/a/b", "2")], &[("user:/a", "9"), ("system:/x", "2")])]
    #[case(&[("dir:/l/#0", "x"), ("dir:/l/#1", "y")], &[("dir:/l/#0", "y")])]
    fn given_any_trees_when_applying_diff_then_target_reached(
        #[case] from: &[(&str, &str)],
        #[case] to: &[(&str, &str)],
    ) {
        let (from, to) = (tree(from), tree(to));
        let d = diff(&from, &to, KeyCompare::default());

        assert!(d.apply(&from).equals(&to, KeyCompare::default()));
        assert!(d.undo(&to).equals(&from, KeyCompare::default()));
    }

    #[test]
    fn given_successive_diffs_when_composing_then_net_change_only() {
        let a = tree(&[("user:/x", "1"), ("user:/y", "1")]);
        let b = tree(&[("user:/x", "2"), ("user:/y", "1"), ("user:/z", "1")]);
        let c = tree(&[("user:/x", "1"), ("user:/z", "5")]);
        let cmp = KeyCompare::default();

        let composed = diff(&a, &b, cmp).compose(&diff(&b, &c, cmp), cmp);

        assert_eq!(composed, diff(&a, &c, cmp));
        assert!(composed.get(&name("user:/x")).is_none());
    }
}
