//! Three-way merge of key-trees.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use itertools::{EitherOrBoth, Itertools};
use tracing::debug;

use crate::domain::diff::{diff, Diff};
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::key::{Key, KeyCompare, KeyName};
use crate::domain::keyset::KeySet;

/// Conflict resolution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    /// Conflicting keys take the desired state.
    Ours,
    /// Conflicting keys keep the live state.
    Theirs,
    /// Any conflict fails the whole merge.
    #[default]
    Abort,
}

impl FromStr for MergeStrategy {
    type Err = DomainError;

    fn from_str(s: &str) -> DomainResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ours" => Ok(Self::Ours),
            "theirs" => Ok(Self::Theirs),
            "abort" => Ok(Self::Abort),
            other => Err(DomainError::validation(format!(
                "unknown merge strategy '{other}' (expected ours, theirs or abort)"
            ))),
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ours => "ours",
            Self::Theirs => "theirs",
            Self::Abort => "abort",
        })
    }
}

/// Merged tree plus the conflicts the strategy resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    pub tree: KeySet,
    pub resolved_conflicts: Vec<KeyName>,
}

fn same_state(a: Option<&Key>, b: Option<&Key>, compare: KeyCompare) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.same_as(b, compare),
        _ => false,
    }
}

/// Reconcile `ours` and `theirs` against their common ancestor `base`.
///
/// Changes made by only one side are taken; identical changes on both sides
/// are taken once; divergent changes are conflicts settled by `strategy`.
/// None of the inputs is modified.
pub fn merge(
    base: &KeySet,
    ours: &KeySet,
    theirs: &KeySet,
    strategy: MergeStrategy,
    compare: KeyCompare,
) -> DomainResult<MergeResult> {
    merge_with_removals(base, ours, theirs, &BTreeSet::new(), strategy, compare)
}

/// [`merge`] where `removed` lists names our side deletes explicitly.
///
/// A removed name absent from `base` still counts as a change on our side,
/// so a key they added there conflicts with the removal.
pub fn merge_with_removals(
    base: &KeySet,
    ours: &KeySet,
    theirs: &KeySet,
    removed: &BTreeSet<KeyName>,
    strategy: MergeStrategy,
    compare: KeyCompare,
) -> DomainResult<MergeResult> {
    let ours_diff = diff(base, ours, compare);
    let theirs_diff = diff(base, theirs, compare);

    let mut ours_changes = new_states(&ours_diff);
    for name in removed {
        if !ours.contains(name) {
            ours_changes.entry(name).or_insert(None);
        }
    }
    let theirs_changes = new_states(&theirs_diff);

    let mut tree = base.clone();
    let mut conflicts = Vec::new();

    for entry in ours_changes
        .iter()
        .merge_join_by(theirs_changes.iter(), |(a, _), (b, _)| a.cmp(b))
    {
        let (name, resolved) = match entry {
            EitherOrBoth::Left((name, new)) | EitherOrBoth::Right((name, new)) => (*name, *new),
            EitherOrBoth::Both((name, ours_new), (_, theirs_new)) => {
                if same_state(*ours_new, *theirs_new, compare) {
                    (*name, *ours_new)
                } else {
                    conflicts.push((*name).clone());
                    match strategy {
                        MergeStrategy::Ours => (*name, *ours_new),
                        MergeStrategy::Theirs => (*name, *theirs_new),
                        MergeStrategy::Abort => continue,
                    }
                }
            }
        };
        match resolved {
            Some(key) => {
                tree.insert(name.clone(), key.clone());
            }
            None => {
                tree.remove(name);
            }
        }
    }

    if strategy == MergeStrategy::Abort && !conflicts.is_empty() {
        return Err(DomainError::MergeConflict { paths: conflicts });
    }
    if !conflicts.is_empty() {
        debug!(count = conflicts.len(), %strategy, "resolved merge conflicts");
    }
    Ok(MergeResult {
        tree,
        resolved_conflicts: conflicts,
    })
}

/// New state of every name a diff touches; `None` means removed.
fn new_states(changes: &Diff) -> BTreeMap<&KeyName, Option<&Key>> {
    changes
        .names()
        .into_iter()
        .filter_map(|name| changes.get(name).map(|(_, new)| (name, new)))
        .collect()
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

    #[rstest]
    #[case(MergeStrategy::Ours)]
    #[case(MergeStrategy::Theirs)]
    #[case(MergeStrategy::Abort)]
    fn given_disjoint_changes_when_merging_then_both_applied(#[case] strategy: MergeStrategy) {
        let base = tree(&[("user:/a", "1"), ("user:/b", "1"), ("user:/c", "1")]);
        let ours = tree(&[("user:/a", "2"), ("user:/b", "1"), ("user:/c", "1"), ("user:/o", "o")]);
        let theirs = tree(&[("user:/a", "1"), ("user:/b", "3")]);

        let result = merge(&base, &ours, &theirs, strategy, KeyCompare::default()).unwrap();

        let expected = tree(&[("user:/a", "2"), ("user:/b", "3"), ("user:/o", "o")]);
        assert_eq!(result.tree, expected);
        assert!(result.resolved_conflicts.is_empty());
    }

    #[test]
    fn given_identical_change_on_both_sides_when_merging_then_no_conflict() {
        let base = tree(&[("user:/a", "1")]);
        let both = tree(&[("user:/a", "2")]);
        let result =
            merge(&base, &both, &both, MergeStrategy::Abort, KeyCompare::default()).unwrap();
        assert_eq!(result.tree, both);
    }

    #[rstest]
    #[case(MergeStrategy::Ours, "k2-our")]
    #[case(MergeStrategy::Theirs, "k2-their")]
    fn given_divergent_change_when_merging_then_strategy_decides(
        #[case] strategy: MergeStrategy,
        #[case] expected: &str,
    ) {
        let base = tree(&[("user:/key1", "k1"), ("user:/key2", "k2-base")]);
        let ours = tree(&[("user:/key1", "k1"), ("user:/key2", "k2-our")]);
        let theirs = tree(&[("user:/key1", "k1"), ("user:/key2", "k2-their")]);

        let result = merge(&base, &ours, &theirs, strategy, KeyCompare::default()).unwrap();

        assert_eq!(
            result.tree.get(&name("user:/key2")).and_then(Key::value),
            Some(expected)
        );
        assert_eq!(result.resolved_conflicts, vec![name("user:/key2")]);
    }

    #[test]
    fn given_divergent_change_when_merging_with_abort_then_conflict_names_paths() {
        let base = tree(&[("user:/key2", "k2-base")]);
        let ours = tree(&[("user:/key2", "k2-our")]);
        let theirs = KeySet::new();

        let err = merge(&base, &ours, &theirs, MergeStrategy::Abort, KeyCompare::default())
            .unwrap_err();

        assert_eq!(
            err,
            DomainError::MergeConflict {
                paths: vec![name("user:/key2")]
            }
        );
        assert!(err.to_string().contains("user:/key2"));
    }

    #[test]
    fn given_unknown_strategy_when_parsing_then_validation_error() {
        assert_eq!("Theirs".parse::<MergeStrategy>().unwrap(), MergeStrategy::Theirs);
        assert!(matches!(
            "newest".parse::<MergeStrategy>(),
            Err(DomainError::Validation(_))
        ));
    }
}
