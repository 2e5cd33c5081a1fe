//! Recording session: accumulates the changes made to the store over time.

use std::collections::BTreeMap;

use tracing::debug;

use crate::domain::diff::Diff;
use crate::domain::entities::{admin_root, flag, record_root};
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::key::{Key, KeyCompare, KeyName, Namespace, Segment};
use crate::domain::keyset::KeySet;

/// Who produced a change offered to [`RecordingSession::capture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// The reconciler converging the store to a desired state.
    Reconcile,
    /// A direct edit (`set`, `rm`) through the store.
    External,
}

/// Enabled/disabled state machine with a scope and an accumulated diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingSession {
    pub active: bool,
    /// Only changes at or below this name are captured; `None` captures all.
    pub scope: Option<KeyName>,
    pub diff: Diff,
}

const CONFIG: &str = "config";
const ACTIVE: &str = "active";
const PARENT_KEY: &str = "parentKey";
const SESSION_DIFF: &str = "session/diff";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Added,
    Removed,
    ModifiedOld,
    ModifiedNew,
}

impl Slot {
    const ALL: [Slot; 4] = [Slot::Added, Slot::Removed, Slot::ModifiedOld, Slot::ModifiedNew];

    fn path(self) -> &'static str {
        match self {
            Slot::Added => "added",
            Slot::Removed => "removed",
            Slot::ModifiedOld => "modified/old",
            Slot::ModifiedNew => "modified/new",
        }
    }

    fn root(self) -> KeyName {
        record_root().join_path(SESSION_DIFF).join_path(self.path())
    }
}

impl RecordingSession {
    /// Start recording below `scope`. Returns whether anything changed.
    pub fn enable(&mut self, scope: Option<KeyName>, reset: bool) -> bool {
        if self.active && self.scope == scope && !reset {
            return false;
        }
        let before = self.clone();
        self.active = true;
        self.scope = scope;
        if reset {
            self.diff = Diff::default();
        }
        *self != before
    }

    /// Stop recording; the accumulated diff survives unless `reset`.
    pub fn disable(&mut self, reset: bool) -> bool {
        let before = self.clone();
        self.active = false;
        if reset {
            self.diff = Diff::default();
        }
        *self != before
    }

    /// Drop the accumulated diff, keeping the enabled state.
    pub fn reset(&mut self) -> bool {
        let had_changes = !self.diff.is_empty();
        self.diff = Diff::default();
        had_changes
    }

    pub fn in_scope(&self, name: &KeyName) -> bool {
        self.scope
            .as_ref()
            .map_or(true, |scope| name.is_below_or_same(scope))
    }

    /// Fold `applied` into the accumulated diff.
    ///
    /// Reconcile writes are only captured with `record_reconcile`; changes
    /// outside the scope or inside `system:/elektra` never are.
    pub fn capture(
        &mut self,
        applied: &Diff,
        origin: ChangeOrigin,
        record_reconcile: bool,
        compare: KeyCompare,
    ) -> bool {
        if !self.active || (origin == ChangeOrigin::Reconcile && !record_reconcile) {
            return false;
        }
        let admin = admin_root();
        let relevant = applied.filter(|n| self.in_scope(n) && !n.is_below_or_same(&admin));
        if relevant.is_empty() {
            return false;
        }
        debug!(changes = relevant.len(), ?origin, "capturing into recording session");
        self.diff = self.diff.compose(&relevant, compare);
        true
    }

    /// Persisted form below `system:/elektra/record`; empty for a pristine session.
    pub fn to_keys(&self) -> KeySet {
        let mut keys = KeySet::new();
        if *self == RecordingSession::default() {
            return keys;
        }
        let config = record_root().join_path(CONFIG);
        keys.insert(config.join_path(ACTIVE), Key::with_value(flag(self.active)));
        if let Some(scope) = &self.scope {
            keys.insert(config.join_path(PARENT_KEY), Key::with_value(scope.to_string()));
        }
        let mut put = |slot: Slot, name: &KeyName, key: &Key| {
            keys.insert(encode(slot, name), key.clone());
        };
        for (name, key) in &self.diff.added {
            put(Slot::Added, name, key);
        }
        for (name, key) in &self.diff.removed {
            put(Slot::Removed, name, key);
        }
        for (name, (old, new)) in &self.diff.modified {
            put(Slot::ModifiedOld, name, old);
            put(Slot::ModifiedNew, name, new);
        }
        keys
    }

    pub fn from_keys(keys: &KeySet) -> DomainResult<Self> {
        let config = record_root().join_path(CONFIG);
        let value = |name: &KeyName| keys.get(name).and_then(Key::value);

        let active = value(&config.join_path(ACTIVE)) == Some("1");
        let scope = value(&config.join_path(PARENT_KEY))
            .map(str::parse::<KeyName>)
            .transpose()?;

        let mut diff = Diff::default();
        let mut old_of_modified = BTreeMap::new();
        for slot in Slot::ALL {
            let root = slot.root();
            for (stored, key) in keys.descendants(&root) {
                let name = decode(stored, &root)?;
                match slot {
                    Slot::Added => {
                        diff.added.insert(name, key.clone());
                    }
                    Slot::Removed => {
                        diff.removed.insert(name, key.clone());
                    }
                    Slot::ModifiedOld => {
                        old_of_modified.insert(name, key.clone());
                    }
                    Slot::ModifiedNew => {
                        let old = old_of_modified.remove(&name).ok_or_else(|| {
                            DomainError::validation(format!(
                                "recorded modification of '{name}' has no old state"
                            ))
                        })?;
                        diff.modified.insert(name, (old, key.clone()));
                    }
                }
            }
        }
        if let Some(name) = old_of_modified.keys().next() {
            return Err(DomainError::validation(format!(
                "recorded modification of '{name}' has no new state"
            )));
        }
        Ok(Self {
            active,
            scope,
            diff,
        })
    }
}

/// `<slot root>/<ns>/<segments…>`
fn encode(slot: Slot, name: &KeyName) -> KeyName {
    slot.root()
        .child(Segment::name(name.namespace().as_str()))
        .join_segments(name.segments())
}

fn decode(stored: &KeyName, root: &KeyName) -> DomainResult<KeyName> {
    let malformed = || DomainError::validation(format!("malformed session diff entry '{stored}'"));
    let tail = stored.strip_prefix(root).ok_or_else(malformed)?;
    let Some((Segment::Name(ns), rest)) = tail.split_first() else {
        return Err(malformed());
    };
    let namespace = Namespace::from_name(ns).ok_or_else(malformed)?;
    Ok(KeyName::new(namespace, rest.to_vec()))
}
