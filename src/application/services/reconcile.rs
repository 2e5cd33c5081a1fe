//! Reconciler: converges the live store to a desired state in one transaction.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::application::request::ReconcileRequest;
use crate::application::services::{KeyStore, MountChange, SessionRecorder};
use crate::application::ApplicationResult;
use crate::domain::{
    diff, is_reserved, merge_with_removals, BuiltTree, Diff, DomainError, DomainResult,
    KeyCompare, KeyName, KeySet, RemoveSpec, TreeBuilder,
};

/// Result of one reconcile invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Some backend content (keys, mount table or session) changed.
    pub changed: bool,
    /// Changes to the live tree, administrative subtree excluded.
    pub diff: Diff,
    pub message: String,
}

/// Service running reconcile requests against the store.
pub struct Reconciler {
    store: Arc<KeyStore>,
    default_keep_order: bool,
}

/// Request input after building, before any store I/O.
struct Prepared {
    desired: BuiltTree,
    base: Option<KeySet>,
    compare: KeyCompare,
    keep_order: bool,
}

impl Reconciler {
    pub fn new(store: Arc<KeyStore>, default_keep_order: bool) -> Self {
        Self {
            store,
            default_keep_order,
        }
    }

    /// Converge the store to `request`.
    ///
    /// Nothing is written when the request is invalid, a merge aborts on a
    /// conflict, or the store already matches. A failed write restores
    /// every backend written so far.
    #[instrument(
        level = "debug",
        skip_all,
        fields(mountpoint = ?request.mountpoint.as_ref().map(ToString::to_string))
    )]
    pub fn reconcile(&self, request: &ReconcileRequest) -> ApplicationResult<Outcome> {
        let prepared = self.prepare(request)?;
        let compare = prepared.compare;
        let mounts = self.store.mounts();

        let mut ctx = self.store.load()?;
        let original_table = ctx.table.clone();

        for prefix in &request.umount {
            mounts.unmount(&mut ctx.table, prefix);
        }
        let mut preserved = Vec::new();
        for mountpoint in &request.mounts {
            let change = mounts.mount(&mut ctx.table, mountpoint.clone())?;
            if let MountChange::Remounted { .. } = change {
                if mountpoint.preserve_keys {
                    preserved.push(mountpoint.prefix.clone());
                }
            }
        }

        let live = self.store.read_live(&ctx.root, &ctx.table)?;
        let mut current = live.keys.clone();
        if !preserved.is_empty() {
            let before = self.store.read_live(&ctx.root, &original_table)?;
            for prefix in &preserved {
                let carried = original_table.owned_by(&before.keys, prefix);
                debug!(%prefix, keys = carried.len(), "carrying keys to new backend");
                current = current.filter_names(|n| !ctx.table.is_owned_by(n, prefix));
                current.extend(carried.filter_names(|n| ctx.table.is_owned_by(n, prefix)));
            }
        }

        let target = match &request.merge {
            Some(merge_request) => {
                let base = prepared
                    .base
                    .clone()
                    .unwrap_or_else(|| ctx.session.diff.undo(&current));
                let ours = prepared
                    .desired
                    .apply_to(&base, &request.remove, prepared.keep_order);
                let removed = removed_names(&prepared.desired, &request.remove, &[&base, &current]);
                let merged = merge_with_removals(
                    &base,
                    &ours,
                    &current,
                    &removed,
                    merge_request.strategy,
                    compare,
                )?;
                if !merged.resolved_conflicts.is_empty() {
                    info!(
                        conflicts = merged.resolved_conflicts.len(),
                        strategy = %merge_request.strategy,
                        "merge conflicts resolved"
                    );
                }
                merged.tree
            }
            None => prepared
                .desired
                .apply_to(&current, &request.remove, prepared.keep_order),
        };

        let recorder = SessionRecorder::new(compare);
        if let Some(record) = &request.record {
            recorder.configure(&mut ctx.session, record);
        }

        let applied = diff(&current, &target, compare).filter(|n| !is_reserved(n));
        recorder.capture(&mut ctx.session, &applied, request.record.as_ref());

        let written = self.store.commit(&ctx, &live, &target)?;
        let changed = written > 0;
        let message = if changed {
            format!("changed: {}", applied.summary())
        } else {
            "no changes".to_string()
        };
        info!(changed, "{message}");
        Ok(Outcome {
            changed,
            diff: applied,
            message,
        })
    }

    /// Build the desired and base trees and validate them.
    fn prepare(&self, request: &ReconcileRequest) -> DomainResult<Prepared> {
        let keep_order = request.keep_order.unwrap_or(self.default_keep_order);
        let base_name = request.mountpoint.as_ref();

        let desired = TreeBuilder::build(&request.keys, base_name, keep_order)?;
        let base = request
            .merge
            .as_ref()
            .and_then(|m| m.base.as_ref())
            .map(|base: &Value| TreeBuilder::build(base, base_name, keep_order).map(|t| t.keys))
            .transpose()?;

        let reserved = desired
            .names()
            .chain(request.remove.iter().map(|r| &r.path))
            .find(|n| is_reserved(n));
        if let Some(name) = reserved {
            return Err(DomainError::validation(format!(
                "'{name}' is maintained by the store and cannot be set or removed"
            )));
        }

        Ok(Prepared {
            desired,
            base,
            compare: KeyCompare::new(keep_order),
            keep_order,
        })
    }
}

/// Every name the request deletes; recursive removals cover the descendants
/// found in any of `trees`.
fn removed_names(
    desired: &BuiltTree,
    removes: &[RemoveSpec],
    trees: &[&KeySet],
) -> BTreeSet<KeyName> {
    let mut removed = desired.removals.clone();
    for spec in removes {
        removed.insert(spec.path.clone());
        if spec.recursive {
            for tree in trees {
                removed.extend(tree.descendants(&spec.path).map(|(name, _)| name.clone()));
            }
        }
    }
    removed
}
