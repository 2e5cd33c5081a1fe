//! Session recorder: applies per-invocation recording requests.

use tracing::{debug, info};

use crate::application::request::RecordRequest;
use crate::domain::{ChangeOrigin, Diff, KeyCompare, RecordingSession};

/// Drives the recording session for one reconcile invocation.
pub struct SessionRecorder {
    compare: KeyCompare,
}

impl SessionRecorder {
    pub fn new(compare: KeyCompare) -> Self {
        Self { compare }
    }

    /// Enable, disable or reset the session as requested.
    /// Returns whether the session changed.
    pub fn configure(&self, session: &mut RecordingSession, request: &RecordRequest) -> bool {
        if request.skip {
            debug!("record.skip: session configuration left untouched");
            return false;
        }
        let changed = match request.enable {
            Some(true) => session.enable(request.scope.clone(), request.reset),
            Some(false) => session.disable(request.reset),
            None if request.reset => session.reset(),
            None => false,
        };
        if changed {
            info!(
                active = session.active,
                scope = ?session.scope.as_ref().map(ToString::to_string),
                "recording session updated"
            );
        }
        changed
    }

    /// Capture this invocation's own changes.
    pub fn capture(
        &self,
        session: &mut RecordingSession,
        applied: &Diff,
        request: Option<&RecordRequest>,
    ) -> bool {
        if request.is_some_and(|r| r.skip) {
            return false;
        }
        let record_reconcile = request.is_some_and(|r| r.record_reconcile);
        session.capture(applied, ChangeOrigin::Reconcile, record_reconcile, self.compare)
    }
}
