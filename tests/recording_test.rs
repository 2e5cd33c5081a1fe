//! Integration tests for the recording session across invocations.

use serde_json::{json, Value};
use tempfile::TempDir;

use rsconf::application::{ApplicationError, ReconcileRequest};
use rsconf::domain::{DomainError, KeyName};
use rsconf::infrastructure::di::ServiceContainer;
use rsconf::util::testing::container_in;

fn name(s: &str) -> KeyName {
    s.parse().unwrap()
}

fn reconcile(container: &ServiceContainer, input: Value) -> bool {
    let request = ReconcileRequest::from_value(input).expect("valid request");
    container
        .reconciler()
        .reconcile(&request)
        .expect("reconcile")
        .changed
}

#[test]
fn given_enabled_session_without_record_reconcile_when_reconciling_then_own_writes_not_recorded() {
    let dir = TempDir::new().unwrap();
    let container = container_in(dir.path());

    reconcile(
        &container,
        json!({"keys": {"user:/app/port": "8080"}, "record": {"enable": true}}),
    );

    let session = container.store.load().unwrap().session;
    assert!(session.active);
    assert!(session.diff.is_empty());
}

#[test]
fn given_record_reconcile_when_reconciling_then_own_writes_recorded() {
    let dir = TempDir::new().unwrap();
    let container = container_in(dir.path());

    reconcile(
        &container,
        json!({
            "keys": {"user:/app/port": "8080"},
            "record": {"enable": true, "recordAnsible": true},
        }),
    );

    let session = container.store.load().unwrap().session;
    assert_eq!(session.diff.len(), 1);
    assert!(session.diff.added.contains_key(&name("user:/app/port")));
}

#[test]
fn given_enabled_session_when_editing_outside_reconcile_then_edit_recorded() {
    let dir = TempDir::new().unwrap();
    let container = container_in(dir.path());
    reconcile(&container, json!({"record": {"enable": true}}));

    container.store.set_key(&name("user:/x"), "1").unwrap();
    container.store.remove_key(&name("user:/x"), false).unwrap();
    container.store.set_key(&name("user:/y"), "2").unwrap();

    let session = container.store.load().unwrap().session;
    assert_eq!(session.diff.len(), 1, "add then remove of user:/x cancels out");
    assert!(session.diff.added.contains_key(&name("user:/y")));
}

#[test]
fn given_scoped_session_when_editing_then_only_scope_recorded() {
    let dir = TempDir::new().unwrap();
    let container = container_in(dir.path());
    reconcile(
        &container,
        json!({"mountpoint": "user:/app", "record": {"enable": true, "parentKey": "watched"}}),
    );

    container.store.set_key(&name("user:/app/watched/a"), "1").unwrap();
    container.store.set_key(&name("user:/app/other"), "1").unwrap();

    let session = container.store.load().unwrap().session;
    assert_eq!(session.scope, Some(name("user:/app/watched")));
    assert_eq!(session.diff.len(), 1);
    assert!(session.diff.added.contains_key(&name("user:/app/watched/a")));
}

#[test]
fn given_recorded_changes_when_disabling_with_reset_then_session_pristine() {
    let dir = TempDir::new().unwrap();
    let container = container_in(dir.path());
    reconcile(&container, json!({"record": {"enable": true}}));
    container.store.set_key(&name("user:/x"), "1").unwrap();

    assert!(reconcile(&container, json!({"record": {"enable": false, "reset": true}})));

    let ctx = container.store.load().unwrap();
    assert!(!ctx.session.active);
    assert!(ctx.session.diff.is_empty());
    assert!(
        ctx.root.names().all(|n| !n.to_string().starts_with("system:/elektra/record")),
        "pristine session persists as no keys"
    );
}

#[test]
fn given_skip_when_reconciling_then_session_left_as_is() {
    let dir = TempDir::new().unwrap();
    let container = container_in(dir.path());
    reconcile(&container, json!({"record": {"enable": true}}));

    reconcile(
        &container,
        json!({
            "keys": {"user:/z": "1"},
            "record": {"enable": false, "recordAnsible": true, "skip": true},
        }),
    );

    let session = container.store.load().unwrap().session;
    assert!(session.active);
    assert!(session.diff.is_empty());
}

#[test]
fn given_recorded_edit_when_querying_facts_then_session_diff_readable() {
    let dir = TempDir::new().unwrap();
    let container = container_in(dir.path());
    reconcile(
        &container,
        json!({"keys": {"user:/app/port": "8080"}, "record": {"enable": true}}),
    );
    container.store.set_key(&name("user:/app/port"), "9090").unwrap();

    let facts = container
        .store
        .facts(&name("system:/elektra/record"))
        .unwrap();

    let value = |key: &str| facts.get(key).and_then(|f| f.value.as_deref());
    assert_eq!(value("system:/elektra/record/config/active"), Some("1"));
    assert_eq!(
        value("system:/elektra/record/session/diff/modified/old/user/app/port"),
        Some("8080")
    );
    assert_eq!(
        value("system:/elektra/record/session/diff/modified/new/user/app/port"),
        Some("9090")
    );
}

#[test]
fn given_session_subtree_in_request_when_reconciling_then_rejected_and_session_kept() {
    let dir = TempDir::new().unwrap();
    let container = container_in(dir.path());
    reconcile(&container, json!({"record": {"enable": true}}));
    container.store.set_key(&name("user:/x"), "1").unwrap();

    for input in [
        json!({"keys": {"system:/elektra/record/session/diff/added/user/y": "1"}}),
        json!({"remove": [{"path": "system:/elektra/record", "recursive": true}]}),
    ] {
        let request = ReconcileRequest::from_value(input).expect("valid request");
        let err = container.reconciler().reconcile(&request).unwrap_err();
        assert!(matches!(err, ApplicationError::Domain(DomainError::Validation(_))));
    }

    let session = container.store.load().unwrap().session;
    assert!(session.active);
    assert_eq!(session.diff.len(), 1);
    assert!(session.diff.added.contains_key(&name("user:/x")));
}
