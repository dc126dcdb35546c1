use pretty_assertions::assert_eq;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use vmt_api::{
    ObjectKey, Phase, SchemaVersion, SnapshotRef, StatusRef, TemplateKind, UpgradeRequest,
    Workload, LABEL_OBJECT_KIND, LABEL_OBJECT_VERSION,
};
use vmt_api::instancetype::v1beta1::PreferredCpuTopology;
use vmt_engine::{CompatibilityDecoder, Controller, EngineConfig, Outcome, WorkQueue};
use vmt_store::{InMemoryStore, ObjectStore, Operation};
use vmt_test_utils::{
    identity, instancetype, instancetype_envelope, legacy_object, preference,
    preference_envelope, reference, snapshot_key, stored_snapshot, workload, NAMESPACE,
};

const OLD: &str = "ns-T-legacy";
const NEW: &str = "ns-T-v1beta1-T-uid-1";

fn controller(store: &Arc<InMemoryStore>) -> Controller {
    Controller::new(store.clone(), EngineConfig::default()).unwrap()
}

/// Workload `w` pointing at `OLD` through the slot of `kind`
fn pointing_workload(kind: TemplateKind) -> Workload {
    let status = Some(StatusRef {
        name: "T".into(),
        kind: kind.singular().into(),
        snapshot_ref: Some(SnapshotRef::new(OLD)),
        ..StatusRef::default()
    });
    let w = workload("w");
    match kind.family() {
        vmt_api::Family::Instancetype => {
            let mut w = w.with_instancetype(reference(kind, "T"));
            w.status.instancetype_ref = status;
            w
        }
        vmt_api::Family::Preference => {
            let mut w = w.with_preference(reference(kind, "T"));
            w.status.preference_ref = status;
            w
        }
    }
}

async fn assert_inline_upgrade(kind: TemplateKind, version: Option<SchemaVersion>, data: Value) {
    let store = Arc::new(InMemoryStore::new());
    let w = pointing_workload(kind);
    store
        .create_snapshot(stored_snapshot(
            OLD,
            kind,
            version,
            &identity("T"),
            data,
            vec![w.owner_reference()],
        ))
        .await
        .unwrap();
    let w = store.put_workload(w).await.unwrap();

    let updated = controller(&store).upgrader().upgrade(&w).await.unwrap();

    let status = match kind.family() {
        vmt_api::Family::Instancetype => updated.status.instancetype_ref.as_ref(),
        vmt_api::Family::Preference => updated.status.preference_ref.as_ref(),
    };
    assert_eq!(status.and_then(StatusRef::snapshot_name), Some(NEW), "{kind} {version:?}");
    assert!(store.get_snapshot(&snapshot_key(OLD)).await.unwrap_err().is_not_found());

    let successor = store.get_snapshot(&snapshot_key(NEW)).await.unwrap();
    assert_eq!(successor.label(LABEL_OBJECT_KIND), Some(kind.as_str()));
    assert_eq!(successor.label(LABEL_OBJECT_VERSION), Some("v1beta1"));
    assert!(successor.metadata.has_owner(&w.metadata.uid));
}

#[tokio::test]
async fn inline_upgrade_of_envelopes() {
    for version in ["", "instancetype.vmt.io/v1alpha1"] {
        assert_inline_upgrade(
            TemplateKind::Instancetype,
            Some(SchemaVersion::V1alpha1),
            instancetype_envelope(version),
        )
        .await;
        assert_inline_upgrade(
            TemplateKind::Preference,
            Some(SchemaVersion::V1alpha1),
            preference_envelope(version, "preferCores"),
        )
        .await;
    }
}

#[tokio::test]
async fn inline_upgrade_rescopes_envelope_from_kind_label() {
    assert_inline_upgrade(
        TemplateKind::ClusterPreference,
        Some(SchemaVersion::V1alpha1),
        preference_envelope("", "preferSockets"),
    )
    .await;
}

#[tokio::test]
async fn inline_upgrade_of_legacy_objects() {
    for version in [SchemaVersion::V1alpha1, SchemaVersion::V1alpha2] {
        for kind in TemplateKind::ALL {
            assert_inline_upgrade(kind, Some(version), legacy_object(version, kind, "T")).await;
        }
    }
}

#[tokio::test]
async fn inline_upgrade_of_unlabelled_canonical_payload() {
    let it = instancetype(TemplateKind::ClusterInstancetype, "T", 2, "128Mi");
    assert_inline_upgrade(
        TemplateKind::ClusterInstancetype,
        None,
        CompatibilityDecoder::encode(&it).unwrap(),
    )
    .await;

    let pref = preference(TemplateKind::Preference, "T", PreferredCpuTopology::Spread);
    assert_inline_upgrade(
        TemplateKind::Preference,
        None,
        CompatibilityDecoder::encode(&pref).unwrap(),
    )
    .await;
}

#[tokio::test]
async fn canonical_snapshot_is_untouched() {
    let store = Arc::new(InMemoryStore::new());
    let controller = controller(&store);
    let template = instancetype(TemplateKind::Instancetype, "T", 2, "128Mi");
    let w = workload("w").with_instancetype(reference(TemplateKind::Instancetype, "T"));

    let captured = controller
        .snapshots()
        .create_or_verify(&w, &template)
        .await
        .unwrap();
    let mut w = w;
    w.status.instancetype_ref = Some(StatusRef {
        name: "T".into(),
        kind: "virtualmachineinstancetype".into(),
        snapshot_ref: Some(captured.clone()),
        ..StatusRef::default()
    });
    let w = store.put_workload(w).await.unwrap();

    let after = controller.upgrader().upgrade(&w).await.unwrap();
    assert_eq!(after, w);
    assert!(store.get_snapshot(&snapshot_key(&captured.name)).await.is_ok());
    assert_eq!(store.snapshot_count(), 1);
}

#[tokio::test]
async fn pinned_revision_follows_upgrade() {
    let store = Arc::new(InMemoryStore::new());
    let mut w = pointing_workload(TemplateKind::Instancetype);
    w.spec.instancetype = Some(reference(TemplateKind::Instancetype, "T").with_revision(OLD));
    store
        .create_snapshot(stored_snapshot(
            OLD,
            TemplateKind::Instancetype,
            Some(SchemaVersion::V1alpha1),
            &identity("T"),
            instancetype_envelope(""),
            vec![],
        ))
        .await
        .unwrap();
    let w = store.put_workload(w).await.unwrap();

    let updated = controller(&store).upgrader().upgrade(&w).await.unwrap();
    let pinned = updated.spec.instancetype.and_then(|r| r.revision_name);
    assert_eq!(pinned.as_deref(), Some(NEW));
}

/// Store holding `w` and the legacy instance type snapshot it alone owns
async fn owned_legacy_store() -> (Arc<InMemoryStore>, Workload) {
    let store = Arc::new(InMemoryStore::new());
    let w = pointing_workload(TemplateKind::Instancetype);
    store
        .create_snapshot(stored_snapshot(
            OLD,
            TemplateKind::Instancetype,
            Some(SchemaVersion::V1alpha1),
            &identity("T"),
            instancetype_envelope(""),
            vec![w.owner_reference()],
        ))
        .await
        .unwrap();
    let w = store.put_workload(w).await.unwrap();
    (store, w)
}

#[tokio::test]
async fn concurrent_repoint_is_a_retryable_conflict() {
    let (store, stale) = owned_legacy_store().await;

    let mut current = stale.clone();
    if let Some(status) = current.status.instancetype_ref.as_mut() {
        status.snapshot_ref = Some(SnapshotRef::new("written-by-other-replica"));
    }
    store.put_workload(current).await.unwrap();

    let err = controller(&store).upgrader().upgrade(&stale).await.unwrap_err();
    assert!(err.is_retryable(), "{err}");

    let persisted = store.get_workload(&stale.key()).await.unwrap();
    assert_eq!(
        persisted
            .status
            .instancetype_ref
            .as_ref()
            .and_then(StatusRef::snapshot_name),
        Some("written-by-other-replica")
    );
    // Nothing is cleaned up when the repoint loses
    assert!(store.get_snapshot(&snapshot_key(OLD)).await.is_ok());
}

#[tokio::test]
async fn failed_cleanup_does_not_fail_the_upgrade() {
    let (store, w) = owned_legacy_store().await;
    store.fail_on(Operation::DeleteSnapshot, "unavailable");

    let updated = controller(&store).upgrader().upgrade(&w).await.unwrap();
    assert_eq!(
        updated
            .status
            .instancetype_ref
            .as_ref()
            .and_then(StatusRef::snapshot_name),
        Some(NEW)
    );
    assert!(store.get_snapshot(&snapshot_key(NEW)).await.is_ok());

    store.clear_failure(Operation::DeleteSnapshot);
    assert!(store.get_snapshot(&snapshot_key(OLD)).await.is_ok());
}

#[tokio::test]
async fn upgrade_one_is_idempotent() {
    let store = Arc::new(InMemoryStore::new());
    store
        .create_snapshot(stored_snapshot(
            OLD,
            TemplateKind::Instancetype,
            Some(SchemaVersion::V1alpha2),
            &identity("T"),
            legacy_object(SchemaVersion::V1alpha2, TemplateKind::Instancetype, "T"),
            vec![],
        ))
        .await
        .unwrap();
    let upgrader = controller(&store).upgrader().clone();

    let successor = upgrader.upgrade_one(&snapshot_key(OLD)).await.unwrap().unwrap();
    assert_eq!(successor.name, NEW);
    assert_eq!(upgrader.upgrade_one(&snapshot_key(NEW)).await.unwrap(), None);
    // Re-running on the legacy snapshot verifies the existing successor
    assert_eq!(
        upgrader.upgrade_one(&snapshot_key(OLD)).await.unwrap(),
        Some(successor)
    );
    assert_eq!(store.snapshot_count(), 2);
}

async fn legacy_store() -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    store
        .create_snapshot(stored_snapshot(
            OLD,
            TemplateKind::Preference,
            Some(SchemaVersion::V1alpha1),
            &identity("T"),
            preference_envelope("", "preferSockets"),
            vec![],
        ))
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn request_state_machine() {
    let store = legacy_store().await;
    let controller = controller(&store);
    let key = store
        .create_upgrade_request(UpgradeRequest::new(NAMESPACE, "r", OLD))
        .await
        .unwrap()
        .key();

    // First pass only marks the request running
    assert_eq!(controller.execute(&key).await.unwrap(), Outcome::Requeue);
    assert_eq!(store.snapshot_count(), 1);
    assert_eq!(
        store.get_upgrade_request(&key).await.unwrap().status.phase,
        Phase::Running
    );

    assert_eq!(
        controller.execute(&key).await.unwrap(),
        Outcome::Completed(Phase::Succeeded)
    );
    let done = store.get_upgrade_request(&key).await.unwrap();
    assert_eq!(done.status.result.map(|r| r.new_name), Some(NEW.to_string()));

    assert_eq!(
        controller.execute(&key).await.unwrap(),
        Outcome::Terminal(Phase::Succeeded)
    );
    // The legacy snapshot is left for its owners to repoint
    assert!(store.get_snapshot(&snapshot_key(OLD)).await.is_ok());
}

#[tokio::test]
async fn failed_request_is_never_retried() {
    let store = Arc::new(InMemoryStore::new());
    let controller = controller(&store);
    let key = store
        .create_upgrade_request(UpgradeRequest::new(NAMESPACE, "r", OLD))
        .await
        .unwrap()
        .key();

    controller.execute(&key).await.unwrap();
    assert_eq!(
        controller.execute(&key).await.unwrap(),
        Outcome::Completed(Phase::Failed)
    );

    // Target appears later; the request stays failed
    store
        .create_snapshot(stored_snapshot(
            OLD,
            TemplateKind::Instancetype,
            Some(SchemaVersion::V1alpha1),
            &identity("T"),
            instancetype_envelope(""),
            vec![],
        ))
        .await
        .unwrap();
    assert_eq!(
        controller.execute(&key).await.unwrap(),
        Outcome::Terminal(Phase::Failed)
    );
    assert_eq!(store.snapshot_count(), 1);
}

#[tokio::test]
async fn worker_pool_migrates_every_legacy_snapshot() {
    let store = Arc::new(InMemoryStore::new());
    for name in ["a", "b", "c"] {
        store
            .create_snapshot(stored_snapshot(
                &format!("ns-{name}-legacy"),
                TemplateKind::Instancetype,
                Some(SchemaVersion::V1alpha1),
                &identity(name),
                legacy_object(SchemaVersion::V1alpha1, TemplateKind::Instancetype, name),
                vec![],
            ))
            .await
            .unwrap();
    }
    let controller = controller(&store);
    let keys = controller.request_upgrades(None).await.unwrap();
    assert_eq!(keys.len(), 3);

    let pool = controller.upgrade_controller();
    pool.start();
    for key in &keys {
        pool.enqueue(key.clone());
    }
    for key in &keys {
        let mut phase = Phase::Unset;
        for _ in 0..200 {
            phase = store.get_upgrade_request(key).await.unwrap().status.phase;
            if phase.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(phase, Phase::Succeeded, "{key}");
    }
    pool.shutdown().await;
    assert_eq!(pool.stats().succeeded, 3);

    for name in ["a", "b", "c"] {
        let successor = ObjectKey::namespaced(NAMESPACE, format!("ns-{name}-v1beta1-{name}-uid-1"));
        assert!(store.get_snapshot(&successor).await.is_ok());
    }

    // Canonical successors are skipped and existing requests reused
    let again = controller.request_upgrades(None).await.unwrap();
    assert_eq!(again, keys);
    assert_eq!(store.list_upgrade_requests(None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn queue_delivers_once_and_redelivers_after_done() {
    let queue = Arc::new(WorkQueue::new(
        Duration::from_millis(1),
        Duration::from_millis(10),
    ));
    queue.add(snapshot_key("x"));
    queue.add(snapshot_key("x"));
    assert_eq!(queue.len(), 1);

    let item = queue.get().await.unwrap();
    queue.add(item.clone());
    assert!(queue.is_empty());
    queue.done(&item);
    assert_eq!(queue.get().await, Some(item));
}
