//! Immutable template snapshots
//!
//! A snapshot name is a pure function of the template identity, so concurrent
//! writers race on the store's duplicate-create rejection instead of a lock.
//! The loser compares payloads and either joins as an owner or reports an
//! identity conflict.

use crate::compat::CompatibilityDecoder;
use crate::error::{EngineError, EngineResult};
use serde_json::Value;
use std::sync::Arc;
use vmt_api::{
    snapshot_labels, ObjectKey, ObjectMeta, OwnerReference, SchemaVersion, Snapshot, SnapshotRef,
    Template, Workload,
};
use vmt_store::{ObjectCache, ObjectStore, StoreError};

/// Deterministic snapshot name
///
/// `{namespace}-{templateName}-{version}-{templateUID}-{templateGeneration}`
#[must_use]
pub fn snapshot_name(namespace: &str, template: &ObjectMeta, version: SchemaVersion) -> String {
    format!(
        "{namespace}-{}-{}-{}-{}",
        template.name,
        version.as_str(),
        template.uid,
        template.generation
    )
}

/// Creates, verifies and cleans up snapshots
#[derive(Clone)]
pub struct SnapshotStore {
    store: Arc<dyn ObjectStore>,
    cache: ObjectCache,
    decoder: CompatibilityDecoder,
}

impl SnapshotStore {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, cache: ObjectCache, decoder: CompatibilityDecoder) -> Self {
        Self {
            store,
            cache,
            decoder,
        }
    }

    /// Build the canonical snapshot of `template` for `namespace`
    ///
    /// # Errors
    /// Returns [`EngineError::Decode`] if the template cannot be encoded.
    pub fn build(
        namespace: &str,
        owners: Vec<OwnerReference>,
        template: &Template,
    ) -> EngineResult<Snapshot> {
        let identity = template.metadata();
        let version = SchemaVersion::CANONICAL;
        let mut meta = ObjectMeta::named(snapshot_name(namespace, identity, version))
            .with_namespace(namespace);
        meta.labels = snapshot_labels(template.kind(), version, identity);
        meta.owner_references = owners;
        Ok(Snapshot::new(meta, CompatibilityDecoder::encode(template)?))
    }

    /// Snapshot `template` for `owner`, or join an identical existing one
    ///
    /// # Errors
    /// - [`EngineError::SnapshotIdentityConflict`] when a snapshot with the
    ///   same name holds a different spec
    /// - store and decode errors
    pub async fn create_or_verify(
        &self,
        owner: &Workload,
        template: &Template,
    ) -> EngineResult<SnapshotRef> {
        self.create_or_verify_in(owner.namespace(), vec![owner.owner_reference()], template)
            .await
    }

    /// [`SnapshotStore::create_or_verify`] with an explicit namespace and owner set
    ///
    /// # Errors
    /// See [`SnapshotStore::create_or_verify`].
    pub async fn create_or_verify_in(
        &self,
        namespace: &str,
        owners: Vec<OwnerReference>,
        template: &Template,
    ) -> EngineResult<SnapshotRef> {
        let snapshot = Self::build(namespace, owners, template)?;
        let key = snapshot.key();

        match self.store.create_snapshot(snapshot.clone()).await {
            Ok(created) => {
                tracing::info!(namespace, snapshot = %created.name(), "created snapshot");
                let reference = SnapshotRef::new(created.name());
                self.cache.insert_snapshot(created).await;
                Ok(reference)
            }
            Err(e) if e.is_already_exists() => {
                let existing = self.store.get_snapshot(&key).await?;
                if !self.compare(&existing.data, &snapshot.data)? {
                    return Err(EngineError::SnapshotIdentityConflict {
                        name: existing.name().to_string(),
                    });
                }
                for owner in snapshot.metadata.owner_references {
                    if !existing.metadata.has_owner(&owner.uid) {
                        self.store.add_snapshot_owner(&key, owner).await?;
                    }
                }
                self.cache.invalidate_snapshot(&key).await;
                tracing::debug!(namespace, snapshot = %existing.name(), "reusing existing snapshot");
                Ok(SnapshotRef::new(existing.name()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Compare the specs of two payloads after decoding both
    ///
    /// # Errors
    /// - [`EngineError::Decode`] if either payload does not decode
    /// - [`EngineError::KindMismatch`] if the kinds differ
    pub fn compare(&self, a: &Value, b: &Value) -> EngineResult<bool> {
        let (a, b) = (self.decoder.decode(a)?, self.decoder.decode(b)?);
        match (&a, &b) {
            (Template::Instancetype(x), Template::Instancetype(y))
            | (Template::ClusterInstancetype(x), Template::ClusterInstancetype(y)) => {
                Ok(x.spec == y.spec)
            }
            (Template::Preference(x), Template::Preference(y))
            | (Template::ClusterPreference(x), Template::ClusterPreference(y)) => {
                Ok(x.spec == y.spec)
            }
            _ => Err(EngineError::KindMismatch {
                expected: a.kind(),
                found: b.kind(),
            }),
        }
    }

    /// Read a snapshot through the cache
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] or the store error.
    pub async fn get(&self, key: &ObjectKey) -> EngineResult<Snapshot> {
        Ok(self.cache.get_snapshot(self.store.as_ref(), key).await?)
    }

    /// Read and decode a snapshot
    ///
    /// # Errors
    /// See [`SnapshotStore::get`]; also [`EngineError::Decode`].
    pub async fn load(&self, key: &ObjectKey) -> EngineResult<Template> {
        let snapshot = self.get(key).await?;
        Ok(self.decoder.decode(&snapshot.data)?)
    }

    /// Register `owner` on an existing snapshot; no-op when already present
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] or the store error.
    pub async fn add_owner(&self, key: &ObjectKey, owner: OwnerReference) -> EngineResult<()> {
        let snapshot = self.get(key).await?;
        if snapshot.metadata.has_owner(&owner.uid) {
            return Ok(());
        }
        self.store.add_snapshot_owner(key, owner).await?;
        self.cache.invalidate_snapshot(key).await;
        Ok(())
    }

    /// Best-effort removal of a superseded snapshot
    ///
    /// Deletes only when `owner_uid` is the sole owner; other owners may still
    /// point at it. Failures are logged. Returns whether it was deleted.
    pub async fn cleanup(&self, key: &ObjectKey, owner_uid: &str) -> bool {
        let result: Result<bool, StoreError> = async {
            let snapshot = self.store.get_snapshot(key).await?;
            if snapshot
                .metadata
                .owner_references
                .iter()
                .any(|o| o.uid != owner_uid)
            {
                return Ok(false);
            }
            self.store.delete_snapshot(key).await?;
            Ok(true)
        }
        .await;

        self.cache.invalidate_snapshot(key).await;
        match result {
            Ok(true) => {
                tracing::info!(snapshot = %key, "deleted superseded snapshot");
                true
            }
            Ok(false) => {
                tracing::debug!(snapshot = %key, "snapshot still shared, keeping it");
                false
            }
            Err(e) if e.is_not_found() => false,
            Err(e) => {
                tracing::warn!(snapshot = %key, error = %e, "failed to delete snapshot");
                false
            }
        }
    }
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("cache", &self.cache.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use vmt_api::instancetype::v1beta1::InstancetypeSpec;
    use vmt_api::instancetype::Object;
    use vmt_api::{Quantity, TemplateKind, LABEL_OBJECT_KIND, LABEL_OBJECT_VERSION};
    use vmt_store::{InMemoryStore, MockObjectStore, Operation, Resource};

    fn template(guest: u32, memory: &str) -> Template {
        Template::Instancetype(Object::new(
            SchemaVersion::CANONICAL,
            TemplateKind::Instancetype,
            ObjectMeta::named("T")
                .with_namespace("ns")
                .with_uid("u1")
                .with_generation(1),
            InstancetypeSpec::new(guest, Quantity::parse(memory).unwrap()),
        ))
    }

    fn snapshots(store: Arc<dyn ObjectStore>) -> SnapshotStore {
        SnapshotStore::new(store, ObjectCache::default(), CompatibilityDecoder::default())
    }

    #[test]
    fn build_strips_metadata_and_labels_identity() {
        let mut t = template(2, "128Mi");
        t.metadata_mut().labels.insert("team".into(), "x".into());
        let owner = Workload::new("ns", "w1", "wu1").owner_reference();
        let snapshot = SnapshotStore::build("ns", vec![owner], &t).unwrap();

        assert_eq!(snapshot.name(), "ns-T-v1beta1-u1-1");
        assert_eq!(snapshot.label(LABEL_OBJECT_VERSION), Some("v1beta1"));
        assert_eq!(snapshot.label(LABEL_OBJECT_KIND), Some("VirtualMachineInstancetype"));
        assert!(snapshot.data["metadata"].get("labels").is_none());
        assert_eq!(snapshot.metadata.owner_references.len(), 1);
    }

    #[tokio::test]
    async fn shared_snapshot_survives_cleanup() {
        let store = Arc::new(InMemoryStore::new());
        let snapshots = snapshots(store.clone());
        let t = template(2, "128Mi");

        let w1 = Workload::new("ns", "w1", "a");
        let w2 = Workload::new("ns", "w2", "b");
        let r = snapshots.create_or_verify(&w1, &t).await.unwrap();
        snapshots.create_or_verify(&w2, &t).await.unwrap();

        let key = ObjectKey::namespaced("ns", r.name);
        assert!(!snapshots.cleanup(&key, "a").await);
        assert_eq!(store.snapshot_count(), 1);
    }

    #[tokio::test]
    async fn cleanup_failure_is_swallowed() {
        let store = Arc::new(InMemoryStore::new());
        let snapshots = snapshots(store.clone());
        let w1 = Workload::new("ns", "w1", "a");
        let r = snapshots
            .create_or_verify(&w1, &template(2, "128Mi"))
            .await
            .unwrap();

        store.fail_on(Operation::DeleteSnapshot, "boom");
        let key = ObjectKey::namespaced("ns", r.name);
        assert!(!snapshots.cleanup(&key, "a").await);

        store.clear_failure(Operation::DeleteSnapshot);
        assert!(snapshots.cleanup(&key, "a").await);
        assert_eq!(store.snapshot_count(), 0);
    }

    #[tokio::test]
    async fn transient_create_error_propagates() {
        let mut store = MockObjectStore::new();
        store
            .expect_create_snapshot()
            .returning(|_| Err(StoreError::Internal("unavailable".into())));
        let snapshots = snapshots(Arc::new(store));

        let err = snapshots
            .create_or_verify(&Workload::new("ns", "w", "u"), &template(1, "64Mi"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn vanished_existing_snapshot_is_not_found() {
        let mut store = MockObjectStore::new();
        store.expect_create_snapshot().returning(|s| {
            Err(StoreError::already_exists(Resource::Snapshot, &s.key()))
        });
        store
            .expect_get_snapshot()
            .returning(|key| Err(StoreError::not_found(Resource::Snapshot, key)));
        let snapshots = snapshots(Arc::new(store));

        let err = snapshots
            .create_or_verify(&Workload::new("ns", "w", "u"), &template(1, "64Mi"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn compare_by_value_and_kind() {
        let snapshots = snapshots(Arc::new(InMemoryStore::new()));
        let a = CompatibilityDecoder::encode(&template(2, "1Gi")).unwrap();
        let b = CompatibilityDecoder::encode(&template(2, "1024Mi")).unwrap();
        let c = CompatibilityDecoder::encode(&template(4, "1Gi")).unwrap();
        assert!(snapshots.compare(&a, &b).unwrap());
        assert!(!snapshots.compare(&a, &c).unwrap());

        let cluster = template(2, "1Gi")
            .into_kind(TemplateKind::ClusterInstancetype)
            .unwrap();
        let d = CompatibilityDecoder::encode(&cluster).unwrap();
        assert!(matches!(
            snapshots.compare(&a, &d),
            Err(EngineError::KindMismatch { .. })
        ));
    }

    proptest! {
        #[test]
        fn name_is_a_pure_function(
            ns in "[a-z]{1,8}",
            name in "[a-z]{1,8}",
            uid in "[a-f0-9]{4,12}",
            generation in 0i64..1000,
        ) {
            let meta = ObjectMeta::named(&name).with_uid(&uid).with_generation(generation);
            let first = snapshot_name(&ns, &meta, SchemaVersion::CANONICAL);
            let second = snapshot_name(&ns, &meta.clone(), SchemaVersion::CANONICAL);
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first, format!("{ns}-{name}-v1beta1-{uid}-{generation}"));
        }
    }
}
