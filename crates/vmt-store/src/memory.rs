//! In-memory [`ObjectStore`]
//!
//! Backed by one `DashMap` per resource. Creates reject duplicates under the
//! shard lock, patches are applied to a copy and swapped in, and every write
//! bumps a global resource version and emits a [`StoreEvent`].
//!
//! Failures can be injected per [`Operation`] to exercise error paths.

use crate::error::{Resource, StoreError, StoreResult};
use crate::store::ObjectStore;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use vmt_api::{
    ObjectKey, OwnerReference, Patch, Snapshot, Template, TemplateKind, UpgradeRequest,
    UpgradeRequestStatus, Workload,
};

/// Store operations, used to target injected failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetTemplate,
    PutTemplate,
    CreateSnapshot,
    GetSnapshot,
    ListSnapshots,
    DeleteSnapshot,
    AddSnapshotOwner,
    GetWorkload,
    PutWorkload,
    PatchWorkload,
    CreateUpgradeRequest,
    GetUpgradeRequest,
    ListUpgradeRequests,
    UpdateUpgradeRequestStatus,
}

/// Change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Added(Resource, ObjectKey),
    Modified(Resource, ObjectKey),
    Deleted(Resource, ObjectKey),
}

impl StoreEvent {
    #[inline]
    #[must_use]
    pub fn resource(&self) -> Resource {
        match self {
            Self::Added(r, _) | Self::Modified(r, _) | Self::Deleted(r, _) => *r,
        }
    }

    #[inline]
    #[must_use]
    pub fn key(&self) -> &ObjectKey {
        match self {
            Self::Added(_, k) | Self::Modified(_, k) | Self::Deleted(_, k) => k,
        }
    }
}

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug)]
pub struct InMemoryStore {
    templates: DashMap<(TemplateKind, ObjectKey), Template>,
    snapshots: DashMap<ObjectKey, Snapshot>,
    workloads: DashMap<ObjectKey, Workload>,
    upgrade_requests: DashMap<ObjectKey, UpgradeRequest>,
    resource_version: AtomicU64,
    failures: DashMap<Operation, String>,
    events: broadcast::Sender<StoreEvent>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            templates: DashMap::new(),
            snapshots: DashMap::new(),
            workloads: DashMap::new(),
            upgrade_requests: DashMap::new(),
            resource_version: AtomicU64::new(0),
            failures: DashMap::new(),
            events,
        }
    }

    /// Subscribe to change notifications
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Make every call of `op` fail with an internal error
    pub fn fail_on(&self, op: Operation, message: impl Into<String>) {
        self.failures.insert(op, message.into());
    }

    /// Stop failing `op`
    pub fn clear_failure(&self, op: Operation) {
        self.failures.remove(&op);
    }

    #[inline]
    #[must_use]
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    fn check(&self, op: Operation) -> StoreResult<()> {
        match self.failures.get(&op) {
            Some(message) => Err(StoreError::Internal(message.clone())),
            None => Ok(()),
        }
    }

    fn next_version(&self) -> u64 {
        self.resource_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn template_key(kind: TemplateKind, template: &Template) -> (TemplateKind, ObjectKey) {
        let mut key = template.metadata().key();
        if kind.is_cluster_scoped() {
            key.namespace = None;
        }
        (kind, key)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get_template(&self, kind: TemplateKind, key: &ObjectKey) -> StoreResult<Template> {
        self.check(Operation::GetTemplate)?;
        self.templates
            .get(&(kind, key.clone()))
            .map(|t| t.clone())
            .ok_or_else(|| StoreError::not_found(Resource::Template, key))
    }

    async fn put_template(&self, mut template: Template) -> StoreResult<Template> {
        self.check(Operation::PutTemplate)?;
        let (kind, key) = Self::template_key(template.kind(), &template);
        let meta = template.metadata_mut();
        if meta.uid.is_empty() {
            meta.uid = uuid::Uuid::new_v4().to_string();
        }
        meta.generation = meta.generation.max(1);
        meta.resource_version = self.next_version();

        let existed = self.templates.insert((kind, key.clone()), template.clone()).is_some();
        self.emit(if existed {
            StoreEvent::Modified(Resource::Template, key)
        } else {
            StoreEvent::Added(Resource::Template, key)
        });
        Ok(template)
    }

    async fn create_snapshot(&self, mut snapshot: Snapshot) -> StoreResult<Snapshot> {
        self.check(Operation::CreateSnapshot)?;
        let key = snapshot.key();
        match self.snapshots.entry(key.clone()) {
            Entry::Occupied(_) => return Err(StoreError::already_exists(Resource::Snapshot, &key)),
            Entry::Vacant(slot) => {
                if snapshot.metadata.uid.is_empty() {
                    snapshot.metadata.uid = uuid::Uuid::new_v4().to_string();
                }
                snapshot.metadata.resource_version = self.next_version();
                slot.insert(snapshot.clone());
            }
        }
        tracing::debug!(snapshot = %key, "snapshot created");
        self.emit(StoreEvent::Added(Resource::Snapshot, key));
        Ok(snapshot)
    }

    async fn get_snapshot(&self, key: &ObjectKey) -> StoreResult<Snapshot> {
        self.check(Operation::GetSnapshot)?;
        self.snapshots
            .get(key)
            .map(|s| s.clone())
            .ok_or_else(|| StoreError::not_found(Resource::Snapshot, key))
    }

    async fn list_snapshots(&self, namespace: Option<String>) -> StoreResult<Vec<Snapshot>> {
        self.check(Operation::ListSnapshots)?;
        let mut out: Vec<Snapshot> = self
            .snapshots
            .iter()
            .filter(|e| namespace.is_none() || e.key().namespace == namespace)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(out)
    }

    async fn delete_snapshot(&self, key: &ObjectKey) -> StoreResult<()> {
        self.check(Operation::DeleteSnapshot)?;
        self.snapshots
            .remove(key)
            .ok_or_else(|| StoreError::not_found(Resource::Snapshot, key))?;
        self.emit(StoreEvent::Deleted(Resource::Snapshot, key.clone()));
        Ok(())
    }

    async fn add_snapshot_owner(
        &self,
        key: &ObjectKey,
        owner: OwnerReference,
    ) -> StoreResult<Snapshot> {
        self.check(Operation::AddSnapshotOwner)?;
        let mut entry = self
            .snapshots
            .get_mut(key)
            .ok_or_else(|| StoreError::not_found(Resource::Snapshot, key))?;
        if entry.metadata.has_owner(&owner.uid) {
            return Ok(entry.clone());
        }
        entry.metadata.owner_references.push(owner);
        entry.metadata.resource_version = self.next_version();
        let updated = entry.clone();
        drop(entry);
        self.emit(StoreEvent::Modified(Resource::Snapshot, key.clone()));
        Ok(updated)
    }

    async fn get_workload(&self, key: &ObjectKey) -> StoreResult<Workload> {
        self.check(Operation::GetWorkload)?;
        self.workloads
            .get(key)
            .map(|w| w.clone())
            .ok_or_else(|| StoreError::not_found(Resource::Workload, key))
    }

    async fn put_workload(&self, mut workload: Workload) -> StoreResult<Workload> {
        self.check(Operation::PutWorkload)?;
        let key = workload.key();
        if workload.metadata.uid.is_empty() {
            workload.metadata.uid = uuid::Uuid::new_v4().to_string();
        }
        workload.metadata.resource_version = self.next_version();
        let existed = self.workloads.insert(key.clone(), workload.clone()).is_some();
        self.emit(if existed {
            StoreEvent::Modified(Resource::Workload, key)
        } else {
            StoreEvent::Added(Resource::Workload, key)
        });
        Ok(workload)
    }

    async fn patch_workload(&self, key: &ObjectKey, patch: &Patch) -> StoreResult<Workload> {
        self.check(Operation::PatchWorkload)?;
        let mut entry = self
            .workloads
            .get_mut(key)
            .ok_or_else(|| StoreError::not_found(Resource::Workload, key))?;

        let mut doc = serde_json::to_value(&*entry)
            .map_err(|e| StoreError::Internal(format!("encode workload {key}: {e}")))?;
        let operations = patch.to_json_patch().map_err(|e| StoreError::Invalid {
            resource: Resource::Workload,
            key: key.clone(),
            message: e.to_string(),
        })?;
        json_patch::patch(&mut doc, &operations)
            .map_err(|e| StoreError::from_patch(Resource::Workload, key, &e))?;
        let mut updated: Workload = serde_json::from_value(doc).map_err(|e| StoreError::Invalid {
            resource: Resource::Workload,
            key: key.clone(),
            message: e.to_string(),
        })?;
        updated.metadata.resource_version = self.next_version();
        *entry = updated.clone();
        drop(entry);

        self.emit(StoreEvent::Modified(Resource::Workload, key.clone()));
        Ok(updated)
    }

    async fn create_upgrade_request(&self, mut request: UpgradeRequest) -> StoreResult<UpgradeRequest> {
        self.check(Operation::CreateUpgradeRequest)?;
        let key = request.key();
        match self.upgrade_requests.entry(key.clone()) {
            Entry::Occupied(_) => {
                return Err(StoreError::already_exists(Resource::UpgradeRequest, &key))
            }
            Entry::Vacant(slot) => {
                if request.metadata.uid.is_empty() {
                    request.metadata.uid = uuid::Uuid::new_v4().to_string();
                }
                request.metadata.resource_version = self.next_version();
                slot.insert(request.clone());
            }
        }
        self.emit(StoreEvent::Added(Resource::UpgradeRequest, key));
        Ok(request)
    }

    async fn get_upgrade_request(&self, key: &ObjectKey) -> StoreResult<UpgradeRequest> {
        self.check(Operation::GetUpgradeRequest)?;
        self.upgrade_requests
            .get(key)
            .map(|r| r.clone())
            .ok_or_else(|| StoreError::not_found(Resource::UpgradeRequest, key))
    }

    async fn list_upgrade_requests(
        &self,
        namespace: Option<String>,
    ) -> StoreResult<Vec<UpgradeRequest>> {
        self.check(Operation::ListUpgradeRequests)?;
        let mut out: Vec<UpgradeRequest> = self
            .upgrade_requests
            .iter()
            .filter(|e| namespace.is_none() || e.key().namespace == namespace)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(out)
    }

    async fn update_upgrade_request_status(
        &self,
        key: &ObjectKey,
        status: UpgradeRequestStatus,
    ) -> StoreResult<UpgradeRequest> {
        self.check(Operation::UpdateUpgradeRequestStatus)?;
        let mut entry = self
            .upgrade_requests
            .get_mut(key)
            .ok_or_else(|| StoreError::not_found(Resource::UpgradeRequest, key))?;
        entry.status = status;
        entry.metadata.resource_version = self.next_version();
        let updated = entry.clone();
        drop(entry);
        self.emit(StoreEvent::Modified(Resource::UpgradeRequest, key.clone()));
        Ok(updated)
    }
}
