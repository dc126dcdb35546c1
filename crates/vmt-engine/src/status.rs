//! Workload status reconciliation
//!
//! Keeps `status.instancetypeRef` and `status.preferenceRef` in step with the
//! references in the workload spec and captures a snapshot for each one.
//!
//! # Core Concepts
//!
//! - [`sync_status_ref`]: mirror a reference into its status ref, dropping the
//!   captured snapshot when the reference now points elsewhere
//! - [`StatusReconciler::store`]: capture missing snapshots and persist every
//!   changed status ref in one guarded patch
//! - [`StatusReconciler::clear`]: drop status refs whose reference is gone

use crate::conflict::ConflictDetector;
use crate::error::{to_value, EngineResult};
use crate::resolve::SpecResolver;
use crate::slot::TemplateSlot;
use crate::snapshot::SnapshotStore;
use std::sync::Arc;
use vmt_api::{
    ObjectKey, Patch, SnapshotRef, StatusRef, Template, TemplateReference, Workload,
    WorkloadStatus,
};
use vmt_store::ObjectStore;

/// Mirror `reference` into `status`
///
/// Returns `true` when the captured snapshot was dropped because the name,
/// kind or volume source changed. The failure policy is copied without
/// invalidating. An explicit revision name always becomes the snapshot ref.
pub fn sync_status_ref(reference: &TemplateReference, status: &mut StatusRef) -> bool {
    let mut invalidated = false;
    if status.name != reference.name
        || status.kind != reference.kind
        || status.infer_from_volume != reference.infer_from_volume
    {
        status.name.clone_from(&reference.name);
        status.kind.clone_from(&reference.kind);
        status.infer_from_volume.clone_from(&reference.infer_from_volume);
        invalidated = status.snapshot_ref.take().is_some();
    }
    status.infer_from_volume_failure_policy = reference.infer_from_volume_failure_policy;

    if let Some(revision) = &reference.revision_name {
        status.snapshot_ref = Some(SnapshotRef::new(revision.as_str()));
    }
    invalidated
}

/// Guarded patch moving `old` status refs to `new`
///
/// Each changed slot is asserted at its old value before being replaced.
/// Adding a slot asserts the whole old status, so a ref written concurrently
/// is never overwritten.
///
/// # Errors
/// Returns [`crate::EngineError::Decode`] when a status ref cannot be encoded.
pub fn status_patch(old: &WorkloadStatus, new: &WorkloadStatus) -> EngineResult<Patch> {
    let mut patch = Patch::new();
    let adds = TemplateSlot::ALL
        .iter()
        .any(|slot| slot.status_ref(old).is_none() && slot.status_ref(new).is_some());
    if adds {
        patch = patch.test("/status", to_value(old)?);
    }
    for slot in TemplateSlot::ALL {
        let (before, after) = (slot.status_ref(old), slot.status_ref(new));
        if before == after {
            continue;
        }
        let path = slot.status_path();
        patch = match (before, after) {
            (None, Some(after)) => patch.add(path, to_value(after)?),
            (Some(before), Some(after)) => patch
                .test(path, to_value(before)?)
                .replace(path, to_value(after)?),
            (Some(before), None) => patch.test(path, to_value(before)?).remove(path),
            (None, None) => patch,
        };
    }
    Ok(patch)
}

/// Reconciles workload status refs against their references
#[derive(Clone)]
pub struct StatusReconciler {
    store: Arc<dyn ObjectStore>,
    snapshots: SnapshotStore,
    resolver: SpecResolver,
    detector: ConflictDetector,
}

impl StatusReconciler {
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        snapshots: SnapshotStore,
        resolver: SpecResolver,
        detector: ConflictDetector,
    ) -> Self {
        Self {
            store,
            snapshots,
            resolver,
            detector,
        }
    }

    /// Sync one status ref and register ownership of a pinned revision
    ///
    /// # Errors
    /// Returns [`crate::EngineError::NotFound`] when the pinned revision does
    /// not exist, or the store error.
    pub async fn sync_status_with_matcher(
        &self,
        workload: &Workload,
        reference: &TemplateReference,
        status: &mut StatusRef,
    ) -> EngineResult<()> {
        if sync_status_ref(reference, status) {
            tracing::info!(
                namespace = workload.namespace(),
                name = %workload.metadata.name,
                reference = %reference.name,
                "reference changed, dropping captured snapshot"
            );
        }
        if let Some(revision) = &reference.revision_name {
            let key = ObjectKey::namespaced(workload.namespace(), revision.as_str());
            self.snapshots.add_owner(&key, workload.owner_reference()).await?;
        }
        Ok(())
    }

    /// Capture snapshots for both references and persist changed status refs
    ///
    /// Returns the workload as stored afterwards.
    ///
    /// # Errors
    /// - conflicts between the instance type and the workload
    /// - unmet preference requirements
    /// - resolution, snapshot and store errors; a concurrent status write
    ///   surfaces as a retryable store conflict
    pub async fn store(&self, workload: &Workload) -> EngineResult<Workload> {
        let mut status = workload.status.clone();

        for slot in TemplateSlot::ALL {
            let Some(reference) = slot.reference(workload) else {
                continue;
            };
            let mut status_ref = slot.status_ref(&status).cloned().unwrap_or_default();
            self.sync_status_with_matcher(workload, reference, &mut status_ref)
                .await?;

            if status_ref.snapshot_ref.is_none() {
                let template = self
                    .resolver
                    .live(slot, workload.namespace(), reference)
                    .await?;
                self.check(slot, workload, &template).await?;
                let snapshot_ref = self.snapshots.create_or_verify(workload, &template).await?;
                tracing::debug!(
                    namespace = workload.namespace(),
                    name = %workload.metadata.name,
                    snapshot = %snapshot_ref.name,
                    "captured snapshot"
                );
                status_ref.snapshot_ref = Some(snapshot_ref);
            }
            *slot.status_ref_mut(&mut status) = Some(status_ref);
        }

        self.persist(workload, &status).await
    }

    /// Remove status refs whose reference was removed
    ///
    /// # Errors
    /// Returns the store error; a concurrent status write surfaces as a
    /// retryable store conflict.
    pub async fn clear(&self, workload: &Workload) -> EngineResult<Workload> {
        let mut status = workload.status.clone();
        for slot in TemplateSlot::ALL {
            if slot.reference(workload).is_none() {
                slot.status_ref_mut(&mut status).take();
            }
        }
        self.persist(workload, &status).await
    }

    async fn persist(&self, workload: &Workload, status: &WorkloadStatus) -> EngineResult<Workload> {
        if *status == workload.status {
            return Ok(workload.clone());
        }
        let patch = status_patch(&workload.status, status)?;
        let updated = self.store.patch_workload(&workload.key(), &patch).await?;
        tracing::debug!(
            namespace = workload.namespace(),
            name = %workload.metadata.name,
            operations = patch.len(),
            "patched workload status"
        );
        Ok(updated)
    }

    /// Gate a freshly resolved template against the current workload
    async fn check(
        &self,
        slot: TemplateSlot,
        workload: &Workload,
        template: &Template,
    ) -> EngineResult<()> {
        let spec = &workload.spec.template;
        match slot {
            TemplateSlot::Instancetype => {
                if let Some(instancetype) = template.instancetype_spec() {
                    self.detector
                        .detect(Some(instancetype), None, &spec.spec, &spec.metadata)
                        .into_result()?;
                }
            }
            TemplateSlot::Preference => {
                if let Some(preference) = template.preference_spec() {
                    let instancetype = self.resolver.resolve_instancetype(workload).await?;
                    self.detector
                        .check_requirements(instancetype.as_ref(), preference, &spec.spec)?;
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for StatusReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusReconciler")
            .field("snapshots", &self.snapshots)
            .finish_non_exhaustive()
    }
}
