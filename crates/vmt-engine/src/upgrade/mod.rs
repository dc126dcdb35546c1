//! Snapshot upgrades
//!
//! Legacy snapshots are never rewritten. Upgrading decodes the old payload,
//! freezes the canonical result into a new snapshot and repoints references.
//!
//! # Core Concepts
//!
//! - [`Upgrader::upgrade_one`]: migrate a single snapshot
//! - [`Upgrader::upgrade`]: inline mode, repoint one workload with a guarded patch
//! - [`RequestExecutor`]: one step of the [`vmt_api::Phase`] state machine
//! - [`WorkQueue`] and [`UpgradeController`]: async mode worker pool
//!
//! # Example
//!
//! ```rust,ignore
//! let controller = UpgradeController::new(executor, &config);
//! controller.start();
//! controller.enqueue(request.key());
//! ```

mod queue;
mod request;
mod worker;

pub use queue::WorkQueue;
pub use request::{Outcome, RequestExecutor};
pub use vmt_api::TransitionError;
pub use worker::{ControllerStats, UpgradeController};

use crate::compat::CompatibilityDecoder;
use crate::error::{EngineError, EngineResult};
use crate::slot::TemplateSlot;
use crate::snapshot::SnapshotStore;
use serde_json::json;
use std::sync::Arc;
use vmt_api::{
    ObjectKey, Patch, Snapshot, SnapshotRef, Template, Workload, LABEL_OBJECT_GENERATION,
    LABEL_OBJECT_NAME, LABEL_OBJECT_UID,
};
use vmt_store::ObjectStore;

/// Migrates snapshots to the canonical version
#[derive(Clone)]
pub struct Upgrader {
    store: Arc<dyn ObjectStore>,
    snapshots: SnapshotStore,
    decoder: CompatibilityDecoder,
}

impl Upgrader {
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        snapshots: SnapshotStore,
        decoder: CompatibilityDecoder,
    ) -> Self {
        Self {
            store,
            snapshots,
            decoder,
        }
    }

    /// Create the canonical successor of a snapshot
    ///
    /// Returns `None` when the snapshot is already canonical or its successor
    /// would carry the same name. The old snapshot is left in place.
    ///
    /// # Errors
    /// - [`EngineError::NotFound`] for a missing snapshot
    /// - [`EngineError::Decode`] for an unreadable payload
    /// - [`EngineError::KindMismatch`] when the payload contradicts the kind label
    pub async fn upgrade_one(&self, key: &ObjectKey) -> EngineResult<Option<SnapshotRef>> {
        let old = self.snapshots.get(key).await?;
        if old.is_canonical() {
            tracing::debug!(snapshot = %key, "snapshot already canonical");
            return Ok(None);
        }

        let template = self.canonical_template(&old)?;
        let namespace = old.metadata.namespace.clone().unwrap_or_default();
        let owners = old.metadata.owner_references.clone();
        let successor = SnapshotStore::build(&namespace, owners.clone(), &template)?;
        if successor.name() == old.name() {
            tracing::debug!(snapshot = %key, "successor has the same name");
            return Ok(None);
        }

        let new_ref = self
            .snapshots
            .create_or_verify_in(&namespace, owners, &template)
            .await?;
        tracing::info!(
            namespace,
            snapshot = %old.name(),
            successor = %new_ref.name,
            "upgraded snapshot"
        );
        Ok(Some(new_ref))
    }

    /// Decode a stored snapshot, restoring identity and scope from its labels
    fn canonical_template(&self, old: &Snapshot) -> EngineResult<Template> {
        let mut template = self.decoder.decode(&old.data)?;

        let meta = template.metadata_mut();
        if meta.name.is_empty() {
            meta.name = old.label(LABEL_OBJECT_NAME).unwrap_or(old.name()).to_string();
        }
        if meta.uid.is_empty() {
            meta.uid = old.label(LABEL_OBJECT_UID).unwrap_or_default().to_string();
        }
        if meta.generation == 0 {
            meta.generation = old
                .label(LABEL_OBJECT_GENERATION)
                .and_then(|g| g.parse().ok())
                .unwrap_or_default();
        }

        match old.kind_label() {
            Some(kind) if kind != template.kind() => {
                template
                    .into_kind(kind)
                    .map_err(|t| EngineError::KindMismatch {
                        expected: kind,
                        found: t.kind(),
                    })
            }
            _ => Ok(template),
        }
    }

    /// Inline upgrade of the snapshots a workload points at
    ///
    /// Repoints every upgraded slot in one patch that asserts the old names,
    /// then removes superseded snapshots this workload alone owned.
    ///
    /// # Errors
    /// Returns upgrade errors and store errors; a concurrent write to the
    /// same fields surfaces as a retryable store conflict.
    pub async fn upgrade(&self, workload: &Workload) -> EngineResult<Workload> {
        let mut patch = Patch::new();
        let mut superseded = Vec::new();

        for slot in TemplateSlot::ALL {
            let Some(old_name) = slot
                .status_ref(&workload.status)
                .and_then(|s| s.snapshot_name())
            else {
                continue;
            };
            let key = ObjectKey::namespaced(workload.namespace(), old_name);
            let Some(new_ref) = self.upgrade_one(&key).await? else {
                continue;
            };

            let path = format!("{}/snapshotRef/name", slot.status_path());
            patch = patch
                .test(&path, json!(old_name))
                .replace(&path, json!(new_ref.name));

            let pinned = slot
                .reference(workload)
                .and_then(|r| r.revision_name.as_deref());
            if pinned == Some(old_name) {
                let path = format!("{}/revisionName", slot.spec_path());
                patch = patch
                    .test(&path, json!(old_name))
                    .replace(&path, json!(new_ref.name));
            }
            superseded.push(key);
        }

        if patch.is_empty() {
            return Ok(workload.clone());
        }
        let updated = self.store.patch_workload(&workload.key(), &patch).await?;
        tracing::info!(
            namespace = workload.namespace(),
            name = %workload.metadata.name,
            upgraded = superseded.len(),
            "repointed workload to upgraded snapshots"
        );

        for key in &superseded {
            self.snapshots.cleanup(key, &workload.metadata.uid).await;
        }
        Ok(updated)
    }
}

impl std::fmt::Debug for Upgrader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upgrader")
            .field("snapshots", &self.snapshots)
            .finish_non_exhaustive()
    }
}
