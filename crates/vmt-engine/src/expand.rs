//! Detach a workload from its templates
//!
//! Expanding resolves the instance type and preference in effect, merges them
//! into the workload's own template and drops the references, so later edits
//! to either template no longer reach the workload. Snapshots the workload
//! alone owned are deleted afterwards.

use crate::config::ReferencePolicy;
use crate::conflict::ConflictDetector;
use crate::error::{to_value, EngineResult};
use crate::resolve::SpecResolver;
use crate::slot::TemplateSlot;
use crate::snapshot::SnapshotStore;
use std::sync::Arc;
use vmt_api::{ObjectKey, Patch, Workload};
use vmt_store::ObjectStore;

/// Applies the workload reference policy
#[derive(Clone)]
pub struct Expander {
    store: Arc<dyn ObjectStore>,
    snapshots: SnapshotStore,
    resolver: SpecResolver,
    detector: ConflictDetector,
    policy: ReferencePolicy,
}

impl Expander {
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        snapshots: SnapshotStore,
        resolver: SpecResolver,
        detector: ConflictDetector,
        policy: ReferencePolicy,
    ) -> Self {
        Self {
            store,
            snapshots,
            resolver,
            detector,
            policy,
        }
    }

    #[inline]
    #[must_use]
    pub fn policy(&self) -> ReferencePolicy {
        self.policy
    }

    /// Whether the policy asks for this workload to be expanded
    #[must_use]
    pub fn should_expand(&self, workload: &Workload) -> bool {
        let referenced = TemplateSlot::ALL
            .iter()
            .any(|slot| slot.reference(workload).is_some());
        if !referenced {
            return false;
        }
        match self.policy {
            ReferencePolicy::Reference => false,
            ReferencePolicy::Expand => TemplateSlot::ALL.iter().all(|slot| {
                slot.status_ref(&workload.status)
                    .and_then(|s| s.snapshot_ref.as_ref())
                    .is_none()
            }),
            ReferencePolicy::ExpandAll => true,
        }
    }

    /// Inline the resolved specs and drop the references
    ///
    /// Returns the workload unchanged when the policy does not apply.
    ///
    /// # Errors
    /// - conflicts between the templates and the workload
    /// - unmet preference requirements
    /// - resolution and store errors; a concurrent write to the references
    ///   or status surfaces as a retryable store conflict
    pub async fn expand(&self, workload: &Workload) -> EngineResult<Workload> {
        if !self.should_expand(workload) {
            return Ok(workload.clone());
        }

        let instancetype = self.resolver.resolve_instancetype(workload).await?;
        let preference = self.resolver.resolve_preference(workload).await?;

        let mut template = workload.spec.template.clone();
        self.detector
            .apply_and_detect(
                instancetype.as_ref(),
                preference.as_ref(),
                &mut template.spec,
                &mut template.metadata,
            )
            .into_result()?;
        if let Some(preference) = &preference {
            self.detector
                .check_requirements(instancetype.as_ref(), preference, &template.spec)?;
        }

        let mut patch = Patch::new();
        let mut superseded = Vec::new();
        for slot in TemplateSlot::ALL {
            if let Some(reference) = slot.reference(workload) {
                patch = patch
                    .test(slot.spec_path(), to_value(reference)?)
                    .remove(slot.spec_path());
            }
        }
        patch = patch.replace("/spec/template", to_value(&template)?);
        for slot in TemplateSlot::ALL {
            if let Some(status) = slot.status_ref(&workload.status) {
                patch = patch
                    .test(slot.status_path(), to_value(status)?)
                    .remove(slot.status_path());
                if let Some(name) = status.snapshot_name() {
                    superseded.push(ObjectKey::namespaced(workload.namespace(), name));
                }
            }
        }

        let updated = self.store.patch_workload(&workload.key(), &patch).await?;
        tracing::info!(
            namespace = workload.namespace(),
            name = %workload.metadata.name,
            policy = ?self.policy,
            "expanded workload"
        );

        futures::future::join_all(
            superseded
                .iter()
                .map(|key| self.snapshots.cleanup(key, &workload.metadata.uid)),
        )
        .await;
        Ok(updated)
    }
}

impl std::fmt::Debug for Expander {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Expander")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::CompatibilityDecoder;
    use vmt_api::{SnapshotRef, StatusRef, TemplateReference};
    use vmt_store::{InMemoryStore, ObjectCache};

    fn expander(policy: ReferencePolicy) -> Expander {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemoryStore::new());
        let decoder = CompatibilityDecoder::default();
        let snapshots = SnapshotStore::new(store.clone(), ObjectCache::default(), decoder.clone());
        let resolver = SpecResolver::new(store.clone(), ObjectCache::default(), decoder);
        Expander::new(store, snapshots, resolver, ConflictDetector::default(), policy)
    }

    fn workload(captured: bool) -> Workload {
        let mut w = Workload::new("ns", "w", "wu")
            .with_instancetype(TemplateReference::new("small", "virtualmachineinstancetype"));
        if captured {
            w.status.instancetype_ref = Some(StatusRef {
                name: "small".into(),
                kind: "virtualmachineinstancetype".into(),
                snapshot_ref: Some(SnapshotRef::new("ns-small-v1beta1-u-1")),
                ..StatusRef::default()
            });
        }
        w
    }

    #[test]
    fn policy_gate() {
        let reference = expander(ReferencePolicy::Reference);
        let expand = expander(ReferencePolicy::Expand);
        let expand_all = expander(ReferencePolicy::ExpandAll);

        assert!(!reference.should_expand(&workload(false)));
        assert!(expand.should_expand(&workload(false)));
        assert!(!expand.should_expand(&workload(true)));
        assert!(expand_all.should_expand(&workload(true)));
        assert!(!expand_all.should_expand(&Workload::new("ns", "bare", "u")));
    }
}
