//! Resolve a workload's references to template specs
//!
//! A pinned snapshot wins over the live template: the reference's own
//! revision name first, then the snapshot recorded in status for the same
//! name and kind. Only unpinned references read the live template.

use crate::compat::CompatibilityDecoder;
use crate::error::{EngineError, EngineResult};
use crate::slot::TemplateSlot;
use std::sync::Arc;
use vmt_api::instancetype::v1beta1::{InstancetypeSpec, PreferenceSpec};
use vmt_api::{ObjectKey, Template, TemplateReference, Workload};
use vmt_store::{ObjectCache, ObjectStore};

/// Resolves references to canonical templates
#[derive(Clone)]
pub struct SpecResolver {
    store: Arc<dyn ObjectStore>,
    cache: ObjectCache,
    decoder: CompatibilityDecoder,
}

impl SpecResolver {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, cache: ObjectCache, decoder: CompatibilityDecoder) -> Self {
        Self {
            store,
            cache,
            decoder,
        }
    }

    /// Resolve one slot; `None` when the workload has no such reference
    ///
    /// # Errors
    /// - [`EngineError::UnexpectedKind`] for a kind outside the slot's family
    /// - [`EngineError::UninferredReference`] for an unnamed reference that
    ///   still names a volume to infer from
    /// - [`EngineError::NotFound`] for a missing template or snapshot
    /// - [`EngineError::Decode`] for an unreadable snapshot
    pub async fn resolve(
        &self,
        slot: TemplateSlot,
        workload: &Workload,
    ) -> EngineResult<Option<Template>> {
        let Some(reference) = slot.reference(workload) else {
            return Ok(None);
        };

        let pinned = reference.revision_name.as_deref().or_else(|| {
            slot.status_ref(&workload.status)
                .filter(|s| s.name == reference.name && s.kind == reference.kind)
                .and_then(|s| s.snapshot_name())
        });

        let template = match pinned {
            Some(name) => {
                let key = ObjectKey::namespaced(workload.namespace(), name);
                let snapshot = self.cache.get_snapshot(self.store.as_ref(), &key).await?;
                self.decoder.decode(&snapshot.data)?
            }
            None => return self.live(slot, workload.namespace(), reference).await.map(Some),
        };

        if template.kind().family() != slot.family() {
            return Err(EngineError::UnexpectedKind {
                matcher: slot.matcher(),
                kind: template.kind().to_string(),
            });
        }
        Ok(Some(template))
    }

    /// Fetch the live template a reference points at, ignoring any pin
    ///
    /// # Errors
    /// See [`SpecResolver::resolve`].
    pub async fn live(
        &self,
        slot: TemplateSlot,
        namespace: &str,
        reference: &TemplateReference,
    ) -> EngineResult<Template> {
        if reference.name.is_empty() {
            if let Some(volume) = &reference.infer_from_volume {
                return Err(EngineError::UninferredReference {
                    matcher: slot.matcher(),
                    volume: volume.clone(),
                });
            }
        }
        let kind = slot.kind(&reference.kind)?;
        let key = TemplateSlot::template_key(kind, namespace, &reference.name);
        Ok(self.cache.get_template(self.store.as_ref(), kind, &key).await?)
    }

    /// # Errors
    /// See [`SpecResolver::resolve`].
    pub async fn resolve_instancetype(
        &self,
        workload: &Workload,
    ) -> EngineResult<Option<InstancetypeSpec>> {
        Ok(self
            .resolve(TemplateSlot::Instancetype, workload)
            .await?
            .and_then(|t| t.instancetype_spec().cloned()))
    }

    /// # Errors
    /// See [`SpecResolver::resolve`].
    pub async fn resolve_preference(
        &self,
        workload: &Workload,
    ) -> EngineResult<Option<PreferenceSpec>> {
        Ok(self
            .resolve(TemplateSlot::Preference, workload)
            .await?
            .and_then(|t| t.preference_spec().cloned()))
    }
}

impl std::fmt::Debug for SpecResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpecResolver").finish_non_exhaustive()
    }
}
