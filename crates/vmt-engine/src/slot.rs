//! The two template reference slots of a workload

use crate::error::{EngineError, EngineResult};
use vmt_api::{
    Family, ObjectKey, StatusRef, TemplateKind, TemplateReference, Workload, WorkloadStatus,
};

/// Instance type or preference slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateSlot {
    Instancetype,
    Preference,
}

impl TemplateSlot {
    pub const ALL: [Self; 2] = [Self::Instancetype, Self::Preference];

    #[inline]
    #[must_use]
    pub fn family(self) -> Family {
        match self {
            Self::Instancetype => Family::Instancetype,
            Self::Preference => Family::Preference,
        }
    }

    /// Name used in kind errors
    #[inline]
    #[must_use]
    pub fn matcher(self) -> &'static str {
        match self {
            Self::Instancetype => "InstancetypeMatcher",
            Self::Preference => "PreferenceMatcher",
        }
    }

    /// JSON pointer of the reference in the workload
    #[inline]
    #[must_use]
    pub fn spec_path(self) -> &'static str {
        match self {
            Self::Instancetype => "/spec/instancetype",
            Self::Preference => "/spec/preference",
        }
    }

    /// JSON pointer of the status ref in the workload
    #[inline]
    #[must_use]
    pub fn status_path(self) -> &'static str {
        match self {
            Self::Instancetype => "/status/instancetypeRef",
            Self::Preference => "/status/preferenceRef",
        }
    }

    #[inline]
    #[must_use]
    pub fn reference(self, workload: &Workload) -> Option<&TemplateReference> {
        match self {
            Self::Instancetype => workload.spec.instancetype.as_ref(),
            Self::Preference => workload.spec.preference.as_ref(),
        }
    }

    #[inline]
    #[must_use]
    pub fn status_ref(self, status: &WorkloadStatus) -> Option<&StatusRef> {
        match self {
            Self::Instancetype => status.instancetype_ref.as_ref(),
            Self::Preference => status.preference_ref.as_ref(),
        }
    }

    #[inline]
    pub fn status_ref_mut(self, status: &mut WorkloadStatus) -> &mut Option<StatusRef> {
        match self {
            Self::Instancetype => &mut status.instancetype_ref,
            Self::Preference => &mut status.preference_ref,
        }
    }

    /// Resolve the kind written on a reference
    ///
    /// # Errors
    /// Returns [`EngineError::UnexpectedKind`] when the kind is unknown or
    /// belongs to the other family.
    pub fn kind(self, kind: &str) -> EngineResult<TemplateKind> {
        TemplateKind::from_reference(self.family(), kind).ok_or_else(|| {
            EngineError::UnexpectedKind {
                matcher: self.matcher(),
                kind: kind.to_string(),
            }
        })
    }

    /// Store key of a referenced template
    #[must_use]
    pub fn template_key(kind: TemplateKind, namespace: &str, name: &str) -> ObjectKey {
        if kind.is_cluster_scoped() {
            ObjectKey::cluster(name)
        } else {
            ObjectKey::namespaced(namespace, name)
        }
    }
}
