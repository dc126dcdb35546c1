//! Conversion registry
//!
//! Maps each legacy (version, kind) to the function that moves it one version
//! forward. [`ConversionRegistry::to_canonical`] chains them.

use super::convert;
use super::VersionedTemplate;
use crate::error::DecodeError;
use std::collections::HashMap;
use vmt_api::{SchemaVersion, Template, TemplateKind};

/// Converts an object one version forward
pub type ConversionFn = fn(VersionedTemplate) -> Result<VersionedTemplate, DecodeError>;

/// Registry of version-to-next-version conversions
#[derive(Debug, Default, Clone)]
pub struct ConversionRegistry {
    conversions: HashMap<(SchemaVersion, TemplateKind), ConversionFn>,
}

impl ConversionRegistry {
    /// Create new empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            conversions: HashMap::new(),
        }
    }

    /// Create registry with the built-in conversions for every legacy version and kind
    #[must_use]
    pub fn with_defaults() -> Self {
        use SchemaVersion::{V1alpha1, V1alpha2};
        use TemplateKind::{ClusterInstancetype, ClusterPreference, Instancetype, Preference};

        let mut registry = Self::new();
        registry.register(V1alpha1, Instancetype, convert::instancetype_v1alpha1);
        registry.register(V1alpha1, ClusterInstancetype, convert::cluster_instancetype_v1alpha1);
        registry.register(V1alpha1, Preference, convert::preference_v1alpha1);
        registry.register(V1alpha1, ClusterPreference, convert::cluster_preference_v1alpha1);
        registry.register(V1alpha2, Instancetype, convert::instancetype_v1alpha2);
        registry.register(V1alpha2, ClusterInstancetype, convert::cluster_instancetype_v1alpha2);
        registry.register(V1alpha2, Preference, convert::preference_v1alpha2);
        registry.register(V1alpha2, ClusterPreference, convert::cluster_preference_v1alpha2);
        registry
    }

    /// Register a conversion, returning the one it replaced
    pub fn register(
        &mut self,
        version: SchemaVersion,
        kind: TemplateKind,
        conversion: ConversionFn,
    ) -> Option<ConversionFn> {
        self.conversions.insert((version, kind), conversion)
    }

    #[inline]
    #[must_use]
    pub fn get(&self, version: SchemaVersion, kind: TemplateKind) -> Option<ConversionFn> {
        self.conversions.get(&(version, kind)).copied()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.conversions.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conversions.is_empty()
    }

    /// Chain conversions until the object is canonical
    ///
    /// # Errors
    /// - [`DecodeError::MissingConversion`] when a step is not registered
    /// - [`DecodeError::ConversionMismatch`] when a step does not move forward
    ///   or changes the kind
    pub fn to_canonical(&self, mut object: VersionedTemplate) -> Result<Template, DecodeError> {
        loop {
            let (version, kind) = (object.version(), object.kind());
            if let VersionedTemplate::V1beta1(template) = object {
                return Ok(template);
            }

            let conversion = self
                .get(version, kind)
                .ok_or(DecodeError::MissingConversion { version, kind })?;
            let next = conversion(object)?;
            if next.version() <= version || next.kind() != kind {
                return Err(DecodeError::ConversionMismatch {
                    expected_version: version.next().unwrap_or(SchemaVersion::CANONICAL),
                    expected_kind: kind,
                    found_version: next.version(),
                    found_kind: next.kind(),
                });
            }
            tracing::trace!(%kind, from = %version, to = %next.version(), "converted");
            object = next;
        }
    }
}
