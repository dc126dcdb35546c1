//! Multi-version template decoding
//!
//! # Core Concepts
//!
//! - [`VersionedTemplate`]: a template typed at the version it was written in
//! - [`ConversionRegistry`]: one conversion per legacy (version, kind)
//! - [`CompatibilityDecoder`]: any stored payload in, canonical [`Template`] out
//!
//! Decoding order: legacy wrapped-spec envelope first, then the typed
//! `apiVersion`/`kind` of the payload, then conversions until canonical.
//!
//! # Example
//!
//! ```rust,ignore
//! use vmt_engine::compat::CompatibilityDecoder;
//!
//! let decoder = CompatibilityDecoder::default();
//! let template = decoder.decode(&snapshot.data)?;
//! let payload = CompatibilityDecoder::encode(&template)?;
//! ```

mod convert;
mod legacy;
mod registry;

pub use registry::{ConversionFn, ConversionRegistry};

use crate::error::DecodeError;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use vmt_api::instancetype::{v1alpha1, v1alpha2, v1beta1};
use vmt_api::{SchemaVersion, Template, TemplateKind};

/// Template typed at its stored version
#[derive(Debug, Clone, PartialEq)]
pub enum VersionedTemplate {
    V1alpha1(v1alpha1::Template),
    V1alpha2(v1alpha2::Template),
    V1beta1(v1beta1::Template),
}

impl VersionedTemplate {
    #[inline]
    #[must_use]
    pub fn version(&self) -> SchemaVersion {
        match self {
            Self::V1alpha1(_) => SchemaVersion::V1alpha1,
            Self::V1alpha2(_) => SchemaVersion::V1alpha2,
            Self::V1beta1(_) => SchemaVersion::V1beta1,
        }
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> TemplateKind {
        match self {
            Self::V1alpha1(t) | Self::V1alpha2(t) => t.kind(),
            Self::V1beta1(t) => t.kind(),
        }
    }

    /// Decode a typed object by its `apiVersion` and `kind`
    ///
    /// # Errors
    /// - [`DecodeError::UnknownType`] when the pair is not registered
    /// - [`DecodeError::Malformed`] when the body does not fit the type
    pub fn from_value(payload: &Value) -> Result<Self, DecodeError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct TypeMeta {
            #[serde(default)]
            api_version: String,
            #[serde(default)]
            kind: String,
        }

        let meta = TypeMeta::deserialize(payload)?;
        let unknown = || DecodeError::UnknownType {
            api_version: meta.api_version.clone(),
            kind: meta.kind.clone(),
        };
        let version = SchemaVersion::from_api_version(&meta.api_version).ok_or_else(unknown)?;
        let kind = TemplateKind::from_kind(&meta.kind).ok_or_else(unknown)?;

        let body = payload.clone();
        Ok(match version {
            SchemaVersion::V1alpha1 => Self::V1alpha1(v1alpha1::Template::from_value(kind, body)?),
            SchemaVersion::V1alpha2 => Self::V1alpha2(v1alpha2::Template::from_value(kind, body)?),
            SchemaVersion::V1beta1 => Self::V1beta1(v1beta1::Template::from_value(kind, body)?),
        })
    }
}

/// Decodes any stored template payload into its canonical form
#[derive(Debug, Clone)]
pub struct CompatibilityDecoder {
    registry: Arc<ConversionRegistry>,
}

impl CompatibilityDecoder {
    #[must_use]
    pub fn new(registry: ConversionRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    #[inline]
    #[must_use]
    pub fn registry(&self) -> &ConversionRegistry {
        &self.registry
    }

    /// Decode a payload to canonical
    ///
    /// Idempotent: a canonical payload passes through unchanged.
    ///
    /// # Errors
    /// Returns [`DecodeError`] for unknown types, unsupported envelope
    /// versions, malformed bodies and missing conversions.
    pub fn decode(&self, payload: &Value) -> Result<Template, DecodeError> {
        let versioned = self.decode_versioned(payload)?;
        self.to_canonical(versioned)
    }

    /// Decode a payload to its stored version without converting
    ///
    /// # Errors
    /// See [`CompatibilityDecoder::decode`].
    pub fn decode_versioned(&self, payload: &Value) -> Result<VersionedTemplate, DecodeError> {
        if let Some(template) = legacy::decode_envelope(payload)? {
            return Ok(VersionedTemplate::V1alpha1(template));
        }
        VersionedTemplate::from_value(payload)
    }

    /// Convert a typed object forward to canonical
    ///
    /// # Errors
    /// See [`ConversionRegistry::to_canonical`].
    pub fn to_canonical(&self, versioned: VersionedTemplate) -> Result<Template, DecodeError> {
        self.registry.to_canonical(versioned)
    }

    /// Canonical payload for a snapshot
    ///
    /// Metadata is reduced to identity and type information is stamped with
    /// the canonical version.
    ///
    /// # Errors
    /// Returns [`DecodeError::Malformed`] if serialization fails.
    pub fn encode(template: &Template) -> Result<Value, DecodeError> {
        let mut template = template.clone();
        let stripped = template.metadata().stripped();
        *template.metadata_mut() = stripped;

        let kind = template.kind().as_str().to_string();
        let api_version = SchemaVersion::CANONICAL.api_version();
        match &mut template {
            Template::Instancetype(o) | Template::ClusterInstancetype(o) => {
                o.api_version = api_version;
                o.kind = kind;
            }
            Template::Preference(o) | Template::ClusterPreference(o) => {
                o.api_version = api_version;
                o.kind = kind;
            }
        }
        Ok(template.to_value()?)
    }
}

impl Default for CompatibilityDecoder {
    fn default() -> Self {
        Self::new(ConversionRegistry::with_defaults())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use vmt_api::instancetype::v1alpha1::SpecRevision;
    use vmt_api::instancetype::v1beta1::PreferredCpuTopology;
    use vmt_api::instancetype::Object;
    use vmt_api::{ObjectMeta, Quantity};

    fn decoder() -> CompatibilityDecoder {
        CompatibilityDecoder::default()
    }

    fn canonical_instancetype() -> Template {
        let mut meta = ObjectMeta::named("small")
            .with_namespace("ns")
            .with_uid("u1")
            .with_generation(3);
        meta.labels.insert("team".into(), "a".into());
        meta.resource_version = 42;
        Template::Instancetype(Object::new(
            SchemaVersion::CANONICAL,
            TemplateKind::Instancetype,
            meta,
            v1beta1::InstancetypeSpec::new(2, Quantity::parse("128Mi").unwrap()),
        ))
    }

    #[test]
    fn canonical_round_trip() {
        let template = canonical_instancetype();
        let payload = CompatibilityDecoder::encode(&template).unwrap();
        let decoded = decoder().decode(&payload).unwrap();

        assert_eq!(decoded.instancetype_spec(), template.instancetype_spec());
        assert_eq!(decoded.metadata().uid, "u1");
        assert_eq!(decoded.metadata().generation, 3);
        assert!(decoded.metadata().labels.is_empty());
        assert_eq!(decoded.metadata().resource_version, 0);

        let again = CompatibilityDecoder::encode(&decoded).unwrap();
        assert_eq!(again, payload);
    }

    #[test]
    fn legacy_preference_keeps_topology() {
        let spec = json!({"cpu": {"preferredCPUTopology": "preferCores"}});
        let payload = serde_json::to_value(SpecRevision::wrap("", &spec).unwrap()).unwrap();

        let template = decoder().decode(&payload).unwrap();
        assert_eq!(template.kind(), TemplateKind::Preference);
        let preference = template.preference_spec().unwrap();
        assert_eq!(
            preference.preferred_topology(),
            Some(PreferredCpuTopology::DeprecatedPreferCores)
        );
        assert_eq!(
            serde_json::to_value(preference).unwrap(),
            json!({"cpu": {"preferredCPUTopology": "preferCores"}})
        );
    }

    #[test]
    fn legacy_instancetype_with_version() {
        let spec = json!({"cpu": {"guest": 4}, "memory": {"guest": "1Gi"}});
        let payload = serde_json::to_value(
            SpecRevision::wrap("instancetype.vmt.io/v1alpha1", &spec).unwrap(),
        )
        .unwrap();

        let template = decoder().decode(&payload).unwrap();
        assert_eq!(template.kind(), TemplateKind::Instancetype);
        let expected = v1beta1::InstancetypeSpec::new(4, Quantity::parse("1Gi").unwrap());
        assert_eq!(template.instancetype_spec(), Some(&expected));
    }

    #[test]
    fn alpha_objects_of_every_kind_convert() {
        for version in ["v1alpha1", "v1alpha2"] {
            for kind in TemplateKind::ALL {
                let spec = match kind.family() {
                    vmt_api::Family::Instancetype => {
                        json!({"cpu": {"guest": 1}, "memory": {"guest": "64Mi"}})
                    }
                    vmt_api::Family::Preference => {
                        json!({"machine": {"preferredMachineType": "q35"}})
                    }
                };
                let payload = json!({
                    "apiVersion": format!("instancetype.vmt.io/{version}"),
                    "kind": kind.as_str(),
                    "metadata": {"name": "t", "uid": "u", "generation": 2},
                    "spec": spec,
                });

                let versioned = decoder().decode_versioned(&payload).unwrap();
                assert_eq!(versioned.version().as_str(), version);

                let template = decoder().decode(&payload).unwrap();
                assert_eq!(template.kind(), kind);
                assert_eq!(template.metadata().generation, 2);
            }
        }
    }

    #[test]
    fn unknown_type_is_named() {
        let payload = json!({"apiVersion": "other.io/v1", "kind": "Thing", "spec": {}});
        let err = decoder().decode(&payload).unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnknownType {
                api_version: "other.io/v1".into(),
                kind: "Thing".into(),
            }
        );
        assert!(err.to_string().contains("Thing"));
    }

    #[test]
    fn malformed_body_is_reported() {
        let payload = json!({
            "apiVersion": "instancetype.vmt.io/v1beta1",
            "kind": "VirtualMachineInstancetype",
            "spec": {"cpu": {"guest": "two"}},
        });
        assert!(matches!(
            decoder().decode(&payload),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decoder().decode(&json!("not an object")),
            Err(DecodeError::Malformed(_))
        ));
    }
}
