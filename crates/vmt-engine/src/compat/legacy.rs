//! Wrapped-spec envelopes written by the earliest releases
//!
//! An envelope is `{"apiVersion": "...", "spec": "<base64 JSON>"}` with no
//! kind and no metadata. The kind is recovered by trial-decoding the spec
//! against both strict spec shapes.

use crate::error::DecodeError;
use serde::Deserialize;
use serde_json::Value;
use vmt_api::instancetype::v1alpha1::{self, SpecRevision};
use vmt_api::instancetype::Object;
use vmt_api::{Family, ObjectMeta, SchemaVersion, TemplateKind};

/// Try to read `payload` as an envelope
///
/// Returns `Ok(None)` when it is not an envelope, or when the wrapped spec
/// matches neither or both kinds.
///
/// # Errors
/// Returns [`DecodeError::UnsupportedEnvelopeVersion`] for an envelope whose
/// version is neither empty nor `v1alpha1`.
pub(crate) fn decode_envelope(payload: &Value) -> Result<Option<v1alpha1::Template>, DecodeError> {
    let Ok(envelope) = SpecRevision::deserialize(payload) else {
        return Ok(None);
    };

    // Early writers left the version empty
    if !envelope.api_version.is_empty()
        && SchemaVersion::from_api_version(&envelope.api_version) != Some(SchemaVersion::V1alpha1)
    {
        return Err(DecodeError::UnsupportedEnvelopeVersion(envelope.api_version));
    }

    let instancetype = serde_json::from_slice::<v1alpha1::InstancetypeSpec>(&envelope.spec).ok();
    let preference = serde_json::from_slice::<v1alpha1::PreferenceSpec>(&envelope.spec).ok();

    Ok(match (instancetype, preference) {
        (Some(spec), None) => Some(v1alpha1::Template::Instancetype(Object::new(
            SchemaVersion::V1alpha1,
            TemplateKind::namespaced(Family::Instancetype),
            ObjectMeta::default(),
            spec,
        ))),
        (None, Some(spec)) => Some(v1alpha1::Template::Preference(Object::new(
            SchemaVersion::V1alpha1,
            TemplateKind::namespaced(Family::Preference),
            ObjectMeta::default(),
            spec,
        ))),
        _ => {
            tracing::debug!("envelope spec matches no single kind");
            None
        }
    })
}
