//! Immutable template snapshots
//!
//! A snapshot freezes one template version for the workloads that adopted it.
//! Its payload is never rewritten; upgrades create a new snapshot.

use crate::instancetype::{SchemaVersion, TemplateKind};
use crate::meta::{ObjectKey, ObjectMeta};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Label holding the template kind
pub const LABEL_OBJECT_KIND: &str = "instancetype.vmt.io/object-kind";
/// Label holding the payload schema version
pub const LABEL_OBJECT_VERSION: &str = "instancetype.vmt.io/object-version";
/// Label holding the template uid
pub const LABEL_OBJECT_UID: &str = "instancetype.vmt.io/object-uid";
/// Label holding the template name
pub const LABEL_OBJECT_NAME: &str = "instancetype.vmt.io/object-name";
/// Label holding the template generation
pub const LABEL_OBJECT_GENERATION: &str = "instancetype.vmt.io/object-generation";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Versioned, metadata-stripped template
    pub data: Value,
}

impl Snapshot {
    #[inline]
    #[must_use]
    pub fn new(metadata: ObjectMeta, data: Value) -> Self {
        Self { metadata, data }
    }

    #[inline]
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    #[inline]
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata.labels.get(key).map(String::as_str)
    }

    /// Schema version recorded in the labels
    #[inline]
    #[must_use]
    pub fn version_label(&self) -> Option<SchemaVersion> {
        self.label(LABEL_OBJECT_VERSION)
            .and_then(SchemaVersion::from_version)
    }

    /// Template kind recorded in the labels
    #[inline]
    #[must_use]
    pub fn kind_label(&self) -> Option<TemplateKind> {
        self.label(LABEL_OBJECT_KIND).and_then(TemplateKind::from_kind)
    }

    /// Whether the labels mark the payload as canonical
    #[inline]
    #[must_use]
    pub fn is_canonical(&self) -> bool {
        self.version_label() == Some(SchemaVersion::CANONICAL)
    }
}

/// Label set for a snapshot of the given template identity
#[must_use]
pub fn snapshot_labels(
    kind: TemplateKind,
    version: SchemaVersion,
    meta: &ObjectMeta,
) -> BTreeMap<String, String> {
    [
        (LABEL_OBJECT_KIND, kind.as_str().to_string()),
        (LABEL_OBJECT_VERSION, version.as_str().to_string()),
        (LABEL_OBJECT_UID, meta.uid.clone()),
        (LABEL_OBJECT_NAME, meta.name.clone()),
        (LABEL_OBJECT_GENERATION, meta.generation.to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_label_detection() {
        let meta = ObjectMeta::named("t").with_uid("u1").with_generation(2);
        let mut snapshot = Snapshot::new(
            ObjectMeta::named("s").with_namespace("ns"),
            Value::Null,
        );
        assert!(!snapshot.is_canonical());

        snapshot.metadata.labels =
            snapshot_labels(TemplateKind::Preference, SchemaVersion::CANONICAL, &meta);
        assert!(snapshot.is_canonical());
        assert_eq!(snapshot.kind_label(), Some(TemplateKind::Preference));
        assert_eq!(snapshot.label(LABEL_OBJECT_GENERATION), Some("2"));
        assert_eq!(snapshot.label(LABEL_OBJECT_NAME), Some("t"));
    }
}
