//! Instance type and preference templates across schema versions
//!
//! # Core Concepts
//!
//! - [`TemplateKind`]: the four concrete kinds (namespaced/cluster × instancetype/preference)
//! - [`SchemaVersion`]: historical schema versions, oldest first; [`SchemaVersion::CANONICAL`] is the latest
//! - [`Object<S>`]: a typed object envelope at some version
//! - [`TemplateOf<I, P>`]: tagged union over the four kinds for one version's spec types

pub mod common;
pub mod v1alpha1;
pub mod v1alpha2;
pub mod v1beta1;

use crate::meta::ObjectMeta;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display, Formatter};

/// API group of every template kind
pub const GROUP: &str = "instancetype.vmt.io";

/// Schema versions, oldest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SchemaVersion {
    V1alpha1,
    V1alpha2,
    V1beta1,
}

impl SchemaVersion {
    /// Latest version; every older encoding converts toward it
    pub const CANONICAL: Self = Self::V1beta1;

    /// All versions, oldest first
    pub const ALL: [Self; 3] = [Self::V1alpha1, Self::V1alpha2, Self::V1beta1];

    /// Bare version string (`v1beta1`)
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1alpha1 => "v1alpha1",
            Self::V1alpha2 => "v1alpha2",
            Self::V1beta1 => "v1beta1",
        }
    }

    /// Full `group/version` string
    #[inline]
    #[must_use]
    pub fn api_version(self) -> String {
        format!("{GROUP}/{}", self.as_str())
    }

    /// Parse a bare version string
    #[must_use]
    pub fn from_version(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_str() == s)
    }

    /// Parse a `group/version` string; the group must match
    #[must_use]
    pub fn from_api_version(s: &str) -> Option<Self> {
        let (group, version) = s.split_once('/')?;
        if group != GROUP {
            return None;
        }
        Self::from_version(version)
    }

    /// Next newer version, if any
    #[inline]
    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            Self::V1alpha1 => Some(Self::V1alpha2),
            Self::V1alpha2 => Some(Self::V1beta1),
            Self::V1beta1 => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_canonical(self) -> bool {
        self == Self::CANONICAL
    }
}

impl Display for SchemaVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Template family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Instancetype,
    Preference,
}

/// Concrete template kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TemplateKind {
    Instancetype,
    ClusterInstancetype,
    Preference,
    ClusterPreference,
}

impl TemplateKind {
    pub const ALL: [Self; 4] = [
        Self::Instancetype,
        Self::ClusterInstancetype,
        Self::Preference,
        Self::ClusterPreference,
    ];

    /// Kind name as written in `kind:`
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Instancetype => "VirtualMachineInstancetype",
            Self::ClusterInstancetype => "VirtualMachineClusterInstancetype",
            Self::Preference => "VirtualMachinePreference",
            Self::ClusterPreference => "VirtualMachineClusterPreference",
        }
    }

    /// Lower-case singular resource name
    #[inline]
    #[must_use]
    pub fn singular(self) -> &'static str {
        match self {
            Self::Instancetype => "virtualmachineinstancetype",
            Self::ClusterInstancetype => "virtualmachineclusterinstancetype",
            Self::Preference => "virtualmachinepreference",
            Self::ClusterPreference => "virtualmachineclusterpreference",
        }
    }

    /// Lower-case plural resource name
    #[inline]
    #[must_use]
    pub fn plural(self) -> String {
        format!("{}s", self.singular())
    }

    /// Parse an exact kind name
    #[must_use]
    pub fn from_kind(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Parse the kind written on a workload reference
    ///
    /// Accepts the kind name or the singular/plural resource name, case
    /// insensitively. Empty means the cluster-scoped kind of `family`.
    /// Kinds from the other family are rejected.
    #[must_use]
    pub fn from_reference(family: Family, s: &str) -> Option<Self> {
        if s.is_empty() {
            return Some(Self::cluster(family));
        }
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .filter(|k| k.family() == family)
            .find(|k| lower == k.singular() || lower == k.plural())
    }

    #[inline]
    #[must_use]
    pub fn family(self) -> Family {
        match self {
            Self::Instancetype | Self::ClusterInstancetype => Family::Instancetype,
            Self::Preference | Self::ClusterPreference => Family::Preference,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_cluster_scoped(self) -> bool {
        matches!(self, Self::ClusterInstancetype | Self::ClusterPreference)
    }

    /// Namespaced kind of a family
    #[inline]
    #[must_use]
    pub fn namespaced(family: Family) -> Self {
        match family {
            Family::Instancetype => Self::Instancetype,
            Family::Preference => Self::Preference,
        }
    }

    /// Cluster-scoped kind of a family
    #[inline]
    #[must_use]
    pub fn cluster(family: Family) -> Self {
        match family {
            Family::Instancetype => Self::ClusterInstancetype,
            Family::Preference => Self::ClusterPreference,
        }
    }
}

impl Display for TemplateKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed object envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Object<S> {
    #[serde(default)]
    pub api_version: String,

    #[serde(default)]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    pub spec: S,
}

impl<S> Object<S> {
    /// Create object with type information filled in
    #[must_use]
    pub fn new(version: SchemaVersion, kind: TemplateKind, metadata: ObjectMeta, spec: S) -> Self {
        Self {
            api_version: version.api_version(),
            kind: kind.as_str().to_string(),
            metadata,
            spec,
        }
    }

    /// Re-tag with another version, mapping the spec
    #[must_use]
    pub fn convert<T>(self, version: SchemaVersion, f: impl FnOnce(S) -> T) -> Object<T> {
        Object {
            api_version: version.api_version(),
            kind: self.kind,
            metadata: self.metadata,
            spec: f(self.spec),
        }
    }
}

/// The four template kinds at one schema version
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateOf<I, P> {
    Instancetype(Object<I>),
    ClusterInstancetype(Object<I>),
    Preference(Object<P>),
    ClusterPreference(Object<P>),
}

impl<I, P> TemplateOf<I, P> {
    #[inline]
    #[must_use]
    pub fn kind(&self) -> TemplateKind {
        match self {
            Self::Instancetype(_) => TemplateKind::Instancetype,
            Self::ClusterInstancetype(_) => TemplateKind::ClusterInstancetype,
            Self::Preference(_) => TemplateKind::Preference,
            Self::ClusterPreference(_) => TemplateKind::ClusterPreference,
        }
    }

    #[inline]
    #[must_use]
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Instancetype(o) | Self::ClusterInstancetype(o) => &o.metadata,
            Self::Preference(o) | Self::ClusterPreference(o) => &o.metadata,
        }
    }

    #[inline]
    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::Instancetype(o) | Self::ClusterInstancetype(o) => &mut o.metadata,
            Self::Preference(o) | Self::ClusterPreference(o) => &mut o.metadata,
        }
    }

    /// Instance type spec, for either scope
    #[inline]
    #[must_use]
    pub fn instancetype_spec(&self) -> Option<&I> {
        match self {
            Self::Instancetype(o) | Self::ClusterInstancetype(o) => Some(&o.spec),
            _ => None,
        }
    }

    /// Preference spec, for either scope
    #[inline]
    #[must_use]
    pub fn preference_spec(&self) -> Option<&P> {
        match self {
            Self::Preference(o) | Self::ClusterPreference(o) => Some(&o.spec),
            _ => None,
        }
    }

    /// Move to another kind of the same family
    ///
    /// Returns `Err(self)` when `kind` belongs to the other family.
    pub fn into_kind(self, kind: TemplateKind) -> Result<Self, Self> {
        if kind.family() != self.kind().family() {
            return Err(self);
        }
        let retag = |mut meta: ObjectMeta| {
            if kind.is_cluster_scoped() {
                meta.namespace = None;
            }
            meta
        };
        Ok(match (self, kind) {
            (Self::Instancetype(mut o) | Self::ClusterInstancetype(mut o), k) => {
                o.kind = k.as_str().to_string();
                o.metadata = retag(o.metadata);
                if k.is_cluster_scoped() {
                    Self::ClusterInstancetype(o)
                } else {
                    Self::Instancetype(o)
                }
            }
            (Self::Preference(mut o) | Self::ClusterPreference(mut o), k) => {
                o.kind = k.as_str().to_string();
                o.metadata = retag(o.metadata);
                if k.is_cluster_scoped() {
                    Self::ClusterPreference(o)
                } else {
                    Self::Preference(o)
                }
            }
        })
    }

    /// Map each spec type, keeping kind and metadata
    #[must_use]
    pub fn map<I2, P2>(
        self,
        version: SchemaVersion,
        fi: impl FnOnce(I) -> I2,
        fp: impl FnOnce(P) -> P2,
    ) -> TemplateOf<I2, P2> {
        match self {
            Self::Instancetype(o) => TemplateOf::Instancetype(o.convert(version, fi)),
            Self::ClusterInstancetype(o) => TemplateOf::ClusterInstancetype(o.convert(version, fi)),
            Self::Preference(o) => TemplateOf::Preference(o.convert(version, fp)),
            Self::ClusterPreference(o) => TemplateOf::ClusterPreference(o.convert(version, fp)),
        }
    }
}

impl<I: DeserializeOwned, P: DeserializeOwned> TemplateOf<I, P> {
    /// Decode an object of a known kind
    ///
    /// # Errors
    /// Returns the serde error when `value` does not match the kind's shape.
    pub fn from_value(kind: TemplateKind, value: Value) -> serde_json::Result<Self> {
        Ok(match kind {
            TemplateKind::Instancetype => Self::Instancetype(serde_json::from_value(value)?),
            TemplateKind::ClusterInstancetype => {
                Self::ClusterInstancetype(serde_json::from_value(value)?)
            }
            TemplateKind::Preference => Self::Preference(serde_json::from_value(value)?),
            TemplateKind::ClusterPreference => {
                Self::ClusterPreference(serde_json::from_value(value)?)
            }
        })
    }
}

impl<I: Serialize, P: Serialize> TemplateOf<I, P> {
    /// Encode the inner object, including `apiVersion` and `kind`
    ///
    /// # Errors
    /// Returns the serde error when serialization fails.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        match self {
            Self::Instancetype(o) | Self::ClusterInstancetype(o) => serde_json::to_value(o),
            Self::Preference(o) | Self::ClusterPreference(o) => serde_json::to_value(o),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_kind_aliases() {
        use Family::{Instancetype, Preference};
        assert_eq!(
            TemplateKind::from_reference(Instancetype, ""),
            Some(TemplateKind::ClusterInstancetype)
        );
        assert_eq!(
            TemplateKind::from_reference(Instancetype, "VirtualMachineInstancetype"),
            Some(TemplateKind::Instancetype)
        );
        assert_eq!(
            TemplateKind::from_reference(Instancetype, "virtualmachineclusterinstancetypes"),
            Some(TemplateKind::ClusterInstancetype)
        );
        assert_eq!(
            TemplateKind::from_reference(Preference, "virtualmachinepreferences"),
            Some(TemplateKind::Preference)
        );
        assert_eq!(
            TemplateKind::from_reference(Preference, ""),
            Some(TemplateKind::ClusterPreference)
        );
        assert_eq!(
            TemplateKind::from_reference(Preference, "VirtualMachineInstancetype"),
            None
        );
    }

    #[test]
    fn api_version_round_trip() {
        for v in SchemaVersion::ALL {
            assert_eq!(SchemaVersion::from_api_version(&v.api_version()), Some(v));
        }
        assert_eq!(SchemaVersion::from_api_version("other.io/v1beta1"), None);
        assert_eq!(SchemaVersion::V1alpha1.next(), Some(SchemaVersion::V1alpha2));
        assert!(SchemaVersion::CANONICAL.next().is_none());
    }

    #[test]
    fn into_kind_stays_within_family() {
        let obj: TemplateOf<u32, String> = TemplateOf::Instancetype(Object::new(
            SchemaVersion::V1beta1,
            TemplateKind::Instancetype,
            ObjectMeta::named("a").with_namespace("ns"),
            1,
        ));
        let cluster = obj.clone().into_kind(TemplateKind::ClusterInstancetype).unwrap();
        assert_eq!(cluster.kind(), TemplateKind::ClusterInstancetype);
        assert!(cluster.metadata().namespace.is_none());
        assert!(obj.into_kind(TemplateKind::Preference).is_err());
    }
}
