//! `v1alpha1`: the first released schema
//!
//! Snapshots written by the earliest releases did not store a full object.
//! They stored a [`SpecRevision`] envelope holding the version string and the
//! JSON-encoded spec bytes. Spec types here reject unknown fields so the
//! envelope's kind can be told apart by trial decoding.

use super::common::{
    CpuFeature, DevicePreferences, FirmwarePreferences, Gpu, HostDevice, Hugepages,
    MachinePreferences,
};
use super::{Object, TemplateOf};
use crate::quantity::Quantity;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InstancetypeSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scheduler_name: String,

    pub cpu: CpuInstancetype,

    pub memory: MemoryInstancetype,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gpus: Vec<Gpu>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host_devices: Vec<HostDevice>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io_threads_policy: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CpuInstancetype {
    pub guest: u32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,

    #[serde(default, rename = "dedicatedCPUPlacement", skip_serializing_if = "is_false")]
    pub dedicated_cpu_placement: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub isolate_emulator_thread: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MemoryInstancetype {
    pub guest: Quantity,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hugepages: Option<Hugepages>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub overcommit_percent: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PreferenceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuPreferences>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devices: Option<DevicePreferences>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware: Option<FirmwarePreferences>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<MachinePreferences>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_subdomain: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_termination_grace_period_seconds: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CpuPreferences {
    #[serde(
        default,
        rename = "preferredCPUTopology",
        skip_serializing_if = "PreferredCpuTopology::is_unset"
    )]
    pub preferred_cpu_topology: PreferredCpuTopology,

    #[serde(default, rename = "preferredCPUFeatures", skip_serializing_if = "Vec::is_empty")]
    pub preferred_cpu_features: Vec<CpuFeature>,
}

/// Topology preference as spelled before `v1beta1`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreferredCpuTopology {
    #[default]
    #[serde(rename = "")]
    Unset,
    #[serde(rename = "preferSockets")]
    PreferSockets,
    #[serde(rename = "preferCores")]
    PreferCores,
    #[serde(rename = "preferThreads")]
    PreferThreads,
}

impl PreferredCpuTopology {
    #[inline]
    #[must_use]
    pub fn is_unset(&self) -> bool {
        *self == Self::Unset
    }
}

/// Legacy wrapped-spec envelope
///
/// `api_version` may be empty; some writers left it unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SpecRevision {
    #[serde(default)]
    pub api_version: String,

    #[serde(serialize_with = "to_base64", deserialize_with = "from_base64")]
    pub spec: Vec<u8>,
}

impl SpecRevision {
    /// Wrap an encodable spec
    ///
    /// # Errors
    /// Returns the serde error when the spec cannot be encoded.
    pub fn wrap<S: Serialize>(api_version: impl Into<String>, spec: &S) -> serde_json::Result<Self> {
        Ok(Self {
            api_version: api_version.into(),
            spec: serde_json::to_vec(spec)?,
        })
    }
}

fn to_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

fn from_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let text = String::deserialize(deserializer)?;
    STANDARD.decode(text).map_err(serde::de::Error::custom)
}

pub type Instancetype = Object<InstancetypeSpec>;
pub type Preference = Object<PreferenceSpec>;
pub type Template = TemplateOf<InstancetypeSpec, PreferenceSpec>;

#[allow(clippy::trivially_copy_pass_by_ref)]
pub(crate) fn is_false(v: &bool) -> bool {
    !*v
}

#[allow(clippy::trivially_copy_pass_by_ref)]
pub(crate) fn is_zero(v: &u32) -> bool {
    *v == 0
}
