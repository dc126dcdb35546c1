//! `v1beta1`: the canonical schema

use super::common::{
    CpuFeature, DevicePreferences, FirmwarePreferences, Gpu, HostDevice, Hugepages,
    MachinePreferences,
};
use super::v1alpha1::is_zero;
use super::{Object, TemplateOf};
use crate::quantity::Quantity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstancetypeSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler_name: Option<String>,

    pub cpu: CpuInstancetype,

    pub memory: MemoryInstancetype,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gpus: Vec<Gpu>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host_devices: Vec<HostDevice>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io_threads_policy: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl InstancetypeSpec {
    /// Minimal spec with guest CPUs and memory
    #[must_use]
    pub fn new(guest_cpus: u32, guest_memory: Quantity) -> Self {
        Self {
            node_selector: BTreeMap::new(),
            scheduler_name: None,
            cpu: CpuInstancetype {
                guest: guest_cpus,
                ..CpuInstancetype::default()
            },
            memory: MemoryInstancetype {
                guest: guest_memory,
                hugepages: None,
                overcommit_percent: 0,
                max_guest: None,
            },
            gpus: Vec::new(),
            host_devices: Vec::new(),
            io_threads_policy: None,
            annotations: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuInstancetype {
    pub guest: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, rename = "dedicatedCPUPlacement", skip_serializing_if = "Option::is_none")]
    pub dedicated_cpu_placement: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolate_emulator_thread: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sockets: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryInstancetype {
    pub guest: Quantity,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hugepages: Option<Hugepages>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub overcommit_percent: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_guest: Option<Quantity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
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

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<PreferenceRequirements>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub prefer_spread_socket_to_core_ratio: u32,
}

impl PreferenceSpec {
    /// Preferred topology, if any was given
    #[inline]
    #[must_use]
    pub fn preferred_topology(&self) -> Option<PreferredCpuTopology> {
        self.cpu.as_ref().and_then(|c| c.preferred_cpu_topology)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuPreferences {
    #[serde(default, rename = "preferredCPUTopology", skip_serializing_if = "Option::is_none")]
    pub preferred_cpu_topology: Option<PreferredCpuTopology>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spread_options: Option<SpreadOptions>,

    #[serde(default, rename = "preferredCPUFeatures", skip_serializing_if = "Vec::is_empty")]
    pub preferred_cpu_features: Vec<CpuFeature>,
}

/// Guest CPU topology preference
///
/// The `Deprecated*` variants keep the spelling used before `v1beta1`; they
/// behave like their modern counterparts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreferredCpuTopology {
    #[serde(rename = "sockets")]
    Sockets,
    #[serde(rename = "cores")]
    Cores,
    #[serde(rename = "threads")]
    Threads,
    #[serde(rename = "spread")]
    Spread,
    #[serde(rename = "any")]
    Any,
    #[serde(rename = "preferSockets")]
    DeprecatedPreferSockets,
    #[serde(rename = "preferCores")]
    DeprecatedPreferCores,
    #[serde(rename = "preferThreads")]
    DeprecatedPreferThreads,
    #[serde(rename = "preferSpread")]
    DeprecatedPreferSpread,
    #[serde(rename = "preferAny")]
    DeprecatedPreferAny,
}

impl PreferredCpuTopology {
    /// Map deprecated spellings to the modern variant
    #[must_use]
    pub fn normalized(self) -> Self {
        match self {
            Self::DeprecatedPreferSockets => Self::Sockets,
            Self::DeprecatedPreferCores => Self::Cores,
            Self::DeprecatedPreferThreads => Self::Threads,
            Self::DeprecatedPreferSpread => Self::Spread,
            Self::DeprecatedPreferAny => Self::Any,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpreadOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub across: Option<SpreadAcross>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratio: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpreadAcross {
    #[default]
    SocketsCores,
    SocketsCoresThreads,
    CoresThreads,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuRequirement>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryRequirement>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuRequirement {
    pub guest: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRequirement {
    pub guest: Quantity,
}

pub type Instancetype = Object<InstancetypeSpec>;
pub type Preference = Object<PreferenceSpec>;
pub type Template = TemplateOf<InstancetypeSpec, PreferenceSpec>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deprecated_topology_spelling_is_kept() {
        let cpu: CpuPreferences =
            serde_json::from_value(json!({"preferredCPUTopology": "preferCores"})).unwrap();
        assert_eq!(
            cpu.preferred_cpu_topology,
            Some(PreferredCpuTopology::DeprecatedPreferCores)
        );
        assert_eq!(
            cpu.preferred_cpu_topology.map(PreferredCpuTopology::normalized),
            Some(PreferredCpuTopology::Cores)
        );
        assert_eq!(
            serde_json::to_value(&cpu).unwrap(),
            json!({"preferredCPUTopology": "preferCores"})
        );
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let spec: PreferenceSpec =
            serde_json::from_value(json!({"futureField": true, "preferredSubdomain": "a"})).unwrap();
        assert_eq!(spec.preferred_subdomain.as_deref(), Some("a"));
    }
}
