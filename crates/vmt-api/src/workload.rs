//! Workloads referencing templates
//!
//! A workload names an instance type and/or a preference through a
//! [`TemplateReference`], and records the reference actually in effect in a
//! [`StatusRef`].

use crate::instancetype::common::{CpuFeature, Gpu, HostDevice, Hugepages};
use crate::meta::{ObjectKey, ObjectMeta, OwnerReference};
use crate::quantity::Quantity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const WORKLOAD_API_VERSION: &str = "vmt.io/v1";
pub const WORKLOAD_KIND: &str = "VirtualMachine";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    #[serde(default = "workload_api_version")]
    pub api_version: String,

    #[serde(default = "workload_kind")]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: WorkloadSpec,

    /// Always serialized so status patches can add fields below it
    #[serde(default)]
    pub status: WorkloadStatus,
}

impl Workload {
    /// Create workload with identity
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            api_version: workload_api_version(),
            kind: workload_kind(),
            metadata: ObjectMeta::named(name)
                .with_namespace(namespace)
                .with_uid(uid)
                .with_generation(1),
            spec: WorkloadSpec::default(),
            status: WorkloadStatus::default(),
        }
    }

    /// Builder: reference an instance type
    #[must_use]
    pub fn with_instancetype(mut self, reference: TemplateReference) -> Self {
        self.spec.instancetype = Some(reference);
        self
    }

    /// Builder: reference a preference
    #[must_use]
    pub fn with_preference(mut self, reference: TemplateReference) -> Self {
        self.spec.preference = Some(reference);
        self
    }

    #[inline]
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    #[inline]
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// Owner reference pointing back at this workload
    #[must_use]
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.metadata.name.clone(),
            uid: self.metadata.uid.clone(),
            controller: None,
            block_owner_deletion: Some(true),
        }
    }
}

fn workload_api_version() -> String {
    WORKLOAD_API_VERSION.to_string()
}

fn workload_kind() -> String {
    WORKLOAD_KIND.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instancetype: Option<TemplateReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preference: Option<TemplateReference>,

    #[serde(default)]
    pub template: InstanceTemplate,
}

/// Pointer from a workload to a template
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateReference {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    /// Pins a specific snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infer_from_volume: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infer_from_volume_failure_policy: Option<InferFromVolumeFailurePolicy>,
}

impl TemplateReference {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            ..Self::default()
        }
    }

    /// Builder: pin a snapshot
    #[must_use]
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision_name = Some(revision.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InferFromVolumeFailurePolicy {
    Reject,
    Ignore,
}

/// Persisted mirror of the reference in effect
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRef {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infer_from_volume: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infer_from_volume_failure_policy: Option<InferFromVolumeFailurePolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_ref: Option<SnapshotRef>,
}

impl StatusRef {
    /// Name of the snapshot in effect, if captured
    #[inline]
    #[must_use]
    pub fn snapshot_name(&self) -> Option<&str> {
        self.snapshot_ref.as_ref().map(|r| r.name.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub name: String,
}

impl SnapshotRef {
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instancetype_ref: Option<StatusRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preference_ref: Option<StatusRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceTemplate {
    #[serde(default)]
    pub metadata: TemplateMeta,

    #[serde(default)]
    pub spec: InstanceSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateMeta {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    #[serde(default)]
    pub domain: DomainSpec,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<Cpu>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Memory>,

    #[serde(default)]
    pub resources: ResourceRequirements,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io_threads_policy: Option<String>,

    #[serde(default)]
    pub devices: Devices,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware: Option<Firmware>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<Machine>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cpu {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub sockets: u32,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub cores: u32,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub threads: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub dedicated_cpu_placement: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub isolate_emulator_thread: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<CpuFeature>,
}

impl Cpu {
    /// Total vCPUs described by the topology; unset dimensions count as 1
    #[must_use]
    pub fn vcpus(&self) -> u32 {
        [self.sockets, self.cores, self.threads]
            .into_iter()
            .map(|n| n.max(1))
            .product()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest: Option<Quantity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hugepages: Option<Hugepages>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, Quantity>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, Quantity>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Devices {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gpus: Vec<Gpu>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host_devices: Vec<HostDevice>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<Disk>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoattach_graphics_device: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoattach_mem_balloon: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoattach_serial_console: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bus: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Firmware {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootloader: Option<Bootloader>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bootloader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bios: Option<Bios>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub efi: Option<Efi>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bios {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Efi {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_boot: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub machine_type: String,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(v: &u32) -> bool {
    *v == 0
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(v: &bool) -> bool {
    !*v
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_is_always_serialized() {
        let value = serde_json::to_value(Workload::new("ns", "w1", "u1")).unwrap();
        assert_eq!(value["status"], json!({}));
        assert_eq!(value["kind"], json!(WORKLOAD_KIND));
    }

    #[test]
    fn vcpus_treat_unset_as_one() {
        let cpu = Cpu {
            sockets: 2,
            cores: 0,
            threads: 2,
            ..Cpu::default()
        };
        assert_eq!(cpu.vcpus(), 4);
        assert_eq!(Cpu::default().vcpus(), 1);
    }

    #[test]
    fn owner_reference_points_back() {
        let owner = Workload::new("ns", "w1", "u1").owner_reference();
        assert_eq!(owner.kind, WORKLOAD_KIND);
        assert_eq!(owner.name, "w1");
        assert_eq!(owner.uid, "u1");
    }
}
