//! Version-to-next-version conversions
//!
//! One function per legacy (version, kind). Each converts exactly one step and
//! rejects objects of any other version or kind.

use super::VersionedTemplate;
use crate::error::DecodeError;
use std::collections::BTreeMap;
use vmt_api::instancetype::{v1alpha2, v1beta1};
use vmt_api::{SchemaVersion, TemplateKind};

fn mismatch(
    expected_version: SchemaVersion,
    expected_kind: TemplateKind,
    found: &VersionedTemplate,
) -> DecodeError {
    DecodeError::ConversionMismatch {
        expected_version,
        expected_kind,
        found_version: found.version(),
        found_kind: found.kind(),
    }
}

fn from_v1alpha1(
    kind: TemplateKind,
    object: VersionedTemplate,
) -> Result<VersionedTemplate, DecodeError> {
    match object {
        VersionedTemplate::V1alpha1(t) if t.kind() == kind => Ok(VersionedTemplate::V1alpha2(
            t.map(SchemaVersion::V1alpha2, |s| s, |s| s),
        )),
        other => Err(mismatch(SchemaVersion::V1alpha1, kind, &other)),
    }
}

fn from_v1alpha2(
    kind: TemplateKind,
    object: VersionedTemplate,
) -> Result<VersionedTemplate, DecodeError> {
    match object {
        VersionedTemplate::V1alpha2(t) if t.kind() == kind => Ok(VersionedTemplate::V1beta1(
            t.map(SchemaVersion::V1beta1, instancetype_spec, preference_spec),
        )),
        other => Err(mismatch(SchemaVersion::V1alpha2, kind, &other)),
    }
}

pub(crate) fn instancetype_v1alpha1(o: VersionedTemplate) -> Result<VersionedTemplate, DecodeError> {
    from_v1alpha1(TemplateKind::Instancetype, o)
}

pub(crate) fn cluster_instancetype_v1alpha1(
    o: VersionedTemplate,
) -> Result<VersionedTemplate, DecodeError> {
    from_v1alpha1(TemplateKind::ClusterInstancetype, o)
}

pub(crate) fn preference_v1alpha1(o: VersionedTemplate) -> Result<VersionedTemplate, DecodeError> {
    from_v1alpha1(TemplateKind::Preference, o)
}

pub(crate) fn cluster_preference_v1alpha1(
    o: VersionedTemplate,
) -> Result<VersionedTemplate, DecodeError> {
    from_v1alpha1(TemplateKind::ClusterPreference, o)
}

pub(crate) fn instancetype_v1alpha2(o: VersionedTemplate) -> Result<VersionedTemplate, DecodeError> {
    from_v1alpha2(TemplateKind::Instancetype, o)
}

pub(crate) fn cluster_instancetype_v1alpha2(
    o: VersionedTemplate,
) -> Result<VersionedTemplate, DecodeError> {
    from_v1alpha2(TemplateKind::ClusterInstancetype, o)
}

pub(crate) fn preference_v1alpha2(o: VersionedTemplate) -> Result<VersionedTemplate, DecodeError> {
    from_v1alpha2(TemplateKind::Preference, o)
}

pub(crate) fn cluster_preference_v1alpha2(
    o: VersionedTemplate,
) -> Result<VersionedTemplate, DecodeError> {
    from_v1alpha2(TemplateKind::ClusterPreference, o)
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

/// Alpha encodings use `false` for unset
fn flag(set: bool) -> Option<bool> {
    set.then_some(true)
}

pub(crate) fn instancetype_spec(spec: v1alpha2::InstancetypeSpec) -> v1beta1::InstancetypeSpec {
    v1beta1::InstancetypeSpec {
        node_selector: spec.node_selector,
        scheduler_name: non_empty(spec.scheduler_name),
        cpu: v1beta1::CpuInstancetype {
            guest: spec.cpu.guest,
            model: non_empty(spec.cpu.model),
            dedicated_cpu_placement: flag(spec.cpu.dedicated_cpu_placement),
            isolate_emulator_thread: flag(spec.cpu.isolate_emulator_thread),
            max_sockets: None,
        },
        memory: v1beta1::MemoryInstancetype {
            guest: spec.memory.guest,
            hugepages: spec.memory.hugepages,
            overcommit_percent: spec.memory.overcommit_percent,
            max_guest: None,
        },
        gpus: spec.gpus,
        host_devices: spec.host_devices,
        io_threads_policy: spec.io_threads_policy,
        annotations: BTreeMap::new(),
    }
}

pub(crate) fn preference_spec(spec: v1alpha2::PreferenceSpec) -> v1beta1::PreferenceSpec {
    v1beta1::PreferenceSpec {
        cpu: spec.cpu.map(|cpu| v1beta1::CpuPreferences {
            preferred_cpu_topology: topology(cpu.preferred_cpu_topology),
            spread_options: None,
            preferred_cpu_features: cpu.preferred_cpu_features,
        }),
        devices: spec.devices,
        firmware: spec.firmware,
        machine: spec.machine,
        preferred_subdomain: spec.preferred_subdomain,
        preferred_termination_grace_period_seconds: spec.preferred_termination_grace_period_seconds,
        requirements: None,
        annotations: BTreeMap::new(),
        prefer_spread_socket_to_core_ratio: 0,
    }
}

/// Keeps the alpha spelling so the decoded value reads back as written
fn topology(t: v1alpha2::PreferredCpuTopology) -> Option<v1beta1::PreferredCpuTopology> {
    use v1alpha2::PreferredCpuTopology as Alpha;
    use v1beta1::PreferredCpuTopology as Beta;

    match t {
        Alpha::Unset => None,
        Alpha::PreferSockets => Some(Beta::DeprecatedPreferSockets),
        Alpha::PreferCores => Some(Beta::DeprecatedPreferCores),
        Alpha::PreferThreads => Some(Beta::DeprecatedPreferThreads),
    }
}
