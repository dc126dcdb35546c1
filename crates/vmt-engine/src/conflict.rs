//! Template application with conflict detection
//!
//! Applies an instance type and a preference onto a workload's instance
//! template. Precedence is fixed: a value the user set on the workload wins,
//! then the instance type, then the preference.
//!
//! Instance type fields never overwrite: a field already set on the workload
//! is reported as a conflict and left untouched. Preference fields only fill
//! gaps and never conflict.

use std::collections::{BTreeMap, BTreeSet};
use vmt_api::instancetype::common::CpuFeature;
use vmt_api::instancetype::v1beta1::{
    InstancetypeSpec, PreferenceSpec, PreferredCpuTopology, SpreadAcross,
};
use vmt_api::{
    Bios, Bootloader, Cpu, Efi, FieldPath, Firmware, InstanceSpec, Machine, Memory, Quantity,
    TemplateMeta,
};

/// Default sockets per core when spreading
const DEFAULT_SPREAD_RATIO: u32 = 2;

/// Ordered, deduplicated list of conflicting field paths
#[derive(Debug, Clone, Default, PartialEq, Eq, thiserror::Error)]
#[error("VM field(s) {} conflicts with selected instance type", join(.0))]
pub struct Conflicts(Vec<FieldPath>);

impl Conflicts {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Record a path unless already present
    pub fn push(&mut self, path: FieldPath) {
        if !self.0.contains(&path) {
            self.0.push(path);
        }
    }

    pub fn extend(&mut self, paths: impl IntoIterator<Item = FieldPath>) {
        for path in paths {
            self.push(path);
        }
    }

    #[inline]
    #[must_use]
    pub fn paths(&self) -> &[FieldPath] {
        &self.0
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `Ok(())` when nothing conflicts
    ///
    /// # Errors
    /// Returns `self` when at least one path conflicts.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

fn join(paths: &[FieldPath]) -> String {
    paths
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Preference requirement not satisfied
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failure checking preference requirements at {path}: {message}")]
pub struct RequirementError {
    pub path: FieldPath,
    pub message: String,
}

/// Applies templates onto an instance template and reports conflicts
#[derive(Debug, Clone)]
pub struct ConflictDetector {
    spec_base: FieldPath,
    metadata_base: FieldPath,
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new(FieldPath::template_spec(), FieldPath::template_metadata())
    }
}

impl ConflictDetector {
    /// Create detector reporting paths under the given roots
    #[must_use]
    pub fn new(spec_base: FieldPath, metadata_base: FieldPath) -> Self {
        Self {
            spec_base,
            metadata_base,
        }
    }

    /// Apply templates and return the conflicting paths
    ///
    /// An empty result means everything applied. Conflicting fields are left
    /// as the workload had them.
    pub fn apply_and_detect(
        &self,
        instancetype: Option<&InstancetypeSpec>,
        preference: Option<&PreferenceSpec>,
        spec: &mut InstanceSpec,
        meta: &mut TemplateMeta,
    ) -> Conflicts {
        let mut conflicts = Conflicts::new();
        if let Some(instancetype) = instancetype {
            self.apply_cpu(instancetype, preference, spec, &mut conflicts);
            self.apply_memory(instancetype, spec, &mut conflicts);
            self.apply_scheduling(instancetype, spec, &mut conflicts);
            self.apply_devices(instancetype, spec, &mut conflicts);
            self.apply_annotations(&instancetype.annotations, meta, &mut conflicts);
        }
        if let Some(preference) = preference {
            apply_preference(preference, spec, meta);
        }
        conflicts
    }

    /// Report conflicts without touching the workload
    #[must_use]
    pub fn detect(
        &self,
        instancetype: Option<&InstancetypeSpec>,
        preference: Option<&PreferenceSpec>,
        spec: &InstanceSpec,
        meta: &TemplateMeta,
    ) -> Conflicts {
        let mut spec = spec.clone();
        let mut meta = meta.clone();
        self.apply_and_detect(instancetype, preference, &mut spec, &mut meta)
    }

    /// Check a preference's minimum guest resources
    ///
    /// Measured against the instance type when there is one, otherwise
    /// against the workload itself.
    ///
    /// # Errors
    /// Returns [`RequirementError`] for the first unmet requirement.
    pub fn check_requirements(
        &self,
        instancetype: Option<&InstancetypeSpec>,
        preference: &PreferenceSpec,
        spec: &InstanceSpec,
    ) -> Result<(), RequirementError> {
        let Some(requirements) = &preference.requirements else {
            return Ok(());
        };
        let instancetype_path = FieldPath::new(["spec", "instancetype"]);
        let domain = self.spec_base.child("domain");

        if let Some(required) = &requirements.cpu {
            let (provided, path, source) = match instancetype {
                Some(it) => (it.cpu.guest, instancetype_path.clone(), "instance type"),
                None => (
                    spec.domain.cpu.as_ref().map_or(1, Cpu::vcpus),
                    domain.child("cpu"),
                    "VirtualMachine",
                ),
            };
            if provided < required.guest {
                return Err(RequirementError {
                    path,
                    message: format!(
                        "insufficient CPU resources of {provided} vCPU provided by {source}, preference requires {} vCPU",
                        required.guest
                    ),
                });
            }
        }

        if let Some(required) = &requirements.memory {
            let (provided, path, source) = match instancetype {
                Some(it) => (Some(&it.memory.guest), instancetype_path, "instance type"),
                None => (
                    spec.domain.memory.as_ref().and_then(|m| m.guest.as_ref()),
                    domain.extend(&["memory", "guest"]),
                    "VirtualMachine",
                ),
            };
            if provided.map_or(true, |p| *p < required.guest) {
                let provided = provided.map_or("no", Quantity::as_str);
                return Err(RequirementError {
                    path,
                    message: format!(
                        "insufficient Memory resources of {provided} provided by {source}, preference requires {}",
                        required.guest
                    ),
                });
            }
        }
        Ok(())
    }

    fn apply_cpu(
        &self,
        instancetype: &InstancetypeSpec,
        preference: Option<&PreferenceSpec>,
        spec: &mut InstanceSpec,
        conflicts: &mut Conflicts,
    ) {
        let domain = self.spec_base.child("domain");
        let mut found = Vec::new();
        if spec.domain.resources.requests.contains_key("cpu") {
            found.push(domain.extend(&["resources", "requests", "cpu"]));
        }
        if spec.domain.resources.limits.contains_key("cpu") {
            found.push(domain.extend(&["resources", "limits", "cpu"]));
        }
        if let Some(cpu) = &spec.domain.cpu {
            let set = [
                ("sockets", cpu.sockets != 0),
                ("cores", cpu.cores != 0),
                ("threads", cpu.threads != 0),
                ("model", cpu.model.is_some()),
                ("dedicatedCpuPlacement", cpu.dedicated_cpu_placement),
                ("isolateEmulatorThread", cpu.isolate_emulator_thread),
            ];
            found.extend(
                set.into_iter()
                    .filter(|(_, is_set)| *is_set)
                    .map(|(field, _)| domain.extend(&["cpu", field])),
            );
        }
        if !found.is_empty() {
            conflicts.extend(found);
            return;
        }

        let (sockets, cores, threads) = topology(instancetype.cpu.guest, preference);
        let cpu = spec.domain.cpu.get_or_insert_with(Cpu::default);
        cpu.sockets = sockets;
        cpu.cores = cores;
        cpu.threads = threads;
        cpu.model.clone_from(&instancetype.cpu.model);
        cpu.dedicated_cpu_placement = instancetype.cpu.dedicated_cpu_placement == Some(true);
        cpu.isolate_emulator_thread = instancetype.cpu.isolate_emulator_thread == Some(true);
    }

    fn apply_memory(
        &self,
        instancetype: &InstancetypeSpec,
        spec: &mut InstanceSpec,
        conflicts: &mut Conflicts,
    ) {
        let domain = self.spec_base.child("domain");
        let mut found = Vec::new();
        if spec.domain.memory.as_ref().is_some_and(|m| m.guest.is_some()) {
            found.push(domain.extend(&["memory", "guest"]));
        }
        if spec.domain.resources.requests.contains_key("memory") {
            found.push(domain.extend(&["resources", "requests", "memory"]));
        }
        if spec.domain.resources.limits.contains_key("memory") {
            found.push(domain.extend(&["resources", "limits", "memory"]));
        }
        if !found.is_empty() {
            conflicts.extend(found);
            return;
        }

        let memory = spec.domain.memory.get_or_insert_with(Memory::default);
        memory.guest = Some(instancetype.memory.guest.clone());
        if let Some(hugepages) = &instancetype.memory.hugepages {
            memory.hugepages = Some(hugepages.clone());
        }

        let percent = u128::from(instancetype.memory.overcommit_percent.min(100));
        if percent > 0 {
            match instancetype.memory.guest.value() {
                Ok(bytes) => {
                    let request = bytes * (100 - percent) / 100;
                    spec.domain
                        .resources
                        .requests
                        .insert("memory".to_string(), Quantity::from_units(request));
                }
                Err(e) => tracing::warn!(error = %e, "cannot apply memory overcommit"),
            }
        }
    }

    fn apply_scheduling(
        &self,
        instancetype: &InstancetypeSpec,
        spec: &mut InstanceSpec,
        conflicts: &mut Conflicts,
    ) {
        if !instancetype.node_selector.is_empty() {
            if spec.node_selector.is_empty() {
                spec.node_selector.clone_from(&instancetype.node_selector);
            } else {
                conflicts.push(self.spec_base.child("nodeSelector"));
            }
        }

        if let Some(scheduler) = &instancetype.scheduler_name {
            if spec.scheduler_name.is_some() {
                conflicts.push(self.spec_base.child("schedulerName"));
            } else {
                spec.scheduler_name = Some(scheduler.clone());
            }
        }

        if let Some(policy) = &instancetype.io_threads_policy {
            if spec.domain.io_threads_policy.is_some() {
                conflicts.push(self.spec_base.extend(&["domain", "ioThreadsPolicy"]));
            } else {
                spec.domain.io_threads_policy = Some(policy.clone());
            }
        }
    }

    fn apply_devices(
        &self,
        instancetype: &InstancetypeSpec,
        spec: &mut InstanceSpec,
        conflicts: &mut Conflicts,
    ) {
        let devices = &mut spec.domain.devices;
        if !instancetype.gpus.is_empty() {
            if devices.gpus.is_empty() {
                devices.gpus.clone_from(&instancetype.gpus);
            } else {
                conflicts.push(self.spec_base.extend(&["domain", "devices", "gpus"]));
            }
        }
        if !instancetype.host_devices.is_empty() {
            if devices.host_devices.is_empty() {
                devices.host_devices.clone_from(&instancetype.host_devices);
            } else {
                conflicts.push(self.spec_base.extend(&["domain", "devices", "hostDevices"]));
            }
        }
    }

    fn apply_annotations(
        &self,
        annotations: &BTreeMap<String, String>,
        meta: &mut TemplateMeta,
        conflicts: &mut Conflicts,
    ) {
        for (key, value) in annotations {
            match meta.annotations.get(key) {
                Some(existing) if existing != value => {
                    conflicts.push(self.metadata_base.extend(&["annotations", key.as_str()]));
                }
                Some(_) => {}
                None => {
                    meta.annotations.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

/// Sockets, cores and threads for `guest` vCPUs
fn topology(guest: u32, preference: Option<&PreferenceSpec>) -> (u32, u32, u32) {
    let preferred = preference
        .and_then(PreferenceSpec::preferred_topology)
        .map_or(PreferredCpuTopology::Sockets, PreferredCpuTopology::normalized);

    match preferred {
        PreferredCpuTopology::Cores => (1, guest, 1),
        PreferredCpuTopology::Threads => (1, 1, guest),
        PreferredCpuTopology::Spread => spread(guest, preference),
        _ => (guest, 1, 1),
    }
}

fn spread(guest: u32, preference: Option<&PreferenceSpec>) -> (u32, u32, u32) {
    let options = preference
        .and_then(|p| p.cpu.as_ref())
        .and_then(|c| c.spread_options.as_ref());
    let ratio = options
        .and_then(|o| o.ratio)
        .or_else(|| {
            preference
                .map(|p| p.prefer_spread_socket_to_core_ratio)
                .filter(|r| *r != 0)
        })
        .unwrap_or(DEFAULT_SPREAD_RATIO);
    let across = options.and_then(|o| o.across).unwrap_or_default();

    // Uneven splits fall back to one socket per vCPU
    let split = |per_unit: u32| {
        (per_unit != 0 && guest >= per_unit && guest % per_unit == 0).then(|| guest / per_unit)
    };
    match across {
        SpreadAcross::SocketsCores => split(ratio).map(|sockets| (sockets, ratio, 1)),
        SpreadAcross::SocketsCoresThreads => ratio
            .checked_mul(2)
            .and_then(split)
            .map(|sockets| (sockets, ratio, 2)),
        SpreadAcross::CoresThreads => split(ratio).map(|cores| (1, cores, ratio)),
    }
    .unwrap_or((guest, 1, 1))
}

fn apply_preference(preference: &PreferenceSpec, spec: &mut InstanceSpec, meta: &mut TemplateMeta) {
    if let Some(cpu) = &preference.cpu {
        if !cpu.preferred_cpu_features.is_empty() {
            let target = spec.domain.cpu.get_or_insert_with(Cpu::default);
            let present: BTreeSet<String> =
                target.features.iter().map(|f| f.name.clone()).collect();
            target.features.extend(
                cpu.preferred_cpu_features
                    .iter()
                    .filter(|f| !present.contains(&f.name))
                    .cloned()
                    .map(|f| CpuFeature {
                        policy: if f.policy.is_empty() { "require".to_string() } else { f.policy },
                        ..f
                    }),
            );
        }
    }

    if let Some(devices) = &preference.devices {
        let target = &mut spec.domain.devices;
        fill(&mut target.autoattach_graphics_device, devices.preferred_autoattach_graphics_device);
        fill(&mut target.autoattach_mem_balloon, devices.preferred_autoattach_mem_balloon);
        fill(&mut target.autoattach_serial_console, devices.preferred_autoattach_serial_console);
        if !devices.preferred_disk_bus.is_empty() {
            for disk in target.disks.iter_mut().filter(|d| d.bus.is_none()) {
                disk.bus = Some(devices.preferred_disk_bus.clone());
            }
        }
        if !devices.preferred_interface_model.is_empty() {
            for iface in target.interfaces.iter_mut().filter(|i| i.model.is_none()) {
                iface.model = Some(devices.preferred_interface_model.clone());
            }
        }
    }

    if let Some(firmware) = &preference.firmware {
        match spec.domain.firmware.as_mut().and_then(|f| f.bootloader.as_mut()) {
            Some(bootloader) => {
                if let Some(efi) = bootloader.efi.as_mut() {
                    fill(&mut efi.secure_boot, firmware.preferred_use_secure_boot);
                }
            }
            None => {
                let bootloader = if firmware.preferred_use_efi == Some(true) {
                    Some(Bootloader {
                        bios: None,
                        efi: Some(Efi {
                            secure_boot: firmware.preferred_use_secure_boot,
                        }),
                    })
                } else if firmware.preferred_use_bios == Some(true) {
                    Some(Bootloader {
                        bios: Some(Bios {}),
                        efi: None,
                    })
                } else {
                    None
                };
                if bootloader.is_some() {
                    spec.domain.firmware.get_or_insert_with(Firmware::default).bootloader = bootloader;
                }
            }
        }
    }

    if let Some(machine) = &preference.machine {
        if !machine.preferred_machine_type.is_empty()
            && spec.domain.machine.as_ref().map_or(true, |m| m.machine_type.is_empty())
        {
            spec.domain.machine = Some(Machine {
                machine_type: machine.preferred_machine_type.clone(),
            });
        }
    }

    if spec.subdomain.is_none() {
        spec.subdomain.clone_from(&preference.preferred_subdomain);
    }
    fill(
        &mut spec.termination_grace_period_seconds,
        preference.preferred_termination_grace_period_seconds,
    );

    for (key, value) in &preference.annotations {
        meta.annotations
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
}

#[inline]
fn fill<T>(target: &mut Option<T>, preferred: Option<T>) {
    if target.is_none() {
        *target = preferred;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use vmt_api::instancetype::common::{DevicePreferences, FirmwarePreferences, Gpu};
    use vmt_api::instancetype::v1beta1::{
        CpuPreferences, CpuRequirement, MemoryRequirement, PreferenceRequirements, SpreadOptions,
    };
    use vmt_api::Disk;

    fn q(s: &str) -> Quantity {
        Quantity::parse(s).unwrap()
    }

    fn instancetype(guest: u32) -> InstancetypeSpec {
        InstancetypeSpec::new(guest, q("1Gi"))
    }

    fn with_topology(topology: PreferredCpuTopology) -> PreferenceSpec {
        PreferenceSpec {
            cpu: Some(CpuPreferences {
                preferred_cpu_topology: Some(topology),
                ..CpuPreferences::default()
            }),
            ..PreferenceSpec::default()
        }
    }

    fn apply(
        it: Option<&InstancetypeSpec>,
        pref: Option<&PreferenceSpec>,
        spec: &mut InstanceSpec,
    ) -> Conflicts {
        ConflictDetector::default().apply_and_detect(it, pref, spec, &mut TemplateMeta::default())
    }

    #[test]
    fn clean_workload_takes_instancetype() {
        let mut spec = InstanceSpec::default();
        let conflicts = apply(Some(&instancetype(4)), None, &mut spec);
        assert!(conflicts.is_empty());

        let cpu = spec.domain.cpu.unwrap();
        assert_eq!((cpu.sockets, cpu.cores, cpu.threads), (4, 1, 1));
        assert_eq!(spec.domain.memory.unwrap().guest, Some(q("1Gi")));
    }

    #[test]
    fn user_values_conflict_and_survive() {
        let mut spec = InstanceSpec::default();
        spec.domain.cpu = Some(Cpu {
            cores: 3,
            ..Cpu::default()
        });
        spec.domain.resources.requests.insert("memory".into(), q("2Gi"));

        let conflicts = apply(Some(&instancetype(4)), None, &mut spec);
        let paths: Vec<String> = conflicts.paths().iter().map(ToString::to_string).collect();
        assert_eq!(
            paths,
            vec![
                "spec.template.spec.domain.cpu.cores",
                "spec.template.spec.domain.resources.requests.memory",
            ]
        );
        assert_eq!(spec.domain.cpu.unwrap().cores, 3);
        assert!(spec.domain.memory.is_none());
        assert_eq!(
            conflicts.to_string(),
            "VM field(s) spec.template.spec.domain.cpu.cores, spec.template.spec.domain.resources.requests.memory conflicts with selected instance type"
        );
    }

    #[test]
    fn detect_leaves_input_untouched() {
        let spec = InstanceSpec::default();
        let conflicts = ConflictDetector::default().detect(
            Some(&instancetype(2)),
            None,
            &spec,
            &TemplateMeta::default(),
        );
        assert!(conflicts.is_empty());
        assert_eq!(spec, InstanceSpec::default());
    }

    #[test]
    fn topology_follows_preference() {
        let cases = [
            (PreferredCpuTopology::Cores, (1, 4, 1)),
            (PreferredCpuTopology::DeprecatedPreferCores, (1, 4, 1)),
            (PreferredCpuTopology::Threads, (1, 1, 4)),
            (PreferredCpuTopology::Any, (4, 1, 1)),
            (PreferredCpuTopology::Spread, (2, 2, 1)),
        ];
        for (preferred, expected) in cases {
            let mut spec = InstanceSpec::default();
            apply(Some(&instancetype(4)), Some(&with_topology(preferred)), &mut spec);
            let cpu = spec.domain.cpu.unwrap();
            assert_eq!((cpu.sockets, cpu.cores, cpu.threads), expected, "{preferred:?}");
        }
    }

    #[test]
    fn spread_ratio_sources() {
        let mut preference = with_topology(PreferredCpuTopology::Spread);
        preference.prefer_spread_socket_to_core_ratio = 3;
        assert_eq!(topology(6, Some(&preference)), (2, 3, 1));

        if let Some(cpu) = preference.cpu.as_mut() {
            cpu.spread_options = Some(SpreadOptions {
                across: Some(SpreadAcross::SocketsCoresThreads),
                ratio: Some(2),
            });
        }
        assert_eq!(topology(8, Some(&preference)), (2, 2, 2));
        assert_eq!(topology(3, Some(&preference)), (3, 1, 1));
    }

    #[test]
    fn overcommit_lowers_memory_request() {
        let mut it = instancetype(1);
        it.memory.overcommit_percent = 25;
        let mut spec = InstanceSpec::default();
        apply(Some(&it), None, &mut spec);
        assert_eq!(spec.domain.resources.requests.get("memory"), Some(&q("768Mi")));
    }

    #[test]
    fn scheduling_and_devices_conflict_when_set() {
        let mut it = instancetype(1);
        it.node_selector = BTreeMap::from([("zone".to_string(), "a".to_string())]);
        it.scheduler_name = Some("custom".into());
        it.io_threads_policy = Some("auto".into());
        it.gpus = vec![Gpu {
            name: "g".into(),
            device_name: "nvidia".into(),
        }];

        let mut spec = InstanceSpec::default();
        assert!(apply(Some(&it), None, &mut spec).is_empty());
        assert_eq!(spec.scheduler_name.as_deref(), Some("custom"));
        assert_eq!(spec.domain.devices.gpus.len(), 1);

        let mut spec = InstanceSpec::default();
        spec.node_selector.insert("zone".into(), "b".into());
        spec.scheduler_name = Some("mine".into());
        spec.domain.io_threads_policy = Some("shared".into());
        spec.domain.devices.gpus = it.gpus.clone();
        let conflicts = apply(Some(&it), None, &mut spec);
        assert_eq!(conflicts.len(), 4);
        assert_eq!(spec.scheduler_name.as_deref(), Some("mine"));
    }

    #[test]
    fn annotations_conflict_only_on_different_value() {
        let mut it = instancetype(1);
        it.annotations = BTreeMap::from([
            ("same".to_string(), "v".to_string()),
            ("differs".to_string(), "a".to_string()),
            ("new".to_string(), "n".to_string()),
        ]);
        let mut meta = TemplateMeta::default();
        meta.annotations.insert("same".into(), "v".into());
        meta.annotations.insert("differs".into(), "b".into());

        let conflicts = ConflictDetector::default().apply_and_detect(
            Some(&it),
            None,
            &mut InstanceSpec::default(),
            &mut meta,
        );
        assert_eq!(conflicts.len(), 1);
        assert_eq!(
            conflicts.paths()[0].to_string(),
            "spec.template.metadata.annotations.differs"
        );
        assert_eq!(meta.annotations.get("new").map(String::as_str), Some("n"));
        assert_eq!(meta.annotations.get("differs").map(String::as_str), Some("b"));
    }

    #[test]
    fn preferences_fill_gaps_only() {
        let preference = PreferenceSpec {
            devices: Some(DevicePreferences {
                preferred_disk_bus: "virtio".into(),
                preferred_autoattach_serial_console: Some(false),
                ..DevicePreferences::default()
            }),
            firmware: Some(FirmwarePreferences {
                preferred_use_efi: Some(true),
                preferred_use_secure_boot: Some(true),
                ..FirmwarePreferences::default()
            }),
            preferred_subdomain: Some("pref".into()),
            preferred_termination_grace_period_seconds: Some(30),
            ..PreferenceSpec::default()
        };

        let mut spec = InstanceSpec::default();
        spec.subdomain = Some("mine".into());
        spec.domain.devices.disks = vec![
            Disk {
                name: "root".into(),
                bus: None,
            },
            Disk {
                name: "data".into(),
                bus: Some("sata".into()),
            },
        ];

        assert!(apply(None, Some(&preference), &mut spec).is_empty());
        assert_eq!(spec.domain.devices.disks[0].bus.as_deref(), Some("virtio"));
        assert_eq!(spec.domain.devices.disks[1].bus.as_deref(), Some("sata"));
        assert_eq!(spec.domain.devices.autoattach_serial_console, Some(false));
        assert_eq!(spec.subdomain.as_deref(), Some("mine"));
        assert_eq!(spec.termination_grace_period_seconds, Some(30));
        let efi = spec
            .domain
            .firmware
            .and_then(|f| f.bootloader)
            .and_then(|b| b.efi)
            .unwrap();
        assert_eq!(efi.secure_boot, Some(true));
    }

    #[test]
    fn requirements_against_instancetype_and_workload() {
        let detector = ConflictDetector::default();
        let preference = PreferenceSpec {
            requirements: Some(PreferenceRequirements {
                cpu: Some(CpuRequirement { guest: 2 }),
                memory: Some(MemoryRequirement { guest: q("1Gi") }),
            }),
            ..PreferenceSpec::default()
        };

        assert!(detector
            .check_requirements(Some(&instancetype(2)), &preference, &InstanceSpec::default())
            .is_ok());

        let err = detector
            .check_requirements(Some(&instancetype(1)), &preference, &InstanceSpec::default())
            .unwrap_err();
        assert_eq!(err.path.to_string(), "spec.instancetype");

        let mut spec = InstanceSpec::default();
        spec.domain.cpu = Some(Cpu {
            sockets: 2,
            ..Cpu::default()
        });
        let err = detector.check_requirements(None, &preference, &spec).unwrap_err();
        assert_eq!(err.path.to_string(), "spec.template.spec.domain.memory.guest");

        spec.domain.memory = Some(Memory {
            guest: Some(q("1024Mi")),
            hugepages: None,
        });
        assert!(detector.check_requirements(None, &preference, &spec).is_ok());
    }

    #[test]
    fn conflicts_deduplicate() {
        let mut conflicts = Conflicts::new();
        conflicts.push(FieldPath::new(["a"]));
        conflicts.push(FieldPath::new(["b"]));
        conflicts.push(FieldPath::new(["a"]));
        assert_eq!(conflicts.len(), 2);
        assert!(conflicts.into_result().is_err());
        assert!(Conflicts::new().into_result().is_ok());
    }

    proptest! {
        #[test]
        fn topology_preserves_vcpu_count(guest in 1u32..256, ratio in 1u32..8) {
            let mut preference = with_topology(PreferredCpuTopology::Spread);
            preference.prefer_spread_socket_to_core_ratio = ratio;
            let (s, c, t) = topology(guest, Some(&preference));
            prop_assert_eq!(s * c * t, guest);
        }
    }
}
