//! Testing utilities for the VMT workspace
//!
//! Template fixtures at every schema version, legacy snapshot payloads,
//! workloads and a seeded in-memory store.

#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]

use serde_json::{json, Value};
use std::sync::Arc;
use vmt_api::instancetype::v1alpha1::SpecRevision;
use vmt_api::instancetype::v1beta1::{
    CpuPreferences, InstancetypeSpec, PreferenceSpec, PreferredCpuTopology,
};
use vmt_api::instancetype::Object;
use vmt_api::{
    snapshot_labels, ObjectKey, ObjectMeta, OwnerReference, Quantity, SchemaVersion, Snapshot,
    Template, TemplateKind, TemplateReference, Workload,
};
use vmt_store::{InMemoryStore, ObjectStore};

pub const NAMESPACE: &str = "ns";

/// Template identity: uid `{name}-uid`, generation 1
pub fn identity(name: &str) -> ObjectMeta {
    ObjectMeta::named(name)
        .with_uid(format!("{name}-uid"))
        .with_generation(1)
}

fn scoped(kind: TemplateKind, meta: ObjectMeta) -> ObjectMeta {
    if kind.is_cluster_scoped() {
        meta
    } else {
        meta.with_namespace(NAMESPACE)
    }
}

/// Canonical instance type of either scope
pub fn instancetype(kind: TemplateKind, name: &str, guest: u32, memory: &str) -> Template {
    let object = Object::new(
        SchemaVersion::CANONICAL,
        kind,
        scoped(kind, identity(name)),
        InstancetypeSpec::new(guest, Quantity::parse(memory).unwrap()),
    );
    if kind.is_cluster_scoped() {
        Template::ClusterInstancetype(object)
    } else {
        Template::Instancetype(object)
    }
}

/// Canonical preference of either scope with a CPU topology preference
pub fn preference(kind: TemplateKind, name: &str, topology: PreferredCpuTopology) -> Template {
    let spec = PreferenceSpec {
        cpu: Some(CpuPreferences {
            preferred_cpu_topology: Some(topology),
            ..CpuPreferences::default()
        }),
        ..PreferenceSpec::default()
    };
    let object = Object::new(SchemaVersion::CANONICAL, kind, scoped(kind, identity(name)), spec);
    if kind.is_cluster_scoped() {
        Template::ClusterPreference(object)
    } else {
        Template::Preference(object)
    }
}

/// Full object payload written at a legacy version
///
/// Instance types get 2 vCPUs and 128Mi; preferences prefer sockets.
pub fn legacy_object(version: SchemaVersion, kind: TemplateKind, name: &str) -> Value {
    let spec = match kind.family() {
        vmt_api::Family::Instancetype => json!({
            "cpu": {"guest": 2},
            "memory": {"guest": "128Mi"}
        }),
        vmt_api::Family::Preference => json!({
            "cpu": {"preferredCPUTopology": "preferSockets"}
        }),
    };
    json!({
        "apiVersion": version.api_version(),
        "kind": kind.as_str(),
        "metadata": {"name": name, "uid": format!("{name}-uid"), "generation": 1},
        "spec": spec
    })
}

/// Wrapped-spec envelope holding `spec`
pub fn envelope(api_version: &str, spec: &Value) -> Value {
    serde_json::to_value(SpecRevision::wrap(api_version, spec).unwrap()).unwrap()
}

/// Envelope of a 2 vCPU, 128Mi instance type
pub fn instancetype_envelope(api_version: &str) -> Value {
    envelope(
        api_version,
        &json!({"cpu": {"guest": 2}, "memory": {"guest": "128Mi"}}),
    )
}

/// Envelope of a preference with the given legacy topology spelling
pub fn preference_envelope(api_version: &str, topology: &str) -> Value {
    envelope(api_version, &json!({"cpu": {"preferredCPUTopology": topology}}))
}

/// Snapshot as an older release would have stored it
///
/// Labelled for `identity`, `kind` and `version`; `None` omits the version
/// label entirely.
pub fn stored_snapshot(
    name: &str,
    kind: TemplateKind,
    version: Option<SchemaVersion>,
    identity: &ObjectMeta,
    data: Value,
    owners: Vec<OwnerReference>,
) -> Snapshot {
    let mut meta = ObjectMeta::named(name).with_namespace(NAMESPACE);
    meta.labels = snapshot_labels(kind, version.unwrap_or(SchemaVersion::V1alpha1), identity);
    if version.is_none() {
        meta.labels.remove(vmt_api::LABEL_OBJECT_VERSION);
    }
    meta.owner_references = owners;
    Snapshot::new(meta, data)
}

/// Workload in [`NAMESPACE`] with uid `{name}-uid`
pub fn workload(name: &str) -> Workload {
    Workload::new(NAMESPACE, name, format!("{name}-uid"))
}

/// Reference by lowercase kind, as users write them
pub fn reference(kind: TemplateKind, name: &str) -> TemplateReference {
    TemplateReference::new(name, kind.singular())
}

pub fn snapshot_key(name: &str) -> ObjectKey {
    ObjectKey::namespaced(NAMESPACE, name)
}

/// In-memory store seeded with templates and workloads
pub async fn seeded_store(templates: Vec<Template>, workloads: Vec<Workload>) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    for template in templates {
        store.put_template(template).await.unwrap();
    }
    for workload in workloads {
        store.put_workload(workload).await.unwrap();
    }
    store
}
