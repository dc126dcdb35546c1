use pretty_assertions::assert_eq;
use serde_json::json;
use vmt_api::instancetype::v1beta1::{InstancetypeSpec, PreferredCpuTopology};
use vmt_api::{Quantity, SchemaVersion, Template, TemplateKind};
use vmt_engine::{CompatibilityDecoder, DecodeError, VersionedTemplate};
use vmt_test_utils::{
    envelope, instancetype, instancetype_envelope, legacy_object, preference, preference_envelope,
};

fn decoder() -> CompatibilityDecoder {
    CompatibilityDecoder::default()
}

fn small_spec() -> InstancetypeSpec {
    InstancetypeSpec::new(2, Quantity::parse("128Mi").unwrap())
}

#[test]
fn canonical_payload_round_trips() {
    for template in [
        instancetype(TemplateKind::Instancetype, "a", 2, "128Mi"),
        instancetype(TemplateKind::ClusterInstancetype, "b", 4, "1Gi"),
        preference(TemplateKind::Preference, "c", PreferredCpuTopology::Spread),
        preference(TemplateKind::ClusterPreference, "d", PreferredCpuTopology::Cores),
    ] {
        let payload = CompatibilityDecoder::encode(&template).unwrap();
        let decoded = decoder().decode(&payload).unwrap();
        assert_eq!(decoded, template);
    }
}

#[test]
fn instancetype_envelope_with_and_without_version() {
    for version in ["", "instancetype.vmt.io/v1alpha1"] {
        let decoded = decoder().decode(&instancetype_envelope(version)).unwrap();
        assert_eq!(decoded.kind(), TemplateKind::Instancetype);
        assert_eq!(decoded.instancetype_spec(), Some(&small_spec()));
    }
}

#[test]
fn legacy_preference_envelope_keeps_topology() {
    let decoded = decoder()
        .decode(&preference_envelope("", "preferThreads"))
        .unwrap();
    assert_eq!(decoded.kind(), TemplateKind::Preference);
    assert_eq!(
        decoded.preference_spec().unwrap().preferred_topology(),
        Some(PreferredCpuTopology::DeprecatedPreferThreads)
    );

    // Re-encoding writes the spelling that was read
    let payload = CompatibilityDecoder::encode(&decoded).unwrap();
    assert_eq!(payload["spec"]["cpu"]["preferredCPUTopology"], json!("preferThreads"));
}

#[test]
fn envelope_from_later_version_is_rejected() {
    let err = decoder()
        .decode(&envelope("instancetype.vmt.io/v1beta1", &json!({})))
        .unwrap_err();
    assert_eq!(
        err,
        DecodeError::UnsupportedEnvelopeVersion("instancetype.vmt.io/v1beta1".into())
    );
}

#[test]
fn every_legacy_object_reaches_canonical() {
    for version in [SchemaVersion::V1alpha1, SchemaVersion::V1alpha2] {
        for kind in TemplateKind::ALL {
            let payload = legacy_object(version, kind, "t");
            let versioned = decoder().decode_versioned(&payload).unwrap();
            assert_eq!(versioned.version(), version);

            let decoded = decoder().decode(&payload).unwrap();
            assert_eq!(decoded.kind(), kind, "{version:?} {kind}");
            assert_eq!(decoded.metadata().name, "t");
            match &decoded {
                Template::Instancetype(o) | Template::ClusterInstancetype(o) => {
                    assert_eq!(o.spec, small_spec());
                    assert_eq!(o.api_version, SchemaVersion::CANONICAL.api_version());
                }
                Template::Preference(o) | Template::ClusterPreference(o) => {
                    assert_eq!(
                        o.spec.preferred_topology(),
                        Some(PreferredCpuTopology::DeprecatedPreferSockets)
                    );
                }
            }
        }
    }
}

#[test]
fn decoding_canonical_is_idempotent() {
    let template = decoder()
        .decode(&legacy_object(SchemaVersion::V1alpha1, TemplateKind::Preference, "p"))
        .unwrap();
    let once = CompatibilityDecoder::encode(&template).unwrap();
    let twice = CompatibilityDecoder::encode(&decoder().decode(&once).unwrap()).unwrap();
    assert_eq!(once, twice);
    assert!(matches!(
        VersionedTemplate::from_value(&once).unwrap(),
        VersionedTemplate::V1beta1(_)
    ));
}

#[test]
fn unknown_and_malformed_payloads() {
    let err = decoder()
        .decode(&json!({"apiVersion": "apps/v1", "kind": "Deployment", "spec": {}}))
        .unwrap_err();
    assert!(matches!(err, DecodeError::UnknownType { .. }));

    let err = decoder()
        .decode(&json!({
            "apiVersion": "instancetype.vmt.io/v1beta1",
            "kind": "VirtualMachineInstancetype",
            "spec": {"cpu": {"guest": "many"}}
        }))
        .unwrap_err();
    assert!(matches!(err, DecodeError::Malformed(_)));
}
