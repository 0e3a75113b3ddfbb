//! Checks on the generated OpenStackLightspeed CRD

use kube::CustomResourceExt;
use lightspeed_operator::crd::OpenStackLightspeed;

fn spec_properties() -> serde_json::Value {
    let crd = serde_json::to_value(OpenStackLightspeed::crd()).unwrap();
    crd["spec"]["versions"][0]["schema"]["openAPIV3Schema"]["properties"]["spec"]["properties"]
        .clone()
}

#[test]
fn crd_name_matches_what_the_operator_applies() {
    let crd = OpenStackLightspeed::crd();
    assert_eq!(
        crd.metadata.name.as_deref(),
        Some("openstacklightspeeds.lightspeed.openstack.org")
    );
    assert_eq!(crd.spec.names.short_names, Some(vec!["osls".to_string()]));
}

#[test]
fn spec_uses_wire_field_names() {
    let properties = spec_properties();
    for field in [
        "llmEndpoint",
        "llmEndpointType",
        "llmCredentials",
        "modelName",
        "maxTokensForResponse",
        "ragImage",
        "tlsCACertBundle",
        "catalogSourceName",
        "catalogSourceNamespace",
        "indexDiscovery",
        "enableOCPRAG",
        "ocpVersionOverride",
    ] {
        assert!(properties.get(field).is_some(), "missing spec.{}", field);
    }
}

#[test]
fn status_is_a_subresource_with_ready_column() {
    let crd = OpenStackLightspeed::crd();
    let version = &crd.spec.versions[0];
    assert!(version
        .subresources
        .as_ref()
        .and_then(|s| s.status.as_ref())
        .is_some());
    let columns = version.additional_printer_columns.as_ref().unwrap();
    assert!(columns
        .iter()
        .any(|c| c.json_path.contains("Ready")));
}

#[test]
fn crd_renders_as_yaml() {
    let yaml = serde_yaml::to_string(&OpenStackLightspeed::crd()).unwrap();
    assert!(yaml.contains("kind: CustomResourceDefinition"));
    assert!(yaml.contains("OpenStackLightspeed"));
}
