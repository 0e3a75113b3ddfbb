//! OpenStackLightspeed CRD types
//!
//! An `OpenStackLightspeed` describes the LLM provider and the RAG content the
//! assistant should use. The operator turns it into an OpenShift Lightspeed
//! install plus a patched `OLSConfig`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::conditions::ConditionList;

/// RAG image used when `spec.ragImage` is empty
pub const DEFAULT_RAG_IMAGE: &str = "quay.io/openstack-lightspeed/rag-content:os-docs-2024.2";

/// Token budget used when `spec.maxTokensForResponse` is zero
pub const DEFAULT_MAX_TOKENS_FOR_RESPONSE: u32 = 2048;

/// Catalog the OpenShift Lightspeed operator is installed from by default
pub const DEFAULT_CATALOG_SOURCE_NAME: &str = "redhat-operators";

/// Namespace of the default catalog
pub const DEFAULT_CATALOG_SOURCE_NAMESPACE: &str = "openshift-marketplace";

fn default_catalog_source_name() -> String {
    DEFAULT_CATALOG_SOURCE_NAME.to_string()
}

fn default_catalog_source_namespace() -> String {
    DEFAULT_CATALOG_SOURCE_NAMESPACE.to_string()
}

/// Desired state of the OpenStack Lightspeed assistant
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "lightspeed.openstack.org",
    version = "v1beta1",
    kind = "OpenStackLightspeed",
    plural = "openstacklightspeeds",
    shortname = "osls",
    namespaced,
    status = "OpenStackLightspeedStatus",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Message","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].message"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OpenStackLightspeedSpec {
    /// URL of the LLM provider endpoint
    pub llm_endpoint: String,

    /// Provider type understood by OpenShift Lightspeed (e.g. "openai", "azure_openai")
    pub llm_endpoint_type: String,

    /// Name of the Secret holding the provider credentials
    pub llm_credentials: String,

    /// Model to query
    pub model_name: String,

    /// Maximum number of tokens in a response. Zero means the default.
    #[serde(default)]
    pub max_tokens_for_response: u32,

    /// Container image carrying the OpenStack documentation vector DB. Empty means the default.
    #[serde(default)]
    pub rag_image: String,

    /// ConfigMap holding additional CA certificates for the LLM endpoint
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "tlsCACertBundle")]
    pub tls_ca_cert_bundle: Option<String>,

    /// CatalogSource that provides the OpenShift Lightspeed operator
    #[serde(default = "default_catalog_source_name")]
    pub catalog_source_name: String,

    /// Namespace of the CatalogSource
    #[serde(default = "default_catalog_source_namespace")]
    pub catalog_source_namespace: String,

    /// Discover the vector DB index name by running the RAG image
    #[serde(default)]
    pub index_discovery: bool,

    /// Add the OpenShift product documentation as a second RAG source
    #[serde(default, rename = "enableOCPRAG")]
    pub enable_ocp_rag: bool,

    /// Pin the OpenShift documentation version ("latest" or "major.minor")
    /// instead of following the cluster version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocp_version_override: Option<String>,
}

impl OpenStackLightspeedSpec {
    /// Copy of the spec with empty optional fields replaced by their defaults
    pub fn with_defaults(&self) -> Self {
        let mut spec = self.clone();
        if spec.rag_image.is_empty() {
            spec.rag_image = DEFAULT_RAG_IMAGE.to_string();
        }
        if spec.max_tokens_for_response == 0 {
            spec.max_tokens_for_response = DEFAULT_MAX_TOKENS_FOR_RESPONSE;
        }
        spec
    }

    /// The override, treating an empty string as unset
    pub fn version_override(&self) -> &str {
        self.ocp_version_override.as_deref().unwrap_or_default()
    }
}

/// Observed state of an OpenStackLightspeed
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenStackLightspeedStatus {
    /// Generation most recently acted on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Ready plus one condition per reconciliation concern
    #[serde(default)]
    pub conditions: ConditionList,
}
