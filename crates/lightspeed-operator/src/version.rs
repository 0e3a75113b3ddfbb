//! OpenShift documentation version resolution
//!
//! Maps the cluster's OpenShift version (or an explicit override) onto one of
//! the documentation indexes shipped in the RAG image.

use async_trait::async_trait;
use kube::api::{Api, DynamicObject};
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use lightspeed_common::unstructured::nested_str;
use lightspeed_common::Error;

/// Base path of the OpenShift vector databases inside the RAG image
pub const OCP_VECTOR_DB_PATH: &str = "/rag/ocp_vector_db/ocp";

/// Prefix of the OpenShift documentation index names
pub const OCP_INDEX_PREFIX: &str = "ocp-product-docs";

/// Version used for clusters without a dedicated index
pub const OCP_VERSION_LATEST: &str = "latest";

/// Versions with a dedicated index in the RAG image
pub const SUPPORTED_OCP_VERSIONS: [&str; 3] = ["4.16", "4.18", OCP_VERSION_LATEST];

const CLUSTER_VERSION_NAME: &str = "version";

/// Outcome of version resolution
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedVersion {
    /// Version whose index should be used; empty when OCP RAG is disabled
    pub version: String,
    /// True when an unsupported cluster version fell back to `latest`
    pub is_fallback: bool,
}

/// Leading digits of `s` and the remainder
fn split_digits(s: &str) -> (&str, &str) {
    let end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map_or(s.len(), |(i, _)| i);
    s.split_at(end)
}

/// Extract `major.minor` from a full version string.
///
/// `"4.15.0-0.nightly-2024-01-15-123456"` becomes `"4.15"`.
pub fn parse_major_minor(full_version: &str) -> Result<String, Error> {
    let invalid = || {
        Error::configuration(format!("invalid version format: {}", full_version))
    };
    let (major, rest) = split_digits(full_version);
    let rest = rest.strip_prefix('.').ok_or_else(invalid)?;
    let (minor, _) = split_digits(rest);
    if major.is_empty() || minor.is_empty() {
        return Err(invalid());
    }
    Ok(format!("{}.{}", major, minor))
}

/// True for `latest` or a bare `major.minor`
pub fn is_valid_override(version: &str) -> bool {
    version == OCP_VERSION_LATEST
        || parse_major_minor(version).is_ok_and(|parsed| parsed == version)
}

/// Index identifier for a version: `4.16` becomes `ocp-product-docs-4_16`
pub fn index_identifier(version: &str) -> String {
    format!("{}-{}", OCP_INDEX_PREFIX, version.replace('.', "_"))
}

/// Vector DB path for a version: `4.16` becomes `/rag/ocp_vector_db/ocp-4.16`
pub fn vector_db_path(version: &str) -> String {
    format!("{}-{}", OCP_VECTOR_DB_PATH, version)
}

/// True when the RAG image ships a dedicated index for `version`
pub fn is_supported(version: &str) -> bool {
    SUPPORTED_OCP_VERSIONS.contains(&version)
}

/// Decide which documentation version to use.
///
/// A non-empty override is used verbatim. Otherwise the detected version is
/// used when supported, and `latest` (flagged as a fallback) when not.
pub fn resolve_version(
    detected: &str,
    override_version: &str,
    enabled: bool,
) -> Result<ResolvedVersion, Error> {
    if !enabled {
        return Ok(ResolvedVersion {
            version: String::new(),
            is_fallback: false,
        });
    }

    if !override_version.is_empty() {
        return Ok(ResolvedVersion {
            version: override_version.to_string(),
            is_fallback: false,
        });
    }

    if detected.is_empty() {
        return Err(Error::configuration("no OCP version detected"));
    }

    if is_supported(detected) {
        Ok(ResolvedVersion {
            version: detected.to_string(),
            is_fallback: false,
        })
    } else {
        Ok(ResolvedVersion {
            version: OCP_VERSION_LATEST.to_string(),
            is_fallback: true,
        })
    }
}

/// Parse the `major.minor` target version out of a ClusterVersion document.
///
/// `status.desired.version` is used instead of the history so that a cluster in
/// the middle of an upgrade gets documentation for the version it is moving to.
pub fn desired_version(cluster_version: &serde_json::Value) -> Result<String, Error> {
    let version = nested_str(cluster_version, &["status", "desired", "version"])?;
    parse_major_minor(version)
}

/// Source of the cluster's OpenShift version
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterVersionReader: Send + Sync {
    /// `major.minor` version the cluster is running or upgrading to
    async fn detect_cluster_version(&self) -> Result<String, Error>;
}

/// Reads `ClusterVersion/version` from the API server
pub struct ClusterVersionClient {
    client: Client,
}

impl ClusterVersionClient {
    /// Create a reader wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterVersionReader for ClusterVersionClient {
    async fn detect_cluster_version(&self) -> Result<String, Error> {
        let gvk = GroupVersionKind::gvk("config.openshift.io", "v1", "ClusterVersion");
        let ar = ApiResource::from_gvk_with_plural(&gvk, "clusterversions");
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        let obj = api.get(CLUSTER_VERSION_NAME).await?;
        let version = desired_version(&obj.data)?;
        debug!(version = %version, "detected OpenShift cluster version");
        Ok(version)
    }
}
