//! Operator Lifecycle Manager types
//!
//! Only the fields the installer reads or writes are modelled. These CRDs belong
//! to OLM, so no schema is generated and writes go out as merge patches.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Manual approval: InstallPlans wait until the operator approves them
pub const INSTALL_PLAN_APPROVAL_MANUAL: &str = "Manual";

/// CSV phase once the operator deployment is up
pub const CSV_PHASE_SUCCEEDED: &str = "Succeeded";

/// Subscription to an operator package from a catalog
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "Subscription",
    plural = "subscriptions",
    namespaced,
    status = "SubscriptionStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSpec {
    /// Catalog channel to follow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Package name in the catalog
    pub name: String,

    /// CatalogSource name
    pub source: String,

    /// CatalogSource namespace
    pub source_namespace: String,

    /// "Automatic" or "Manual"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_plan_approval: Option<String>,

    /// CSV to install first
    #[serde(
        default,
        rename = "startingCSV",
        skip_serializing_if = "Option::is_none"
    )]
    pub starting_csv: Option<String>,
}

/// Reference from a Subscription to the InstallPlan OLM generated for it
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallPlanReference {
    /// InstallPlan name
    pub name: String,
    /// InstallPlan namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Subscription status as reported by OLM
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    /// The InstallPlan currently tracked by the Subscription
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_plan_ref: Option<InstallPlanReference>,

    /// CSV the Subscription wants installed
    #[serde(default, rename = "currentCSV", skip_serializing_if = "Option::is_none")]
    pub current_csv: Option<String>,

    /// CSV that is installed
    #[serde(default, rename = "installedCSV", skip_serializing_if = "Option::is_none")]
    pub installed_csv: Option<String>,

    /// Subscription state (e.g. "UpgradePending", "AtLatestKnown")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// A set of resources OLM will install once approved
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "InstallPlan",
    plural = "installplans",
    namespaced,
    status = "InstallPlanStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct InstallPlanSpec {
    /// CSVs this plan installs
    #[serde(default)]
    pub cluster_service_version_names: Vec<String>,

    /// "Automatic" or "Manual"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<String>,

    /// Whether the plan may proceed
    #[serde(default)]
    pub approved: bool,
}

/// InstallPlan status
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallPlanStatus {
    /// Plan phase (e.g. "RequiresApproval", "Installing", "Complete")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl InstallPlan {
    /// First CSV the plan installs
    pub fn first_csv(&self) -> Option<&str> {
        self.spec
            .cluster_service_version_names
            .first()
            .map(String::as_str)
    }
}

/// An installed operator version
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "ClusterServiceVersion",
    plural = "clusterserviceversions",
    shortname = "csv",
    namespaced,
    status = "ClusterServiceVersionStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterServiceVersionSpec {
    /// Human-readable operator name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Semantic version of the operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// CSV status
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterServiceVersionStatus {
    /// Install phase (e.g. "Pending", "Installing", "Succeeded", "Failed")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Reason for the current phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ClusterServiceVersion {
    /// True once OLM reports the CSV as Succeeded
    pub fn succeeded(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .is_some_and(|p| p == CSV_PHASE_SUCCEEDED)
    }

    /// Owner references on the CSV, empty when none are set
    pub fn owner_references(&self) -> &[OwnerReference] {
        self.metadata.owner_references.as_deref().unwrap_or_default()
    }
}
