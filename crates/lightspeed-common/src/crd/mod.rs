//! Custom Resource Definitions used by the OpenStack Lightspeed operator
//!
//! `OpenStackLightspeed` is owned by this operator. The OLM kinds are consumed
//! from the cluster and only partially modelled.

pub mod conditions;
mod lightspeed;
mod olm;

pub use conditions::{Condition, ConditionList, ConditionStatus};
pub use lightspeed::{
    OpenStackLightspeed, OpenStackLightspeedSpec, OpenStackLightspeedStatus,
    DEFAULT_CATALOG_SOURCE_NAME, DEFAULT_CATALOG_SOURCE_NAMESPACE,
    DEFAULT_MAX_TOKENS_FOR_RESPONSE, DEFAULT_RAG_IMAGE,
};
pub use olm::{
    ClusterServiceVersion, ClusterServiceVersionSpec, ClusterServiceVersionStatus, InstallPlan,
    InstallPlanReference, InstallPlanSpec, InstallPlanStatus, Subscription, SubscriptionSpec,
    SubscriptionStatus, CSV_PHASE_SUCCEEDED, INSTALL_PLAN_APPROVAL_MANUAL,
};
