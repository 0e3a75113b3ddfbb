//! Common types for OpenStack Lightspeed: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod telemetry;
pub mod unstructured;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Finalizer placed on OpenStackLightspeed instances and on the OLSConfig they manage
pub const LIGHTSPEED_FINALIZER: &str = "openstack.org/openstacklightspeed";

/// Label on the OLSConfig carrying the UID of the OpenStackLightspeed that manages it
pub const OWNER_ID_LABEL: &str = "openstack.org/lightspeed-owner-id";

/// Field manager name used for server-side apply and patches
pub const FIELD_MANAGER: &str = "openstack-lightspeed-operator";

/// Environment variable carrying the recommended OpenShift Lightspeed operator version
pub const OLS_OPERATOR_VERSION_ENV: &str = "OPENSHIFT_LIGHTSPEED_OPERATOR_VERSION";
