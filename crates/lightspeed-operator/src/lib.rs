//! OpenStack Lightspeed operator
//!
//! Installs the OpenShift Lightspeed operator through OLM and configures it to
//! answer OpenStack questions from an OpenStack documentation RAG image.

#![deny(missing_docs)]

/// Operator-level configuration read at startup
pub mod config;
/// OpenStackLightspeed reconciliation
pub mod controller;
/// Controller wiring and watches
pub mod controller_runner;
/// Vector DB index discovery Job
pub mod index_job;
/// OpenShift Lightspeed operator installation through OLM
pub mod olm;
/// OLSConfig singleton management
pub mod ols_config;
/// Reconciliation phase table
pub mod phase;
/// OpenShift documentation version resolution
pub mod version;

pub use lightspeed_common::{crd, Error, Result};
