//! Status conditions for OpenStackLightspeed
//!
//! Conditions follow Kubernetes conventions. `Ready` is never set directly by
//! the reconciler; it is mirrored from the sub-conditions right before the
//! status is written.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Aggregate readiness of the instance
pub const READY: &str = "Ready";
/// The OLSConfig is configured and healthy
pub const OPENSTACK_LIGHTSPEED_READY: &str = "OpenStackLightspeedReady";
/// The OpenShift Lightspeed operator is installed and its CSV succeeded
pub const OPENSHIFT_LIGHTSPEED_OPERATOR_READY: &str = "OpenShiftLightspeedOperatorReady";
/// OCP documentation version for RAG has been resolved (or RAG is disabled)
pub const OCP_RAG_READY: &str = "OCPRAGReady";

/// Every condition type the instance carries, `Ready` first
pub const ALL_CONDITION_TYPES: [&str; 4] = [
    READY,
    OPENSTACK_LIGHTSPEED_READY,
    OPENSHIFT_LIGHTSPEED_OPERATOR_READY,
    OCP_RAG_READY,
];

/// Machine-readable condition reasons
pub mod reasons {
    /// Initial state before any reconciliation touched the condition
    pub const INIT: &str = "Init";
    /// Waiting on something outside the operator's control
    pub const REQUESTED: &str = "Requested";
    /// The condition is satisfied
    pub const READY: &str = "Ready";
    /// Reconciliation hit an error
    pub const ERROR: &str = "Error";
}

/// Human-readable condition messages
pub mod messages {
    /// Ready: all sub-conditions satisfied
    pub const READY_COMPLETE: &str = "Setup complete";
    /// Ready: initial message
    pub const READY_INIT: &str = "Setup started";
    /// OpenStackLightspeedReady: initial message
    pub const OPENSTACK_LIGHTSPEED_INIT: &str = "OpenStack Lightspeed not started";
    /// OpenStackLightspeedReady: OLSConfig configured and healthy
    pub const OPENSTACK_LIGHTSPEED_READY: &str = "OpenStack Lightspeed created";
    /// OpenStackLightspeedReady: the index discovery pod has not finished
    pub const OPENSTACK_LIGHTSPEED_WAITING_VECTOR_DB: &str =
        "Waiting for OpenStackLightspeed vector DB pod to become ready";
    /// OpenStackLightspeedReady: OLSConfig patched, waiting on OLS to converge
    pub const OPENSTACK_LIGHTSPEED_WAITING_OLS_CONFIG: &str =
        "Waiting for OLSConfig to become ready";
    /// OpenShiftLightspeedOperatorReady: initial message
    pub const OLS_OPERATOR_INIT: &str = "OpenShift Lightspeed operator not started";
    /// OpenShiftLightspeedOperatorReady: install still in progress
    pub const OLS_OPERATOR_WAITING: &str =
        "Waiting for the OpenShift Lightspeed operator to deploy.";
    /// OpenShiftLightspeedOperatorReady: CSV succeeded
    pub const OLS_OPERATOR_READY: &str = "OpenShift Lightspeed operator is ready.";
    /// OCPRAGReady: initial message
    pub const OCP_RAG_INIT: &str = "OCP RAG not started";
    /// OCPRAGReady: feature disabled
    pub const OCP_RAG_DISABLED: &str = "OCP RAG is disabled";
    /// OCPRAGReady: cluster version could not be read
    pub const OCP_RAG_DETECTION_FAILED: &str = "Failed to detect OCP cluster version";
    /// OCPRAGReady: override is neither `latest` nor `major.minor`
    pub const OCP_RAG_INVALID_OVERRIDE: &str = "Invalid OCP RAG version override";

    /// OCPRAGReady: version resolved
    pub fn ocp_rag_resolved(version: &str) -> String {
        format!("OCP RAG version resolved: {}", version)
    }

    /// OCPRAGReady: unsupported cluster version, docs fall back to `latest`
    pub fn ocp_rag_fallback(detected: &str, supported: &[&str]) -> String {
        format!(
            "Cluster version {} is not explicitly supported. Using 'latest' OCP documentation. Supported versions: [{}]",
            detected,
            supported.join(" ")
        )
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Ready, OCPRAGReady)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    fn init_message(type_: &str) -> &'static str {
        match type_ {
            READY => messages::READY_INIT,
            OPENSTACK_LIGHTSPEED_READY => messages::OPENSTACK_LIGHTSPEED_INIT,
            OPENSHIFT_LIGHTSPEED_OPERATOR_READY => messages::OLS_OPERATOR_INIT,
            OCP_RAG_READY => messages::OCP_RAG_INIT,
            _ => "",
        }
    }
}

/// Ordered list of conditions keyed by type
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(transparent)]
pub struct ConditionList(pub Vec<Condition>);

impl ConditionList {
    /// Add an Unknown/Init condition for every type in `types` that is missing
    pub fn init(&mut self, types: &[&str]) {
        for type_ in types {
            if self.get(type_).is_none() {
                self.0.push(Condition::new(
                    *type_,
                    ConditionStatus::Unknown,
                    reasons::INIT,
                    Condition::init_message(type_),
                ));
            }
        }
    }

    /// Look up a condition by type
    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    /// True when the condition exists with status True
    pub fn is_true(&self, type_: &str) -> bool {
        self.get(type_)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Insert or replace a condition.
    ///
    /// `lastTransitionTime` only moves when the status actually changes.
    pub fn set(&mut self, mut condition: Condition) {
        match self.0.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => self.0.push(condition),
        }
    }

    /// Set `type_` to True with the Ready reason
    pub fn mark_true(&mut self, type_: &str, message: impl Into<String>) {
        self.set(Condition::new(
            type_,
            ConditionStatus::True,
            reasons::READY,
            message,
        ));
    }

    /// Set `type_` to False
    pub fn mark_false(&mut self, type_: &str, reason: &str, message: impl Into<String>) {
        self.set(Condition::new(type_, ConditionStatus::False, reason, message));
    }

    /// Carry over `lastTransitionTime` from `saved` for every condition whose status is unchanged
    pub fn restore_last_transition_times(&mut self, saved: &ConditionList) {
        for condition in &mut self.0 {
            if let Some(old) = saved.get(&condition.type_) {
                if old.status == condition.status {
                    condition.last_transition_time = old.last_transition_time;
                }
            }
        }
    }

    /// True when every condition other than `Ready` is True
    pub fn all_sub_conditions_true(&self) -> bool {
        self.0
            .iter()
            .filter(|c| c.type_ != READY)
            .all(|c| c.status == ConditionStatus::True)
    }

    /// Recompute `Ready` from the sub-conditions.
    ///
    /// All True gives Ready=True. Otherwise Ready copies the first False
    /// sub-condition, or the first Unknown one when nothing is False.
    pub fn mirror_ready(&mut self) {
        let sub = || self.0.iter().filter(|c| c.type_ != READY);
        let ready = if self.all_sub_conditions_true() {
            Condition::new(
                READY,
                ConditionStatus::True,
                reasons::READY,
                messages::READY_COMPLETE,
            )
        } else {
            let source = sub()
                .find(|c| c.status == ConditionStatus::False)
                .or_else(|| sub().find(|c| c.status == ConditionStatus::Unknown));
            match source {
                Some(c) => Condition::new(READY, c.status, c.reason.clone(), c.message.clone()),
                None => Condition::new(
                    READY,
                    ConditionStatus::Unknown,
                    reasons::INIT,
                    messages::READY_INIT,
                ),
            }
        };
        self.set(ready);
    }
}
