//! Error types for the OpenStack Lightspeed operator
//!
//! Errors carry enough context (instance names, object kinds, field paths) to be
//! surfaced verbatim in status conditions, which is the only place users see them.

use thiserror::Error;

use crate::unstructured::FieldError;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for OpenStack Lightspeed operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Operator or instance configuration that needs a human to fix it
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of what's invalid
        message: String,
        /// The offending field or variable (e.g., "spec.ocpVersionOverride")
        field: Option<String>,
    },

    /// The OLSConfig singleton is managed by another OpenStackLightspeed instance
    #[error("OLSConfig is managed by different OpenStackLightspeed instance (owner {owner}, requested by {instance})")]
    Ownership {
        /// UID of the instance that tried to claim the singleton
        instance: String,
        /// UID recorded in the owner label
        owner: String,
    },

    /// An OpenShift Lightspeed operator was installed outside of this operator
    #[error(
        "detected an existing OpenShift Lightspeed operator installation ({csv}). \
         Please uninstall OpenShift Lightspeed operator and allow the OpenStack \
         Lightspeed operator to manage its installation automatically"
    )]
    UserInstalledOperator {
        /// Name of the foreign ClusterServiceVersion
        csv: String,
    },

    /// RAG index discovery job failed or produced no usable output
    #[error("index discovery error [{job}]: {message}")]
    IndexDiscovery {
        /// Name of the discovery job
        job: String,
        /// Description of what failed
        message: String,
    },

    /// Path access on an untyped document failed
    #[error("field error: {source}")]
    Field {
        /// The underlying path error
        #[from]
        source: FieldError,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "installer")
        context: String,
    },
}

impl Error {
    /// Create a configuration error with the given message
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a configuration error naming the offending field
    pub fn configuration_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an ownership conflict error
    pub fn ownership(instance: impl Into<String>, owner: impl Into<String>) -> Self {
        Self::Ownership {
            instance: instance.into(),
            owner: owner.into(),
        }
    }

    /// Create a user-installed operator error for the given CSV
    pub fn user_installed(csv: impl Into<String>) -> Self {
        Self::UserInstalledOperator { csv: csv.into() }
    }

    /// Create an index discovery error for the given job
    pub fn index_discovery(job: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::IndexDiscovery {
            job: job.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// HTTP status code of the underlying API error, if any
    fn api_code(&self) -> Option<u16> {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => Some(ae.code),
            _ => None,
        }
    }

    /// True when the API server reported the object as missing
    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    /// True when the API server rejected a write because of a stale resourceVersion
    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409) && !self.is_already_exists()
    }

    /// True when a create hit an existing object
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            Error::Kube { source: kube::Error::Api(ae) } if ae.code == 409 && ae.reason == "AlreadyExists"
        )
    }

    /// Check if this error is retryable
    ///
    /// Configuration problems, a user-installed operator and a broken RAG image
    /// all need a human; everything else may resolve on a later pass.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
            ),
            Error::Configuration { .. } => false,
            Error::Ownership { .. } => true,
            Error::UserInstalledOperator { .. } => false,
            Error::IndexDiscovery { .. } => false,
            Error::Field { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            Error::IndexDiscovery { job, .. } => Some(job),
            Error::Configuration { field, .. } => field.as_deref(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16, reason: &str) -> Error {
        Error::from(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: reason.to_string(),
            code,
        }))
    }

    /// Story: a second instance claiming the OLSConfig gets an error naming both owners
    #[test]
    fn story_ownership_conflict_names_both_instances() {
        let err = Error::ownership("uid-b", "uid-a");
        let msg = err.to_string();
        assert!(msg.contains("managed by different OpenStackLightspeed instance"));
        assert!(msg.contains("uid-a"));
        assert!(msg.contains("uid-b"));
        assert!(err.is_retryable());
    }

    /// Story: a pre-existing OLS install produces an actionable message
    #[test]
    fn story_user_installed_operator_is_actionable() {
        let err = Error::user_installed("lightspeed-operator.v1.0.0");
        assert!(err.to_string().contains("Please uninstall OpenShift Lightspeed operator"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn configuration_errors_are_not_retryable() {
        let err = Error::configuration_for_field(
            "OPENSHIFT_LIGHTSPEED_OPERATOR_VERSION",
            "environment variable is not set",
        );
        assert!(!err.is_retryable());
        assert_eq!(err.context(), Some("OPENSHIFT_LIGHTSPEED_OPERATOR_VERSION"));
    }

    #[test]
    fn api_status_codes_are_classified() {
        assert!(api_error(404, "NotFound").is_not_found());
        assert!(api_error(409, "Conflict").is_conflict());
        assert!(!api_error(409, "Conflict").is_already_exists());
        assert!(api_error(409, "AlreadyExists").is_already_exists());
        assert!(!api_error(409, "AlreadyExists").is_conflict());
        assert!(!api_error(500, "InternalError").is_not_found());
    }

    #[test]
    fn kube_conflicts_retry_but_other_client_errors_do_not() {
        assert!(api_error(409, "Conflict").is_retryable());
        assert!(!api_error(403, "Forbidden").is_retryable());
        assert!(api_error(503, "ServiceUnavailable").is_retryable());
    }

    #[test]
    fn internal_error_default_context() {
        let err = Error::internal("unexpected state");
        assert_eq!(err.context(), Some(UNKNOWN_CONTEXT));
        assert!(err.to_string().contains("[unknown]"));
    }

    #[test]
    fn serde_errors_become_serialization_errors() {
        let parse: std::result::Result<u32, _> = serde_json::from_str("not json");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization { .. }));
        assert!(!err.is_retryable());
    }
}
