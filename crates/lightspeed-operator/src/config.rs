//! Operator-level configuration
//!
//! Read once at startup; the controller never consults the environment again.

use lightspeed_common::{Error, OLS_OPERATOR_VERSION_ENV};

/// Which OpenShift Lightspeed operator release to install
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecommendedVersion {
    /// Install exactly this version (e.g. "1.0.1")
    Pinned(String),
    /// Let OLM pick whatever the channel head is
    Latest,
}

impl RecommendedVersion {
    /// `startingCSV` for the Subscription, if one should be set
    pub fn starting_csv(&self, package: &str) -> Option<String> {
        match self {
            Self::Pinned(version) => Some(format!("{}.v{}", package, version)),
            Self::Latest => None,
        }
    }

    /// True when a CSV name carries exactly this version
    pub fn matches_csv(&self, csv_name: &str) -> bool {
        match self {
            Self::Pinned(version) => csv_name.ends_with(&format!(".v{}", version)),
            Self::Latest => true,
        }
    }
}

/// Configuration shared by every reconciliation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// OpenShift Lightspeed release to install
    pub recommended_version: RecommendedVersion,
}

impl OperatorConfig {
    /// Validate the recommended version taken from the CLI or environment.
    ///
    /// An unset or blank value is a configuration error.
    pub fn new(recommended_version: Option<String>) -> Result<Self, Error> {
        let raw = recommended_version.unwrap_or_default();
        let recommended_version = match raw.trim() {
            "" => {
                return Err(Error::configuration_for_field(
                    OLS_OPERATOR_VERSION_ENV,
                    format!("environment variable {} is not set", OLS_OPERATOR_VERSION_ENV),
                ))
            }
            "latest" => RecommendedVersion::Latest,
            version => RecommendedVersion::Pinned(version.trim_start_matches('v').to_string()),
        };
        Ok(Self {
            recommended_version,
        })
    }
}
