//! OpenShift Lightspeed operator installation through OLM
//!
//! The install is driven by a manually approved Subscription owned by the
//! OpenStackLightspeed instance:
//!
//! 1. Create or update the Subscription.
//! 2. Wait until OLM links an InstallPlan to it.
//! 3. Approve the InstallPlan carrying the recommended CSV.
//! 4. Adopt the resulting CSV by setting the instance as its owner.
//! 5. Report ready once the adopted CSV reaches `Succeeded`.
//!
//! A CSV that exists but is owned by neither the instance nor its Subscription
//! was installed by someone else, and the installer refuses to touch it.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use lightspeed_common::crd::{
    ClusterServiceVersion, InstallPlan, OpenStackLightspeed, Subscription, SubscriptionSpec,
    INSTALL_PLAN_APPROVAL_MANUAL,
};
use lightspeed_common::kube_utils::is_owned_by;
use lightspeed_common::{Error, FIELD_MANAGER};

use crate::config::OperatorConfig;

/// Package name of the OpenShift Lightspeed operator
pub const OLS_PACKAGE: &str = "lightspeed-operator";

/// Catalog channel the operator is installed from
pub const OLS_CHANNEL: &str = "stable";

/// How the OpenShift Lightspeed operator ended up in the cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstallMode {
    /// No OpenShift Lightspeed CSV exists
    Absent,
    /// The CSV or the Subscription belongs to this instance
    InstanceOwned,
    /// A CSV exists that this instance did not install
    UserInstalled,
}

/// Subscription name for an instance: the package name plus the first five
/// characters of the instance UID, so it never collides with a hand-made one
pub fn subscription_name(uid: &str) -> String {
    let prefix: String = uid.chars().take(5).collect();
    format!("{}-{}", OLS_PACKAGE, prefix)
}

/// First CSV in the list that belongs to the OpenShift Lightspeed package
pub fn find_ols_csv(csvs: Vec<ClusterServiceVersion>) -> Option<ClusterServiceVersion> {
    csvs.into_iter()
        .find(|csv| csv.name_any().starts_with(OLS_PACKAGE))
}

/// Classify the install from the OLS CSV and this instance's Subscription
pub fn classify(
    csv: Option<&ClusterServiceVersion>,
    subscription: Option<&Subscription>,
    owner_uid: &str,
) -> InstallMode {
    let Some(csv) = csv else {
        return InstallMode::Absent;
    };
    let sub_owned = subscription.is_some_and(|s| is_owned_by(&s.metadata, owner_uid));
    if is_owned_by(&csv.metadata, owner_uid) || sub_owned {
        InstallMode::InstanceOwned
    } else {
        InstallMode::UserInstalled
    }
}

/// True when the InstallPlan installs the recommended OpenShift Lightspeed CSV
pub fn is_recommended_install_plan(plan: &InstallPlan, config: &OperatorConfig) -> bool {
    plan.first_csv().is_some_and(|csv| {
        csv.starts_with(OLS_PACKAGE) && config.recommended_version.matches_csv(csv)
    })
}

/// The InstallPlan to approve among `plans`.
///
/// Only recommended plans qualify. The plan the Subscription links to wins,
/// then any plan still awaiting approval, then one that is already approved.
pub fn select_install_plan<'a>(
    plans: &'a [InstallPlan],
    linked: &str,
    config: &OperatorConfig,
) -> Option<&'a InstallPlan> {
    let recommended: Vec<&InstallPlan> = plans
        .iter()
        .filter(|p| is_recommended_install_plan(p, config))
        .collect();
    recommended
        .iter()
        .find(|p| p.name_any() == linked)
        .or_else(|| recommended.iter().find(|p| !p.spec.approved))
        .or_else(|| recommended.first())
        .copied()
}

fn controller_owner_ref(instance: &OpenStackLightspeed) -> Result<OwnerReference, Error> {
    instance.controller_owner_ref(&()).ok_or_else(|| {
        Error::internal_with_context("installer", "instance has no name or uid")
    })
}

fn instance_uid(instance: &OpenStackLightspeed) -> Result<String, Error> {
    instance
        .uid()
        .ok_or_else(|| Error::internal_with_context("installer", "instance has no uid"))
}

/// Desired Subscription for an instance
pub fn build_subscription(
    instance: &OpenStackLightspeed,
    config: &OperatorConfig,
) -> Result<Subscription, Error> {
    let uid = instance_uid(instance)?;
    Ok(Subscription {
        metadata: ObjectMeta {
            name: Some(subscription_name(&uid)),
            namespace: instance.namespace(),
            owner_references: Some(vec![controller_owner_ref(instance)?]),
            ..Default::default()
        },
        spec: SubscriptionSpec {
            channel: Some(OLS_CHANNEL.to_string()),
            name: OLS_PACKAGE.to_string(),
            source: instance.spec.catalog_source_name.clone(),
            source_namespace: instance.spec.catalog_source_namespace.clone(),
            install_plan_approval: Some(INSTALL_PLAN_APPROVAL_MANUAL.to_string()),
            starting_csv: config.recommended_version.starting_csv(OLS_PACKAGE),
        },
        status: None,
    })
}

/// Raw OLM object access
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OlmClient: Send + Sync {
    /// Get a Subscription, `None` if it does not exist
    async fn get_subscription(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Subscription>, Error>;

    /// Create a Subscription
    async fn create_subscription(&self, subscription: &Subscription) -> Result<(), Error>;

    /// Merge the managed fields of a Subscription into the live object; its
    /// resourceVersion guards against lost updates
    async fn update_subscription(&self, subscription: &Subscription) -> Result<(), Error>;

    /// List InstallPlans in a namespace
    async fn list_install_plans(&self, namespace: &str) -> Result<Vec<InstallPlan>, Error>;

    /// Set `spec.approved` on an InstallPlan at its current resourceVersion
    async fn approve_install_plan(&self, plan: &InstallPlan) -> Result<(), Error>;

    /// List CSVs across all namespaces
    async fn list_csvs(&self) -> Result<Vec<ClusterServiceVersion>, Error>;

    /// Replace the owner references of a CSV at its current resourceVersion
    async fn set_csv_owner(
        &self,
        csv: &ClusterServiceVersion,
        owner: &OwnerReference,
    ) -> Result<(), Error>;

    /// Delete a CSV
    async fn delete_csv(&self, csv: &ClusterServiceVersion) -> Result<(), Error>;
}

/// kube-rs backed [`OlmClient`]
pub struct OlmClientImpl {
    client: Client,
}

impl OlmClientImpl {
    /// Create a new OlmClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Merge patch carrying the fields this operator manages on a Subscription.
///
/// Unset optional fields are sent as null so a value dropped from the desired
/// spec is removed from the live object; spec fields not modelled here are
/// left alone.
pub fn subscription_patch(subscription: &Subscription) -> Result<serde_json::Value, Error> {
    let mut spec = serde_json::to_value(&subscription.spec)
        .map_err(|e| Error::serialization_for_kind("Subscription", e.to_string()))?;
    if let Some(fields) = spec.as_object_mut() {
        for key in ["channel", "installPlanApproval", "startingCSV"] {
            fields.entry(key).or_insert(serde_json::Value::Null);
        }
    }
    Ok(serde_json::json!({
        "metadata": {
            "resourceVersion": subscription.resource_version(),
            "ownerReferences": subscription.metadata.owner_references,
        },
        "spec": spec
    }))
}

fn require_namespace<K: Resource>(obj: &K) -> Result<String, Error> {
    obj.meta().namespace.clone().ok_or_else(|| {
        let name = obj.meta().name.as_deref().unwrap_or_default();
        Error::internal_with_context("olm", format!("{} has no namespace", name))
    })
}

#[async_trait]
impl OlmClient for OlmClientImpl {
    async fn get_subscription(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Subscription>, Error> {
        let api: Api<Subscription> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_subscription(&self, subscription: &Subscription) -> Result<(), Error> {
        let api: Api<Subscription> =
            Api::namespaced(self.client.clone(), &require_namespace(subscription)?);
        api.create(&PostParams::default(), subscription).await?;
        Ok(())
    }

    async fn update_subscription(&self, subscription: &Subscription) -> Result<(), Error> {
        let api: Api<Subscription> =
            Api::namespaced(self.client.clone(), &require_namespace(subscription)?);
        api.patch(
            &subscription.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&subscription_patch(subscription)?),
        )
        .await?;
        Ok(())
    }

    async fn list_install_plans(&self, namespace: &str) -> Result<Vec<InstallPlan>, Error> {
        let api: Api<InstallPlan> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn approve_install_plan(&self, plan: &InstallPlan) -> Result<(), Error> {
        let api: Api<InstallPlan> =
            Api::namespaced(self.client.clone(), &require_namespace(plan)?);
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": plan.resource_version() },
            "spec": { "approved": true }
        });
        api.patch(
            &plan.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }

    async fn list_csvs(&self) -> Result<Vec<ClusterServiceVersion>, Error> {
        let api: Api<ClusterServiceVersion> = Api::all(self.client.clone());
        match api.list(&ListParams::default()).await {
            Ok(list) => Ok(list.items),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(vec![]),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_csv_owner(
        &self,
        csv: &ClusterServiceVersion,
        owner: &OwnerReference,
    ) -> Result<(), Error> {
        let api: Api<ClusterServiceVersion> =
            Api::namespaced(self.client.clone(), &require_namespace(csv)?);
        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": csv.resource_version(),
                "ownerReferences": [owner]
            }
        });
        api.patch(
            &csv.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }

    async fn delete_csv(&self, csv: &ClusterServiceVersion) -> Result<(), Error> {
        let api: Api<ClusterServiceVersion> =
            Api::namespaced(self.client.clone(), &require_namespace(csv)?);
        match api.delete(&csv.name_any(), &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Installs and removes the OpenShift Lightspeed operator for an instance
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OperatorInstaller: Send + Sync {
    /// Drive the install forward. `Ok(true)` once the operator is running and
    /// owned by the instance, `Ok(false)` while the install is still progressing.
    async fn ensure_installed(&self, instance: &OpenStackLightspeed) -> Result<bool, Error>;

    /// Remove an operator this instance installed. `Ok(true)` once it is gone
    /// or was never ours.
    async fn uninstall(&self, instance: &OpenStackLightspeed) -> Result<bool, Error>;
}

/// [`OperatorInstaller`] backed by OLM objects
pub struct OlmInstaller {
    olm: Arc<dyn OlmClient>,
    config: OperatorConfig,
}

impl OlmInstaller {
    /// Create an installer over the given OLM client
    pub fn new(olm: Arc<dyn OlmClient>, config: OperatorConfig) -> Self {
        Self { olm, config }
    }

    async fn ols_csv(&self) -> Result<Option<ClusterServiceVersion>, Error> {
        Ok(find_ols_csv(self.olm.list_csvs().await?))
    }

    async fn install_mode(&self, instance: &OpenStackLightspeed) -> Result<InstallMode, Error> {
        let csv = self.ols_csv().await?;
        if csv.is_none() {
            return Ok(InstallMode::Absent);
        }
        let uid = instance_uid(instance)?;
        let namespace = instance.namespace().unwrap_or_default();
        let subscription = self
            .olm
            .get_subscription(&namespace, &subscription_name(&uid))
            .await?;
        Ok(classify(csv.as_ref(), subscription.as_ref(), &uid))
    }

    /// Create or update the Subscription. Returns the live object only when it
    /// already matched the desired state.
    async fn sync_subscription(
        &self,
        desired: Subscription,
    ) -> Result<Option<Subscription>, Error> {
        let namespace = desired.namespace().unwrap_or_default();
        let name = desired.name_any();

        let Some(existing) = self.olm.get_subscription(&namespace, &name).await? else {
            info!(subscription = %name, "creating OpenShift Lightspeed subscription");
            self.olm.create_subscription(&desired).await?;
            return Ok(None);
        };

        if existing.spec == desired.spec
            && existing.metadata.owner_references == desired.metadata.owner_references
        {
            return Ok(Some(existing));
        }

        info!(subscription = %name, "updating OpenShift Lightspeed subscription");
        let mut updated = existing;
        updated.spec = desired.spec;
        updated.metadata.owner_references = desired.metadata.owner_references;
        match self.olm.update_subscription(&updated).await {
            Ok(()) => Ok(None),
            Err(e) if e.is_conflict() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Approve the recommended InstallPlan, preferring the one the
    /// Subscription links to. `Ok(false)` when none exists yet or the approval
    /// raced another writer.
    async fn approve_install_plan(&self, namespace: &str, linked: &str) -> Result<bool, Error> {
        let plans = self.olm.list_install_plans(namespace).await?;
        let Some(plan) = select_install_plan(&plans, linked, &self.config) else {
            debug!(namespace = %namespace, "no matching InstallPlan yet");
            return Ok(false);
        };

        if plan.spec.approved {
            return Ok(true);
        }

        info!(install_plan = %plan.name_any(), csv = ?plan.first_csv(), "approving InstallPlan");
        match self.olm.approve_install_plan(plan).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_conflict() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn install_instance_owned(&self, instance: &OpenStackLightspeed) -> Result<bool, Error> {
        let desired = build_subscription(instance, &self.config)?;
        let namespace = desired.namespace().unwrap_or_default();

        let Some(subscription) = self.sync_subscription(desired).await? else {
            return Ok(false);
        };

        // Approving before OLM links the plan makes it generate extra InstallPlans
        let Some(linked) = subscription
            .status
            .as_ref()
            .and_then(|s| s.install_plan_ref.as_ref())
            .map(|r| r.name.clone())
        else {
            debug!("subscription has no InstallPlan yet");
            return Ok(false);
        };

        if !self.approve_install_plan(&namespace, &linked).await? {
            return Ok(false);
        }

        let Some(csv) = self.ols_csv().await? else {
            return Ok(false);
        };

        let owner = controller_owner_ref(instance)?;
        if csv.owner_references() != std::slice::from_ref(&owner) {
            info!(csv = %csv.name_any(), "adopting OpenShift Lightspeed CSV");
            match self.olm.set_csv_owner(&csv, &owner).await {
                Ok(()) => {}
                Err(e) if e.is_conflict() => return Ok(false),
                Err(e) => return Err(e),
            }
        }

        let Some(csv) = self.ols_csv().await? else {
            return Ok(false);
        };
        Ok(is_owned_by(&csv.metadata, &owner.uid) && csv.succeeded())
    }
}

#[async_trait]
impl OperatorInstaller for OlmInstaller {
    async fn ensure_installed(&self, instance: &OpenStackLightspeed) -> Result<bool, Error> {
        match self.install_mode(instance).await? {
            InstallMode::UserInstalled => {
                let csv = self
                    .ols_csv()
                    .await?
                    .map(|c| c.name_any())
                    .unwrap_or_else(|| OLS_PACKAGE.to_string());
                Err(Error::user_installed(csv))
            }
            InstallMode::Absent | InstallMode::InstanceOwned => {
                self.install_instance_owned(instance).await
            }
        }
    }

    async fn uninstall(&self, instance: &OpenStackLightspeed) -> Result<bool, Error> {
        let uid = instance_uid(instance)?;
        let Some(csv) = self.ols_csv().await? else {
            return Ok(true);
        };
        if !is_owned_by(&csv.metadata, &uid) {
            debug!(csv = %csv.name_any(), "CSV not owned by instance, leaving it in place");
            return Ok(true);
        }

        info!(csv = %csv.name_any(), "deleting OpenShift Lightspeed CSV");
        self.olm.delete_csv(&csv).await?;
        Ok(self.ols_csv().await?.is_none())
    }
}
