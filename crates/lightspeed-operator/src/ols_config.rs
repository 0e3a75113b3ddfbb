//! OLSConfig management
//!
//! `OLSConfig/cluster` is a cluster-scoped singleton whose schema belongs to the
//! OpenShift Lightspeed operator. It is handled as a `DynamicObject`: the
//! fields this operator owns are built as typed values and written by path,
//! everything else on the object is left as found.
//!
//! At most one OpenStackLightspeed may manage the singleton. Ownership is
//! recorded in the `openstack.org/lightspeed-owner-id` label.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, PostParams};
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use serde::Serialize;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use lightspeed_common::crd::OpenStackLightspeed;
use lightspeed_common::kube_utils::{add_finalizer, remove_finalizer};
use lightspeed_common::unstructured::{nested_array, set_nested_field};
use lightspeed_common::{Error, LIGHTSPEED_FINALIZER, OWNER_ID_LABEL};

use crate::version::{index_identifier, vector_db_path};

/// OpenShift Lightspeed only accepts this name for its config
pub const OLS_CONFIG_NAME: &str = "cluster";

/// Provider name written into the OLSConfig
pub const DEFAULT_PROVIDER: &str = "openstack-lightspeed-provider";

/// Path of the OpenStack documentation vector DB inside the RAG image
pub const PRIMARY_VECTOR_DB_PATH: &str = "/rag/vector_db/os_product_docs";

/// Label bumped to make the OpenShift Lightspeed operator refresh the status
pub const PING_LABEL: &str = "openstack-lightspeed/ping";

/// OLSConfig conditions that must all be True before the config counts as ready
pub const REQUIRED_CONDITIONS: [&str; 4] =
    ["ConsolePluginReady", "CacheReady", "ApiReady", "Reconciled"];

const OLS_CONFIG_KIND: &str = "OLSConfig";

fn ols_config_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk("ols.openshift.io", "v1alpha1", OLS_CONFIG_KIND);
    ApiResource::from_gvk_with_plural(&gvk, "olsconfigs")
}

/// Index information feeding the RAG section
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RagSources {
    /// Index name discovered from the RAG image, if discovery is enabled
    pub primary_index_id: Option<String>,
    /// Resolved OpenShift documentation version; empty when OCP RAG is disabled
    pub ocp_version: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct RagEntry {
    image: String,
    #[serde(rename = "indexID", skip_serializing_if = "Option::is_none")]
    index_id: Option<String>,
    index_path: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SecretRef {
    name: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModelParameters {
    max_tokens_for_response: u32,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Model {
    name: String,
    parameters: ModelParameters,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Provider {
    credentials_secret_ref: SecretRef,
    models: Vec<Model>,
    name: String,
    #[serde(rename = "type")]
    type_: String,
    url: String,
}

/// RAG sources in priority order: OpenStack docs first, then OpenShift docs if enabled
fn rag_entries(rag_image: &str, sources: &RagSources) -> Vec<RagEntry> {
    let mut entries = vec![RagEntry {
        image: rag_image.to_string(),
        index_id: sources.primary_index_id.clone(),
        index_path: PRIMARY_VECTOR_DB_PATH.to_string(),
    }];
    if !sources.ocp_version.is_empty() {
        entries.push(RagEntry {
            image: rag_image.to_string(),
            index_id: Some(index_identifier(&sources.ocp_version)),
            index_path: vector_db_path(&sources.ocp_version),
        });
    }
    entries
}

/// Owner label value on the OLSConfig, if any
pub fn owner_of(config: &DynamicObject) -> Option<&str> {
    config
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(OWNER_ID_LABEL))
        .map(String::as_str)
        .filter(|owner| !owner.is_empty())
}

/// Write the instance's desired configuration into `target`.
///
/// The instance spec must already have defaults applied. Fails without
/// touching `target` when another instance owns it.
pub fn patch(
    instance: &OpenStackLightspeed,
    target: &mut DynamicObject,
    sources: &RagSources,
    finalizer: &str,
) -> Result<(), Error> {
    let uid = instance
        .uid()
        .ok_or_else(|| Error::internal_with_context("ols_config", "instance has no uid"))?;
    if let Some(owner) = owner_of(target) {
        if owner != uid {
            return Err(Error::ownership(uid, owner));
        }
    }

    let spec = &instance.spec;
    let providers = vec![Provider {
        credentials_secret_ref: SecretRef {
            name: spec.llm_credentials.clone(),
        },
        models: vec![Model {
            name: spec.model_name.clone(),
            parameters: ModelParameters {
                max_tokens_for_response: spec.max_tokens_for_response,
            },
        }],
        name: DEFAULT_PROVIDER.to_string(),
        type_: spec.llm_endpoint_type.clone(),
        url: spec.llm_endpoint.clone(),
    }];

    // Work on a copy so a failed write leaves the target untouched
    let mut data = target.data.clone();
    set_nested_field(
        &mut data,
        &["spec", "llm", "providers"],
        serde_json::to_value(providers)
            .map_err(|e| Error::serialization_for_kind(OLS_CONFIG_KIND, e.to_string()))?,
    )?;
    set_nested_field(
        &mut data,
        &["spec", "ols", "rag"],
        serde_json::to_value(rag_entries(&spec.rag_image, sources))
            .map_err(|e| Error::serialization_for_kind(OLS_CONFIG_KIND, e.to_string()))?,
    )?;
    if let Some(bundle) = spec.tls_ca_cert_bundle.as_deref().filter(|b| !b.is_empty()) {
        set_nested_field(
            &mut data,
            &["spec", "ols", "additionalCAConfigMapRef", "name"],
            serde_json::Value::from(bundle),
        )?;
    }
    set_nested_field(
        &mut data,
        &["spec", "ols", "defaultModel"],
        serde_json::Value::from(spec.model_name.as_str()),
    )?;
    set_nested_field(
        &mut data,
        &["spec", "ols", "defaultProvider"],
        serde_json::Value::from(DEFAULT_PROVIDER),
    )?;
    set_nested_field(
        &mut data,
        &["spec", "ols", "byokRAGOnly"],
        serde_json::Value::Bool(true),
    )?;

    target.data = data;
    target
        .labels_mut()
        .insert(OWNER_ID_LABEL.to_string(), uid);
    add_finalizer(&mut target.metadata, finalizer);
    Ok(())
}

/// True when every required OLSConfig condition is present and True.
///
/// `None` while OpenShift Lightspeed has not written `status.conditions` yet.
pub fn conditions_ready(config: &DynamicObject) -> Result<Option<bool>, Error> {
    let conditions = match nested_array(&config.data, &["status", "conditions"]) {
        Ok(conditions) => conditions,
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(REQUIRED_CONDITIONS.iter().all(|required| {
        conditions.iter().any(|c| {
            c.get("type").and_then(|t| t.as_str()) == Some(*required)
                && c.get("status").and_then(|s| s.as_str()) == Some("True")
        })
    })))
}

/// Raw access to the OLSConfig singleton
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OlsConfigClient: Send + Sync {
    /// Fetch the singleton, `None` if it does not exist
    async fn get(&self) -> Result<Option<DynamicObject>, Error>;

    /// Create the singleton
    async fn create(&self, config: &DynamicObject) -> Result<(), Error>;

    /// Replace the singleton; its resourceVersion guards against lost updates
    async fn replace(&self, config: &DynamicObject) -> Result<(), Error>;

    /// Delete the singleton
    async fn delete(&self) -> Result<(), Error>;
}

/// kube-rs backed [`OlsConfigClient`]
pub struct OlsConfigClientImpl {
    api: Api<DynamicObject>,
}

impl OlsConfigClientImpl {
    /// Create a new OlsConfigClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all_with(client, &ols_config_resource()),
        }
    }
}

#[async_trait]
impl OlsConfigClient for OlsConfigClientImpl {
    async fn get(&self) -> Result<Option<DynamicObject>, Error> {
        Ok(self.api.get_opt(OLS_CONFIG_NAME).await?)
    }

    async fn create(&self, config: &DynamicObject) -> Result<(), Error> {
        self.api.create(&PostParams::default(), config).await?;
        Ok(())
    }

    async fn replace(&self, config: &DynamicObject) -> Result<(), Error> {
        self.api
            .replace(OLS_CONFIG_NAME, &PostParams::default(), config)
            .await?;
        Ok(())
    }

    async fn delete(&self) -> Result<(), Error> {
        match self.api.delete(OLS_CONFIG_NAME, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Lifecycle of the OLSConfig as seen by the reconciler
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DownstreamConfig: Send + Sync {
    /// Create or update the OLSConfig for `instance`.
    ///
    /// `Ok(false)` when another writer raced this one; the caller should retry shortly.
    async fn upsert(&self, instance: &OpenStackLightspeed, sources: &RagSources)
        -> Result<bool, Error>;

    /// Whether OpenShift Lightspeed reports the config as fully reconciled
    async fn is_ready(&self) -> Result<bool, Error>;

    /// Release and delete the OLSConfig if `instance` manages it.
    ///
    /// `Ok(true)` once it is gone or was never ours.
    async fn remove(&self, instance: &OpenStackLightspeed) -> Result<bool, Error>;
}

/// [`DownstreamConfig`] over an [`OlsConfigClient`]
pub struct OlsConfigManager {
    client: Arc<dyn OlsConfigClient>,
}

impl OlsConfigManager {
    /// Create a manager over the given client
    pub fn new(client: Arc<dyn OlsConfigClient>) -> Self {
        Self { client }
    }

    /// Bump the ping label so OpenShift Lightspeed re-evaluates the config.
    /// Write conflicts are ignored.
    pub async fn ping(&self) -> Result<(), Error> {
        let Some(mut config) = self.client.get().await? else {
            return Ok(());
        };
        config
            .labels_mut()
            .insert(PING_LABEL.to_string(), rand::random::<u32>().to_string());
        match self.client.replace(&config).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_conflict() => {
                debug!("OLSConfig ping raced another writer");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn is_stale_write(e: &Error) -> bool {
    e.is_conflict() || e.is_already_exists()
}

#[async_trait]
impl DownstreamConfig for OlsConfigManager {
    async fn upsert(
        &self,
        instance: &OpenStackLightspeed,
        sources: &RagSources,
    ) -> Result<bool, Error> {
        let existing = self.client.get().await?;
        let created = existing.is_none();
        let mut desired = existing
            .clone()
            .unwrap_or_else(|| DynamicObject::new(OLS_CONFIG_NAME, &ols_config_resource()));
        patch(instance, &mut desired, sources, LIGHTSPEED_FINALIZER)?;

        if existing.as_ref() == Some(&desired) {
            return Ok(true);
        }

        let result = if created {
            info!("creating OLSConfig");
            self.client.create(&desired).await
        } else {
            info!("updating OLSConfig");
            self.client.replace(&desired).await
        };
        match result {
            Ok(()) => Ok(true),
            Err(e) if is_stale_write(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn is_ready(&self) -> Result<bool, Error> {
        let config = self.client.get().await?.ok_or_else(|| {
            Error::internal_with_context("ols_config", "OLSConfig cluster not found")
        })?;
        match conditions_ready(&config)? {
            Some(true) => Ok(true),
            Some(false) => {
                self.ping().await?;
                Ok(false)
            }
            None => {
                debug!("OLSConfig has no status conditions yet");
                Ok(false)
            }
        }
    }

    async fn remove(&self, instance: &OpenStackLightspeed) -> Result<bool, Error> {
        let Some(mut config) = self.client.get().await? else {
            return Ok(true);
        };
        let uid = instance.uid().unwrap_or_default();
        if owner_of(&config) != Some(uid.as_str()) {
            info!("OLSConfig is not managed by this instance, leaving it in place");
            return Ok(true);
        }

        if remove_finalizer(&mut config.metadata, LIGHTSPEED_FINALIZER) {
            match self.client.replace(&config).await {
                Ok(()) => {}
                Err(e) if e.is_conflict() => return Ok(false),
                Err(e) => return Err(e),
            }
        }

        info!("deleting OLSConfig");
        self.client.delete().await?;
        Ok(self.client.get().await?.is_none())
    }
}
