//! OpenStackLightspeed reconciliation
//!
//! Every pass starts from a fresh read of the instance and walks the phases in
//! [`crate::phase`]. The I/O for each phase lives here; the order and the
//! requeue delays live in the phase table.
//!
//! Status is written back on every exit of a pass, including errors, so users
//! always see why a pass stopped. A panic skips the write and is re-raised.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use lightspeed_common::crd::conditions::{
    messages, reasons, ALL_CONDITION_TYPES, OCP_RAG_READY, OPENSHIFT_LIGHTSPEED_OPERATOR_READY,
    OPENSTACK_LIGHTSPEED_READY,
};
use lightspeed_common::crd::{ConditionList, OpenStackLightspeed, OpenStackLightspeedStatus};
use lightspeed_common::kube_utils::has_finalizer;
use lightspeed_common::{Error, FIELD_MANAGER, LIGHTSPEED_FINALIZER};

use crate::config::OperatorConfig;
use crate::index_job::{IndexDiscovery, IndexJobClientImpl, IndexLookup, JobIndexDiscovery};
use crate::olm::{OlmClientImpl, OlmInstaller, OperatorInstaller};
use crate::ols_config::{DownstreamConfig, OlsConfigClientImpl, OlsConfigManager, RagSources};
use crate::phase::{transition, Observed, Outcome, Phase};
use crate::version::{
    is_valid_override, resolve_version, ClusterVersionClient, ClusterVersionReader,
    SUPPORTED_OCP_VERSIONS,
};

/// Requeue delay applied by [`error_policy`]
pub const ERROR_REQUEUE: Duration = Duration::from_secs(10);

/// Operations on the OpenStackLightspeed resource itself
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get an OpenStackLightspeed by name and namespace
    async fn get_instance(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<OpenStackLightspeed>, Error>;

    /// Replace the status of an OpenStackLightspeed
    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &OpenStackLightspeedStatus,
    ) -> Result<(), Error>;

    /// Add the lightspeed finalizer
    async fn add_finalizer(&self, instance: &OpenStackLightspeed) -> Result<(), Error>;

    /// Remove the lightspeed finalizer
    async fn remove_finalizer(&self, instance: &OpenStackLightspeed) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<OpenStackLightspeed> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn patch_finalizers(
        &self,
        instance: &OpenStackLightspeed,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let namespace = instance.namespace().unwrap_or_default();
        let patch = json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": instance.resource_version(),
            }
        });
        self.api(&namespace)
            .patch(
                &instance.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_instance(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<OpenStackLightspeed>, Error> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &OpenStackLightspeedStatus,
    ) -> Result<(), Error> {
        let patch = json!({ "status": status });
        self.api(namespace)
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn add_finalizer(&self, instance: &OpenStackLightspeed) -> Result<(), Error> {
        let mut finalizers = instance.finalizers().to_vec();
        finalizers.push(LIGHTSPEED_FINALIZER.to_string());
        match self.patch_finalizers(instance, finalizers).await {
            // the pass requeues right after this and re-reads the instance
            Err(e) if e.is_conflict() => Ok(()),
            other => other,
        }
    }

    async fn remove_finalizer(&self, instance: &OpenStackLightspeed) -> Result<(), Error> {
        let finalizers: Vec<String> = instance
            .finalizers()
            .iter()
            .filter(|f| *f != LIGHTSPEED_FINALIZER)
            .cloned()
            .collect();
        match self.patch_finalizers(instance, finalizers).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}

/// Controller context shared by every reconciliation
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```text
/// let ctx = Context::builder(client, config).build();
/// ```
pub struct Context {
    /// Access to OpenStackLightspeed objects
    pub kube: Arc<dyn KubeClient>,
    /// Installs and removes the OpenShift Lightspeed operator
    pub installer: Arc<dyn OperatorInstaller>,
    /// Manages the OLSConfig singleton
    pub downstream: Arc<dyn DownstreamConfig>,
    /// Finds the vector DB index name of a RAG image
    pub index: Arc<dyn IndexDiscovery>,
    /// Reads the OpenShift cluster version
    pub cluster_version: Arc<dyn ClusterVersionReader>,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client, config: OperatorConfig) -> ContextBuilder {
        ContextBuilder::new(client, config)
    }

    /// Create a context for testing with custom mock clients
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        installer: Arc<dyn OperatorInstaller>,
        downstream: Arc<dyn DownstreamConfig>,
        index: Arc<dyn IndexDiscovery>,
        cluster_version: Arc<dyn ClusterVersionReader>,
    ) -> Self {
        Self {
            kube,
            installer,
            downstream,
            index,
            cluster_version,
        }
    }
}

/// Builder for constructing [`Context`] instances
///
/// Every collaborator defaults to its kube-rs backed implementation.
pub struct ContextBuilder {
    client: Client,
    config: OperatorConfig,
    kube: Option<Arc<dyn KubeClient>>,
    installer: Option<Arc<dyn OperatorInstaller>>,
    downstream: Option<Arc<dyn DownstreamConfig>>,
    index: Option<Arc<dyn IndexDiscovery>>,
    cluster_version: Option<Arc<dyn ClusterVersionReader>>,
}

impl ContextBuilder {
    fn new(client: Client, config: OperatorConfig) -> Self {
        Self {
            client,
            config,
            kube: None,
            installer: None,
            downstream: None,
            index: None,
            cluster_version: None,
        }
    }

    /// Override the OpenStackLightspeed client
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the operator installer
    pub fn installer(mut self, installer: Arc<dyn OperatorInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    /// Override the OLSConfig manager
    pub fn downstream(mut self, downstream: Arc<dyn DownstreamConfig>) -> Self {
        self.downstream = Some(downstream);
        self
    }

    /// Override index discovery
    pub fn index_discovery(mut self, index: Arc<dyn IndexDiscovery>) -> Self {
        self.index = Some(index);
        self
    }

    /// Override the cluster version reader
    pub fn cluster_version_reader(mut self, reader: Arc<dyn ClusterVersionReader>) -> Self {
        self.cluster_version = Some(reader);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let client = self.client;
        let config = self.config;
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(client.clone()))),
            installer: self.installer.unwrap_or_else(|| {
                Arc::new(OlmInstaller::new(
                    Arc::new(OlmClientImpl::new(client.clone())),
                    config,
                ))
            }),
            downstream: self.downstream.unwrap_or_else(|| {
                Arc::new(OlsConfigManager::new(Arc::new(OlsConfigClientImpl::new(
                    client.clone(),
                ))))
            }),
            index: self.index.unwrap_or_else(|| {
                Arc::new(JobIndexDiscovery::new(Arc::new(IndexJobClientImpl::new(
                    client.clone(),
                ))))
            }),
            cluster_version: self
                .cluster_version
                .unwrap_or_else(|| Arc::new(ClusterVersionClient::new(client))),
        }
    }
}

/// Reconcile an OpenStackLightspeed
///
/// Loads the instance fresh, runs one pass and persists the resulting status.
/// A pass error is returned after the status write so the error policy can
/// requeue.
#[instrument(skip(instance, ctx), fields(instance = %instance.name_any()))]
pub async fn reconcile(
    instance: Arc<OpenStackLightspeed>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let name = instance.name_any();
    let namespace = instance.namespace().ok_or_else(|| {
        Error::internal_with_context("reconcile", "OpenStackLightspeed must be namespaced")
    })?;
    info!("reconciling OpenStackLightspeed");

    let Some(instance) = ctx.kube.get_instance(&name, &namespace).await? else {
        debug!("OpenStackLightspeed no longer exists");
        return Ok(Action::await_change());
    };

    let mut status = instance.status.clone().unwrap_or_default();
    let saved = status.conditions.clone();
    status.conditions.init(&ALL_CONDITION_TYPES);
    status.observed_generation = instance.metadata.generation;

    let result = match AssertUnwindSafe(run_pass(&instance, &ctx, &mut status.conditions))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => {
            error!("panic during reconcile, status not updated");
            std::panic::resume_unwind(panic);
        }
    };

    status.conditions.restore_last_transition_times(&saved);
    status.conditions.mirror_ready();

    match ctx.kube.patch_status(&name, &namespace, &status).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => debug!("instance gone before status update"),
        Err(e) => match result {
            Ok(_) => return Err(e),
            Err(_) => warn!(error = %e, "failed to persist status"),
        },
    }
    result
}

/// Error policy for the OpenStackLightspeed controller.
///
/// Logs the error and requeues after a fixed delay.
pub fn error_policy(
    instance: Arc<OpenStackLightspeed>,
    error: &Error,
    _ctx: Arc<Context>,
) -> Action {
    error!(
        ?error,
        instance = %instance.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    Action::requeue(ERROR_REQUEUE)
}

async fn run_pass(
    instance: &OpenStackLightspeed,
    ctx: &Context,
    conditions: &mut ConditionList,
) -> Result<Action, Error> {
    let mut defaulted = instance.clone();
    defaulted.spec = instance.spec.with_defaults();
    let mut pass = Pass {
        instance: defaulted,
        ctx,
        conditions,
        sources: RagSources::default(),
    };

    let mut phase = Phase::Initializing;
    loop {
        let observed = pass.observe(phase).await?;
        debug!(%phase, ?observed, "phase observed");
        match transition(phase, observed) {
            Outcome::Advance(next) => phase = next,
            Outcome::RequeueAfter(delay) => return Ok(Action::requeue(delay)),
            Outcome::Done => return Ok(Action::await_change()),
        }
    }
}

/// State carried between the phases of one pass
struct Pass<'a> {
    /// The instance with spec defaults applied
    instance: OpenStackLightspeed,
    ctx: &'a Context,
    conditions: &'a mut ConditionList,
    sources: RagSources,
}

impl Pass<'_> {
    async fn observe(&mut self, phase: Phase) -> Result<Observed, Error> {
        match phase {
            Phase::Initializing => self.admit().await,
            Phase::EnsuringOperator => self.ensure_operator().await,
            Phase::PatchingDownstream => self.patch_downstream().await,
            Phase::AwaitingReadiness => self.await_readiness().await,
            Phase::Ready => {
                info!("OpenStackLightspeed reconciled");
                Ok(Observed::Complete)
            }
            Phase::Deleting => {
                info!("OpenStackLightspeed is being deleted");
                Ok(Observed::Complete)
            }
            Phase::RemovingDownstreamOwnership => {
                if self.ctx.downstream.remove(&self.instance).await? {
                    Ok(Observed::Complete)
                } else {
                    info!("OLSConfig removal in progress");
                    Ok(Observed::InProgress)
                }
            }
            Phase::UninstallingOperator => {
                if self.ctx.installer.uninstall(&self.instance).await? {
                    Ok(Observed::Complete)
                } else {
                    info!("OpenShift Lightspeed operator removal in progress");
                    Ok(Observed::InProgress)
                }
            }
            Phase::FinalizerRemoved => {
                self.ctx.kube.remove_finalizer(&self.instance).await?;
                info!("OpenStackLightspeed deletion complete");
                Ok(Observed::Complete)
            }
        }
    }

    async fn admit(&mut self) -> Result<Observed, Error> {
        if self.instance.meta().deletion_timestamp.is_some() {
            return Ok(Observed::DeletionRequested);
        }
        if !has_finalizer(self.instance.meta(), LIGHTSPEED_FINALIZER) {
            self.ctx.kube.add_finalizer(&self.instance).await?;
            return Ok(Observed::FinalizerAdded);
        }
        Ok(Observed::Admitted)
    }

    /// Record `err` on `condition`; retryable errors fail the pass, the rest block it
    fn fail(&mut self, condition: &str, err: Error) -> Result<Observed, Error> {
        self.conditions
            .mark_false(condition, reasons::ERROR, err.to_string());
        if err.is_retryable() {
            Err(err)
        } else {
            warn!(error = %err, condition, "blocked until the instance changes");
            Ok(Observed::Blocked)
        }
    }

    async fn ensure_operator(&mut self) -> Result<Observed, Error> {
        match self.ctx.installer.ensure_installed(&self.instance).await {
            Ok(true) => {
                self.conditions.mark_true(
                    OPENSHIFT_LIGHTSPEED_OPERATOR_READY,
                    messages::OLS_OPERATOR_READY,
                );
                Ok(Observed::Complete)
            }
            Ok(false) => {
                self.conditions.mark_false(
                    OPENSHIFT_LIGHTSPEED_OPERATOR_READY,
                    reasons::REQUESTED,
                    messages::OLS_OPERATOR_WAITING,
                );
                Ok(Observed::InProgress)
            }
            Err(e) => self.fail(OPENSHIFT_LIGHTSPEED_OPERATOR_READY, e),
        }
    }

    /// Resolve the OpenShift docs version and record it on `OCPRAGReady`.
    ///
    /// `None` when an invalid override blocks the pass.
    async fn resolve_ocp_version(&mut self) -> Result<Option<String>, Error> {
        let spec = &self.instance.spec;
        if !spec.enable_ocp_rag {
            self.conditions
                .mark_true(OCP_RAG_READY, messages::OCP_RAG_DISABLED);
            return Ok(Some(String::new()));
        }

        let override_version = spec.version_override();
        let detected = if override_version.is_empty() {
            match self.ctx.cluster_version.detect_cluster_version().await {
                Ok(version) => version,
                Err(e) => {
                    self.conditions.mark_false(
                        OCP_RAG_READY,
                        reasons::ERROR,
                        format!("{}: {}", messages::OCP_RAG_DETECTION_FAILED, e),
                    );
                    return Err(e);
                }
            }
        } else if is_valid_override(override_version) {
            String::new()
        } else {
            self.conditions.mark_false(
                OCP_RAG_READY,
                reasons::ERROR,
                format!("{}: {}", messages::OCP_RAG_INVALID_OVERRIDE, override_version),
            );
            return Ok(None);
        };

        let resolved = resolve_version(&detected, override_version, true)?;
        if resolved.is_fallback {
            info!(detected = %detected, "cluster version has no dedicated docs index, using latest");
            self.conditions.mark_true(
                OCP_RAG_READY,
                messages::ocp_rag_fallback(&detected, &SUPPORTED_OCP_VERSIONS),
            );
        } else {
            self.conditions
                .mark_true(OCP_RAG_READY, messages::ocp_rag_resolved(&resolved.version));
        }
        Ok(Some(resolved.version))
    }

    async fn patch_downstream(&mut self) -> Result<Observed, Error> {
        let Some(ocp_version) = self.resolve_ocp_version().await? else {
            return Ok(Observed::Blocked);
        };
        self.sources.ocp_version = ocp_version;

        if self.instance.spec.index_discovery {
            let rag_image = self.instance.spec.rag_image.clone();
            match self.ctx.index.discover(&self.instance, &rag_image).await {
                Ok(IndexLookup::Found(index)) => self.sources.primary_index_id = Some(index),
                Ok(IndexLookup::Waiting) => {
                    self.conditions.mark_false(
                        OPENSTACK_LIGHTSPEED_READY,
                        reasons::REQUESTED,
                        messages::OPENSTACK_LIGHTSPEED_WAITING_VECTOR_DB,
                    );
                    return Ok(Observed::InProgress);
                }
                Err(e) => return self.fail(OPENSTACK_LIGHTSPEED_READY, e),
            }
        }

        match self.ctx.downstream.upsert(&self.instance, &self.sources).await {
            Ok(true) => {
                self.conditions.mark_false(
                    OPENSTACK_LIGHTSPEED_READY,
                    reasons::REQUESTED,
                    messages::OPENSTACK_LIGHTSPEED_WAITING_OLS_CONFIG,
                );
                Ok(Observed::Complete)
            }
            Ok(false) => {
                debug!("OLSConfig write raced another writer");
                Ok(Observed::InProgress)
            }
            Err(e) => {
                self.conditions
                    .mark_false(OPENSTACK_LIGHTSPEED_READY, reasons::ERROR, e.to_string());
                Err(e)
            }
        }
    }

    async fn await_readiness(&mut self) -> Result<Observed, Error> {
        if self.ctx.downstream.is_ready().await? {
            self.conditions.mark_true(
                OPENSTACK_LIGHTSPEED_READY,
                messages::OPENSTACK_LIGHTSPEED_READY,
            );
            info!("OLSConfig is ready");
            Ok(Observed::Complete)
        } else {
            info!("OLSConfig is not ready yet");
            Ok(Observed::InProgress)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc as StdArc, Mutex};

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use lightspeed_common::crd::conditions::READY;
    use lightspeed_common::crd::{ConditionStatus, OpenStackLightspeedSpec};

    use crate::index_job::MockIndexDiscovery;
    use crate::olm::MockOperatorInstaller;
    use crate::ols_config::MockDownstreamConfig;
    use crate::version::MockClusterVersionReader;

    const NAME: &str = "lightspeed";
    const NAMESPACE: &str = "openstack-lightspeed";

    #[derive(Clone)]
    struct StatusCapture {
        updates: StdArc<Mutex<Vec<OpenStackLightspeedStatus>>>,
    }

    impl StatusCapture {
        fn new() -> Self {
            Self {
                updates: StdArc::new(Mutex::new(Vec::new())),
            }
        }

        fn record(&self, status: OpenStackLightspeedStatus) {
            self.updates
                .lock()
                .expect("mutex should not be poisoned")
                .push(status);
        }

        fn last(&self) -> OpenStackLightspeedStatus {
            self.updates
                .lock()
                .expect("mutex should not be poisoned")
                .last()
                .cloned()
                .expect("status should have been written")
        }

        fn was_updated(&self) -> bool {
            !self
                .updates
                .lock()
                .expect("mutex should not be poisoned")
                .is_empty()
        }
    }

    fn sample_instance() -> OpenStackLightspeed {
        let mut instance = OpenStackLightspeed::new(
            NAME,
            OpenStackLightspeedSpec {
                llm_endpoint: "https://llm.example.com/v1".to_string(),
                llm_endpoint_type: "openai".to_string(),
                llm_credentials: "llm-creds".to_string(),
                model_name: "granite-3".to_string(),
                ..Default::default()
            },
        );
        instance.metadata.namespace = Some(NAMESPACE.to_string());
        instance.metadata.uid = Some("uid-1234".to_string());
        instance.metadata.generation = Some(3);
        instance.metadata.finalizers = Some(vec![LIGHTSPEED_FINALIZER.to_string()]);
        instance
    }

    fn deleting_instance() -> OpenStackLightspeed {
        let mut instance = sample_instance();
        instance.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        instance
    }

    /// Collaborators for one test; unset expectations fail the test if called
    struct Mocks {
        kube: MockKubeClient,
        installer: MockOperatorInstaller,
        downstream: MockDownstreamConfig,
        index: MockIndexDiscovery,
        cluster_version: MockClusterVersionReader,
    }

    impl Mocks {
        fn for_instance(instance: OpenStackLightspeed) -> (Self, StatusCapture) {
            let capture = StatusCapture::new();
            let capture_clone = capture.clone();
            let mut kube = MockKubeClient::new();
            kube.expect_get_instance()
                .returning(move |_, _| Ok(Some(instance.clone())));
            kube.expect_patch_status().returning(move |_, _, status| {
                capture_clone.record(status.clone());
                Ok(())
            });
            (
                Self {
                    kube,
                    installer: MockOperatorInstaller::new(),
                    downstream: MockDownstreamConfig::new(),
                    index: MockIndexDiscovery::new(),
                    cluster_version: MockClusterVersionReader::new(),
                },
                capture,
            )
        }

        fn operator_ready(mut self) -> Self {
            self.installer
                .expect_ensure_installed()
                .returning(|_| Ok(true));
            self
        }

        fn context(self) -> Arc<Context> {
            Arc::new(Context::for_testing(
                Arc::new(self.kube),
                Arc::new(self.installer),
                Arc::new(self.downstream),
                Arc::new(self.index),
                Arc::new(self.cluster_version),
            ))
        }
    }

    fn condition_status(status: &OpenStackLightspeedStatus, type_: &str) -> ConditionStatus {
        status
            .conditions
            .get(type_)
            .map(|c| c.status)
            .unwrap_or_default()
    }

    fn condition_message(status: &OpenStackLightspeedStatus, type_: &str) -> String {
        status
            .conditions
            .get(type_)
            .map(|c| c.message.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn missing_instance_is_a_noop() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_instance().returning(|_, _| Ok(None));
        kube.expect_patch_status().never();
        let ctx = Arc::new(Context::for_testing(
            Arc::new(kube),
            Arc::new(MockOperatorInstaller::new()),
            Arc::new(MockDownstreamConfig::new()),
            Arc::new(MockIndexDiscovery::new()),
            Arc::new(MockClusterVersionReader::new()),
        ));

        let action = reconcile(Arc::new(sample_instance()), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    /// Story: a brand new instance gets its finalizer and initial conditions first
    #[tokio::test]
    async fn story_new_instance_gets_finalizer_and_initial_status() {
        let mut instance = sample_instance();
        instance.metadata.finalizers = None;
        let (mut mocks, capture) = Mocks::for_instance(instance);
        mocks.kube.expect_add_finalizer().times(1).returning(|_| Ok(()));
        mocks.installer.expect_ensure_installed().never();

        let action = reconcile(Arc::new(sample_instance()), mocks.context())
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(1)));
        let status = capture.last();
        assert_eq!(status.observed_generation, Some(3));
        for type_ in ALL_CONDITION_TYPES {
            assert_eq!(condition_status(&status, type_), ConditionStatus::Unknown);
        }
    }

    #[tokio::test]
    async fn installing_operator_requeues_after_ten_seconds() {
        let (mut mocks, capture) = Mocks::for_instance(sample_instance());
        mocks
            .installer
            .expect_ensure_installed()
            .returning(|_| Ok(false));

        let action = reconcile(Arc::new(sample_instance()), mocks.context())
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(10)));
        let status = capture.last();
        assert_eq!(
            condition_status(&status, OPENSHIFT_LIGHTSPEED_OPERATOR_READY),
            ConditionStatus::False
        );
        assert_eq!(
            condition_message(&status, READY),
            messages::OLS_OPERATOR_WAITING
        );
    }

    /// Story: a user-installed OpenShift Lightspeed stops reconciliation with a clear condition
    #[tokio::test]
    async fn story_user_installed_operator_blocks_without_requeue() {
        let (mut mocks, capture) = Mocks::for_instance(sample_instance());
        mocks
            .installer
            .expect_ensure_installed()
            .returning(|_| Err(Error::user_installed("lightspeed-operator.v1.0.0")));
        mocks.downstream.expect_upsert().never();

        let action = reconcile(Arc::new(sample_instance()), mocks.context())
            .await
            .unwrap();

        assert_eq!(action, Action::await_change());
        let status = capture.last();
        let condition = status
            .conditions
            .get(OPENSHIFT_LIGHTSPEED_OPERATOR_READY)
            .unwrap();
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, reasons::ERROR);
        assert!(condition.message.contains("lightspeed-operator.v1.0.0"));
        assert_eq!(condition_status(&status, READY), ConditionStatus::False);
    }

    /// Story: with the operator running and OLSConfig healthy, everything reports Ready
    #[tokio::test]
    async fn story_everything_converges_to_ready() {
        let (mocks, capture) = Mocks::for_instance(sample_instance());
        let mut mocks = mocks.operator_ready();
        mocks
            .downstream
            .expect_upsert()
            .withf(|instance, sources| {
                instance.spec.rag_image == lightspeed_common::crd::DEFAULT_RAG_IMAGE
                    && instance.spec.max_tokens_for_response == 2048
                    && *sources == RagSources::default()
            })
            .times(1)
            .returning(|_, _| Ok(true));
        mocks.downstream.expect_is_ready().returning(|| Ok(true));
        mocks.index.expect_discover().never();
        mocks.cluster_version.expect_detect_cluster_version().never();

        let action = reconcile(Arc::new(sample_instance()), mocks.context())
            .await
            .unwrap();

        assert_eq!(action, Action::await_change());
        let status = capture.last();
        for type_ in ALL_CONDITION_TYPES {
            assert_eq!(condition_status(&status, type_), ConditionStatus::True, "{}", type_);
        }
        assert_eq!(condition_message(&status, READY), messages::READY_COMPLETE);
        assert_eq!(
            condition_message(&status, OCP_RAG_READY),
            messages::OCP_RAG_DISABLED
        );
    }

    #[tokio::test]
    async fn olsconfig_not_ready_requeues_after_five_seconds() {
        let (mocks, capture) = Mocks::for_instance(sample_instance());
        let mut mocks = mocks.operator_ready();
        mocks.downstream.expect_upsert().returning(|_, _| Ok(true));
        mocks.downstream.expect_is_ready().returning(|| Ok(false));

        let action = reconcile(Arc::new(sample_instance()), mocks.context())
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(5)));
        assert_eq!(
            condition_message(&capture.last(), OPENSTACK_LIGHTSPEED_READY),
            messages::OPENSTACK_LIGHTSPEED_WAITING_OLS_CONFIG
        );
    }

    #[tokio::test]
    async fn stale_olsconfig_write_requeues_after_five_seconds() {
        let (mocks, _capture) = Mocks::for_instance(sample_instance());
        let mut mocks = mocks.operator_ready();
        mocks.downstream.expect_upsert().returning(|_, _| Ok(false));
        mocks.downstream.expect_is_ready().never();

        let action = reconcile(Arc::new(sample_instance()), mocks.context())
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(5)));
    }

    /// Story: a second instance cannot take the OLSConfig, the pass fails but status is still written
    #[tokio::test]
    async fn story_foreign_olsconfig_fails_pass_and_persists_status() {
        let (mocks, capture) = Mocks::for_instance(sample_instance());
        let mut mocks = mocks.operator_ready();
        mocks
            .downstream
            .expect_upsert()
            .returning(|_, _| Err(Error::ownership("uid-1234", "uid-other")));

        let err = reconcile(Arc::new(sample_instance()), mocks.context())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Ownership { .. }));
        let status = capture.last();
        let condition = status.conditions.get(OPENSTACK_LIGHTSPEED_READY).unwrap();
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, reasons::ERROR);
        assert!(condition.message.contains("different OpenStackLightspeed"));
    }

    /// Story: an unsupported cluster falls back to the latest OpenShift docs
    #[tokio::test]
    async fn story_unsupported_cluster_version_uses_latest_docs() {
        let mut instance = sample_instance();
        instance.spec.enable_ocp_rag = true;
        let (mocks, capture) = Mocks::for_instance(instance.clone());
        let mut mocks = mocks.operator_ready();
        mocks
            .cluster_version
            .expect_detect_cluster_version()
            .returning(|| Ok("4.17".to_string()));
        mocks
            .downstream
            .expect_upsert()
            .withf(|_, sources| sources.ocp_version == "latest")
            .times(1)
            .returning(|_, _| Ok(true));
        mocks.downstream.expect_is_ready().returning(|| Ok(true));

        reconcile(Arc::new(instance), mocks.context()).await.unwrap();

        let status = capture.last();
        assert_eq!(condition_status(&status, OCP_RAG_READY), ConditionStatus::True);
        assert_eq!(
            condition_message(&status, OCP_RAG_READY),
            "Cluster version 4.17 is not explicitly supported. Using 'latest' OCP documentation. Supported versions: [4.16 4.18 latest]"
        );
    }

    #[tokio::test]
    async fn valid_override_skips_detection() {
        let mut instance = sample_instance();
        instance.spec.enable_ocp_rag = true;
        instance.spec.ocp_version_override = Some("4.16".to_string());
        let (mocks, capture) = Mocks::for_instance(instance.clone());
        let mut mocks = mocks.operator_ready();
        mocks.cluster_version.expect_detect_cluster_version().never();
        mocks
            .downstream
            .expect_upsert()
            .withf(|_, sources| sources.ocp_version == "4.16")
            .returning(|_, _| Ok(true));
        mocks.downstream.expect_is_ready().returning(|| Ok(true));

        reconcile(Arc::new(instance), mocks.context()).await.unwrap();
        assert_eq!(
            condition_message(&capture.last(), OCP_RAG_READY),
            "OCP RAG version resolved: 4.16"
        );
    }

    #[tokio::test]
    async fn invalid_override_blocks_before_patching() {
        let mut instance = sample_instance();
        instance.spec.enable_ocp_rag = true;
        instance.spec.ocp_version_override = Some("4.16.2".to_string());
        let (mocks, capture) = Mocks::for_instance(instance.clone());
        let mut mocks = mocks.operator_ready();
        mocks.downstream.expect_upsert().never();

        let action = reconcile(Arc::new(instance), mocks.context()).await.unwrap();

        assert_eq!(action, Action::await_change());
        let status = capture.last();
        assert_eq!(condition_status(&status, OCP_RAG_READY), ConditionStatus::False);
        assert!(condition_message(&status, OCP_RAG_READY)
            .starts_with(messages::OCP_RAG_INVALID_OVERRIDE));
    }

    #[tokio::test]
    async fn failed_version_detection_fails_pass() {
        let mut instance = sample_instance();
        instance.spec.enable_ocp_rag = true;
        let (mocks, capture) = Mocks::for_instance(instance.clone());
        let mut mocks = mocks.operator_ready();
        mocks
            .cluster_version
            .expect_detect_cluster_version()
            .returning(|| Err(Error::internal("api unavailable")));
        mocks.downstream.expect_upsert().never();

        assert!(reconcile(Arc::new(instance), mocks.context()).await.is_err());
        assert!(condition_message(&capture.last(), OCP_RAG_READY)
            .starts_with(messages::OCP_RAG_DETECTION_FAILED));
    }

    /// Story: with index discovery on, the pass waits for the discovery pod then uses its answer
    #[tokio::test]
    async fn story_index_discovery_waits_for_pod() {
        let mut instance = sample_instance();
        instance.spec.index_discovery = true;
        let (mocks, capture) = Mocks::for_instance(instance.clone());
        let mut mocks = mocks.operator_ready();
        mocks
            .index
            .expect_discover()
            .withf(|_, image| image == lightspeed_common::crd::DEFAULT_RAG_IMAGE)
            .returning(|_, _| Ok(IndexLookup::Waiting));
        mocks.downstream.expect_upsert().never();

        let action = reconcile(Arc::new(instance), mocks.context()).await.unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(5)));
        assert_eq!(
            condition_message(&capture.last(), OPENSTACK_LIGHTSPEED_READY),
            messages::OPENSTACK_LIGHTSPEED_WAITING_VECTOR_DB
        );
    }

    #[tokio::test]
    async fn discovered_index_is_passed_to_olsconfig() {
        let mut instance = sample_instance();
        instance.spec.index_discovery = true;
        let (mocks, _capture) = Mocks::for_instance(instance.clone());
        let mut mocks = mocks.operator_ready();
        mocks
            .index
            .expect_discover()
            .returning(|_, _| Ok(IndexLookup::Found("os-docs-2024.2".to_string())));
        mocks
            .downstream
            .expect_upsert()
            .withf(|_, sources| sources.primary_index_id.as_deref() == Some("os-docs-2024.2"))
            .times(1)
            .returning(|_, _| Ok(true));
        mocks.downstream.expect_is_ready().returning(|| Ok(true));

        reconcile(Arc::new(instance), mocks.context()).await.unwrap();
    }

    #[tokio::test]
    async fn failed_discovery_pod_blocks() {
        let mut instance = sample_instance();
        instance.spec.index_discovery = true;
        let (mocks, capture) = Mocks::for_instance(instance.clone());
        let mut mocks = mocks.operator_ready();
        mocks.index.expect_discover().returning(|_, _| {
            Err(Error::index_discovery("openstack-lightspeed-abc", "pod failed"))
        });

        let action = reconcile(Arc::new(instance), mocks.context()).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(
            condition_status(&capture.last(), OPENSTACK_LIGHTSPEED_READY),
            ConditionStatus::False
        );
    }

    /// Story: deletion waits for the OLSConfig to go before touching the operator
    #[tokio::test]
    async fn story_deletion_waits_for_olsconfig_removal() {
        let (mut mocks, _capture) = Mocks::for_instance(deleting_instance());
        mocks.downstream.expect_remove().returning(|_| Ok(false));
        mocks.installer.expect_uninstall().never();
        mocks.kube.expect_remove_finalizer().never();

        let action = reconcile(Arc::new(deleting_instance()), mocks.context())
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn deletion_waits_for_operator_uninstall() {
        let (mut mocks, _capture) = Mocks::for_instance(deleting_instance());
        mocks.downstream.expect_remove().returning(|_| Ok(true));
        mocks.installer.expect_uninstall().returning(|_| Ok(false));
        mocks.kube.expect_remove_finalizer().never();

        let action = reconcile(Arc::new(deleting_instance()), mocks.context())
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));
    }

    /// Story: once everything is cleaned up the finalizer is released
    #[tokio::test]
    async fn story_deletion_releases_finalizer() {
        let (mut mocks, _capture) = Mocks::for_instance(deleting_instance());
        mocks.downstream.expect_remove().returning(|_| Ok(true));
        mocks.installer.expect_uninstall().returning(|_| Ok(true));
        mocks
            .kube
            .expect_remove_finalizer()
            .times(1)
            .returning(|_| Ok(()));
        mocks.installer.expect_ensure_installed().never();

        let action = reconcile(Arc::new(deleting_instance()), mocks.context())
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn status_write_for_deleted_instance_is_ignored() {
        let mut client = MockKubeClient::new();
        client.expect_get_instance()
            .returning(|_, _| Ok(Some(deleting_instance())));
        client.expect_remove_finalizer().returning(|_| Ok(()));
        client.expect_patch_status().returning(|_, _, _| {
            Err(Error::from(kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: "not found".to_string(),
                reason: "NotFound".to_string(),
                code: 404,
            })))
        });
        let mut downstream = MockDownstreamConfig::new();
        downstream.expect_remove().returning(|_| Ok(true));
        let mut installer = MockOperatorInstaller::new();
        installer.expect_uninstall().returning(|_| Ok(true));
        let ctx = Arc::new(Context::for_testing(
            Arc::new(client),
            Arc::new(installer),
            Arc::new(downstream),
            Arc::new(MockIndexDiscovery::new()),
            Arc::new(MockClusterVersionReader::new()),
        ));

        let action = reconcile(Arc::new(deleting_instance()), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    /// Story: unchanged conditions keep their original transition time across passes
    #[tokio::test]
    async fn story_transition_time_survives_unchanged_status() {
        let mut instance = sample_instance();
        let mut conditions = ConditionList::default();
        conditions.init(&ALL_CONDITION_TYPES);
        conditions.mark_false(
            OPENSHIFT_LIGHTSPEED_OPERATOR_READY,
            reasons::REQUESTED,
            messages::OLS_OPERATOR_WAITING,
        );
        let earlier = chrono::Utc::now() - chrono::Duration::hours(1);
        for condition in &mut conditions.0 {
            condition.last_transition_time = earlier;
        }
        instance.status = Some(OpenStackLightspeedStatus {
            observed_generation: Some(2),
            conditions,
        });

        let (mut mocks, capture) = Mocks::for_instance(instance.clone());
        mocks
            .installer
            .expect_ensure_installed()
            .returning(|_| Ok(false));

        reconcile(Arc::new(instance), mocks.context()).await.unwrap();

        let status = capture.last();
        assert_eq!(status.observed_generation, Some(3));
        let condition = status
            .conditions
            .get(OPENSHIFT_LIGHTSPEED_OPERATOR_READY)
            .unwrap();
        assert_eq!(condition.last_transition_time, earlier);
    }

    /// Story: a panic inside a pass leaves the status untouched and propagates
    #[tokio::test]
    async fn story_panic_skips_status_write() {
        let (mut mocks, capture) = Mocks::for_instance(sample_instance());
        mocks
            .installer
            .expect_ensure_installed()
            .returning(|_| panic!("installer exploded"));

        let outcome = AssertUnwindSafe(reconcile(Arc::new(sample_instance()), mocks.context()))
            .catch_unwind()
            .await;

        assert!(outcome.is_err());
        assert!(!capture.was_updated());
    }

    #[test]
    fn error_policy_requeues_after_ten_seconds() {
        let (mocks, _capture) = Mocks::for_instance(sample_instance());
        let action = error_policy(
            Arc::new(sample_instance()),
            &Error::internal("boom"),
            mocks.context(),
        );
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));
    }
}
