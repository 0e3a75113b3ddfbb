//! Vector DB index discovery
//!
//! The index name is only known to the RAG image itself, which exports it as
//! `INDEX_NAME`. A short-lived Job runs the image with `env` as its entrypoint
//! and the value is read back from the pod logs.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, ListParams, LogParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use lightspeed_common::crd::OpenStackLightspeed;
use lightspeed_common::kube_utils::sha256_hex;
use lightspeed_common::Error;

/// Prefix of discovery Job names and value of their `app` label
pub const JOB_APP_LABEL: &str = "openstack-lightspeed";

/// Environment variable the RAG image uses to advertise its index
pub const INDEX_NAME_ENV: &str = "INDEX_NAME";

const JOB_TTL_SECONDS_AFTER_FINISHED: i32 = 600;
const JOB_ACTIVE_DEADLINE_SECONDS: i64 = 1200;
const CONTAINER_NAME: &str = "rag-content";

/// Result of one discovery attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexLookup {
    /// The image reported this index name
    Found(String),
    /// The Job has not produced an answer yet
    Waiting,
}

/// Job name for an image: the app label plus the last 9 hex chars of its SHA-256.
///
/// Stable for a given image, so repeated reconciles reuse the same Job.
pub fn job_name(rag_image: &str) -> String {
    let digest = sha256_hex(rag_image);
    format!("{}-{}", JOB_APP_LABEL, &digest[digest.len() - 9..])
}

fn app_labels() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), JOB_APP_LABEL.to_string())])
}

/// Discovery Job for `instance`, controlled by it so it is garbage collected with it
pub fn build_job(instance: &OpenStackLightspeed, rag_image: &str) -> Job {
    Job {
        metadata: ObjectMeta {
            name: Some(job_name(rag_image)),
            namespace: instance.namespace(),
            labels: Some(app_labels()),
            owner_references: instance.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            ttl_seconds_after_finished: Some(JOB_TTL_SECONDS_AFTER_FINISHED),
            active_deadline_seconds: Some(JOB_ACTIVE_DEADLINE_SECONDS),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(app_labels()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: CONTAINER_NAME.to_string(),
                        image: Some(rag_image.to_string()),
                        command: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
                        args: Some(vec!["env".to_string()]),
                        ..Default::default()
                    }],
                    restart_policy: Some("Never".to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Value of `name` in `env` style output (`KEY=value` per line)
pub fn parse_env(logs: &str, name: &str) -> Option<String> {
    logs.lines()
        .filter_map(|line| line.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

fn runs_image(pod: &Pod, image: &str) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.containers.first())
        .and_then(|c| c.image.as_deref())
        == Some(image)
}

fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Pending")
}

/// Kubernetes access needed by index discovery
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IndexJobClient: Send + Sync {
    /// Create the Job; an existing Job with the same name is fine
    async fn create_job(&self, job: &Job) -> Result<(), Error>;

    /// Pods in `namespace` matching `label_selector`
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, Error>;

    /// Full logs of a pod, `None` if they are not available
    async fn pod_logs(&self, namespace: &str, name: &str) -> Result<Option<String>, Error>;
}

/// kube-rs backed [`IndexJobClient`]
pub struct IndexJobClientImpl {
    client: Client,
}

impl IndexJobClientImpl {
    /// Create a new IndexJobClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IndexJobClient for IndexJobClientImpl {
    async fn create_job(&self, job: &Job) -> Result<(), Error> {
        let namespace = job.namespace().unwrap_or_default();
        let api: Api<Job> = Api::namespaced(self.client.clone(), &namespace);
        match api.create(&PostParams::default(), job).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api.list(&ListParams::default().labels(label_selector)).await?;
        Ok(pods.items)
    }

    async fn pod_logs(&self, namespace: &str, name: &str) -> Result<Option<String>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.logs(name, &LogParams::default()).await {
            Ok(logs) => Ok(Some(logs)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Finds the vector DB index name for an instance's RAG image
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IndexDiscovery: Send + Sync {
    /// Make progress on discovery for `rag_image`, owned by `instance`
    async fn discover(
        &self,
        instance: &OpenStackLightspeed,
        rag_image: &str,
    ) -> Result<IndexLookup, Error>;
}

/// [`IndexDiscovery`] that runs the RAG image as a Job
pub struct JobIndexDiscovery {
    client: Arc<dyn IndexJobClient>,
}

impl JobIndexDiscovery {
    /// Create a discoverer over the given client
    pub fn new(client: Arc<dyn IndexJobClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IndexDiscovery for JobIndexDiscovery {
    async fn discover(
        &self,
        instance: &OpenStackLightspeed,
        rag_image: &str,
    ) -> Result<IndexLookup, Error> {
        let job = build_job(instance, rag_image);
        let name = job.name_any();
        let namespace = instance.namespace().unwrap_or_default();
        self.client.create_job(&job).await?;

        let pods = self
            .client
            .list_pods(&namespace, &format!("app={}", JOB_APP_LABEL))
            .await?;
        let Some(pod) = pods.iter().find(|p| runs_image(p, rag_image)) else {
            debug!(job = %name, "index discovery pod not scheduled yet");
            return Ok(IndexLookup::Waiting);
        };

        match pod_phase(pod) {
            "Succeeded" => {
                let Some(logs) = self.client.pod_logs(&namespace, &pod.name_any()).await? else {
                    return Ok(IndexLookup::Waiting);
                };
                let index = parse_env(&logs, INDEX_NAME_ENV).ok_or_else(|| {
                    Error::index_discovery(
                        &name,
                        format!("{} not found in pod output", INDEX_NAME_ENV),
                    )
                })?;
                info!(job = %name, index = %index, "discovered vector DB index");
                Ok(IndexLookup::Found(index))
            }
            "Failed" => Err(Error::index_discovery(
                &name,
                "failed to start OpenStack Lightspeed RAG pod",
            )),
            _ => Ok(IndexLookup::Waiting),
        }
    }
}
