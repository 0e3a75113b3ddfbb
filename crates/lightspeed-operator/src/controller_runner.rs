//! Controller runner - wires the OpenStackLightspeed controller to its watches

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};

use lightspeed_common::crd::{ClusterServiceVersion, InstallPlan, OpenStackLightspeed, Subscription};

use crate::config::OperatorConfig;
use crate::controller::{error_policy, reconcile, Context};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Every instance living in `namespace`
///
/// OLM does not put owner references on InstallPlans, so a change to one
/// wakes up all instances in its namespace.
pub fn instances_in_namespace(
    instances: &[Arc<OpenStackLightspeed>],
    namespace: Option<&str>,
) -> Vec<ObjectRef<OpenStackLightspeed>> {
    let Some(namespace) = namespace else {
        return Vec::new();
    };
    instances
        .iter()
        .filter(|instance| instance.namespace().as_deref() == Some(namespace))
        .map(|instance| ObjectRef::from_obj(instance.as_ref()))
        .collect()
}

/// Run the OpenStackLightspeed controller until a shutdown signal arrives
pub async fn run_controller(client: Client, config: OperatorConfig) {
    let ctx = Arc::new(Context::builder(client.clone(), config).build());

    let instances: Api<OpenStackLightspeed> = Api::all(client.clone());
    let subscriptions: Api<Subscription> = Api::all(client.clone());
    let csvs: Api<ClusterServiceVersion> = Api::all(client.clone());
    let install_plans: Api<InstallPlan> = Api::all(client);

    tracing::info!("- OpenStackLightspeed controller");

    let controller = Controller::new(
        instances,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    );
    let store = controller.store();

    controller
        .owns(
            subscriptions,
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
        )
        .owns(csvs, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .watches(
            install_plans,
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
            move |plan| {
                let affected = instances_in_namespace(&store.state(), plan.namespace().as_deref());
                tracing::debug!(
                    install_plan = %plan.name_any(),
                    affected_count = affected.len(),
                    "InstallPlan changed, requeueing instances in its namespace"
                );
                affected
            },
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("OpenStackLightspeed"))
        .await;
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
