//! OpenStack Lightspeed Operator - OpenShift Lightspeed for OpenStack

use clap::{Parser, Subcommand};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};

use lightspeed_common::telemetry::{init_telemetry, TelemetryConfig};
use lightspeed_common::FIELD_MANAGER;
use lightspeed_operator::config::OperatorConfig;
use lightspeed_operator::controller_runner::run_controller;
use lightspeed_operator::crd::OpenStackLightspeed;

/// Deploys OpenShift Lightspeed configured for OpenStack
#[derive(Parser, Debug)]
#[command(name = "lightspeed-operator", version, about, long_about = None)]
struct Cli {
    /// Print the OpenStackLightspeed CRD and exit
    #[arg(long)]
    crd: bool,

    /// OpenShift Lightspeed operator version to install, or "latest"
    #[arg(long, env = "OPENSHIFT_LIGHTSPEED_OPERATOR_VERSION")]
    recommended_ols_version: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller (default mode)
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!(
            "CRITICAL: Failed to install aws-lc-rs crypto provider: {:?}. \
             The operator cannot talk to the API server without a working TLS implementation.",
            e
        );
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&OpenStackLightspeed::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig::default())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    match cli.command {
        Some(Commands::Controller) | None => start(cli.recommended_ols_version).await,
    }
}

async fn start(recommended_ols_version: Option<String>) -> anyhow::Result<()> {
    let config = OperatorConfig::new(recommended_ols_version)?;
    tracing::info!(recommended_version = ?config.recommended_version, "starting OpenStack Lightspeed operator");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crd_installed(&client).await?;
    run_controller(client, config).await;

    tracing::info!("controller stopped");
    Ok(())
}

/// Install the OpenStackLightspeed CRD by server-side apply so it always matches this binary
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!("Installing OpenStackLightspeed CRD...");
    crds.patch(
        "openstacklightspeeds.lightspeed.openstack.org",
        &params,
        &Patch::Apply(&OpenStackLightspeed::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install OpenStackLightspeed CRD: {}", e))?;

    Ok(())
}
