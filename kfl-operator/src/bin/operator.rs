//! KFL Kubernetes Operator binary.
//!
//! Watches FLCluster resources and the Deployments, Services and claims they
//! own, and converges each cluster on every change.

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};
use kfl_operator::config::OperatorConfig;
use kfl_operator::controller::{
    ControllerContext, FLClusterController, ReconcileAction, error_policy,
};
use kfl_operator::crd::FLCluster;
use kfl_operator::telemetry::{self, TracingConfig};
use kube::runtime::Controller;
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, CustomResourceExt};
use std::sync::Arc;

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "kfl-operator", version, about = "FLCluster operator")]
struct Args {
    /// Print the FLCluster CRD as YAML and exit.
    #[arg(long)]
    generate_crds: bool,

    /// Log filter directives, overriding KFL_LOG_LEVEL.
    #[arg(long, env = "KFL_LOG_FILTER")]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.generate_crds {
        generate_crds()?;
        return Ok(());
    }

    let mut tracing_config = TracingConfig::from_env();
    if let Some(filter) = args.log_filter {
        tracing_config = tracing_config.with_filter(filter);
    }
    telemetry::init_tracing(&tracing_config)?;

    tracing::info!("Starting KFL Kubernetes Operator");

    let config = OperatorConfig::from_env()?;
    tracing::info!(
        central_server_image = %config.central_server_image,
        edge_server_image = %config.edge_server_image,
        edge_client_image = %config.edge_client_image,
        local_storage = config.uses_local_storage(),
        "Operator configuration loaded"
    );

    let client = Client::try_default().await?;
    tracing::info!("Connected to Kubernetes cluster");

    let ctx = Arc::new(ControllerContext::for_client(client.clone(), config));
    run_controller(client, ctx).await
}

/// Run the FLCluster controller until a shutdown signal arrives.
async fn run_controller(client: Client, ctx: Arc<ControllerContext>) -> anyhow::Result<()> {
    tracing::info!("Starting FLCluster controller");

    let clusters: Api<FLCluster> = Api::all(client.clone());
    let controller = FLClusterController::new(ctx.clone());

    Controller::new(clusters, WatcherConfig::default())
        .owns(Api::<Deployment>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<Service>::all(client.clone()), WatcherConfig::default())
        .owns(
            Api::<PersistentVolumeClaim>::all(client),
            WatcherConfig::default(),
        )
        .shutdown_on_signal()
        .run(
            move |cluster, _ctx| {
                let controller = controller.clone();
                async move {
                    controller
                        .reconcile_object(&cluster)
                        .await
                        .map(|ReconcileAction::Done| Action::await_change())
                }
            },
            error_policy,
            ctx,
        )
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    tracing::debug!(
                        cluster = %obj.name,
                        namespace = obj.namespace.as_deref().unwrap_or_default(),
                        ?action,
                        "Reconciled FLCluster"
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "FLCluster controller stream error");
                }
            }
        })
        .await;

    tracing::info!("FLCluster controller stopped");
    Ok(())
}

/// Print CRD YAML.
fn generate_crds() -> anyhow::Result<()> {
    println!("---");
    println!("{}", serde_yaml::to_string(&FLCluster::crd())?);
    Ok(())
}
