//! autobucket operator - cloud buckets for annotated Deployments

use std::sync::Arc;

use clap::{Parser, Subcommand};
use kube::{Client, CustomResourceExt};

use autobucket_common::crd::Bucket;
use autobucket_common::leader_election::LeaderElector;
use autobucket_common::telemetry::{init_telemetry, TelemetryConfig};
use autobucket_operator::config::{build_adapters, ControllerArgs};
use autobucket_operator::controller_runner::build_controllers;
use autobucket_operator::health::{self, Readiness};
use autobucket_operator::startup::{ensure_crds_installed, leader_identity};

/// autobucket - provisions cloud storage buckets for Kubernetes workloads
#[derive(Parser, Debug)]
#[command(name = "autobucket", version, about, long_about = None)]
struct Cli {
    /// Print the Bucket CRD manifest and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    controller: ControllerArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controllers (default mode)
    ///
    /// - Watches Buckets and creates or deletes their cloud buckets
    /// - Watches Deployments and creates a Bucket for each one annotated
    ///   with `ab.leclouddev.com/cloud`
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Bucket::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.controller).await,
    }
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    init_telemetry(TelemetryConfig::default())?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;
    let adapters = build_adapters(&args.gcp)?;

    let readiness = Readiness::new();
    {
        let readiness = readiness.clone();
        let addr = args.health_addr;
        tokio::spawn(async move {
            if let Err(e) = health::serve(addr, readiness).await {
                tracing::error!(error = %e, "Health server failed");
            }
        });
    }

    let guard = if args.enable_leader_election {
        let identity = leader_identity();
        tracing::info!(%identity, namespace = %args.lease_namespace, "Waiting for leadership...");
        let elector = Arc::new(LeaderElector::new(
            client.clone(),
            &args.lease_namespace,
            &identity,
        ));
        Some(elector.acquire().await)
    } else {
        None
    };

    tracing::info!("Starting autobucket controllers");
    let controllers = futures::future::join_all(build_controllers(client, adapters));
    readiness.mark_ready();

    match guard {
        Some(mut guard) => {
            let lost = tokio::select! {
                _ = controllers => false,
                _ = guard.lost() => true,
            };
            readiness.mark_not_ready();
            if lost {
                anyhow::bail!("Leadership lost, exiting so another replica can take over");
            }
            guard.release().await?;
        }
        None => {
            controllers.await;
            readiness.mark_not_ready();
        }
    }

    tracing::info!("Controllers stopped");
    Ok(())
}
