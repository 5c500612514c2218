//! One-time startup steps

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};

use autobucket_common::crd::Bucket;
use autobucket_common::FIELD_MANAGER;

/// Name of the Bucket CRD object
pub const BUCKET_CRD_NAME: &str = "buckets.ab.leclouddev.com";

/// Install or update the Bucket CRD with server-side apply
///
/// The operator owns its CRD, so the installed schema always matches the
/// running version.
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!("Installing Bucket CRD...");
    crds.patch(BUCKET_CRD_NAME, &params, &Patch::Apply(&Bucket::crd()))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to install Bucket CRD: {}", e))?;

    tracing::info!("Bucket CRD installed/updated");
    Ok(())
}

/// Identity this replica uses in the leader Lease
pub fn leader_identity() -> String {
    identity_from(
        std::env::var("POD_NAME").ok(),
        std::env::var("HOSTNAME").ok(),
    )
}

fn identity_from(pod_name: Option<String>, hostname: Option<String>) -> String {
    pod_name
        .filter(|n| !n.is_empty())
        .or(hostname.filter(|n| !n.is_empty()))
        .unwrap_or_else(|| format!("autobucket-{}", std::process::id()))
}
