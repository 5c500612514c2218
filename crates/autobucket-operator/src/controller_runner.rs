//! Controller runner - builds the controller futures
//!
//! Each `build_*` function returns a boxed future that runs one controller
//! until shutdown. The caller decides how to compose them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use autobucket_bucket::{error_policy, reconcile, Context};
use autobucket_common::crd::Bucket;
use autobucket_provisioner as provisioner;
use autobucket_storage::CloudAdapters;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
///
/// The API server closes the watch before the client times out, so idle
/// watches do not fail with "body read timed out".
const WATCH_TIMEOUT_SECS: u32 = 25;

/// A controller running until shutdown
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Bucket lifecycle controller over Buckets in every namespace
pub fn build_bucket_controller(client: Client, adapters: CloudAdapters) -> ControllerFuture {
    tracing::info!(clouds = ?adapters.clouds(), "- Bucket controller");

    let ctx = Arc::new(Context::new(client.clone(), adapters));
    let buckets: Api<Bucket> = Api::all(client);

    Box::pin(
        Controller::new(buckets, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("Bucket")),
    )
}

/// Provisioning controller over Deployments, re-triggered by the Buckets they own
pub fn build_provisioning_controller(client: Client) -> ControllerFuture {
    tracing::info!("- Deployment provisioning controller");

    let ctx = Arc::new(provisioner::ProvisionerContext::new(client.clone()));
    let deployments: Api<Deployment> = Api::all(client.clone());
    let buckets: Api<Bucket> = Api::all(client);

    Box::pin(
        Controller::new(
            deployments,
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
        )
        .owns(buckets, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .shutdown_on_signal()
        .run(provisioner::reconcile, provisioner::error_policy, ctx)
        .for_each(log_reconcile_result("Provisioning")),
    )
}

/// Every controller the operator runs
pub fn build_controllers(client: Client, adapters: CloudAdapters) -> Vec<ControllerFuture> {
    vec![
        build_bucket_controller(client.clone(), adapters),
        build_provisioning_controller(client),
    ]
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
