//! Bucket controller implementation
//!
//! Each reconcile re-reads the Bucket, asks [`plan`] for one step, and
//! performs it. The cloud adapter call is the only side effect outside the
//! Kubernetes API. Every store write carries the resourceVersion that was
//! read, so a stale pass fails with a conflict instead of overwriting newer
//! state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use autobucket_common::backoff::ReconcileBackoff;
use autobucket_common::crd::{Bucket, BucketCloud};
use autobucket_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use autobucket_common::finalizers::FinalizerSet;
use autobucket_common::metrics::{self, AdapterOperation, ReconcileTimer};
use autobucket_common::{Error, BUCKET_FINALIZER, FIELD_MANAGER};
use autobucket_storage::{CloudAdapters, CloudStorageAdapter};

use crate::state::{plan, LifecycleState, LifecycleStep};

/// Name reported on Events and metrics
pub const CONTROLLER_NAME: &str = "autobucket-bucket-controller";

/// Kubernetes operations the bucket controller needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BucketClient: Send + Sync {
    /// Read a Bucket; None if it does not exist
    async fn get_bucket(&self, namespace: &str, name: &str) -> Result<Option<Bucket>, Error>;

    /// Replace the finalizer list, conditional on the Bucket's resourceVersion
    async fn patch_finalizers(&self, bucket: &Bucket, finalizers: Vec<String>)
        -> Result<(), Error>;

    /// Set `status.createdAt`, conditional on the Bucket's resourceVersion
    async fn patch_created_at(&self, bucket: &Bucket, created_at: &str) -> Result<(), Error>;
}

/// [`BucketClient`] backed by the API server
pub struct BucketClientImpl {
    client: Client,
}

impl BucketClientImpl {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, bucket: &Bucket) -> Result<(Api<Bucket>, String), Error> {
        let name = bucket.name_any();
        let namespace = bucket
            .namespace()
            .ok_or_else(|| Error::validation_for(&name, "bucket has no namespace"))?;
        Ok((Api::namespaced(self.client.clone(), &namespace), name))
    }
}

#[async_trait]
impl BucketClient for BucketClientImpl {
    async fn get_bucket(&self, namespace: &str, name: &str) -> Result<Option<Bucket>, Error> {
        let api: Api<Bucket> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_finalizers(
        &self,
        bucket: &Bucket,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let (api, name) = self.api(bucket)?;
        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": bucket.resource_version(),
                "finalizers": finalizers,
            }
        });
        api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::kube_for(&name, e))?;
        Ok(())
    }

    async fn patch_created_at(&self, bucket: &Bucket, created_at: &str) -> Result<(), Error> {
        let (api, name) = self.api(bucket)?;
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": bucket.resource_version() },
            "status": { "createdAt": created_at },
        });
        api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::kube_for(&name, e))?;
        Ok(())
    }
}

/// Shared state for every bucket reconcile
pub struct Context {
    /// Kubernetes access
    pub kube: Arc<dyn BucketClient>,
    /// Storage adapters by cloud
    pub adapters: CloudAdapters,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Per-object retry delays
    pub backoff: ReconcileBackoff,
}

impl Context {
    /// Production context
    pub fn new(client: Client, adapters: CloudAdapters) -> Self {
        Self {
            kube: Arc::new(BucketClientImpl::new(client.clone())),
            adapters,
            events: Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME)),
            backoff: ReconcileBackoff::new(),
        }
    }

    /// Context with injected collaborators
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn BucketClient>,
        adapters: CloudAdapters,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            kube,
            adapters,
            events,
            backoff: ReconcileBackoff::new(),
        }
    }
}

fn object_key(bucket: &Bucket) -> String {
    format!(
        "{}/{}",
        bucket.namespace().unwrap_or_default(),
        bucket.name_any()
    )
}

/// Reconcile one Bucket
#[instrument(
    skip(bucket, ctx),
    fields(bucket = %bucket.name_any(), namespace = ?bucket.namespace())
)]
pub async fn reconcile(bucket: Arc<Bucket>, ctx: Arc<Context>) -> Result<Action, Error> {
    let timer = ReconcileTimer::start("bucket");
    match reconcile_bucket(&bucket, &ctx).await {
        Ok(action) => {
            ctx.backoff.reset(&object_key(&bucket));
            timer.success();
            Ok(action)
        }
        Err(e) => {
            timer.error(e.kind());
            Err(e)
        }
    }
}

async fn reconcile_bucket(bucket: &Bucket, ctx: &Context) -> Result<Action, Error> {
    let name = bucket.name_any();
    let namespace = bucket
        .namespace()
        .ok_or_else(|| Error::validation_for(&name, "bucket has no namespace"))?;

    let current = ctx.kube.get_bucket(&namespace, &name).await?;
    let state = LifecycleState::observe(current.as_ref());
    let step = plan(current.as_ref());
    debug!(state = state.as_str(), ?step, "planned");

    let Some(current) = current else {
        debug!("bucket no longer exists");
        return Ok(Action::await_change());
    };

    match step {
        LifecycleStep::Done | LifecycleStep::Steady => Ok(Action::await_change()),
        LifecycleStep::AddFinalizer => add_finalizer(&current, ctx).await,
        LifecycleStep::Create { cloud, full_name } => {
            create_cloud_bucket(&current, ctx, &cloud, &full_name).await
        }
        LifecycleStep::Destroy { cloud, full_name } => {
            destroy_cloud_bucket(&current, ctx, &cloud, &full_name).await
        }
        LifecycleStep::Retain => {
            release_finalizer(&current, ctx).await?;
            info!(full_name = %current.spec.full_name, "Finalizer released, cloud bucket retained");
            publish(
                ctx,
                &current,
                EventType::Normal,
                reasons::BUCKET_RETAINED,
                actions::FINALIZE,
                format!("cloud bucket {} left in place", current.spec.full_name),
            )
            .await;
            Ok(Action::await_change())
        }
    }
}

async fn add_finalizer(bucket: &Bucket, ctx: &Context) -> Result<Action, Error> {
    let mut finalizers = FinalizerSet::from_meta(&bucket.metadata);
    finalizers.add(BUCKET_FINALIZER);
    ctx.kube
        .patch_finalizers(bucket, finalizers.into_vec())
        .await?;

    info!("Finalizer added");
    publish(
        ctx,
        bucket,
        EventType::Normal,
        reasons::FINALIZER_ADDED,
        actions::FINALIZE,
        format!("added {BUCKET_FINALIZER}"),
    )
    .await;
    Ok(Action::requeue(Duration::ZERO))
}

async fn release_finalizer(bucket: &Bucket, ctx: &Context) -> Result<(), Error> {
    let mut finalizers = FinalizerSet::from_meta(&bucket.metadata);
    if finalizers.remove(BUCKET_FINALIZER) {
        ctx.kube
            .patch_finalizers(bucket, finalizers.into_vec())
            .await?;
    }
    Ok(())
}

/// Adapter for `cloud`, or a Warning event and None if there is none
async fn adapter_for(
    bucket: &Bucket,
    ctx: &Context,
    cloud: &BucketCloud,
    action: &str,
) -> Option<Arc<dyn CloudStorageAdapter>> {
    if let Some(adapter) = ctx.adapters.get(cloud) {
        return Some(adapter);
    }
    let err = Error::unrecognized_cloud(bucket.name_any(), cloud.as_str());
    warn!(cloud = %cloud, error = %err, "No storage adapter for cloud, skipping");
    publish(
        ctx,
        bucket,
        EventType::Warning,
        reasons::UNRECOGNIZED_CLOUD,
        action,
        format!("cloud {:?} is not supported", cloud.as_str()),
    )
    .await;
    None
}

async fn create_cloud_bucket(
    bucket: &Bucket,
    ctx: &Context,
    cloud: &BucketCloud,
    full_name: &str,
) -> Result<Action, Error> {
    let Some(adapter) = adapter_for(bucket, ctx, cloud, actions::CREATE).await else {
        return Ok(Action::await_change());
    };

    if let Err(e) = adapter.create_bucket(full_name).await {
        metrics::record_adapter_operation(cloud.as_str(), AdapterOperation::Create, false);
        let err = Error::adapter(cloud.as_str(), full_name, e.to_string());
        publish(
            ctx,
            bucket,
            EventType::Warning,
            reasons::BUCKET_CREATE_FAILED,
            actions::CREATE,
            err.to_string(),
        )
        .await;
        return Err(err);
    }
    metrics::record_adapter_operation(cloud.as_str(), AdapterOperation::Create, true);

    let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    ctx.kube.patch_created_at(bucket, &created_at).await?;

    info!(%full_name, %created_at, "Cloud bucket created");
    publish(
        ctx,
        bucket,
        EventType::Normal,
        reasons::BUCKET_CREATED,
        actions::CREATE,
        format!("created {cloud} bucket {full_name}"),
    )
    .await;
    Ok(Action::requeue(Duration::ZERO))
}

async fn destroy_cloud_bucket(
    bucket: &Bucket,
    ctx: &Context,
    cloud: &BucketCloud,
    full_name: &str,
) -> Result<Action, Error> {
    // Finalizer stays: never drop a cloud bucket we could not delete
    let Some(adapter) = adapter_for(bucket, ctx, cloud, actions::DELETE).await else {
        return Ok(Action::await_change());
    };

    if let Err(e) = adapter.delete_bucket(full_name).await {
        metrics::record_adapter_operation(cloud.as_str(), AdapterOperation::Delete, false);
        let err = Error::adapter(cloud.as_str(), full_name, e.to_string());
        publish(
            ctx,
            bucket,
            EventType::Warning,
            reasons::BUCKET_DELETE_FAILED,
            actions::DELETE,
            err.to_string(),
        )
        .await;
        return Err(err);
    }
    metrics::record_adapter_operation(cloud.as_str(), AdapterOperation::Delete, true);

    release_finalizer(bucket, ctx).await?;
    info!(%full_name, "Cloud bucket destroyed, finalizer released");
    publish(
        ctx,
        bucket,
        EventType::Normal,
        reasons::BUCKET_DELETED,
        actions::DELETE,
        format!("deleted {cloud} bucket {full_name}"),
    )
    .await;
    Ok(Action::await_change())
}

async fn publish(
    ctx: &Context,
    bucket: &Bucket,
    type_: EventType,
    reason: &str,
    action: &str,
    note: String,
) {
    ctx.events
        .publish(&bucket.object_ref(&()), type_, reason, action, Some(note))
        .await;
}

/// Requeue policy for failed reconciles
///
/// Transient failures back off per object; anything else waits for the
/// object to change.
pub fn error_policy(bucket: Arc<Bucket>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = object_key(&bucket);
    if error.is_retryable() {
        let delay = ctx.backoff.next_delay(&key);
        warn!(
            bucket = %key,
            error = %error,
            retry_in_ms = delay.as_millis() as u64,
            "Bucket reconcile failed, retrying"
        );
        Action::requeue(delay)
    } else {
        error!(bucket = %key, error = %error, "Bucket reconcile failed permanently");
        Action::await_change()
    }
}
