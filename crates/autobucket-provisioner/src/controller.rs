//! Deployment reconciler that creates derived Buckets
//!
//! Existing Buckets are never updated: once a Bucket with the Deployment's
//! name exists, later annotation edits are not propagated.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, PostParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use autobucket_common::backoff::ReconcileBackoff;
use autobucket_common::crd::Bucket;
use autobucket_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use autobucket_common::metrics::ReconcileTimer;
use autobucket_common::{Error, FIELD_MANAGER};

use crate::derive::{desired_bucket, WorkloadAnnotationView};

/// Name reported on Events and metrics
pub const CONTROLLER_NAME: &str = "autobucket-provisioning-controller";

/// Kubernetes operations the provisioner needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkloadClient: Send + Sync {
    /// Read a Deployment; None if it does not exist
    async fn get_deployment(&self, namespace: &str, name: &str)
        -> Result<Option<Deployment>, Error>;

    /// Read a Bucket; None if it does not exist
    async fn get_bucket(&self, namespace: &str, name: &str) -> Result<Option<Bucket>, Error>;

    /// Create a Bucket; Ok(false) if one with that name already exists
    async fn create_bucket(&self, bucket: &Bucket) -> Result<bool, Error>;
}

/// [`WorkloadClient`] backed by the API server
pub struct WorkloadClientImpl {
    client: Client,
}

impl WorkloadClientImpl {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WorkloadClient for WorkloadClientImpl {
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_bucket(&self, namespace: &str, name: &str) -> Result<Option<Bucket>, Error> {
        let api: Api<Bucket> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_bucket(&self, bucket: &Bucket) -> Result<bool, Error> {
        let name = bucket.name_any();
        let namespace = bucket
            .namespace()
            .ok_or_else(|| Error::validation_for(&name, "bucket has no namespace"))?;
        let api: Api<Bucket> = Api::namespaced(self.client.clone(), &namespace);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };

        match api.create(&params, bucket).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Ok(false)
            }
            Err(e) => Err(Error::kube_for(name, e)),
        }
    }
}

/// Shared state for every provisioning reconcile
pub struct ProvisionerContext {
    /// Kubernetes access
    pub kube: Arc<dyn WorkloadClient>,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Per-object retry delays
    pub backoff: ReconcileBackoff,
}

impl ProvisionerContext {
    /// Production context
    pub fn new(client: Client) -> Self {
        Self {
            kube: Arc::new(WorkloadClientImpl::new(client.clone())),
            events: Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME)),
            backoff: ReconcileBackoff::new(),
        }
    }

    /// Context with injected collaborators
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn WorkloadClient>, events: Arc<dyn EventPublisher>) -> Self {
        Self {
            kube,
            events,
            backoff: ReconcileBackoff::new(),
        }
    }
}

fn object_key(deployment: &Deployment) -> String {
    format!(
        "{}/{}",
        deployment.namespace().unwrap_or_default(),
        deployment.name_any()
    )
}

/// Reconcile one Deployment
#[instrument(
    skip(deployment, ctx),
    fields(deployment = %deployment.name_any(), namespace = ?deployment.namespace())
)]
pub async fn reconcile(
    deployment: Arc<Deployment>,
    ctx: Arc<ProvisionerContext>,
) -> Result<Action, Error> {
    let timer = ReconcileTimer::start("provisioner");
    match provision(&deployment, &ctx).await {
        Ok(action) => {
            ctx.backoff.reset(&object_key(&deployment));
            timer.success();
            Ok(action)
        }
        Err(e) => {
            timer.error(e.kind());
            Err(e)
        }
    }
}

async fn provision(deployment: &Deployment, ctx: &ProvisionerContext) -> Result<Action, Error> {
    let name = deployment.name_any();
    let namespace = deployment
        .namespace()
        .ok_or_else(|| Error::validation_for(&name, "deployment has no namespace"))?;

    let Some(current) = ctx.kube.get_deployment(&namespace, &name).await? else {
        debug!("deployment no longer exists");
        return Ok(Action::await_change());
    };

    let view = WorkloadAnnotationView::from_deployment(&current)?;
    if view.cloud.is_none() {
        return Ok(Action::await_change());
    }

    if ctx.kube.get_bucket(&namespace, &name).await?.is_some() {
        debug!("bucket already exists");
        return Ok(Action::await_change());
    }

    let owner = current.controller_owner_ref(&()).ok_or_else(|| {
        Error::internal_with_context("provisioner", format!("deployment {name} has no uid"))
    })?;
    let Some(bucket) = desired_bucket(&view, owner) else {
        return Ok(Action::await_change());
    };

    if !ctx.kube.create_bucket(&bucket).await? {
        debug!("bucket created concurrently");
        return Ok(Action::await_change());
    }

    info!(
        cloud = %bucket.spec.cloud,
        full_name = %bucket.spec.full_name,
        "Bucket created for deployment"
    );
    ctx.events
        .publish(
            &current.object_ref(&()),
            EventType::Normal,
            reasons::BUCKET_PROVISIONED,
            actions::PROVISION,
            Some(format!(
                "created Bucket {name} for {} bucket {}",
                bucket.spec.cloud, bucket.spec.full_name
            )),
        )
        .await;
    Ok(Action::requeue(Duration::ZERO))
}

/// Requeue policy for failed provisioning reconciles
pub fn error_policy(
    deployment: Arc<Deployment>,
    error: &Error,
    ctx: Arc<ProvisionerContext>,
) -> Action {
    let key = object_key(&deployment);
    if error.is_retryable() {
        let delay = ctx.backoff.next_delay(&key);
        warn!(
            deployment = %key,
            error = %error,
            retry_in_ms = delay.as_millis() as u64,
            "Provisioning failed, retrying"
        );
        Action::requeue(delay)
    } else {
        error!(deployment = %key, error = %error, "Provisioning failed permanently");
        Action::await_change()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autobucket_common::crd::{BucketCloud, BucketSpec, OnDeletePolicy};
    use autobucket_common::events::NoopEventPublisher;
    use autobucket_common::{CLOUD_ANNOTATION, NAME_PREFIX_ANNOTATION};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use mockall::predicate::eq;

    fn deployment(annotations: &[(&str, &str)]) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some("test-deployment".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("3f0c5a9e-0000-4000-8000-000000000002".to_string()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn kube_with(deployment: Option<Deployment>) -> MockWorkloadClient {
        let mut kube = MockWorkloadClient::new();
        kube.expect_get_deployment()
            .with(eq("default"), eq("test-deployment"))
            .returning(move |_, _| Ok(deployment.clone()));
        kube
    }

    fn context(kube: MockWorkloadClient) -> Arc<ProvisionerContext> {
        Arc::new(ProvisionerContext::for_testing(
            Arc::new(kube),
            Arc::new(NoopEventPublisher),
        ))
    }

    fn existing_bucket() -> Bucket {
        let mut bucket = Bucket::new(
            "test-deployment",
            BucketSpec {
                cloud: BucketCloud::Gcp,
                full_name: "ab-default-test-deployment".to_string(),
                on_delete_policy: OnDeletePolicy::Ignore,
            },
        );
        bucket.metadata.namespace = Some("default".to_string());
        bucket
    }

    #[tokio::test]
    async fn vanished_deployment_is_a_noop() {
        let mut kube = kube_with(None);
        kube.expect_get_bucket().never();
        kube.expect_create_bucket().never();

        let dep = deployment(&[(CLOUD_ANNOTATION, "gcp")]);
        let action = reconcile(Arc::new(dep), context(kube)).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn unannotated_deployment_never_creates() {
        for annotations in [vec![], vec![(NAME_PREFIX_ANNOTATION, "abtest")]] {
            let dep = deployment(&annotations);
            let mut kube = kube_with(Some(dep.clone()));
            kube.expect_get_bucket().never();
            kube.expect_create_bucket().never();

            let action = reconcile(Arc::new(dep), context(kube)).await.unwrap();
            assert_eq!(action, Action::await_change());
        }
    }

    /// Story: Scenario B, an annotated Deployment gets its Bucket
    #[tokio::test]
    async fn story_annotated_deployment_gets_bucket() {
        let dep = deployment(&[(CLOUD_ANNOTATION, "gcp"), (NAME_PREFIX_ANNOTATION, "abtest")]);
        let mut kube = kube_with(Some(dep.clone()));
        kube.expect_get_bucket()
            .with(eq("default"), eq("test-deployment"))
            .returning(|_, _| Ok(None));
        kube.expect_create_bucket()
            .withf(|b| {
                b.name_any() == "test-deployment"
                    && b.namespace().as_deref() == Some("default")
                    && b.spec.cloud == BucketCloud::Gcp
                    && b.spec.full_name == "abtest-default-test-deployment"
                    && b.owner_references().iter().any(|o| {
                        o.kind == "Deployment"
                            && o.uid == "3f0c5a9e-0000-4000-8000-000000000002"
                            && o.controller == Some(true)
                    })
            })
            .times(1)
            .returning(|_| Ok(true));

        let action = reconcile(Arc::new(dep), context(kube)).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::ZERO));
    }

    #[tokio::test]
    async fn existing_bucket_is_not_touched() {
        let dep = deployment(&[(CLOUD_ANNOTATION, "gcp"), (NAME_PREFIX_ANNOTATION, "changed")]);
        let mut kube = kube_with(Some(dep.clone()));
        kube.expect_get_bucket()
            .returning(|_, _| Ok(Some(existing_bucket())));
        kube.expect_create_bucket().never();

        let action = reconcile(Arc::new(dep), context(kube)).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn racing_create_counts_as_present() {
        let dep = deployment(&[(CLOUD_ANNOTATION, "gcp")]);
        let mut kube = kube_with(Some(dep.clone()));
        kube.expect_get_bucket().returning(|_, _| Ok(None));
        kube.expect_create_bucket().times(1).returning(|_| Ok(false));

        let action = reconcile(Arc::new(dep), context(kube)).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn deployment_without_uid_fails_retryably() {
        let mut dep = deployment(&[(CLOUD_ANNOTATION, "gcp")]);
        dep.metadata.uid = None;
        let mut kube = kube_with(Some(dep.clone()));
        kube.expect_get_bucket().returning(|_, _| Ok(None));
        kube.expect_create_bucket().never();

        let ctx = context(kube);
        let err = reconcile(Arc::new(dep.clone()), ctx.clone())
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let action = error_policy(Arc::new(dep), &err, ctx.clone());
        assert_ne!(action, Action::await_change());
        assert_eq!(ctx.backoff.failures("default/test-deployment"), 1);
    }

    #[test]
    fn validation_errors_wait_for_change() {
        let ctx = context(MockWorkloadClient::new());
        let err = Error::validation_for("test-deployment", "deployment has no namespace");
        let action = error_policy(Arc::new(deployment(&[])), &err, ctx);
        assert_eq!(action, Action::await_change());
    }
}
