//! Kubernetes Events emitted by the autobucket controllers
//!
//! Every lifecycle transition of a Bucket is mirrored as an Event on the
//! object, so `kubectl describe bucket` tells the story without reading logs.
//! Publishing is best effort: a failed Event is logged and never fails the
//! reconcile that produced it.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Publishes Events about Kubernetes objects
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one Event on `object`
    async fn publish(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// `controller` becomes the Event's reportingComponent
    pub fn new(client: Client, controller: &str) -> Self {
        Self {
            recorder: Recorder::new(
                client,
                Reporter {
                    controller: controller.to_string(),
                    instance: std::env::var("POD_NAME").ok(),
                },
            ),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, object).await {
            warn!(
                reason,
                object = ?object.name,
                error = %e,
                "Failed to publish event"
            );
        }
    }
}

/// Publisher that drops every Event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _object: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons (REASON column of `kubectl get events`)
pub mod reasons {
    /// Finalizer added to a new Bucket
    pub const FINALIZER_ADDED: &str = "FinalizerAdded";
    /// Cloud bucket created and creation time recorded
    pub const BUCKET_CREATED: &str = "BucketCreated";
    /// Cloud bucket creation failed
    pub const BUCKET_CREATE_FAILED: &str = "BucketCreateFailed";
    /// Cloud bucket purged and deleted
    pub const BUCKET_DELETED: &str = "BucketDeleted";
    /// Cloud bucket deletion failed
    pub const BUCKET_DELETE_FAILED: &str = "BucketDeleteFailed";
    /// Bucket object removed while the cloud bucket was kept
    pub const BUCKET_RETAINED: &str = "BucketRetained";
    /// Spec names a cloud with no adapter
    pub const UNRECOGNIZED_CLOUD: &str = "UnrecognizedCloud";
    /// Bucket object created for an annotated Deployment
    pub const BUCKET_PROVISIONED: &str = "BucketProvisioned";
}

/// Event actions (ACTION column of `kubectl get events`)
pub mod actions {
    /// Adding or removing the finalizer
    pub const FINALIZE: &str = "Finalize";
    /// Creating the cloud bucket
    pub const CREATE: &str = "Create";
    /// Deleting the cloud bucket
    pub const DELETE: &str = "Delete";
    /// Creating a Bucket object for a workload
    pub const PROVISION: &str = "Provision";
}
