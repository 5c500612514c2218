//! Deployment-driven Bucket provisioning
//!
//! A Deployment annotated with `ab.leclouddev.com/cloud` gets a Bucket of the
//! same name in its namespace, owned by the Deployment so it is garbage
//! collected with it. Deployments without the annotation are ignored.

#![deny(missing_docs)]

pub mod controller;
pub mod derive;

pub use controller::{
    error_policy, reconcile, ProvisionerContext, WorkloadClient, WorkloadClientImpl,
};
pub use derive::{bucket_full_name, desired_bucket, labels_for_bucket, WorkloadAnnotationView};
