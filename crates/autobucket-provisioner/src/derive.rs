//! Deriving a desired Bucket from Deployment annotations
//!
//! All functions here are pure. The derived `fullName` depends only on the
//! prefix, namespace and Deployment name, so repeated reconciles always
//! compute the same Bucket.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;

use autobucket_common::crd::{Bucket, BucketCloud, BucketSpec, OnDeletePolicy};
use autobucket_common::{Error, CLOUD_ANNOTATION, NAME_PREFIX_ANNOTATION};

/// Prefix used when the name-prefix annotation is absent or empty
pub const DEFAULT_NAME_PREFIX: &str = "ab";

/// The parts of a Deployment the provisioner reads
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadAnnotationView {
    /// Deployment name, reused as the Bucket name
    pub name: String,
    /// Deployment namespace
    pub namespace: String,
    /// Cloud annotation; None means opted out
    pub cloud: Option<BucketCloud>,
    /// Bucket name prefix
    pub name_prefix: String,
}

impl WorkloadAnnotationView {
    /// Read the view off a Deployment
    pub fn from_deployment(deployment: &Deployment) -> Result<Self, Error> {
        let name = deployment.name_any();
        let namespace = deployment
            .namespace()
            .ok_or_else(|| Error::validation_for(&name, "deployment has no namespace"))?;
        let annotations = deployment.annotations();

        let cloud = annotations
            .get(CLOUD_ANNOTATION)
            .filter(|v| !v.is_empty())
            .map(|v| BucketCloud::from(v.as_str()));
        let name_prefix = annotations
            .get(NAME_PREFIX_ANNOTATION)
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_NAME_PREFIX.to_string());

        Ok(Self {
            name,
            namespace,
            cloud,
            name_prefix,
        })
    }

    /// Global cloud bucket name for this workload
    pub fn bucket_full_name(&self) -> String {
        bucket_full_name(&self.name_prefix, &self.namespace, &self.name)
    }
}

/// `<prefix>-<namespace>-<name>`
pub fn bucket_full_name(prefix: &str, namespace: &str, name: &str) -> String {
    format!("{prefix}-{namespace}-{name}")
}

/// Labels stamped on derived Buckets
pub fn labels_for_bucket(deployment_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "ab".to_string()),
        ("deployment_cr".to_string(), deployment_name.to_string()),
    ])
}

/// The Bucket `view` asks for, owned by `owner`; None if opted out
pub fn desired_bucket(view: &WorkloadAnnotationView, owner: OwnerReference) -> Option<Bucket> {
    let cloud = view.cloud.clone()?;
    Some(Bucket {
        metadata: ObjectMeta {
            name: Some(view.name.clone()),
            namespace: Some(view.namespace.clone()),
            labels: Some(labels_for_bucket(&view.name)),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: BucketSpec {
            cloud,
            full_name: view.bucket_full_name(),
            on_delete_policy: OnDeletePolicy::default(),
        },
        status: None,
    })
}
