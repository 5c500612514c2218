//! The adapter contract and the per-cloud registry

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use autobucket_common::crd::BucketCloud;

#[cfg(test)]
use mockall::automock;

use crate::StorageError;

/// Creates and deletes buckets in one cloud
///
/// Both operations are idempotent. `create_bucket` succeeds without changes
/// if the bucket already exists. `delete_bucket` succeeds if the bucket is
/// absent, and otherwise removes every object before removing the bucket.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CloudStorageAdapter: Send + Sync {
    /// Ensure a bucket called `name` exists
    async fn create_bucket(&self, name: &str) -> Result<(), StorageError>;

    /// Ensure no bucket called `name` exists
    async fn delete_bucket(&self, name: &str) -> Result<(), StorageError>;
}

/// Adapters keyed by the cloud they serve
#[derive(Clone, Default)]
pub struct CloudAdapters {
    adapters: HashMap<BucketCloud, Arc<dyn CloudStorageAdapter>>,
}

impl CloudAdapters {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`CloudAdapters::register`]
    pub fn with(mut self, cloud: BucketCloud, adapter: Arc<dyn CloudStorageAdapter>) -> Self {
        self.register(cloud, adapter);
        self
    }

    /// Serve `cloud` with `adapter`, replacing any previous one
    pub fn register(&mut self, cloud: BucketCloud, adapter: Arc<dyn CloudStorageAdapter>) {
        self.adapters.insert(cloud, adapter);
    }

    /// Adapter for `cloud`, if one is registered
    ///
    /// [`BucketCloud::Unrecognized`] never has one.
    pub fn get(&self, cloud: &BucketCloud) -> Option<Arc<dyn CloudStorageAdapter>> {
        if !cloud.is_recognized() {
            return None;
        }
        self.adapters.get(cloud).cloned()
    }

    /// Clouds with a registered adapter
    pub fn clouds(&self) -> Vec<&BucketCloud> {
        self.adapters.keys().collect()
    }
}

impl std::fmt::Debug for CloudAdapters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudAdapters")
            .field("clouds", &self.clouds())
            .finish()
    }
}
