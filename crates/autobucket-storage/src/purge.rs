//! Idempotent create and purge-then-delete over a raw storage API
//!
//! Object stores refuse to delete a bucket that still holds objects, so a
//! delete first walks the whole (paginated) object listing and removes each
//! object. Progress is not checkpointed: the first failed object delete aborts
//! the operation before the bucket delete, and a retry starts the walk over.

use async_trait::async_trait;
use autobucket_common::metrics;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::{CloudStorageAdapter, StorageError};

/// One page of an object listing
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectPage {
    /// Object names on this page
    pub names: Vec<String>,
    /// Token for the next page; None on the last page
    pub next_page_token: Option<String>,
}

/// Raw bucket and object calls of one cloud's storage API
///
/// Object and bucket deletes treat "already gone" as success.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStorageApi: Send + Sync {
    /// Whether `bucket` exists
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError>;

    /// Create `bucket`; an "already exists" answer is success
    async fn insert_bucket(&self, bucket: &str) -> Result<(), StorageError>;

    /// List one page of object names
    async fn list_objects(
        &self,
        bucket: &str,
        page_token: Option<String>,
    ) -> Result<ObjectPage, StorageError>;

    /// Delete one object
    async fn delete_object(&self, bucket: &str, object: &str) -> Result<(), StorageError>;

    /// Delete an empty bucket
    async fn delete_bucket(&self, bucket: &str) -> Result<(), StorageError>;
}

/// [`CloudStorageAdapter`] built on an [`ObjectStorageApi`]
pub struct PurgingStorageAdapter<A> {
    api: A,
}

impl<A: ObjectStorageApi> PurgingStorageAdapter<A> {
    /// Wrap a raw storage client
    pub fn new(api: A) -> Self {
        Self { api }
    }

    /// Delete every object in `bucket`, returning how many were removed
    async fn purge(&self, bucket: &str) -> Result<u64, StorageError> {
        let mut deleted = 0u64;
        let mut page_token = None;
        loop {
            let page = self.api.list_objects(bucket, page_token).await?;
            for name in &page.names {
                self.api.delete_object(bucket, name).await?;
                deleted += 1;
            }
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(deleted),
            }
        }
    }
}

#[async_trait]
impl<A: ObjectStorageApi> CloudStorageAdapter for PurgingStorageAdapter<A> {
    async fn create_bucket(&self, name: &str) -> Result<(), StorageError> {
        if self.api.bucket_exists(name).await? {
            debug!(bucket = %name, "Bucket already exists");
            return Ok(());
        }
        self.api.insert_bucket(name).await?;
        info!(bucket = %name, "Bucket created");
        Ok(())
    }

    async fn delete_bucket(&self, name: &str) -> Result<(), StorageError> {
        if !self.api.bucket_exists(name).await? {
            debug!(bucket = %name, "Bucket already absent");
            return Ok(());
        }

        let purged = self.purge(name).await?;
        metrics::record_purged_objects(purged);

        self.api.delete_bucket(name).await?;
        info!(bucket = %name, purged, "Bucket deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use mockall::Sequence;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Mutex;

    fn forbidden(bucket: &str) -> StorageError {
        StorageError::Status {
            operation: "delete object",
            bucket: bucket.to_string(),
            status: 403,
            body: String::new(),
        }
    }

    /// In-memory store with fixed-size pages
    #[derive(Default)]
    struct FakeStore {
        buckets: Mutex<BTreeMap<String, BTreeSet<String>>>,
        page_size: usize,
    }

    impl FakeStore {
        fn with_objects(bucket: &str, objects: &[&str], page_size: usize) -> Self {
            let store = Self {
                page_size,
                ..Default::default()
            };
            store.buckets.lock().unwrap().insert(
                bucket.to_string(),
                objects.iter().map(|o| o.to_string()).collect(),
            );
            store
        }

        fn bucket_count(&self) -> usize {
            self.buckets.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ObjectStorageApi for FakeStore {
        async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError> {
            Ok(self.buckets.lock().unwrap().contains_key(bucket))
        }

        async fn insert_bucket(&self, bucket: &str) -> Result<(), StorageError> {
            self.buckets
                .lock()
                .unwrap()
                .entry(bucket.to_string())
                .or_default();
            Ok(())
        }

        async fn list_objects(
            &self,
            bucket: &str,
            page_token: Option<String>,
        ) -> Result<ObjectPage, StorageError> {
            let buckets = self.buckets.lock().unwrap();
            let Some(objects) = buckets.get(bucket) else {
                return Ok(ObjectPage::default());
            };
            let start = page_token.unwrap_or_default();
            let names: Vec<String> = objects
                .iter()
                .filter(|o| o.as_str() > start.as_str() || start.is_empty())
                .take(self.page_size)
                .cloned()
                .collect();
            let next_page_token = names
                .last()
                .filter(|last| objects.iter().any(|o| o > *last))
                .cloned();
            Ok(ObjectPage {
                names,
                next_page_token,
            })
        }

        async fn delete_object(&self, bucket: &str, object: &str) -> Result<(), StorageError> {
            if let Some(objects) = self.buckets.lock().unwrap().get_mut(bucket) {
                objects.remove(object);
            }
            Ok(())
        }

        async fn delete_bucket(&self, bucket: &str) -> Result<(), StorageError> {
            let mut buckets = self.buckets.lock().unwrap();
            if buckets.get(bucket).is_some_and(|o| !o.is_empty()) {
                return Err(StorageError::Status {
                    operation: "delete bucket",
                    bucket: bucket.to_string(),
                    status: 409,
                    body: "bucket not empty".to_string(),
                });
            }
            buckets.remove(bucket);
            Ok(())
        }
    }

    #[tokio::test]
    async fn create_twice_leaves_one_bucket() {
        let adapter = PurgingStorageAdapter::new(FakeStore {
            page_size: 10,
            ..Default::default()
        });

        adapter.create_bucket("ab-default-web").await.unwrap();
        adapter.create_bucket("ab-default-web").await.unwrap();

        assert_eq!(adapter.api.bucket_count(), 1);
    }

    #[tokio::test]
    async fn delete_absent_bucket_is_noop() {
        let mut api = MockObjectStorageApi::new();
        api.expect_bucket_exists().returning(|_| Ok(false));
        api.expect_list_objects().never();
        api.expect_delete_bucket().never();

        PurgingStorageAdapter::new(api)
            .delete_bucket("ab-default-gone")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_skips_insert_when_bucket_exists() {
        let mut api = MockObjectStorageApi::new();
        api.expect_bucket_exists()
            .with(eq("ab-default-web"))
            .returning(|_| Ok(true));
        api.expect_insert_bucket().never();

        PurgingStorageAdapter::new(api)
            .create_bucket("ab-default-web")
            .await
            .unwrap();
    }

    /// Story: destroying a bucket with three objects
    ///
    /// Every object is deleted first, in listing order, and only then is the
    /// bucket itself deleted, exactly once.
    #[tokio::test]
    async fn story_objects_deleted_before_bucket() {
        let mut seq = Sequence::new();
        let mut api = MockObjectStorageApi::new();

        api.expect_bucket_exists()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(true));
        api.expect_list_objects()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Ok(ObjectPage {
                    names: vec!["a.txt".to_string(), "b.txt".to_string(), "c/d.txt".to_string()],
                    next_page_token: None,
                })
            });
        for name in ["a.txt", "b.txt", "c/d.txt"] {
            api.expect_delete_object()
                .with(eq("ab-default-web"), eq(name))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(()));
        }
        api.expect_delete_bucket()
            .with(eq("ab-default-web"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        PurgingStorageAdapter::new(api)
            .delete_bucket("ab-default-web")
            .await
            .unwrap();
    }

    /// Story: one object refuses to go
    ///
    /// The purge stops at the failing object and the bucket delete is never
    /// attempted, so the caller keeps its finalizer and retries later.
    #[tokio::test]
    async fn story_object_failure_aborts_before_bucket_delete() {
        let mut api = MockObjectStorageApi::new();
        api.expect_bucket_exists().returning(|_| Ok(true));
        api.expect_list_objects().returning(|_, _| {
            Ok(ObjectPage {
                names: vec!["a.txt".to_string(), "locked.txt".to_string(), "z.txt".to_string()],
                next_page_token: None,
            })
        });
        api.expect_delete_object()
            .with(eq("ab-default-web"), eq("a.txt"))
            .times(1)
            .returning(|_, _| Ok(()));
        api.expect_delete_object()
            .with(eq("ab-default-web"), eq("locked.txt"))
            .times(1)
            .returning(|bucket, _| Err(forbidden(bucket)));
        api.expect_delete_object()
            .with(eq("ab-default-web"), eq("z.txt"))
            .never();
        api.expect_delete_bucket().never();

        let err = PurgingStorageAdapter::new(api)
            .delete_bucket("ab-default-web")
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(403));
    }

    #[tokio::test]
    async fn purge_follows_page_tokens() {
        let objects: Vec<String> = (0..7).map(|i| format!("obj-{i}")).collect();
        let refs: Vec<&str> = objects.iter().map(String::as_str).collect();
        let adapter =
            PurgingStorageAdapter::new(FakeStore::with_objects("ab-default-web", &refs, 3));

        adapter.delete_bucket("ab-default-web").await.unwrap();

        assert_eq!(adapter.api.bucket_count(), 0);
        adapter.delete_bucket("ab-default-web").await.unwrap();
    }

    #[tokio::test]
    async fn listing_error_propagates() {
        let mut api = MockObjectStorageApi::new();
        api.expect_bucket_exists().returning(|_| Ok(true));
        api.expect_list_objects().returning(|bucket, _| {
            Err(StorageError::Status {
                operation: "list objects",
                bucket: bucket.to_string(),
                status: 500,
                body: String::new(),
            })
        });
        api.expect_delete_bucket().never();

        let err = PurgingStorageAdapter::new(api)
            .delete_bucket("ab-default-web")
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));
    }
}
