//! Bucket lifecycle states and the pure step planner
//!
//! ```text
//! Absent ─▶ FinalizerPending ─▶ AwaitingCreate ─▶ Created
//!                  │                  │              │
//!                  └──────────────────┴──────────────┴─▶ Deleting ─▶ Removed
//! ```
//!
//! A Bucket without the finalizer and without a deletion request is
//! FinalizerPending even if `createdAt` is already set: the finalizer is
//! always re-registered before anything else happens.

use autobucket_common::crd::{Bucket, BucketCloud, OnDeletePolicy};
use autobucket_common::finalizers::FinalizerSet;
use autobucket_common::BUCKET_FINALIZER;

/// Where a Bucket is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// Object not found
    Absent,
    /// Live object without the finalizer
    FinalizerPending,
    /// Finalizer registered, cloud bucket not yet confirmed
    AwaitingCreate,
    /// Cloud bucket confirmed; steady state
    Created,
    /// Deletion requested, finalizer still held
    Deleting,
    /// Deletion requested, finalizer released
    Removed,
}

impl LifecycleState {
    /// Classify the current object
    pub fn observe(bucket: Option<&Bucket>) -> Self {
        let Some(bucket) = bucket else {
            return Self::Absent;
        };
        let finalized = FinalizerSet::from_meta(&bucket.metadata).contains(BUCKET_FINALIZER);
        match (bucket.is_deleting(), finalized, bucket.created_at().is_some()) {
            (true, true, _) => Self::Deleting,
            (true, false, _) => Self::Removed,
            (false, false, _) => Self::FinalizerPending,
            (false, true, false) => Self::AwaitingCreate,
            (false, true, true) => Self::Created,
        }
    }

    /// Label for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::FinalizerPending => "finalizer-pending",
            Self::AwaitingCreate => "awaiting-create",
            Self::Created => "created",
            Self::Deleting => "deleting",
            Self::Removed => "removed",
        }
    }
}

/// The single action one reconcile pass performs
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleStep {
    /// Nothing exists or nothing is left to clean up
    Done,
    /// Persist the finalizer, then requeue
    AddFinalizer,
    /// Create the cloud bucket, record `createdAt`, then requeue
    Create {
        /// `spec.cloud`
        cloud: BucketCloud,
        /// Cloud bucket name
        full_name: String,
    },
    /// Nothing to do until the object changes
    Steady,
    /// Purge and delete the cloud bucket, then release the finalizer
    Destroy {
        /// `spec.cloud`
        cloud: BucketCloud,
        /// Cloud bucket name
        full_name: String,
    },
    /// Release the finalizer and leave the cloud bucket in place
    Retain,
}

/// Decide the next step for `bucket`
pub fn plan(bucket: Option<&Bucket>) -> LifecycleStep {
    let state = LifecycleState::observe(bucket);
    let Some(bucket) = bucket else {
        return LifecycleStep::Done;
    };
    let spec = &bucket.spec;

    match state {
        LifecycleState::Absent | LifecycleState::Removed => LifecycleStep::Done,
        LifecycleState::FinalizerPending => LifecycleStep::AddFinalizer,
        LifecycleState::AwaitingCreate => LifecycleStep::Create {
            cloud: spec.cloud.clone(),
            full_name: spec.full_name.clone(),
        },
        LifecycleState::Created => LifecycleStep::Steady,
        LifecycleState::Deleting => match spec.on_delete_policy {
            OnDeletePolicy::Destroy => LifecycleStep::Destroy {
                cloud: spec.cloud.clone(),
                full_name: spec.full_name.clone(),
            },
            OnDeletePolicy::Ignore => LifecycleStep::Retain,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autobucket_common::crd::{BucketSpec, BucketStatus};
    use chrono::Utc;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    struct Fixture {
        finalizer: bool,
        created: bool,
        deleting: bool,
        policy: OnDeletePolicy,
    }

    impl Fixture {
        fn build(self) -> Bucket {
            let mut bucket = Bucket::new(
                "test-bucket",
                BucketSpec {
                    cloud: BucketCloud::Gcp,
                    full_name: "ab-default-test-bucket".to_string(),
                    on_delete_policy: self.policy,
                },
            );
            if self.finalizer {
                bucket.metadata.finalizers = Some(vec![BUCKET_FINALIZER.to_string()]);
            }
            if self.created {
                bucket.status = Some(BucketStatus {
                    created_at: Some("2024-05-01T10:00:00Z".to_string()),
                });
            }
            if self.deleting {
                bucket.metadata.deletion_timestamp = Some(Time(Utc::now()));
            }
            bucket
        }
    }

    fn fixture(finalizer: bool, created: bool, deleting: bool) -> Fixture {
        Fixture {
            finalizer,
            created,
            deleting,
            policy: OnDeletePolicy::Ignore,
        }
    }

    #[test]
    fn observe_covers_every_combination() {
        let cases = [
            (false, false, false, LifecycleState::FinalizerPending),
            (false, true, false, LifecycleState::FinalizerPending),
            (true, false, false, LifecycleState::AwaitingCreate),
            (true, true, false, LifecycleState::Created),
            (true, false, true, LifecycleState::Deleting),
            (true, true, true, LifecycleState::Deleting),
            (false, false, true, LifecycleState::Removed),
            (false, true, true, LifecycleState::Removed),
        ];
        for (finalizer, created, deleting, expected) in cases {
            let bucket = fixture(finalizer, created, deleting).build();
            assert_eq!(
                LifecycleState::observe(Some(&bucket)),
                expected,
                "finalizer={finalizer} created={created} deleting={deleting}"
            );
        }
        assert_eq!(LifecycleState::observe(None), LifecycleState::Absent);
    }

    #[test]
    fn only_our_finalizer_counts() {
        let mut bucket = fixture(false, false, false).build();
        bucket.metadata.finalizers = Some(vec!["example.com/keep".to_string()]);
        assert_eq!(
            LifecycleState::observe(Some(&bucket)),
            LifecycleState::FinalizerPending
        );

        bucket.metadata.finalizers = Some(vec![
            "example.com/keep".to_string(),
            BUCKET_FINALIZER.to_string(),
        ]);
        assert_eq!(
            LifecycleState::observe(Some(&bucket)),
            LifecycleState::AwaitingCreate
        );
    }

    #[test]
    fn missing_object_is_done() {
        assert_eq!(plan(None), LifecycleStep::Done);
    }

    /// Story: a fresh Bucket takes two passes to reach the cloud
    ///
    /// The first pass only registers the finalizer; creation is planned only
    /// once the finalizer is on the stored object.
    #[test]
    fn story_finalizer_before_create() {
        let fresh = fixture(false, false, false).build();
        assert_eq!(plan(Some(&fresh)), LifecycleStep::AddFinalizer);

        let finalized = fixture(true, false, false).build();
        assert_eq!(
            plan(Some(&finalized)),
            LifecycleStep::Create {
                cloud: BucketCloud::Gcp,
                full_name: "ab-default-test-bucket".to_string(),
            }
        );

        let created = fixture(true, true, false).build();
        assert_eq!(plan(Some(&created)), LifecycleStep::Steady);
    }

    #[test]
    fn delete_policy_selects_branch() {
        let ignore = fixture(true, true, true).build();
        assert_eq!(plan(Some(&ignore)), LifecycleStep::Retain);

        let destroy = Fixture {
            policy: OnDeletePolicy::Destroy,
            ..fixture(true, true, true)
        }
        .build();
        assert_eq!(
            plan(Some(&destroy)),
            LifecycleStep::Destroy {
                cloud: BucketCloud::Gcp,
                full_name: "ab-default-test-bucket".to_string(),
            }
        );
    }

    #[test]
    fn destroy_is_planned_even_before_create_confirmed() {
        let bucket = Fixture {
            policy: OnDeletePolicy::Destroy,
            ..fixture(true, false, true)
        }
        .build();
        assert!(matches!(plan(Some(&bucket)), LifecycleStep::Destroy { .. }));
    }

    #[test]
    fn released_object_needs_nothing() {
        let bucket = Fixture {
            policy: OnDeletePolicy::Destroy,
            ..fixture(false, true, true)
        }
        .build();
        assert_eq!(plan(Some(&bucket)), LifecycleStep::Done);
    }

    #[test]
    fn unrecognized_cloud_is_still_planned() {
        let mut bucket = fixture(true, false, false).build();
        bucket.spec.cloud = BucketCloud::Unrecognized("azure".to_string());
        assert_eq!(
            plan(Some(&bucket)),
            LifecycleStep::Create {
                cloud: BucketCloud::Unrecognized("azure".to_string()),
                full_name: "ab-default-test-bucket".to_string(),
            }
        );
    }
}
