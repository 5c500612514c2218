//! Bucket lifecycle controller
//!
//! Registers the finalizer on every Bucket, creates the cloud bucket once the
//! finalizer is durable, and on deletion either destroys the cloud bucket or
//! leaves it in place according to `onDeletePolicy`.

#![deny(missing_docs)]

pub mod controller;
pub mod state;

pub use controller::{error_policy, reconcile, BucketClient, BucketClientImpl, Context};
pub use state::{plan, LifecycleState, LifecycleStep};
