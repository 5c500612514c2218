//! Common types for autobucket: the Bucket CRD, errors, and controller utilities

#![deny(missing_docs)]

pub mod backoff;
pub mod crd;
pub mod error;
pub mod events;
pub mod finalizers;
pub mod leader_election;
pub mod metrics;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group shared by the Bucket CRD, its finalizer, and workload annotations
pub const API_GROUP: &str = "ab.leclouddev.com";

/// Finalizer token that blocks Bucket removal until the cloud bucket is handled
pub const BUCKET_FINALIZER: &str = "ab.leclouddev.com/bucket-finalizer";

/// Deployment annotation selecting the target cloud (absent = opt-out)
pub const CLOUD_ANNOTATION: &str = "ab.leclouddev.com/cloud";

/// Deployment annotation overriding the bucket name prefix
pub const NAME_PREFIX_ANNOTATION: &str = "ab.leclouddev.com/name-prefix";

/// Namespace the operator runs in when POD_NAMESPACE is not set
pub const AUTOBUCKET_SYSTEM_NAMESPACE: &str = "autobucket-system";

/// Field manager used for every write the operator makes
pub const FIELD_MANAGER: &str = "autobucket-controller";
