//! Bucket Custom Resource Definition
//!
//! A Bucket is the declarative record of one cloud object-storage bucket.
//! The spec says which cloud and which global bucket name; the status records
//! when the cloud side was confirmed created.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Cloud that hosts a bucket
///
/// Stored as a plain string so objects written with a cloud this build does
/// not know still deserialize; those land in [`BucketCloud::Unrecognized`] and
/// are reported instead of acted on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum BucketCloud {
    /// Google Cloud Storage
    Gcp,
    /// Any value without a matching variant, kept verbatim
    Unrecognized(String),
}

impl BucketCloud {
    /// Wire value of this cloud
    pub fn as_str(&self) -> &str {
        match self {
            Self::Gcp => "gcp",
            Self::Unrecognized(raw) => raw,
        }
    }

    /// Whether this cloud has a matching variant
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }
}

impl From<String> for BucketCloud {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "gcp" => Self::Gcp,
            _ => Self::Unrecognized(raw),
        }
    }
}

impl From<&str> for BucketCloud {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_string())
    }
}

impl From<BucketCloud> for String {
    fn from(cloud: BucketCloud) -> Self {
        match cloud {
            BucketCloud::Gcp => "gcp".to_string(),
            BucketCloud::Unrecognized(raw) => raw,
        }
    }
}

impl std::fmt::Display for BucketCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to the cloud bucket when its Bucket object is deleted
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum OnDeletePolicy {
    /// Purge every object and delete the cloud bucket
    Destroy,
    /// Leave the cloud bucket in place
    #[default]
    Ignore,
}

impl std::fmt::Display for OnDeletePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Destroy => write!(f, "Destroy"),
            Self::Ignore => write!(f, "Ignore"),
        }
    }
}

/// Observed state of a Bucket
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BucketStatus {
    /// RFC 3339 time the cloud bucket was confirmed created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Specification for a Bucket
///
/// Immutable after creation: edits are not propagated to the cloud bucket.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "ab.leclouddev.com",
    version = "v1",
    kind = "Bucket",
    plural = "buckets",
    namespaced,
    status = "BucketStatus",
    printcolumn = r#"{"name":"Cloud","type":"string","jsonPath":".spec.cloud"}"#,
    printcolumn = r#"{"name":"FullName","type":"string","jsonPath":".spec.fullName"}"#,
    printcolumn = r#"{"name":"CreatedAt","type":"string","jsonPath":".status.createdAt"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BucketSpec {
    /// Cloud hosting the bucket (e.g. "gcp")
    #[schemars(with = "String")]
    pub cloud: BucketCloud,

    /// Globally unique cloud bucket name
    pub full_name: String,

    /// Delete-time behaviour for the cloud bucket
    #[serde(default)]
    pub on_delete_policy: OnDeletePolicy,
}

impl Bucket {
    /// Creation timestamp recorded in status, if the cloud bucket exists
    pub fn created_at(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.created_at.as_deref())
            .filter(|ts| !ts.is_empty())
    }

    /// Whether deletion has been requested on the object
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
